use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use tasks::*;

mod tasks;

use crate::cli::{Pipeline, SubCommandExtend};
use crate::config::{
    DispatchOptions, ExtractorOptions, GmmOptions, Opts, OutputFormat, ScoreOptions,
};
use crate::scan::{ScanInput, ScanReport};
use crate::utils::{pb_style, suffix_regex};

#[derive(Parser, Debug, Clone)]
pub struct ScanCommand {
    #[command(flatten)]
    pub gmm: GmmOptions,
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub dispatch: DispatchOptions,
    #[command(flatten)]
    pub score: ScoreOptions,
    /// 图片所在目录，也支持扫描 tar 归档文件
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png")]
    pub suffix: String,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ScanCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let re_suf = suffix_regex(&self.suffix)?;
        let pipeline = Pipeline::open(opts, &self.gmm, &self.extractor, &self.dispatch, true)?;
        let scanner = pipeline.scanner(&self.score);

        let pb = ProgressBar::no_length().with_style(pb_style());
        let (t, mut rx) = task_scan(self.path.clone(), pb.clone(), re_suf);

        let mut inputs = vec![];
        while let Some(image) = rx.recv().await {
            pb.set_message(image.path.clone());
            pb.inc(1);
            inputs.push(ScanInput::image(image.path, image.data));
        }
        t.await??;
        pb.finish_with_message(format!("读取完成，共 {} 张图片", inputs.len()));

        let report = scanner.scan_report(inputs).await?;
        pipeline.close();

        print_report(&report, self.output_format)
    }
}

fn print_report(report: &ScanReport, format: OutputFormat) -> Result<()> {
    for failure in &report.failures {
        eprintln!("[ERR] {}: {}", failure.reference, failure.error);
    }
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report.matches)?)
        }
        OutputFormat::Table => {
            for m in &report.matches {
                println!("{:.4}\t{}\t{}", m.score, m.source, m.target);
            }
        }
    }
    Ok(())
}
