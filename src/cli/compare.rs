use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;

use crate::cli::{Pipeline, SubCommandExtend};
use crate::config::{
    DispatchOptions, ExtractorOptions, GmmOptions, Opts, OutputFormat, ScoreOptions,
};
use crate::dispatch::EncodeInput;
use crate::fisher::Descriptor;
use crate::similarity::{Score, Scorer};
use crate::utils;

#[derive(Parser, Debug, Clone)]
pub struct CompareCommand {
    #[command(flatten)]
    pub gmm: GmmOptions,
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub dispatch: DispatchOptions,
    #[command(flatten)]
    pub score: ScoreOptions,
    /// 第一张图片，或者由 encode 保存的描述符 (.npy)
    pub a: PathBuf,
    /// 第二张图片，或者由 encode 保存的描述符 (.npy)
    pub b: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for CompareCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let scorer = Scorer::new((&self.score).into());

        // 两边都是描述符时不需要加载任何模型
        let (a, b) = if utils::is_npy(&self.a) && utils::is_npy(&self.b) {
            (utils::read_descriptor(&self.a)?, utils::read_descriptor(&self.b)?)
        } else {
            let pipeline = Pipeline::open(opts, &self.gmm, &self.extractor, &self.dispatch, true)?;
            let a = self.descriptor(&pipeline, &self.a).await?;
            let b = self.descriptor(&pipeline, &self.b).await?;
            pipeline.close();
            (a, b)
        };

        let score = scorer.score(&a, &b)?;
        print_score(&score, self.output_format)
    }
}

impl CompareCommand {
    async fn descriptor(&self, pipeline: &Pipeline, path: &Path) -> Result<Descriptor> {
        if utils::is_npy(path) {
            return utils::read_descriptor(path);
        }
        let bytes = tokio::fs::read(path).await?;
        Ok(pipeline.dispatcher.submit(EncodeInput::Image(bytes)).await?)
    }
}

fn print_score(score: &Score, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(score)?),
        OutputFormat::Table => {
            println!("distance    : {:.6}", score.distance);
            println!("similarity  : {:.6}", score.similarity);
            println!("is_duplicate: {}", score.is_duplicate);
        }
    }
    Ok(())
}
