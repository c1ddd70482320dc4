use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::{Pipeline, SubCommandExtend};
use crate::config::{DispatchOptions, ExtractorOptions, GmmOptions, Opts, OutputFormat};
use crate::dispatch::EncodeInput;
use crate::utils;

#[derive(Parser, Debug, Clone)]
pub struct EncodeCommand {
    #[command(flatten)]
    pub gmm: GmmOptions,
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub dispatch: DispatchOptions,
    /// 图片路径，也可以是已经提取好的特征向量 (.npy)
    pub image: PathBuf,
    /// 将描述符保存为 .npy 文件，而不是打印出来
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for EncodeCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let is_feature = utils::is_npy(&self.image);
        let pipeline = Pipeline::open(opts, &self.gmm, &self.extractor, &self.dispatch, !is_feature)?;

        let input = if is_feature {
            EncodeInput::Feature(utils::read_descriptor(&self.image)?)
        } else {
            EncodeInput::Image(tokio::fs::read(&self.image).await?)
        };
        let descriptor = pipeline.dispatcher.submit(input).await?;
        pipeline.close();

        match &self.output {
            Some(path) => {
                utils::write_descriptor(path, &descriptor)?;
                info!("描述符已保存到 {}，长度 {}", path.display(), descriptor.len());
            }
            None => match self.output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&descriptor)?),
                OutputFormat::Table => {
                    for v in &descriptor {
                        println!("{v:.6}");
                    }
                }
            },
        }
        Ok(())
    }
}
