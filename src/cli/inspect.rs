use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use crate::cli::SubCommandExtend;
use crate::config::{GmmOptions, Opts, OutputFormat};
use crate::fisher::FisherEncoder;
use crate::gmm::{GmmParams, GmmStore};

#[derive(Parser, Debug, Clone)]
pub struct InspectCommand {
    #[command(flatten)]
    pub gmm: GmmOptions,
    /// GMM 参数文件，优先于 --gmm
    pub path: Option<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

#[derive(Serialize)]
struct ModelSummary {
    path: String,
    version: u32,
    components: usize,
    feature_dim: usize,
    weight_sum: f32,
    min_variance: f32,
    descriptor_len: usize,
}

impl SubCommandExtend for InspectCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let path = self.path.clone().unwrap_or_else(|| self.gmm.path(&opts.conf_dir));
        let store = GmmStore::from_file(&path, self.gmm.config());
        let model = store.load()?;
        // 版本号在校验时已经确认，这里只为展示
        let params = GmmParams::from_json(&std::fs::read_to_string(&path)?)?;

        let summary = ModelSummary {
            path: path.display().to_string(),
            version: params.version,
            components: model.components(),
            feature_dim: model.dim(),
            weight_sum: model.weights().sum(),
            min_variance: model.covariances().fold(f32::INFINITY, |acc, &v| acc.min(v)),
            descriptor_len: FisherEncoder::descriptor_len(&model),
        };

        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            OutputFormat::Table => {
                println!("path          : {}", summary.path);
                println!("version       : {}", summary.version);
                println!("components    : {}", summary.components);
                println!("feature_dim   : {}", summary.feature_dim);
                println!("weight_sum    : {:.6}", summary.weight_sum);
                println!("min_variance  : {:e}", summary.min_variance);
                println!("descriptor_len: {}", summary.descriptor_len);
            }
        }
        Ok(())
    }
}
