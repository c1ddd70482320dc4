use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::dispatch::DispatcherConfig;
use crate::extractor::ExtractorConfig;
use crate::fisher::EncoderConfig;
use crate::gmm::GmmConfig;
use crate::similarity::ScorerConfig;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "fvdedup", "fvdedup")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    ConfDir { path }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".")
}

#[derive(Parser, Debug, Clone)]
pub struct GmmOptions {
    /// GMM 参数文件，默认为配置目录下的 gmm_params.json
    #[arg(short, long, value_name = "PATH")]
    pub gmm: Option<PathBuf>,
    /// 期望的 GMM 分量数 K，设置后与参数文件不一致会报错
    #[arg(short = 'k', long, value_name = "K")]
    pub components: Option<usize>,
    /// 期望的特征维数 D，设置后与参数文件不一致会报错
    #[arg(short = 'd', long, value_name = "D")]
    pub feature_dim: Option<usize>,
    /// GMM 权重之和与 1 的最大误差
    #[arg(long, value_name = "TOL", default_value_t = 1e-3)]
    pub weight_tolerance: f32,
    /// Fisher Vector L2 归一化时使用的 ε
    #[arg(long, value_name = "EPS", default_value_t = 1e-8)]
    pub fv_epsilon: f32,
}

impl GmmOptions {
    pub fn path(&self, conf_dir: &ConfDir) -> PathBuf {
        self.gmm.clone().unwrap_or_else(|| conf_dir.gmm_params())
    }

    pub fn config(&self) -> GmmConfig {
        GmmConfig {
            components: self.components,
            feature_dim: self.feature_dim,
            weight_tolerance: self.weight_tolerance,
        }
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig { epsilon: self.fv_epsilon }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ScoreOptions {
    /// 卡方距离小于该值的两张图片视为重复
    #[arg(short = 't', long, value_name = "DISTANCE", default_value_t = 1.5)]
    pub max_distance: f32,
    /// 设置后，相似度还必须大于该值才视为重复，范围为 (0, 1]
    #[arg(long, value_name = "SCORE")]
    pub min_similarity: Option<f32>,
    /// 卡方距离分母上的 ε
    #[arg(long, value_name = "EPS", default_value_t = 1e-6)]
    pub distance_epsilon: f32,
}

impl From<&ScoreOptions> for ScorerConfig {
    fn from(opts: &ScoreOptions) -> Self {
        Self {
            max_distance: opts.max_distance,
            min_similarity: opts.min_similarity,
            epsilon: opts.distance_epsilon,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct DispatchOptions {
    /// 单张图片编码的超时时间，单位为秒
    #[arg(long, value_name = "SECONDS", default_value = "30", value_parser = parse_timeout)]
    pub timeout: Duration,
}

impl From<&DispatchOptions> for DispatcherConfig {
    fn from(opts: &DispatchOptions) -> Self {
        Self { timeout: opts.timeout }
    }
}

/// 超时时间必须是有限的正数
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let secs = s.parse::<f32>().map_err(|e| e.to_string())?;
    if !secs.is_finite() || secs <= 0. {
        return Err(format!("超时时间必须为正数: {s}"));
    }
    Duration::try_from_secs_f32(secs).map_err(|e| e.to_string())
}

#[derive(Parser, Debug, Clone)]
pub struct ExtractorOptions {
    /// MobileNetV2 ONNX 模型，默认为配置目录下的 mobilenet_v2.onnx
    #[arg(long, value_name = "PATH")]
    pub extractor_model: Option<PathBuf>,
    /// 预处理时短边缩放到的长度
    #[arg(long, value_name = "SIZE", default_value_t = 256)]
    pub resize: u32,
    /// 预处理时中心裁剪的尺寸
    #[arg(long, value_name = "SIZE", default_value_t = 224)]
    pub crop: u32,
}

impl ExtractorOptions {
    pub fn config(&self, conf_dir: &ConfDir) -> ExtractorConfig {
        let model = self.extractor_model.clone().unwrap_or_else(|| conf_dir.extractor_model());
        ExtractorConfig { resize: self.resize, crop: self.crop, ..ExtractorConfig::new(model) }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "fvdedup", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// fvdedup 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 检查 GMM 参数文件
    Inspect(InspectCommand),
    /// 计算一张图片的 Fisher Vector
    Encode(EncodeCommand),
    /// 比较两张图片或两个描述符
    Compare(CompareCommand),
    /// 扫描目录或 tar 归档中的重复图片
    Scan(ScanCommand),
    /// 启动 HTTP 查重服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回 GMM 参数文件的路径
    pub fn gmm_params(&self) -> PathBuf {
        self.path.join("gmm_params.json")
    }

    /// 返回特征提取模型的路径
    pub fn extractor_model(&self) -> PathBuf {
        self.path.join("mobilenet_v2.onnx")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        let opts = Opts::parse_from([
            "fvdedup",
            "-c",
            "/tmp/fv",
            "compare",
            "a.npy",
            "b.npy",
            "-t",
            "0.8",
            "--min-similarity",
            "0.6",
            "--timeout",
            "2.5",
        ]);
        assert_eq!(opts.conf_dir.gmm_params(), PathBuf::from("/tmp/fv/gmm_params.json"));
        let SubCommand::Compare(cmd) = opts.subcmd else {
            panic!("wrong subcommand");
        };
        let scorer = ScorerConfig::from(&cmd.score);
        assert_eq!(scorer.max_distance, 0.8);
        assert_eq!(scorer.min_similarity, Some(0.6));
        assert_eq!(scorer.epsilon, 1e-6);
        assert_eq!(DispatcherConfig::from(&cmd.dispatch).timeout, Duration::from_millis(2500));
        assert_eq!(cmd.gmm.path(&opts.conf_dir), PathBuf::from("/tmp/fv/gmm_params.json"));
    }

    #[test]
    fn test_extractor_defaults() {
        let opts = ExtractorOptions { extractor_model: None, resize: 256, crop: 224 };
        let config = opts.config(&ConfDir::from_str("conf").unwrap());
        assert_eq!(config.model, PathBuf::from("conf/mobilenet_v2.onnx"));
        assert_eq!(config.mean, [0.485, 0.456, 0.406]);
    }

    #[test]
    fn test_invalid_timeout() {
        for value in ["-1", "0", "NaN", "inf", "1e30", "abc"] {
            let result = Opts::try_parse_from([
                "fvdedup",
                "encode",
                "x.npy",
                &format!("--timeout={value}"),
            ]);
            assert!(result.is_err(), "--timeout={value} should be rejected");
        }
    }
}
