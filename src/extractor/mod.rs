#[cfg(feature = "opencv")]
mod mobilenet;

use std::path::PathBuf;
use std::sync::Arc;

#[cfg(feature = "opencv")]
pub use mobilenet::*;

use crate::error::{FvError, Result};

/// MobileNetV2 去掉分类头后的输出维数
pub const MOBILENET_FEATURE_DIM: usize = 1280;

/// 图片 -> 定长特征向量
///
/// 实现只在工作线程中被创建和使用，所以不要求 `Send`。
pub trait FeatureExtractor {
    /// 输出特征维数
    fn dim(&self) -> usize;

    /// 从编码后的图片数据（jpg/png 等）中提取特征
    fn extract(&mut self, image: &[u8]) -> Result<Vec<f32>>;
}

/// 在工作线程中构建特征提取器
pub type ExtractorFactory = Arc<dyn Fn() -> Result<Box<dyn FeatureExtractor>> + Send + Sync>;

/// 基于 ONNX 模型的特征提取器配置
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// ONNX 模型路径
    pub model: PathBuf,
    /// 缩放后短边长度
    pub resize: u32,
    /// 中心裁剪尺寸
    pub crop: u32,
    /// 每个通道的均值，RGB 顺序
    pub mean: [f32; 3],
    /// 每个通道的标准差，RGB 顺序
    pub std: [f32; 3],
}

impl ExtractorConfig {
    pub fn new(model: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            resize: 256,
            crop: 224,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

/// 根据配置创建特征提取器的工厂
#[cfg(feature = "opencv")]
pub fn extractor_factory(config: ExtractorConfig) -> Result<ExtractorFactory> {
    if !config.model.exists() {
        return Err(FvError::Extraction(format!("模型文件不存在: {}", config.model.display())));
    }
    Ok(Arc::new(move || {
        let extractor = MobileNetExtractor::open(config.clone())?;
        Ok(Box::new(extractor) as Box<dyn FeatureExtractor>)
    }))
}

#[cfg(not(feature = "opencv"))]
pub fn extractor_factory(config: ExtractorConfig) -> Result<ExtractorFactory> {
    Err(FvError::Extraction(format!(
        "未启用 opencv 特性，无法加载 {}",
        config.model.display()
    )))
}

/// 把任意函数包装为特征提取器，主要用于测试和外部集成
pub struct FnExtractor<F> {
    dim: usize,
    f: F,
}

impl<F> FnExtractor<F>
where
    F: FnMut(&[u8]) -> Result<Vec<f32>>,
{
    pub fn new(dim: usize, f: F) -> Self {
        Self { dim, f }
    }
}

impl<F> FeatureExtractor for FnExtractor<F>
where
    F: FnMut(&[u8]) -> Result<Vec<f32>>,
{
    fn dim(&self) -> usize {
        self.dim
    }

    fn extract(&mut self, image: &[u8]) -> Result<Vec<f32>> {
        let feature = (self.f)(image)?;
        if feature.len() != self.dim {
            return Err(FvError::DimensionMismatch { expected: self.dim, actual: feature.len() });
        }
        Ok(feature)
    }
}
