use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = FvError> = std::result::Result<T, E>;

/// 编码、比较、调度过程中可能出现的错误
///
/// 需要 `Clone`：一次工作线程崩溃会以同一个原因拒绝所有等待中的任务
#[derive(Debug, Clone, Error)]
pub enum FvError {
    /// GMM 参数文件缺失字段、格式错误或形状不一致
    #[error("GMM 参数格式错误: {0}")]
    ModelFormat(String),
    /// 特征向量维数与模型不一致
    #[error("特征维数不匹配: 期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// 两个描述符长度不一致
    #[error("描述符长度不匹配: {left} != {right}")]
    LengthMismatch { left: usize, right: usize },
    /// 数值异常，例如方差不为正
    #[error("数值错误: {0}")]
    Numeric(String),
    /// 特征提取器失败
    #[error("特征提取失败: {0}")]
    Extraction(String),
    /// 任务超时
    #[error("任务 {id} 在 {after:?} 后超时")]
    Timeout { id: u64, after: Duration },
    /// 工作线程崩溃或已关闭
    #[error("工作线程故障: {0}")]
    WorkerFailure(String),
}

/// 错误类别，便于不依赖错误信息文本进行比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ModelFormat,
    DimensionMismatch,
    LengthMismatch,
    Numeric,
    Extraction,
    Timeout,
    WorkerFailure,
}

impl FvError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ModelFormat(_) => ErrorKind::ModelFormat,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            Self::Numeric(_) => ErrorKind::Numeric,
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::WorkerFailure(_) => ErrorKind::WorkerFailure,
        }
    }

    /// 单个输入级别的错误，扫描时只丢弃该输入
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Extraction | ErrorKind::Timeout | ErrorKind::WorkerFailure)
    }
}

impl From<serde_json::Error> for FvError {
    fn from(err: serde_json::Error) -> Self {
        Self::ModelFormat(err.to_string())
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for FvError {
    fn from(err: opencv::Error) -> Self {
        Self::Extraction(err.to_string())
    }
}
