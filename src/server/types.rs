use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::Serialize;
use utoipa::ToSchema;

use crate::scan::{MatchRecord, ScanFailure};
use crate::similarity::Score;

/// 查重请求参数
#[derive(TryFromMultipart)]
pub struct ScanRequest {
    pub file: Vec<FieldData<Bytes>>,
    pub max_distance: Option<f32>,
}

/// 查重表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct ScanForm {
    /// 上传的图片文件，可以是多张图片，文件名用于在结果中标识图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 本次请求使用的距离阈值，不填则使用服务端配置
    pub max_distance: Option<f32>,
}

/// 一对重复图片
#[derive(Debug, Serialize, ToSchema)]
pub struct MatchItem {
    pub source: String,
    pub target: String,
    /// 相似度，范围为 (0, 1]
    pub score: f32,
    /// 卡方距离
    pub distance: f32,
}

impl From<MatchRecord> for MatchItem {
    fn from(m: MatchRecord) -> Self {
        Self { source: m.source, target: m.target, score: m.score, distance: m.distance }
    }
}

/// 没能参与比较的图片
#[derive(Debug, Serialize, ToSchema)]
pub struct FailureItem {
    pub file: String,
    pub error: String,
}

impl From<ScanFailure> for FailureItem {
    fn from(f: ScanFailure) -> Self {
        Self { file: f.reference, error: f.error.to_string() }
    }
}

/// 查重响应
#[derive(Debug, Serialize, ToSchema)]
pub struct ScanResponse {
    /// 耗时，单位为毫秒
    pub time: u64,
    /// 成功编码的图片数量
    pub encoded: usize,
    pub matches: Vec<MatchItem>,
    pub failures: Vec<FailureItem>,
}

/// 比较请求参数
#[derive(TryFromMultipart)]
pub struct CompareRequest {
    pub file: Vec<Bytes>,
}

/// 比较表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct CompareForm {
    /// 恰好两张图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 比较响应
#[derive(Debug, Serialize, ToSchema)]
pub struct CompareResponse {
    /// 耗时，单位为毫秒
    pub time: u64,
    pub distance: f32,
    pub similarity: f32,
    pub is_duplicate: bool,
}

impl CompareResponse {
    pub fn new(time: u64, score: Score) -> Self {
        Self {
            time,
            distance: score.distance,
            similarity: score.similarity,
            is_duplicate: score.is_duplicate,
        }
    }
}
