use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::error::FvError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// 请求本身有误，例如上传的文件数量不对
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BadRequest(pub String);

/// 鉴权失败
#[derive(Debug, Error)]
#[error("token 无效")]
pub struct Unauthorized;

/// API错误类型
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if self.0.is::<BadRequest>() {
            return StatusCode::BAD_REQUEST;
        }
        if self.0.is::<Unauthorized>() {
            return StatusCode::UNAUTHORIZED;
        }
        match self.0.downcast_ref::<FvError>() {
            Some(e) if e.is_recoverable() => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, axum::Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
