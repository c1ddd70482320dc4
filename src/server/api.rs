use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum_auth::AuthBearer;
use axum_typed_multipart::TypedMultipart;
use log::info;

use super::error::{BadRequest, Result, Unauthorized};
use super::state::AppState;
use super::types::*;
use crate::dispatch::EncodeInput;
use crate::scan::ScanInput;
use crate::similarity::{Scorer, ScorerConfig};

fn check_token(state: &AppState, token: &str) -> Result<()> {
    if token != state.token {
        return Err(Unauthorized.into());
    }
    Ok(())
}

/// 在上传的图片中查找重复
#[utoipa::path(
    post,
    path = "/scan",
    request_body(content = ScanForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = ScanResponse),
    ),
    security(("token" = []))
)]
pub async fn scan_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    data: TypedMultipart<ScanRequest>,
) -> Result<Json<ScanResponse>> {
    check_token(&state, &token)?;

    let start = Instant::now();
    let TypedMultipart(ScanRequest { file, max_distance }) = data;
    info!("正在查重 {} 张上传图片", file.len());

    let inputs = file
        .into_iter()
        .enumerate()
        .map(|(i, file)| {
            let name = file.metadata.file_name.unwrap_or_else(|| format!("#{i}"));
            ScanInput::image(name, file.contents.to_vec())
        })
        .collect::<Vec<_>>();

    let report = match max_distance {
        Some(max_distance) => {
            let scorer =
                Scorer::new(ScorerConfig { max_distance, ..state.scanner.scorer().config().clone() });
            state.scanner.scan_report_with(inputs, &scorer).await?
        }
        None => state.scanner.scan_report(inputs).await?,
    };

    Ok(Json(ScanResponse {
        time: start.elapsed().as_millis() as u64,
        encoded: report.encoded,
        matches: report.matches.into_iter().map(Into::into).collect(),
        failures: report.failures.into_iter().map(Into::into).collect(),
    }))
}

/// 比较两张图片
#[utoipa::path(
    post,
    path = "/compare",
    request_body(content = CompareForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = CompareResponse),
    ),
    security(("token" = []))
)]
pub async fn compare_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    data: TypedMultipart<CompareRequest>,
) -> Result<Json<CompareResponse>> {
    check_token(&state, &token)?;

    let [a, b] = <[_; 2]>::try_from(data.0.file)
        .map_err(|files| BadRequest(format!("需要恰好两个文件，收到 {} 个", files.len())))?;

    let start = Instant::now();
    let dispatcher = state.scanner.dispatcher();
    let (a, b) = tokio::try_join!(
        dispatcher.submit(EncodeInput::Image(a.to_vec())),
        dispatcher.submit(EncodeInput::Image(b.to_vec())),
    )?;
    let score = state.scanner.scorer().score(&a, &b)?;

    Ok(Json(CompareResponse::new(start.elapsed().as_millis() as u64, score)))
}
