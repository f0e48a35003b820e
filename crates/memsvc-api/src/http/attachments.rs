use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use memsvc_core::error::Result;
use memsvc_core::types::Identity;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    /// When set, respond with a 302 to a freshly-minted signed URL instead
    /// of streaming the body directly (spec.md §6: "200 (stream) or 302
    /// (signed URL)" — the caller picks via this flag).
    #[serde(default)]
    pub redirect: bool,
    pub filename: Option<String>,
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response> {
    if query.redirect {
        let filename = query.filename.as_deref().unwrap_or(id.as_str());
        let signed = state.attachments.signed_download_url(&actor, &id, filename).await?;
        let location = format!("/v1/attachments/download/{}/{}", signed.token, signed.filename);
        let mut response = StatusCode::FOUND.into_response();
        response
            .headers_mut()
            .insert(header::LOCATION, HeaderValue::from_str(&location).map_err(|e| {
                memsvc_core::error::MemsvcError::Internal(format!("invalid redirect location: {e}"))
            })?);
        return Ok(response);
    }

    let body = state.attachments.download_stream(&actor, &id).await?;
    let mut response = body.bytes.into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_str(&body.content_type).unwrap_or(HeaderValue::from_static("application/octet-stream")));
    Ok(response)
}

pub async fn resolve_signed_download(
    State(state): State<Arc<AppState>>,
    Path((token, filename)): Path<(String, String)>,
) -> Result<Response> {
    let body = state.attachments.resolve_signed_download(&token, &filename).await?;
    let mut response = body.bytes.into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_str(&body.content_type).unwrap_or(HeaderValue::from_static("application/octet-stream")));
    Ok(response)
}
