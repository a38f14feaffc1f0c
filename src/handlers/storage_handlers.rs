//! Direct object-store endpoints: upload to temp, streamed retrieval,
//! existence probe, and the temp→permanent commit / temp decline pair.
//! Bodies are streamed out with `ReaderStream` to avoid buffering objects
//! in memory.

use crate::{errors::AppError, services::object_store::Namespace, state::AppState};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileKeyBody {
    pub file_key: String,
}

/// POST `/storage/upload` — store one multipart file in the temp namespace.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart body: {err}")))?
    {
        if field.file_name().is_none() {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let mimetype = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("failed to read file: {err}")))?;

        let receipt = state
            .analysis
            .store
            .upload_temp(bytes, &mimetype, &filename)
            .await?;

        return Ok((
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "data": {
                    "fileKey": receipt.key,
                    "url": receipt.url,
                    "etag": receipt.etag,
                    "sizeBytes": receipt.size_bytes,
                },
            })),
        ));
    }

    Err(AppError::bad_request("No file provided"))
}

/// GET `/storage/retrieve/{key}` — stream an object, permanent namespace
/// first, then temp.
pub async fn retrieve(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let Some(object) = state.analysis.store.retrieve(&key).await? else {
        return Err(AppError::not_found("File not found"));
    };

    let stream = ReaderStream::new(object.file);
    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&object.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&object.size_bytes.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    Ok(response)
}

/// GET `/storage/exists/{key}` — namespace probe without a body transfer.
pub async fn exists(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let namespace = state.analysis.store.exists(&key).await?;
    Ok(Json(json!({
        "exists": namespace.is_some(),
        "location": namespace.map(|ns| match ns {
            Namespace::Uploads => "permanent",
            Namespace::Temp => "temp",
        }),
    })))
}

/// POST `/storage/commit` — promote a temp object to the permanent
/// namespace (copy-then-delete).
pub async fn commit_object(
    State(state): State<AppState>,
    Json(body): Json<FileKeyBody>,
) -> Result<impl IntoResponse, AppError> {
    let permanent_key = state.analysis.store.commit(&body.file_key).await?;
    Ok(Json(json!({
        "success": true,
        "data": { "permanentKey": permanent_key },
    })))
}

/// POST `/storage/decline` — drop a temp object.
pub async fn decline_object(
    State(state): State<AppState>,
    Json(body): Json<FileKeyBody>,
) -> Result<impl IntoResponse, AppError> {
    state.analysis.store.delete_temp(&body.file_key).await?;
    Ok(Json(json!({ "success": true })))
}
