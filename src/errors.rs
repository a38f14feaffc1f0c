use crate::services::analysis_service::AnalysisError;
use crate::services::object_store::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::fmt;

/// A lightweight wrapper for handler errors that keeps the message local.
///
/// `detail` entries are merged into the JSON body next to `error` and
/// `status`, for responses that carry more than a message (e.g. the
/// detected content of a non-food image).
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub detail: Option<Value>,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            detail: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "status": self.status.as_u16()
        });
        if let (Some(obj), Some(Value::Object(extra))) = (body.as_object_mut(), self.detail) {
            for (key, value) in extra {
                obj.insert(key, value);
            }
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TempNotFound(_) => AppError::not_found(err.to_string()),
            StoreError::InvalidKey => AppError::bad_request(err.to_string()),
            StoreError::Io(_) => AppError::internal(err.to_string()),
        }
    }
}

/// Maps the pipeline's error taxonomy onto HTTP statuses: validation and
/// non-food are the caller's problem (4xx), provider/storage/database
/// failures are ours (5xx).
impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Validation(msg) => AppError::bad_request(msg),
            AnalysisError::NotFound(_) => AppError::not_found("Analysis not found"),
            AnalysisError::InvalidState { .. } => AppError::bad_request(err.to_string()),
            AnalysisError::NonFoodImage { detected_content } => {
                AppError::bad_request("Not a food image").with_detail(json!({
                    "message": "The uploaded image does not appear to contain food.",
                    "detectedContent": detected_content,
                }))
            }
            AnalysisError::Store(StoreError::TempNotFound(key)) => {
                AppError::not_found(format!("object `{key}` not found in temp storage"))
            }
            AnalysisError::Provider(_)
            | AnalysisError::Store(_)
            | AnalysisError::Transcode(_)
            | AnalysisError::Task(_)
            | AnalysisError::Db(_) => AppError::internal("Analysis failed")
                .with_detail(json!({ "message": err.to_string() })),
        }
    }
}
