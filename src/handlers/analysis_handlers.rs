//! HTTP handlers for the analysis pipeline: analyze, commit, decline,
//! history listing and single-record fetch. Parsing and status mapping live
//! here; all business rules are delegated to `AnalysisService`.

use crate::{
    errors::AppError,
    services::analysis_service::{CommitOverrides, ImageUpload},
    services::history::HistoryFilter,
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitBody {
    pub analysis_id: Uuid,
    #[serde(default)]
    pub overrides: Option<OverridesBody>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OverridesBody {
    pub meal_title: Option<String>,
    pub meal_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclineBody {
    pub analysis_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub filter: Option<String>,
    pub cursor: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Identity of the submitting user.
///
/// Session verification is an upstream concern; this service trusts the
/// `x-user-id` header placed by the auth layer and falls back to the nil
/// UUID for unattributed requests.
fn owner_id(headers: &HeaderMap) -> Uuid {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .unwrap_or(Uuid::nil())
}

/// POST `/ingredients/analyze` — multipart upload of one image plus an
/// optional `prompt` text field. Runs the full pipeline and returns the
/// result for review; nothing is final until commit or decline.
pub async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let started = Instant::now();

    let mut upload: Option<ImageUpload> = None;
    let mut prompt: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart body: {err}")))?
    {
        let name = field.name().map(str::to_string);
        if name.as_deref() == Some("prompt") {
            let text = field
                .text()
                .await
                .map_err(|err| AppError::bad_request(format!("invalid prompt field: {err}")))?;
            if !text.trim().is_empty() {
                prompt = Some(text);
            }
        } else if field.file_name().is_some() {
            let filename = field.file_name().unwrap_or("upload").to_string();
            let mimetype = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|err| AppError::bad_request(format!("failed to read file: {err}")))?;
            upload = Some(ImageUpload {
                bytes,
                mimetype,
                filename,
            });
        }
    }

    let upload = upload.ok_or_else(|| AppError::bad_request("No file provided"))?;
    let outcome = state.analysis.analyze(owner_id(&headers), upload, prompt).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "analysisId": outcome.id,
            "provider": outcome.provider,
            "processingTimeMs": started.elapsed().as_millis() as u64,
            "compressionStats": outcome.compression,
            "analysis": {
                "mealTitle": outcome.result.meal_title,
                "mealDescription": outcome.result.meal_description,
                "ingredients": outcome.result.ingredients,
                "nutritionFacts": outcome.result.nutrition_facts,
                "allergens": outcome.result.allergens,
                "healthFlags": outcome.result.health_flags,
                "confidence": outcome.result.confidence,
            },
            "message": "Analysis complete. Review and commit or decline.",
        })),
    ))
}

/// POST `/ingredients/commit` — persist a reviewed analysis.
pub async fn commit(
    State(state): State<AppState>,
    Json(body): Json<CommitBody>,
) -> Result<impl IntoResponse, AppError> {
    let overrides = body.overrides.unwrap_or_default();
    state
        .analysis
        .commit(
            body.analysis_id,
            CommitOverrides {
                meal_title: overrides.meal_title,
                meal_description: overrides.meal_description,
            },
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "analysisId": body.analysis_id,
        "message": "Analysis committed successfully",
    })))
}

/// POST `/ingredients/decline` — discard a pending or completed analysis.
pub async fn decline(
    State(state): State<AppState>,
    Json(body): Json<DeclineBody>,
) -> Result<impl IntoResponse, AppError> {
    state.analysis.decline(body.analysis_id, body.reason).await?;

    Ok(Json(json!({
        "success": true,
        "analysisId": body.analysis_id,
        "message": "Analysis declined and temp files deleted",
    })))
}

/// GET `/ingredients/history?filter=&cursor=&limit=` — keyset-paginated
/// committed analyses, newest first.
pub async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = HistoryFilter::parse(query.filter.as_deref());
    let page = state
        .history
        .list(owner_id(&headers), filter, query.cursor, query.limit)
        .await
        .map_err(|err| AppError::internal(format!("Failed to fetch analysis history: {err}")))?;

    Ok(Json(json!({
        "success": true,
        "data": page.items,
        "pagination": {
            // Serialized at full precision; a truncated cursor would make the
            // strict `committed_at < cursor` bound skip same-millisecond rows.
            "nextCursor": page.next_cursor,
            "hasMore": page.has_more,
        },
    })))
}

/// GET `/ingredients/analysis/{id}` — full record fetch.
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.analysis.get(id).await?;
    Ok(Json(json!({
        "success": true,
        "analysis": record,
    })))
}
