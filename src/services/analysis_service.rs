//! src/services/analysis_service.rs
//!
//! AnalysisService — the state machine that moves a submitted food image
//! through temp storage, compression, inference and final disposition.
//!
//! Lifecycle: `Pending → Analyzing → Completed → {Committed | Declined}`,
//! with `Error` absorbing any failure once a record exists. A record is
//! created the instant the raw upload succeeds; from that point on the
//! pipeline never throws past the record — failures land in `Error` so no
//! record is ever stuck invisibly "in flight". Failures before the record
//! exists (bad input, failed raw upload) are returned directly.
//!
//! Commit and decline are guarded by conditional updates so two concurrent
//! calls for the same record resolve to exactly one success.

use crate::models::analysis::{AnalysisRecord, AnalysisStatus};
use crate::models::result::AnalysisResult;
use crate::services::object_store::{ObjectStore, StoreError};
use crate::services::provider::{
    AnalysisRequest, ProviderError, VisionProvider, sanitize_prompt,
};
use crate::services::transcoder::{self, CompressOptions, TranscodeError};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{0}")]
    Validation(String),
    #[error("analysis `{0}` not found")]
    NotFound(Uuid),
    #[error("cannot {action} analysis with status {status}")]
    InvalidState {
        action: &'static str,
        status: AnalysisStatus,
    },
    #[error("image does not contain food")]
    NonFoodImage { detected_content: Option<String> },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error("compression task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub type AnalysisServiceResult<T> = Result<T, AnalysisError>;

/// Raw multipart upload as received from the client.
#[derive(Clone, Debug)]
pub struct ImageUpload {
    pub bytes: Bytes,
    pub mimetype: String,
    pub filename: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionStats {
    pub original_size: usize,
    pub compressed_size: usize,
    pub ratio: f64,
}

/// What `analyze` hands back to the caller for review.
#[derive(Clone, Debug)]
pub struct AnalyzeOutcome {
    pub id: Uuid,
    pub provider: &'static str,
    pub compression: CompressionStats,
    pub result: AnalysisResult,
}

/// Optional user edits applied on commit.
#[derive(Clone, Debug, Default)]
pub struct CommitOverrides {
    pub meal_title: Option<String>,
    pub meal_description: Option<String>,
}

const RECORD_COLUMNS: &str = "id, owner_id, status, raw_object_key, compressed_object_key, \
     meal_title, meal_description, result_payload, total_calories, total_sugar, \
     total_carbs, total_protein, created_at, analyzed_at, committed_at";

/// Orchestrates the object store, transcoder, vision provider and record
/// store. Stateless beyond its handles; safe to invoke concurrently for
/// different records.
#[derive(Clone)]
pub struct AnalysisService {
    pub db: Arc<SqlitePool>,
    pub store: ObjectStore,
    provider: Arc<dyn VisionProvider>,
}

impl AnalysisService {
    pub fn new(db: Arc<SqlitePool>, store: ObjectStore, provider: Arc<dyn VisionProvider>) -> Self {
        Self {
            db,
            store,
            provider,
        }
    }

    /// Run the full analysis pipeline for one uploaded image.
    ///
    /// Either returns a `Completed` outcome or leaves the record in `Error`;
    /// by the time this returns, the record is never `Pending` or
    /// `Analyzing`.
    pub async fn analyze(
        &self,
        owner_id: Uuid,
        upload: ImageUpload,
        prompt: Option<String>,
    ) -> AnalysisServiceResult<AnalyzeOutcome> {
        if !upload.mimetype.starts_with("image/") {
            return Err(AnalysisError::Validation(
                "invalid file type, only images are accepted".into(),
            ));
        }

        // Raw upload happens before the record exists; its failure is fatal
        // to the request and leaves no trace.
        let raw = self
            .store
            .upload_temp(upload.bytes.clone(), &upload.mimetype, &upload.filename)
            .await?;

        let id = Uuid::new_v4();
        let created_at = Utc::now();
        if let Err(err) = sqlx::query(
            "INSERT INTO analyses (id, owner_id, status, raw_object_key, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(owner_id)
        .bind(AnalysisStatus::Pending)
        .bind(&raw.key)
        .bind(created_at)
        .execute(&*self.db)
        .await
        {
            // No record was created; don't leave the raw object orphaned.
            if let Err(cleanup_err) = self.store.delete_temp(&raw.key).await {
                warn!(key = %raw.key, %cleanup_err, "failed to remove raw upload after insert failure");
            }
            return Err(err.into());
        }

        match self.run_pipeline(id, &upload, prompt).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.mark_error(id).await;
                Err(err)
            }
        }
    }

    /// Everything downstream of record creation. Any `Err` from here moves
    /// the record to `Error`; object keys are retained for diagnosis.
    async fn run_pipeline(
        &self,
        id: Uuid,
        upload: &ImageUpload,
        prompt: Option<String>,
    ) -> AnalysisServiceResult<AnalyzeOutcome> {
        let source = upload.bytes.clone();
        let compressed = tokio::task::spawn_blocking(move || {
            transcoder::compress(&source, &CompressOptions::default())
        })
        .await??;

        info!(
            %id,
            original = compressed.original_size,
            compressed = compressed.compressed_size,
            ratio = compressed.ratio,
            "image compressed"
        );

        let compressed_upload = self
            .store
            .upload_temp(
                Bytes::from(compressed.buffer.clone()),
                "image/jpeg",
                &format!("compressed-{}.jpg", upload.filename),
            )
            .await?;

        let updated = sqlx::query(
            "UPDATE analyses SET compressed_object_key = ?, status = ?, analyzed_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(&compressed_upload.key)
        .bind(AnalysisStatus::Analyzing)
        .bind(Utc::now())
        .bind(id)
        .bind(AnalysisStatus::Pending)
        .execute(&*self.db)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AnalysisError::InvalidState {
                action: "analyze",
                status: self.status_of(id).await?,
            });
        }

        let sanitized_prompt = prompt.as_deref().and_then(sanitize_prompt);
        let result = self
            .provider
            .analyze(AnalysisRequest {
                image: Bytes::from(compressed.buffer.clone()),
                mime_type: "image/jpeg".into(),
                prompt: sanitized_prompt,
            })
            .await?;

        // Non-food short-circuits before anything is marked completed.
        if !result.is_food {
            return Err(AnalysisError::NonFoodImage {
                detected_content: result.detected_content,
            });
        }

        let (calories, sugars, carbs, protein) = result.derived_metrics();
        let completed = sqlx::query(
            "UPDATE analyses SET result_payload = ?, meal_title = ?, meal_description = ?,
                    total_calories = ?, total_sugar = ?, total_carbs = ?, total_protein = ?,
                    status = ?
             WHERE id = ? AND status = ?",
        )
        .bind(sqlx::types::Json(&result))
        .bind(&result.meal_title)
        .bind(&result.meal_description)
        .bind(calories)
        .bind(sugars)
        .bind(carbs)
        .bind(protein)
        .bind(AnalysisStatus::Completed)
        .bind(id)
        .bind(AnalysisStatus::Analyzing)
        .execute(&*self.db)
        .await?;
        // A concurrent decline may have taken the record mid-pipeline; its
        // disposition wins and the result is discarded.
        if completed.rows_affected() == 0 {
            return Err(AnalysisError::InvalidState {
                action: "analyze",
                status: self.status_of(id).await?,
            });
        }

        Ok(AnalyzeOutcome {
            id,
            provider: self.provider.name(),
            compression: CompressionStats {
                original_size: compressed.original_size,
                compressed_size: compressed.compressed_size,
                ratio: compressed.ratio,
            },
            result,
        })
    }

    /// Persist the reviewed analysis.
    ///
    /// The status check and write are a single conditional update, so of two
    /// concurrent commits exactly one succeeds. Temp object cleanup runs
    /// after the transition and never rolls it back.
    pub async fn commit(
        &self,
        id: Uuid,
        overrides: CommitOverrides,
    ) -> AnalysisServiceResult<AnalysisRecord> {
        let updated = sqlx::query(
            "UPDATE analyses SET status = ?, committed_at = ?,
                    meal_title = COALESCE(?, meal_title),
                    meal_description = COALESCE(?, meal_description)
             WHERE id = ? AND status = ?",
        )
        .bind(AnalysisStatus::Committed)
        .bind(Utc::now())
        .bind(&overrides.meal_title)
        .bind(&overrides.meal_description)
        .bind(id)
        .bind(AnalysisStatus::Completed)
        .execute(&*self.db)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(match self.fetch(id).await? {
                None => AnalysisError::NotFound(id),
                Some(record) => AnalysisError::InvalidState {
                    action: "commit",
                    status: record.status,
                },
            });
        }

        let record = self.get(id).await?;
        self.cleanup_temp_objects(&record).await;
        Ok(record)
    }

    /// Discard an analysis from any non-terminal status.
    ///
    /// The optional reason is audit-logged only — it is not persisted and
    /// does not alter behavior.
    pub async fn decline(
        &self,
        id: Uuid,
        reason: Option<String>,
    ) -> AnalysisServiceResult<AnalysisRecord> {
        let updated = sqlx::query(
            "UPDATE analyses SET status = ? WHERE id = ? AND status IN (?, ?, ?)",
        )
        .bind(AnalysisStatus::Declined)
        .bind(id)
        .bind(AnalysisStatus::Pending)
        .bind(AnalysisStatus::Analyzing)
        .bind(AnalysisStatus::Completed)
        .execute(&*self.db)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(match self.fetch(id).await? {
                None => AnalysisError::NotFound(id),
                Some(record) => AnalysisError::InvalidState {
                    action: "decline",
                    status: record.status,
                },
            });
        }

        if let Some(reason) = reason {
            info!(%id, %reason, "analysis declined");
        }

        let record = self.get(id).await?;
        self.cleanup_temp_objects(&record).await;
        Ok(record)
    }

    /// Full record fetch.
    pub async fn get(&self, id: Uuid) -> AnalysisServiceResult<AnalysisRecord> {
        self.fetch(id).await?.ok_or(AnalysisError::NotFound(id))
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<AnalysisRecord>, sqlx::Error> {
        sqlx::query_as::<_, AnalysisRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM analyses WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    async fn status_of(&self, id: Uuid) -> AnalysisServiceResult<AnalysisStatus> {
        Ok(self.get(id).await?.status)
    }

    /// Move a record to `Error` without clobbering a terminal status.
    /// Best-effort: a failed write here is logged, not propagated.
    async fn mark_error(&self, id: Uuid) {
        let result = sqlx::query(
            "UPDATE analyses SET status = ? WHERE id = ? AND status IN (?, ?, ?)",
        )
        .bind(AnalysisStatus::Error)
        .bind(id)
        .bind(AnalysisStatus::Pending)
        .bind(AnalysisStatus::Analyzing)
        .bind(AnalysisStatus::Completed)
        .execute(&*self.db)
        .await;
        if let Err(err) = result {
            error!(%id, %err, "failed to record error status");
        }
    }

    /// Best-effort deletion of both temp objects after a terminal
    /// disposition. Failure is logged and never surfaced: the status
    /// transition has already been applied and stays applied.
    async fn cleanup_temp_objects(&self, record: &AnalysisRecord) {
        let keys = [
            record.raw_object_key.as_deref(),
            record.compressed_object_key.as_deref(),
        ];
        for key in keys.into_iter().flatten() {
            if let Err(err) = self.store.delete_temp(key).await {
                warn!(id = %record.id, key, %err, "failed to delete temp object");
            }
        }
    }
}
