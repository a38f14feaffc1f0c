//! Represents one submitted food image and its analysis lifecycle.

use crate::models::result::AnalysisResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

/// Lifecycle status of an analysis record.
///
/// `Pending → Analyzing → Completed → {Committed | Declined}`, with `Error`
/// reachable from any non-terminal status. `Committed`, `Declined` and
/// `Error` are terminal; a terminal record is never mutated again and
/// re-analysis always goes through a fresh record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum AnalysisStatus {
    Pending,
    Analyzing,
    Completed,
    Committed,
    Declined,
    Error,
}

impl AnalysisStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Declined | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Analyzing => "ANALYZING",
            Self::Completed => "COMPLETED",
            Self::Committed => "COMMITTED",
            Self::Declined => "DECLINED",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One analysis record, the single source of truth for where a submitted
/// image sits in the pipeline.
///
/// The record holds weak references (keys) into the object store; the store
/// gateway exclusively owns object placement and deletion. The nutrition
/// totals are denormalized from `result_payload` for query filtering and are
/// recomputed whenever the payload is written.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    /// Opaque unique identifier, generated at creation, immutable.
    pub id: Uuid,

    /// Identifier of the submitting user; immutable.
    pub owner_id: Uuid,

    pub status: AnalysisStatus,

    /// Key of the original upload in the temp namespace.
    pub raw_object_key: Option<String>,

    /// Key of the compressed copy; set only after compression and its own
    /// upload both succeeded.
    pub compressed_object_key: Option<String>,

    pub meal_title: Option<String>,
    pub meal_description: Option<String>,

    /// Full structured provider output; written atomically with the
    /// transition to `Completed`.
    pub result_payload: Option<Json<AnalysisResult>>,

    pub total_calories: Option<f64>,
    pub total_sugar: Option<f64>,
    pub total_carbs: Option<f64>,
    pub total_protein: Option<f64>,

    pub created_at: DateTime<Utc>,

    /// Set on the `Pending → Analyzing` transition.
    pub analyzed_at: Option<DateTime<Utc>>,

    /// Set on the `Completed → Committed` transition.
    pub committed_at: Option<DateTime<Utc>>,
}
