//! Core data models for the food analysis service.
//!
//! `AnalysisRecord` maps to the `analyses` table via `sqlx::FromRow`;
//! the result types mirror the JSON the vision providers return and
//! serialize naturally via `serde`.

pub mod analysis;
pub mod result;
