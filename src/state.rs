//! Shared handler state: the orchestrator plus the history pager, both
//! cheap to clone (handles only, no per-request mutable state).

use crate::services::{analysis_service::AnalysisService, history::HistoryPager};

#[derive(Clone)]
pub struct AppState {
    pub analysis: AnalysisService,
    pub history: HistoryPager,
}
