pub mod analysis_handlers;
pub mod health_handlers;
pub mod storage_handlers;
