pub mod analysis_service;
pub mod history;
pub mod object_store;
pub mod provider;
pub mod transcoder;
