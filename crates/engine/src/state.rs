//! Shared application state passed to every handler.

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::engine::WorkflowEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,

    /// Present when the Postgres store is in use.
    pub db: Option<DbPool>,

    pub config: Arc<AppConfig>,

    /// Server start time for uptime calculation
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(engine: Arc<WorkflowEngine>, db: Option<DbPool>, config: AppConfig) -> Self {
        Self {
            engine,
            db,
            config: Arc::new(config),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
