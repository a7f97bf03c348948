//! Request-scoped acting context and pipeline tuning knobs.

use std::time::Duration;

use chrono::Utc;

use crate::types::Timestamp;

/// Who is acting and when. Threaded explicitly into every component that
/// stamps history or log rows.
#[derive(Debug, Clone)]
pub struct ImportContext {
    pub user_id: String,
    pub now: Timestamp,
}

impl ImportContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            now: Utc::now(),
        }
    }

    /// Same user, clock re-read. Called once per record.
    pub fn tick(&self) -> Self {
        Self {
            user_id: self.user_id.clone(),
            now: Utc::now(),
        }
    }
}

/// Pipeline settings. The worker fills these from the environment; tests
/// construct them directly.
#[derive(Debug, Clone)]
pub struct ImportSettings {
    /// Units buffered before a flush is triggered.
    pub bulk_buffer_size: usize,
    /// Upload-log entries buffered before they are written.
    pub log_buffer_size: usize,
    /// Attempts per flush before the batch is reported failed.
    pub flush_max_attempts: u32,
    pub flush_retry_delay: Duration,
    /// Code of the `UnitStatus` row meaning "liquidated".
    pub liquidated_status_code: String,
    /// Loading items older than this are returned to the queue.
    pub stuck_timeout: Duration,
    /// Acting user for queue items uploaded without one.
    pub default_user_id: String,
    /// Search documents held for retry while the index is unreachable.
    pub index_pending_limit: usize,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            bulk_buffer_size: 500,
            log_buffer_size: 200,
            flush_max_attempts: 3,
            flush_retry_delay: Duration::from_millis(500),
            liquidated_status_code: "7".to_string(),
            stuck_timeout: Duration::from_secs(3600),
            default_user_id: "import-service".to_string(),
            index_pending_limit: 10_000,
        }
    }
}
