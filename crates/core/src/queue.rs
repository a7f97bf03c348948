//! Data-source queue items and their lifecycle.

use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

/// Queue item state. Discriminants match the `queue_statuses` seed rows.
///
/// ```text
/// InQueue ──dequeue──▶ Loading ──▶ DataLoadCompleted
///    ▲                    │    └──▶ DataLoadCompletedPartially
///    │                    └───────▶ DataLoadFailed
///    └──── stuck sweep / requeue ─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    InQueue = 1,
    Loading = 2,
    DataLoadCompleted = 3,
    DataLoadCompletedPartially = 4,
    DataLoadFailed = 5,
}

impl QueueStatus {
    pub fn id(self) -> i16 {
        self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Self::InQueue),
            2 => Some(Self::Loading),
            3 => Some(Self::DataLoadCompleted),
            4 => Some(Self::DataLoadCompletedPartially),
            5 => Some(Self::DataLoadFailed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InQueue => "in_queue",
            Self::Loading => "loading",
            Self::DataLoadCompleted => "data_load_completed",
            Self::DataLoadCompletedPartially => "data_load_completed_partially",
            Self::DataLoadFailed => "data_load_failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::DataLoadCompleted | Self::DataLoadCompletedPartially | Self::DataLoadFailed
        )
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded file waiting for (or undergoing) import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: DbId,
    pub data_source_id: DbId,
    pub file_path: String,
    pub file_name: String,
    pub status: QueueStatus,
    pub start_import_date: Option<Timestamp>,
    pub end_import_date: Option<Timestamp>,
    /// Resume cursor: records of the source's unit type already processed.
    pub skip_lines_count: i64,
    pub description: Option<String>,
    pub note: Option<String>,
    pub user_id: String,
}

/// Input for adding a file to the queue.
#[derive(Debug, Clone, Deserialize)]
pub struct NewQueueItem {
    pub data_source_id: DbId,
    pub file_path: String,
    pub file_name: String,
    pub description: Option<String>,
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!QueueStatus::InQueue.is_terminal());
        assert!(!QueueStatus::Loading.is_terminal());
        assert!(QueueStatus::DataLoadFailed.is_terminal());
        assert!(QueueStatus::DataLoadCompletedPartially.is_terminal());
    }

    #[test]
    fn status_ids_round_trip() {
        for id in 1..=5 {
            assert_eq!(QueueStatus::from_id(id).map(QueueStatus::id), Some(id));
        }
        assert_eq!(QueueStatus::from_id(6), None);
    }
}
