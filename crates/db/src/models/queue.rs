use sqlx::FromRow;
use statreg_core::queue::{QueueItem, QueueStatus};
use statreg_core::types::{DbId, Timestamp};

use super::{decode_id, RowError};

/// A row from the `data_source_queues` table.
#[derive(Debug, Clone, FromRow)]
pub struct QueueRow {
    pub id: DbId,
    pub data_source_id: DbId,
    pub file_path: String,
    pub file_name: String,
    pub status_id: i16,
    pub start_import_date: Option<Timestamp>,
    pub end_import_date: Option<Timestamp>,
    pub skip_lines_count: i64,
    pub description: Option<String>,
    pub note: Option<String>,
    pub user_id: String,
}

impl TryFrom<QueueRow> for QueueItem {
    type Error = RowError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(QueueItem {
            id: row.id,
            data_source_id: row.data_source_id,
            file_path: row.file_path,
            file_name: row.file_name,
            status: decode_id("queue status", row.status_id, QueueStatus::from_id)?,
            start_import_date: row.start_import_date,
            end_import_date: row.end_import_date,
            skip_lines_count: row.skip_lines_count,
            description: row.description,
            note: row.note,
            user_id: row.user_id,
        })
    }
}
