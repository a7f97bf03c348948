use std::collections::BTreeMap;

use sqlx::types::Json;
use sqlx::FromRow;
use statreg_core::types::{DbId, Timestamp};
use statreg_core::upload_log::{UploadLogEntry, UploadLogStatus};

use super::{decode_id, RowError};

/// A row from the `upload_logs` table.
#[derive(Debug, Clone, FromRow)]
pub struct UploadLogRow {
    pub id: DbId,
    pub data_source_queue_id: DbId,
    pub target_stat_id: Option<String>,
    pub stat_unit_name: Option<String>,
    pub serialized_raw_unit: Option<String>,
    pub serialized_unit: Option<String>,
    pub errors: Json<BTreeMap<String, Vec<String>>>,
    pub summary: Json<Vec<String>>,
    pub status_id: i16,
    pub start_import_date: Timestamp,
    pub end_import_date: Timestamp,
    pub note: Option<String>,
}

impl TryFrom<UploadLogRow> for UploadLogEntry {
    type Error = RowError;

    fn try_from(row: UploadLogRow) -> Result<Self, Self::Error> {
        Ok(UploadLogEntry {
            id: row.id,
            data_source_queue_id: row.data_source_queue_id,
            target_stat_id: row.target_stat_id,
            stat_unit_name: row.stat_unit_name,
            serialized_raw_unit: row.serialized_raw_unit,
            serialized_unit: row.serialized_unit,
            errors: row.errors.0,
            summary: row.summary.0,
            status: decode_id("upload log status", row.status_id, UploadLogStatus::from_id)?,
            start_import_date: row.start_import_date,
            end_import_date: row.end_import_date,
            note: row.note,
        })
    }
}
