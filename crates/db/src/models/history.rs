use sqlx::types::Json;
use sqlx::FromRow;
use statreg_core::history::{ChangeReason, HistorySnapshot};
use statreg_core::types::{DbId, Timestamp};
use statreg_core::unit::StatUnit;

use super::{decode_id, RowError};

/// A row from the `stat_unit_history` table. The snapshot state is stored
/// whole as JSONB; its children are also recorded in the `history_*` join
/// tables.
#[derive(Debug, Clone, FromRow)]
pub struct HistoryRow {
    pub id: DbId,
    pub parent_id: DbId,
    pub unit_type: i16,
    pub state: Json<StatUnit>,
    pub start_period: Timestamp,
    pub end_period: Timestamp,
    pub change_reason: i16,
    pub edit_comment: Option<String>,
    pub user_id: String,
}

impl TryFrom<HistoryRow> for HistorySnapshot {
    type Error = RowError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(HistorySnapshot {
            id: row.id,
            parent_id: row.parent_id,
            state: row.state.0,
            start_period: row.start_period,
            end_period: row.end_period,
            change_reason: decode_id("change reason", row.change_reason, ChangeReason::from_id)?,
            edit_comment: row.edit_comment,
            user_id: row.user_id,
        })
    }
}
