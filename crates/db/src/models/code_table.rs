use sqlx::FromRow;
use statreg_core::reference::CodeRow;
use statreg_core::types::DbId;

/// A row from any of the code tables (`regions`, `unit_statuses`, ...).
#[derive(Debug, Clone, FromRow)]
pub struct CodeTableRow {
    pub id: DbId,
    pub code: String,
    pub name: String,
    pub alt_names: Vec<String>,
    pub is_deleted: bool,
}

impl From<CodeTableRow> for CodeRow {
    fn from(row: CodeTableRow) -> Self {
        CodeRow {
            id: row.id,
            code: row.code,
            name: row.name,
            alt_names: row.alt_names,
            is_deleted: row.is_deleted,
        }
    }
}
