//! Row structs and their conversions to the core domain types.
//!
//! Each submodule contains a `FromRow` struct matching the database row and
//! the conversion into (or out of) the matching `statreg-core` type. Enum
//! columns are SMALLINT ids; unknown ids surface as decode errors.

pub mod code_table;
pub mod data_source;
pub mod history;
pub mod queue;
pub mod unit;
pub mod upload_log;

use statreg_core::reference::CodeRef;
use statreg_core::types::DbId;

/// A column held a value the domain cannot represent.
#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("unknown {kind} id {id}")]
    UnknownId { kind: &'static str, id: i16 },

    #[error("invalid {column}: {reason}")]
    Invalid { column: &'static str, reason: String },
}

impl From<RowError> for sqlx::Error {
    fn from(e: RowError) -> Self {
        sqlx::Error::Decode(Box::new(e))
    }
}

/// Map a SMALLINT id through an enum's `from_id`.
pub(crate) fn decode_id<T>(kind: &'static str, id: i16, from_id: fn(i16) -> Option<T>) -> Result<T, RowError> {
    from_id(id).ok_or(RowError::UnknownId { kind, id })
}

/// A resolved code reference known only by id. `0` is the empty reference.
pub(crate) fn code_ref(id: Option<DbId>) -> CodeRef {
    CodeRef {
        id: id.unwrap_or(0),
        ..CodeRef::default()
    }
}

/// `None` for the empty reference.
pub(crate) fn ref_id(r: &CodeRef) -> Option<DbId> {
    (r.id > 0).then_some(r.id)
}
