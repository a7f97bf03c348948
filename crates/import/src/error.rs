//! Record-level vs. job-level failures of the import pipeline.
//!
//! A [`RecordError`] aborts one source record; it is written to the upload
//! log and the queue item ends `DataLoadCompletedPartially`. A [`JobError`]
//! aborts the whole queue item, which ends `DataLoadFailed` and can be
//! re-queued.

use statreg_core::error::{ExtractError, IndexError, MappingError, StoreError};
use statreg_core::upload_log::UploadLogEntry;

/// Failure of a single record.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// A reference could not be resolved.
    #[error("{message}")]
    NotFound { field: String, message: String },

    /// Trust, allowed-operation or permission violation.
    #[error("{0}")]
    Policy(String),

    /// Unexpected persistence failure.
    #[error("Save error: {0}")]
    Save(String),
}

impl RecordError {
    pub fn not_found(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mapping(MappingError::BadValue { .. }) => "bad_value",
            Self::Mapping(_) => "unsupported_property",
            Self::NotFound { .. } => "not_found",
            Self::Policy(_) => "policy",
            Self::Save(_) => "save",
        }
    }

    /// Write the error into a log entry: property errors go to the error
    /// map, the rest to the summary.
    pub fn record_into(&self, entry: &mut UploadLogEntry) {
        match self {
            Self::Mapping(e) => entry.add_error(e.target(), e.to_string()),
            Self::NotFound { field, message } => entry.add_error(field.clone(), message.clone()),
            Self::Policy(_) | Self::Save(_) => entry.fail(self.to_string()),
        }
    }
}

impl From<StoreError> for RecordError {
    fn from(e: StoreError) -> Self {
        Self::Save(e.to_string())
    }
}

/// Failure that aborts a whole queue item.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Parse error: {0}")]
    Parse(#[from] ExtractError),

    #[error("Data source mapping is invalid: {0}")]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Search index unreachable at job start: {0}")]
    IndexUnavailable(#[source] IndexError),
}

/// Either kind of pipeline failure.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Job(#[from] JobError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use statreg_core::upload_log::UploadLogStatus;

    #[test]
    fn mapping_errors_keyed_by_target() {
        let mut entry = UploadLogEntry::new(1, Utc::now());
        RecordError::from(MappingError::UnsupportedProperty("Colour".into())).record_into(&mut entry);
        assert_eq!(entry.status, UploadLogStatus::Error);
        assert!(entry.errors.contains_key("Colour"));
        assert!(entry.summary.is_empty());
    }

    #[test]
    fn policy_errors_go_to_summary() {
        let mut entry = UploadLogEntry::new(1, Utc::now());
        RecordError::Policy("not allowed".into()).record_into(&mut entry);
        assert_eq!(entry.summary, vec!["not allowed".to_string()]);
    }

    #[test]
    fn store_errors_become_save_errors() {
        let e: RecordError = StoreError::Unavailable("down".into()).into();
        assert_eq!(e.kind(), "save");
        assert!(e.to_string().starts_with("Save error"));
    }
}
