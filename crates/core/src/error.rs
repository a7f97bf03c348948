//! Stage error types shared by every crate in the workspace.
//!
//! Each pipeline stage owns one enum. The import crate folds them into a
//! record-level / job-level split; nothing here knows about that split.

use std::error::Error as StdError;

/// Failure to turn a file into raw records. Always aborts the whole job.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Cannot read `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed XML: {0}")]
    Xml(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("No header line containing the delimiter `{0}`")]
    MissingHeader(char),
}

impl From<quick_xml::Error> for ExtractError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Xml(e.to_string())
    }
}

/// Failure to apply a field mapping to one record. Aborts the record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    #[error("Property `{0}` is not supported")]
    UnsupportedProperty(String),

    #[error("Bad value `{value}` for `{target}`: {reason}")]
    BadValue {
        target: String,
        value: String,
        reason: String,
    },

    #[error("Malformed mapping pair `{0}`")]
    MalformedMapping(String),
}

impl MappingError {
    /// Target property the error is about, used as the upload-log key.
    pub fn target(&self) -> &str {
        match self {
            Self::UnsupportedProperty(t) => t,
            Self::BadValue { target, .. } => target,
            Self::MalformedMapping(pair) => pair,
        }
    }
}

/// Failure reported by any persistence contract.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[source] Box<dyn StdError + Send + Sync>),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Wrap a driver error. Used with `map_err` by store implementations.
    pub fn database<E>(e: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Database(Box::new(e))
    }
}

/// Failure talking to the search index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Search index unreachable: {0}")]
    Unreachable(String),

    #[error("Search index rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Search index bulk item failures: {0}")]
    ItemFailures(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_error_target() {
        let e = MappingError::BadValue {
            target: "Employees".into(),
            value: "ten".into(),
            reason: "expected an integer".into(),
        };
        assert_eq!(e.target(), "Employees");
        assert_eq!(
            e.to_string(),
            "Bad value `ten` for `Employees`: expected an integer"
        );
    }

    #[test]
    fn store_error_wraps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let e = StoreError::database(io);
        assert!(e.to_string().contains("boom"));
        assert!(e.source().is_some());
    }
}
