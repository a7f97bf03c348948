//! Per-record import outcome rows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

/// Outcome of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadLogStatus {
    Done = 1,
    Warning = 2,
    Error = 3,
}

impl UploadLogStatus {
    pub fn id(self) -> i16 {
        self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Self::Done),
            2 => Some(Self::Warning),
            3 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Append-only log row describing what happened to one source record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadLogEntry {
    pub id: DbId,
    pub data_source_queue_id: DbId,
    pub target_stat_id: Option<String>,
    pub stat_unit_name: Option<String>,
    pub serialized_raw_unit: Option<String>,
    pub serialized_unit: Option<String>,
    /// Target property → messages.
    pub errors: BTreeMap<String, Vec<String>>,
    pub summary: Vec<String>,
    pub status: UploadLogStatus,
    pub start_import_date: Timestamp,
    pub end_import_date: Timestamp,
    pub note: Option<String>,
}

impl UploadLogEntry {
    pub fn new(queue_id: DbId, started: Timestamp) -> Self {
        Self {
            id: 0,
            data_source_queue_id: queue_id,
            target_stat_id: None,
            stat_unit_name: None,
            serialized_raw_unit: None,
            serialized_unit: None,
            errors: BTreeMap::new(),
            summary: Vec::new(),
            status: UploadLogStatus::Done,
            start_import_date: started,
            end_import_date: started,
            note: None,
        }
    }

    /// Record an error against a property and mark the entry failed.
    pub fn add_error(&mut self, property: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(property.into())
            .or_default()
            .push(message.into());
        self.status = UploadLogStatus::Error;
    }

    /// Record a summary line and mark the entry failed.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.summary.push(message.into());
        self.status = UploadLogStatus::Error;
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.summary.push(message.into());
        if self.status == UploadLogStatus::Done {
            self.status = UploadLogStatus::Warning;
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == UploadLogStatus::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn warning_does_not_mask_error() {
        let mut e = UploadLogEntry::new(1, Utc::now());
        e.add_error("Name", "required");
        e.warn("search index unavailable");
        assert_eq!(e.status, UploadLogStatus::Error);
        assert_eq!(e.errors["Name"], vec!["required".to_string()]);
    }

    #[test]
    fn warning_upgrades_done() {
        let mut e = UploadLogEntry::new(1, Utc::now());
        e.warn("no changes");
        assert_eq!(e.status, UploadLogStatus::Warning);
        assert!(!e.is_error());
    }
}
