//! Data source configuration: trust, allowed operation and field mapping.

use serde::{Deserialize, Serialize};

use crate::error::MappingError;
use crate::types::DbId;
use crate::unit::UnitType;

// ── Policy enums ─────────────────────────────────────────────────────

/// How much the register trusts a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    NotTrusted = 1,
    Ok = 2,
    Trusted = 3,
}

impl Priority {
    pub fn id(self) -> i16 {
        self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Self::NotTrusted),
            2 => Some(Self::Ok),
            3 => Some(Self::Trusted),
            _ => None,
        }
    }

    /// Only trusted sources may overwrite an existing unit.
    pub fn may_overwrite(self) -> bool {
        matches!(self, Self::Trusted)
    }
}

/// Which branch of the upsert a data source is allowed to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllowedOperation {
    Create = 1,
    Alter = 2,
    CreateAndAlter = 3,
}

impl AllowedOperation {
    pub fn id(self) -> i16 {
        self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Self::Create),
            2 => Some(Self::Alter),
            3 => Some(Self::CreateAndAlter),
            _ => None,
        }
    }

    pub fn allows_create(self) -> bool {
        matches!(self, Self::Create | Self::CreateAndAlter)
    }

    pub fn allows_alter(self) -> bool {
        matches!(self, Self::Alter | Self::CreateAndAlter)
    }
}

/// What a file from this source describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadType {
    StatUnits = 1,
    /// Only the activity lists of existing units are merged.
    Activities = 2,
}

impl UploadType {
    pub fn id(self) -> i16 {
        self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Self::StatUnits),
            2 => Some(Self::Activities),
            _ => None,
        }
    }
}

// ── Field mapping ────────────────────────────────────────────────────

/// One `(source, target)` pair.
///
/// `source` is either a column name, a dotted path into a nested group
/// (`Activities.Activity.CategoryCode`) or a zero-based column index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingPair {
    pub source: String,
    pub target: String,
}

impl MappingPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// First segment of the dotted target path.
    pub fn target_head(&self) -> &str {
        self.target.split('.').next().unwrap_or(&self.target)
    }
}

/// Ordered mapping owned by a data source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub pairs: Vec<MappingPair>,
}

impl FieldMapping {
    pub fn new(pairs: Vec<MappingPair>) -> Self {
        Self { pairs }
    }

    /// Parse the persisted textual form `source-target,source-target`.
    ///
    /// Targets never contain `-`, so each pair is split on its last dash.
    pub fn parse(text: &str) -> Result<Self, MappingError> {
        let mut pairs = Vec::new();
        for chunk in text.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let (source, target) = chunk
                .rsplit_once('-')
                .ok_or_else(|| MappingError::MalformedMapping(chunk.to_string()))?;
            let (source, target) = (source.trim(), target.trim());
            if source.is_empty() || target.is_empty() {
                return Err(MappingError::MalformedMapping(chunk.to_string()));
            }
            pairs.push(MappingPair::new(source, target));
        }
        Ok(Self { pairs })
    }

    /// The persisted textual form.
    pub fn to_text(&self) -> String {
        self.pairs
            .iter()
            .map(|p| format!("{}-{}", p.source, p.target))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Source feeding the `StatId` target, if the mapping has one.
    pub fn stat_id_source(&self) -> Option<&str> {
        self.pairs
            .iter()
            .find(|p| p.target == "StatId")
            .map(|p| p.source.as_str())
    }

    /// Distinct top-level target properties, in mapping order.
    pub fn top_level_targets(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for head in self.pairs.iter().map(MappingPair::target_head) {
            if !out.contains(&head) {
                out.push(head);
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

// ── Data source ──────────────────────────────────────────────────────

/// A configured external data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: DbId,
    pub name: String,
    pub unit_type: UnitType,
    pub priority: Priority,
    pub allowed_operation: AllowedOperation,
    pub upload_type: UploadType,
    pub csv_delimiter: char,
    /// Leading lines skipped before looking for the header.
    pub csv_skip_count: usize,
    pub mapping: FieldMapping,
}
