//! Nested reference values carried by a statistical unit.
//!
//! Everything here is either a small code-table row (identified by code
//! and/or name) or a shared child row (address, activity, person). The
//! mapping engine creates them as *stubs* with `id == 0`; the resolver and
//! the unit builder later replace stubs with canonical rows.

use serde::{Deserialize, Serialize};

use crate::types::{Date, DbId};

// ---------------------------------------------------------------------------
// Code tables
// ---------------------------------------------------------------------------

/// Every lookup table a unit can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeTable {
    Region,
    Country,
    ActivityCategory,
    LegalForm,
    SectorCode,
    DataSourceClassification,
    UnitSize,
    UnitStatus,
    ReorgType,
    RegistrationReason,
    ForeignParticipation,
    PersonType,
}

impl CodeTable {
    /// Name of the backing database table.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Region => "regions",
            Self::Country => "countries",
            Self::ActivityCategory => "activity_categories",
            Self::LegalForm => "legal_forms",
            Self::SectorCode => "sector_codes",
            Self::DataSourceClassification => "data_source_classifications",
            Self::UnitSize => "unit_sizes",
            Self::UnitStatus => "unit_statuses",
            Self::ReorgType => "reorg_types",
            Self::RegistrationReason => "registration_reasons",
            Self::ForeignParticipation => "foreign_participations",
            Self::PersonType => "person_types",
        }
    }

    /// Human-readable label used in error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Region => "Region",
            Self::Country => "Country",
            Self::ActivityCategory => "Activity category",
            Self::LegalForm => "Legal form",
            Self::SectorCode => "Sector code",
            Self::DataSourceClassification => "Data source classification",
            Self::UnitSize => "Unit size",
            Self::UnitStatus => "Unit status",
            Self::ReorgType => "Reorg type",
            Self::RegistrationReason => "Registration reason",
            Self::ForeignParticipation => "Foreign participation",
            Self::PersonType => "Person type",
        }
    }

    pub const ALL: [CodeTable; 12] = [
        Self::Region,
        Self::Country,
        Self::ActivityCategory,
        Self::LegalForm,
        Self::SectorCode,
        Self::DataSourceClassification,
        Self::UnitSize,
        Self::UnitStatus,
        Self::ReorgType,
        Self::RegistrationReason,
        Self::ForeignParticipation,
        Self::PersonType,
    ];
}

impl std::fmt::Display for CodeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A canonical code-table row as stored in the register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRow {
    pub id: DbId,
    pub code: String,
    pub name: String,
    /// Alternate-language names that also match a supplied name.
    #[serde(default)]
    pub alt_names: Vec<String>,
    pub is_deleted: bool,
}

impl CodeRow {
    /// Collapse the row into a resolved reference.
    pub fn to_ref(&self) -> CodeRef {
        CodeRef {
            id: self.id,
            code: Some(self.code.clone()),
            name: Some(self.name.clone()),
        }
    }
}

/// A reference into a code table: either a resolved row (`id > 0`) or a
/// stub carrying whatever code/name the source file supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRef {
    pub id: DbId,
    pub code: Option<String>,
    pub name: Option<String>,
}

impl CodeRef {
    pub fn by_code(code: impl Into<String>) -> Self {
        Self {
            id: 0,
            code: Some(code.into()),
            name: None,
        }
    }

    pub fn is_stub(&self) -> bool {
        self.id == 0
    }

    /// `true` when the stub carries no distinguishing field at all.
    pub fn is_blank(&self) -> bool {
        non_blank(&self.code).is_none() && non_blank(&self.name).is_none()
    }

    /// Set a sub-field by its mapping name (`Code`, `Name`, `Id`).
    ///
    /// Writing into an already resolved reference turns it back into a stub
    /// so the new value is resolved afresh. Returns `false` when the
    /// sub-field is unknown.
    pub fn set_field(&mut self, field: &str, value: &str) -> bool {
        if !matches!(field, "Code" | "Name" | "Id") {
            return false;
        }
        if self.id > 0 {
            *self = CodeRef::default();
        }
        match field {
            "Code" => self.code = Some(value.to_string()),
            "Name" => self.name = Some(value.to_string()),
            _ => self.id = value.trim().parse().unwrap_or(0),
        }
        true
    }
}

/// Returns the trimmed value if it is present and not blank.
pub fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// Postal/physical address. Shared between units: several units may point
/// at the same address row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: DbId,
    pub address_part1: Option<String>,
    pub address_part2: Option<String>,
    pub address_part3: Option<String>,
    pub region: CodeRef,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Address {
    /// Two addresses describe the same place when every content field
    /// matches. Identity is ignored.
    pub fn same_content(&self, other: &Address) -> bool {
        self.address_part1 == other.address_part1
            && self.address_part2 == other.address_part2
            && self.address_part3 == other.address_part3
            && self.region.id == other.region.id
            && self.latitude == other.latitude
            && self.longitude == other.longitude
    }

    pub fn is_blank(&self) -> bool {
        non_blank(&self.address_part1).is_none()
            && non_blank(&self.address_part2).is_none()
            && non_blank(&self.address_part3).is_none()
            && self.region.is_blank()
            && self.region.id == 0
            && self.latitude.is_none()
            && self.longitude.is_none()
    }
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// Kind of economic activity a unit performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    #[default]
    Primary = 1,
    Secondary = 2,
    Ancillary = 3,
}

impl ActivityType {
    pub fn id(self) -> i16 {
        self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Self::Primary),
            2 => Some(Self::Secondary),
            3 => Some(Self::Ancillary),
            _ => None,
        }
    }

    /// Parse either the numeric id or the variant name.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(id) = value.parse::<i16>() {
            return Self::from_id(id);
        }
        match value.to_ascii_lowercase().as_str() {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            "ancillary" => Some(Self::Ancillary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: DbId,
    pub activity_type: ActivityType,
    pub category: CodeRef,
    pub activity_year: Option<i32>,
    pub employees: Option<i32>,
    pub turnover: Option<f64>,
}

// ---------------------------------------------------------------------------
// Person
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: DbId,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub middle_name: Option<String>,
    pub personal_id: Option<String>,
    pub birth_date: Option<Date>,
    pub sex: Option<i16>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub nationality: CodeRef,
    /// Role of the person within the unit (owner, manager, ...).
    pub role: CodeRef,
}

impl Person {
    pub fn same_content(&self, other: &Person) -> bool {
        self.given_name == other.given_name
            && self.surname == other.surname
            && self.middle_name == other.middle_name
            && self.personal_id == other.personal_id
            && self.birth_date == other.birth_date
            && self.sex == other.sex
            && self.phone_number == other.phone_number
            && self.address == other.address
            && self.nationality.id == other.nationality.id
            && self.role.id == other.role.id
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_stub_detection() {
        assert!(CodeRef::default().is_blank());
        assert!(CodeRef {
            id: 0,
            code: Some("  ".into()),
            name: None
        }
        .is_blank());
        assert!(!CodeRef::by_code("41701").is_blank());
    }

    #[test]
    fn code_ref_set_field() {
        let mut r = CodeRef::default();
        assert!(r.set_field("Code", "7"));
        assert!(r.set_field("Name", "Liquidated"));
        assert!(!r.set_field("Section", "A"));
        assert_eq!(r.code.as_deref(), Some("7"));
        assert_eq!(r.name.as_deref(), Some("Liquidated"));
    }

    #[test]
    fn writing_into_resolved_ref_resets_it() {
        let mut r = CodeRef {
            id: 9,
            code: Some("A".into()),
            name: Some("Alpha".into()),
        };
        assert!(r.set_field("Code", "B"));
        assert_eq!(r, CodeRef::by_code("B"));
    }

    #[test]
    fn activity_type_parse() {
        assert_eq!(ActivityType::parse("1"), Some(ActivityType::Primary));
        assert_eq!(ActivityType::parse("Secondary"), Some(ActivityType::Secondary));
        assert_eq!(ActivityType::parse("9"), None);
    }

    #[test]
    fn address_content_ignores_identity() {
        let a = Address {
            id: 4,
            address_part1: Some("Main st 1".into()),
            ..Default::default()
        };
        let b = Address { id: 0, ..a.clone() };
        assert!(a.same_content(&b));
        assert!(!Address::default().same_content(&a));
    }
}
