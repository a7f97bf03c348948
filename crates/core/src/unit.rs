//! The statistical unit: one struct for all four hierarchy levels.
//!
//! Units never hold pointers to each other. Upward links are [`LinkRef`]
//! values that start life as the textual key found in the source file and
//! end up as a RegId once resolved (or a pending handle while the parent is
//! still sitting unsaved in the bulk buffer).

use serde::{Deserialize, Serialize};

use crate::history::ChangeReason;
use crate::reference::{non_blank, Activity, Address, CodeRef, Person};
use crate::types::{Date, DbId, Timestamp};

// ---------------------------------------------------------------------------
// Unit type
// ---------------------------------------------------------------------------

/// Hierarchy level. Discriminants match the `unit_types` seed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UnitType {
    LocalUnit = 1,
    LegalUnit = 2,
    EnterpriseUnit = 3,
    EnterpriseGroup = 4,
}

impl UnitType {
    /// Parent-before-child order used when persisting a batch.
    pub const FLUSH_ORDER: [UnitType; 4] = [
        Self::EnterpriseGroup,
        Self::EnterpriseUnit,
        Self::LegalUnit,
        Self::LocalUnit,
    ];

    pub fn id(self) -> i16 {
        self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Self::LocalUnit),
            2 => Some(Self::LegalUnit),
            3 => Some(Self::EnterpriseUnit),
            4 => Some(Self::EnterpriseGroup),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalUnit => "LocalUnit",
            Self::LegalUnit => "LegalUnit",
            Self::EnterpriseUnit => "EnterpriseUnit",
            Self::EnterpriseGroup => "EnterpriseGroup",
        }
    }

    /// Parse a unit type name. Also used to recognize unit elements in XML.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "LocalUnit" => Some(Self::LocalUnit),
            "LegalUnit" => Some(Self::LegalUnit),
            "EnterpriseUnit" => Some(Self::EnterpriseUnit),
            "EnterpriseGroup" => Some(Self::EnterpriseGroup),
            _ => None,
        }
    }

    /// The level directly above, if any.
    pub fn parent(self) -> Option<UnitType> {
        match self {
            Self::LocalUnit => Some(Self::LegalUnit),
            Self::LegalUnit => Some(Self::EnterpriseUnit),
            Self::EnterpriseUnit => Some(Self::EnterpriseGroup),
            Self::EnterpriseGroup => None,
        }
    }

    /// Groups carry no activities, persons or foreign-participation lists.
    pub fn has_children_lists(self) -> bool {
        !matches!(self, Self::EnterpriseGroup)
    }

    /// Search-index type segment.
    pub fn index_name(self) -> &'static str {
        match self {
            Self::LocalUnit => "local_unit",
            Self::LegalUnit => "legal_unit",
            Self::EnterpriseUnit => "enterprise_unit",
            Self::EnterpriseGroup => "enterprise_group",
        }
    }
}

impl std::fmt::Display for UnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// Handle of a unit that is buffered but not yet persisted.
pub type PendingId = u32;

/// An upward reference to another unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkRef {
    /// StatId-or-RegId text as supplied by the source file.
    Key(String),
    /// Resolved to a persisted unit.
    RegId(DbId),
    /// Points at a unit in the same bulk buffer that has no RegId yet.
    Pending(PendingId),
}

impl LinkRef {
    pub fn reg_id(&self) -> Option<DbId> {
        match self {
            Self::RegId(id) => Some(*id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit
// ---------------------------------------------------------------------------

/// A statistical unit at any hierarchy level.
///
/// Type-specific fields (`market`, `commercial`, the hierarchy links and the
/// history id lists) are simply left empty on levels that do not use them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatUnit {
    /// Generated identity; `0` until persisted.
    pub reg_id: DbId,
    pub unit_type: UnitType,
    pub stat_id: Option<String>,
    pub stat_id_date: Option<Date>,
    pub name: Option<String>,
    pub short_name: Option<String>,
    pub tax_reg_id: Option<String>,
    pub tax_reg_date: Option<Date>,
    pub external_id: Option<String>,
    pub external_id_type: Option<i32>,
    pub external_id_date: Option<Date>,
    pub registration_date: Option<Date>,
    pub registration_reason: CodeRef,
    pub contact_person: Option<String>,
    pub telephone_no: Option<String>,
    pub email_address: Option<String>,
    pub web_address: Option<String>,
    pub employees: Option<i32>,
    pub employees_year: Option<i32>,
    pub employees_date: Option<Date>,
    pub turnover: Option<f64>,
    pub turnover_year: Option<i32>,
    pub turnover_date: Option<Date>,
    pub num_of_people_emp: Option<i32>,
    pub status_date: Option<Date>,
    pub notes: Option<String>,
    pub free_econ_zone: bool,
    pub classified: Option<bool>,
    pub reorg_type: CodeRef,
    pub reorg_date: Option<Date>,
    pub reorg_references: Option<i32>,
    pub suspension_start: Option<Date>,
    pub suspension_end: Option<Date>,
    /// Name of the data source that last wrote the unit.
    pub data_source: Option<String>,
    pub data_source_classification: CodeRef,
    pub size: CodeRef,
    pub unit_status: CodeRef,
    pub legal_form: CodeRef,
    pub inst_sector_code: CodeRef,
    pub foreign_participation: CodeRef,
    pub foreign_participation_country: CodeRef,
    pub foreign_participation_countries: Vec<CodeRef>,
    pub address: Option<Address>,
    pub actual_address: Option<Address>,
    pub postal_address: Option<Address>,
    pub activities: Vec<Activity>,
    pub persons: Vec<Person>,
    pub liq_date: Option<Date>,
    pub liq_reason: Option<String>,
    /// Legal units only.
    pub market: Option<bool>,
    /// Enterprise units only.
    pub commercial: Option<bool>,

    /// LocalUnit → LegalUnit.
    pub legal_unit: Option<LinkRef>,
    /// LegalUnit → EnterpriseUnit.
    pub enterprise_unit: Option<LinkRef>,
    /// EnterpriseUnit → EnterpriseGroup.
    pub ent_group: Option<LinkRef>,

    /// Denormalized child RegIds: locals on a legal unit, legals on an
    /// enterprise, enterprises on a group.
    pub history_child_ids: Vec<DbId>,

    pub start_period: Timestamp,
    pub is_deleted: bool,
    pub user_id: Option<String>,
    pub change_reason: ChangeReason,
    pub edit_comment: Option<String>,
}

impl StatUnit {
    /// A blank unit of the given type, stamped at `now`.
    pub fn new(unit_type: UnitType, now: Timestamp) -> Self {
        Self {
            reg_id: 0,
            unit_type,
            stat_id: None,
            stat_id_date: None,
            name: None,
            short_name: None,
            tax_reg_id: None,
            tax_reg_date: None,
            external_id: None,
            external_id_type: None,
            external_id_date: None,
            registration_date: None,
            registration_reason: CodeRef::default(),
            contact_person: None,
            telephone_no: None,
            email_address: None,
            web_address: None,
            employees: None,
            employees_year: None,
            employees_date: None,
            turnover: None,
            turnover_year: None,
            turnover_date: None,
            num_of_people_emp: None,
            status_date: None,
            notes: None,
            free_econ_zone: false,
            classified: None,
            reorg_type: CodeRef::default(),
            reorg_date: None,
            reorg_references: None,
            suspension_start: None,
            suspension_end: None,
            data_source: None,
            data_source_classification: CodeRef::default(),
            size: CodeRef::default(),
            unit_status: CodeRef::default(),
            legal_form: CodeRef::default(),
            inst_sector_code: CodeRef::default(),
            foreign_participation: CodeRef::default(),
            foreign_participation_country: CodeRef::default(),
            foreign_participation_countries: Vec::new(),
            address: None,
            actual_address: None,
            postal_address: None,
            activities: Vec::new(),
            persons: Vec::new(),
            liq_date: None,
            liq_reason: None,
            market: None,
            commercial: None,
            legal_unit: None,
            enterprise_unit: None,
            ent_group: None,
            history_child_ids: Vec::new(),
            start_period: now,
            is_deleted: false,
            user_id: None,
            change_reason: ChangeReason::Create,
            edit_comment: None,
        }
    }

    pub fn is_new(&self) -> bool {
        self.reg_id == 0
    }

    pub fn stat_id(&self) -> Option<&str> {
        non_blank(&self.stat_id)
    }

    /// Whether the unit carries the resolved "liquidated" status row.
    pub fn is_liquidated(&self, liquidated: &CodeRef) -> bool {
        liquidated.id > 0 && self.unit_status.id == liquidated.id
    }

    /// Upward link of this unit, whichever level it is.
    pub fn parent_link(&self) -> Option<&LinkRef> {
        crate::links::upward_link(self.unit_type).and_then(|spec| spec.get(self))
    }

    pub fn set_parent_link(&mut self, link: Option<LinkRef>) {
        if let Some(spec) = crate::links::upward_link(self.unit_type) {
            match link {
                Some(l) => spec.create(self, l),
                None => spec.delete(self),
            }
        }
    }

    /// Activity ids, sorted. New (id 0) activities are included so that an
    /// added activity always counts as a change.
    pub fn activity_ids(&self) -> Vec<DbId> {
        let mut ids: Vec<DbId> = self.activities.iter().map(|a| a.id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn person_ids(&self) -> Vec<DbId> {
        let mut ids: Vec<DbId> = self.persons.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids
    }

    /// Compare every attribute that a history snapshot records, ignoring
    /// identity, audit stamps and child *contents* (children compare by id).
    pub fn same_state(&self, other: &StatUnit) -> bool {
        let strip = |u: &StatUnit| {
            let mut u = u.clone();
            u.reg_id = 0;
            u.start_period = Timestamp::default();
            u.user_id = None;
            u.change_reason = ChangeReason::Create;
            u.edit_comment = None;
            u.history_child_ids.clear();
            u.activities.clear();
            u.persons.clear();
            for r in u.code_refs_mut() {
                r.code = None;
                r.name = None;
            }
            for a in [&mut u.address, &mut u.actual_address, &mut u.postal_address]
                .into_iter()
                .flatten()
            {
                a.region.code = None;
                a.region.name = None;
            }
            for c in &mut u.foreign_participation_countries {
                c.code = None;
                c.name = None;
            }
            u
        };
        strip(self) == strip(other)
            && self.activity_ids() == other.activity_ids()
            && self.person_ids() == other.person_ids()
    }

    /// Every single-valued code-table reference on the unit.
    pub fn code_refs_mut(&mut self) -> [&mut CodeRef; 9] {
        [
            &mut self.registration_reason,
            &mut self.reorg_type,
            &mut self.data_source_classification,
            &mut self.size,
            &mut self.unit_status,
            &mut self.legal_form,
            &mut self.inst_sector_code,
            &mut self.foreign_participation,
            &mut self.foreign_participation_country,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn flush_order_is_parent_first() {
        for pair in UnitType::FLUSH_ORDER.windows(2) {
            assert_eq!(pair[1].parent(), Some(pair[0]));
        }
    }

    #[test]
    fn unit_type_names_round_trip() {
        for t in UnitType::FLUSH_ORDER {
            assert_eq!(UnitType::from_str(t.as_str()), Some(t));
            assert_eq!(UnitType::from_id(t.id()), Some(t));
        }
        assert_eq!(UnitType::from_str("Activity"), None);
    }

    #[test]
    fn parent_link_follows_type() {
        let mut legal = StatUnit::new(UnitType::LegalUnit, Utc::now());
        legal.set_parent_link(Some(LinkRef::RegId(9)));
        assert_eq!(legal.enterprise_unit, Some(LinkRef::RegId(9)));
        assert_eq!(legal.parent_link().and_then(LinkRef::reg_id), Some(9));

        let mut group = StatUnit::new(UnitType::EnterpriseGroup, Utc::now());
        group.set_parent_link(Some(LinkRef::RegId(1)));
        assert!(group.parent_link().is_none());
    }

    #[test]
    fn same_state_ignores_audit_and_labels() {
        let now = Utc::now();
        let mut a = StatUnit::new(UnitType::LegalUnit, now);
        a.name = Some("Acme".into());
        a.legal_form = CodeRef {
            id: 3,
            code: Some("LLC".into()),
            name: None,
        };
        let mut b = a.clone();
        b.reg_id = 17;
        b.user_id = Some("someone".into());
        b.legal_form.code = None;
        assert!(a.same_state(&b));

        b.employees = Some(10);
        assert!(!a.same_state(&b));
    }

    #[test]
    fn same_state_compares_child_ids() {
        let now = Utc::now();
        let mut a = StatUnit::new(UnitType::LocalUnit, now);
        a.activities.push(Activity {
            id: 5,
            ..Default::default()
        });
        let mut b = a.clone();
        b.activities[0].employees = Some(3);
        assert!(a.same_state(&b));

        b.activities.push(Activity::default());
        assert!(!a.same_state(&b));
    }
}
