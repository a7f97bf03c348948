//! Search-index document derived from a persisted unit.

use serde::Serialize;

use crate::reference::{ActivityType, Address};
use crate::types::{Date, DbId, Timestamp};
use crate::unit::{StatUnit, UnitType};

/// Document id in the index: `{unit_type}-{reg_id}`.
pub fn document_id(unit_type: UnitType, reg_id: DbId) -> String {
    format!("{}-{}", unit_type.index_name(), reg_id)
}

/// Flat projection of a unit, as stored in the search index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchDocument {
    #[serde(skip)]
    pub id: String,
    pub reg_id: DbId,
    pub unit_type: UnitType,
    pub stat_id: Option<String>,
    pub name: Option<String>,
    pub short_name: Option<String>,
    pub tax_reg_id: Option<String>,
    pub external_id: Option<String>,
    pub address_part1: Option<String>,
    pub address_part2: Option<String>,
    pub address_part3: Option<String>,
    pub region_id: Option<DbId>,
    pub legal_form_id: Option<DbId>,
    pub sector_code_id: Option<DbId>,
    pub unit_status_id: Option<DbId>,
    pub primary_activity_category_id: Option<DbId>,
    pub employees: Option<i32>,
    pub turnover: Option<f64>,
    pub liq_date: Option<Date>,
    pub parent_reg_id: Option<DbId>,
    pub is_deleted: bool,
    pub start_period: Timestamp,
}

fn id_of(id: DbId) -> Option<DbId> {
    (id > 0).then_some(id)
}

impl SearchDocument {
    /// Project a persisted unit. Callers must pass units with a RegId.
    pub fn from_unit(unit: &StatUnit) -> Self {
        let address: Option<&Address> = unit.address.as_ref().or(unit.actual_address.as_ref());
        let primary = unit
            .activities
            .iter()
            .find(|a| a.activity_type == ActivityType::Primary);
        Self {
            id: document_id(unit.unit_type, unit.reg_id),
            reg_id: unit.reg_id,
            unit_type: unit.unit_type,
            stat_id: unit.stat_id.clone(),
            name: unit.name.clone(),
            short_name: unit.short_name.clone(),
            tax_reg_id: unit.tax_reg_id.clone(),
            external_id: unit.external_id.clone(),
            address_part1: address.and_then(|a| a.address_part1.clone()),
            address_part2: address.and_then(|a| a.address_part2.clone()),
            address_part3: address.and_then(|a| a.address_part3.clone()),
            region_id: address.and_then(|a| id_of(a.region.id)),
            legal_form_id: id_of(unit.legal_form.id),
            sector_code_id: id_of(unit.inst_sector_code.id),
            unit_status_id: id_of(unit.unit_status.id),
            primary_activity_category_id: primary.and_then(|a| id_of(a.category.id)),
            employees: unit.employees,
            turnover: unit.turnover,
            liq_date: unit.liq_date,
            parent_reg_id: unit.parent_link().and_then(|l| l.reg_id()),
            is_deleted: unit.is_deleted,
            start_period: unit.start_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{Activity, CodeRef};
    use crate::unit::LinkRef;
    use chrono::Utc;

    #[test]
    fn document_id_format() {
        assert_eq!(document_id(UnitType::LegalUnit, 42), "legal_unit-42");
    }

    #[test]
    fn projects_primary_activity_and_parent() {
        let mut u = StatUnit::new(UnitType::LocalUnit, Utc::now());
        u.reg_id = 8;
        u.legal_unit = Some(LinkRef::RegId(3));
        u.activities.push(Activity {
            id: 1,
            activity_type: ActivityType::Secondary,
            category: CodeRef {
                id: 11,
                ..Default::default()
            },
            ..Default::default()
        });
        u.activities.push(Activity {
            id: 2,
            activity_type: ActivityType::Primary,
            category: CodeRef {
                id: 12,
                ..Default::default()
            },
            ..Default::default()
        });
        let doc = SearchDocument::from_unit(&u);
        assert_eq!(doc.id, "local_unit-8");
        assert_eq!(doc.primary_activity_category_id, Some(12));
        assert_eq!(doc.parent_reg_id, Some(3));
        assert_eq!(doc.legal_form_id, None);
    }
}
