//! Statistical unit rows and their shared child rows.

use sqlx::FromRow;
use statreg_core::history::ChangeReason;
use statreg_core::reference::{Activity, ActivityType, Address, CodeRef, Person};
use statreg_core::types::{Date, DbId, Timestamp};
use statreg_core::unit::{LinkRef, StatUnit, UnitType};

use super::{code_ref, decode_id, RowError};

// ---------------------------------------------------------------------------
// Child rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, FromRow)]
pub struct AddressRow {
    pub id: DbId,
    pub address_part1: Option<String>,
    pub address_part2: Option<String>,
    pub address_part3: Option<String>,
    pub region_id: Option<DbId>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl From<AddressRow> for Address {
    fn from(row: AddressRow) -> Self {
        Address {
            id: row.id,
            address_part1: row.address_part1,
            address_part2: row.address_part2,
            address_part3: row.address_part3,
            region: code_ref(row.region_id),
            latitude: row.latitude,
            longitude: row.longitude,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ActivityRow {
    pub id: DbId,
    pub activity_type: i16,
    pub activity_category_id: DbId,
    pub activity_year: Option<i32>,
    pub employees: Option<i32>,
    pub turnover: Option<f64>,
}

impl TryFrom<ActivityRow> for Activity {
    type Error = RowError;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        Ok(Activity {
            id: row.id,
            activity_type: decode_id("activity type", row.activity_type, ActivityType::from_id)?,
            category: code_ref(Some(row.activity_category_id)),
            activity_year: row.activity_year,
            employees: row.employees,
            turnover: row.turnover,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PersonRow {
    pub id: DbId,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub middle_name: Option<String>,
    pub personal_id: Option<String>,
    pub birth_date: Option<Date>,
    pub sex: Option<i16>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub nationality_id: Option<DbId>,
    pub role_id: Option<DbId>,
}

impl From<PersonRow> for Person {
    fn from(row: PersonRow) -> Self {
        Person {
            id: row.id,
            given_name: row.given_name,
            surname: row.surname,
            middle_name: row.middle_name,
            personal_id: row.personal_id,
            birth_date: row.birth_date,
            sex: row.sex,
            phone_number: row.phone_number,
            address: row.address,
            nationality: code_ref(row.nationality_id),
            role: code_ref(row.role_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit row
// ---------------------------------------------------------------------------

/// A row from the `stat_units` table. Child rows are loaded separately and
/// attached with [`StatUnitRow::into_unit`].
#[derive(Debug, Clone, FromRow)]
pub struct StatUnitRow {
    pub reg_id: DbId,
    pub unit_type: i16,
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
    pub registration_reason_id: DbId,
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
    pub reorg_type_id: DbId,
    pub reorg_date: Option<Date>,
    pub reorg_references: Option<i32>,
    pub suspension_start: Option<Date>,
    pub suspension_end: Option<Date>,
    pub data_source: Option<String>,
    pub data_source_classification_id: DbId,
    pub size_id: DbId,
    pub unit_status_id: DbId,
    pub legal_form_id: DbId,
    pub inst_sector_code_id: DbId,
    pub foreign_participation_id: DbId,
    pub foreign_participation_country_id: DbId,
    pub address_id: Option<DbId>,
    pub actual_address_id: Option<DbId>,
    pub postal_address_id: Option<DbId>,
    pub liq_date: Option<Date>,
    pub liq_reason: Option<String>,
    pub market: Option<bool>,
    pub commercial: Option<bool>,
    pub legal_unit_id: Option<DbId>,
    pub enterprise_unit_id: Option<DbId>,
    pub ent_group_id: Option<DbId>,
    pub history_child_ids: Vec<DbId>,
    pub start_period: Timestamp,
    pub is_deleted: bool,
    pub user_id: Option<String>,
    pub change_reason: i16,
    pub edit_comment: Option<String>,
}

/// Child rows of one unit, loaded alongside it.
#[derive(Debug, Clone, Default)]
pub struct UnitChildren {
    pub address: Option<Address>,
    pub actual_address: Option<Address>,
    pub postal_address: Option<Address>,
    pub activities: Vec<Activity>,
    pub persons: Vec<Person>,
    pub country_ids: Vec<DbId>,
}

fn link(id: Option<DbId>) -> Option<LinkRef> {
    id.map(LinkRef::RegId)
}

impl StatUnitRow {
    pub fn into_unit(self, children: UnitChildren) -> Result<StatUnit, RowError> {
        Ok(StatUnit {
            reg_id: self.reg_id,
            unit_type: decode_id("unit type", self.unit_type, UnitType::from_id)?,
            stat_id: self.stat_id,
            stat_id_date: self.stat_id_date,
            name: self.name,
            short_name: self.short_name,
            tax_reg_id: self.tax_reg_id,
            tax_reg_date: self.tax_reg_date,
            external_id: self.external_id,
            external_id_type: self.external_id_type,
            external_id_date: self.external_id_date,
            registration_date: self.registration_date,
            registration_reason: code_ref(Some(self.registration_reason_id)),
            contact_person: self.contact_person,
            telephone_no: self.telephone_no,
            email_address: self.email_address,
            web_address: self.web_address,
            employees: self.employees,
            employees_year: self.employees_year,
            employees_date: self.employees_date,
            turnover: self.turnover,
            turnover_year: self.turnover_year,
            turnover_date: self.turnover_date,
            num_of_people_emp: self.num_of_people_emp,
            status_date: self.status_date,
            notes: self.notes,
            free_econ_zone: self.free_econ_zone,
            classified: self.classified,
            reorg_type: code_ref(Some(self.reorg_type_id)),
            reorg_date: self.reorg_date,
            reorg_references: self.reorg_references,
            suspension_start: self.suspension_start,
            suspension_end: self.suspension_end,
            data_source: self.data_source,
            data_source_classification: code_ref(Some(self.data_source_classification_id)),
            size: code_ref(Some(self.size_id)),
            unit_status: code_ref(Some(self.unit_status_id)),
            legal_form: code_ref(Some(self.legal_form_id)),
            inst_sector_code: code_ref(Some(self.inst_sector_code_id)),
            foreign_participation: code_ref(Some(self.foreign_participation_id)),
            foreign_participation_country: code_ref(Some(self.foreign_participation_country_id)),
            foreign_participation_countries: children
                .country_ids
                .into_iter()
                .map(|id| CodeRef {
                    id,
                    ..CodeRef::default()
                })
                .collect(),
            address: children.address,
            actual_address: children.actual_address,
            postal_address: children.postal_address,
            activities: children.activities,
            persons: children.persons,
            liq_date: self.liq_date,
            liq_reason: self.liq_reason,
            market: self.market,
            commercial: self.commercial,
            legal_unit: link(self.legal_unit_id),
            enterprise_unit: link(self.enterprise_unit_id),
            ent_group: link(self.ent_group_id),
            history_child_ids: self.history_child_ids,
            start_period: self.start_period,
            is_deleted: self.is_deleted,
            user_id: self.user_id,
            change_reason: decode_id("change reason", self.change_reason, ChangeReason::from_id)?,
            edit_comment: self.edit_comment,
        })
    }
}
