//! Repository for the `stat_units` table and its link tables.
//!
//! All four hierarchy levels share one table, discriminated by `unit_type`.

use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgConnection, PgPool, Postgres, Row};
use statreg_core::reference::Address;
use statreg_core::types::{DbId, Timestamp};
use statreg_core::unit::{LinkRef, StatUnit, UnitType};

use crate::models::unit::StatUnitRow;

/// Column list for `stat_units` reads.
const COLUMNS: &str = "\
    reg_id, unit_type, stat_id, stat_id_date, name, short_name, tax_reg_id, tax_reg_date, \
    external_id, external_id_type, external_id_date, registration_date, registration_reason_id, \
    contact_person, telephone_no, email_address, web_address, \
    employees, employees_year, employees_date, turnover, turnover_year, turnover_date, \
    num_of_people_emp, status_date, notes, free_econ_zone, classified, \
    reorg_type_id, reorg_date, reorg_references, suspension_start, suspension_end, \
    data_source, data_source_classification_id, size_id, unit_status_id, legal_form_id, \
    inst_sector_code_id, foreign_participation_id, foreign_participation_country_id, \
    address_id, actual_address_id, postal_address_id, liq_date, liq_reason, market, commercial, \
    legal_unit_id, enterprise_unit_id, ent_group_id, history_child_ids, \
    start_period, is_deleted, user_id, change_reason, edit_comment";

/// Columns written on insert and update, in [`bind_unit`] order.
const WRITE_COLUMNS: [&str; 56] = [
    "unit_type",
    "stat_id",
    "stat_id_date",
    "name",
    "short_name",
    "tax_reg_id",
    "tax_reg_date",
    "external_id",
    "external_id_type",
    "external_id_date",
    "registration_date",
    "registration_reason_id",
    "contact_person",
    "telephone_no",
    "email_address",
    "web_address",
    "employees",
    "employees_year",
    "employees_date",
    "turnover",
    "turnover_year",
    "turnover_date",
    "num_of_people_emp",
    "status_date",
    "notes",
    "free_econ_zone",
    "classified",
    "reorg_type_id",
    "reorg_date",
    "reorg_references",
    "suspension_start",
    "suspension_end",
    "data_source",
    "data_source_classification_id",
    "size_id",
    "unit_status_id",
    "legal_form_id",
    "inst_sector_code_id",
    "foreign_participation_id",
    "foreign_participation_country_id",
    "address_id",
    "actual_address_id",
    "postal_address_id",
    "liq_date",
    "liq_reason",
    "market",
    "commercial",
    "legal_unit_id",
    "enterprise_unit_id",
    "ent_group_id",
    "history_child_ids",
    "start_period",
    "is_deleted",
    "user_id",
    "change_reason",
    "edit_comment",
];

/// Link column on a child of `parent_type`.
fn parent_column(parent_type: UnitType) -> Option<&'static str> {
    match parent_type {
        UnitType::LegalUnit => Some("legal_unit_id"),
        UnitType::EnterpriseUnit => Some("enterprise_unit_id"),
        UnitType::EnterpriseGroup => Some("ent_group_id"),
        UnitType::LocalUnit => None,
    }
}

fn persisted(link: &Option<LinkRef>) -> Option<DbId> {
    link.as_ref().and_then(LinkRef::reg_id)
}

fn address_id(address: &Option<Address>) -> Option<DbId> {
    address.as_ref().map(|a| a.id).filter(|id| *id > 0)
}

/// Bind every [`WRITE_COLUMNS`] value of `unit`, in order.
fn bind_unit<'q>(query: Query<'q, Postgres, PgArguments>, unit: &'q StatUnit) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(unit.unit_type.id())
        .bind(&unit.stat_id)
        .bind(unit.stat_id_date)
        .bind(&unit.name)
        .bind(&unit.short_name)
        .bind(&unit.tax_reg_id)
        .bind(unit.tax_reg_date)
        .bind(&unit.external_id)
        .bind(unit.external_id_type)
        .bind(unit.external_id_date)
        .bind(unit.registration_date)
        .bind(unit.registration_reason.id)
        .bind(&unit.contact_person)
        .bind(&unit.telephone_no)
        .bind(&unit.email_address)
        .bind(&unit.web_address)
        .bind(unit.employees)
        .bind(unit.employees_year)
        .bind(unit.employees_date)
        .bind(unit.turnover)
        .bind(unit.turnover_year)
        .bind(unit.turnover_date)
        .bind(unit.num_of_people_emp)
        .bind(unit.status_date)
        .bind(&unit.notes)
        .bind(unit.free_econ_zone)
        .bind(unit.classified)
        .bind(unit.reorg_type.id)
        .bind(unit.reorg_date)
        .bind(unit.reorg_references)
        .bind(unit.suspension_start)
        .bind(unit.suspension_end)
        .bind(&unit.data_source)
        .bind(unit.data_source_classification.id)
        .bind(unit.size.id)
        .bind(unit.unit_status.id)
        .bind(unit.legal_form.id)
        .bind(unit.inst_sector_code.id)
        .bind(unit.foreign_participation.id)
        .bind(unit.foreign_participation_country.id)
        .bind(address_id(&unit.address))
        .bind(address_id(&unit.actual_address))
        .bind(address_id(&unit.postal_address))
        .bind(unit.liq_date)
        .bind(&unit.liq_reason)
        .bind(unit.market)
        .bind(unit.commercial)
        .bind(persisted(&unit.legal_unit))
        .bind(persisted(&unit.enterprise_unit))
        .bind(persisted(&unit.ent_group))
        .bind(&unit.history_child_ids)
        .bind(unit.start_period)
        .bind(unit.is_deleted)
        .bind(&unit.user_id)
        .bind(unit.change_reason.id())
        .bind(&unit.edit_comment)
}

pub struct UnitRepo;

impl UnitRepo {
    /// Live unit of `unit_type` with this StatId.
    pub async fn find_by_stat_id(
        pool: &PgPool,
        unit_type: UnitType,
        stat_id: &str,
    ) -> Result<Option<StatUnitRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM stat_units \
             WHERE unit_type = $1 AND stat_id = $2 AND NOT is_deleted"
        );
        sqlx::query_as::<_, StatUnitRow>(&query)
            .bind(unit_type.id())
            .bind(stat_id)
            .fetch_optional(pool)
            .await
    }

    /// Live unit of `unit_type` with this RegId.
    pub async fn find_by_reg_id(
        pool: &PgPool,
        unit_type: UnitType,
        reg_id: DbId,
    ) -> Result<Option<StatUnitRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM stat_units \
             WHERE unit_type = $1 AND reg_id = $2 AND NOT is_deleted"
        );
        sqlx::query_as::<_, StatUnitRow>(&query)
            .bind(unit_type.id())
            .bind(reg_id)
            .fetch_optional(pool)
            .await
    }

    /// Live units linked directly under a parent. A local unit has none.
    pub async fn list_children(
        pool: &PgPool,
        parent_type: UnitType,
        parent_reg_id: DbId,
    ) -> Result<Vec<StatUnitRow>, sqlx::Error> {
        let Some(column) = parent_column(parent_type) else {
            return Ok(Vec::new());
        };
        let query = format!(
            "SELECT {COLUMNS} FROM stat_units \
             WHERE {column} = $1 AND NOT is_deleted \
             ORDER BY reg_id"
        );
        sqlx::query_as::<_, StatUnitRow>(&query)
            .bind(parent_reg_id)
            .fetch_all(pool)
            .await
    }

    /// Foreign-participation country ids of a unit.
    pub async fn country_ids(pool: &PgPool, unit_id: DbId) -> Result<Vec<DbId>, sqlx::Error> {
        let rows: Vec<(DbId,)> =
            sqlx::query_as("SELECT country_id FROM unit_countries WHERE unit_id = $1 ORDER BY country_id")
                .bind(unit_id)
                .fetch_all(pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Earliest of the unit's own start period and those of its history.
    pub async fn earliest_start_period(
        pool: &PgPool,
        unit_type: UnitType,
        reg_id: DbId,
    ) -> Result<Option<Timestamp>, sqlx::Error> {
        let (earliest,): (Option<Timestamp>,) = sqlx::query_as(
            "SELECT LEAST( \
                 (SELECT start_period FROM stat_units WHERE reg_id = $2 AND unit_type = $1), \
                 (SELECT MIN(start_period) FROM stat_unit_history WHERE parent_id = $2 AND unit_type = $1) \
             )",
        )
        .bind(unit_type.id())
        .bind(reg_id)
        .fetch_one(pool)
        .await?;
        Ok(earliest)
    }

    pub async fn insert(conn: &mut PgConnection, unit: &StatUnit) -> Result<DbId, sqlx::Error> {
        let placeholders: Vec<String> = (1..=WRITE_COLUMNS.len()).map(|i| format!("${i}")).collect();
        let query = format!(
            "INSERT INTO stat_units ({}) VALUES ({}) RETURNING reg_id",
            WRITE_COLUMNS.join(", "),
            placeholders.join(", ")
        );
        let row = bind_unit(sqlx::query(&query), unit).fetch_one(conn).await?;
        row.try_get("reg_id")
    }

    pub async fn update(conn: &mut PgConnection, unit: &StatUnit) -> Result<(), sqlx::Error> {
        let assignments: Vec<String> = WRITE_COLUMNS
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{column} = ${}", i + 2))
            .collect();
        let query = format!(
            "UPDATE stat_units SET {} WHERE reg_id = $1",
            assignments.join(", ")
        );
        let result = bind_unit(sqlx::query(&query).bind(unit.reg_id), unit)
            .execute(conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    pub async fn set_history_child_ids(
        conn: &mut PgConnection,
        unit_type: UnitType,
        reg_id: DbId,
        ids: &[DbId],
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE stat_units SET history_child_ids = $3 WHERE reg_id = $2 AND unit_type = $1")
            .bind(unit_type.id())
            .bind(reg_id)
            .bind(ids)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Replace the activity, person and country link rows of a unit.
    pub async fn replace_links(
        conn: &mut PgConnection,
        unit_id: DbId,
        activity_ids: &[DbId],
        person_ids: &[DbId],
        country_ids: &[DbId],
    ) -> Result<(), sqlx::Error> {
        for table in ["unit_activities", "unit_persons", "unit_countries"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE unit_id = $1"))
                .bind(unit_id)
                .execute(&mut *conn)
                .await?;
        }
        sqlx::query(
            "INSERT INTO unit_activities (unit_id, activity_id) \
             SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
        )
        .bind(unit_id)
        .bind(activity_ids)
        .execute(&mut *conn)
        .await?;
        sqlx::query(
            "INSERT INTO unit_persons (unit_id, person_id) \
             SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
        )
        .bind(unit_id)
        .bind(person_ids)
        .execute(&mut *conn)
        .await?;
        sqlx::query(
            "INSERT INTO unit_countries (unit_id, country_id) \
             SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
        )
        .bind(unit_id)
        .bind(country_ids)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Hard-delete a unit. Its link rows cascade.
    pub async fn delete(conn: &mut PgConnection, unit_type: UnitType, reg_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM stat_units WHERE reg_id = $2 AND unit_type = $1")
            .bind(unit_type.id())
            .bind(reg_id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_and_write_columns_agree() {
        let read: Vec<&str> = COLUMNS.split(',').map(str::trim).collect();
        assert_eq!(read[0], "reg_id");
        assert_eq!(&read[1..], &WRITE_COLUMNS[..]);
    }

    #[test]
    fn only_parents_have_a_link_column() {
        assert_eq!(parent_column(UnitType::LocalUnit), None);
        assert_eq!(parent_column(UnitType::EnterpriseGroup), Some("ent_group_id"));
    }
}
