//! Repository for `stat_unit_history` and its join tables. History rows are
//! insert-only.

use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use statreg_core::history::HistorySnapshot;
use statreg_core::types::DbId;
use statreg_core::unit::UnitType;

use crate::models::history::HistoryRow;

const COLUMNS: &str = "id, parent_id, unit_type, state, start_period, end_period, \
    change_reason, edit_comment, user_id";

pub struct HistoryRepo;

impl HistoryRepo {
    /// Insert a snapshot together with its activity, person and country rows.
    pub async fn insert(conn: &mut PgConnection, snapshot: &HistorySnapshot) -> Result<DbId, sqlx::Error> {
        let state = &snapshot.state;
        let (id,): (DbId,) = sqlx::query_as(
            "INSERT INTO stat_unit_history \
                 (parent_id, unit_type, state, start_period, end_period, change_reason, edit_comment, user_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(snapshot.parent_id)
        .bind(state.unit_type.id())
        .bind(Json(state))
        .bind(snapshot.start_period)
        .bind(snapshot.end_period)
        .bind(snapshot.change_reason.id())
        .bind(&snapshot.edit_comment)
        .bind(&snapshot.user_id)
        .fetch_one(&mut *conn)
        .await?;

        let country_ids: Vec<DbId> = state
            .foreign_participation_countries
            .iter()
            .map(|c| c.id)
            .filter(|id| *id > 0)
            .collect();
        let joins: [(&str, &str, Vec<DbId>); 3] = [
            ("history_activities", "activity_id", state.activity_ids()),
            ("history_persons", "person_id", state.person_ids()),
            ("history_countries", "country_id", country_ids),
        ];
        for (table, column, ids) in joins {
            if ids.is_empty() {
                continue;
            }
            sqlx::query(&format!(
                "INSERT INTO {table} (history_id, {column}) \
                 SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING"
            ))
            .bind(id)
            .bind(&ids)
            .execute(&mut *conn)
            .await?;
        }
        Ok(id)
    }

    /// Snapshots of one unit, oldest first.
    pub async fn list_for_unit(
        pool: &PgPool,
        unit_type: UnitType,
        parent_id: DbId,
    ) -> Result<Vec<HistoryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM stat_unit_history \
             WHERE unit_type = $1 AND parent_id = $2 \
             ORDER BY id"
        );
        sqlx::query_as::<_, HistoryRow>(&query)
            .bind(unit_type.id())
            .bind(parent_id)
            .fetch_all(pool)
            .await
    }
}
