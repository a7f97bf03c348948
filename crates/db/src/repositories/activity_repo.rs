use sqlx::{PgConnection, PgPool};
use statreg_core::reference::{Activity, ActivityType};
use statreg_core::types::DbId;

use crate::models::unit::ActivityRow;

const COLUMNS: &str = "a.id, a.activity_type, a.activity_category_id, a.activity_year, a.employees, a.turnover";

pub struct ActivityRepo;

impl ActivityRepo {
    /// Activities linked to a unit, in link order.
    pub async fn list_for_unit(pool: &PgPool, unit_id: DbId) -> Result<Vec<ActivityRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM activities a \
             JOIN unit_activities ua ON ua.activity_id = a.id \
             WHERE ua.unit_id = $1 \
             ORDER BY a.id"
        );
        sqlx::query_as::<_, ActivityRow>(&query)
            .bind(unit_id)
            .fetch_all(pool)
            .await
    }

    /// The unit's activity with this category and type, if any.
    pub async fn find_for_unit(
        pool: &PgPool,
        unit_id: DbId,
        category_id: DbId,
        activity_type: ActivityType,
    ) -> Result<Option<DbId>, sqlx::Error> {
        let row: Option<(DbId,)> = sqlx::query_as(
            "SELECT a.id FROM activities a \
             JOIN unit_activities ua ON ua.activity_id = a.id \
             WHERE ua.unit_id = $1 AND a.activity_category_id = $2 AND a.activity_type = $3 \
             ORDER BY a.id \
             LIMIT 1",
        )
        .bind(unit_id)
        .bind(category_id)
        .bind(activity_type.id())
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn insert(conn: &mut PgConnection, activity: &Activity) -> Result<DbId, sqlx::Error> {
        let (id,): (DbId,) = sqlx::query_as(
            "INSERT INTO activities \
                 (activity_type, activity_category_id, activity_year, employees, turnover) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id",
        )
        .bind(activity.activity_type.id())
        .bind(activity.category.id)
        .bind(activity.activity_year)
        .bind(activity.employees)
        .bind(activity.turnover)
        .fetch_one(conn)
        .await?;
        Ok(id)
    }

    pub async fn update(conn: &mut PgConnection, activity: &Activity) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE activities \
             SET activity_type = $2, activity_category_id = $3, activity_year = $4, \
                 employees = $5, turnover = $6 \
             WHERE id = $1",
        )
        .bind(activity.id)
        .bind(activity.activity_type.id())
        .bind(activity.category.id)
        .bind(activity.activity_year)
        .bind(activity.employees)
        .bind(activity.turnover)
        .execute(conn)
        .await?;
        Ok(())
    }
}
