use sqlx::PgPool;
use statreg_core::types::DbId;
use statreg_core::unit::UnitType;

/// Per-user writable fields and data-access scope. A user with no rows for
/// a unit type is unrestricted on it; a user with no scope rows at all is
/// an administrator.
pub struct PermissionRepo;

impl PermissionRepo {
    pub async fn writable_fields(
        pool: &PgPool,
        user_id: &str,
        unit_type: UnitType,
    ) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT field FROM user_field_permissions \
             WHERE user_id = $1 AND unit_type = $2 \
             ORDER BY field",
        )
        .bind(user_id)
        .bind(unit_type.id())
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(field,)| field).collect())
    }

    pub async fn grant(pool: &PgPool, user_id: &str, unit_type: UnitType, fields: &[&str]) -> Result<(), sqlx::Error> {
        for field in fields {
            sqlx::query(
                "INSERT INTO user_field_permissions (user_id, unit_type, field) \
                 VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            )
            .bind(user_id)
            .bind(unit_type.id())
            .bind(field)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    /// Region ids and activity category ids granted to `user_id`.
    pub async fn data_access(pool: &PgPool, user_id: &str) -> Result<(Vec<DbId>, Vec<DbId>), sqlx::Error> {
        let regions: Vec<(DbId,)> = sqlx::query_as(
            "SELECT region_id FROM user_regions WHERE user_id = $1 ORDER BY region_id",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        let categories: Vec<(DbId,)> = sqlx::query_as(
            "SELECT activity_category_id FROM user_activity_categories \
             WHERE user_id = $1 ORDER BY activity_category_id",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        Ok((
            regions.into_iter().map(|(id,)| id).collect(),
            categories.into_iter().map(|(id,)| id).collect(),
        ))
    }

    pub async fn grant_scope(
        pool: &PgPool,
        user_id: &str,
        region_ids: &[DbId],
        activity_category_ids: &[DbId],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO user_regions (user_id, region_id) \
             SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(region_ids)
        .execute(pool)
        .await?;
        sqlx::query(
            "INSERT INTO user_activity_categories (user_id, activity_category_id) \
             SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(activity_category_ids)
        .execute(pool)
        .await?;
        Ok(())
    }
}
