use sqlx::{PgConnection, PgPool};
use statreg_core::reference::Address;
use statreg_core::types::DbId;

use crate::models::ref_id;
use crate::models::unit::AddressRow;

const COLUMNS: &str = "id, address_part1, address_part2, address_part3, region_id, latitude, longitude";

/// Addresses are shared between units; identical content maps to one row.
pub struct AddressRepo;

impl AddressRepo {
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<AddressRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM addresses WHERE id = $1");
        sqlx::query_as::<_, AddressRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lowest-id row whose every content field equals `address`.
    pub async fn find_matching(pool: &PgPool, address: &Address) -> Result<Option<DbId>, sqlx::Error> {
        let row: Option<(DbId,)> = sqlx::query_as(
            "SELECT id FROM addresses \
             WHERE address_part1 IS NOT DISTINCT FROM $1 \
               AND address_part2 IS NOT DISTINCT FROM $2 \
               AND address_part3 IS NOT DISTINCT FROM $3 \
               AND COALESCE(region_id, 0) = $4 \
               AND latitude IS NOT DISTINCT FROM $5 \
               AND longitude IS NOT DISTINCT FROM $6 \
             ORDER BY id \
             LIMIT 1",
        )
        .bind(&address.address_part1)
        .bind(&address.address_part2)
        .bind(&address.address_part3)
        .bind(address.region.id)
        .bind(address.latitude)
        .bind(address.longitude)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn insert(conn: &mut PgConnection, address: &Address) -> Result<DbId, sqlx::Error> {
        let (id,): (DbId,) = sqlx::query_as(
            "INSERT INTO addresses \
                 (address_part1, address_part2, address_part3, region_id, latitude, longitude) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id",
        )
        .bind(&address.address_part1)
        .bind(&address.address_part2)
        .bind(&address.address_part3)
        .bind(ref_id(&address.region))
        .bind(address.latitude)
        .bind(address.longitude)
        .fetch_one(conn)
        .await?;
        Ok(id)
    }

    pub async fn update(conn: &mut PgConnection, address: &Address) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE addresses \
             SET address_part1 = $2, address_part2 = $3, address_part3 = $4, \
                 region_id = $5, latitude = $6, longitude = $7 \
             WHERE id = $1",
        )
        .bind(address.id)
        .bind(&address.address_part1)
        .bind(&address.address_part2)
        .bind(&address.address_part3)
        .bind(ref_id(&address.region))
        .bind(address.latitude)
        .bind(address.longitude)
        .execute(conn)
        .await?;
        Ok(())
    }
}
