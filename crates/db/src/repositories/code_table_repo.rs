//! Repository for the code tables (`regions`, `unit_statuses`, ...).
//!
//! All twelve tables share one shape, so the table name is interpolated
//! from [`CodeTable::table_name`]; it never comes from input.

use sqlx::PgPool;
use statreg_core::reference::CodeTable;
use statreg_core::types::DbId;

use crate::models::code_table::CodeTableRow;

const COLUMNS: &str = "id, code, name, alt_names, is_deleted";

pub struct CodeTableRepo;

impl CodeTableRepo {
    /// Every row, deleted ones included, ordered by id.
    pub async fn list(pool: &PgPool, table: CodeTable) -> Result<Vec<CodeTableRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM {} ORDER BY id", table.table_name());
        sqlx::query_as::<_, CodeTableRow>(&query)
            .fetch_all(pool)
            .await
    }

    pub async fn insert(
        pool: &PgPool,
        table: CodeTable,
        code: &str,
        name: &str,
        alt_names: &[String],
    ) -> Result<DbId, sqlx::Error> {
        let query = format!(
            "INSERT INTO {} (code, name, alt_names) VALUES ($1, $2, $3) RETURNING id",
            table.table_name()
        );
        let (id,): (DbId,) = sqlx::query_as(&query)
            .bind(code)
            .bind(name)
            .bind(alt_names)
            .fetch_one(pool)
            .await?;
        Ok(id)
    }

    /// Soft-delete a row. Deleted rows no longer resolve.
    pub async fn soft_delete(pool: &PgPool, table: CodeTable, id: DbId) -> Result<bool, sqlx::Error> {
        let query = format!(
            "UPDATE {} SET is_deleted = TRUE WHERE id = $1 AND NOT is_deleted",
            table.table_name()
        );
        let result = sqlx::query(&query).bind(id).execute(pool).await?;
        Ok(result.rows_affected() > 0)
    }
}
