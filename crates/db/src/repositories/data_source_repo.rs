use sqlx::PgPool;
use statreg_core::types::DbId;

use crate::models::data_source::{CreateDataSource, DataSourceRow};

const COLUMNS: &str = "id, name, unit_type, priority, allowed_operation, upload_type, \
    csv_delimiter, csv_skip_count, variables_mapping";

pub struct DataSourceRepo;

impl DataSourceRepo {
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<DataSourceRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM data_sources WHERE id = $1");
        sqlx::query_as::<_, DataSourceRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn create(pool: &PgPool, input: &CreateDataSource) -> Result<DataSourceRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO data_sources \
                 (name, unit_type, priority, allowed_operation, upload_type, \
                  csv_delimiter, csv_skip_count, variables_mapping) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DataSourceRow>(&query)
            .bind(&input.name)
            .bind(input.unit_type.id())
            .bind(input.priority.id())
            .bind(input.allowed_operation.id())
            .bind(input.upload_type.id())
            .bind(input.csv_delimiter.to_string())
            .bind(input.csv_skip_count)
            .bind(input.mapping.to_text())
            .fetch_one(pool)
            .await
    }
}
