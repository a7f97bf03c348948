//! Repository for the append-only `upload_logs` table.

use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use statreg_core::types::DbId;
use statreg_core::upload_log::UploadLogEntry;

use crate::models::upload_log::UploadLogRow;

const COLUMNS: &str = "id, data_source_queue_id, target_stat_id, stat_unit_name, \
    serialized_raw_unit, serialized_unit, errors, summary, status_id, \
    start_import_date, end_import_date, note";

/// Rows per INSERT statement; keeps the bind count under the protocol limit.
const CHUNK: usize = 1000;

pub struct UploadLogRepo;

impl UploadLogRepo {
    /// Insert a batch of entries with multi-row INSERTs.
    pub async fn insert_batch(pool: &PgPool, entries: &[UploadLogEntry]) -> Result<(), sqlx::Error> {
        for chunk in entries.chunks(CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO upload_logs (data_source_queue_id, target_stat_id, stat_unit_name, \
                 serialized_raw_unit, serialized_unit, errors, summary, status_id, \
                 start_import_date, end_import_date, note) ",
            );
            builder.push_values(chunk, |mut row, entry| {
                row.push_bind(entry.data_source_queue_id)
                    .push_bind(&entry.target_stat_id)
                    .push_bind(&entry.stat_unit_name)
                    .push_bind(&entry.serialized_raw_unit)
                    .push_bind(&entry.serialized_unit)
                    .push_bind(Json(&entry.errors))
                    .push_bind(Json(&entry.summary))
                    .push_bind(entry.status.id())
                    .push_bind(entry.start_import_date)
                    .push_bind(entry.end_import_date)
                    .push_bind(&entry.note);
            });
            builder.build().execute(pool).await?;
        }
        Ok(())
    }

    pub async fn list_for_queue(pool: &PgPool, queue_id: DbId) -> Result<Vec<UploadLogRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM upload_logs WHERE data_source_queue_id = $1 ORDER BY id");
        sqlx::query_as::<_, UploadLogRow>(&query)
            .bind(queue_id)
            .fetch_all(pool)
            .await
    }
}
