//! Repository for the `data_source_queues` table.

use sqlx::{PgConnection, PgPool};
use statreg_core::queue::{NewQueueItem, QueueStatus};
use statreg_core::types::{DbId, Timestamp};

use crate::models::queue::QueueRow;

/// Column list for `data_source_queues` queries.
const COLUMNS: &str = "\
    id, data_source_id, file_path, file_name, status_id, \
    start_import_date, end_import_date, skip_lines_count, \
    description, note, user_id";

pub struct QueueRepo;

impl QueueRepo {
    pub async fn enqueue(pool: &PgPool, item: &NewQueueItem) -> Result<QueueRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO data_source_queues \
                 (data_source_id, file_path, file_name, status_id, description, user_id) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueueRow>(&query)
            .bind(item.data_source_id)
            .bind(&item.file_path)
            .bind(&item.file_name)
            .bind(QueueStatus::InQueue.id())
            .bind(&item.description)
            .bind(&item.user_id)
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the oldest queued item and mark it `Loading`.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent workers never
    /// claim the same item.
    pub async fn claim_next(pool: &PgPool, now: Timestamp) -> Result<Option<QueueRow>, sqlx::Error> {
        let query = format!(
            "UPDATE data_source_queues \
             SET status_id = $1, start_import_date = $2 \
             WHERE id = ( \
                 SELECT id FROM data_source_queues \
                 WHERE status_id = $3 \
                 ORDER BY id \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueueRow>(&query)
            .bind(QueueStatus::Loading.id())
            .bind(now)
            .bind(QueueStatus::InQueue.id())
            .fetch_optional(pool)
            .await
    }

    /// Return items `Loading` since before `older_than` to the queue.
    pub async fn reset_stuck(pool: &PgPool, older_than: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE data_source_queues SET status_id = $1 \
             WHERE status_id = $2 \
               AND (start_import_date IS NULL OR start_import_date < $3)",
        )
        .bind(QueueStatus::InQueue.id())
        .bind(QueueStatus::Loading.id())
        .bind(older_than)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn finish(
        pool: &PgPool,
        queue_id: DbId,
        status: QueueStatus,
        note: Option<&str>,
        now: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE data_source_queues \
             SET status_id = $2, note = $3, end_import_date = $4 \
             WHERE id = $1",
        )
        .bind(queue_id)
        .bind(status.id())
        .bind(note)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Put a failed item back in the queue. The resume cursor is kept.
    pub async fn requeue(pool: &PgPool, queue_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE data_source_queues SET status_id = $2, note = NULL \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(queue_id)
        .bind(QueueStatus::InQueue.id())
        .bind(QueueStatus::DataLoadFailed.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Hand a `Loading` item back without finishing it.
    pub async fn release(pool: &PgPool, queue_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE data_source_queues SET status_id = $2 \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(queue_id)
        .bind(QueueStatus::InQueue.id())
        .bind(QueueStatus::Loading.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(pool: &PgPool, queue_id: DbId) -> Result<Option<QueueRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM data_source_queues WHERE id = $1");
        sqlx::query_as::<_, QueueRow>(&query)
            .bind(queue_id)
            .fetch_optional(pool)
            .await
    }

    /// Move the resume cursor forward. Runs inside the flush transaction.
    pub async fn advance_cursor(conn: &mut PgConnection, queue_id: DbId, processed: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE data_source_queues SET skip_lines_count = skip_lines_count + $2 WHERE id = $1")
            .bind(queue_id)
            .bind(processed)
            .execute(conn)
            .await?;
        Ok(())
    }
}
