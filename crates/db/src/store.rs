//! [`PgStore`]: the PostgreSQL implementation of the store contracts.
//!
//! Reads go straight to the pool. A bulk flush runs inside one
//! [`PgUnitTx`], which wraps a `sqlx::Transaction` and rolls back on drop.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use statreg_core::data_source::DataSource;
use statreg_core::error::StoreError;
use statreg_core::history::HistorySnapshot;
use statreg_core::queue::{NewQueueItem, QueueItem, QueueStatus};
use statreg_core::reference::{Activity, ActivityType, Address, CodeRow, CodeTable, Person};
use statreg_core::store::{DataAccess, PermissionService, QueueStore, UnitStore, UnitTx, UploadLogSink};
use statreg_core::types::{DbId, Timestamp};
use statreg_core::unit::{StatUnit, UnitType};
use statreg_core::upload_log::UploadLogEntry;

use crate::models::unit::{StatUnitRow, UnitChildren};
use crate::repositories::{
    ActivityRepo, AddressRepo, CodeTableRepo, DataSourceRepo, HistoryRepo, PermissionRepo, PersonRepo,
    QueueRepo, UnitRepo, UploadLogRepo,
};

/// Map a driver error onto the store error taxonomy.
///
/// - `RowNotFound` becomes `NotFound`.
/// - Unique violations on `uq_` constraints become `Conflict`.
/// - Pool exhaustion and I/O failures become `Unavailable`.
fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound {
            entity: "row",
            key: String::new(),
        },
        sqlx::Error::Database(db_err) => {
            // PostgreSQL unique constraint violation: error code 23505
            if db_err.code().as_deref() == Some("23505") {
                if let Some(constraint) = db_err.constraint().filter(|c| c.starts_with("uq_")) {
                    return StoreError::Conflict(format!(
                        "Duplicate value violates unique constraint: {constraint}"
                    ));
                }
            }
            StoreError::database(sqlx::Error::Database(db_err))
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::database(other),
    }
}

/// Store contracts backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_address(&self, id: Option<DbId>) -> Result<Option<Address>, sqlx::Error> {
        match id {
            Some(id) => Ok(AddressRepo::find_by_id(&self.pool, id).await?.map(Address::from)),
            None => Ok(None),
        }
    }

    /// Attach child rows to a unit row.
    async fn hydrate(&self, row: StatUnitRow) -> Result<StatUnit, StoreError> {
        let address = self.load_address(row.address_id).await.map_err(store_error)?;
        let actual_address = self.load_address(row.actual_address_id).await.map_err(store_error)?;
        let postal_address = self.load_address(row.postal_address_id).await.map_err(store_error)?;
        let activities = ActivityRepo::list_for_unit(&self.pool, row.reg_id)
            .await
            .map_err(store_error)?
            .into_iter()
            .map(Activity::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::database)?;
        let persons = PersonRepo::list_for_unit(&self.pool, row.reg_id)
            .await
            .map_err(store_error)?
            .into_iter()
            .map(Person::from)
            .collect();
        let country_ids = UnitRepo::country_ids(&self.pool, row.reg_id)
            .await
            .map_err(store_error)?;

        row.into_unit(UnitChildren {
            address,
            actual_address,
            postal_address,
            activities,
            persons,
            country_ids,
        })
        .map_err(StoreError::database)
    }

    async fn hydrate_opt(&self, row: Option<StatUnitRow>) -> Result<Option<StatUnit>, StoreError> {
        match row {
            Some(row) => self.hydrate(row).await.map(Some),
            None => Ok(None),
        }
    }

    /// Snapshots of one unit, oldest first.
    pub async fn history_of(&self, unit_type: UnitType, reg_id: DbId) -> Result<Vec<HistorySnapshot>, StoreError> {
        HistoryRepo::list_for_unit(&self.pool, unit_type, reg_id)
            .await
            .map_err(store_error)?
            .into_iter()
            .map(|row| HistorySnapshot::try_from(row).map_err(StoreError::database))
            .collect()
    }

    /// Upload log rows of one queue item, in insertion order.
    pub async fn upload_log(&self, queue_id: DbId) -> Result<Vec<UploadLogEntry>, StoreError> {
        UploadLogRepo::list_for_queue(&self.pool, queue_id)
            .await
            .map_err(store_error)?
            .into_iter()
            .map(|row| UploadLogEntry::try_from(row).map_err(StoreError::database))
            .collect()
    }
}

#[async_trait]
impl UnitStore for PgStore {
    async fn find_by_stat_id(&self, unit_type: UnitType, stat_id: &str) -> Result<Option<StatUnit>, StoreError> {
        let row = UnitRepo::find_by_stat_id(&self.pool, unit_type, stat_id)
            .await
            .map_err(store_error)?;
        self.hydrate_opt(row).await
    }

    async fn find_by_reg_id(&self, unit_type: UnitType, reg_id: DbId) -> Result<Option<StatUnit>, StoreError> {
        let row = UnitRepo::find_by_reg_id(&self.pool, unit_type, reg_id)
            .await
            .map_err(store_error)?;
        self.hydrate_opt(row).await
    }

    async fn load_code_table(&self, table: CodeTable) -> Result<Vec<CodeRow>, StoreError> {
        let rows = CodeTableRepo::list(&self.pool, table).await.map_err(store_error)?;
        Ok(rows.into_iter().map(CodeRow::from).collect())
    }

    async fn find_address(&self, address: &Address) -> Result<Option<DbId>, StoreError> {
        AddressRepo::find_matching(&self.pool, address)
            .await
            .map_err(store_error)
    }

    async fn find_activity(
        &self,
        unit_reg_id: DbId,
        category_id: DbId,
        activity_type: ActivityType,
    ) -> Result<Option<DbId>, StoreError> {
        ActivityRepo::find_for_unit(&self.pool, unit_reg_id, category_id, activity_type)
            .await
            .map_err(store_error)
    }

    async fn find_person(&self, person: &Person) -> Result<Option<DbId>, StoreError> {
        PersonRepo::find_matching(&self.pool, person)
            .await
            .map_err(store_error)
    }

    async fn children_of(&self, parent_type: UnitType, parent_reg_id: DbId) -> Result<Vec<StatUnit>, StoreError> {
        let rows = UnitRepo::list_children(&self.pool, parent_type, parent_reg_id)
            .await
            .map_err(store_error)?;
        let mut units = Vec::with_capacity(rows.len());
        for row in rows {
            units.push(self.hydrate(row).await?);
        }
        Ok(units)
    }

    async fn earliest_start_period(&self, unit_type: UnitType, reg_id: DbId) -> Result<Option<Timestamp>, StoreError> {
        UnitRepo::earliest_start_period(&self.pool, unit_type, reg_id)
            .await
            .map_err(store_error)
    }

    async fn begin(&self) -> Result<Box<dyn UnitTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(store_error)?;
        Ok(Box::new(PgUnitTx { tx }))
    }
}

/// One flush transaction.
pub struct PgUnitTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitTx for PgUnitTx {
    async fn save_address(&mut self, address: &Address) -> Result<DbId, StoreError> {
        if address.id > 0 {
            AddressRepo::update(&mut self.tx, address).await.map_err(store_error)?;
            Ok(address.id)
        } else {
            AddressRepo::insert(&mut self.tx, address).await.map_err(store_error)
        }
    }

    async fn save_activity(&mut self, activity: &Activity) -> Result<DbId, StoreError> {
        if activity.id > 0 {
            ActivityRepo::update(&mut self.tx, activity).await.map_err(store_error)?;
            Ok(activity.id)
        } else {
            ActivityRepo::insert(&mut self.tx, activity).await.map_err(store_error)
        }
    }

    async fn save_person(&mut self, person: &Person) -> Result<DbId, StoreError> {
        if person.id > 0 {
            PersonRepo::update(&mut self.tx, person).await.map_err(store_error)?;
            Ok(person.id)
        } else {
            PersonRepo::insert(&mut self.tx, person).await.map_err(store_error)
        }
    }

    async fn insert_unit(&mut self, unit: &StatUnit) -> Result<DbId, StoreError> {
        UnitRepo::insert(&mut self.tx, unit).await.map_err(store_error)
    }

    async fn update_unit(&mut self, unit: &StatUnit) -> Result<(), StoreError> {
        UnitRepo::update(&mut self.tx, unit).await.map_err(|e| match e {
            sqlx::Error::RowNotFound => StoreError::NotFound {
                entity: "stat unit",
                key: unit.reg_id.to_string(),
            },
            other => store_error(other),
        })
    }

    async fn set_history_child_ids(&mut self, unit_type: UnitType, reg_id: DbId, ids: &[DbId]) -> Result<(), StoreError> {
        UnitRepo::set_history_child_ids(&mut self.tx, unit_type, reg_id, ids)
            .await
            .map_err(store_error)
    }

    async fn replace_unit_links(&mut self, unit: &StatUnit) -> Result<(), StoreError> {
        let country_ids: Vec<DbId> = unit
            .foreign_participation_countries
            .iter()
            .map(|c| c.id)
            .filter(|id| *id > 0)
            .collect();
        UnitRepo::replace_links(
            &mut self.tx,
            unit.reg_id,
            &unit.activity_ids(),
            &unit.person_ids(),
            &country_ids,
        )
        .await
        .map_err(store_error)
    }

    async fn delete_unit(&mut self, unit_type: UnitType, reg_id: DbId) -> Result<(), StoreError> {
        let deleted = UnitRepo::delete(&mut self.tx, unit_type, reg_id)
            .await
            .map_err(store_error)?;
        if !deleted {
            return Err(StoreError::NotFound {
                entity: "stat unit",
                key: reg_id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_history(&mut self, snapshot: &HistorySnapshot) -> Result<DbId, StoreError> {
        HistoryRepo::insert(&mut self.tx, snapshot).await.map_err(store_error)
    }

    async fn advance_cursor(&mut self, queue_id: DbId, processed: i64) -> Result<(), StoreError> {
        QueueRepo::advance_cursor(&mut self.tx, queue_id, processed)
            .await
            .map_err(store_error)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(store_error)
    }
}

fn to_item(row: crate::models::queue::QueueRow) -> Result<QueueItem, StoreError> {
    QueueItem::try_from(row).map_err(StoreError::database)
}

#[async_trait]
impl QueueStore for PgStore {
    async fn enqueue(&self, item: &NewQueueItem) -> Result<QueueItem, StoreError> {
        let row = QueueRepo::enqueue(&self.pool, item).await.map_err(store_error)?;
        to_item(row)
    }

    async fn dequeue(&self, now: Timestamp) -> Result<Option<QueueItem>, StoreError> {
        QueueRepo::claim_next(&self.pool, now)
            .await
            .map_err(store_error)?
            .map(to_item)
            .transpose()
    }

    async fn reset_stuck(&self, older_than: Timestamp) -> Result<u64, StoreError> {
        QueueRepo::reset_stuck(&self.pool, older_than)
            .await
            .map_err(store_error)
    }

    async fn finish(
        &self,
        queue_id: DbId,
        status: QueueStatus,
        note: Option<&str>,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let found = QueueRepo::finish(&self.pool, queue_id, status, note, now)
            .await
            .map_err(store_error)?;
        if !found {
            return Err(StoreError::NotFound {
                entity: "queue item",
                key: queue_id.to_string(),
            });
        }
        Ok(())
    }

    async fn requeue(&self, queue_id: DbId) -> Result<bool, StoreError> {
        QueueRepo::requeue(&self.pool, queue_id).await.map_err(store_error)
    }

    async fn release(&self, queue_id: DbId) -> Result<(), StoreError> {
        let released = QueueRepo::release(&self.pool, queue_id).await.map_err(store_error)?;
        if !released {
            tracing::debug!(queue_id, "Release skipped, item not loading");
        }
        Ok(())
    }

    async fn get(&self, queue_id: DbId) -> Result<Option<QueueItem>, StoreError> {
        QueueRepo::find_by_id(&self.pool, queue_id)
            .await
            .map_err(store_error)?
            .map(to_item)
            .transpose()
    }

    async fn load_data_source(&self, id: DbId) -> Result<DataSource, StoreError> {
        let row = DataSourceRepo::find_by_id(&self.pool, id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "data source",
                key: id.to_string(),
            })?;
        DataSource::try_from(row).map_err(StoreError::database)
    }
}

#[async_trait]
impl UploadLogSink for PgStore {
    async fn append(&self, entries: &[UploadLogEntry]) -> Result<(), StoreError> {
        UploadLogRepo::insert_batch(&self.pool, entries)
            .await
            .map_err(store_error)
    }
}

#[async_trait]
impl PermissionService for PgStore {
    async fn writable_fields(&self, user_id: &str, unit_type: UnitType) -> Result<Option<HashSet<String>>, StoreError> {
        let fields = PermissionRepo::writable_fields(&self.pool, user_id, unit_type)
            .await
            .map_err(store_error)?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(fields.into_iter().collect()))
    }

    async fn data_access(&self, user_id: &str) -> Result<Option<DataAccess>, StoreError> {
        let (regions, activity_categories) = PermissionRepo::data_access(&self.pool, user_id)
            .await
            .map_err(store_error)?;
        if regions.is_empty() && activity_categories.is_empty() {
            return Ok(None);
        }
        Ok(Some(DataAccess {
            regions: regions.into_iter().collect(),
            activity_categories: activity_categories.into_iter().collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(
            store_error(sqlx::Error::RowNotFound),
            StoreError::NotFound { .. }
        ));
    }

    #[test]
    fn pool_timeout_is_unavailable() {
        assert!(matches!(
            store_error(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn protocol_errors_are_database_errors() {
        assert!(matches!(
            store_error(sqlx::Error::Protocol("bad frame".into())),
            StoreError::Database(_)
        ));
    }
}
