//! Persistence and collaborator contracts consumed by the import pipeline.
//!
//! Object-safe `async_trait` interfaces so the pipeline can run against the
//! PostgreSQL store in production and the in-memory store in tests.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::data_source::DataSource;
use crate::error::{IndexError, StoreError};
use crate::history::HistorySnapshot;
use crate::queue::{NewQueueItem, QueueItem, QueueStatus};
use crate::reference::{Activity, ActivityType, Address, CodeRow, CodeTable, Person};
use crate::search::SearchDocument;
use crate::types::{DbId, Timestamp};
use crate::unit::{StatUnit, UnitType};
use crate::upload_log::UploadLogEntry;

// ---------------------------------------------------------------------------
// Register
// ---------------------------------------------------------------------------

/// Read side of the relational register plus the transaction factory.
///
/// Every `find_*` ignores deleted units.
#[async_trait]
pub trait UnitStore: Send + Sync {
    async fn find_by_stat_id(
        &self,
        unit_type: UnitType,
        stat_id: &str,
    ) -> Result<Option<StatUnit>, StoreError>;

    async fn find_by_reg_id(
        &self,
        unit_type: UnitType,
        reg_id: DbId,
    ) -> Result<Option<StatUnit>, StoreError>;

    /// All rows of a code table, including archived ones.
    async fn load_code_table(&self, table: CodeTable) -> Result<Vec<CodeRow>, StoreError>;

    /// Id of a persisted address whose content equals `address`.
    async fn find_address(&self, address: &Address) -> Result<Option<DbId>, StoreError>;

    /// Activity of `unit_reg_id` with the given category and type.
    async fn find_activity(
        &self,
        unit_reg_id: DbId,
        category_id: DbId,
        activity_type: ActivityType,
    ) -> Result<Option<DbId>, StoreError>;

    /// Person matching every identifying field supplied on `person`.
    async fn find_person(&self, person: &Person) -> Result<Option<DbId>, StoreError>;

    /// Live units whose upward link points at the given parent.
    async fn children_of(
        &self,
        parent_type: UnitType,
        parent_reg_id: DbId,
    ) -> Result<Vec<StatUnit>, StoreError>;

    /// Earliest start period across the unit and its history.
    async fn earliest_start_period(
        &self,
        unit_type: UnitType,
        reg_id: DbId,
    ) -> Result<Option<Timestamp>, StoreError>;

    /// Start one all-or-nothing unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitTx>, StoreError>;
}

/// One relational transaction. Dropping without `commit` rolls back.
#[async_trait]
pub trait UnitTx: Send {
    /// Insert (id 0) or update an address; returns its id.
    async fn save_address(&mut self, address: &Address) -> Result<DbId, StoreError>;

    async fn save_activity(&mut self, activity: &Activity) -> Result<DbId, StoreError>;

    async fn save_person(&mut self, person: &Person) -> Result<DbId, StoreError>;

    /// Insert a new unit row; returns the generated RegId. Child ids and the
    /// upward link must already be resolved.
    async fn insert_unit(&mut self, unit: &StatUnit) -> Result<DbId, StoreError>;

    async fn update_unit(&mut self, unit: &StatUnit) -> Result<(), StoreError>;

    /// Overwrite the denormalized history child id list of a unit.
    async fn set_history_child_ids(
        &mut self,
        unit_type: UnitType,
        reg_id: DbId,
        ids: &[DbId],
    ) -> Result<(), StoreError>;

    /// Replace the activity / person / country join rows of a unit.
    async fn replace_unit_links(&mut self, unit: &StatUnit) -> Result<(), StoreError>;

    /// Hard-delete a unit and its join rows.
    async fn delete_unit(&mut self, unit_type: UnitType, reg_id: DbId) -> Result<(), StoreError>;

    /// Insert a history row with its join rows; returns its id.
    async fn insert_history(&mut self, snapshot: &HistorySnapshot) -> Result<DbId, StoreError>;

    /// Add `processed` to a queue item's resume cursor.
    async fn advance_cursor(&mut self, queue_id: DbId, processed: i64) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Queue and upload log
// ---------------------------------------------------------------------------

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(&self, item: &NewQueueItem) -> Result<QueueItem, StoreError>;

    /// Claim the oldest `InQueue` item, stamping it `Loading` at `now`. At
    /// most one caller receives any given item.
    async fn dequeue(&self, now: Timestamp) -> Result<Option<QueueItem>, StoreError>;

    /// Return `Loading` items started before `older_than` to `InQueue`.
    async fn reset_stuck(&self, older_than: Timestamp) -> Result<u64, StoreError>;

    async fn finish(
        &self,
        queue_id: DbId,
        status: QueueStatus,
        note: Option<&str>,
        now: Timestamp,
    ) -> Result<(), StoreError>;

    /// Put a `DataLoadFailed` item back in the queue. Returns `false` when
    /// the item is not in the failed state.
    async fn requeue(&self, queue_id: DbId) -> Result<bool, StoreError>;

    /// Hand a `Loading` item back to the queue without finishing it. Used
    /// on worker shutdown; the resume cursor is kept.
    async fn release(&self, queue_id: DbId) -> Result<(), StoreError>;

    async fn get(&self, queue_id: DbId) -> Result<Option<QueueItem>, StoreError>;

    async fn load_data_source(&self, id: DbId) -> Result<DataSource, StoreError>;
}

#[async_trait]
pub trait UploadLogSink: Send + Sync {
    async fn append(&self, entries: &[UploadLogEntry]) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// External collaborators
// ---------------------------------------------------------------------------

/// Derived, eventually consistent search index.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Reachability check.
    async fn ping(&self) -> Result<(), IndexError>;

    async fn upsert(&self, docs: &[SearchDocument]) -> Result<(), IndexError>;

    async fn delete(&self, ids: &[String]) -> Result<(), IndexError>;
}

/// Regions and activity categories a non-administrator may touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataAccess {
    pub regions: HashSet<DbId>,
    pub activity_categories: HashSet<DbId>,
}

impl DataAccess {
    /// Why a unit with these region and activity category ids is out of
    /// scope, or `None` when it is in scope. A scope without any region
    /// (or category) grants nothing of that kind, even to units without one.
    pub fn denial(&self, region_ids: &[DbId], category_ids: &[DbId]) -> Option<String> {
        if self.regions.is_empty() {
            return Some("User has no rights to any region".into());
        }
        let regions = outside(region_ids, &self.regions);
        if !regions.is_empty() {
            return Some(format!("User has no rights to regions: {regions}"));
        }
        if self.activity_categories.is_empty() {
            return Some("User has no rights to any activity category".into());
        }
        let categories = outside(category_ids, &self.activity_categories);
        if !categories.is_empty() {
            return Some(format!("User has no rights to activity categories: {categories}"));
        }
        None
    }
}

fn outside(ids: &[DbId], allowed: &HashSet<DbId>) -> String {
    let mut out: Vec<DbId> = ids.iter().copied().filter(|id| !allowed.contains(id)).collect();
    out.sort_unstable();
    out.dedup();
    out.iter().map(DbId::to_string).collect::<Vec<_>>().join(", ")
}

/// Per-user writable property sets and data-access scopes.
#[async_trait]
pub trait PermissionService: Send + Sync {
    /// Top-level properties `user_id` may write on units of `unit_type`.
    /// `None` means unrestricted.
    async fn writable_fields(
        &self,
        user_id: &str,
        unit_type: UnitType,
    ) -> Result<Option<HashSet<String>>, StoreError>;

    /// Regions and activity categories `user_id` is limited to. `None`
    /// means an administrator, unrestricted.
    async fn data_access(&self, user_id: &str) -> Result<Option<DataAccess>, StoreError>;
}

/// Permission service that lets everyone write everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl PermissionService for AllowAll {
    async fn writable_fields(
        &self,
        _user_id: &str,
        _unit_type: UnitType,
    ) -> Result<Option<HashSet<String>>, StoreError> {
        Ok(None)
    }

    async fn data_access(&self, _user_id: &str) -> Result<Option<DataAccess>, StoreError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(regions: &[DbId], categories: &[DbId]) -> DataAccess {
        DataAccess {
            regions: regions.iter().copied().collect(),
            activity_categories: categories.iter().copied().collect(),
        }
    }

    #[test]
    fn units_inside_the_scope_pass() {
        assert_eq!(scope(&[5], &[10, 11]).denial(&[5, 5], &[11]), None);
        assert_eq!(scope(&[5], &[10]).denial(&[], &[]), None);
    }

    #[test]
    fn foreign_regions_and_categories_are_named() {
        let s = scope(&[5], &[10]);
        assert_eq!(
            s.denial(&[9, 5, 8], &[10]).as_deref(),
            Some("User has no rights to regions: 8, 9")
        );
        assert_eq!(
            s.denial(&[5], &[12]).as_deref(),
            Some("User has no rights to activity categories: 12")
        );
    }

    #[test]
    fn empty_scope_grants_nothing() {
        assert!(scope(&[], &[10]).denial(&[], &[]).is_some());
        assert!(scope(&[5], &[]).denial(&[5], &[]).is_some());
    }
}
