//! In-memory implementations of every store contract.
//!
//! Units live in an arena keyed by RegId with a secondary StatId index.
//! A transaction works on a copy of the register and swaps it in on
//! commit, so a failed or dropped transaction leaves nothing behind.
//! Used by the pipeline tests and handy for dry runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use statreg_core::data_source::DataSource;
use statreg_core::error::{IndexError, StoreError};
use statreg_core::history::HistorySnapshot;
use statreg_core::queue::{NewQueueItem, QueueItem, QueueStatus};
use statreg_core::reference::{Activity, ActivityType, Address, CodeRow, CodeTable, Person};
use statreg_core::search::SearchDocument;
use statreg_core::store::{
    DataAccess, PermissionService, QueueStore, SearchIndex, UnitStore, UnitTx, UploadLogSink,
};
use statreg_core::types::{DbId, Timestamp};
use statreg_core::unit::{LinkRef, StatUnit, UnitType};
use statreg_core::upload_log::UploadLogEntry;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Register state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Register {
    units: BTreeMap<DbId, StatUnit>,
    stat_ids: HashMap<(UnitType, String), DbId>,
    addresses: BTreeMap<DbId, Address>,
    activities: BTreeMap<DbId, Activity>,
    persons: BTreeMap<DbId, Person>,
    history: Vec<HistorySnapshot>,
    next_id: DbId,
}

impl Register {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn index_stat_id(&mut self, unit: &StatUnit) {
        self.stat_ids.retain(|_, id| *id != unit.reg_id);
        if let Some(stat_id) = unit.stat_id() {
            self.stat_ids
                .insert((unit.unit_type, stat_id.to_string()), unit.reg_id);
        }
    }

    /// Live unit with its shared children refreshed from their tables.
    fn live(&self, unit_type: UnitType, reg_id: DbId) -> Option<StatUnit> {
        let mut unit = self
            .units
            .get(&reg_id)
            .filter(|u| u.unit_type == unit_type && !u.is_deleted)?
            .clone();
        for address in [&mut unit.address, &mut unit.actual_address, &mut unit.postal_address]
            .into_iter()
            .flatten()
        {
            if let Some(row) = self.addresses.get(&address.id) {
                *address = row.clone();
            }
        }
        for activity in &mut unit.activities {
            if let Some(row) = self.activities.get(&activity.id) {
                *activity = row.clone();
            }
        }
        for person in &mut unit.persons {
            if let Some(row) = self.persons.get(&person.id) {
                *person = row.clone();
            }
        }
        Some(unit)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: BTreeMap<DbId, QueueItem>,
    sources: HashMap<DbId, DataSource>,
    next_id: DbId,
}

#[derive(Debug, Default)]
struct Inner {
    register: Mutex<Register>,
    code_tables: Mutex<HashMap<CodeTable, Vec<CodeRow>>>,
    queue: Mutex<QueueState>,
    log: Mutex<Vec<UploadLogEntry>>,
    failing_commits: AtomicU32,
}

/// Register, queue and upload log in one process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding ─────────────────────────────────────────────────────

    pub fn add_code_rows(&self, table: CodeTable, rows: Vec<CodeRow>) {
        lock(&self.inner.code_tables)
            .entry(table)
            .or_default()
            .extend(rows);
    }

    pub fn add_data_source(&self, source: DataSource) {
        lock(&self.inner.queue).sources.insert(source.id, source);
    }

    /// Persist a unit directly, bypassing the pipeline. Returns its RegId.
    pub fn seed_unit(&self, mut unit: StatUnit) -> DbId {
        let mut register = lock(&self.inner.register);
        unit.reg_id = register.next_id();
        register.index_stat_id(&unit);
        let id = unit.reg_id;
        register.units.insert(id, unit);
        id
    }

    /// Persist a history row directly.
    pub fn seed_history(&self, mut snapshot: HistorySnapshot) -> DbId {
        let mut register = lock(&self.inner.register);
        snapshot.id = register.next_id();
        let id = snapshot.id;
        register.history.push(snapshot);
        id
    }

    /// Make the next `n` commits fail.
    pub fn fail_next_commits(&self, n: u32) {
        self.inner.failing_commits.store(n, Ordering::SeqCst);
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub fn unit(&self, unit_type: UnitType, reg_id: DbId) -> Option<StatUnit> {
        lock(&self.inner.register).live(unit_type, reg_id)
    }

    pub fn unit_by_stat_id(&self, unit_type: UnitType, stat_id: &str) -> Option<StatUnit> {
        let register = lock(&self.inner.register);
        let id = *register.stat_ids.get(&(unit_type, stat_id.to_string()))?;
        register.live(unit_type, id)
    }

    pub fn units_of(&self, unit_type: UnitType) -> Vec<StatUnit> {
        let register = lock(&self.inner.register);
        register
            .units
            .values()
            .filter(|u| u.unit_type == unit_type && !u.is_deleted)
            .filter_map(|u| register.live(unit_type, u.reg_id))
            .collect()
    }

    pub fn history(&self) -> Vec<HistorySnapshot> {
        lock(&self.inner.register).history.clone()
    }

    pub fn history_of(&self, unit_type: UnitType, reg_id: DbId) -> Vec<HistorySnapshot> {
        self.history()
            .into_iter()
            .filter(|h| h.parent_id == reg_id && h.state.unit_type == unit_type)
            .collect()
    }

    pub fn addresses(&self) -> Vec<Address> {
        lock(&self.inner.register).addresses.values().cloned().collect()
    }

    pub fn upload_log(&self) -> Vec<UploadLogEntry> {
        lock(&self.inner.log).clone()
    }
}

// ---------------------------------------------------------------------------
// Register contracts
// ---------------------------------------------------------------------------

fn matches_supplied<T: PartialEq>(supplied: &Option<T>, stored: &Option<T>) -> bool {
    supplied.is_none() || supplied == stored
}

#[async_trait]
impl UnitStore for MemoryStore {
    async fn find_by_stat_id(
        &self,
        unit_type: UnitType,
        stat_id: &str,
    ) -> Result<Option<StatUnit>, StoreError> {
        Ok(self.unit_by_stat_id(unit_type, stat_id))
    }

    async fn find_by_reg_id(
        &self,
        unit_type: UnitType,
        reg_id: DbId,
    ) -> Result<Option<StatUnit>, StoreError> {
        Ok(self.unit(unit_type, reg_id))
    }

    async fn load_code_table(&self, table: CodeTable) -> Result<Vec<CodeRow>, StoreError> {
        Ok(lock(&self.inner.code_tables)
            .get(&table)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_address(&self, address: &Address) -> Result<Option<DbId>, StoreError> {
        Ok(lock(&self.inner.register)
            .addresses
            .values()
            .find(|a| a.same_content(address))
            .map(|a| a.id))
    }

    async fn find_activity(
        &self,
        unit_reg_id: DbId,
        category_id: DbId,
        activity_type: ActivityType,
    ) -> Result<Option<DbId>, StoreError> {
        let register = lock(&self.inner.register);
        Ok(register.units.get(&unit_reg_id).and_then(|u| {
            u.activities
                .iter()
                .filter_map(|a| register.activities.get(&a.id))
                .find(|a| a.category.id == category_id && a.activity_type == activity_type)
                .map(|a| a.id)
        }))
    }

    async fn find_person(&self, person: &Person) -> Result<Option<DbId>, StoreError> {
        if person.given_name.is_none()
            && person.surname.is_none()
            && person.personal_id.is_none()
            && person.birth_date.is_none()
        {
            return Ok(None);
        }
        Ok(lock(&self.inner.register)
            .persons
            .values()
            .find(|p| {
                matches_supplied(&person.given_name, &p.given_name)
                    && matches_supplied(&person.surname, &p.surname)
                    && matches_supplied(&person.personal_id, &p.personal_id)
                    && matches_supplied(&person.birth_date, &p.birth_date)
            })
            .map(|p| p.id))
    }

    async fn children_of(
        &self,
        parent_type: UnitType,
        parent_reg_id: DbId,
    ) -> Result<Vec<StatUnit>, StoreError> {
        let register = lock(&self.inner.register);
        Ok(register
            .units
            .values()
            .filter(|u| u.unit_type.parent() == Some(parent_type) && !u.is_deleted)
            .filter(|u| u.parent_link().and_then(LinkRef::reg_id) == Some(parent_reg_id))
            .filter_map(|u| register.live(u.unit_type, u.reg_id))
            .collect())
    }

    async fn earliest_start_period(
        &self,
        unit_type: UnitType,
        reg_id: DbId,
    ) -> Result<Option<Timestamp>, StoreError> {
        let register = lock(&self.inner.register);
        let own = register
            .units
            .get(&reg_id)
            .filter(|u| u.unit_type == unit_type)
            .map(|u| u.start_period);
        let past = register
            .history
            .iter()
            .filter(|h| h.parent_id == reg_id && h.state.unit_type == unit_type)
            .map(|h| h.start_period);
        Ok(own.into_iter().chain(past).min())
    }

    async fn begin(&self) -> Result<Box<dyn UnitTx>, StoreError> {
        let register = lock(&self.inner.register).clone();
        Ok(Box::new(MemoryTx {
            inner: self.inner.clone(),
            register,
            cursors: Vec::new(),
        }))
    }
}

struct MemoryTx {
    inner: Arc<Inner>,
    register: Register,
    cursors: Vec<(DbId, i64)>,
}

impl MemoryTx {
    fn stored_mut(&mut self, unit_type: UnitType, reg_id: DbId) -> Result<&mut StatUnit, StoreError> {
        self.register
            .units
            .get_mut(&reg_id)
            .filter(|u| u.unit_type == unit_type)
            .ok_or_else(|| StoreError::NotFound {
                entity: "unit",
                key: format!("{unit_type} {reg_id}"),
            })
    }
}

#[async_trait]
impl UnitTx for MemoryTx {
    async fn save_address(&mut self, address: &Address) -> Result<DbId, StoreError> {
        let id = if address.id > 0 { address.id } else { self.register.next_id() };
        self.register
            .addresses
            .insert(id, Address { id, ..address.clone() });
        Ok(id)
    }

    async fn save_activity(&mut self, activity: &Activity) -> Result<DbId, StoreError> {
        let id = if activity.id > 0 { activity.id } else { self.register.next_id() };
        self.register
            .activities
            .insert(id, Activity { id, ..activity.clone() });
        Ok(id)
    }

    async fn save_person(&mut self, person: &Person) -> Result<DbId, StoreError> {
        let id = if person.id > 0 { person.id } else { self.register.next_id() };
        self.register
            .persons
            .insert(id, Person { id, ..person.clone() });
        Ok(id)
    }

    async fn insert_unit(&mut self, unit: &StatUnit) -> Result<DbId, StoreError> {
        if let Some(stat_id) = unit.stat_id() {
            if self.register.stat_ids.contains_key(&(unit.unit_type, stat_id.to_string())) {
                return Err(StoreError::Conflict(format!(
                    "{} with StatId `{stat_id}` already exists",
                    unit.unit_type
                )));
            }
        }
        let id = self.register.next_id();
        let unit = StatUnit {
            reg_id: id,
            ..unit.clone()
        };
        self.register.index_stat_id(&unit);
        self.register.units.insert(id, unit);
        Ok(id)
    }

    async fn update_unit(&mut self, unit: &StatUnit) -> Result<(), StoreError> {
        *self.stored_mut(unit.unit_type, unit.reg_id)? = unit.clone();
        self.register.index_stat_id(unit);
        Ok(())
    }

    async fn set_history_child_ids(
        &mut self,
        unit_type: UnitType,
        reg_id: DbId,
        ids: &[DbId],
    ) -> Result<(), StoreError> {
        self.stored_mut(unit_type, reg_id)?.history_child_ids = ids.to_vec();
        Ok(())
    }

    async fn replace_unit_links(&mut self, unit: &StatUnit) -> Result<(), StoreError> {
        let stored = self.stored_mut(unit.unit_type, unit.reg_id)?;
        stored.activities = unit.activities.clone();
        stored.persons = unit.persons.clone();
        stored.foreign_participation_countries = unit.foreign_participation_countries.clone();
        Ok(())
    }

    async fn delete_unit(&mut self, unit_type: UnitType, reg_id: DbId) -> Result<(), StoreError> {
        self.stored_mut(unit_type, reg_id)?;
        self.register.units.remove(&reg_id);
        self.register.stat_ids.retain(|_, id| *id != reg_id);
        Ok(())
    }

    async fn insert_history(&mut self, snapshot: &HistorySnapshot) -> Result<DbId, StoreError> {
        let id = self.register.next_id();
        self.register.history.push(HistorySnapshot {
            id,
            ..snapshot.clone()
        });
        Ok(id)
    }

    async fn advance_cursor(&mut self, queue_id: DbId, processed: i64) -> Result<(), StoreError> {
        self.cursors.push((queue_id, processed));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let injected = self
            .inner
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }

        let MemoryTx {
            inner,
            register,
            cursors,
        } = *self;
        *lock(&inner.register) = register;
        let mut queue = lock(&inner.queue);
        for (queue_id, processed) in cursors {
            if let Some(item) = queue.items.get_mut(&queue_id) {
                item.skip_lines_count += processed;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Queue and log contracts
// ---------------------------------------------------------------------------

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, item: &NewQueueItem) -> Result<QueueItem, StoreError> {
        let mut queue = lock(&self.inner.queue);
        queue.next_id += 1;
        let queued = QueueItem {
            id: queue.next_id,
            data_source_id: item.data_source_id,
            file_path: item.file_path.clone(),
            file_name: item.file_name.clone(),
            status: QueueStatus::InQueue,
            start_import_date: None,
            end_import_date: None,
            skip_lines_count: 0,
            description: item.description.clone(),
            note: None,
            user_id: item.user_id.clone(),
        };
        queue.items.insert(queued.id, queued.clone());
        Ok(queued)
    }

    async fn dequeue(&self, now: Timestamp) -> Result<Option<QueueItem>, StoreError> {
        let mut queue = lock(&self.inner.queue);
        Ok(queue
            .items
            .values_mut()
            .find(|i| i.status == QueueStatus::InQueue)
            .map(|item| {
                item.status = QueueStatus::Loading;
                item.start_import_date = Some(now);
                item.clone()
            }))
    }

    async fn reset_stuck(&self, older_than: Timestamp) -> Result<u64, StoreError> {
        let mut queue = lock(&self.inner.queue);
        let mut reset = 0;
        for item in queue.items.values_mut() {
            let stuck = item.status == QueueStatus::Loading
                && item.start_import_date.map_or(true, |t| t < older_than);
            if stuck {
                item.status = QueueStatus::InQueue;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn finish(
        &self,
        queue_id: DbId,
        status: QueueStatus,
        note: Option<&str>,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let mut queue = lock(&self.inner.queue);
        let item = queue.items.get_mut(&queue_id).ok_or(StoreError::NotFound {
            entity: "queue item",
            key: queue_id.to_string(),
        })?;
        item.status = status;
        item.note = note.map(str::to_string);
        item.end_import_date = Some(now);
        Ok(())
    }

    async fn requeue(&self, queue_id: DbId) -> Result<bool, StoreError> {
        let mut queue = lock(&self.inner.queue);
        match queue.items.get_mut(&queue_id) {
            Some(item) if item.status == QueueStatus::DataLoadFailed => {
                item.status = QueueStatus::InQueue;
                item.note = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, queue_id: DbId) -> Result<(), StoreError> {
        let mut queue = lock(&self.inner.queue);
        if let Some(item) = queue.items.get_mut(&queue_id) {
            if item.status == QueueStatus::Loading {
                item.status = QueueStatus::InQueue;
            }
        }
        Ok(())
    }

    async fn get(&self, queue_id: DbId) -> Result<Option<QueueItem>, StoreError> {
        Ok(lock(&self.inner.queue).items.get(&queue_id).cloned())
    }

    async fn load_data_source(&self, id: DbId) -> Result<DataSource, StoreError> {
        lock(&self.inner.queue)
            .sources
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "data source",
                key: id.to_string(),
            })
    }
}

#[async_trait]
impl UploadLogSink for MemoryStore {
    async fn append(&self, entries: &[UploadLogEntry]) -> Result<(), StoreError> {
        let mut log = lock(&self.inner.log);
        let first = log.len() as DbId + 1;
        log.extend(entries.iter().enumerate().map(|(i, e)| UploadLogEntry {
            id: first + i as DbId,
            ..e.clone()
        }));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Search index held in a map, with reachability and write-failure
/// switches.
#[derive(Debug)]
pub struct MemorySearchIndex {
    docs: Mutex<BTreeMap<String, SearchDocument>>,
    reachable: AtomicBool,
    writable: AtomicBool,
}

impl Default for MemorySearchIndex {
    fn default() -> Self {
        Self {
            docs: Mutex::new(BTreeMap::new()),
            reachable: AtomicBool::new(true),
            writable: AtomicBool::new(true),
        }
    }
}

impl MemorySearchIndex {
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fail writes while still answering pings.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    pub fn get(&self, id: &str) -> Option<SearchDocument> {
        lock(&self.docs).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.docs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), IndexError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IndexError::Unreachable("connection refused".into()))
        }
    }

    fn check_write(&self) -> Result<(), IndexError> {
        self.check()?;
        if self.writable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IndexError::Rejected {
                status: 503,
                body: "cluster_block_exception".into(),
            })
        }
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn ping(&self) -> Result<(), IndexError> {
        self.check()
    }

    async fn upsert(&self, docs: &[SearchDocument]) -> Result<(), IndexError> {
        self.check_write()?;
        let mut stored = lock(&self.docs);
        for doc in docs {
            stored.insert(doc.id.clone(), doc.clone());
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<(), IndexError> {
        self.check_write()?;
        let mut stored = lock(&self.docs);
        for id in ids {
            stored.remove(id);
        }
        Ok(())
    }
}

/// Writable-field sets per user and unit type, and data-access scopes per
/// user. Users without an entry are unrestricted.
#[derive(Debug, Default)]
pub struct MemoryPermissions {
    fields: Mutex<HashMap<(String, UnitType), HashSet<String>>>,
    scopes: Mutex<HashMap<String, DataAccess>>,
}

impl MemoryPermissions {
    pub fn restrict(&self, user_id: &str, unit_type: UnitType, fields: &[&str]) {
        lock(&self.fields).insert(
            (user_id.to_string(), unit_type),
            fields.iter().map(|f| f.to_string()).collect(),
        );
    }

    pub fn limit_scope(&self, user_id: &str, regions: &[DbId], activity_categories: &[DbId]) {
        lock(&self.scopes).insert(
            user_id.to_string(),
            DataAccess {
                regions: regions.iter().copied().collect(),
                activity_categories: activity_categories.iter().copied().collect(),
            },
        );
    }
}

#[async_trait]
impl PermissionService for MemoryPermissions {
    async fn writable_fields(
        &self,
        user_id: &str,
        unit_type: UnitType,
    ) -> Result<Option<HashSet<String>>, StoreError> {
        Ok(lock(&self.fields)
            .get(&(user_id.to_string(), unit_type))
            .cloned())
    }

    async fn data_access(&self, user_id: &str) -> Result<Option<DataAccess>, StoreError> {
        Ok(lock(&self.scopes).get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_unit(&StatUnit::new(UnitType::LegalUnit, Utc::now()))
                .await
                .unwrap();
        }
        assert!(store.units_of(UnitType::LegalUnit).is_empty());
    }

    #[tokio::test]
    async fn injected_failure_rolls_back_once() {
        let store = MemoryStore::new();
        store.fail_next_commits(1);
        let mut tx = store.begin().await.unwrap();
        tx.save_address(&Address::default()).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert!(store.addresses().is_empty());

        let mut tx = store.begin().await.unwrap();
        tx.save_address(&Address::default()).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.addresses().len(), 1);
    }

    #[tokio::test]
    async fn stat_id_index_follows_updates() {
        let store = MemoryStore::new();
        let mut unit = StatUnit::new(UnitType::LegalUnit, Utc::now());
        unit.stat_id = Some("A".into());
        let id = store.seed_unit(unit);

        let mut renamed = store.unit(UnitType::LegalUnit, id).unwrap();
        renamed.stat_id = Some("B".into());
        let mut tx = store.begin().await.unwrap();
        tx.update_unit(&renamed).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.unit_by_stat_id(UnitType::LegalUnit, "A").is_none());
        assert_eq!(store.unit_by_stat_id(UnitType::LegalUnit, "B").map(|u| u.reg_id), Some(id));
    }

    #[tokio::test]
    async fn dequeue_claims_each_item_once() {
        let store = MemoryStore::new();
        let new = NewQueueItem {
            data_source_id: 1,
            file_path: "/tmp/a.csv".into(),
            file_name: "a.csv".into(),
            description: None,
            user_id: "u".into(),
        };
        store.enqueue(&new).await.unwrap();
        let claimed = store.dequeue(Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.status, QueueStatus::Loading);
        assert!(store.dequeue(Utc::now()).await.unwrap().is_none());

        assert_eq!(store.reset_stuck(Utc::now() - Duration::hours(1)).await.unwrap(), 0);
        assert_eq!(store.reset_stuck(Utc::now() + Duration::seconds(1)).await.unwrap(), 1);
    }
}
