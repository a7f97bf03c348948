//! Bulk upsert buffer.
//!
//! Staged units, their history snapshots, scheduled deletions and the
//! success log entries of the records that produced them are held in memory
//! and written in one transaction per flush. A failed flush rolls back and
//! leaves the buffer untouched, so the same batch can be flushed again.
//!
//! New children (addresses, activities, persons) get negative temporary ids
//! when staged. Units derived from the same record (an auto-created
//! enterprise and local unit next to a legal unit) therefore share child
//! rows, and history snapshots can be mirrored onto the ids generated at
//! flush time.

use std::collections::{BTreeMap, HashMap, HashSet};

use statreg_core::context::ImportContext;
use statreg_core::error::StoreError;
use statreg_core::history::{ChangeReason, HistorySnapshot};
use statreg_core::reference::{Activity, Address, Person};
use statreg_core::search::{document_id, SearchDocument};
use statreg_core::store::{UnitStore, UnitTx};
use statreg_core::types::DbId;
use statreg_core::unit::{LinkRef, PendingId, StatUnit, UnitType};
use statreg_core::upload_log::UploadLogEntry;

use crate::search::IndexSync;

/// A unit waiting to be written.
#[derive(Debug, Clone)]
pub struct StagedUnit {
    pub pending: PendingId,
    pub unit: StatUnit,
    pub histories: Vec<HistorySnapshot>,
}

/// What a successful flush wrote.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub inserted: usize,
    pub updated: usize,
    pub histories: usize,
    pub deleted: usize,
    /// Records the resume cursor advanced by.
    pub records: i64,
    /// Log entries of the records whose units are now committed.
    pub log: Vec<UploadLogEntry>,
    /// Units as persisted, with generated ids.
    pub units: Vec<StatUnit>,
}

#[derive(Debug)]
pub struct BulkBuffer {
    capacity: usize,
    staged: Vec<StagedUnit>,
    deletions: Vec<(UnitType, DbId)>,
    log: Vec<UploadLogEntry>,
    records: i64,
    next_pending: PendingId,
    next_temp_id: DbId,
    suppressed: u32,
}

impl BulkBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            staged: Vec::new(),
            deletions: Vec::new(),
            log: Vec::new(),
            records: 0,
            next_pending: 1,
            next_temp_id: 0,
            suppressed: 0,
        }
    }

    // ── Staging ─────────────────────────────────────────────────────

    fn temp_id(&mut self) -> DbId {
        self.next_temp_id -= 1;
        self.next_temp_id
    }

    /// Give every identity-less child a temporary id.
    pub fn claim_children(&mut self, unit: &mut StatUnit) {
        let mut slots: Vec<&mut DbId> = Vec::new();
        for address in [&mut unit.address, &mut unit.actual_address, &mut unit.postal_address]
            .into_iter()
            .flatten()
        {
            slots.push(&mut address.id);
        }
        slots.extend(unit.activities.iter_mut().map(|a| &mut a.id));
        slots.extend(unit.persons.iter_mut().map(|p| &mut p.id));
        for id in slots.into_iter().filter(|id| **id == 0) {
            *id = self.temp_id();
        }
    }

    /// Stage a unit with an optional snapshot of its prior state.
    ///
    /// Staging a persisted unit that is already in the buffer replaces the
    /// staged state and keeps both snapshots.
    pub fn stage(&mut self, mut unit: StatUnit, history: Option<HistorySnapshot>) -> PendingId {
        self.claim_children(&mut unit);
        if unit.reg_id > 0 {
            if let Some(existing) = self
                .staged
                .iter_mut()
                .find(|s| s.unit.unit_type == unit.unit_type && s.unit.reg_id == unit.reg_id)
            {
                existing.unit = unit;
                existing.histories.extend(history);
                return existing.pending;
            }
        }
        let pending = self.next_pending;
        self.next_pending += 1;
        self.staged.push(StagedUnit {
            pending,
            unit,
            histories: history.into_iter().collect(),
        });
        pending
    }

    /// Stage a new unit together with its creation snapshot.
    pub fn stage_created(&mut self, mut unit: StatUnit, ctx: &ImportContext) -> PendingId {
        self.claim_children(&mut unit);
        let snapshot = HistorySnapshot::of(&unit, ctx.now, ChangeReason::Create, None, &ctx.user_id);
        self.stage(unit, Some(snapshot))
    }

    /// Hard-delete a persisted unit in the next flush.
    pub fn schedule_delete(&mut self, unit_type: UnitType, reg_id: DbId) {
        self.staged
            .retain(|s| !(s.unit.unit_type == unit_type && s.unit.reg_id == reg_id));
        if !self.deletions.contains(&(unit_type, reg_id)) {
            self.deletions.push((unit_type, reg_id));
        }
    }

    pub fn is_scheduled_for_delete(&self, unit_type: UnitType, reg_id: DbId) -> bool {
        self.deletions.contains(&(unit_type, reg_id))
    }

    /// Log entry of a record whose units are staged. Written once the flush
    /// commits.
    pub fn record_done(&mut self, entry: UploadLogEntry) {
        self.log.push(entry);
    }

    /// Count one processed record towards the resume cursor.
    pub fn count_record(&mut self) {
        self.records += 1;
    }

    // ── Flush control ───────────────────────────────────────────────

    /// Hold automatic flushes while a multi-unit bundle is staged.
    pub fn suppress(&mut self) {
        self.suppressed += 1;
    }

    pub fn resume(&mut self) {
        self.suppressed = self.suppressed.saturating_sub(1);
    }

    pub fn should_flush(&self) -> bool {
        self.suppressed == 0 && self.staged.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty() && self.deletions.is_empty() && self.log.is_empty() && self.records == 0
    }

    // ── Lookups ─────────────────────────────────────────────────────

    pub fn staged(&self) -> &[StagedUnit] {
        &self.staged
    }

    /// Staged state of a persisted unit.
    pub fn staged_unit(&self, unit_type: UnitType, reg_id: DbId) -> Option<&StatUnit> {
        self.staged
            .iter()
            .map(|s| &s.unit)
            .find(|u| u.unit_type == unit_type && u.reg_id == reg_id && reg_id > 0)
    }

    /// Staged units whose upward link points at a persisted parent.
    pub fn staged_children(&self, parent_type: UnitType, parent_reg_id: DbId) -> Vec<&StatUnit> {
        self.staged
            .iter()
            .map(|s| &s.unit)
            .filter(|u| u.unit_type.parent() == Some(parent_type))
            .filter(|u| u.parent_link().and_then(LinkRef::reg_id) == Some(parent_reg_id))
            .collect()
    }

    /// Pending handle of a not-yet-persisted unit with this StatId.
    pub fn find_pending(&self, unit_type: UnitType, stat_id: &str) -> Option<PendingId> {
        self.staged
            .iter()
            .find(|s| s.unit.is_new() && s.unit.unit_type == unit_type && s.unit.stat_id() == Some(stat_id))
            .map(|s| s.pending)
    }

    /// Whether any staged unit carries `key` as its StatId.
    pub fn mentions(&self, key: &str) -> bool {
        self.staged.iter().any(|s| s.unit.stat_id() == Some(key))
    }

    // ── Flush ───────────────────────────────────────────────────────

    /// Write the whole buffer in one transaction, then push the touched
    /// units to the search index.
    ///
    /// On error the transaction is rolled back and the buffer is left as it
    /// was. On success the buffer is cleared.
    pub async fn flush(
        &mut self,
        store: &dyn UnitStore,
        index: &IndexSync,
        queue_id: DbId,
    ) -> Result<FlushReport, StoreError> {
        if self.is_empty() {
            return Ok(FlushReport::default());
        }

        let mut staged = self.staged.clone();
        let mut tx = store.begin().await?;

        let ids = save_children(tx.as_mut(), &mut staged).await?;
        let (reg_ids, inserted, updated) = save_units(tx.as_mut(), &mut staged).await?;
        write_history_child_ids(store, tx.as_mut(), &mut staged).await?;

        for s in &staged {
            if s.unit.unit_type.has_children_lists() {
                tx.replace_unit_links(&s.unit).await?;
            }
        }
        for (unit_type, reg_id) in &self.deletions {
            tx.delete_unit(*unit_type, *reg_id).await?;
        }

        let mut histories = 0;
        for s in &mut staged {
            for snapshot in &mut s.histories {
                snapshot.parent_id = s.unit.reg_id;
                if snapshot.state.is_new() {
                    snapshot.state.reg_id = s.unit.reg_id;
                }
                ids.remap(&mut snapshot.state);
                resolve_pending_link(&mut snapshot.state, &reg_ids)?;
                snapshot.id = tx.insert_history(snapshot).await?;
                histories += 1;
            }
        }

        if self.records > 0 {
            tx.advance_cursor(queue_id, self.records).await?;
        }
        tx.commit().await?;

        let docs = staged
            .iter()
            .map(|s| SearchDocument::from_unit(&s.unit))
            .collect();
        let removed = self
            .deletions
            .iter()
            .map(|(t, id)| document_id(*t, *id))
            .collect();
        index.push(docs, removed).await;
        if let Err(e) = index.flush().await {
            tracing::warn!(queue_id, error = %e, "Search index sync failed, will retry");
        }

        let report = FlushReport {
            inserted,
            updated,
            histories,
            deleted: self.deletions.len(),
            records: self.records,
            log: std::mem::take(&mut self.log),
            units: staged.into_iter().map(|s| s.unit).collect(),
        };
        tracing::info!(
            queue_id,
            inserted,
            updated,
            histories,
            deleted = report.deleted,
            records = report.records,
            "Bulk buffer flushed"
        );
        self.clear();
        Ok(report)
    }

    /// Give up on the staged batch after a flush has failed for good.
    ///
    /// Every log entry in the batch is marked with the save error and
    /// returned. The record count is kept so the cursor still advances past
    /// these records on the next successful flush.
    pub fn drain_failed(&mut self, reason: &str) -> Vec<UploadLogEntry> {
        let mut entries = std::mem::take(&mut self.log);
        for entry in &mut entries {
            entry.fail(format!("Save error: {reason}"));
        }
        self.staged.clear();
        self.deletions.clear();
        self.suppressed = 0;
        entries
    }

    fn clear(&mut self) {
        self.staged.clear();
        self.deletions.clear();
        self.log.clear();
        self.records = 0;
    }
}

// ---------------------------------------------------------------------------
// Flush steps
// ---------------------------------------------------------------------------

/// Temporary child id → generated id.
#[derive(Debug, Default)]
struct ChildIds {
    addresses: HashMap<DbId, DbId>,
    activities: HashMap<DbId, DbId>,
    persons: HashMap<DbId, DbId>,
}

impl ChildIds {
    fn remap(&self, unit: &mut StatUnit) {
        for address in [&mut unit.address, &mut unit.actual_address, &mut unit.postal_address]
            .into_iter()
            .flatten()
        {
            if let Some(id) = self.addresses.get(&address.id) {
                address.id = *id;
            }
        }
        for activity in &mut unit.activities {
            if let Some(id) = self.activities.get(&activity.id) {
                activity.id = *id;
            }
        }
        for person in &mut unit.persons {
            if let Some(id) = self.persons.get(&person.id) {
                person.id = *id;
            }
        }
    }
}

/// Insert new children once per content (addresses, persons) or temporary
/// id (activities) and update each persisted child once.
async fn save_children(tx: &mut dyn UnitTx, staged: &mut [StagedUnit]) -> Result<ChildIds, StoreError> {
    let mut ids = ChildIds::default();
    let mut new_addresses: Vec<Address> = Vec::new();
    let mut new_persons: Vec<Person> = Vec::new();
    let mut updated: HashSet<(&'static str, DbId)> = HashSet::new();

    for s in staged.iter_mut() {
        for address in [&mut s.unit.address, &mut s.unit.actual_address, &mut s.unit.postal_address]
            .into_iter()
            .flatten()
        {
            if address.id >= 0 {
                continue;
            }
            let temp = address.id;
            let id = match ids.addresses.get(&temp) {
                Some(id) => *id,
                None => match new_addresses.iter().find(|a| a.same_content(address)) {
                    Some(same) => same.id,
                    None => {
                        let id = tx.save_address(&Address { id: 0, ..address.clone() }).await?;
                        new_addresses.push(Address { id, ..address.clone() });
                        id
                    }
                },
            };
            ids.addresses.insert(temp, id);
            address.id = id;
        }

        for activity in &mut s.unit.activities {
            activity.id = save_activity(tx, activity, &mut ids, &mut updated).await?;
        }

        for person in &mut s.unit.persons {
            if person.id > 0 {
                if updated.insert(("person", person.id)) {
                    tx.save_person(person).await?;
                }
                continue;
            }
            let temp = person.id;
            let id = match ids.persons.get(&temp) {
                Some(id) => *id,
                None => match new_persons.iter().find(|p| p.same_content(person)) {
                    Some(same) => same.id,
                    None => {
                        let id = tx.save_person(&Person { id: 0, ..person.clone() }).await?;
                        new_persons.push(Person { id, ..person.clone() });
                        id
                    }
                },
            };
            ids.persons.insert(temp, id);
            person.id = id;
        }
    }
    Ok(ids)
}

async fn save_activity(
    tx: &mut dyn UnitTx,
    activity: &Activity,
    ids: &mut ChildIds,
    updated: &mut HashSet<(&'static str, DbId)>,
) -> Result<DbId, StoreError> {
    if activity.id > 0 {
        if updated.insert(("activity", activity.id)) {
            tx.save_activity(activity).await?;
        }
        return Ok(activity.id);
    }
    if let Some(id) = ids.activities.get(&activity.id) {
        return Ok(*id);
    }
    let id = tx.save_activity(&Activity { id: 0, ..activity.clone() }).await?;
    ids.activities.insert(activity.id, id);
    Ok(id)
}

fn resolve_pending_link(unit: &mut StatUnit, reg_ids: &HashMap<PendingId, DbId>) -> Result<(), StoreError> {
    match unit.parent_link().cloned() {
        Some(LinkRef::Pending(p)) => {
            let id = reg_ids.get(&p).copied().ok_or_else(|| {
                StoreError::Conflict(format!("{} links to unit #{p} that is not in the batch", unit.unit_type))
            })?;
            unit.set_parent_link(Some(LinkRef::RegId(id)));
        }
        // Unresolved textual keys are never persisted.
        Some(LinkRef::Key(_)) => unit.set_parent_link(None),
        _ => {}
    }
    Ok(())
}

/// Persist units parent level first so pending links can be replaced by
/// the parent's generated RegId.
async fn save_units(
    tx: &mut dyn UnitTx,
    staged: &mut [StagedUnit],
) -> Result<(HashMap<PendingId, DbId>, usize, usize), StoreError> {
    let mut reg_ids = HashMap::new();
    let (mut inserted, mut updated) = (0, 0);
    for level in UnitType::FLUSH_ORDER {
        for s in staged.iter_mut().filter(|s| s.unit.unit_type == level) {
            resolve_pending_link(&mut s.unit, &reg_ids)?;
            if s.unit.is_new() {
                s.unit.reg_id = tx.insert_unit(&s.unit).await?;
                inserted += 1;
            } else {
                tx.update_unit(&s.unit).await?;
                updated += 1;
            }
            reg_ids.insert(s.pending, s.unit.reg_id);
        }
    }
    Ok((reg_ids, inserted, updated))
}

/// Add the batch's children to each parent's denormalized child id list.
/// The list only grows: a child that moves away stays in its old parent's
/// history.
async fn write_history_child_ids(
    store: &dyn UnitStore,
    tx: &mut dyn UnitTx,
    staged: &mut [StagedUnit],
) -> Result<(), StoreError> {
    let mut children: BTreeMap<(UnitType, DbId), Vec<DbId>> = BTreeMap::new();
    for s in staged.iter() {
        if let (Some(parent_type), Some(parent_id)) = (
            s.unit.unit_type.parent(),
            s.unit.parent_link().and_then(LinkRef::reg_id),
        ) {
            children.entry((parent_type, parent_id)).or_default().push(s.unit.reg_id);
        }
    }

    for ((parent_type, parent_id), child_ids) in children {
        let slot = staged
            .iter_mut()
            .find(|s| s.unit.unit_type == parent_type && s.unit.reg_id == parent_id);
        let mut ids = match &slot {
            Some(s) => s.unit.history_child_ids.clone(),
            None => store
                .find_by_reg_id(parent_type, parent_id)
                .await?
                .map(|u| u.history_child_ids)
                .unwrap_or_default(),
        };
        let before = ids.len();
        for id in child_ids {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.len() == before {
            continue;
        }
        ids.sort_unstable();
        tx.set_history_child_ids(parent_type, parent_id, &ids).await?;
        if let Some(s) = slot {
            s.unit.history_child_ids = ids;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx() -> ImportContext {
        ImportContext::new("tester")
    }

    #[test]
    fn claimed_children_get_distinct_negative_ids() {
        let mut buffer = BulkBuffer::new(10);
        let mut unit = StatUnit::new(UnitType::LegalUnit, Utc::now());
        unit.address = Some(Address {
            address_part1: Some("Main st 1".into()),
            ..Default::default()
        });
        unit.activities = vec![Activity::default(), Activity { id: 9, ..Default::default() }];
        buffer.claim_children(&mut unit);
        assert_eq!(unit.address.as_ref().map(|a| a.id), Some(-1));
        assert_eq!(unit.activities[0].id, -2);
        assert_eq!(unit.activities[1].id, 9);
    }

    #[test]
    fn suppression_holds_flush() {
        let mut buffer = BulkBuffer::new(1);
        buffer.suppress();
        buffer.stage_created(StatUnit::new(UnitType::LegalUnit, Utc::now()), &ctx());
        assert!(!buffer.should_flush());
        buffer.resume();
        assert!(buffer.should_flush());
    }

    #[test]
    fn restaging_persisted_unit_replaces_it() {
        let mut buffer = BulkBuffer::new(10);
        let mut unit = StatUnit::new(UnitType::LocalUnit, Utc::now());
        unit.reg_id = 4;
        let first = buffer.stage(unit.clone(), None);
        unit.name = Some("Renamed".into());
        let snapshot = HistorySnapshot::of(&unit, Utc::now(), ChangeReason::Edit, None, "u");
        let second = buffer.stage(unit, Some(snapshot));
        assert_eq!(first, second);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.staged()[0].histories.len(), 1);
        assert_eq!(
            buffer.staged_unit(UnitType::LocalUnit, 4).and_then(|u| u.name.as_deref()),
            Some("Renamed")
        );
    }

    #[test]
    fn drain_keeps_record_count() {
        let mut buffer = BulkBuffer::new(10);
        buffer.stage_created(StatUnit::new(UnitType::LegalUnit, Utc::now()), &ctx());
        buffer.record_done(UploadLogEntry::new(1, Utc::now()));
        buffer.count_record();
        let failed = buffer.drain_failed("connection reset");
        assert_eq!(failed.len(), 1);
        assert!(failed[0].is_error());
        assert_eq!(buffer.len(), 0);
        assert!(!buffer.is_empty());
    }
}
