//! Save policy and per-type dispatch.
//!
//! Decides whether a built unit may be written, routes it to the create or
//! edit path of its level, and stages every resulting unit (auto-created
//! relatives, cascaded liquidations, orphaned enterprises) into the bulk
//! buffer. All store reads happen before anything is staged, so a record
//! that fails leaves the buffer as it found it.

use statreg_core::context::ImportContext;
use statreg_core::data_source::DataSource;
use statreg_core::error::StoreError;
use statreg_core::history::{ChangeReason, HistorySnapshot};
use statreg_core::links::link_spec;
use statreg_core::reference::CodeRef;
use statreg_core::store::UnitStore;
use statreg_core::types::{DbId, Timestamp};
use statreg_core::unit::{LinkRef, StatUnit, UnitType};

use crate::builder::BuiltUnit;
use crate::bulk::BulkBuffer;
use crate::error::RecordError;

/// What happened to the record's own unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Updated,
    /// Nothing recorded in history changed.
    Unchanged,
}

/// Copy of `from` as a new unit of another level, sharing its children.
pub fn derive_unit(from: &StatUnit, unit_type: UnitType, now: Timestamp) -> StatUnit {
    let mut unit = from.clone();
    unit.reg_id = 0;
    unit.unit_type = unit_type;
    unit.legal_unit = None;
    unit.enterprise_unit = None;
    unit.ent_group = None;
    unit.history_child_ids.clear();
    unit.market = None;
    unit.commercial = None;
    unit.start_period = now;
    unit.change_reason = ChangeReason::Create;
    unit.edit_comment = None;
    if !unit_type.has_children_lists() {
        unit.activities.clear();
        unit.persons.clear();
        unit.foreign_participation_countries.clear();
    }
    unit
}

/// Set or clear the liquidated state.
fn set_liquidated(unit: &mut StatUnit, liquidated: Option<(&CodeRef, &StatUnit)>, ctx: &ImportContext) {
    match liquidated {
        Some((status, cause)) => {
            unit.unit_status = status.clone();
            unit.liq_date = cause.liq_date.or(Some(ctx.now.date_naive()));
            unit.liq_reason = cause.liq_reason.clone();
        }
        None => {
            unit.unit_status = CodeRef::default();
            unit.liq_date = None;
            unit.liq_reason = None;
        }
    }
    unit.start_period = ctx.now;
    unit.change_reason = ChangeReason::Edit;
    unit.user_id = Some(ctx.user_id.clone());
}

pub struct Dispatcher<'a> {
    store: &'a dyn UnitStore,
    source: &'a DataSource,
    liquidated: &'a CodeRef,
}

impl<'a> Dispatcher<'a> {
    /// * `liquidated` - the resolved "liquidated" status row; an empty
    ///   reference disables every liquidation rule.
    pub fn new(store: &'a dyn UnitStore, source: &'a DataSource, liquidated: &'a CodeRef) -> Self {
        Self {
            store,
            source,
            liquidated,
        }
    }

    pub async fn save(
        &self,
        built: BuiltUnit,
        buffer: &mut BulkBuffer,
        ctx: &ImportContext,
    ) -> Result<SaveOutcome, RecordError> {
        let BuiltUnit {
            mut unit, existing, ..
        } = built;
        unit.data_source = Some(self.source.name.clone());
        unit.user_id = Some(ctx.user_id.clone());

        match existing {
            Some(prior) => {
                if !self.source.priority.may_overwrite() {
                    return Err(RecordError::Policy(format!(
                        "Data source `{}` is not trusted to overwrite existing {} `{}`",
                        self.source.name,
                        unit.unit_type,
                        prior.stat_id().unwrap_or_default()
                    )));
                }
                self.normalize_liquidation(&mut unit, Some(&prior), ctx.now);
                self.edit(unit, prior, buffer, ctx).await
            }
            None => {
                self.normalize_liquidation(&mut unit, None, ctx.now);
                self.create(unit, buffer, ctx).await?;
                Ok(SaveOutcome::Created)
            }
        }
    }

    /// A liquidation date or reason implies the liquidated status, and a
    /// liquidated unit always carries a date. Leaving the status clears both.
    fn normalize_liquidation(&self, unit: &mut StatUnit, prior: Option<&StatUnit>, now: Timestamp) {
        let liquidated = self.liquidated;
        if liquidated.id <= 0 {
            return;
        }
        let liq_changed = prior.map_or(true, |p| p.liq_date != unit.liq_date || p.liq_reason != unit.liq_reason);
        if liq_changed && (unit.liq_date.is_some() || unit.liq_reason.is_some()) {
            unit.unit_status = liquidated.clone();
        }
        if unit.is_liquidated(liquidated) {
            unit.liq_date.get_or_insert(now.date_naive());
        } else if prior.is_some_and(|p| p.is_liquidated(liquidated)) {
            unit.liq_date = None;
            unit.liq_reason = None;
        }
    }

    // ── Reads with the buffer overlaid ──────────────────────────────

    async fn current(
        &self,
        unit_type: UnitType,
        reg_id: DbId,
        buffer: &BulkBuffer,
    ) -> Result<Option<StatUnit>, StoreError> {
        if buffer.is_scheduled_for_delete(unit_type, reg_id) {
            return Ok(None);
        }
        match buffer.staged_unit(unit_type, reg_id) {
            Some(unit) => Ok(Some(unit.clone())),
            None => self.store.find_by_reg_id(unit_type, reg_id).await,
        }
    }

    /// Children of a persisted parent as they will stand after the next
    /// flush.
    async fn children(
        &self,
        parent_type: UnitType,
        parent_id: DbId,
        buffer: &BulkBuffer,
    ) -> Result<Vec<StatUnit>, StoreError> {
        let mut out = Vec::new();
        for child in self.store.children_of(parent_type, parent_id).await? {
            match buffer.staged_unit(child.unit_type, child.reg_id) {
                Some(staged) if staged.parent_link().and_then(LinkRef::reg_id) == Some(parent_id) => {
                    out.push(staged.clone())
                }
                Some(_) => {}
                None => out.push(child),
            }
        }
        for staged in buffer.staged_children(parent_type, parent_id) {
            if staged.is_new() || !out.iter().any(|c| c.reg_id == staged.reg_id) {
                out.push(staged.clone());
            }
        }
        out.retain(|c| !buffer.is_scheduled_for_delete(c.unit_type, c.reg_id));
        Ok(out)
    }

    // ── Create ──────────────────────────────────────────────────────

    async fn create(
        &self,
        mut unit: StatUnit,
        buffer: &mut BulkBuffer,
        ctx: &ImportContext,
    ) -> Result<(), RecordError> {
        unit.start_period = ctx.now;
        unit.change_reason = ChangeReason::Create;
        match unit.unit_type {
            UnitType::LegalUnit => self.create_legal_unit(unit, buffer, ctx).await,
            UnitType::EnterpriseUnit => self.create_enterprise_unit(unit, buffer, ctx).await,
            UnitType::LocalUnit | UnitType::EnterpriseGroup => {
                buffer.stage_created(unit, ctx);
                Ok(())
            }
        }
    }

    /// Link (or auto-create) the enterprise, then stage the legal unit and
    /// an auto-created local unit under it as one bundle.
    async fn create_legal_unit(
        &self,
        mut unit: StatUnit,
        buffer: &mut BulkBuffer,
        ctx: &ImportContext,
    ) -> Result<(), RecordError> {
        let mut enterprise = unit.enterprise_unit.clone();
        if enterprise.is_none() {
            if let Some(stat_id) = unit.stat_id() {
                enterprise = match buffer.find_pending(UnitType::EnterpriseUnit, stat_id) {
                    Some(pending) => Some(LinkRef::Pending(pending)),
                    None => self
                        .store
                        .find_by_stat_id(UnitType::EnterpriseUnit, stat_id)
                        .await?
                        .map(|e| LinkRef::RegId(e.reg_id)),
                };
            }
        }

        buffer.suppress();
        buffer.claim_children(&mut unit);
        let enterprise = match enterprise {
            Some(link) => link,
            None => {
                let derived = derive_unit(&unit, UnitType::EnterpriseUnit, ctx.now);
                LinkRef::Pending(buffer.stage_created(derived, ctx))
            }
        };
        unit.enterprise_unit = Some(enterprise);

        let mut local = derive_unit(&unit, UnitType::LocalUnit, ctx.now);
        let legal = buffer.stage_created(unit, ctx);
        local.legal_unit = Some(LinkRef::Pending(legal));
        buffer.stage_created(local, ctx);
        buffer.resume();
        Ok(())
    }

    /// Auto-create the group when none is linked and adopt the unlinked
    /// legal unit sharing the enterprise's StatId.
    async fn create_enterprise_unit(
        &self,
        mut unit: StatUnit,
        buffer: &mut BulkBuffer,
        ctx: &ImportContext,
    ) -> Result<(), RecordError> {
        let adoption = link_spec(UnitType::EnterpriseUnit, UnitType::LegalUnit);
        let adoptee = match (unit.stat_id(), adoption) {
            (Some(stat_id), Some(spec)) => self
                .store
                .find_by_stat_id(UnitType::LegalUnit, stat_id)
                .await?
                .filter(|legal| spec.can_create(&unit, legal))
                .filter(|legal| buffer.staged_unit(UnitType::LegalUnit, legal.reg_id).is_none()),
            _ => None,
        };

        buffer.suppress();
        buffer.claim_children(&mut unit);
        if unit.ent_group.is_none() {
            let group = derive_unit(&unit, UnitType::EnterpriseGroup, ctx.now);
            unit.ent_group = Some(LinkRef::Pending(buffer.stage_created(group, ctx)));
        }
        let enterprise = buffer.stage_created(unit, ctx);

        if let Some(prior) = adoptee {
            let mut legal = prior.clone();
            if let Some(spec) = adoption {
                spec.create(&mut legal, LinkRef::Pending(enterprise));
            }
            legal.start_period = ctx.now;
            legal.change_reason = ChangeReason::Edit;
            legal.user_id = Some(ctx.user_id.clone());
            let snapshot = HistorySnapshot::of(&prior, ctx.now, ChangeReason::Edit, None, &ctx.user_id);
            buffer.stage(legal, Some(snapshot));
        }
        buffer.resume();
        Ok(())
    }

    // ── Edit ────────────────────────────────────────────────────────

    async fn edit(
        &self,
        mut unit: StatUnit,
        prior: StatUnit,
        buffer: &mut BulkBuffer,
        ctx: &ImportContext,
    ) -> Result<SaveOutcome, RecordError> {
        // Mapping never clears a link; an unresolved key keeps the old one.
        if unit.parent_link().is_none() {
            unit.set_parent_link(prior.parent_link().cloned());
        }

        if unit.same_state(&prior) {
            buffer.stage(unit, None);
            return Ok(SaveOutcome::Unchanged);
        }

        let liquidated = self.liquidated;
        let was = prior.is_liquidated(liquidated);
        let is = unit.is_liquidated(liquidated);

        if unit.unit_type == UnitType::EnterpriseUnit && was != is {
            return Err(RecordError::Policy(
                "Liquidation of an enterprise unit follows its legal units and cannot be changed directly".into(),
            ));
        }
        if unit.unit_type == UnitType::LocalUnit && is && !was {
            self.check_not_last_local(&unit, buffer).await?;
        }

        let cascade = if unit.unit_type == UnitType::LegalUnit && was != is {
            self.liquidation_cascade(&unit, is, buffer, ctx).await?
        } else {
            Vec::new()
        };
        let orphan = self.orphaned_enterprise(&unit, &prior, buffer).await?;

        let snapshot = HistorySnapshot::of(&prior, ctx.now, ChangeReason::Edit, None, &ctx.user_id);
        unit.start_period = ctx.now;
        unit.change_reason = ChangeReason::Edit;
        buffer.stage(unit, Some(snapshot));

        for (next, before) in cascade {
            let snapshot = HistorySnapshot::of(&before, ctx.now, ChangeReason::Edit, None, &ctx.user_id);
            buffer.stage(next, Some(snapshot));
        }
        if let Some(reg_id) = orphan {
            tracing::debug!(reg_id, "Scheduling childless enterprise for deletion");
            buffer.schedule_delete(UnitType::EnterpriseUnit, reg_id);
        }
        Ok(SaveOutcome::Updated)
    }

    async fn check_not_last_local(&self, unit: &StatUnit, buffer: &BulkBuffer) -> Result<(), RecordError> {
        let Some(legal_id) = unit.legal_unit.as_ref().and_then(LinkRef::reg_id) else {
            return Ok(());
        };
        let others_active = self
            .children(UnitType::LegalUnit, legal_id, buffer)
            .await?
            .iter()
            .filter(|c| c.reg_id != unit.reg_id)
            .any(|c| !c.is_liquidated(self.liquidated));
        if others_active {
            Ok(())
        } else {
            Err(RecordError::Policy(format!(
                "Local unit `{}` is the last active local unit of its legal unit; liquidate the legal unit instead",
                unit.stat_id().unwrap_or_default()
            )))
        }
    }

    /// Units whose liquidation follows the legal unit's, as
    /// `(new state, prior state)` pairs.
    ///
    /// Local units follow when their earliest start period equals the legal
    /// unit's. The enterprise is liquidated once every legal unit under it
    /// is, and revived as soon as one is revived.
    async fn liquidation_cascade(
        &self,
        legal: &StatUnit,
        liquidate: bool,
        buffer: &BulkBuffer,
        ctx: &ImportContext,
    ) -> Result<Vec<(StatUnit, StatUnit)>, RecordError> {
        let liquidated = self.liquidated;
        let status = liquidate.then_some((liquidated, legal));
        let mut changes = Vec::new();

        let earliest = self
            .store
            .earliest_start_period(UnitType::LegalUnit, legal.reg_id)
            .await?;
        for local in self.children(UnitType::LegalUnit, legal.reg_id, buffer).await? {
            if local.is_new() || local.is_liquidated(liquidated) == liquidate {
                continue;
            }
            let local_earliest = self
                .store
                .earliest_start_period(UnitType::LocalUnit, local.reg_id)
                .await?;
            if local_earliest != earliest {
                continue;
            }
            let mut next = local.clone();
            set_liquidated(&mut next, status, ctx);
            changes.push((next, local));
        }

        let Some(enterprise_id) = legal.enterprise_unit.as_ref().and_then(LinkRef::reg_id) else {
            return Ok(changes);
        };
        let Some(enterprise) = self.current(UnitType::EnterpriseUnit, enterprise_id, buffer).await? else {
            return Ok(changes);
        };
        let all_legals_liquidated = self
            .children(UnitType::EnterpriseUnit, enterprise_id, buffer)
            .await?
            .iter()
            .filter(|c| c.reg_id != legal.reg_id)
            .all(|c| c.is_liquidated(liquidated));
        let flip = if liquidate {
            all_legals_liquidated && !enterprise.is_liquidated(liquidated)
        } else {
            enterprise.is_liquidated(liquidated)
        };
        if flip {
            let mut next = enterprise.clone();
            set_liquidated(&mut next, status, ctx);
            changes.push((next, enterprise));
        }
        Ok(changes)
    }

    /// The enterprise a legal unit leaves, if it would be left childless.
    async fn orphaned_enterprise(
        &self,
        unit: &StatUnit,
        prior: &StatUnit,
        buffer: &BulkBuffer,
    ) -> Result<Option<DbId>, RecordError> {
        if unit.unit_type != UnitType::LegalUnit {
            return Ok(None);
        }
        let new = unit.enterprise_unit.as_ref().and_then(LinkRef::reg_id);
        let Some(old) = prior
            .enterprise_unit
            .as_ref()
            .and_then(LinkRef::reg_id)
            .filter(|old| Some(*old) != new)
        else {
            return Ok(None);
        };
        let remaining = self
            .children(UnitType::EnterpriseUnit, old, buffer)
            .await?
            .iter()
            .filter(|c| c.reg_id != unit.reg_id)
            .count();
        Ok((remaining == 0).then_some(old))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use statreg_core::data_source::{AllowedOperation, FieldMapping, Priority, UploadType};
    use statreg_core::reference::Activity;

    use crate::memory::MemoryStore;

    fn source() -> DataSource {
        DataSource {
            id: 1,
            name: "registry".into(),
            unit_type: UnitType::LegalUnit,
            priority: Priority::Trusted,
            allowed_operation: AllowedOperation::CreateAndAlter,
            upload_type: UploadType::StatUnits,
            csv_delimiter: ',',
            csv_skip_count: 0,
            mapping: FieldMapping::default(),
        }
    }

    fn liquidated() -> CodeRef {
        CodeRef {
            id: 7,
            code: Some("7".into()),
            name: Some("Liquidated".into()),
        }
    }

    #[test]
    fn derived_group_drops_children_lists() {
        let now = Utc::now();
        let mut legal = StatUnit::new(UnitType::LegalUnit, now);
        legal.reg_id = 3;
        legal.market = Some(true);
        legal.activities.push(Activity::default());
        legal.enterprise_unit = Some(LinkRef::RegId(2));

        let enterprise = derive_unit(&legal, UnitType::EnterpriseUnit, now);
        assert!(enterprise.is_new());
        assert_eq!(enterprise.activities.len(), 1);
        assert_eq!(enterprise.market, None);
        assert!(enterprise.parent_link().is_none());

        let group = derive_unit(&legal, UnitType::EnterpriseGroup, now);
        assert!(group.activities.is_empty());
    }

    #[test]
    fn liquidation_date_implies_status() {
        let store = MemoryStore::default();
        let (source, status) = (source(), liquidated());
        let dispatcher = Dispatcher::new(&store, &source, &status);
        let now = Utc::now();

        let mut unit = StatUnit::new(UnitType::LegalUnit, now);
        unit.liq_reason = Some("bankrupt".into());
        dispatcher.normalize_liquidation(&mut unit, None, now);
        assert!(unit.is_liquidated(&status));
        assert_eq!(unit.liq_date, Some(now.date_naive()));
    }

    #[test]
    fn leaving_liquidated_status_clears_date() {
        let store = MemoryStore::default();
        let (source, status) = (source(), liquidated());
        let dispatcher = Dispatcher::new(&store, &source, &status);
        let now = Utc::now();

        let mut prior = StatUnit::new(UnitType::LegalUnit, now);
        prior.unit_status = status.clone();
        prior.liq_date = Some(now.date_naive());
        let mut unit = prior.clone();
        unit.unit_status = CodeRef {
            id: 1,
            ..Default::default()
        };
        dispatcher.normalize_liquidation(&mut unit, Some(&prior), now);
        assert_eq!(unit.liq_date, None);
        assert_eq!(unit.unit_status.id, 1);
    }

    #[test]
    fn rules_disabled_without_status_row() {
        let store = MemoryStore::default();
        let (source, status) = (source(), CodeRef::default());
        let dispatcher = Dispatcher::new(&store, &source, &status);
        let mut unit = StatUnit::new(UnitType::LegalUnit, Utc::now());
        unit.liq_reason = Some("x".into());
        dispatcher.normalize_liquidation(&mut unit, None, Utc::now());
        assert_eq!(unit.unit_status, CodeRef::default());
    }
}
