//! Unit builder: classifies a record as insert or update, applies the
//! mapping on top of the existing state, resolves references and reattaches
//! identity-less children to rows that already exist.

use std::collections::HashSet;

use statreg_core::context::ImportContext;
use statreg_core::data_source::{AllowedOperation, DataSource, FieldMapping, UploadType};
use statreg_core::extraction::RawRecord;
use statreg_core::mapping::{apply_mapping, record_stat_id};
use statreg_core::reference::non_blank;
use statreg_core::store::{PermissionService, UnitStore};
use statreg_core::types::DbId;
use statreg_core::unit::{StatUnit, UnitType};

use crate::error::RecordError;
use crate::resolver::{LookupCache, Resolver};

/// A mapped, resolved unit ready for the dispatcher.
#[derive(Debug, Clone)]
pub struct BuiltUnit {
    pub unit: StatUnit,
    /// Persisted state before this record, for updates.
    pub existing: Option<StatUnit>,
    /// Non-fatal findings to attach to the upload log.
    pub warnings: Vec<String>,
}

/// Reject the record if the source's allowed operation forbids the branch.
pub fn check_operation(
    allowed: AllowedOperation,
    stat_id: Option<&str>,
    exists: bool,
) -> Result<(), RecordError> {
    let stat_id = stat_id.unwrap_or_default();
    if exists && !allowed.allows_alter() {
        return Err(RecordError::Policy(format!(
            "Unit with StatId `{stat_id}` already exists and the data source only allows creating units"
        )));
    }
    if !exists && !allowed.allows_create() {
        return Err(RecordError::Policy(format!(
            "Unit with StatId `{stat_id}` not found and the data source only allows altering units"
        )));
    }
    Ok(())
}

/// The part of a mapping an upload type may apply.
pub fn effective_mapping(source: &DataSource) -> FieldMapping {
    match source.upload_type {
        UploadType::StatUnits => source.mapping.clone(),
        UploadType::Activities => FieldMapping::new(
            source
                .mapping
                .pairs
                .iter()
                .filter(|p| p.target == "StatId" || p.target_head() == "Activities")
                .cloned()
                .collect(),
        ),
    }
}

pub struct UnitBuilder<'a> {
    store: &'a dyn UnitStore,
    permissions: &'a dyn PermissionService,
    cache: &'a LookupCache,
    source: &'a DataSource,
    mapping: &'a FieldMapping,
}

impl<'a> UnitBuilder<'a> {
    pub fn new(
        store: &'a dyn UnitStore,
        permissions: &'a dyn PermissionService,
        cache: &'a LookupCache,
        source: &'a DataSource,
        mapping: &'a FieldMapping,
    ) -> Self {
        Self {
            store,
            permissions,
            cache,
            source,
            mapping,
        }
    }

    pub async fn build(&self, record: &RawRecord, ctx: &ImportContext) -> Result<BuiltUnit, RecordError> {
        let unit_type = self.source.unit_type;
        self.check_permissions(&ctx.user_id, unit_type).await?;

        let stat_id = record_stat_id(record, self.mapping);
        let existing = match stat_id {
            Some(id) => self.store.find_by_stat_id(unit_type, id).await?,
            None => None,
        };

        if self.source.upload_type == UploadType::Activities && existing.is_none() {
            return Err(RecordError::Policy(format!(
                "Activities upload requires an existing {unit_type}, StatId `{}` not found",
                stat_id.unwrap_or_default()
            )));
        }
        check_operation(self.source.allowed_operation, stat_id, existing.is_some())?;

        let mut unit = existing
            .clone()
            .unwrap_or_else(|| StatUnit::new(unit_type, ctx.now));
        apply_mapping(record, self.mapping, &mut unit)?;

        let resolver = Resolver::new(self.cache, self.store);
        resolver.resolve_codes(&mut unit)?;
        self.check_data_access(&ctx.user_id, &unit).await?;
        let warnings = resolver.resolve_link(&mut unit).await?.into_iter().collect();

        self.match_existing_children(&mut unit).await?;

        Ok(BuiltUnit {
            unit,
            existing,
            warnings,
        })
    }

    async fn check_permissions(&self, user_id: &str, unit_type: UnitType) -> Result<(), RecordError> {
        let Some(writable) = self.permissions.writable_fields(user_id, unit_type).await? else {
            return Ok(());
        };
        let denied: Vec<&str> = self
            .mapping
            .top_level_targets()
            .into_iter()
            .filter(|t| !writable.contains(*t))
            .collect();
        if denied.is_empty() {
            Ok(())
        } else {
            Err(RecordError::Policy(format!(
                "User may not write {}: {}",
                unit_type,
                denied.join(", ")
            )))
        }
    }

    /// Reject units whose regions or activity categories fall outside the
    /// acting user's scope. Administrators have no scope.
    async fn check_data_access(&self, user_id: &str, unit: &StatUnit) -> Result<(), RecordError> {
        let Some(scope) = self.permissions.data_access(user_id).await? else {
            return Ok(());
        };
        let regions: Vec<DbId> = [&unit.address, &unit.actual_address, &unit.postal_address]
            .into_iter()
            .flatten()
            .map(|a| a.region.id)
            .filter(|id| *id > 0)
            .collect();
        let categories: Vec<DbId> = unit
            .activities
            .iter()
            .map(|a| a.category.id)
            .filter(|id| *id > 0)
            .collect();
        match scope.denial(&regions, &categories) {
            Some(reason) => Err(RecordError::Policy(reason)),
            None => Ok(()),
        }
    }

    /// Point identity-less children at matching persisted rows, then drop
    /// duplicates that now share an id (the later, freshly mapped copy wins).
    async fn match_existing_children(&self, unit: &mut StatUnit) -> Result<(), RecordError> {
        for address in [&mut unit.address, &mut unit.actual_address, &mut unit.postal_address]
            .into_iter()
            .flatten()
        {
            if address.id == 0 && !address.is_blank() {
                if let Some(id) = self.store.find_address(address).await? {
                    address.id = id;
                }
            }
        }

        if unit.reg_id > 0 {
            for activity in unit.activities.iter_mut().filter(|a| a.id == 0 && a.category.id > 0) {
                if let Some(id) = self
                    .store
                    .find_activity(unit.reg_id, activity.category.id, activity.activity_type)
                    .await?
                {
                    activity.id = id;
                }
            }
        }

        for person in unit.persons.iter_mut().filter(|p| p.id == 0) {
            let identified = [&person.given_name, &person.surname, &person.personal_id]
                .into_iter()
                .any(|v| non_blank(v).is_some())
                || person.birth_date.is_some();
            if identified {
                if let Some(id) = self.store.find_person(person).await? {
                    person.id = id;
                }
            }
        }

        keep_last_by_id(&mut unit.activities, |a| a.id);
        keep_last_by_id(&mut unit.persons, |p| p.id);
        Ok(())
    }
}

/// Remove earlier items whose positive id reappears later in the list.
fn keep_last_by_id<T>(items: &mut Vec<T>, id: impl Fn(&T) -> DbId) {
    let mut seen = HashSet::new();
    let mut keep: Vec<bool> = items
        .iter()
        .rev()
        .map(|item| {
            let id = id(item);
            id <= 0 || seen.insert(id)
        })
        .collect();
    keep.reverse();
    let mut flags = keep.into_iter();
    items.retain(|_| flags.next().unwrap_or(true));
}
