//! Reference resolution: turns code-table stubs and textual hierarchy keys
//! on a mapped unit into canonical ids.
//!
//! Code tables are loaded once per queue item into a [`LookupCache`] and
//! matched in memory. Hierarchy links are looked up against live units.

use std::collections::HashMap;

use statreg_core::error::StoreError;
use statreg_core::reference::{non_blank, CodeRef, CodeRow, CodeTable};
use statreg_core::store::UnitStore;
use statreg_core::unit::{LinkRef, StatUnit, UnitType};

use crate::error::RecordError;

// ---------------------------------------------------------------------------
// Lookup cache
// ---------------------------------------------------------------------------

/// Every code table, loaded once.
#[derive(Debug, Clone, Default)]
pub struct LookupCache {
    tables: HashMap<CodeTable, Vec<CodeRow>>,
}

impl LookupCache {
    pub async fn load(store: &dyn UnitStore) -> Result<Self, StoreError> {
        let mut tables = HashMap::new();
        for table in CodeTable::ALL {
            tables.insert(table, store.load_code_table(table).await?);
        }
        tracing::debug!(tables = tables.len(), "Lookup tables loaded");
        Ok(Self { tables })
    }

    pub fn from_tables(tables: impl IntoIterator<Item = (CodeTable, Vec<CodeRow>)>) -> Self {
        Self {
            tables: tables.into_iter().collect(),
        }
    }

    fn rows(&self, table: CodeTable) -> &[CodeRow] {
        self.tables.get(&table).map(Vec::as_slice).unwrap_or_default()
    }

    /// Live row with exactly this code.
    pub fn by_code(&self, table: CodeTable, code: &str) -> Option<CodeRef> {
        self.rows(table)
            .iter()
            .find(|r| !r.is_deleted && r.code == code)
            .map(CodeRow::to_ref)
    }

    /// Resolve a stub against `table`.
    ///
    /// Every supplied field (id, code, name) must match the same live row.
    /// A name matches the row's name or any of its alternate names. Blank
    /// stubs resolve to `Ok(None)`.
    pub fn resolve(
        &self,
        table: CodeTable,
        field: &str,
        stub: &CodeRef,
    ) -> Result<Option<CodeRef>, RecordError> {
        let code = non_blank(&stub.code);
        let name = non_blank(&stub.name);
        if stub.id <= 0 && code.is_none() && name.is_none() {
            return Ok(None);
        }

        self.rows(table)
            .iter()
            .filter(|r| !r.is_deleted)
            .find(|r| {
                (stub.id <= 0 || r.id == stub.id)
                    && code.map_or(true, |c| r.code == c)
                    && name.map_or(true, |n| r.name == n || r.alt_names.iter().any(|a| a == n))
            })
            .map(|r| Some(r.to_ref()))
            .ok_or_else(|| {
                RecordError::not_found(
                    field,
                    format!(
                        "{} by: `{}` code or `{}` name not found",
                        table.label(),
                        code.unwrap_or_default(),
                        name.unwrap_or_default()
                    ),
                )
            })
    }

    /// Resolve `stub` in place; blank stubs are reset to the empty reference.
    ///
    /// A reference that already carries an id is kept as it is. Mapping
    /// resets the id of every reference it writes a code or name into, so
    /// only fresh stubs are looked up and a persisted reference to an
    /// archived row survives edits that do not touch it.
    fn resolve_in_place(
        &self,
        table: CodeTable,
        field: &str,
        stub: &mut CodeRef,
    ) -> Result<(), RecordError> {
        if stub.id > 0 {
            return Ok(());
        }
        *stub = self.resolve(table, field, stub)?.unwrap_or_default();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves every reference a mapped unit carries.
pub struct Resolver<'a> {
    cache: &'a LookupCache,
    store: &'a dyn UnitStore,
}

impl<'a> Resolver<'a> {
    pub fn new(cache: &'a LookupCache, store: &'a dyn UnitStore) -> Self {
        Self { cache, store }
    }

    /// Resolve the code-table stubs on a unit: its own references, address
    /// regions, activity categories, person nationality and role, and the
    /// foreign-participation country list.
    pub fn resolve_codes(&self, unit: &mut StatUnit) -> Result<(), RecordError> {
        let cache = self.cache;
        let own = [
            ("RegistrationReason", CodeTable::RegistrationReason, &mut unit.registration_reason),
            ("ReorgType", CodeTable::ReorgType, &mut unit.reorg_type),
            (
                "DataSourceClassification",
                CodeTable::DataSourceClassification,
                &mut unit.data_source_classification,
            ),
            ("Size", CodeTable::UnitSize, &mut unit.size),
            ("UnitStatus", CodeTable::UnitStatus, &mut unit.unit_status),
            ("LegalForm", CodeTable::LegalForm, &mut unit.legal_form),
            ("InstSectorCode", CodeTable::SectorCode, &mut unit.inst_sector_code),
            ("ForeignParticipation", CodeTable::ForeignParticipation, &mut unit.foreign_participation),
            ("ForeignParticipationCountry", CodeTable::Country, &mut unit.foreign_participation_country),
        ];
        for (field, table, stub) in own {
            cache.resolve_in_place(table, field, stub)?;
        }

        for (field, address) in [
            ("Address.Region", &mut unit.address),
            ("ActualAddress.Region", &mut unit.actual_address),
            ("PostalAddress.Region", &mut unit.postal_address),
        ] {
            if let Some(address) = address {
                cache.resolve_in_place(CodeTable::Region, field, &mut address.region)?;
            }
        }

        for activity in &mut unit.activities {
            cache.resolve_in_place(
                CodeTable::ActivityCategory,
                "Activities.ActivityCategory",
                &mut activity.category,
            )?;
        }

        for person in &mut unit.persons {
            cache.resolve_in_place(CodeTable::Country, "Persons.NationalityCode", &mut person.nationality)?;
            cache.resolve_in_place(CodeTable::PersonType, "Persons.Role", &mut person.role)?;
        }

        for country in &mut unit.foreign_participation_countries {
            cache.resolve_in_place(CodeTable::Country, "ForeignParticipationCountries", country)?;
        }
        unit.foreign_participation_countries.retain(|c| c.id > 0);
        unit.foreign_participation_countries.dedup_by_key(|c| c.id);
        Ok(())
    }

    /// Live unit of `unit_type` addressed by `key`: StatId first, then RegId.
    pub async fn find_unit(
        &self,
        unit_type: UnitType,
        key: &str,
    ) -> Result<Option<StatUnit>, StoreError> {
        if let Some(unit) = self.store.find_by_stat_id(unit_type, key).await? {
            return Ok(Some(unit));
        }
        match key.trim().parse() {
            Ok(reg_id) => self.store.find_by_reg_id(unit_type, reg_id).await,
            Err(_) => Ok(None),
        }
    }

    /// Resolve the unit's textual upward link. An unresolvable key clears
    /// the link and yields a warning message.
    pub async fn resolve_link(&self, unit: &mut StatUnit) -> Result<Option<String>, RecordError> {
        let (Some(parent_type), Some(LinkRef::Key(key))) =
            (unit.unit_type.parent(), unit.parent_link().cloned())
        else {
            return Ok(None);
        };

        match self.find_unit(parent_type, &key).await? {
            Some(parent) if !parent.is_deleted => {
                unit.set_parent_link(Some(LinkRef::RegId(parent.reg_id)));
                Ok(None)
            }
            _ => {
                unit.set_parent_link(None);
                Ok(Some(format!("{parent_type} `{key}` not found, link left empty")))
            }
        }
    }
}
