//! Mapping engine: applies a field mapping to a unit from one raw record.
//!
//! Target paths are dotted (`Address.Region.Code`,
//! `Activities.Activity.ActivityCategory.Code`). Pairs are aggregated per
//! top-level segment before dispatch:
//!
//! - list targets (`Activities`, `Persons`, `ForeignParticipationCountries`)
//!   append new child items, one per source item;
//! - nested stub targets (addresses and code-table references) merge into
//!   the unit's existing stub;
//! - hierarchy link properties become unresolved [`LinkRef::Key`] values;
//! - everything else is coerced to the scalar field's type.
//!
//! Missing or blank source values leave the target untouched, so the same
//! engine serves both create and edit-merge.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::data_source::{FieldMapping, MappingPair};
use crate::error::MappingError;
use crate::extraction::{RawRecord, RawValue};
use crate::links::link_for_field;
use crate::reference::{Activity, ActivityType, Address, CodeRef, Person};
use crate::types::Date;
use crate::unit::{LinkRef, StatUnit, UnitType};

// ── Target classification ────────────────────────────────────────────

const ACTIVITIES: &str = "Activities";
const PERSONS: &str = "Persons";
const COUNTRIES: &str = "ForeignParticipationCountries";
const COUNTRIES_UNITS: &str = "ForeignParticipationCountriesUnits";

/// Top-level targets holding a list of child items.
pub fn is_list_target(head: &str) -> bool {
    matches!(head, ACTIVITIES | PERSONS | COUNTRIES | COUNTRIES_UNITS)
}

const ADDRESS_TARGETS: [&str; 3] = ["Address", "ActualAddress", "PostalAddress"];

fn code_ref_target<'a>(unit: &'a mut StatUnit, head: &str) -> Option<&'a mut CodeRef> {
    let r = match head {
        "ForeignParticipationCountry" => &mut unit.foreign_participation_country,
        "LegalForm" => &mut unit.legal_form,
        "InstSectorCode" => &mut unit.inst_sector_code,
        "DataSourceClassification" => &mut unit.data_source_classification,
        "Size" => &mut unit.size,
        "UnitStatus" => &mut unit.unit_status,
        "ReorgType" => &mut unit.reorg_type,
        "RegistrationReason" => &mut unit.registration_reason,
        "ForeignParticipation" => &mut unit.foreign_participation,
        _ => return None,
    };
    Some(r)
}

fn address_target<'a>(unit: &'a mut StatUnit, head: &str) -> Option<&'a mut Option<Address>> {
    match head {
        "Address" => Some(&mut unit.address),
        "ActualAddress" => Some(&mut unit.actual_address),
        "PostalAddress" => Some(&mut unit.postal_address),
        _ => None,
    }
}

// ── Source lookup ────────────────────────────────────────────────────

/// Value(s) found for one mapping source.
#[derive(Debug)]
enum SourceValue<'a> {
    One(&'a str),
    /// One entry per repeated-group item; blank entries keep item positions.
    Many(Vec<&'a str>),
}

impl<'a> SourceValue<'a> {
    fn first(&self) -> Option<&'a str> {
        match self {
            Self::One(v) => Some(v),
            Self::Many(vs) => vs.iter().copied().find(|v| !v.trim().is_empty()),
        }
    }
}

/// Resolve a mapping source against a record.
///
/// A numeric source addresses a column by position. Otherwise the first
/// segment keys the record; when that value is a group, an optional middle
/// segment filters items by tag and the last segment is looked up per item.
fn lookup<'a>(record: &'a RawRecord, source: &str) -> Option<SourceValue<'a>> {
    let (value, segments): (&RawValue, Vec<&str>) = match source.trim().parse::<usize>() {
        Ok(index) => (record.get_index(index)?, Vec::new()),
        Err(_) => {
            let segments: Vec<&str> = source.split('.').collect();
            (record.get(segments[0])?, segments)
        }
    };

    match value {
        RawValue::Scalar(s) => Some(SourceValue::One(s)),
        RawValue::Group(items) => {
            let leaf = match segments.last() {
                Some(last) => *last,
                None => record_key_for_index(record, source)?,
            };
            let tag = (segments.len() >= 3).then(|| segments[1]);
            let values = items
                .iter()
                .filter(|item| tag.map_or(true, |t| item.tag == t))
                .map(|item| item.fields.scalar(leaf).unwrap_or_default())
                .collect();
            Some(SourceValue::Many(values))
        }
    }
}

fn record_key_for_index<'a>(record: &'a RawRecord, source: &str) -> Option<&'a str> {
    source.trim().parse::<usize>().ok().and_then(|i| record.key_at(i))
}

// ── Scalar coercion ──────────────────────────────────────────────────

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%m/%d/%Y", "%Y%m%d"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%d.%m.%Y %H:%M:%S"];

/// Parse a date, or `None` when no supported format matches.
pub fn lenient_date(value: &str) -> Option<Date> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(value, f).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(value, f).ok())
                .map(|dt| dt.date())
        })
}

fn lenient_int(value: &str) -> Option<i32> {
    value.trim().parse().ok()
}

fn lenient_float(value: &str) -> Option<f64> {
    value.trim().replace(',', ".").parse().ok()
}

fn lenient_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn strict_int(target: &str, value: &str) -> Result<i32, MappingError> {
    let v = value.trim();
    if let Ok(n) = v.parse::<i32>() {
        return Ok(n);
    }
    match v.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f.abs() <= i32::MAX as f64 => Ok(f as i32),
        _ => Err(MappingError::BadValue {
            target: target.to_string(),
            value: value.to_string(),
            reason: "expected an integer".into(),
        }),
    }
}

fn strict_float(target: &str, value: &str) -> Result<f64, MappingError> {
    lenient_float(value)
        .filter(|f| f.is_finite())
        .ok_or_else(|| MappingError::BadValue {
            target: target.to_string(),
            value: value.to_string(),
            reason: "expected a number".into(),
        })
}

fn text(value: &str) -> Option<String> {
    Some(value.trim().to_string())
}

/// Set one scalar property by name.
fn set_scalar(unit: &mut StatUnit, target: &str, v: &str) -> Result<(), MappingError> {
    match target {
        "StatId" => unit.stat_id = text(v),
        "StatIdDate" => unit.stat_id_date = lenient_date(v),
        "Name" => unit.name = text(v),
        "ShortName" => unit.short_name = text(v),
        "TaxRegId" => unit.tax_reg_id = text(v),
        "TaxRegDate" => unit.tax_reg_date = lenient_date(v),
        "ExternalId" => unit.external_id = text(v),
        "ExternalIdType" => unit.external_id_type = lenient_int(v),
        "ExternalIdDate" => unit.external_id_date = lenient_date(v),
        "RegistrationDate" => unit.registration_date = lenient_date(v),
        "ContactPerson" => unit.contact_person = text(v),
        "TelephoneNo" => unit.telephone_no = text(v),
        "EmailAddress" => unit.email_address = text(v),
        "WebAddress" => unit.web_address = text(v),
        "Employees" => unit.employees = Some(strict_int(target, v)?),
        "EmployeesYear" => unit.employees_year = lenient_int(v),
        "EmployeesDate" => unit.employees_date = lenient_date(v),
        "Turnover" => unit.turnover = Some(strict_float(target, v)?),
        "TurnoverYear" => unit.turnover_year = lenient_int(v),
        "TurnoverDate" => unit.turnover_date = lenient_date(v),
        "NumOfPeopleEmp" => unit.num_of_people_emp = Some(strict_int(target, v)?),
        "StatusDate" => unit.status_date = lenient_date(v),
        "Notes" => unit.notes = text(v),
        "FreeEconZone" => unit.free_econ_zone = lenient_bool(v).unwrap_or(false),
        "Classified" => unit.classified = lenient_bool(v),
        "ReorgDate" => unit.reorg_date = lenient_date(v),
        "ReorgReferences" => unit.reorg_references = lenient_int(v),
        "SuspensionStart" => unit.suspension_start = lenient_date(v),
        "SuspensionEnd" => unit.suspension_end = lenient_date(v),
        "LiqDate" => unit.liq_date = lenient_date(v),
        "LiqReason" => unit.liq_reason = text(v),
        "DataSource" => unit.data_source = text(v),
        "Market" if unit.unit_type == UnitType::LegalUnit => unit.market = lenient_bool(v),
        "Commercial" if unit.unit_type == UnitType::EnterpriseUnit => {
            unit.commercial = lenient_bool(v)
        }
        _ => return Err(MappingError::UnsupportedProperty(target.to_string())),
    }
    Ok(())
}

// ── Nested stubs ─────────────────────────────────────────────────────

fn set_address_field(
    address: &mut Address,
    field: &str,
    value: &str,
    target: &str,
) -> Result<(), MappingError> {
    match field {
        "AddressPart1" => address.address_part1 = text(value),
        "AddressPart2" => address.address_part2 = text(value),
        "AddressPart3" => address.address_part3 = text(value),
        "Latitude" => address.latitude = lenient_float(value),
        "Longitude" => address.longitude = lenient_float(value),
        "Region" => address.region.code = text(value),
        _ => match field.strip_prefix("Region.") {
            Some(sub) if address.region.set_field(sub, value.trim()) => {}
            _ => return Err(MappingError::UnsupportedProperty(target.to_string())),
        },
    }
    Ok(())
}

fn set_code_field(r: &mut CodeRef, field: &str, value: &str, target: &str) -> Result<(), MappingError> {
    let field = if field.is_empty() { "Code" } else { field };
    if r.set_field(field, value.trim()) {
        Ok(())
    } else {
        Err(MappingError::UnsupportedProperty(target.to_string()))
    }
}

// ── List items ───────────────────────────────────────────────────────

/// Field path of a list item with the list head and the optional item tag
/// stripped: `Activities.Activity.ActivityYear` → `ActivityYear`.
fn item_field<'a>(target: &'a str, head: &str) -> &'a str {
    let rest = target
        .strip_prefix(head)
        .and_then(|r| r.strip_prefix('.'))
        .unwrap_or("");
    for tag in ["Activity.", "Person.", "Country.", "CountryStatisticalUnit."] {
        if let Some(r) = rest.strip_prefix(tag) {
            return r;
        }
    }
    rest
}

/// Returns whether the activity type was set explicitly.
fn set_activity_field(
    activity: &mut Activity,
    field: &str,
    value: &str,
    target: &str,
) -> Result<bool, MappingError> {
    match field {
        "ActivityCategory" | "ActivityCategory.Code" | "CategoryCode" => {
            activity.category.code = text(value)
        }
        "ActivityCategory.Name" => activity.category.name = text(value),
        "ActivityCategory.Id" => activity.category.id = value.trim().parse().unwrap_or(0),
        "ActivityYear" => activity.activity_year = lenient_int(value),
        "Employees" => activity.employees = Some(strict_int(target, value)?),
        "Turnover" => activity.turnover = Some(strict_float(target, value)?),
        "ActivityType" => {
            activity.activity_type =
                ActivityType::parse(value).ok_or_else(|| MappingError::BadValue {
                    target: target.to_string(),
                    value: value.to_string(),
                    reason: "expected Primary, Secondary or Ancillary".into(),
                })?;
            return Ok(true);
        }
        _ => return Err(MappingError::UnsupportedProperty(target.to_string())),
    }
    Ok(false)
}

fn set_person_field(person: &mut Person, field: &str, value: &str, target: &str) -> Result<(), MappingError> {
    match field {
        "GivenName" => person.given_name = text(value),
        "Surname" => person.surname = text(value),
        "MiddleName" => person.middle_name = text(value),
        "PersonalId" => person.personal_id = text(value),
        "BirthDate" => person.birth_date = lenient_date(value),
        "Sex" => person.sex = value.trim().parse().ok(),
        "PhoneNumber" => person.phone_number = text(value),
        "Address" => person.address = text(value),
        "NationalityCode" | "NationalityCode.Code" => person.nationality.code = text(value),
        "NationalityCode.Name" => person.nationality.name = text(value),
        "Role" | "Role.Name" => person.role.name = text(value),
        "Role.Code" => person.role.code = text(value),
        _ => return Err(MappingError::UnsupportedProperty(target.to_string())),
    }
    Ok(())
}

/// Add an activity, keeping at most one primary activity: a newer (or
/// same-year) primary replaces the held one, an older one is dropped.
fn add_activity(unit: &mut StatUnit, activity: Activity) {
    if activity.activity_type == ActivityType::Primary {
        if let Some(pos) = unit
            .activities
            .iter()
            .position(|a| a.activity_type == ActivityType::Primary)
        {
            if activity.activity_year < unit.activities[pos].activity_year {
                return;
            }
            unit.activities.remove(pos);
        }
    }
    unit.activities.push(activity);
}

/// Field/value pairs of one list item, in mapping order.
type ItemFields<'a> = Vec<(&'a MappingPair, &'a str)>;

fn collect_items<'a>(entries: &[(&'a MappingPair, SourceValue<'a>)]) -> Vec<ItemFields<'a>> {
    let mut items: Vec<ItemFields<'a>> = Vec::new();
    for (pair, value) in entries {
        let values: Vec<&str> = match value {
            SourceValue::One(v) => vec![*v],
            SourceValue::Many(vs) => vs.clone(),
        };
        for (i, v) in values.into_iter().enumerate() {
            if items.len() <= i {
                items.resize_with(i + 1, Vec::new);
            }
            items[i].push((*pair, v));
        }
    }
    items
        .into_iter()
        .filter(|fields| fields.iter().any(|(_, v)| !v.trim().is_empty()))
        .collect()
}

fn apply_list(
    unit: &mut StatUnit,
    head: &str,
    entries: &[(&MappingPair, SourceValue<'_>)],
) -> Result<(), MappingError> {
    if !unit.unit_type.has_children_lists() {
        let target = entries.first().map_or(head, |(p, _)| p.target.as_str());
        return Err(MappingError::UnsupportedProperty(target.to_string()));
    }

    for (index, fields) in collect_items(entries).into_iter().enumerate() {
        match head {
            ACTIVITIES => {
                let mut activity = Activity::default();
                let mut typed = false;
                for (pair, v) in fields.iter().filter(|(_, v)| !v.trim().is_empty()) {
                    typed |= set_activity_field(&mut activity, item_field(&pair.target, head), v, &pair.target)?;
                }
                if !typed {
                    activity.activity_type = if index == 0 {
                        ActivityType::Primary
                    } else {
                        ActivityType::Secondary
                    };
                }
                if !activity.category.is_blank() || activity.category.id > 0 {
                    add_activity(unit, activity);
                }
            }
            PERSONS => {
                let mut person = Person::default();
                for (pair, v) in fields.iter().filter(|(_, v)| !v.trim().is_empty()) {
                    set_person_field(&mut person, item_field(&pair.target, head), v, &pair.target)?;
                }
                unit.persons.push(person);
            }
            _ => {
                let mut country = CodeRef::default();
                for (pair, v) in fields.iter().filter(|(_, v)| !v.trim().is_empty()) {
                    set_code_field(&mut country, item_field(&pair.target, head), v, &pair.target)?;
                }
                if !country.is_blank() || country.id > 0 {
                    unit.foreign_participation_countries.push(country);
                }
            }
        }
    }
    Ok(())
}

// ── Entry point ──────────────────────────────────────────────────────

/// Apply `mapping` to `unit` using values from `record`.
pub fn apply_mapping(
    record: &RawRecord,
    mapping: &FieldMapping,
    unit: &mut StatUnit,
) -> Result<(), MappingError> {
    // Aggregate per top-level target segment, keeping first-seen order.
    let mut groups: Vec<(&str, Vec<(&MappingPair, SourceValue<'_>)>)> = Vec::new();
    for pair in &mapping.pairs {
        let Some(value) = lookup(record, &pair.source) else {
            continue;
        };
        let head = pair.target_head();
        match groups.iter_mut().find(|(h, _)| *h == head) {
            Some((_, entries)) => entries.push((pair, value)),
            None => groups.push((head, vec![(pair, value)])),
        }
    }

    for (head, entries) in groups {
        if is_list_target(head) {
            apply_list(unit, head, &entries)?;
            continue;
        }

        for (pair, value) in &entries {
            let Some(v) = value.first().filter(|v| !v.trim().is_empty()) else {
                continue;
            };
            let tail = pair
                .target
                .strip_prefix(head)
                .and_then(|t| t.strip_prefix('.'))
                .unwrap_or("");

            if ADDRESS_TARGETS.contains(&head) {
                if let Some(slot) = address_target(unit, head) {
                    let address = slot.get_or_insert_with(Address::default);
                    // Changed content is a different row; the builder finds
                    // the persisted one again if the content is unchanged.
                    address.id = 0;
                    set_address_field(address, tail, v, &pair.target)?;
                }
            } else if let Some(r) = code_ref_target(unit, head) {
                set_code_field(r, tail, v, &pair.target)?;
            } else if let Some(spec) = link_for_field(head) {
                if spec.child != unit.unit_type || !tail.is_empty() {
                    return Err(MappingError::UnsupportedProperty(pair.target.clone()));
                }
                spec.create(unit, LinkRef::Key(v.trim().to_string()));
            } else if tail.is_empty() {
                set_scalar(unit, head, v)?;
            } else {
                return Err(MappingError::UnsupportedProperty(pair.target.clone()));
            }
        }
    }
    Ok(())
}

/// First non-blank value a record holds for `source`.
pub fn record_value<'a>(record: &'a RawRecord, source: &str) -> Option<&'a str> {
    lookup(record, source)?
        .first()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The StatId a record carries under `mapping`, if any.
pub fn record_stat_id<'a>(record: &'a RawRecord, mapping: &FieldMapping) -> Option<&'a str> {
    record_value(record, mapping.stat_id_source()?)
}

/// Textual keys of the hierarchy links a record sets under `mapping`.
pub fn record_link_keys<'a>(record: &'a RawRecord, mapping: &FieldMapping) -> Vec<&'a str> {
    mapping
        .pairs
        .iter()
        .filter(|p| link_for_field(&p.target).is_some())
        .filter_map(|p| record_value(record, &p.source))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{read_xml, RawItem};
    use crate::data_source::MappingPair;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn csv_row(values: &[&str]) -> RawRecord {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("c{i}"), RawValue::scalar(*v)))
            .collect()
    }

    fn positional(pairs: &[(usize, &str)]) -> FieldMapping {
        FieldMapping::new(
            pairs
                .iter()
                .map(|(i, t)| MappingPair::new(i.to_string(), *t))
                .collect(),
        )
    }

    fn legal_unit() -> StatUnit {
        StatUnit::new(UnitType::LegalUnit, Utc::now())
    }

    #[test]
    fn positional_csv_row_into_empty_legal_unit() {
        let record = csv_row(&["2024-Q1", "ENT001", "Acme Co", "41701"]);
        let mapping = positional(&[
            (0, "RegistrationDate"),
            (1, "StatId"),
            (2, "Name"),
            (3, "Address.Region.Code"),
        ]);
        let mut unit = legal_unit();
        apply_mapping(&record, &mapping, &mut unit).unwrap();

        assert_eq!(unit.name.as_deref(), Some("Acme Co"));
        assert_eq!(unit.stat_id.as_deref(), Some("ENT001"));
        // Unparseable dates fall back to no value.
        assert_eq!(unit.registration_date, None);
        let region = &unit.address.as_ref().unwrap().region;
        assert_eq!(region.code.as_deref(), Some("41701"));
        assert!(region.is_stub());
    }

    #[test]
    fn missing_sources_leave_fields_untouched() {
        let mut unit = legal_unit();
        unit.name = Some("Kept".into());
        unit.short_name = Some("K".into());
        let record: RawRecord = [("ShortName", RawValue::scalar(""))].into_iter().collect();
        let mapping = FieldMapping::parse("Name-Name,ShortName-ShortName").unwrap();
        apply_mapping(&record, &mapping, &mut unit).unwrap();
        assert_eq!(unit.name.as_deref(), Some("Kept"));
        assert_eq!(unit.short_name.as_deref(), Some("K"));
    }

    #[test]
    fn unknown_target_is_unsupported() {
        let record = csv_row(&["x"]);
        let mapping = positional(&[(0, "Colour")]);
        assert_matches!(
            apply_mapping(&record, &mapping, &mut legal_unit()),
            Err(MappingError::UnsupportedProperty(t)) if t == "Colour"
        );

        let mapping = positional(&[(0, "Address.Colour")]);
        assert_matches!(
            apply_mapping(&record, &mapping, &mut legal_unit()),
            Err(MappingError::UnsupportedProperty(t)) if t == "Address.Colour"
        );
    }

    #[test]
    fn business_measures_are_validated() {
        let record = csv_row(&["ten"]);
        let mapping = positional(&[(0, "Employees")]);
        assert_matches!(
            apply_mapping(&record, &mapping, &mut legal_unit()),
            Err(MappingError::BadValue { target, .. }) if target == "Employees"
        );

        let record = csv_row(&["12.5"]);
        let mapping = positional(&[(0, "Turnover")]);
        let mut unit = legal_unit();
        apply_mapping(&record, &mapping, &mut unit).unwrap();
        assert_eq!(unit.turnover, Some(12.5));
    }

    #[test]
    fn lenient_fields_fall_back_to_zero_value() {
        let record = csv_row(&["soon", "maybe", "2023"]);
        let mapping = positional(&[(0, "TaxRegDate"), (1, "FreeEconZone"), (2, "EmployeesYear")]);
        let mut unit = legal_unit();
        unit.free_econ_zone = true;
        apply_mapping(&record, &mapping, &mut unit).unwrap();
        assert_eq!(unit.tax_reg_date, None);
        assert!(!unit.free_econ_zone);
        assert_eq!(unit.employees_year, Some(2023));
    }

    #[test]
    fn date_formats() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 9);
        assert_eq!(lenient_date("2021-03-09"), expected);
        assert_eq!(lenient_date("09.03.2021"), expected);
        assert_eq!(lenient_date("2021-03-09T10:00:00"), expected);
        assert_eq!(lenient_date("2021-03-09T10:00:00+06:00"), expected);
        assert_eq!(lenient_date("2024-Q1"), None);
    }

    #[test]
    fn link_properties_become_unresolved_keys() {
        let record = csv_row(&["ENT-9"]);
        let mapping = positional(&[(0, "EnterpriseUnitRegId")]);
        let mut unit = legal_unit();
        apply_mapping(&record, &mapping, &mut unit).unwrap();
        assert_eq!(unit.enterprise_unit, Some(LinkRef::Key("ENT-9".into())));

        let mapping = positional(&[(0, "LegalUnitId")]);
        assert_matches!(
            apply_mapping(&record, &mapping, &mut legal_unit()),
            Err(MappingError::UnsupportedProperty(_))
        );
    }

    #[test]
    fn xml_groups_append_activities() {
        let xml = "<LegalUnit><StatId>1</StatId><Activities>\
                   <Activity><ActivityYear>2019</ActivityYear><CategoryCode>62.020</CategoryCode><Employees>100</Employees></Activity>\
                   <Activity><CategoryCode>70.220</CategoryCode></Activity>\
                   <Activity><Employees>3</Employees></Activity>\
                   </Activities></LegalUnit>";
        let record = read_xml(xml.as_bytes()).unwrap().remove(0);
        let mapping = FieldMapping::parse(
            "StatId-StatId,\
             Activities.Activity.ActivityYear-Activities.Activity.ActivityYear,\
             Activities.Activity.CategoryCode-Activities.Activity.ActivityCategory.Code,\
             Activities.Activity.Employees-Activities.Activity.Employees",
        )
        .unwrap();
        let mut unit = legal_unit();
        apply_mapping(&record, &mapping, &mut unit).unwrap();

        // The third item has no category and is dropped.
        assert_eq!(unit.activities.len(), 2);
        let first = &unit.activities[0];
        assert_eq!(first.activity_type, ActivityType::Primary);
        assert_eq!(first.category.code.as_deref(), Some("62.020"));
        assert_eq!(first.activity_year, Some(2019));
        assert_eq!(first.employees, Some(100));
        assert_eq!(unit.activities[1].activity_type, ActivityType::Secondary);
        assert_eq!(unit.activities[1].employees, None);
    }

    #[test]
    fn newer_primary_activity_replaces_older() {
        let mut unit = legal_unit();
        unit.activities.push(Activity {
            id: 4,
            activity_type: ActivityType::Primary,
            activity_year: Some(2018),
            category: CodeRef::by_code("01.11"),
            ..Default::default()
        });
        let record = csv_row(&["62.02", "2020"]);
        let mapping = positional(&[
            (0, "Activities.Activity.ActivityCategory.Code"),
            (1, "Activities.Activity.ActivityYear"),
        ]);
        apply_mapping(&record, &mapping, &mut unit).unwrap();
        assert_eq!(unit.activities.len(), 1);
        assert_eq!(unit.activities[0].category.code.as_deref(), Some("62.02"));

        // An older primary does not displace the held one.
        let record = csv_row(&["10.10", "2015"]);
        apply_mapping(&record, &mapping, &mut unit).unwrap();
        assert_eq!(unit.activities.len(), 1);
        assert_eq!(unit.activities[0].activity_year, Some(2020));
    }

    #[test]
    fn reapplying_to_list_targets_is_not_idempotent() {
        let record = csv_row(&["Ann", "Lee"]);
        let mapping = positional(&[
            (0, "Persons.Person.GivenName"),
            (1, "Persons.Person.Surname"),
        ]);
        let mut unit = legal_unit();
        apply_mapping(&record, &mapping, &mut unit).unwrap();
        apply_mapping(&record, &mapping, &mut unit).unwrap();
        assert_eq!(unit.persons.len(), 2);
        assert_eq!(unit.persons[0], unit.persons[1]);
    }

    #[test]
    fn folded_groups_align_by_item() {
        let item = |k: &str, v: &str| RawItem {
            tag: k.to_string(),
            fields: [(k, RawValue::scalar(v))].into_iter().collect(),
        };
        let record: RawRecord = [
            ("StatId", RawValue::scalar("1")),
            ("Code", RawValue::Group(vec![item("Code", "A"), item("Code", "B")])),
            ("Year", RawValue::Group(vec![item("Year", ""), item("Year", "2021")])),
        ]
        .into_iter()
        .collect();
        let mapping = FieldMapping::parse(
            "Code-Activities.Activity.ActivityCategory.Code,Year-Activities.Activity.ActivityYear",
        )
        .unwrap();
        let mut unit = legal_unit();
        apply_mapping(&record, &mapping, &mut unit).unwrap();
        assert_eq!(unit.activities.len(), 2);
        assert_eq!(unit.activities[0].activity_year, None);
        assert_eq!(unit.activities[1].activity_year, Some(2021));
    }

    #[test]
    fn groups_reject_list_targets() {
        let record = csv_row(&["62.02"]);
        let mapping = positional(&[(0, "Activities.Activity.ActivityCategory.Code")]);
        let mut group = StatUnit::new(UnitType::EnterpriseGroup, Utc::now());
        assert_matches!(
            apply_mapping(&record, &mapping, &mut group),
            Err(MappingError::UnsupportedProperty(_))
        );
    }

    #[test]
    fn stub_targets_merge_into_existing_stub() {
        let mut unit = legal_unit();
        unit.legal_form = CodeRef {
            id: 0,
            code: None,
            name: Some("Limited".into()),
        };
        let record = csv_row(&["LLC", "Bishkek st 1"]);
        let mapping = positional(&[(0, "LegalForm.Code"), (1, "ActualAddress.AddressPart1")]);
        apply_mapping(&record, &mapping, &mut unit).unwrap();
        assert_eq!(unit.legal_form.code.as_deref(), Some("LLC"));
        assert_eq!(unit.legal_form.name.as_deref(), Some("Limited"));
        assert_eq!(
            unit.actual_address.unwrap().address_part1.as_deref(),
            Some("Bishkek st 1")
        );
    }

    #[test]
    fn record_stat_id_uses_mapping_source() {
        let record = csv_row(&["x", " 77 "]);
        let mapping = positional(&[(1, "StatId")]);
        assert_eq!(record_stat_id(&record, &mapping), Some("77"));
        assert_eq!(record_stat_id(&record, &positional(&[(0, "Name")])), None);
    }

    #[test]
    fn link_keys_are_collected() {
        let record = csv_row(&["L1", "ENT9"]);
        let mapping = positional(&[(0, "StatId"), (1, "EnterpriseUnitRegId")]);
        assert_eq!(record_link_keys(&record, &mapping), vec!["ENT9"]);
    }
}
