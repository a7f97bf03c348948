use super::{RawItem, RawRecord, RawValue};
use crate::data_source::FieldMapping;
use crate::mapping::is_list_target;

/// Record keys feeding a list-typed target (activities, persons, ...).
fn group_columns(record: &RawRecord, mapping: &FieldMapping) -> Vec<String> {
    mapping
        .pairs
        .iter()
        .filter(|p| is_list_target(p.target_head()))
        .filter_map(|p| match p.source.parse::<usize>() {
            Ok(index) => record.key_at(index).map(str::to_string),
            Err(_) => p.source.split('.').next().map(str::to_string),
        })
        .collect()
}

/// The non-group scalar columns that identify a unit across lines.
fn signature<'a>(record: &'a RawRecord, groups: &[String]) -> Vec<(&'a str, &'a str)> {
    record
        .iter()
        .filter(|(k, _)| !groups.iter().any(|g| g == k))
        .map(|(k, v)| (k, v.as_scalar().unwrap_or_default()))
        .collect()
}

fn push_line_items(target: &mut RawRecord, line: &RawRecord, groups: &[String]) {
    let blank_line = groups
        .iter()
        .all(|g| line.scalar(g).map_or(true, |v| v.trim().is_empty()));
    for column in groups {
        let mut items = match target.get(column) {
            Some(RawValue::Group(items)) => items.clone(),
            _ => Vec::new(),
        };
        if !blank_line {
            let value = line.scalar(column).unwrap_or_default().to_string();
            let mut fields = RawRecord::new();
            fields.push(column.clone(), RawValue::Scalar(value));
            items.push(RawItem {
                tag: column.clone(),
                fields,
            });
        }
        target.insert(column.clone(), RawValue::Group(items));
    }
}

/// Fold consecutive CSV lines describing the same unit into one record.
///
/// Lines belong to the same unit when every column not mapped to a list
/// target is equal. Each list-mapped column of the folded record becomes a
/// group with one item per line; lines whose list columns are all blank add
/// no items. Item `i` of every column comes from the same line.
pub fn fold_continuation_rows(records: Vec<RawRecord>, mapping: &FieldMapping) -> Vec<RawRecord> {
    let Some(first) = records.first() else {
        return records;
    };
    let groups = group_columns(first, mapping);
    if groups.is_empty() {
        return records;
    }

    let mut folded: Vec<RawRecord> = Vec::new();
    for line in &records {
        let continues = folded
            .last()
            .is_some_and(|last| signature(last, &groups) == signature(line, &groups));
        if !continues {
            let mut head = line.clone();
            for column in &groups {
                head.insert(column.clone(), RawValue::Group(Vec::new()));
            }
            folded.push(head);
        }
        if let Some(last) = folded.last_mut() {
            push_line_items(last, line, &groups);
        }
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{read_csv, CsvOptions};

    fn mapping() -> FieldMapping {
        FieldMapping::parse(
            "StatId-StatId,Name-Name,ActCode-Activities.Activity.ActivityCategory.Code,ActYear-Activities.Activity.ActivityYear",
        )
        .unwrap()
    }

    fn group_values(record: &RawRecord, column: &str) -> Vec<String> {
        match record.get(column) {
            Some(RawValue::Group(items)) => items
                .iter()
                .map(|i| i.fields.scalar(column).unwrap_or_default().to_string())
                .collect(),
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn consecutive_lines_fold_into_one_record() {
        let text = "StatId,Name,ActCode,ActYear\n\
                    1,Acme,62.02,2019\n\
                    1,Acme,70.22,\n\
                    2,Beta,01.11,2020\n";
        let records = read_csv(text.as_bytes(), &CsvOptions::default()).unwrap();
        let folded = fold_continuation_rows(records, &mapping());
        assert_eq!(folded.len(), 2);
        assert_eq!(group_values(&folded[0], "ActCode"), vec!["62.02", "70.22"]);
        assert_eq!(group_values(&folded[0], "ActYear"), vec!["2019", ""]);
        assert_eq!(group_values(&folded[1], "ActCode"), vec!["01.11"]);
    }

    #[test]
    fn blank_group_lines_add_no_items() {
        let text = "StatId,Name,ActCode,ActYear\n1,Acme,,\n1,Acme,62.02,2019\n";
        let records = read_csv(text.as_bytes(), &CsvOptions::default()).unwrap();
        let folded = fold_continuation_rows(records, &mapping());
        assert_eq!(folded.len(), 1);
        assert_eq!(group_values(&folded[0], "ActCode"), vec!["62.02"]);
    }

    #[test]
    fn mapping_without_list_targets_is_untouched() {
        let text = "StatId,Name\n1,Acme\n1,Acme\n";
        let records = read_csv(text.as_bytes(), &CsvOptions::default()).unwrap();
        let m = FieldMapping::parse("StatId-StatId,Name-Name").unwrap();
        assert_eq!(fold_continuation_rows(records.clone(), &m), records);
    }
}
