//! File → raw record extraction.
//!
//! A raw record is an ordered field map whose values are either scalar
//! strings or repeated groups (arrays of sub-records). Both readers parse the
//! whole file before yielding anything, so malformed input fails the job
//! without any record having been processed.

mod continuation;
mod csv_reader;
mod xml_reader;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::ExtractError;

pub use continuation::fold_continuation_rows;
pub use csv_reader::{read_csv, CsvOptions};
pub use xml_reader::read_xml;

// ── Raw values ───────────────────────────────────────────────────────

/// One field value of a raw record.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum RawValue {
    Scalar(String),
    /// Repeated group, e.g. `<Activities><Activity>…</Activity>…</Activities>`.
    Group(Vec<RawItem>),
}

impl RawValue {
    pub fn scalar(value: impl Into<String>) -> Self {
        Self::Scalar(value.into())
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => Some(s),
            Self::Group(_) => None,
        }
    }
}

/// One element of a repeated group.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RawItem {
    pub tag: String,
    pub fields: RawRecord,
}

/// Ordered field map with positional access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    entries: Vec<(String, RawValue)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append without checking for an existing key. Keeps column positions
    /// stable for CSV files with duplicate header names.
    pub fn push(&mut self, key: impl Into<String>, value: RawValue) {
        self.entries.push((key.into(), value));
    }

    /// Replace the value of an existing key, or append.
    pub fn insert(&mut self, key: impl Into<String>, value: RawValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Value at a zero-based column position.
    pub fn get_index(&self, index: usize) -> Option<&RawValue> {
        self.entries.get(index).map(|(_, v)| v)
    }

    pub fn key_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|(k, _)| k.as_str())
    }

    pub fn scalar(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(RawValue::as_scalar)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, RawValue)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, RawValue)>>(iter: I) -> Self {
        let mut record = RawRecord::new();
        for (k, v) in iter {
            record.push(k, v);
        }
        record
    }
}

impl Serialize for RawRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ── File formats ─────────────────────────────────────────────────────

/// Supported upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Xml,
}

impl FileFormat {
    /// Pick the format from a file name's extension.
    pub fn from_file_name(name: &str) -> Result<Self, ExtractError> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("csv") => Ok(Self::Csv),
            Some("xml") => Ok(Self::Xml),
            _ => Err(ExtractError::UnsupportedFormat(name.to_string())),
        }
    }
}

/// Read every raw record from the file at `path`.
pub fn extract_file(
    path: &Path,
    format: FileFormat,
    csv_options: &CsvOptions,
) -> Result<Vec<RawRecord>, ExtractError> {
    let file = File::open(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let reader = BufReader::new(file);
    match format {
        FileFormat::Csv => read_csv(reader, csv_options),
        FileFormat::Xml => read_xml(reader),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn insert_replaces_and_push_appends() {
        let mut r = RawRecord::new();
        r.insert("a", RawValue::scalar("1"));
        r.insert("a", RawValue::scalar("2"));
        r.push("a", RawValue::scalar("3"));
        assert_eq!(r.len(), 2);
        assert_eq!(r.scalar("a"), Some("2"));
        assert_eq!(r.get_index(1).and_then(RawValue::as_scalar), Some("3"));
    }

    #[test]
    fn serializes_as_ordered_object() {
        let r: RawRecord = [("b", RawValue::scalar("x")), ("a", RawValue::scalar("y"))]
            .into_iter()
            .collect();
        assert_eq!(serde_json::to_string(&r).unwrap(), r#"{"b":"x","a":"y"}"#);
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(FileFormat::from_file_name("units.CSV").unwrap(), FileFormat::Csv);
        assert_eq!(FileFormat::from_file_name("a/b/units.xml").unwrap(), FileFormat::Xml);
        assert_matches!(
            FileFormat::from_file_name("units.xlsx"),
            Err(ExtractError::UnsupportedFormat(_))
        );
    }

    #[test]
    fn extract_file_reads_from_disk() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "StatId;Name").unwrap();
        writeln!(file, "100;Acme").unwrap();
        let options = CsvOptions {
            delimiter: ';',
            skip_count: 0,
        };
        let records = extract_file(file.path(), FileFormat::Csv, &options).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].scalar("Name"), Some("Acme"));
    }

    #[test]
    fn extract_missing_file_is_io_error() {
        let options = CsvOptions::default();
        assert_matches!(
            extract_file(Path::new("/nonexistent/units.csv"), FileFormat::Csv, &options),
            Err(ExtractError::Io { .. })
        );
    }
}
