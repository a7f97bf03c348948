use std::io::Read;

use super::{RawRecord, RawValue};
use crate::error::ExtractError;

/// Delimiter and leading-line skip configured on the data source.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: char,
    pub skip_count: usize,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            skip_count: 0,
        }
    }
}

/// Parse delimited text into raw records.
///
/// The header is the first line (after `skip_count` lines) that contains the
/// delimiter; every later non-blank line maps positionally onto the header
/// tokens. Quoted fields are unquoted by the tokenizer.
pub fn read_csv<R: Read>(reader: R, options: &CsvOptions) -> Result<Vec<RawRecord>, ExtractError> {
    let delimiter = u8::try_from(options.delimiter).map_err(|_| {
        ExtractError::UnsupportedFormat(format!(
            "delimiter `{}` is not a single byte",
            options.delimiter
        ))
    })?;

    let mut rdr = ::csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(reader);

    let mut header: Option<Vec<String>> = None;
    let mut records = Vec::new();

    for (line, row) in rdr.records().enumerate() {
        let row = row?;
        if line < options.skip_count {
            continue;
        }
        let Some(columns) = &header else {
            if row.len() > 1 {
                header = Some(row.iter().map(|h| h.trim().to_string()).collect());
            }
            continue;
        };
        if row.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let mut record = RawRecord::new();
        for (i, name) in columns.iter().enumerate() {
            let value = row.get(i).unwrap_or_default().trim();
            record.push(name.clone(), RawValue::scalar(value));
        }
        records.push(record);
    }

    if header.is_none() {
        return Err(ExtractError::MissingHeader(options.delimiter));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn opts(delimiter: char, skip_count: usize) -> CsvOptions {
        CsvOptions {
            delimiter,
            skip_count,
        }
    }

    #[test]
    fn header_is_first_line_with_delimiter() {
        let text = "Monthly export\nGenerated 2024-01-01\nStatId,Name,Region\n100,Acme,41701\n";
        let records = read_csv(text.as_bytes(), &opts(',', 0)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].scalar("StatId"), Some("100"));
        assert_eq!(records[0].scalar("Region"), Some("41701"));
    }

    #[test]
    fn quoted_fields_are_unquoted() {
        let text = "StatId;Name\n1;\"Acme; Sons\"\n2;\"Say \"\"hi\"\"\"\n";
        let records = read_csv(text.as_bytes(), &opts(';', 0)).unwrap();
        assert_eq!(records[0].scalar("Name"), Some("Acme; Sons"));
        assert_eq!(records[1].scalar("Name"), Some("Say \"hi\""));
    }

    #[test]
    fn short_rows_pad_and_blank_rows_drop() {
        let text = "a,b,c\n1,2\n,,\n4,5,6\n";
        let records = read_csv(text.as_bytes(), &opts(',', 0)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].scalar("c"), Some(""));
        assert_eq!(records[1].get_index(2).and_then(RawValue::as_scalar), Some("6"));
    }

    #[test]
    fn skip_count_applies_before_header_search() {
        let text = "x,y\nStatId,Name\n7,Seven\n";
        let records = read_csv(text.as_bytes(), &opts(',', 1)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].scalar("StatId"), Some("7"));
    }

    #[test]
    fn no_header_is_an_error() {
        assert_matches!(
            read_csv("just a title\n".as_bytes(), &opts(',', 0)),
            Err(ExtractError::MissingHeader(','))
        );
    }
}
