//! Data source configuration rows.

use sqlx::FromRow;
use statreg_core::data_source::{AllowedOperation, DataSource, FieldMapping, Priority, UploadType};
use statreg_core::types::DbId;
use statreg_core::unit::UnitType;

use super::{decode_id, RowError};

/// A row from the `data_sources` table. The mapping is kept in its
/// persisted textual form `source-target,source-target`.
#[derive(Debug, Clone, FromRow)]
pub struct DataSourceRow {
    pub id: DbId,
    pub name: String,
    pub unit_type: i16,
    pub priority: i16,
    pub allowed_operation: i16,
    pub upload_type: i16,
    pub csv_delimiter: String,
    pub csv_skip_count: i32,
    pub variables_mapping: String,
}

impl TryFrom<DataSourceRow> for DataSource {
    type Error = RowError;

    fn try_from(row: DataSourceRow) -> Result<Self, Self::Error> {
        let mapping = FieldMapping::parse(&row.variables_mapping).map_err(|e| RowError::Invalid {
            column: "variables_mapping",
            reason: e.to_string(),
        })?;
        let mut delimiter = row.csv_delimiter.chars();
        let csv_delimiter = match (delimiter.next(), delimiter.next()) {
            (Some(c), None) => c,
            (None, _) => ',',
            _ => {
                return Err(RowError::Invalid {
                    column: "csv_delimiter",
                    reason: format!("`{}` is not a single character", row.csv_delimiter),
                })
            }
        };

        Ok(DataSource {
            id: row.id,
            name: row.name,
            unit_type: decode_id("unit type", row.unit_type, UnitType::from_id)?,
            priority: decode_id("priority", row.priority, Priority::from_id)?,
            allowed_operation: decode_id("allowed operation", row.allowed_operation, AllowedOperation::from_id)?,
            upload_type: decode_id("upload type", row.upload_type, UploadType::from_id)?,
            csv_delimiter,
            csv_skip_count: usize::try_from(row.csv_skip_count).unwrap_or(0),
            mapping,
        })
    }
}

/// DTO for registering a data source.
#[derive(Debug, Clone)]
pub struct CreateDataSource {
    pub name: String,
    pub unit_type: UnitType,
    pub priority: Priority,
    pub allowed_operation: AllowedOperation,
    pub upload_type: UploadType,
    pub csv_delimiter: char,
    pub csv_skip_count: i32,
    pub mapping: FieldMapping,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> DataSourceRow {
        DataSourceRow {
            id: 4,
            name: "tax".into(),
            unit_type: 2,
            priority: 3,
            allowed_operation: 3,
            upload_type: 1,
            csv_delimiter: ";".into(),
            csv_skip_count: 1,
            variables_mapping: "Id-StatId,Title-Name".into(),
        }
    }

    #[test]
    fn converts_row() {
        let source = DataSource::try_from(row()).unwrap();
        assert_eq!(source.unit_type, UnitType::LegalUnit);
        assert_eq!(source.priority, Priority::Trusted);
        assert_eq!(source.csv_delimiter, ';');
        assert_eq!(source.mapping.stat_id_source(), Some("Id"));
    }

    #[test]
    fn rejects_unknown_priority() {
        let err = DataSource::try_from(DataSourceRow { priority: 9, ..row() }).unwrap_err();
        assert!(matches!(err, RowError::UnknownId { kind: "priority", id: 9 }));
    }

    #[test]
    fn rejects_long_delimiter() {
        let err = DataSource::try_from(DataSourceRow {
            csv_delimiter: ";;".into(),
            ..row()
        })
        .unwrap_err();
        assert!(matches!(err, RowError::Invalid { column: "csv_delimiter", .. }));
    }
}
