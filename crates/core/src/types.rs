/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Business dates (registration, liquidation, ...) carry no time of day.
pub type Date = chrono::NaiveDate;
