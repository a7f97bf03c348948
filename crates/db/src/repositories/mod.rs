//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods.
//! Reads take `&PgPool`; writes that belong to a bulk flush take
//! `&mut PgConnection` so they run inside the caller's transaction.

pub mod activity_repo;
pub mod address_repo;
pub mod code_table_repo;
pub mod data_source_repo;
pub mod history_repo;
pub mod permission_repo;
pub mod person_repo;
pub mod queue_repo;
pub mod unit_repo;
pub mod upload_log_repo;

pub use activity_repo::ActivityRepo;
pub use address_repo::AddressRepo;
pub use code_table_repo::CodeTableRepo;
pub use data_source_repo::DataSourceRepo;
pub use history_repo::HistoryRepo;
pub use permission_repo::PermissionRepo;
pub use person_repo::PersonRepo;
pub use queue_repo::QueueRepo;
pub use unit_repo::UnitRepo;
pub use upload_log_repo::UploadLogRepo;
