//! Domain types, extraction, mapping and store contracts for the
//! statistical business register import pipeline.
//!
//! This crate does no I/O beyond reading upload files; persistence and the
//! search index are reached only through the traits in [`store`].

pub mod context;
pub mod data_source;
pub mod error;
pub mod extraction;
pub mod history;
pub mod links;
pub mod mapping;
pub mod queue;
pub mod reference;
pub mod search;
pub mod store;
pub mod types;
pub mod unit;
pub mod upload_log;
