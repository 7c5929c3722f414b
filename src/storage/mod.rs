//! Postgres storage module for option chain persistence.
//!
//! Provides the per-underlying chain tables, the display-to-storage column
//! mapping, and the transactional batch writer.

pub mod schema;
pub mod types;
pub mod writer;

pub use types::{insert_columns, StrikeRowRecord, COLUMN_MAP};
pub use writer::{SnapshotSink, SnapshotWriter};
