//! Database Layer
//!
//! This module handles all relational storage using libsql:
//!
//! - Connection management and core schema initialization
//! - A statement executor with classified errors and reconnect-on-loss retries
//! - Lifecycle events emitted by the repository
//!
//! # Architecture
//!
//! Pages live in a single `pages` table with a `UNIQUE(name, parent_id)`
//! constraint; that constraint is the only mutual-exclusion primitive used
//! for concurrent writers. Derived tables (`pages_parents`, `pages_access`,
//! `pages_sortfields`) are maintained by the write pipeline. Field data is
//! stored per field in `field_<name>` tables owned by fieldtypes.

mod database;
mod error;
pub mod events;

pub use database::{value_as_i64, value_as_string, DatabaseService, SqlRow};
pub use error::{DatabaseError, StorageError, StorageErrorKind};
pub use events::{EventHub, PageEvent, PageEventKind, PageListener, SaveColumnsHook};
