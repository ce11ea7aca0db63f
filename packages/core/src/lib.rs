//! PageStore Core
//!
//! A hierarchical page repository on an embedded SQLite-compatible database.
//!
//! # Architecture
//!
//! - **Tree of pages**: every page has one parent, a template and a status bitmask
//! - **Field tables**: each field stores its values in its own `field_<name>` table
//! - **Selectors**: a small query language compiled to SQL by the finder
//! - **Identity cache**: one canonical copy per loaded page, evicted on every write
//! - **libsql**: embedded SQLite-compatible storage
//!
//! # Modules
//!
//! - [`models`] - Pages, templates, fields, statuses and selectors
//! - [`fieldtypes`] - Per-field storage contracts
//! - [`services`] - The repository (finder, loader, write pipeline, lifecycle)
//! - [`db`] - Database layer and lifecycle events
//! - [`config`] - Repository configuration

pub mod config;
pub mod db;
pub mod fieldtypes;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::PagesConfig;
pub use db::{PageEvent, PageEventKind};
pub use models::*;
pub use services::*;
