//! Repository Services
//!
//! This module contains the page repository and the services it is built from:
//!
//! - `Pages` - entry point: find, load, save and the structural lifecycle
//! - `PageFinder` - selector-to-SQL translation
//! - `PageCache` / `SelectorCache` - identity cache and find result cache
//! - `AccessFilter` - view access applied to find results
//!
//! Services coordinate between the database layer and the page model,
//! enforcing tree integrity and announcing every change through the event hub.

pub mod access;
pub mod editor;
pub mod error;
pub mod finder;
pub mod lifecycle;
pub mod loader;
pub mod names;
pub mod page_cache;
pub mod pages;
mod parents;
pub mod selector_cache;
pub mod trash;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use access::{AccessFilter, AllowAll, RoleAccessFilter};
pub use editor::{SaveOptions, SaveReport};
pub use error::{PageError, PageResult};
pub use finder::{FinderResult, PageFinder, PageRow};
pub use lifecycle::{CloneOptions, DeleteReport};
pub use loader::{LoadOptions, LoadReport};
pub use names::{next_suffix, sanitize_name};
pub use page_cache::{CacheStats, PageCache};
pub use pages::Pages;
pub use selector_cache::{CachedResult, SelectorCache};
pub use trash::TrashOrigin;
