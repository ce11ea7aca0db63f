//! Data Models
//!
//! This module contains the core data structures of the page repository:
//!
//! - `Page` - a node of the content tree with its field values
//! - `Template` / `FieldDef` - the schema pages are built from
//! - `Selector` - parsed query expressions consumed by the finder
//! - `Status` - the page status bitmask

mod field;
mod page;
mod selector;
mod status;
mod template;

pub use field::{FieldDef, FieldRegistry, RESERVED_NAMES};
pub use page::{FieldValue, Page, PageArray, PageId};
pub use selector::{
    normalize_path, FindOptions, Include, Operator, Selector, SelectorError, SelectorItem,
    RUNTIME_OPTIONS,
};
pub use status::Status;
pub use template::{PageKind, SchemaDefinition, SchemaError, Template, TemplateId, TemplateRegistry};
