//! Service Layer Error Types
//!
//! Validation failures (not saveable, not deleteable, family violations) are
//! recoverable: the operation aborts before writing anything. Structural
//! failures (unknown template, system page, null page) are raised immediately.
//! Per-field failures never surface here; they are collected as warnings on
//! the operation report instead.

use crate::config::ConfigError;
use crate::db::{DatabaseError, StorageError};
use crate::fieldtypes::FieldtypeError;
use crate::models::{PageId, SchemaError, SelectorError};
use thiserror::Error;

/// Page repository errors
#[derive(Error, Debug)]
pub enum PageError {
    /// The saveability check failed
    #[error("Page {id} is not saveable: {reason}")]
    NotSaveable { id: PageId, reason: String },

    /// The page may not be deleted or trashed
    #[error("Page {id} cannot be deleted: {reason}")]
    NotDeleteable { id: PageId, reason: String },

    /// Parent/child template rules or sibling names forbid the placement
    #[error("Family constraint violated for page {id}: {reason}")]
    FamilyViolation { id: PageId, reason: String },

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// System pages can't be deleted or trashed
    #[error("Page {id} is system protected")]
    SystemProtected { id: PageId },

    #[error("Cannot operate on a null page")]
    NullPage,

    #[error("Page {id} has {count} children; delete recursively to remove them")]
    HasChildren { id: PageId, count: i64 },

    /// Every uniquified name candidate collided
    #[error("No unique name for '{name}' under parent {parent_id} after {attempts} attempts")]
    NameExhausted {
        name: String,
        parent_id: PageId,
        attempts: usize,
    },

    #[error("Page not found: {0}")]
    NotFound(PageId),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Selector error: {0}")]
    Selector(#[from] SelectorError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fieldtype error: {0}")]
    Fieldtype(#[from] FieldtypeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PageError {
    pub fn not_saveable(id: PageId, reason: impl Into<String>) -> Self {
        Self::NotSaveable {
            id,
            reason: reason.into(),
        }
    }

    pub fn not_deleteable(id: PageId, reason: impl Into<String>) -> Self {
        Self::NotDeleteable {
            id,
            reason: reason.into(),
        }
    }

    pub fn family_violation(id: PageId, reason: impl Into<String>) -> Self {
        Self::FamilyViolation {
            id,
            reason: reason.into(),
        }
    }

    pub fn unknown_template(template: impl ToString) -> Self {
        Self::UnknownTemplate(template.to_string())
    }

    /// Recoverable validation failure (nothing was written)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NotSaveable { .. } | Self::NotDeleteable { .. } | Self::FamilyViolation { .. }
        )
    }
}

pub type PageResult<T> = Result<T, PageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_page_and_reason() {
        let err = PageError::not_saveable(12, "page has no parent");
        assert_eq!(err.to_string(), "Page 12 is not saveable: page has no parent");
        assert!(err.is_validation());
        assert!(!PageError::NullPage.is_validation());
    }
}
