//! Field definitions
//!
//! A field is a named, typed slot of page data stored in its own
//! `field_<name>` table. Which fieldtype owns the storage is named by
//! `fieldtype` and resolved through the fieldtype registry at runtime.

use crate::models::page::FieldValue;
use crate::models::template::SchemaError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// Native `pages` columns and selector keywords a field may not shadow
pub const RESERVED_NAMES: &[&str] = &[
    "id",
    "parent",
    "parent_id",
    "template",
    "templates_id",
    "name",
    "status",
    "sort",
    "num_children",
    "created",
    "modified",
    "published",
    "created_users_id",
    "modified_users_id",
    "has_parent",
    "path",
    "limit",
    "start",
    "include",
    "check_access",
];

fn field_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("valid regex"))
}

/// Definition of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub id: i64,
    pub name: String,

    /// Registered fieldtype name (`text`, `integer`, `float`, `page`, ...)
    pub fieldtype: String,

    #[serde(default)]
    pub label: String,

    /// Fetch this field in the same query as the page row
    #[serde(default)]
    pub autojoin: bool,

    /// Load referenced pages together with the referencing page
    #[serde(default)]
    pub autoload: bool,

    /// Value is transformed for output; saving requires output formatting off
    #[serde(default)]
    pub formatted: bool,

    /// Value assigned to new pages that leave the field unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<FieldValue>,
}

impl FieldDef {
    pub fn new(id: i64, name: impl Into<String>, fieldtype: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            fieldtype: fieldtype.into(),
            label: String::new(),
            autojoin: false,
            autoload: false,
            formatted: false,
            default: None,
        }
    }

    pub fn with_autojoin(mut self) -> Self {
        self.autojoin = true;
        self
    }

    pub fn with_autoload(mut self) -> Self {
        self.autoload = true;
        self
    }

    pub fn with_formatted(mut self) -> Self {
        self.formatted = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Storage table for this field
    pub fn table(&self) -> String {
        format!("field_{}", self.name)
    }

    pub fn validate_name(name: &str) -> Result<(), SchemaError> {
        if !field_name_regex().is_match(name) || RESERVED_NAMES.contains(&name) {
            return Err(SchemaError::InvalidFieldName(name.to_string()));
        }
        Ok(())
    }
}

/// Lookup table of field definitions by name
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    by_name: BTreeMap<String, Arc<FieldDef>>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, field: FieldDef) -> Result<(), SchemaError> {
        FieldDef::validate_name(&field.name)?;
        if self.by_name.contains_key(&field.name) {
            return Err(SchemaError::DuplicateField(field.name));
        }
        self.by_name.insert(field.name.clone(), Arc::new(field));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<FieldDef>> {
        self.by_name.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FieldDef>> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
