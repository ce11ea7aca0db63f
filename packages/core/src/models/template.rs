//! Templates (page schemas)
//!
//! A template names the field set of a class of pages together with the
//! structural rules every page using it must obey: which parents and children
//! are allowed, whether pages may be moved, trashed or unpublished, how
//! children sort, and which roles govern access.
//!
//! # Examples
//!
//! ```rust
//! use pagestore_core::models::{Template, TemplateRegistry};
//!
//! let mut registry = TemplateRegistry::new();
//! registry
//!     .register(Template::new(3, "basic-page").with_fields(&["title", "body"]))
//!     .unwrap();
//!
//! let template = registry.get_by_name("basic-page").unwrap();
//! assert!(template.has_field("body"));
//! ```

use crate::models::field::FieldDef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub type TemplateId = i64;

/// Errors raised while registering templates and fields
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Duplicate template: {0}")]
    DuplicateTemplate(String),

    #[error("Duplicate field: {0}")]
    DuplicateField(String),

    #[error("Invalid field name '{0}': must be lowercase alphanumeric/underscore and not a native column")]
    InvalidFieldName(String),

    #[error("Template '{template}' references unknown field '{field}'")]
    UnknownField { template: String, field: String },
}

/// Concrete entity variant a template produces
///
/// Every page carries its kind so callers can branch on user/role/permission
/// pages without runtime class lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    #[default]
    Basic,
    User,
    Role,
    Permission,
    Language,
}

/// Schema and structural rules shared by a class of pages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: TemplateId,
    pub name: String,

    /// Field names in display order
    #[serde(default)]
    pub fields: Vec<String>,

    /// Templates a parent may use (empty = any)
    #[serde(default)]
    pub parent_templates: Vec<TemplateId>,

    /// Templates children may use (empty = any)
    #[serde(default)]
    pub child_templates: Vec<TemplateId>,

    #[serde(default)]
    pub no_children: bool,

    #[serde(default)]
    pub no_move: bool,

    #[serde(default)]
    pub no_trash: bool,

    #[serde(default)]
    pub no_unpublish: bool,

    /// Sort applied to children of pages using this template; overrides the
    /// per-page sortfield
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,

    /// Roles with view access; a template with roles defines access for its
    /// pages and their descendants
    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub page_kind: PageKind,
}

impl Template {
    pub fn new(id: TemplateId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            fields: Vec::new(),
            parent_templates: Vec::new(),
            child_templates: Vec::new(),
            no_children: false,
            no_move: false,
            no_trash: false,
            no_unpublish: false,
            sort_field: None,
            roles: Vec::new(),
            page_kind: PageKind::Basic,
        }
    }

    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_parent_templates(mut self, ids: &[TemplateId]) -> Self {
        self.parent_templates = ids.to_vec();
        self
    }

    pub fn with_child_templates(mut self, ids: &[TemplateId]) -> Self {
        self.child_templates = ids.to_vec();
        self
    }

    pub fn with_sort_field(mut self, sort_field: impl Into<String>) -> Self {
        self.sort_field = Some(sort_field.into());
        self
    }

    pub fn with_kind(mut self, kind: PageKind) -> Self {
        self.page_kind = kind;
        self
    }

    pub fn no_children(mut self) -> Self {
        self.no_children = true;
        self
    }

    pub fn no_move(mut self) -> Self {
        self.no_move = true;
        self
    }

    pub fn no_trash(mut self) -> Self {
        self.no_trash = true;
        self
    }

    pub fn no_unpublish(mut self) -> Self {
        self.no_unpublish = true;
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    pub fn has_roles(&self) -> bool {
        !self.roles.is_empty()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn allows_child_template(&self, template_id: TemplateId) -> bool {
        !self.no_children
            && (self.child_templates.is_empty() || self.child_templates.contains(&template_id))
    }

    pub fn allows_parent_template(&self, template_id: TemplateId) -> bool {
        self.parent_templates.is_empty() || self.parent_templates.contains(&template_id)
    }
}

/// Lookup table of templates by id and by name
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    by_id: HashMap<TemplateId, Arc<Template>>,
    by_name: HashMap<String, TemplateId>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, template: Template) -> Result<(), SchemaError> {
        if self.by_id.contains_key(&template.id) || self.by_name.contains_key(&template.name) {
            return Err(SchemaError::DuplicateTemplate(template.name));
        }
        self.by_name.insert(template.name.clone(), template.id);
        self.by_id.insert(template.id, Arc::new(template));
        Ok(())
    }

    pub fn get(&self, id: TemplateId) -> Option<Arc<Template>> {
        self.by_id.get(&id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Template>> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    /// Resolve a template given either its numeric id or its name
    pub fn resolve(&self, id_or_name: &str) -> Option<Arc<Template>> {
        match id_or_name.trim().parse::<TemplateId>() {
            Ok(id) => self.get(id),
            Err(_) => self.get_by_name(id_or_name.trim()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Template>> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Serializable bundle of templates and fields
///
/// Used to describe a site schema in a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub templates: Vec<Template>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl SchemaDefinition {
    /// Smallest schema able to host a site: root, admin and a basic page
    pub fn minimal() -> Self {
        Self {
            templates: vec![
                Template::new(1, "home")
                    .with_fields(&["title"])
                    .with_roles(&["guest"]),
                Template::new(2, "admin").with_fields(&["title"]),
                Template::new(3, "basic-page").with_fields(&["title"]),
            ],
            fields: vec![FieldDef::new(1, "title", "text").with_autojoin()],
        }
    }
}
