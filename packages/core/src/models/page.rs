//! Page Data Structures
//!
//! A [`Page`] is one node of the content tree: a row in `pages` plus one value
//! per field of its template. Pages track their own changes so the write
//! pipeline knows which columns and fields to persist, and remember the
//! persisted state of their structural attributes so moves, renames and status
//! transitions can be detected at save time.
//!
//! # Lifecycle
//!
//! - `Page::new(&template)`: in-memory, `id == 0`, `is_new() == true`
//! - saved: id assigned, change set cleared
//! - loaded: produced by the loader, clean, registered in the identity cache
//! - deleted: tombstone, `id` kept for reference, `is_deleted() == true`
//!
//! # Examples
//!
//! ```rust
//! use pagestore_core::models::{FieldValue, Page, Template};
//!
//! let template = Template::new(3, "basic-page").with_fields(&["title"]);
//! let mut page = Page::new(&template);
//! page.set_parent_id(1);
//! page.set("title", "About us");
//!
//! assert!(page.is_new());
//! assert!(page.is_changed("title"));
//! assert_eq!(page.get("title"), Some(&FieldValue::Text("About us".into())));
//! ```

use crate::models::status::Status;
use crate::models::template::{PageKind, Template, TemplateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type PageId = i64;

/// Value of one field on one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    /// Single page reference
    Ref(PageId),
    /// Ordered page references
    Refs(Vec<PageId>),
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::Ref(id) => *id == 0,
            FieldValue::Refs(ids) => ids.is_empty(),
            FieldValue::Integer(_) | FieldValue::Float(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            FieldValue::Float(f) => Some(*f as i64),
            FieldValue::Ref(id) => Some(*id),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Referenced page ids, in order
    pub fn ref_ids(&self) -> Vec<PageId> {
        match self {
            FieldValue::Ref(id) if *id > 0 => vec![*id],
            FieldValue::Refs(ids) => ids.clone(),
            _ => Vec::new(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<Vec<PageId>> for FieldValue {
    fn from(value: Vec<PageId>) -> Self {
        FieldValue::Refs(value)
    }
}

/// Structural attributes as last persisted
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct PageSnapshot {
    pub parent_id: PageId,
    pub template_id: TemplateId,
    pub name: String,
    pub status: Status,
    pub sort: i64,
}

/// A node in the content tree
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub(crate) id: PageId,
    pub(crate) parent_id: PageId,
    pub(crate) template_id: TemplateId,
    pub(crate) kind: PageKind,
    pub(crate) name: String,
    pub(crate) status: Status,
    /// -1 until assigned by the write pipeline
    pub(crate) sort: i64,
    pub(crate) num_children: i64,
    pub(crate) created: DateTime<Utc>,
    pub(crate) modified: DateTime<Utc>,
    pub(crate) published: Option<DateTime<Utc>>,
    pub(crate) created_users_id: i64,
    pub(crate) modified_users_id: i64,
    pub(crate) sortfield: Option<String>,
    pub(crate) access_template_id: Option<TemplateId>,
    pub(crate) values: BTreeMap<String, FieldValue>,

    #[serde(skip)]
    pub(crate) changes: BTreeSet<String>,
    /// Fields whose value was mutated in place through `get_mut`
    #[serde(skip)]
    pub(crate) dirty_values: BTreeSet<String>,
    #[serde(skip)]
    pub(crate) corrupted_fields: BTreeSet<String>,
    #[serde(skip)]
    pub(crate) original: Option<PageSnapshot>,
    #[serde(skip)]
    pub(crate) output_formatting: bool,
    #[serde(skip)]
    pub(crate) instance_id: u64,
    #[serde(skip)]
    pub(crate) is_new: bool,
    #[serde(skip)]
    pub(crate) deleted: bool,
    #[serde(skip)]
    pub(crate) null: bool,
}

impl Page {
    /// Create an unsaved page using `template`
    pub fn new(template: &Template) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            parent_id: 0,
            template_id: template.id,
            kind: template.page_kind,
            name: String::new(),
            status: Status::ON,
            sort: -1,
            num_children: 0,
            created: now,
            modified: now,
            published: None,
            created_users_id: 0,
            modified_users_id: 0,
            sortfield: None,
            access_template_id: None,
            values: BTreeMap::new(),
            changes: BTreeSet::new(),
            dirty_values: BTreeSet::new(),
            corrupted_fields: BTreeSet::new(),
            original: None,
            output_formatting: false,
            instance_id: 0,
            is_new: true,
            deleted: false,
            null: false,
        }
    }

    /// The placeholder returned where no page exists; never saveable
    pub fn null() -> Self {
        let mut page = Page::new(&Template::new(0, ""));
        page.null = true;
        page.is_new = false;
        page
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn parent_id(&self) -> PageId {
        self.parent_id
    }

    pub fn template_id(&self) -> TemplateId {
        self.template_id
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn sort(&self) -> i64 {
        self.sort
    }

    pub fn num_children(&self) -> i64 {
        self.num_children
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.published
    }

    pub fn created_users_id(&self) -> i64 {
        self.created_users_id
    }

    pub fn modified_users_id(&self) -> i64 {
        self.modified_users_id
    }

    /// Per-page child sort override (`-created`, `title`, ...)
    pub fn sortfield(&self) -> Option<&str> {
        self.sortfield.as_deref()
    }

    /// Template governing access to this page
    pub fn access_template_id(&self) -> Option<TemplateId> {
        self.access_template_id
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_null(&self) -> bool {
        self.null
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_trash(&self) -> bool {
        self.status.is_trash()
    }

    pub fn is_hidden(&self) -> bool {
        self.status.is_hidden()
    }

    pub fn is_unpublished(&self) -> bool {
        self.status.is_unpublished()
    }

    pub fn output_formatting(&self) -> bool {
        self.output_formatting
    }

    pub fn set_output_formatting(&mut self, on: bool) {
        self.output_formatting = on;
    }

    pub fn set_parent_id(&mut self, parent_id: PageId) {
        if self.parent_id != parent_id {
            self.parent_id = parent_id;
            self.track_change("parent");
        }
    }

    pub fn set_parent(&mut self, parent: &Page) {
        self.set_parent_id(parent.id);
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.name != name {
            self.name = name;
            self.track_change("name");
        }
    }

    pub fn set_status(&mut self, status: Status) {
        if self.status != status {
            self.status = status;
            self.track_change("status");
        }
    }

    pub fn add_status(&mut self, flag: Status) {
        self.set_status(self.status.with(flag));
    }

    pub fn remove_status(&mut self, flag: Status) {
        self.set_status(self.status.without(flag));
    }

    pub fn set_sort(&mut self, sort: i64) {
        if self.sort != sort {
            self.sort = sort;
            self.track_change("sort");
        }
    }

    pub fn set_sortfield(&mut self, sortfield: Option<String>) {
        if self.sortfield != sortfield {
            self.sortfield = sortfield;
            self.track_change("sortfield");
        }
    }

    /// Switch template; values of fields the new template lacks are removed on save
    pub fn set_template(&mut self, template: &Template) {
        if self.template_id != template.id {
            self.template_id = template.id;
            self.kind = template.page_kind;
            self.track_change("template");
        }
    }

    /// Loaded value of `field`
    ///
    /// Fields that are not autojoined stay absent until loaded through
    /// `Pages::field_value`.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    /// Mutable access to a loaded value; the field counts as changed
    pub fn get_mut(&mut self, field: &str) -> Option<&mut FieldValue> {
        let value = self.values.get_mut(field)?;
        self.dirty_values.insert(field.to_string());
        Some(value)
    }

    pub fn has_value(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) {
        let value = value.into();
        if self.values.get(field) != Some(&value) {
            self.values.insert(field.to_string(), value);
            self.track_change(field);
        }
    }

    pub fn values(&self) -> &BTreeMap<String, FieldValue> {
        &self.values
    }

    pub fn is_changed(&self, what: &str) -> bool {
        self.changes.contains(what) || self.dirty_values.contains(what)
    }

    /// Names of changed attributes and fields
    pub fn changes(&self) -> Vec<String> {
        self.changes
            .union(&self.dirty_values)
            .cloned()
            .collect()
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty() || !self.dirty_values.is_empty()
    }

    /// Flag `field` as unsafe to persist for this page
    pub fn mark_corrupted(&mut self, field: &str) {
        self.corrupted_fields.insert(field.to_string());
    }

    pub fn corrupted_fields(&self) -> &BTreeSet<String> {
        &self.corrupted_fields
    }

    /// Parent as last persisted (None for new pages)
    pub fn original_parent_id(&self) -> Option<PageId> {
        self.original.as_ref().map(|o| o.parent_id)
    }

    pub fn original_name(&self) -> Option<&str> {
        self.original.as_ref().map(|o| o.name.as_str())
    }

    pub fn original_status(&self) -> Option<Status> {
        self.original.as_ref().map(|o| o.status)
    }

    pub fn original_template_id(&self) -> Option<TemplateId> {
        self.original.as_ref().map(|o| o.template_id)
    }

    fn track_change(&mut self, what: &str) {
        self.changes.insert(what.to_string());
    }

    /// Store a value read from storage without marking it changed
    pub(crate) fn set_loaded_value(&mut self, field: &str, value: FieldValue) {
        self.values.insert(field.to_string(), value);
    }

    pub(crate) fn snapshot(&self) -> PageSnapshot {
        PageSnapshot {
            parent_id: self.parent_id,
            template_id: self.template_id,
            name: self.name.clone(),
            status: self.status,
            sort: self.sort,
        }
    }

    /// Mark the current state as persisted
    pub(crate) fn mark_clean(&mut self) {
        self.changes.clear();
        self.dirty_values.clear();
        self.original = Some(self.snapshot());
        self.is_new = false;
    }
}

/// Ordered result of a find
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageArray {
    pub pages: Vec<Page>,
    /// Ids in result order; populated even when pages are not loaded
    pub ids: Vec<PageId>,
    /// Total matches ignoring limit/start
    pub total: usize,
    pub start: usize,
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PageArray {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn first(&self) -> Option<&Page> {
        self.pages.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Page> {
        self.pages.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.pages.iter().map(|p| p.name()).collect()
    }
}

impl IntoIterator for PageArray {
    type Item = Page;
    type IntoIter = std::vec::IntoIter<Page>;

    fn into_iter(self) -> Self::IntoIter {
        self.pages.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Template {
        Template::new(3, "basic-page").with_fields(&["title", "body"])
    }

    #[test]
    fn test_new_page_defaults() {
        let page = Page::new(&template());

        assert_eq!(page.id(), 0);
        assert!(page.is_new());
        assert_eq!(page.sort(), -1);
        assert_eq!(page.status(), Status::ON);
        assert!(!page.has_changes());
    }

    #[test]
    fn test_setting_same_value_is_not_a_change() {
        let mut page = Page::new(&template());
        page.set_loaded_value("title", FieldValue::Text("Hello".into()));

        page.set("title", "Hello");
        assert!(!page.is_changed("title"));

        page.set("title", "Hello world");
        assert!(page.is_changed("title"));
    }

    #[test]
    fn test_get_mut_marks_dirty() {
        let mut page = Page::new(&template());
        page.set_loaded_value("related", FieldValue::Refs(vec![4]));

        if let Some(FieldValue::Refs(ids)) = page.get_mut("related") {
            ids.push(9);
        }

        assert!(page.is_changed("related"));
        assert_eq!(page.get("related").unwrap().ref_ids(), vec![4, 9]);
    }

    #[test]
    fn test_mark_clean_records_original() {
        let mut page = Page::new(&template());
        page.set_parent_id(1);
        page.set_name("about");
        page.mark_clean();

        assert!(!page.is_new());
        assert!(!page.has_changes());
        assert_eq!(page.original_parent_id(), Some(1));
        assert_eq!(page.original_name(), Some("about"));

        page.set_name("about-us");
        assert_eq!(page.original_name(), Some("about"));
        assert_eq!(page.changes(), vec!["name".to_string()]);
    }

    #[test]
    fn test_null_page() {
        let page = Page::null();
        assert!(page.is_null());
        assert!(!page.is_new());
    }

    #[test]
    fn test_field_value_serialization_contract() {
        let json = serde_json::to_value(FieldValue::Refs(vec![2, 3])).unwrap();
        assert_eq!(json, serde_json::json!({"type": "refs", "value": [2, 3]}));

        let back: FieldValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, FieldValue::Refs(vec![2, 3]));
    }
}
