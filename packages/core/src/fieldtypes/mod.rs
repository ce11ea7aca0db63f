//! Fieldtypes
//!
//! A fieldtype owns the storage of every field declared with its name: it
//! creates the `field_<name>` table, converts values between their in-memory
//! [`FieldValue`] form and storage rows, and decides whether the field can be
//! joined into the page row-fetch query (autojoin).
//!
//! The default method bodies implement the common layout
//! `field_<name>(pages_id, data, sort)` with one row per stored value.
//! Implementors usually only provide value conversion.

mod numeric;
mod page_ref;
mod text;

pub use numeric::{FloatFieldtype, IntegerFieldtype};
pub use page_ref::PageRefFieldtype;
pub use text::TextFieldtype;

use crate::db::{DatabaseService, StorageError};
use crate::models::{FieldDef, FieldValue, Page, PageId};
use async_trait::async_trait;
use libsql::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FieldtypeError {
    #[error("Unknown fieldtype '{fieldtype}' for field '{field}'")]
    UnknownFieldtype { field: String, fieldtype: String },

    #[error("Value {value} is not valid for field '{field}'")]
    InvalidValue { field: String, value: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl FieldtypeError {
    pub fn invalid_value(field: &FieldDef, value: &FieldValue) -> Self {
        Self::InvalidValue {
            field: field.name.clone(),
            value: format!("{:?}", value),
        }
    }
}

/// Select/join fragments contributed by autojoined fields
///
/// Each accepted field adds exactly one select expression; its position in
/// [`AutojoinQuery::selects`] is where the loader reads the joined value.
#[derive(Debug, Clone, Default)]
pub struct AutojoinQuery {
    selects: Vec<String>,
    joins: Vec<String>,
}

impl AutojoinQuery {
    pub fn select(&mut self, expr: impl Into<String>) {
        self.selects.push(expr.into());
    }

    pub fn left_join(&mut self, clause: impl Into<String>) {
        self.joins.push(clause.into());
    }

    pub fn selects(&self) -> &[String] {
        &self.selects
    }

    pub fn joins(&self) -> &[String] {
        &self.joins
    }

    pub(crate) fn checkpoint(&self) -> (usize, usize) {
        (self.selects.len(), self.joins.len())
    }

    pub(crate) fn rollback_to(&mut self, checkpoint: (usize, usize)) {
        self.selects.truncate(checkpoint.0);
        self.joins.truncate(checkpoint.1);
    }
}

/// Storage contract for one kind of field
#[async_trait]
pub trait Fieldtype: Send + Sync {
    /// Registry name (`text`, `integer`, ...)
    fn name(&self) -> &'static str;

    /// SQL type of the `data` column
    fn column_type(&self) -> &'static str;

    /// Whether a value spans several rows
    fn multiple(&self) -> bool {
        false
    }

    /// Value of a field with nothing stored
    fn blank_value(&self, field: &FieldDef) -> FieldValue;

    /// Value given to new pages that leave the field unset
    fn default_value(&self, field: &FieldDef) -> FieldValue {
        field
            .default
            .clone()
            .unwrap_or_else(|| self.blank_value(field))
    }

    /// Convert stored `data` values (ordered by `sort`) to a value
    fn wakeup_value(&self, field: &FieldDef, rows: &[Value]) -> FieldValue;

    /// Convert a value to the `data` values to store, one row each
    fn sleep_value(&self, field: &FieldDef, value: &FieldValue) -> Result<Vec<Value>, FieldtypeError>;

    /// Convert the single column contributed by [`Fieldtype::autojoin`]
    fn wakeup_joined(&self, field: &FieldDef, raw: &Value) -> FieldValue {
        match raw {
            Value::Null => self.blank_value(field),
            other => self.wakeup_value(field, std::slice::from_ref(other)),
        }
    }

    /// Create the storage table when missing
    async fn create_schema(&self, db: &DatabaseService, field: &FieldDef) -> Result<(), FieldtypeError> {
        let table = field.table();
        db.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    pages_id INTEGER NOT NULL,
                    data {column},
                    sort INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (pages_id, sort)
                )",
                column = self.column_type()
            ),
            vec![],
        )
        .await?;
        db.execute(
            &format!("CREATE INDEX IF NOT EXISTS idx_{table}_data ON {table}(data)"),
            vec![],
        )
        .await?;
        Ok(())
    }

    /// Read the value of `field` for `page`
    async fn load_value(
        &self,
        db: &DatabaseService,
        page: &Page,
        field: &FieldDef,
    ) -> Result<FieldValue, FieldtypeError> {
        let rows = db
            .query(
                &format!(
                    "SELECT data FROM {} WHERE pages_id = ? ORDER BY sort",
                    field.table()
                ),
                vec![Value::Integer(page.id())],
            )
            .await?;
        if rows.is_empty() {
            return Ok(self.blank_value(field));
        }
        let values: Vec<Value> = rows.into_iter().map(|row| row.value(0).clone()).collect();
        Ok(self.wakeup_value(field, &values))
    }

    /// Replace the stored value of `field` with the page's current value
    async fn save_value(
        &self,
        db: &DatabaseService,
        page: &Page,
        field: &FieldDef,
    ) -> Result<bool, FieldtypeError> {
        let blank = self.blank_value(field);
        let value = page.get(&field.name).unwrap_or(&blank);
        let rows = self.sleep_value(field, value)?;
        let table = field.table();

        db.execute(
            &format!("DELETE FROM {} WHERE pages_id = ?", table),
            vec![Value::Integer(page.id())],
        )
        .await?;
        for (sort, data) in rows.into_iter().enumerate() {
            db.execute(
                &format!("INSERT INTO {} (pages_id, data, sort) VALUES (?, ?, ?)", table),
                vec![Value::Integer(page.id()), data, Value::Integer(sort as i64)],
            )
            .await?;
        }
        Ok(true)
    }

    /// Remove every stored row of `field` for `page`
    async fn delete_value(
        &self,
        db: &DatabaseService,
        page: &Page,
        field: &FieldDef,
    ) -> Result<bool, FieldtypeError> {
        delete_rows(db, page.id(), field).await?;
        Ok(true)
    }

    /// Join this field into the row-fetch query; return false to lazy-load
    fn autojoin(&self, field: &FieldDef, query: &mut AutojoinQuery) -> bool {
        let alias = format!("_{}", field.name);
        query.left_join(format!(
            "LEFT JOIN {table} AS {alias} ON {alias}.pages_id = pages.id AND {alias}.sort = 0",
            table = field.table()
        ));
        query.select(format!("{}.data", alias));
        true
    }
}

pub(crate) async fn delete_rows(
    db: &DatabaseService,
    page_id: PageId,
    field: &FieldDef,
) -> Result<u64, StorageError> {
    db.execute(
        &format!("DELETE FROM {} WHERE pages_id = ?", field.table()),
        vec![Value::Integer(page_id)],
    )
    .await
}

/// Fieldtypes by registry name
#[derive(Clone, Default)]
pub struct FieldtypeRegistry {
    types: HashMap<String, Arc<dyn Fieldtype>>,
}

impl std::fmt::Debug for FieldtypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.types.keys().collect();
        names.sort();
        f.debug_struct("FieldtypeRegistry").field("types", &names).finish()
    }
}

impl FieldtypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `text`, `integer`, `float` and `page`
    pub fn with_core() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextFieldtype));
        registry.register(Arc::new(IntegerFieldtype));
        registry.register(Arc::new(FloatFieldtype));
        registry.register(Arc::new(PageRefFieldtype));
        registry
    }

    /// Register (or replace) a fieldtype under its own name
    pub fn register(&mut self, fieldtype: Arc<dyn Fieldtype>) {
        self.types.insert(fieldtype.name().to_string(), fieldtype);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Fieldtype>> {
        self.types.get(name).cloned()
    }

    /// Fieldtype responsible for `field`
    pub fn for_field(&self, field: &FieldDef) -> Result<Arc<dyn Fieldtype>, FieldtypeError> {
        self.get(&field.fieldtype)
            .ok_or_else(|| FieldtypeError::UnknownFieldtype {
                field: field.name.clone(),
                fieldtype: field.fieldtype.clone(),
            })
    }
}
