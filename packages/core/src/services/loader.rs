//! Page hydration
//!
//! Turns page ids into [`Page`] values. Ids already in the identity cache are
//! served from it; the rest are grouped by template and fetched with one
//! query per template. Each query selects the core columns plus one column
//! per autojoined field.
//!
//! A failing template group never fails the whole load: a missing field table
//! is created and the group retried once, any other error skips the group
//! and is reported as a warning.
//!
//! Autoload page-reference fields are resolved after the main fetch. A page
//! referenced while its referrer is still being loaded resolves to the
//! in-flight instance instead of being fetched again.

use crate::db::SqlRow;
use crate::fieldtypes::{AutojoinQuery, Fieldtype};
use crate::models::{FieldDef, FieldValue, Page, PageId, Status, Template, TemplateId};
use crate::services::error::{PageError, PageResult};
use crate::services::pages::Pages;
use chrono::{DateTime, Utc};
use libsql::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, warn};

const CORE_COLUMNS: &str = "pages.id, pages.parent_id, pages.templates_id, pages.name, \
    pages.status, pages.sort, pages.num_children, pages.created, pages.modified, \
    pages.published, pages.created_users_id, pages.modified_users_id, \
    pages_sortfields.sortfield, pages_access.templates_id";
const CORE_COLUMN_COUNT: usize = 14;

/// Options for [`Pages::load_by_ids`]
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Every id is known to use this template; skips the template lookup
    pub template_id: Option<TemplateId>,
    /// Serve from and register in the identity cache
    pub cache: bool,
    /// Join autojoin fields into the row fetch
    pub autojoin: bool,
    /// Output formatting for loaded pages (defaults to the configured state)
    pub output_formatting: Option<bool>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            template_id: None,
            cache: true,
            autojoin: true,
            output_formatting: None,
        }
    }
}

impl LoadOptions {
    pub fn without_cache(mut self) -> Self {
        self.cache = false;
        self
    }
}

/// Loaded pages in request order plus non-fatal problems
#[derive(Debug, Default)]
pub struct LoadReport {
    pub pages: Vec<Page>,
    pub warnings: Vec<String>,
}

/// Pages fetched during one load, keyed by id
#[derive(Default)]
struct LoadContext {
    loading: HashMap<PageId, Page>,
    warnings: Vec<String>,
}

type JoinedField = (Arc<FieldDef>, Arc<dyn Fieldtype>);

fn timestamp(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(|secs| DateTime::from_timestamp(secs, 0))
}

impl Pages {
    /// Load pages by id, preserving the requested order
    ///
    /// Missing ids are skipped; duplicates are returned once.
    pub async fn load_by_ids(&self, ids: &[PageId], options: &LoadOptions) -> PageResult<LoadReport> {
        let mut seen = HashSet::new();
        let ids: Vec<PageId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let mut served: HashMap<PageId, Page> = HashMap::new();
        let mut to_fetch = Vec::new();
        for id in &ids {
            match options.cache.then(|| self.cache.get(*id)).flatten() {
                Some(page) => {
                    served.insert(*id, page);
                }
                None => to_fetch.push(*id),
            }
        }

        let mut ctx = LoadContext::default();
        if !to_fetch.is_empty() {
            debug!(count = to_fetch.len(), cached = served.len(), "Loading pages");
            self.fetch_into(&to_fetch, options, &mut ctx).await?;
            if options.cache {
                self.load_autoload_refs(options, &mut ctx).await?;
                for page in ctx.loading.values() {
                    self.cache.put(page);
                }
            }
        }

        let pages = ids
            .iter()
            .filter_map(|id| served.remove(id).or_else(|| ctx.loading.remove(id)))
            .collect();
        Ok(LoadReport {
            pages,
            warnings: ctx.warnings,
        })
    }

    async fn fetch_into(
        &self,
        ids: &[PageId],
        options: &LoadOptions,
        ctx: &mut LoadContext,
    ) -> PageResult<()> {
        let groups: BTreeMap<TemplateId, Vec<PageId>> = match options.template_id {
            Some(template_id) => BTreeMap::from([(template_id, ids.to_vec())]),
            None => {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let rows = self
                    .db
                    .query(
                        &format!(
                            "SELECT id, templates_id FROM pages WHERE id IN ({})",
                            placeholders
                        ),
                        ids.iter().map(|id| Value::Integer(*id)).collect(),
                    )
                    .await?;
                let mut groups: BTreeMap<TemplateId, Vec<PageId>> = BTreeMap::new();
                for row in rows {
                    groups.entry(row.get_i64(1)).or_default().push(row.get_i64(0));
                }
                groups
            }
        };

        for (template_id, group) in groups {
            if let Err(e) = self.fetch_group(template_id, &group, options, ctx).await {
                error!(template_id, error = %e, "Failed to load template group");
                ctx.warnings.push(format!(
                    "Skipped {} page(s) using template {}: {}",
                    group.len(),
                    template_id,
                    e
                ));
            }
        }
        Ok(())
    }

    fn autojoin_plan(&self, template: &Template, ctx: &mut LoadContext) -> (AutojoinQuery, Vec<JoinedField>) {
        let mut query = AutojoinQuery::default();
        let mut joined = Vec::new();
        for name in &template.fields {
            let Some(field) = self.fields.get(name) else {
                continue;
            };
            if !field.autojoin {
                continue;
            }
            let fieldtype = match self.fieldtypes.for_field(&field) {
                Ok(fieldtype) => fieldtype,
                Err(e) => {
                    ctx.warnings.push(e.to_string());
                    continue;
                }
            };
            let checkpoint = query.checkpoint();
            if !fieldtype.autojoin(&field, &mut query) {
                query.rollback_to(checkpoint);
                continue;
            }
            if query.selects().len() != checkpoint.0 + 1 {
                warn!(field = %field.name, "Autojoin must add exactly one column; loading lazily");
                query.rollback_to(checkpoint);
                continue;
            }
            joined.push((field, fieldtype));
        }
        (query, joined)
    }

    async fn fetch_group(
        &self,
        template_id: TemplateId,
        ids: &[PageId],
        options: &LoadOptions,
        ctx: &mut LoadContext,
    ) -> PageResult<()> {
        let template = self.template(template_id)?;
        let (query, joined) = if options.autojoin {
            self.autojoin_plan(&template, ctx)
        } else {
            (AutojoinQuery::default(), Vec::new())
        };

        let extra: String = query.selects().iter().map(|s| format!(", {}", s)).collect();
        let sql = format!(
            "SELECT {CORE_COLUMNS}{extra} FROM pages \
             LEFT JOIN pages_sortfields ON pages_sortfields.pages_id = pages.id \
             LEFT JOIN pages_access ON pages_access.pages_id = pages.id \
             {joins} WHERE pages.id IN ({placeholders}) AND pages.templates_id = ?",
            joins = query.joins().join(" "),
            placeholders = vec!["?"; ids.len()].join(", "),
        );
        let mut params: Vec<Value> = ids.iter().map(|id| Value::Integer(*id)).collect();
        params.push(Value::Integer(template_id));

        let rows = match self.db.query(&sql, params.clone()).await {
            Ok(rows) => rows,
            Err(e) if e.is_schema_error() => {
                warn!(template = %template.name, error = %e, "Repairing field tables and retrying");
                self.repair_schema(&template).await?;
                self.db.query(&sql, params).await?
            }
            Err(e) => return Err(e.into()),
        };

        let output_formatting = options
            .output_formatting
            .unwrap_or(self.config.output_formatting);
        for row in &rows {
            let mut page = self.page_from_row(row, &template);
            for (offset, (field, fieldtype)) in joined.iter().enumerate() {
                let raw = row.value(CORE_COLUMN_COUNT + offset);
                page.set_loaded_value(&field.name, fieldtype.wakeup_joined(field, raw));
            }
            page.output_formatting = output_formatting;
            page.instance_id = self.next_instance_id();
            page.mark_clean();
            ctx.loading.insert(page.id, page);
        }
        Ok(())
    }

    fn page_from_row(&self, row: &SqlRow, template: &Template) -> Page {
        let mut page = Page::new(template);
        page.id = row.get_i64(0);
        page.parent_id = row.get_i64(1);
        page.name = row.get_string(3);
        page.status = Status(row.get_i64(4));
        page.sort = row.get_i64(5);
        page.num_children = row.get_i64(6);
        if let Some(created) = timestamp(row.get_opt_i64(7)) {
            page.created = created;
        }
        if let Some(modified) = timestamp(row.get_opt_i64(8)) {
            page.modified = modified;
        }
        page.published = timestamp(row.get_opt_i64(9));
        page.created_users_id = row.get_i64(10);
        page.modified_users_id = row.get_i64(11);
        page.sortfield = row.get_opt_string(12);
        page.access_template_id = row.get_opt_i64(13);
        page
    }

    /// Create missing field tables of `template`
    async fn repair_schema(&self, template: &Template) -> PageResult<()> {
        for name in &template.fields {
            if let Some(field) = self.fields.get(name) {
                self.fieldtypes
                    .for_field(&field)?
                    .create_schema(&self.db, &field)
                    .await?;
            }
        }
        Ok(())
    }

    /// Resolve autoload page references of every page in the context
    async fn load_autoload_refs(&self, options: &LoadOptions, ctx: &mut LoadContext) -> PageResult<()> {
        let mut processed: HashSet<PageId> = HashSet::new();
        loop {
            let pending: Vec<PageId> = ctx
                .loading
                .keys()
                .copied()
                .filter(|id| !processed.contains(id))
                .collect();
            if pending.is_empty() {
                break;
            }

            let mut wanted: Vec<PageId> = Vec::new();
            for id in pending {
                processed.insert(id);
                for value in self.autoload_values(id, ctx).await? {
                    for ref_id in value.ref_ids() {
                        if ref_id > 0
                            && !ctx.loading.contains_key(&ref_id)
                            && !self.cache.contains(ref_id)
                            && !wanted.contains(&ref_id)
                        {
                            wanted.push(ref_id);
                        }
                    }
                }
            }
            if wanted.is_empty() {
                break;
            }
            let deref = LoadOptions {
                template_id: None,
                ..options.clone()
            };
            self.fetch_into(&wanted, &deref, ctx).await?;
        }
        Ok(())
    }

    /// Values of the autoload fields of an in-flight page, loading them if needed
    async fn autoload_values(&self, id: PageId, ctx: &mut LoadContext) -> PageResult<Vec<FieldValue>> {
        let Some(page) = ctx.loading.get(&id) else {
            return Ok(Vec::new());
        };
        let Some(template) = self.templates.get(page.template_id()) else {
            return Ok(Vec::new());
        };

        let mut loaded = Vec::new();
        let mut values = Vec::new();
        for name in &template.fields {
            let Some(field) = self.fields.get(name).filter(|f| f.autoload) else {
                continue;
            };
            match page.get(name) {
                Some(value) => values.push(value.clone()),
                None => {
                    let fieldtype = self.fieldtypes.for_field(&field)?;
                    match fieldtype.load_value(&self.db, page, &field).await {
                        Ok(value) => {
                            loaded.push((name.clone(), value.clone()));
                            values.push(value);
                        }
                        Err(e) => {
                            warn!(page_id = id, field = %name, error = %e, "Failed to autoload field");
                            ctx.warnings.push(format!("Field '{}' of page {}: {}", name, id, e));
                        }
                    }
                }
            }
        }
        if let Some(page) = ctx.loading.get_mut(&id) {
            for (name, value) in loaded {
                page.set_loaded_value(&name, value);
            }
        }
        Ok(values)
    }

    /// Value of `field` on `page`, loading it from storage when not yet loaded
    pub async fn field_value(&self, page: &mut Page, field: &str) -> PageResult<FieldValue> {
        if let Some(value) = page.get(field) {
            return Ok(value.clone());
        }
        let template = self.template(page.template_id())?;
        if !template.has_field(field) {
            return Err(PageError::UnknownField(field.to_string()));
        }
        let definition = self
            .fields
            .get(field)
            .ok_or_else(|| PageError::UnknownField(field.to_string()))?;
        let fieldtype = self.fieldtypes.for_field(&definition)?;

        let value = if page.is_new() {
            fieldtype.default_value(&definition)
        } else {
            fieldtype.load_value(&self.db, page, &definition).await?
        };
        page.set_loaded_value(field, value.clone());
        if !page.has_changes() && self.cache.contains(page.id()) {
            self.cache.put(page);
        }
        Ok(value)
    }
}

#[cfg(test)]
#[path = "loader_test.rs"]
mod loader_test;
