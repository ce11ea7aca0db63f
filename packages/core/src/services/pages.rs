//! Page repository
//!
//! [`Pages`] is the single entry point to the content tree. It owns the
//! storage handle, the schema registries, the identity cache and the event
//! hub, and exposes finding, loading, saving and the structural lifecycle
//! (trash, restore, delete, clone).
//!
//! The operations themselves are split across sibling modules, each adding an
//! `impl Pages` block:
//!
//! - `finder` / `loader`: selector translation and page hydration
//! - `editor`: the write pipeline
//! - `trash` / `lifecycle`: trash, restore, empty trash, delete, clone, move
//! - `parents` / `access`: derived ancestry and access tables
//!
//! # Examples
//!
//! ```rust,no_run
//! use pagestore_core::config::PagesConfig;
//! use pagestore_core::models::SchemaDefinition;
//! use pagestore_core::services::{Pages, SaveOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pages = Pages::from_schema(PagesConfig::for_path("./site.db"), SchemaDefinition::minimal()).await?;
//! pages.install().await?;
//!
//! let mut about = pages.new_page("basic-page")?;
//! about.set_parent_id(1);
//! about.set("title", "About");
//! pages.save(&mut about, &SaveOptions::default()).await?;
//!
//! let found = pages.find("template=basic-page, sort=name", &Default::default()).await?;
//! println!("{:?}", found.names());
//! # Ok(())
//! # }
//! ```

use crate::config::{ConfigError, PagesConfig};
use crate::db::{DatabaseService, EventHub, PageEvent, PageEventKind};
use crate::fieldtypes::FieldtypeRegistry;
use crate::models::{
    normalize_path, FieldRegistry, FindOptions, Include, Operator, Page, PageArray, PageId,
    SchemaDefinition, SchemaError, Selector, SelectorItem, Status, Template, TemplateRegistry,
};
use crate::services::access::{AccessFilter, AllowAll};
use crate::services::error::{PageError, PageResult};
use crate::services::finder::PageFinder;
use crate::services::loader::LoadOptions;
use crate::services::page_cache::{CacheStats, PageCache};
use crate::services::selector_cache::{CachedResult, SelectorCache};
use chrono::Utc;
use libsql::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

/// Longest ancestor chain walked before a path is considered corrupt
const MAX_DEPTH: usize = 1000;

/// The page repository
pub struct Pages {
    pub(crate) db: Arc<DatabaseService>,
    pub(crate) config: PagesConfig,
    pub(crate) templates: Arc<TemplateRegistry>,
    pub(crate) fields: Arc<FieldRegistry>,
    pub(crate) fieldtypes: Arc<FieldtypeRegistry>,
    pub(crate) cache: PageCache,
    pub(crate) events: EventHub,
    pub(crate) access: Arc<dyn AccessFilter>,
    instance_seq: AtomicU64,
}

impl std::fmt::Debug for Pages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pages")
            .field("db", &self.db)
            .field("templates", &self.templates.len())
            .field("fields", &self.fields.len())
            .field("cache", &self.cache.stats())
            .field("events", &self.events)
            .finish()
    }
}

impl Pages {
    /// Open the repository described by `config`
    ///
    /// Every field a template lists must be registered in `fields`.
    pub async fn open(
        config: PagesConfig,
        templates: TemplateRegistry,
        fields: FieldRegistry,
    ) -> PageResult<Self> {
        config.validate().map_err(ConfigError::Invalid)?;
        for template in templates.iter() {
            if let Some(missing) = template.fields.iter().find(|f| !fields.contains(f)) {
                return Err(SchemaError::UnknownField {
                    template: template.name.clone(),
                    field: missing.clone(),
                }
                .into());
            }
        }

        let db = DatabaseService::with_retries(config.db_path.clone(), config.connection_retries)
            .await?;
        info!(db_path = %config.db_path.display(), "Page repository opened");

        Ok(Self {
            db: Arc::new(db),
            config,
            templates: Arc::new(templates),
            fields: Arc::new(fields),
            fieldtypes: Arc::new(FieldtypeRegistry::with_core()),
            cache: PageCache::new(),
            events: EventHub::default(),
            access: Arc::new(AllowAll),
            instance_seq: AtomicU64::new(0),
        })
    }

    /// Open with templates and fields taken from a schema definition
    pub async fn from_schema(config: PagesConfig, schema: SchemaDefinition) -> PageResult<Self> {
        let mut templates = TemplateRegistry::new();
        for template in schema.templates {
            templates.register(template)?;
        }
        let mut fields = FieldRegistry::new();
        for field in schema.fields {
            fields.register(field)?;
        }
        Self::open(config, templates, fields).await
    }

    /// Replace the fieldtype registry (before [`Pages::install`])
    pub fn with_fieldtypes(mut self, fieldtypes: FieldtypeRegistry) -> Self {
        self.fieldtypes = Arc::new(fieldtypes);
        self
    }

    pub fn with_access_filter(mut self, access: Arc<dyn AccessFilter>) -> Self {
        self.access = access;
        self
    }

    /// Create field tables and seed the root and trash pages
    ///
    /// Idempotent: existing rows are left untouched.
    pub async fn install(&self) -> PageResult<()> {
        for field in self.fields.iter() {
            self.fieldtypes
                .for_field(field)?
                .create_schema(&self.db, field)
                .await?;
        }

        let root_template = self
            .templates
            .get_by_name(&self.config.root_template)
            .ok_or_else(|| PageError::unknown_template(&self.config.root_template))?;
        let trash_template = self
            .templates
            .get_by_name(&self.config.trash_template)
            .ok_or_else(|| PageError::unknown_template(&self.config.trash_template))?;

        self.db.begin().await?;
        if let Err(e) = self.seed_pages(&root_template, &trash_template).await {
            self.db.rollback().await?;
            return Err(e);
        }
        self.db.commit().await?;

        self.update_access(self.config.root_id).await?;
        self.rebuild_parents(self.config.root_id).await?;
        self.cache.evict_all();
        info!(
            root_id = self.config.root_id,
            trash_id = self.config.trash_id,
            "Page repository installed"
        );
        Ok(())
    }

    async fn seed_pages(&self, root_template: &Template, trash_template: &Template) -> PageResult<()> {
        let now = Utc::now().timestamp();
        let user = self.config.default_user_id;
        let seed = "INSERT OR IGNORE INTO pages \
            (id, parent_id, templates_id, name, status, sort, created, modified, published, created_users_id, modified_users_id) \
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";
        let trash_status =
            Status::ON | Status::HIDDEN | Status::LOCKED | Status::SYSTEM_ID | Status::SYSTEM;

        let rows = [
            (self.config.root_id, 0, root_template.id, "home", Status::ON, 0),
            (
                self.config.trash_id,
                self.config.root_id,
                trash_template.id,
                "trash",
                trash_status,
                0,
            ),
        ];
        for (id, parent_id, template_id, name, status, sort) in rows {
            self.db
                .execute(
                    seed,
                    vec![
                        Value::Integer(id),
                        Value::Integer(parent_id),
                        Value::Integer(template_id),
                        Value::Text(name.to_string()),
                        Value::Integer(status.bits()),
                        Value::Integer(sort),
                        Value::Integer(now),
                        Value::Integer(now),
                        Value::Integer(now),
                        Value::Integer(user),
                        Value::Integer(user),
                    ],
                )
                .await?;
        }
        self.recount_children(self.config.root_id).await?;
        Ok(())
    }

    pub fn config(&self) -> &PagesConfig {
        &self.config
    }

    pub fn db(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    pub fn fieldtypes(&self) -> &FieldtypeRegistry {
        &self.fieldtypes
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Register a synchronous lifecycle listener
    pub fn on<F>(&self, kind: PageEventKind, listener: F)
    where
        F: Fn(&PageEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, listener);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    pub fn root_id(&self) -> PageId {
        self.config.root_id
    }

    pub fn trash_id(&self) -> PageId {
        self.config.trash_id
    }

    /// Template by id
    pub fn template(&self, id: crate::models::TemplateId) -> PageResult<Arc<Template>> {
        self.templates
            .get(id)
            .ok_or_else(|| PageError::unknown_template(id))
    }

    /// Unsaved page using the template named (or numbered) `template`
    pub fn new_page(&self, template: &str) -> PageResult<Page> {
        let template = self
            .templates
            .resolve(template)
            .ok_or_else(|| PageError::unknown_template(template))?;
        let mut page = Page::new(&template);
        page.set_output_formatting(self.config.output_formatting);
        Ok(page)
    }

    /// Find pages matching `selector`
    pub async fn find(&self, selector: &str, options: &FindOptions) -> PageResult<PageArray> {
        let selector = Selector::parse(selector)?;
        self.find_selector(&selector, options).await
    }

    /// Find pages matching an already parsed selector
    #[instrument(skip(self, options), fields(selector = %selector, caller = options.caller.as_deref().unwrap_or("-")))]
    pub async fn find_selector(
        &self,
        selector: &Selector,
        options: &FindOptions,
    ) -> PageResult<PageArray> {
        let signature = SelectorCache::signature(selector, options, self.config.language_id);
        if options.cache && options.load_pages {
            if let Some(cached) = self.cache.selectors().lookup(&signature) {
                debug!("Selector cache hit");
                let report = self.load_by_ids(&cached.ids, &LoadOptions::default()).await?;
                return Ok(PageArray {
                    ids: report.pages.iter().map(Page::id).collect(),
                    pages: report.pages,
                    total: cached.total,
                    start: cached.start,
                    limit: cached.limit,
                    warnings: report.warnings,
                });
            }
        }

        let default_include = if options.find_all {
            Include::All
        } else {
            Include::Visible
        };
        let include = selector
            .include()?
            .or(options.include)
            .unwrap_or(default_include);
        let check_access = options.check_access
            && selector
                .find_item("check_access")
                .map_or(true, |item| !matches!(item.value(), "0" | "false"));

        let (mut pages, mut total, start, limit, warnings) = match selector.id_shortcut() {
            Some(ids) => {
                let report = self.load_by_ids(&ids, &LoadOptions::default()).await?;
                let mut pages: Vec<Page> = report
                    .pages
                    .into_iter()
                    .filter(|page| include.allows(page.status()))
                    .collect();
                if options.find_one {
                    pages.truncate(1);
                }
                let total = pages.len();
                (pages, total, 0, None, report.warnings)
            }
            None => {
                let result = PageFinder::new(self).find(selector, options).await?;
                if !options.load_pages {
                    return Ok(PageArray {
                        pages: Vec::new(),
                        ids: result.ids(),
                        total: result.total,
                        start: result.start,
                        limit: result.limit,
                        warnings: Vec::new(),
                    });
                }
                let report = self
                    .load_by_ids(&result.ids(), &LoadOptions::default())
                    .await?;
                (report.pages, result.total, result.start, result.limit, report.warnings)
            }
        };

        if check_access {
            let before = pages.len();
            pages = self.access.filter(pages, include);
            total = total.saturating_sub(before - pages.len());
        }

        if !pages.is_empty() {
            let mut event = PageEvent::new(PageEventKind::FoundResults, &pages[0]);
            event.pages = pages.clone();
            event.selector = Some(selector.canonical());
            self.events.emit(event);
        }

        let ids: Vec<PageId> = pages.iter().map(Page::id).collect();
        let beyond_unpublished = options.find_one
            && pages
                .first()
                .map_or(false, |page| page.status() > Status::UNPUBLISHED);
        if options.cache && !beyond_unpublished {
            self.cache.selectors().store(
                signature,
                CachedResult {
                    ids: ids.clone(),
                    total,
                    start,
                    limit,
                },
            );
        }

        Ok(PageArray {
            pages,
            ids,
            total,
            start,
            limit,
            warnings,
        })
    }

    /// First match of `selector` under the normal find rules
    pub async fn find_one(&self, selector: &str) -> PageResult<Option<Page>> {
        let found = self.find(selector, &FindOptions::find_one()).await?;
        Ok(found.pages.into_iter().next())
    }

    /// Ids of every match, without hydrating pages
    pub async fn find_ids(&self, selector: &str) -> PageResult<Vec<PageId>> {
        let options = FindOptions {
            load_pages: false,
            get_total: false,
            ..FindOptions::default()
        };
        Ok(self.find(selector, &options).await?.ids)
    }

    /// Single page regardless of status, without access checks
    ///
    /// The selector's own `include=` still applies.
    pub async fn get(&self, selector: &str) -> PageResult<Option<Page>> {
        let options = FindOptions {
            find_one: true,
            get_total: false,
            include: Some(Include::All),
            check_access: false,
            ..FindOptions::default()
        };
        let found = self.find(selector, &options).await?;
        Ok(found.pages.into_iter().next())
    }

    pub async fn get_by_id(&self, id: PageId) -> PageResult<Option<Page>> {
        self.get(&id.to_string()).await
    }

    /// Pages by id, in the order given; missing ids are skipped
    pub async fn get_by_ids(&self, ids: &[PageId]) -> PageResult<Vec<Page>> {
        Ok(self.load_by_ids(ids, &LoadOptions::default()).await?.pages)
    }

    pub async fn get_by_path(&self, path: &str) -> PageResult<Option<Page>> {
        match self.id_by_path(path).await? {
            Some(id) => self.get_by_id(id).await,
            None => Ok(None),
        }
    }

    /// Number of matches ignoring limit/start
    pub async fn count(&self, selector: &str) -> PageResult<usize> {
        let selector = Selector::parse(selector)?;
        PageFinder::new(self)
            .count(&selector, &FindOptions::default())
            .await
    }

    /// Children of `page`, narrowed by `selector`
    pub async fn children(&self, page: &Page, selector: &str) -> PageResult<PageArray> {
        let selector = Selector::parse(selector)?.with_item(SelectorItem::new(
            "parent",
            Operator::Equal,
            page.id().to_string(),
        ));
        self.find_selector(&selector, &FindOptions::default()).await
    }

    /// Ancestors of `page`, root first
    pub async fn parents(&self, page: &Page) -> PageResult<Vec<Page>> {
        let mut ids = self.ancestor_ids(page.parent_id()).await?;
        ids.reverse();
        self.get_by_ids(&ids).await
    }

    /// `/segment/segment/`; root is `/`
    pub async fn path(&self, page: &Page) -> PageResult<String> {
        if page.id() == self.config.root_id {
            return Ok("/".to_string());
        }
        let mut segments = vec![page.name().to_string()];
        let mut parent_id = page.parent_id();
        for _ in 0..MAX_DEPTH {
            if parent_id == self.config.root_id || parent_id <= 0 {
                break;
            }
            let Some(row) = self
                .db
                .query_one(
                    "SELECT parent_id, name FROM pages WHERE id = ?",
                    vec![Value::Integer(parent_id)],
                )
                .await?
            else {
                break;
            };
            segments.push(row.get_string(1));
            parent_id = row.get_i64(0);
        }
        segments.reverse();
        Ok(format!("/{}/", segments.join("/")))
    }

    /// Resolve a path to a page id
    pub async fn id_by_path(&self, path: &str) -> PageResult<Option<PageId>> {
        let path = normalize_path(path);
        let mut current = self.config.root_id;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let row = self
                .db
                .query_one(
                    "SELECT id FROM pages WHERE parent_id = ? AND name = ?",
                    vec![Value::Integer(current), Value::Text(segment.to_string())],
                )
                .await?;
            match row {
                Some(row) => current = row.get_i64(0),
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Ids from `page_id` upward, excluding the virtual parent 0
    pub(crate) async fn ancestor_ids(&self, page_id: PageId) -> PageResult<Vec<PageId>> {
        let mut ids = Vec::new();
        let mut current = page_id;
        while current > 0 && ids.len() < MAX_DEPTH {
            if ids.contains(&current) {
                break;
            }
            ids.push(current);
            current = self
                .db
                .query_one(
                    "SELECT parent_id FROM pages WHERE id = ?",
                    vec![Value::Integer(current)],
                )
                .await?
                .map_or(0, |row| row.get_i64(0));
        }
        Ok(ids)
    }

    /// Whether `page_id` is the trash page or lives below it
    pub(crate) async fn is_in_trash(&self, page_id: PageId) -> PageResult<bool> {
        Ok(self
            .ancestor_ids(page_id)
            .await?
            .contains(&self.config.trash_id))
    }

    /// Sort applied to children of `parent_id` when a find names none
    pub(crate) async fn child_sortfield(&self, parent_id: PageId) -> PageResult<String> {
        if let Some(sortfield) = self.cache.sortfield(parent_id) {
            return Ok(sortfield);
        }
        let row = self
            .db
            .query_one(
                "SELECT pages.templates_id, pages_sortfields.sortfield FROM pages \
                 LEFT JOIN pages_sortfields ON pages_sortfields.pages_id = pages.id \
                 WHERE pages.id = ?",
                vec![Value::Integer(parent_id)],
            )
            .await?;
        let sortfield = row
            .and_then(|row| {
                self.templates
                    .get(row.get_i64(0))
                    .and_then(|t| t.sort_field.clone())
                    .or_else(|| row.get_opt_string(1))
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "sort".to_string());
        self.cache.set_sortfield(parent_id, sortfield.clone());
        Ok(sortfield)
    }

    /// Set `num_children` of `parent_id` to its actual child count
    pub(crate) async fn recount_children(&self, parent_id: PageId) -> PageResult<i64> {
        if parent_id <= 0 {
            return Ok(0);
        }
        self.db
            .execute(
                "UPDATE pages SET num_children = (SELECT COUNT(*) FROM pages AS c WHERE c.parent_id = ?) WHERE id = ?",
                vec![Value::Integer(parent_id), Value::Integer(parent_id)],
            )
            .await?;
        Ok(self
            .db
            .query_i64(
                "SELECT num_children FROM pages WHERE id = ?",
                vec![Value::Integer(parent_id)],
            )
            .await?)
    }

    pub(crate) fn next_instance_id(&self) -> u64 {
        self.instance_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn emit(&self, kind: PageEventKind, page: &Page, changes: &[String]) {
        self.events
            .emit(PageEvent::new(kind, page).with_changes(changes.to_vec()));
    }

    /// Drop one page from the identity cache (and all selector results)
    pub fn uncache(&self, id: PageId) -> bool {
        self.cache.selectors().clear();
        self.cache.evict(id)
    }

    pub fn uncache_all(&self) {
        self.cache.evict_all();
    }

    pub fn is_cached(&self, id: PageId) -> bool {
        self.cache.contains(id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
#[path = "pages_test.rs"]
mod pages_test;
