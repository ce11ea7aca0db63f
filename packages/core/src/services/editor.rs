//! Write pipeline
//!
//! # Save flow
//!
//! 1. New pages get a parent (when the template allows exactly one), a unique
//!    name, a sort position and field defaults
//! 2. Saveability and family checks; nothing is written when they fail
//! 3. Status reconciliation (`no_unpublish`; a move into or out of the trash
//!    subtree trashes or restores, name included)
//! 4. `statusChangeReady` / `saveReady`
//! 5. Core row write inside a transaction; a sibling-name collision bumps the
//!    name suffix and retries, up to `max_name_attempts`
//! 6. Field values through their fieldtypes; a failing field becomes a warning
//! 7. Derived state: sortfield, orphaned field data, access and ancestor
//!    tables, trash status of descendants
//! 8. Cache eviction, then `saved` and the specific change events

use crate::db::PageEventKind;
use crate::models::{FieldValue, Page, PageId, Status, Template};
use crate::services::error::{PageError, PageResult};
use crate::services::names::{next_suffix, sanitize_name, UNTITLED};
use crate::services::pages::Pages;
use chrono::Utc;
use libsql::Value;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

/// Options for [`Pages::save`]
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Leave `modified` and `modified_users_id` untouched
    pub quiet: bool,
    /// Skip template family rules and the sibling-name check
    pub ignore_family: bool,
    /// Uniquify an explicit name of a new page instead of rejecting it
    pub adjust_name: bool,
}

impl SaveOptions {
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }
}

/// Outcome of a successful save
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReport {
    pub id: PageId,
    pub is_new: bool,
    /// Attributes and fields that were persisted
    pub changes: Vec<String>,
    /// Per-field problems that did not abort the save
    pub warnings: Vec<String>,
}

fn is_column_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

impl Pages {
    /// Persist `page`
    pub async fn save(&self, page: &mut Page, options: &SaveOptions) -> PageResult<SaveReport> {
        self.save_page(page, options, false).await
    }

    /// Save with the ancestor table rebuild optionally left to the caller
    #[instrument(skip(self, page, options), fields(page_id = page.id(), name = %page.name()))]
    pub(crate) async fn save_page(
        &self,
        page: &mut Page,
        options: &SaveOptions,
        defer_parents: bool,
    ) -> PageResult<SaveReport> {
        if page.is_null() {
            return Err(PageError::NullPage);
        }
        if page.is_deleted() {
            return Err(PageError::not_saveable(page.id(), "page has been deleted"));
        }
        let is_new = page.is_new();
        let template = self.template(page.template_id())?;
        let mut warnings = Vec::new();

        if is_new {
            self.setup_new(page, &template, options).await?;
        }
        self.check_saveable(page, &template, options, is_new, &mut warnings)
            .await?;
        self.reconcile_status(page, &template, is_new, &mut warnings)
            .await?;

        let changes = page.changes();
        let status_changed = !is_new && page.is_changed("status");
        if status_changed {
            self.emit(PageEventKind::StatusChangeReady, page, &changes);
        }
        self.emit(PageEventKind::SaveReady, page, &changes);

        let old_parent = page.original_parent_id();
        let old_template = page.original_template_id();
        let old_status = page.original_status();
        let old_name = page.original_name().map(str::to_string);

        self.db.begin().await?;
        if let Err(e) = self.write_core(page, options, is_new).await {
            if let Err(rollback) = self.db.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            return Err(e);
        }
        self.db.commit().await?;

        warnings.extend(self.write_fields(page, &template, is_new).await);
        let template_changed = old_template.map_or(false, |t| t != page.template_id());
        if let Some(old_template) = old_template.filter(|_| template_changed) {
            warnings.extend(self.remove_orphan_fields(page, old_template, &template).await);
        }
        self.write_sortfield(page).await?;

        let moved = old_parent.map_or(false, |p| p != page.parent_id());
        if is_new || moved || template_changed {
            page.access_template_id = self.update_access(page.id()).await?;
        }
        if (is_new || moved) && !defer_parents {
            self.parents_after_move(page.id(), old_parent, page.parent_id())
                .await?;
        }

        let was_trash = old_status.map_or(false, Status::is_trash);
        let trash_toggled = !is_new && was_trash != page.is_trash();
        if trash_toggled {
            self.set_subtree_trash(page.id(), page.is_trash()).await?;
        }

        page.mark_clean();
        if moved || template_changed || trash_toggled {
            // descendants carry stale access or status
            self.cache.evict_all();
        } else {
            self.cache.evict(page.id());
            self.cache.evict(page.parent_id());
            self.cache.selectors().clear();
        }
        if let Some(old_parent) = old_parent {
            self.cache.evict(old_parent);
        }

        self.emit(PageEventKind::Saved, page, &changes);
        if is_new {
            self.emit(PageEventKind::Added, page, &changes);
        } else {
            if old_name.as_deref() != Some(page.name()) {
                self.emit(PageEventKind::Renamed, page, &changes);
            }
            if moved {
                self.emit(PageEventKind::Moved, page, &changes);
            }
            if template_changed {
                self.emit(PageEventKind::TemplateChanged, page, &changes);
            }
            if status_changed {
                self.emit(PageEventKind::StatusChanged, page, &changes);
                let was_unpublished = old_status.map_or(false, Status::is_unpublished);
                if was_unpublished && !page.is_unpublished() {
                    self.emit(PageEventKind::Published, page, &changes);
                } else if !was_unpublished && page.is_unpublished() {
                    self.emit(PageEventKind::Unpublished, page, &changes);
                }
            }
            if trash_toggled {
                let kind = if page.is_trash() {
                    PageEventKind::Trashed
                } else {
                    PageEventKind::Restored
                };
                self.emit(kind, page, &changes);
            }
        }

        info!(page_id = page.id(), is_new, changes = ?changes, "Page saved");
        Ok(SaveReport {
            id: page.id(),
            is_new,
            changes,
            warnings,
        })
    }

    async fn setup_new(&self, page: &mut Page, template: &Template, options: &SaveOptions) -> PageResult<()> {
        if page.parent_id() == 0 && template.parent_templates.len() == 1 {
            let candidates = self
                .db
                .query(
                    "SELECT id FROM pages WHERE templates_id = ? ORDER BY id LIMIT 2",
                    vec![Value::Integer(template.parent_templates[0])],
                )
                .await?;
            if candidates.len() == 1 {
                page.set_parent_id(candidates[0].get_i64(0));
            }
        }

        if page.name().is_empty() {
            let base = page
                .get("title")
                .and_then(FieldValue::as_text)
                .map(sanitize_name)
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| UNTITLED.to_string());
            let name = self.unique_name(&base, page.parent_id(), page.id()).await?;
            page.set_name(name);
        } else {
            let clean = sanitize_name(page.name());
            if !clean.is_empty() {
                page.set_name(clean);
            }
            if options.adjust_name {
                let name = self
                    .unique_name(page.name(), page.parent_id(), page.id())
                    .await?;
                page.set_name(name);
            }
        }

        if page.sort() < 0 {
            let position = self
                .db
                .query_i64(
                    "SELECT COUNT(*) FROM pages WHERE parent_id = ? AND (status & ?) = 0",
                    vec![
                        Value::Integer(page.parent_id()),
                        Value::Integer((Status::SYSTEM | Status::SYSTEM_ID).bits()),
                    ],
                )
                .await?;
            page.set_sort(position);
        }

        for name in &template.fields {
            if page.has_value(name) {
                continue;
            }
            if let Some(field) = self.fields.get(name) {
                let fieldtype = self.fieldtypes.for_field(&field)?;
                page.set(name, fieldtype.default_value(&field));
            }
        }
        Ok(())
    }

    async fn check_saveable(
        &self,
        page: &Page,
        template: &Template,
        options: &SaveOptions,
        is_new: bool,
        warnings: &mut Vec<String>,
    ) -> PageResult<()> {
        let id = page.id();
        let is_root = !is_new && id == self.config.root_id;

        let mut parent_template = None;
        if !is_root {
            if page.parent_id() <= 0 {
                return Err(PageError::not_saveable(id, "page has no parent"));
            }
            let parent = self
                .db
                .query_one(
                    "SELECT templates_id FROM pages WHERE id = ?",
                    vec![Value::Integer(page.parent_id())],
                )
                .await?
                .ok_or_else(|| {
                    PageError::not_saveable(id, format!("parent {} does not exist", page.parent_id()))
                })?;
            parent_template = self.templates.get(parent.get_i64(0));
        }

        if page.name().is_empty() {
            return Err(PageError::not_saveable(id, "page has no name"));
        }

        for field in page.corrupted_fields() {
            if page.is_changed(field) {
                return Err(PageError::not_saveable(
                    id,
                    format!("field '{}' is corrupted and was changed", field),
                ));
            }
            warnings.push(format!("Skipped corrupted field '{}'", field));
        }

        if is_root && !template.has_role(&self.config.guest_role) {
            return Err(PageError::not_saveable(
                id,
                format!(
                    "root template '{}' must grant access to role '{}'",
                    template.name, self.config.guest_role
                ),
            ));
        }

        if page.output_formatting() {
            for name in page.changes() {
                if self.fields.get(&name).map_or(false, |f| f.formatted) {
                    return Err(PageError::not_saveable(
                        id,
                        format!("output formatting is on while formatted field '{}' changed", name),
                    ));
                }
            }
        }

        if is_root || !(is_new || page.is_changed("parent")) {
            return Ok(());
        }
        if !is_new && self.ancestor_ids(page.parent_id()).await?.contains(&id) {
            return Err(PageError::family_violation(
                id,
                "page cannot be moved below itself",
            ));
        }
        if options.ignore_family {
            return Ok(());
        }

        if !is_new && template.no_move {
            return Err(PageError::family_violation(
                id,
                format!("template '{}' does not allow moving pages", template.name),
            ));
        }
        if let Some(parent_template) = parent_template {
            if parent_template.no_children {
                return Err(PageError::family_violation(
                    id,
                    format!("template '{}' does not allow children", parent_template.name),
                ));
            }
            if !parent_template.allows_child_template(template.id) {
                return Err(PageError::family_violation(
                    id,
                    format!(
                        "template '{}' is not an allowed child of '{}'",
                        template.name, parent_template.name
                    ),
                ));
            }
            if !template.allows_parent_template(parent_template.id) {
                return Err(PageError::family_violation(
                    id,
                    format!(
                        "template '{}' is not an allowed parent of '{}'",
                        parent_template.name, template.name
                    ),
                ));
            }
        }
        if self
            .sibling_name_exists(page.parent_id(), page.name(), id)
            .await?
        {
            return Err(PageError::family_violation(
                id,
                format!("a sibling named '{}' already exists", page.name()),
            ));
        }
        Ok(())
    }

    /// Apply status changes implied by the template and by the new position
    ///
    /// A move into the trash subtree renames the page the way [`Pages::trash`]
    /// does; a move out of it recovers the original name when it is free.
    async fn reconcile_status(
        &self,
        page: &mut Page,
        template: &Template,
        is_new: bool,
        warnings: &mut Vec<String>,
    ) -> PageResult<()> {
        if template.no_unpublish && page.is_unpublished() {
            page.remove_status(Status::UNPUBLISHED);
        }
        if !(is_new || page.is_changed("parent")) {
            return Ok(());
        }
        let in_trash = self.is_in_trash(page.parent_id()).await?;
        let was_trash = page
            .original_status()
            .map_or(page.is_trash(), Status::is_trash);
        if in_trash {
            if !is_new && !was_trash {
                self.apply_trash_name(page);
            }
            page.add_status(Status::TRASH);
        } else if was_trash || page.is_trash() {
            self.recover_trash_name(page, warnings).await?;
            page.remove_status(Status::TRASH);
        }
        Ok(())
    }

    /// Insert or update the `pages` row, retrying on sibling-name collisions
    async fn write_core(&self, page: &mut Page, options: &SaveOptions, is_new: bool) -> PageResult<()> {
        let now = Utc::now();
        let user = self.config.default_user_id;
        if is_new {
            page.created = now;
            page.created_users_id = user;
        }
        if is_new || !options.quiet {
            page.modified = now;
            page.modified_users_id = user;
        }
        if page.published.is_none() && !page.is_unpublished() {
            page.published = Some(now);
        }

        for attempt in 0..self.config.max_name_attempts {
            let mut columns: Vec<(String, Value)> = vec![
                ("parent_id".into(), Value::Integer(page.parent_id())),
                ("templates_id".into(), Value::Integer(page.template_id())),
                ("name".into(), Value::Text(page.name().to_string())),
                ("status".into(), Value::Integer(page.status().bits())),
                ("sort".into(), Value::Integer(page.sort().max(0))),
                ("created".into(), Value::Integer(page.created().timestamp())),
                ("modified".into(), Value::Integer(page.modified().timestamp())),
                (
                    "published".into(),
                    page.published()
                        .map_or(Value::Null, |p| Value::Integer(p.timestamp())),
                ),
                ("created_users_id".into(), Value::Integer(page.created_users_id())),
                ("modified_users_id".into(), Value::Integer(page.modified_users_id())),
            ];
            for (name, value) in self.events.save_columns(page) {
                if !is_column_name(&name) || columns.iter().any(|(c, _)| *c == name) {
                    warn!(column = %name, "Ignoring save column");
                    continue;
                }
                columns.push((name, value));
            }

            let result = if is_new {
                if page.id() > 0 {
                    columns.insert(0, ("id".into(), Value::Integer(page.id())));
                }
                let names: Vec<&str> = columns.iter().map(|(c, _)| c.as_str()).collect();
                let sql = format!(
                    "INSERT INTO pages ({}) VALUES ({})",
                    names.join(", "),
                    vec!["?"; names.len()].join(", ")
                );
                self.db
                    .execute(&sql, columns.into_iter().map(|(_, v)| v).collect())
                    .await
            } else {
                let assignments: Vec<String> =
                    columns.iter().map(|(c, _)| format!("{} = ?", c)).collect();
                let sql = format!("UPDATE pages SET {} WHERE id = ?", assignments.join(", "));
                let mut params: Vec<Value> = columns.into_iter().map(|(_, v)| v).collect();
                params.push(Value::Integer(page.id()));
                self.db.execute(&sql, params).await
            };

            match result {
                Ok(_) => {
                    if is_new && page.id() <= 0 {
                        page.id = self.db.last_insert_rowid();
                    }
                    self.recount_children(page.parent_id()).await?;
                    if let Some(old_parent) =
                        page.original_parent_id().filter(|p| *p != page.parent_id())
                    {
                        self.recount_children(old_parent).await?;
                    }
                    return Ok(());
                }
                Err(e) if e.is_name_collision() => {
                    let next = next_suffix(page.name());
                    debug!(attempt, name = %page.name(), next = %next, "Sibling name taken, retrying");
                    page.set_name(next);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PageError::NameExhausted {
            name: page.name().to_string(),
            parent_id: page.parent_id(),
            attempts: self.config.max_name_attempts,
        })
    }

    async fn write_fields(&self, page: &Page, template: &Template, is_new: bool) -> Vec<String> {
        let mut warnings = Vec::new();
        for name in &template.fields {
            if page.corrupted_fields().contains(name) || !page.has_value(name) {
                continue;
            }
            if !is_new && !page.is_changed(name) {
                continue;
            }
            let Some(field) = self.fields.get(name) else {
                continue;
            };
            let saved = match self.fieldtypes.for_field(&field) {
                Ok(fieldtype) => fieldtype.save_value(&self.db, page, &field).await,
                Err(e) => Err(e),
            };
            match saved {
                Ok(true) => {}
                Ok(false) => warnings.push(format!("Field '{}' was not saved", name)),
                Err(e) => {
                    warn!(page_id = page.id(), field = %name, error = %e, "Failed to save field");
                    warnings.push(format!("Field '{}': {}", name, e));
                }
            }
        }
        warnings
    }

    /// Delete stored values of fields the new template no longer has
    async fn remove_orphan_fields(
        &self,
        page: &mut Page,
        old_template: crate::models::TemplateId,
        template: &Template,
    ) -> Vec<String> {
        let mut warnings = Vec::new();
        let Some(old) = self.templates.get(old_template) else {
            return warnings;
        };
        for name in old.fields.iter().filter(|f| !template.has_field(f)) {
            let Some(field) = self.fields.get(name) else {
                continue;
            };
            let deleted = match self.fieldtypes.for_field(&field) {
                Ok(fieldtype) => fieldtype.delete_value(&self.db, page, &field).await,
                Err(e) => Err(e),
            };
            if let Err(e) = deleted {
                warnings.push(format!("Field '{}': {}", name, e));
            }
            page.values.remove(name);
        }
        warnings
    }

    async fn write_sortfield(&self, page: &Page) -> PageResult<()> {
        if !page.is_changed("sortfield") {
            return Ok(());
        }
        match page.sortfield().filter(|s| !s.is_empty() && *s != "sort") {
            Some(sortfield) => {
                self.db
                    .execute(
                        "INSERT OR REPLACE INTO pages_sortfields (pages_id, sortfield) VALUES (?, ?)",
                        vec![Value::Integer(page.id()), Value::Text(sortfield.to_string())],
                    )
                    .await?;
            }
            None => {
                self.db
                    .execute(
                        "DELETE FROM pages_sortfields WHERE pages_id = ?",
                        vec![Value::Integer(page.id())],
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "editor_test.rs"]
mod editor_test;
