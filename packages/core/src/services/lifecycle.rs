//! Delete, clone and move

use crate::db::{PageEvent, PageEventKind};
use crate::models::{Page, PageId, Status};
use crate::services::editor::{SaveOptions, SaveReport};
use crate::services::error::{PageError, PageResult};
use crate::services::loader::LoadOptions;
use crate::services::pages::Pages;
use libsql::Value;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tracing::{info, instrument, warn};

/// Outcome of a delete
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    /// Every removed page, descendants first
    pub deleted: Vec<PageId>,
    pub warnings: Vec<String>,
}

/// Options for [`Pages::clone_page`]
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    /// Parent of the copy; defaults to the source's parent
    pub parent_id: Option<PageId>,
    /// Copy the whole subtree
    pub recursive: bool,
    /// Name of the copy; defaults to the source's name, uniquified
    pub name: Option<String>,
}

type DeleteFuture<'a> = Pin<Box<dyn Future<Output = PageResult<()>> + Send + 'a>>;

async fn copy_files(from: &Path, to: &Path) -> std::io::Result<u64> {
    if !tokio::fs::try_exists(from).await? {
        return Ok(0);
    }
    tokio::fs::create_dir_all(to).await?;
    let mut copied = 0;
    let mut entries = tokio::fs::read_dir(from).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::copy(entry.path(), to.join(entry.file_name())).await?;
            copied += 1;
        }
    }
    Ok(copied)
}

impl Pages {
    /// Permanently delete `page`
    ///
    /// Pages with children need `recursive`; descendants are removed first.
    /// On success `page` becomes a tombstone that keeps its id.
    #[instrument(skip(self, page), fields(page_id = page.id()))]
    pub async fn delete(&self, page: &mut Page, recursive: bool) -> PageResult<DeleteReport> {
        let mut report = DeleteReport::default();
        self.delete_recursive(page, recursive, &mut report).await?;
        self.cache.selectors().clear();
        info!(count = report.deleted.len(), "Pages deleted");
        Ok(report)
    }

    fn delete_recursive<'a>(
        &'a self,
        page: &'a mut Page,
        recursive: bool,
        report: &'a mut DeleteReport,
    ) -> DeleteFuture<'a> {
        Box::pin(async move {
            self.check_removable(page)?;
            let id = page.id();

            let children: Vec<PageId> = self
                .db
                .query(
                    "SELECT id FROM pages WHERE parent_id = ? ORDER BY id",
                    vec![Value::Integer(id)],
                )
                .await?
                .iter()
                .map(|row| row.get_i64(0))
                .collect();
            if !children.is_empty() && !recursive {
                return Err(PageError::HasChildren {
                    id,
                    count: children.len() as i64,
                });
            }

            self.emit(PageEventKind::DeleteReady, page, &[]);

            for mut child in self.get_by_ids(&children).await? {
                self.delete_recursive(&mut child, true, report).await?;
            }

            if let Some(template) = self.templates.get(page.template_id()) {
                for name in &template.fields {
                    let Some(field) = self.fields.get(name) else {
                        continue;
                    };
                    let deleted = match self.fieldtypes.for_field(&field) {
                        Ok(fieldtype) => fieldtype.delete_value(&self.db, page, &field).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = deleted {
                        warn!(page_id = id, field = %name, error = %e, "Failed to delete field data");
                        report.warnings.push(format!("Field '{}' of page {}: {}", name, id, e));
                    }
                }
            }

            if let Some(files_path) = &self.config.files_path {
                let dir = files_path.join(id.to_string());
                if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
                    if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                        warn!(page_id = id, error = %e, "Failed to remove page files");
                        report.warnings.push(format!("Files of page {}: {}", id, e));
                    }
                }
            }

            let parent_id = page.parent_id();
            self.db.begin().await?;
            if let Err(e) = self.delete_rows(id, parent_id).await {
                if let Err(rollback) = self.db.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
            self.db.commit().await?;

            if self.child_count(parent_id).await? == 0 {
                self.rebuild_parents(parent_id).await?;
            }

            self.cache.evict(id);
            self.cache.evict(parent_id);
            page.deleted = true;
            page.status = page.status().with(Status::DELETED);
            report.deleted.push(id);

            self.emit(PageEventKind::Deleted, page, &[]);
            Ok(())
        })
    }

    async fn delete_rows(&self, id: PageId, parent_id: PageId) -> PageResult<()> {
        for sql in [
            "DELETE FROM pages_access WHERE pages_id = ?",
            "DELETE FROM pages_sortfields WHERE pages_id = ?",
            "DELETE FROM pages_parents WHERE pages_id = ?1 OR parents_id = ?1",
            "DELETE FROM pages WHERE id = ?",
        ] {
            self.db.execute(sql, vec![Value::Integer(id)]).await?;
        }
        self.recount_children(parent_id).await?;
        Ok(())
    }

    /// Move `page` below `parent_id`
    pub async fn move_to(&self, page: &mut Page, parent_id: PageId) -> PageResult<SaveReport> {
        page.set_parent_id(parent_id);
        self.save(page, &SaveOptions::default()).await
    }

    /// Copy `page` (optionally with its subtree) and return the copy
    ///
    /// Copies get uniquified names and skip family checks. Children are
    /// copied in batches of `clone_batch_size`; the ancestor table is rebuilt
    /// once for the whole copied subtree.
    #[instrument(skip(self, page, options), fields(page_id = page.id(), recursive = options.recursive))]
    pub async fn clone_page(&self, page: &Page, options: &CloneOptions) -> PageResult<Page> {
        if page.is_null() {
            return Err(PageError::NullPage);
        }
        if page.is_new() {
            return Err(PageError::not_saveable(page.id(), "cannot clone an unsaved page"));
        }
        let parent_id = options.parent_id.unwrap_or(page.parent_id());
        if options.recursive && self.ancestor_ids(parent_id).await?.contains(&page.id()) {
            return Err(PageError::family_violation(
                page.id(),
                "cannot clone a page recursively into its own subtree",
            ));
        }

        let copy = self
            .clone_one(page, parent_id, options.name.clone(), false)
            .await?;

        if options.recursive {
            let batch = self.config.clone_batch_size as i64;
            let mut queue = VecDeque::from([(page.id(), copy.id())]);
            while let Some((source_id, copy_id)) = queue.pop_front() {
                let mut offset = 0;
                loop {
                    let ids: Vec<PageId> = self
                        .db
                        .query(
                            "SELECT id FROM pages WHERE parent_id = ? ORDER BY sort, id LIMIT ? OFFSET ?",
                            vec![
                                Value::Integer(source_id),
                                Value::Integer(batch),
                                Value::Integer(offset),
                            ],
                        )
                        .await?
                        .iter()
                        .map(|row| row.get_i64(0))
                        .collect();
                    if ids.is_empty() {
                        break;
                    }
                    offset += ids.len() as i64;

                    let children = self
                        .load_by_ids(&ids, &LoadOptions::default().without_cache())
                        .await?;
                    for child in children.pages {
                        let child_copy = self.clone_one(&child, copy_id, None, true).await?;
                        if child.num_children() > 0 {
                            queue.push_back((child.id(), child_copy.id()));
                        }
                    }
                }
            }
            self.rebuild_parents(copy.id()).await?;
        }

        let copy = self.get_by_id(copy.id()).await?.unwrap_or(copy);
        info!(source = page.id(), copy = copy.id(), "Page cloned");
        Ok(copy)
    }

    async fn clone_one(
        &self,
        source: &Page,
        parent_id: PageId,
        name: Option<String>,
        keep_sort: bool,
    ) -> PageResult<Page> {
        let template = self.template(source.template_id())?;
        self.emit(PageEventKind::CloneReady, source, &[]);

        let mut copy = Page::new(&template);
        for name in &template.fields {
            let value = match source.get(name) {
                Some(value) => value.clone(),
                None => {
                    let mut source = source.clone();
                    self.field_value(&mut source, name).await?
                }
            };
            copy.set(name, value);
        }
        copy.set_parent_id(parent_id);
        copy.set_name(name.unwrap_or_else(|| source.name().to_string()));
        copy.set_status(source.status().without(Status::SYSTEM).without(Status::SYSTEM_ID));
        copy.set_sortfield(source.sortfield().map(str::to_string));
        if keep_sort {
            copy.set_sort(source.sort());
        }

        let options = SaveOptions {
            ignore_family: true,
            adjust_name: true,
            ..SaveOptions::default()
        };
        self.save_page(&mut copy, &options, keep_sort).await?;

        if let Some(files_path) = &self.config.files_path {
            let from = files_path.join(source.id().to_string());
            let to = files_path.join(copy.id().to_string());
            if let Err(e) = copy_files(&from, &to).await {
                warn!(source = source.id(), copy = copy.id(), error = %e, "Failed to copy page files");
            }
        }

        let mut event = PageEvent::new(PageEventKind::Cloned, source);
        event.pages.push(copy.clone());
        self.events.emit(event);
        Ok(copy)
    }
}

#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod lifecycle_test;
