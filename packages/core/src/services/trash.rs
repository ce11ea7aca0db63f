//! Trash, restore and empty trash
//!
//! Trashing moves a page below the trash page and renames it
//! `{id}.{parent_id}.{sort}_{name}`, which is unique under the trash and
//! records where the page came from. The `trash` status flag is set on the
//! page and every descendant. Restoring parses the name back and returns the
//! page to its recorded parent and sort position.

use crate::models::{Page, PageId, Status};
use crate::services::editor::{SaveOptions, SaveReport};
use crate::services::error::{PageError, PageResult};
use crate::services::pages::Pages;
use libsql::Value;
use regex::Regex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

fn trash_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)_(.+)$").unwrap())
}

/// Where a trashed page came from, as encoded in its name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashOrigin {
    pub id: PageId,
    pub parent_id: PageId,
    pub sort: i64,
    pub name: String,
}

impl TrashOrigin {
    pub fn parse(trash_name: &str) -> Option<Self> {
        let caps = trash_name_regex().captures(trash_name)?;
        Some(Self {
            id: caps[1].parse().ok()?,
            parent_id: caps[2].parse().ok()?,
            sort: caps[3].parse().ok()?,
            name: caps[4].to_string(),
        })
    }

    pub fn trash_name(&self) -> String {
        format!("{}.{}.{}_{}", self.id, self.parent_id, self.sort, self.name)
    }
}

impl Pages {
    /// Reasons `page` may not be trashed or deleted
    pub(crate) fn check_removable(&self, page: &Page) -> PageResult<()> {
        if page.is_null() {
            return Err(PageError::NullPage);
        }
        if page.is_new() {
            return Err(PageError::not_deleteable(page.id(), "page has not been saved"));
        }
        let id = page.id();
        if id == self.config.root_id || id == self.config.trash_id || page.status().is_system() {
            return Err(PageError::SystemProtected { id });
        }
        if page.status().is_locked() {
            return Err(PageError::not_deleteable(id, "page is locked"));
        }
        Ok(())
    }

    /// Move `page` (and its subtree) to the trash
    #[instrument(skip(self, page), fields(page_id = page.id()))]
    pub async fn trash(&self, page: &mut Page) -> PageResult<SaveReport> {
        self.check_removable(page)?;
        let template = self.template(page.template_id())?;
        if template.no_trash {
            return Err(PageError::not_deleteable(
                page.id(),
                format!("template '{}' does not allow trashing", template.name),
            ));
        }

        // the save renames the page once it lands below the trash
        if !self.is_in_trash(page.parent_id()).await? {
            page.set_parent_id(self.config.trash_id);
        }
        page.add_status(Status::TRASH);

        let options = SaveOptions {
            ignore_family: true,
            ..SaveOptions::default()
        };
        let report = self.save(page, &options).await?;
        info!(page_id = page.id(), "Page moved to trash");
        Ok(report)
    }

    /// Return a trashed page to where it came from
    ///
    /// The original name is only restored when no sibling took it meanwhile;
    /// otherwise the trash name is kept and a warning reported. A parent set
    /// explicitly by the caller wins over the recorded one.
    #[instrument(skip(self, page), fields(page_id = page.id()))]
    pub async fn restore(&self, page: &mut Page) -> PageResult<SaveReport> {
        if page.is_null() {
            return Err(PageError::NullPage);
        }
        if !page.is_trash() {
            return Ok(SaveReport {
                id: page.id(),
                ..SaveReport::default()
            });
        }

        if !page.is_changed("parent") {
            match TrashOrigin::parse(page.name()).filter(|o| o.id == page.id()) {
                Some(origin) => {
                    page.set_parent_id(origin.parent_id);
                    page.set_sort(origin.sort);
                }
                None if page.parent_id() != self.config.trash_id => {
                    return Err(PageError::not_saveable(
                        page.id(),
                        format!(
                            "page is inside trashed page {}; restore that page or set a new parent",
                            page.parent_id()
                        ),
                    ));
                }
                None => {
                    return Err(PageError::not_saveable(
                        page.id(),
                        "trash name does not record the original parent; set a new parent",
                    ));
                }
            }
        }

        let options = SaveOptions {
            ignore_family: true,
            ..SaveOptions::default()
        };
        let report = self.save(page, &options).await?;
        info!(page_id = page.id(), parent_id = page.parent_id(), "Page restored");
        Ok(report)
    }

    /// Rename a page entering the trash to `{id}.{parent_id}.{sort}_{name}`
    ///
    /// Parent, sort and name are taken from the last persisted state, so a
    /// rename in the same save does not leak into the recorded origin.
    pub(crate) fn apply_trash_name(&self, page: &mut Page) {
        if TrashOrigin::parse(page.name()).map_or(false, |o| o.id == page.id()) {
            return;
        }
        let origin = TrashOrigin {
            id: page.id(),
            parent_id: page.original_parent_id().unwrap_or(page.parent_id()),
            sort: page.original.as_ref().map_or(page.sort(), |o| o.sort),
            name: page.original_name().unwrap_or(page.name()).to_string(),
        };
        page.set_name(origin.trash_name());
    }

    /// Undo [`Pages::apply_trash_name`] for a page leaving the trash
    pub(crate) async fn recover_trash_name(
        &self,
        page: &mut Page,
        warnings: &mut Vec<String>,
    ) -> PageResult<()> {
        let Some(origin) = TrashOrigin::parse(page.name()).filter(|o| o.id == page.id()) else {
            return Ok(());
        };
        if self
            .sibling_name_exists(page.parent_id(), &origin.name, page.id())
            .await?
        {
            warn!(page_id = page.id(), name = %origin.name, "Original name taken, keeping trash name");
            warnings.push(format!(
                "Name '{}' is taken under parent {}; kept '{}'",
                origin.name,
                page.parent_id(),
                page.name()
            ));
        } else {
            page.set_name(origin.name);
        }
        Ok(())
    }

    /// Set or clear the trash flag on every descendant of `page_id`
    pub(crate) async fn set_subtree_trash(&self, page_id: PageId, on: bool) -> PageResult<()> {
        let update = if on {
            "status = status | ?"
        } else {
            "status = status & ~?"
        };
        self.db
            .execute(
                &format!(
                    "WITH RECURSIVE subtree(id) AS (
                        SELECT id FROM pages WHERE parent_id = ?
                        UNION
                        SELECT p.id FROM pages AS p JOIN subtree AS s ON p.parent_id = s.id
                    )
                    UPDATE pages SET {} WHERE id IN (SELECT id FROM subtree)",
                    update
                ),
                vec![Value::Integer(page_id), Value::Integer(Status::TRASH.bits())],
            )
            .await?;
        Ok(())
    }

    /// Permanently delete everything in the trash
    ///
    /// Leaves are removed in batches. Each batch gets the configured time
    /// budget afresh; a batch that runs past it stops between two pages and
    /// the rest is picked up by the next batch. Whatever remains below the
    /// trash page is then deleted recursively. Returns the number of pages
    /// removed, or the negated number of trashed pages left behind when not
    /// everything could go.
    #[instrument(skip(self))]
    pub async fn empty_trash(&self) -> PageResult<i64> {
        let budget = Duration::from_secs(self.config.empty_trash_time_budget_secs);
        let batch_size = self.config.empty_trash_batch_size as i64;
        let mut removed: i64 = 0;

        loop {
            let ids: Vec<PageId> = self
                .db
                .query(
                    "SELECT id FROM pages WHERE (status & ?) != 0 AND id != ? \
                     AND NOT EXISTS (SELECT 1 FROM pages AS c WHERE c.parent_id = pages.id) \
                     ORDER BY id LIMIT ?",
                    vec![
                        Value::Integer(Status::TRASH.bits()),
                        Value::Integer(self.config.trash_id),
                        Value::Integer(batch_size),
                    ],
                )
                .await?
                .iter()
                .map(|row| row.get_i64(0))
                .collect();
            if ids.is_empty() {
                break;
            }

            match self.delete_batch(&ids, Instant::now() + budget).await {
                Ok(0) => break,
                Ok(count) => removed += count,
                Err(e) => {
                    warn!(error = %e, "Empty trash batch failed");
                    break;
                }
            }
        }

        let leftovers: Vec<PageId> = self
            .db
            .query(
                "SELECT id FROM pages WHERE parent_id = ? ORDER BY id",
                vec![Value::Integer(self.config.trash_id)],
            )
            .await?
            .iter()
            .map(|row| row.get_i64(0))
            .collect();
        for id in leftovers {
            let Some(mut page) = self.get_by_id(id).await? else {
                continue;
            };
            match self.delete(&mut page, true).await {
                Ok(report) => removed += report.deleted.len() as i64,
                Err(e) => warn!(page_id = id, error = %e, "Failed to delete trashed page"),
            }
        }

        let remaining = self
            .db
            .query_i64(
                "SELECT COUNT(*) FROM pages WHERE id != ? AND ((status & ?) != 0 OR parent_id = ?)",
                vec![
                    Value::Integer(self.config.trash_id),
                    Value::Integer(Status::TRASH.bits()),
                    Value::Integer(self.config.trash_id),
                ],
            )
            .await?;
        self.cache.evict_all();

        info!(removed, remaining, "Trash emptied");
        Ok(if remaining > 0 { -remaining } else { removed })
    }

    /// Delete `ids` one at a time; past `deadline` the batch stops before
    /// the next page, after at least one page went
    pub(crate) async fn delete_batch(&self, ids: &[PageId], deadline: Instant) -> PageResult<i64> {
        let mut count = 0;
        for mut page in self.get_by_ids(ids).await? {
            if count > 0 && Instant::now() >= deadline {
                debug!(deleted = count, "Batch time budget used up");
                break;
            }
            match self.delete(&mut page, false).await {
                Ok(report) => count += report.deleted.len() as i64,
                Err(e) => warn!(page_id = page.id(), error = %e, "Failed to delete trashed page"),
            }
        }
        Ok(count)
    }
}
