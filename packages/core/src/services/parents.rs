//! Ancestor table maintenance
//!
//! `pages_parents` holds one `(pages_id, parents_id)` row per ancestor of
//! every page that has children. `has_parent=X` then reduces to
//! `parent_id = X OR parent_id IN (SELECT pages_id ... WHERE parents_id = X)`.
//!
//! Leaf pages have no rows, so a rebuild is only needed for a moved subtree
//! and for parents that gained their first or lost their last child.

use crate::models::PageId;
use crate::services::error::PageResult;
use crate::services::pages::Pages;
use libsql::Value;
use tracing::debug;

const SUBTREE_CTE: &str = "WITH RECURSIVE subtree(id) AS (
        SELECT ?
        UNION
        SELECT p.id FROM pages AS p JOIN subtree AS s ON p.parent_id = s.id
    )";

impl Pages {
    /// Recompute ancestor rows for `page_id` and everything below it
    pub(crate) async fn rebuild_parents(&self, page_id: PageId) -> PageResult<()> {
        if page_id <= 0 {
            return Ok(());
        }
        let removed = self
            .db
            .execute(
                &format!(
                    "{SUBTREE_CTE} DELETE FROM pages_parents WHERE pages_id IN (SELECT id FROM subtree)"
                ),
                vec![Value::Integer(page_id)],
            )
            .await?;

        let inserted = self
            .db
            .execute(
                &format!(
                    "{SUBTREE_CTE},
                    ancestry(pages_id, parents_id) AS (
                        SELECT s.id, p.parent_id FROM subtree AS s
                        JOIN pages AS p ON p.id = s.id WHERE p.parent_id > 0
                        UNION
                        SELECT a.pages_id, p.parent_id FROM ancestry AS a
                        JOIN pages AS p ON p.id = a.parents_id WHERE p.parent_id > 0
                    )
                    INSERT OR IGNORE INTO pages_parents (pages_id, parents_id)
                    SELECT pages_id, parents_id FROM ancestry
                    WHERE EXISTS (SELECT 1 FROM pages AS c WHERE c.parent_id = ancestry.pages_id)"
                ),
                vec![Value::Integer(page_id)],
            )
            .await?;

        debug!(page_id, removed, inserted, "Rebuilt ancestor rows");
        Ok(())
    }

    /// Rebuild after `page_id` got a new parent
    ///
    /// `old_parent` is None for new pages.
    pub(crate) async fn parents_after_move(
        &self,
        page_id: PageId,
        old_parent: Option<PageId>,
        new_parent: PageId,
    ) -> PageResult<()> {
        let new_count = self.child_count(new_parent).await?;
        if new_count == 1 {
            // first child: the parent itself now needs rows
            self.rebuild_parents(new_parent).await?;
        } else if old_parent.is_some() {
            self.rebuild_parents(page_id).await?;
        }

        if let Some(old_parent) = old_parent.filter(|p| *p != new_parent) {
            if self.child_count(old_parent).await? == 0 {
                self.rebuild_parents(old_parent).await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn child_count(&self, parent_id: PageId) -> PageResult<i64> {
        Ok(self
            .db
            .query_i64(
                "SELECT COUNT(*) FROM pages WHERE parent_id = ?",
                vec![Value::Integer(parent_id)],
            )
            .await?)
    }

    /// Ancestor ids recorded for `page_id`, as used by `has_parent`
    pub async fn recorded_parents(&self, page_id: PageId) -> PageResult<Vec<PageId>> {
        let rows = self
            .db
            .query(
                "SELECT parents_id FROM pages_parents WHERE pages_id = ? ORDER BY parents_id",
                vec![Value::Integer(page_id)],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get_i64(0)).collect())
    }
}
