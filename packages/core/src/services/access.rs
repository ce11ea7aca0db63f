//! View access
//!
//! The repository never decides who may see a page on its own. Finds hand
//! their results to an [`AccessFilter`] unless the caller disables access
//! checks (`check_access=0`, or [`crate::Pages::get`]).
//!
//! Each page's access template (the nearest template up the tree that defines
//! roles) is kept in `pages_access`, maintained top-down on every save that
//! changes parent or template.

use crate::models::{Include, Page, PageId, TemplateId, TemplateRegistry};
use crate::services::error::{PageError, PageResult};
use crate::services::pages::Pages;
use chrono::Utc;
use libsql::Value;
use std::sync::Arc;

/// Decides which found pages the current caller may see
pub trait AccessFilter: Send + Sync {
    fn filter(&self, pages: Vec<Page>, include: Include) -> Vec<Page>;
}

/// Lets everything through
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessFilter for AllowAll {
    fn filter(&self, pages: Vec<Page>, _include: Include) -> Vec<Page> {
        pages
    }
}

/// Keeps pages whose access template grants one of the caller's roles
///
/// Trashed pages are only visible to superusers.
#[derive(Debug, Clone)]
pub struct RoleAccessFilter {
    templates: Arc<TemplateRegistry>,
    roles: Vec<String>,
    superuser: bool,
}

impl RoleAccessFilter {
    pub fn new(templates: Arc<TemplateRegistry>, roles: &[&str]) -> Self {
        Self {
            templates,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            superuser: false,
        }
    }

    pub fn superuser(templates: Arc<TemplateRegistry>) -> Self {
        Self {
            templates,
            roles: Vec::new(),
            superuser: true,
        }
    }

    fn can_view(&self, page: &Page) -> bool {
        if self.superuser {
            return true;
        }
        if page.is_trash() {
            return false;
        }
        let template_id = page.access_template_id().unwrap_or(page.template_id());
        self.templates
            .get(template_id)
            .map_or(false, |t| self.roles.iter().any(|role| t.has_role(role)))
    }
}

impl AccessFilter for RoleAccessFilter {
    fn filter(&self, pages: Vec<Page>, _include: Include) -> Vec<Page> {
        pages.into_iter().filter(|p| self.can_view(p)).collect()
    }
}

impl Pages {
    /// Access template inherited by children of `parent_id`
    async fn inherited_access(&self, parent_id: PageId) -> PageResult<Option<TemplateId>> {
        if parent_id <= 0 {
            return Ok(None);
        }
        let row = self
            .db
            .query_one(
                "SELECT pages.templates_id, pages_access.templates_id FROM pages \
                 LEFT JOIN pages_access ON pages_access.pages_id = pages.id \
                 WHERE pages.id = ?",
                vec![Value::Integer(parent_id)],
            )
            .await?;
        Ok(row.map(|row| {
            let own = row.get_i64(0);
            let has_roles = self.templates.get(own).map_or(false, |t| t.has_roles());
            if has_roles {
                own
            } else {
                row.get_opt_i64(1).unwrap_or(own)
            }
        }))
    }

    /// Recompute `pages_access` for `page_id` and its whole subtree
    pub(crate) async fn update_access(&self, page_id: PageId) -> PageResult<Option<TemplateId>> {
        let parent_id = self
            .db
            .query_one(
                "SELECT parent_id FROM pages WHERE id = ?",
                vec![Value::Integer(page_id)],
            )
            .await?
            .map(|row| row.get_i64(0))
            .ok_or(PageError::NotFound(page_id))?;
        let inherited = self.inherited_access(parent_id).await?;
        let now = Utc::now().timestamp();

        let mut own_access = None;
        let mut stack = vec![(page_id, inherited)];
        while let Some((id, inherited)) = stack.pop() {
            let Some(row) = self
                .db
                .query_one(
                    "SELECT templates_id FROM pages WHERE id = ?",
                    vec![Value::Integer(id)],
                )
                .await?
            else {
                continue;
            };
            let template_id = row.get_i64(0);
            let has_roles = self
                .templates
                .get(template_id)
                .map_or(false, |t| t.has_roles());
            let access = if has_roles { Some(template_id) } else { inherited };

            match access {
                Some(access) => {
                    self.db
                        .execute(
                            "INSERT OR REPLACE INTO pages_access (pages_id, templates_id, ts) VALUES (?, ?, ?)",
                            vec![Value::Integer(id), Value::Integer(access), Value::Integer(now)],
                        )
                        .await?;
                }
                None => {
                    self.db
                        .execute(
                            "DELETE FROM pages_access WHERE pages_id = ?",
                            vec![Value::Integer(id)],
                        )
                        .await?;
                }
            }
            if id == page_id {
                own_access = access;
            }

            let children = self
                .db
                .query(
                    "SELECT id FROM pages WHERE parent_id = ?",
                    vec![Value::Integer(id)],
                )
                .await?;
            stack.extend(children.iter().map(|row| (row.get_i64(0), access)));
        }
        Ok(own_access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Template;

    fn registry() -> Arc<TemplateRegistry> {
        let mut registry = TemplateRegistry::new();
        registry
            .register(Template::new(1, "home").with_roles(&["guest"]))
            .unwrap();
        registry
            .register(Template::new(5, "members").with_roles(&["member"]))
            .unwrap();
        registry.register(Template::new(3, "basic-page")).unwrap();
        Arc::new(registry)
    }

    fn page(template: TemplateId, access: Option<TemplateId>) -> Page {
        let registry = registry();
        let mut page = Page::new(&registry.get(template).unwrap());
        page.access_template_id = access;
        page
    }

    #[test]
    fn test_role_filter_uses_access_template() {
        let filter = RoleAccessFilter::new(registry(), &["guest"]);
        let pages = vec![page(3, Some(1)), page(3, Some(5)), page(1, None)];

        let visible = filter.filter(pages, Include::Visible);
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|p| p.access_template_id() != Some(5)));
    }

    #[test]
    fn test_trash_only_for_superuser() {
        let mut trashed = page(3, Some(1));
        trashed.status = crate::models::Status::ON | crate::models::Status::TRASH;

        let guest = RoleAccessFilter::new(registry(), &["guest"]);
        assert!(guest.filter(vec![trashed.clone()], Include::All).is_empty());

        let admin = RoleAccessFilter::superuser(registry());
        assert_eq!(admin.filter(vec![trashed], Include::All).len(), 1);
    }
}
