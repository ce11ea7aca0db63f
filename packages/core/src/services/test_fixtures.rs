//! Shared fixtures for repository unit tests

use crate::config::PagesConfig;
use crate::models::{FieldDef, Page, PageId, SchemaDefinition, Template};
use crate::services::{Pages, SaveOptions};
use tempfile::TempDir;

pub(crate) fn schema() -> SchemaDefinition {
    SchemaDefinition {
        templates: vec![
            Template::new(1, "home")
                .with_fields(&["title"])
                .with_roles(&["guest"]),
            Template::new(2, "admin").with_fields(&["title"]),
            Template::new(3, "basic-page").with_fields(&["title", "body", "related", "rating"]),
            Template::new(4, "folder")
                .with_fields(&["title"])
                .with_child_templates(&[3]),
            Template::new(5, "leaf")
                .with_fields(&["title"])
                .no_children()
                .no_move()
                .no_trash(),
            Template::new(6, "notice")
                .with_fields(&["title"])
                .no_unpublish(),
            Template::new(7, "members")
                .with_fields(&["title"])
                .with_roles(&["member"]),
        ],
        fields: vec![
            FieldDef::new(1, "title", "text").with_autojoin(),
            FieldDef::new(2, "body", "text").with_formatted(),
            FieldDef::new(3, "related", "page").with_autoload(),
            FieldDef::new(4, "rating", "integer").with_autojoin(),
        ],
    }
}

/// Installed repository in a temp dir; keep the dir alive for the test
pub(crate) async fn create_test_pages() -> (Pages, TempDir) {
    create_test_pages_with(|_| {}).await
}

/// Like [`create_test_pages`] with config tweaks applied before opening
pub(crate) async fn create_test_pages_with(configure: impl FnOnce(&mut PagesConfig)) -> (Pages, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = PagesConfig::for_path(temp_dir.path().join("test.db"));
    config.files_path = Some(temp_dir.path().join("files"));
    configure(&mut config);

    let pages = Pages::from_schema(config, schema()).await.unwrap();
    pages.install().await.unwrap();
    (pages, temp_dir)
}

/// Create and save a page
pub(crate) async fn create_page(
    pages: &Pages,
    template: &str,
    parent_id: PageId,
    name: &str,
) -> Page {
    let mut page = pages.new_page(template).unwrap();
    page.set_parent_id(parent_id);
    page.set_name(name);
    pages.save(&mut page, &SaveOptions::default()).await.unwrap();
    page
}
