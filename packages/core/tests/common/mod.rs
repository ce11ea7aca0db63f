//! Shared setup for integration tests

#![allow(dead_code)]

use anyhow::Result;
use pagestore_core::{
    FieldDef, Page, PageId, Pages, PagesConfig, SaveOptions, SchemaDefinition, Template,
};
use tempfile::TempDir;

pub fn site_schema() -> SchemaDefinition {
    SchemaDefinition {
        templates: vec![
            Template::new(1, "home")
                .with_fields(&["title"])
                .with_roles(&["guest"]),
            Template::new(2, "admin").with_fields(&["title"]),
            Template::new(3, "basic-page").with_fields(&["title", "summary", "rating"]),
            Template::new(4, "blog")
                .with_fields(&["title"])
                .with_child_templates(&[5])
                .with_sort_field("title"),
            Template::new(5, "blog-post")
                .with_fields(&["title", "summary", "rating"])
                .with_parent_templates(&[4]),
            Template::new(6, "members")
                .with_fields(&["title"])
                .with_roles(&["member"]),
        ],
        fields: vec![
            FieldDef::new(1, "title", "text").with_autojoin(),
            FieldDef::new(2, "summary", "text"),
            FieldDef::new(3, "rating", "integer").with_autojoin(),
        ],
    }
}

/// Installed repository in a fresh temp dir
pub async fn create_test_pages() -> Result<(Pages, TempDir)> {
    let temp_dir = TempDir::new()?;
    let mut config = PagesConfig::for_path(temp_dir.path().join("test.db"));
    config.files_path = Some(temp_dir.path().join("files"));

    let pages = Pages::from_schema(config, site_schema()).await?;
    pages.install().await?;
    Ok((pages, temp_dir))
}

pub async fn add_page(pages: &Pages, template: &str, parent_id: PageId, title: &str) -> Result<Page> {
    let mut page = pages.new_page(template)?;
    page.set_parent_id(parent_id);
    page.set("title", title);
    pages.save(&mut page, &SaveOptions::default()).await?;
    Ok(page)
}

/// Every stored `num_children` matches the real child count
pub async fn assert_counts_consistent(pages: &Pages) -> Result<()> {
    let mismatches = pages
        .db()
        .query_i64(
            "SELECT COUNT(*) FROM pages AS p \
             WHERE p.num_children != (SELECT COUNT(*) FROM pages AS c WHERE c.parent_id = p.id)",
            vec![],
        )
        .await?;
    assert_eq!(mismatches, 0, "num_children out of sync");
    Ok(())
}
