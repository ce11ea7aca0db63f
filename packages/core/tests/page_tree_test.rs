//! Page Tree Scenarios
//!
//! Walks a small site through its lifecycle and checks that the stored
//! tree stays consistent: child counts, the ancestor table behind
//! `has_parent`, trash placement and restore.

mod common;

#[cfg(test)]
mod page_tree_tests {
    use crate::common::{add_page, assert_counts_consistent, create_test_pages};
    use anyhow::Result;
    use pagestore_core::{
        CloneOptions, FindOptions, PageError, PageId, Pages, SaveOptions, TrashOrigin,
    };

    /// Descendants of `page_id` by walking `parent_id` links
    async fn walk_descendants(pages: &Pages, page_id: PageId) -> Result<Vec<PageId>> {
        let mut ids = pages
            .db()
            .query(
                "WITH RECURSIVE d(id) AS (
                    SELECT id FROM pages WHERE parent_id = ?
                    UNION SELECT p.id FROM pages AS p JOIN d ON p.parent_id = d.id
                ) SELECT id FROM d",
                vec![libsql::Value::Integer(page_id)],
            )
            .await?
            .iter()
            .map(|row| row.get_i64(0))
            .collect::<Vec<_>>();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn has_parent(pages: &Pages, page_id: PageId) -> Result<Vec<PageId>> {
        let mut ids = pages
            .find_ids(&format!("has_parent={}, include=all", page_id))
            .await?;
        ids.sort_unstable();
        Ok(ids)
    }

    #[tokio::test]
    async fn test_blog_posts_find_their_parent() -> Result<()> {
        let (pages, _temp_dir) = create_test_pages().await?;
        let blog = add_page(&pages, "blog", 1, "Blog").await?;

        // blog-post only lives below blog pages and there is exactly one
        let mut post = pages.new_page("blog-post")?;
        post.set("title", "Zebra Crossing");
        pages.save(&mut post, &SaveOptions::default()).await?;
        assert_eq!(post.parent_id(), blog.id());
        assert_eq!(post.name(), "zebra-crossing");

        add_page(&pages, "blog-post", blog.id(), "Apple Pie").await?;
        add_page(&pages, "blog-post", blog.id(), "Mango Lassi").await?;

        let children = pages.children(&blog, "").await?;
        assert_eq!(children.names(), vec!["apple-pie", "mango-lassi", "zebra-crossing"]);
        assert_eq!(pages.path(&post).await?, "/blog/zebra-crossing/");

        let result = add_page(&pages, "basic-page", blog.id(), "Not A Post").await;
        let err = result.unwrap_err().downcast::<PageError>()?;
        assert!(matches!(err, PageError::FamilyViolation { .. }));

        assert_counts_consistent(&pages).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_ancestor_table_tracks_moves() -> Result<()> {
        let (pages, _temp_dir) = create_test_pages().await?;
        let a = add_page(&pages, "basic-page", 1, "A").await?;
        let b = add_page(&pages, "basic-page", 1, "B").await?;
        let mut a1 = add_page(&pages, "basic-page", a.id(), "A1").await?;
        let a1x = add_page(&pages, "basic-page", a1.id(), "A1x").await?;
        add_page(&pages, "basic-page", a1x.id(), "A1x deep").await?;

        for id in [1, a.id(), b.id(), a1.id()] {
            assert_eq!(has_parent(&pages, id).await?, walk_descendants(&pages, id).await?);
        }

        pages.move_to(&mut a1, b.id()).await?;
        for id in [1, a.id(), b.id(), a1.id(), a1x.id()] {
            assert_eq!(has_parent(&pages, id).await?, walk_descendants(&pages, id).await?);
        }
        assert!(has_parent(&pages, a.id()).await?.is_empty());
        assert_eq!(pages.recorded_parents(a1x.id()).await?, {
            let mut expected = vec![1, b.id(), a1.id()];
            expected.sort_unstable();
            expected
        });

        assert_counts_consistent(&pages).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_trash_round_trip() -> Result<()> {
        let (pages, _temp_dir) = create_test_pages().await?;
        add_page(&pages, "basic-page", 1, "Home Intro").await?;
        let mut about = add_page(&pages, "basic-page", 1, "About").await?;
        let team = add_page(&pages, "basic-page", about.id(), "Team").await?;

        pages.trash(&mut about).await?;
        let origin = TrashOrigin::parse(about.name()).expect("trash name");
        assert_eq!(origin.id, about.id());
        assert_eq!(origin.parent_id, 1);
        assert_eq!(origin.sort, 1);
        assert_eq!(origin.name, "about");

        assert!(pages.get_by_path("/about/").await?.is_none());
        assert_eq!(pages.count(&format!("has_parent={}", pages.trash_id())).await?, 0);
        assert_eq!(
            pages
                .find(
                    &format!("has_parent={}, include=all", pages.trash_id()),
                    &FindOptions::default()
                )
                .await?
                .len(),
            2
        );

        pages.restore(&mut about).await?;
        let restored = pages.get_by_path("/about/team/").await?.expect("restored");
        assert_eq!(restored.id(), team.id());
        assert!(!restored.is_trash());
        assert_eq!(about.sort(), 1);

        assert_counts_consistent(&pages).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_clone_then_delete() -> Result<()> {
        let (pages, _temp_dir) = create_test_pages().await?;
        let section = add_page(&pages, "basic-page", 1, "Section").await?;
        for title in ["One", "Two", "Three"] {
            let child = add_page(&pages, "basic-page", section.id(), title).await?;
            add_page(&pages, "basic-page", child.id(), &format!("{} Leaf", title)).await?;
        }

        let options = CloneOptions {
            recursive: true,
            ..CloneOptions::default()
        };
        let mut copy = pages.clone_page(&section, &options).await?;
        assert_eq!(copy.name(), "section-1");
        assert_eq!(has_parent(&pages, copy.id()).await?.len(), 6);
        assert_eq!(
            has_parent(&pages, copy.id()).await?,
            walk_descendants(&pages, copy.id()).await?
        );

        let report = pages.delete(&mut copy, true).await?;
        assert_eq!(report.deleted.len(), 7);
        assert_eq!(*report.deleted.last().unwrap_or(&0), copy.id());
        assert_eq!(has_parent(&pages, section.id()).await?.len(), 6);

        let orphans = pages
            .db()
            .query_i64(
                "SELECT COUNT(*) FROM pages_parents WHERE pages_id NOT IN (SELECT id FROM pages) \
                 OR parents_id NOT IN (SELECT id FROM pages)",
                vec![],
            )
            .await?;
        assert_eq!(orphans, 0);

        assert_counts_consistent(&pages).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_trash_reports_removed_count() -> Result<()> {
        let (pages, _temp_dir) = create_test_pages().await?;
        for i in 0..5 {
            let mut page = add_page(&pages, "basic-page", 1, &format!("Old {}", i)).await?;
            add_page(&pages, "basic-page", page.id(), "Child").await?;
            pages.trash(&mut page).await?;
        }

        assert_eq!(pages.empty_trash().await?, 10);
        assert_eq!(pages.count("has_parent=1, include=all").await?, 1);
        assert_counts_consistent(&pages).await?;
        Ok(())
    }
}
