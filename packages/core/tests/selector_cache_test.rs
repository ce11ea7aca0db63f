//! Selector and identity cache behaviour seen through the public API

mod common;

#[cfg(test)]
mod selector_cache_tests {
    use crate::common::{add_page, create_test_pages};
    use anyhow::Result;
    use pagestore_core::{FindOptions, Include, SaveOptions, Status};

    #[tokio::test]
    async fn test_cached_results_invalidate_on_save() -> Result<()> {
        let (pages, _temp_dir) = create_test_pages().await?;
        add_page(&pages, "basic-page", 1, "First").await?;

        let before = pages.find("parent=1", &FindOptions::default()).await?;
        assert_eq!(before.len(), 1);

        // a second identical find is served from the caches
        let hits = pages.cache_stats().hits;
        let again = pages.find("parent=1", &FindOptions::default()).await?;
        assert_eq!(again.ids, before.ids);
        assert!(pages.cache_stats().hits > hits);

        add_page(&pages, "basic-page", 1, "Second").await?;
        let after = pages.find("parent=1", &FindOptions::default()).await?;
        assert_eq!(after.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_options_are_part_of_the_signature() -> Result<()> {
        let (pages, _temp_dir) = create_test_pages().await?;
        let mut hidden = pages.new_page("basic-page")?;
        hidden.set_parent_id(1);
        hidden.set_name("hidden");
        hidden.add_status(Status::HIDDEN);
        pages.save(&mut hidden, &SaveOptions::default()).await?;

        let visible = pages.find("parent=1", &FindOptions::default()).await?;
        assert!(visible.is_empty());

        let all = pages
            .find("parent=1", &FindOptions::default().with_include(Include::Hidden))
            .await?;
        assert_eq!(all.len(), 2);

        let ids_only = pages
            .find(
                "parent=1",
                &FindOptions {
                    load_pages: false,
                    ..FindOptions::default().with_include(Include::Hidden)
                },
            )
            .await?;
        assert!(ids_only.pages.is_empty());
        assert_eq!(ids_only.ids, all.ids);
        Ok(())
    }

    #[tokio::test]
    async fn test_uncache_forces_reload() -> Result<()> {
        let (pages, _temp_dir) = create_test_pages().await?;
        let page = add_page(&pages, "basic-page", 1, "Reloaded").await?;

        let first = pages.get_by_id(page.id()).await?.expect("page");
        assert!(pages.is_cached(page.id()));
        assert!(pages.uncache(page.id()));
        assert!(!pages.is_cached(page.id()));

        let second = pages.get_by_id(page.id()).await?.expect("page");
        assert_ne!(first.instance_id(), second.instance_id());

        pages.uncache_all();
        assert_eq!(pages.cache_stats().entries, 0);
        Ok(())
    }
}
