//! Tests for the write pipeline

#[cfg(test)]
mod tests {
    use crate::db::PageEventKind;
    use crate::models::{FieldValue, Page, Status};
    use crate::services::pages::Pages;
    use crate::services::test_fixtures::{create_page, create_test_pages, create_test_pages_with};
    use crate::services::{PageError, SaveOptions};
    use std::sync::{Arc, Mutex};

    fn record_events(pages: &Pages) -> Arc<Mutex<Vec<&'static str>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            PageEventKind::SaveReady,
            PageEventKind::Saved,
            PageEventKind::Added,
            PageEventKind::Renamed,
            PageEventKind::Moved,
            PageEventKind::StatusChangeReady,
            PageEventKind::StatusChanged,
            PageEventKind::Published,
            PageEventKind::Unpublished,
        ] {
            let sink = seen.clone();
            pages.on(kind, move |event| sink.lock().unwrap().push(event.kind.name()));
        }
        seen
    }

    async fn child_count(pages: &Pages, parent_id: i64) -> i64 {
        pages
            .db()
            .query_i64(
                "SELECT COUNT(*) FROM pages WHERE parent_id = ?",
                vec![libsql::Value::Integer(parent_id)],
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_child_of_root() {
        let (pages, _temp_dir) = create_test_pages().await;
        let mut page = pages.new_page("basic-page").unwrap();
        page.set_parent_id(1);
        page.set_name("about");
        let report = pages.save(&mut page, &SaveOptions::default()).await.unwrap();

        assert!(report.is_new);
        assert!(page.id() > 7);
        assert_eq!(page.sort(), 0);
        assert!(!page.is_new());
        assert!(!page.has_changes());
        assert!(page.published().is_some());

        let root = pages.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(root.num_children(), 2);
        assert_eq!(root.num_children(), child_count(&pages, 1).await);
    }

    #[tokio::test]
    async fn test_generated_names() {
        let (pages, _temp_dir) = create_test_pages().await;
        let mut names = Vec::new();
        for _ in 0..3 {
            let mut page = pages.new_page("basic-page").unwrap();
            page.set_parent_id(1);
            pages.save(&mut page, &SaveOptions::default()).await.unwrap();
            names.push(page.name().to_string());
        }
        assert_eq!(names, vec!["untitled", "untitled-1", "untitled-2"]);

        let mut titled = pages.new_page("basic-page").unwrap();
        titled.set_parent_id(1);
        titled.set("title", "Hello World!");
        pages.save(&mut titled, &SaveOptions::default()).await.unwrap();
        assert_eq!(titled.name(), "hello-world");
    }

    #[tokio::test]
    async fn test_explicit_duplicate_name() {
        let (pages, _temp_dir) = create_test_pages().await;
        create_page(&pages, "basic-page", 1, "about").await;

        let mut duplicate = pages.new_page("basic-page").unwrap();
        duplicate.set_parent_id(1);
        duplicate.set_name("About");
        let result = pages.save(&mut duplicate, &SaveOptions::default()).await;
        assert!(matches!(result, Err(PageError::FamilyViolation { .. })));

        let options = SaveOptions {
            adjust_name: true,
            ..SaveOptions::default()
        };
        pages.save(&mut duplicate, &options).await.unwrap();
        assert_eq!(duplicate.name(), "about-1");
    }

    #[tokio::test]
    async fn test_event_order() {
        let (pages, _temp_dir) = create_test_pages().await;
        let seen = record_events(&pages);

        let mut page = create_page(&pages, "basic-page", 1, "events").await;
        assert_eq!(*seen.lock().unwrap(), vec!["saveReady", "saved", "added"]);

        seen.lock().unwrap().clear();
        page.set_name("renamed");
        pages.save(&mut page, &SaveOptions::default()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["saveReady", "saved", "renamed"]);

        seen.lock().unwrap().clear();
        page.add_status(Status::UNPUBLISHED);
        pages.save(&mut page, &SaveOptions::default()).await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["statusChangeReady", "saveReady", "saved", "statusChanged", "unpublished"]
        );

        seen.lock().unwrap().clear();
        page.remove_status(Status::UNPUBLISHED);
        pages.save(&mut page, &SaveOptions::default()).await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["statusChangeReady", "saveReady", "saved", "statusChanged", "published"]
        );
    }

    #[tokio::test]
    async fn test_move_updates_counts() {
        let (pages, _temp_dir) = create_test_pages().await;
        let a = create_page(&pages, "basic-page", 1, "a").await;
        let b = create_page(&pages, "basic-page", 1, "b").await;
        let mut child = create_page(&pages, "basic-page", a.id(), "child").await;

        let seen = record_events(&pages);
        pages.move_to(&mut child, b.id()).await.unwrap();
        assert!(seen.lock().unwrap().contains(&"moved"));

        let a = pages.get_by_id(a.id()).await.unwrap().unwrap();
        let b = pages.get_by_id(b.id()).await.unwrap().unwrap();
        assert_eq!(a.num_children(), 0);
        assert_eq!(b.num_children(), 1);
        assert_eq!(pages.path(&child).await.unwrap(), "/b/child/");
        assert_eq!(pages.recorded_parents(child.id()).await.unwrap(), Vec::<i64>::new());
        assert_eq!(pages.recorded_parents(b.id()).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_family_rules() {
        let (pages, _temp_dir) = create_test_pages().await;
        let folder = create_page(&pages, "folder", 1, "folder").await;
        let leaf = create_page(&pages, "leaf", 1, "leaf").await;

        // folder only takes basic-page children
        let mut notice = pages.new_page("notice").unwrap();
        notice.set_parent_id(folder.id());
        notice.set_name("notice");
        let result = pages.save(&mut notice, &SaveOptions::default()).await;
        assert!(matches!(result, Err(PageError::FamilyViolation { .. })));
        create_page(&pages, "basic-page", folder.id(), "allowed").await;

        // leaf takes no children
        let mut below_leaf = pages.new_page("basic-page").unwrap();
        below_leaf.set_parent_id(leaf.id());
        below_leaf.set_name("below");
        let result = pages.save(&mut below_leaf, &SaveOptions::default()).await;
        assert!(matches!(result, Err(PageError::FamilyViolation { .. })));

        // ignore_family skips template rules
        let options = SaveOptions {
            ignore_family: true,
            ..SaveOptions::default()
        };
        pages.save(&mut below_leaf, &options).await.unwrap();

        // leaf can't be moved
        let mut leaf = leaf;
        let result = pages.move_to(&mut leaf, folder.id()).await;
        assert!(matches!(result, Err(PageError::FamilyViolation { .. })));
    }

    #[tokio::test]
    async fn test_move_below_own_descendant() {
        let (pages, _temp_dir) = create_test_pages().await;
        let mut parent = create_page(&pages, "basic-page", 1, "parent").await;
        let child = create_page(&pages, "basic-page", parent.id(), "child").await;

        let result = pages.move_to(&mut parent, child.id()).await;
        assert!(matches!(result, Err(PageError::FamilyViolation { .. })));

        parent.set_parent_id(child.id());
        let options = SaveOptions {
            ignore_family: true,
            ..SaveOptions::default()
        };
        let result = pages.save(&mut parent, &options).await;
        assert!(matches!(result, Err(PageError::FamilyViolation { .. })));
    }

    #[tokio::test]
    async fn test_unsaveable_pages() {
        let (pages, _temp_dir) = create_test_pages().await;

        let mut orphan = pages.new_page("basic-page").unwrap();
        orphan.set_parent_id(999);
        orphan.set_name("orphan");
        let result = pages.save(&mut orphan, &SaveOptions::default()).await;
        assert!(matches!(result, Err(PageError::NotSaveable { .. })));
        assert_eq!(pages.count("name=orphan, include=all").await.unwrap(), 0);

        let mut null = Page::null();
        let result = pages.save(&mut null, &SaveOptions::default()).await;
        assert!(matches!(result, Err(PageError::NullPage)));
    }

    #[tokio::test]
    async fn test_corrupted_fields() {
        let (pages, _temp_dir) = create_test_pages().await;
        let mut page = create_page(&pages, "basic-page", 1, "corrupt").await;

        page.mark_corrupted("title");
        page.set_name("still-saves");
        let report = pages.save(&mut page, &SaveOptions::default()).await.unwrap();
        assert_eq!(report.warnings.len(), 1);

        page.set("title", "Changed");
        let result = pages.save(&mut page, &SaveOptions::default()).await;
        assert!(matches!(result, Err(PageError::NotSaveable { .. })));
    }

    #[tokio::test]
    async fn test_output_formatting_blocks_formatted_fields() {
        let (pages, _temp_dir) = create_test_pages().await;
        let mut page = create_page(&pages, "basic-page", 1, "formatted").await;

        page.set_output_formatting(true);
        page.set("body", "<p>Rendered</p>");
        let result = pages.save(&mut page, &SaveOptions::default()).await;
        assert!(matches!(result, Err(PageError::NotSaveable { .. })));

        page.set_output_formatting(false);
        pages.save(&mut page, &SaveOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_unpublish_template() {
        let (pages, _temp_dir) = create_test_pages().await;
        let mut notice = pages.new_page("notice").unwrap();
        notice.set_parent_id(1);
        notice.set_name("notice");
        notice.add_status(Status::UNPUBLISHED);
        pages.save(&mut notice, &SaveOptions::default()).await.unwrap();
        assert!(!notice.is_unpublished());
    }

    #[tokio::test]
    async fn test_quiet_save_keeps_modified() {
        let (pages, _temp_dir) = create_test_pages().await;
        let mut page = create_page(&pages, "basic-page", 1, "quiet").await;
        let modified = page.modified();

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        page.set("title", "Quiet");
        pages.save(&mut page, &SaveOptions::quiet()).await.unwrap();
        assert_eq!(page.modified(), modified);

        page.set("title", "Loud");
        pages.save(&mut page, &SaveOptions::default()).await.unwrap();
        assert!(page.modified() > modified);
    }

    #[tokio::test]
    async fn test_template_change_removes_orphaned_values() {
        let (pages, _temp_dir) = create_test_pages().await;
        let mut page = pages.new_page("basic-page").unwrap();
        page.set_parent_id(1);
        page.set_name("switch");
        page.set("rating", 5i64);
        pages.save(&mut page, &SaveOptions::default()).await.unwrap();

        let notice = pages.templates().resolve("notice").unwrap();
        page.set_template(&notice);
        pages.save(&mut page, &SaveOptions::default()).await.unwrap();

        assert!(page.get("rating").is_none());
        let stored = pages
            .db()
            .query_i64(
                "SELECT COUNT(*) FROM field_rating WHERE pages_id = ?",
                vec![libsql::Value::Integer(page.id())],
            )
            .await
            .unwrap();
        assert_eq!(stored, 0);
        assert_eq!(page.get("title"), Some(&FieldValue::Text(String::new())));
    }

    #[tokio::test]
    async fn test_save_columns_hook() {
        let (pages, _temp_dir) = create_test_pages().await;
        pages
            .db()
            .execute("ALTER TABLE pages ADD COLUMN note TEXT", vec![])
            .await
            .unwrap();
        pages.events().add_save_columns_hook(|page| {
            vec![
                ("note".to_string(), libsql::Value::Text(format!("saved {}", page.name()))),
                ("name".to_string(), libsql::Value::Text("ignored".into())),
            ]
        });

        let page = create_page(&pages, "basic-page", 1, "hooked").await;
        let row = pages
            .db()
            .query_one(
                "SELECT note, name FROM pages WHERE id = ?",
                vec![libsql::Value::Integer(page.id())],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get_string(0), "saved hooked");
        assert_eq!(row.get_string(1), "hooked");
    }

    async fn stored_name(pages: &Pages, id: i64) -> String {
        pages
            .db()
            .query_one(
                "SELECT name FROM pages WHERE id = ?",
                vec![libsql::Value::Integer(id)],
            )
            .await
            .unwrap()
            .unwrap()
            .get_string(0)
    }

    #[tokio::test]
    async fn test_rename_collision_retries_with_suffix() {
        let (pages, _temp_dir) = create_test_pages().await;
        create_page(&pages, "basic-page", 1, "about").await;
        let mut contact = create_page(&pages, "basic-page", 1, "contact").await;

        // ignore_family skips the sibling check, so the unique index decides
        contact.set_name("about");
        let options = SaveOptions {
            ignore_family: true,
            ..SaveOptions::default()
        };
        pages.save(&mut contact, &options).await.unwrap();

        assert_eq!(contact.name(), "about-1");
        assert_eq!(stored_name(&pages, contact.id()).await, "about-1");
    }

    #[tokio::test]
    async fn test_name_attempts_exhausted() {
        let (pages, _temp_dir) = create_test_pages_with(|config| config.max_name_attempts = 1).await;
        create_page(&pages, "basic-page", 1, "about").await;
        let mut contact = create_page(&pages, "basic-page", 1, "contact").await;

        contact.set_name("about");
        let options = SaveOptions {
            ignore_family: true,
            ..SaveOptions::default()
        };
        let result = pages.save(&mut contact, &options).await;
        assert!(
            matches!(result, Err(PageError::NameExhausted { attempts: 1, parent_id: 1, .. })),
            "unexpected result: {:?}",
            result
        );
        assert_eq!(stored_name(&pages, contact.id()).await, "contact");
    }
}
