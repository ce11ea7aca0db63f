//! Performance benchmarks for selector parsing and page finding
//!
//! Run with: `cargo bench -p pagestore-core`
//!
//! These benchmarks measure the read path:
//! - Selector parsing and canonicalization
//! - Finder queries over a seeded tree, with and without the selector cache
//! - Hydrating pages through the loader with autojoined fields

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pagestore_core::{
    FieldDef, FindOptions, LoadOptions, PageId, Pages, PagesConfig, SaveOptions, SchemaDefinition,
    Selector, Template,
};
use tempfile::TempDir;
use tokio::runtime::Runtime;

/// Setup a repository with `sections` sections of `per_section` pages each
async fn setup_seeded_pages(sections: usize, per_section: usize) -> (Pages, Vec<PageId>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = PagesConfig::for_path(temp_dir.path().join("bench.db"));
    let schema = SchemaDefinition {
        templates: vec![
            Template::new(1, "home")
                .with_fields(&["title"])
                .with_roles(&["guest"]),
            Template::new(2, "admin").with_fields(&["title"]),
            Template::new(3, "basic-page").with_fields(&["title", "rating"]),
        ],
        fields: vec![
            FieldDef::new(1, "title", "text").with_autojoin(),
            FieldDef::new(2, "rating", "integer").with_autojoin(),
        ],
    };
    let pages = Pages::from_schema(config, schema).await.unwrap();
    pages.install().await.unwrap();

    let mut ids = Vec::new();
    for s in 0..sections {
        let mut section = pages.new_page("basic-page").unwrap();
        section.set_parent_id(1);
        section.set("title", format!("Section {}", s));
        pages.save(&mut section, &SaveOptions::quiet()).await.unwrap();
        for p in 0..per_section {
            let mut page = pages.new_page("basic-page").unwrap();
            page.set_parent_id(section.id());
            page.set("title", format!("Page {} of section {}", p, s));
            page.set("rating", (p % 5) as i64);
            pages.save(&mut page, &SaveOptions::quiet()).await.unwrap();
            ids.push(page.id());
        }
    }
    (pages, ids, temp_dir)
}

fn bench_selector_parse(c: &mut Criterion) {
    let input = "template=basic-page, title%=section, rating>=3, parent.name!=archive|old, sort=-modified, limit=20";
    c.bench_function("selector_parse", |b| {
        b.iter(|| Selector::parse(black_box(input)).unwrap())
    });

    let selector = Selector::parse(input).unwrap();
    c.bench_function("selector_canonical", |b| b.iter(|| black_box(&selector).canonical()));
}

fn bench_find(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (pages, _ids, _temp_dir) = rt.block_on(setup_seeded_pages(10, 50));

    let mut group = c.benchmark_group("find");
    group.sample_size(20);

    group.bench_function("has_parent_field_filter_uncached", |b| {
        b.to_async(&rt).iter(|| async {
            pages
                .find(
                    "has_parent=1, rating>=3, sort=title, limit=25",
                    &FindOptions::default().without_cache(),
                )
                .await
                .unwrap()
        })
    });

    group.bench_function("has_parent_field_filter_cached", |b| {
        b.to_async(&rt).iter(|| async {
            pages
                .find("has_parent=1, rating>=3, sort=title, limit=25", &FindOptions::default())
                .await
                .unwrap()
        })
    });

    group.bench_function("count_contains_words", |b| {
        b.to_async(&rt)
            .iter(|| async { pages.count("title~=section page").await.unwrap() })
    });

    group.finish();
}

fn bench_load(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (pages, ids, _temp_dir) = rt.block_on(setup_seeded_pages(4, 50));
    let batch: Vec<PageId> = ids.into_iter().take(100).collect();

    let mut group = c.benchmark_group("load");
    group.sample_size(20);
    group.bench_function("load_100_autojoined", |b| {
        b.to_async(&rt).iter(|| async {
            pages
                .load_by_ids(black_box(&batch), &LoadOptions::default().without_cache())
                .await
                .unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_selector_parse, bench_find, bench_load);
criterion_main!(benches);
