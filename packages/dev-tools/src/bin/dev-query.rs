//! Development Query Console
//!
//! Opens (and installs, if needed) a page repository and prints the result of
//! one selector as JSON. Useful for poking at a database while working on the
//! finder.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p pagestore-dev-tools --bin dev-query -- pages.db "parent=1, sort=name"
//!
//! # Ids and totals only
//! cargo run -p pagestore-dev-tools --bin dev-query -- pages.db "has_parent=1" --ids
//! ```
//!
//! # Environment Variables
//!
//! - `PAGESTORE_SCHEMA`: JSON file with `templates` and `fields` (default: minimal schema)
//! - `PAGESTORE_FILES_PATH`: Directory for per-page files
//! - `RUST_LOG`: Logging level (e.g., "info", "debug", "trace")

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context};
use pagestore_core::{FindOptions, Pages, PagesConfig, SchemaDefinition};
use serde_json::json;

const USAGE: &str = "usage: dev-query <db-path> <selector> [--ids]";

fn load_schema() -> anyhow::Result<SchemaDefinition> {
    match env::var("PAGESTORE_SCHEMA") {
        Ok(path) if !path.is_empty() => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read schema file {}", path))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse schema file {}", path))
        }
        _ => Ok(SchemaDefinition::minimal()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let ids_only = args.iter().any(|a| a == "--ids");
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();
    let [db_path, selector] = positional.as_slice() else {
        bail!(USAGE);
    };

    let mut config = PagesConfig::for_path(PathBuf::from(db_path.as_str()));
    config.apply_env_overrides();
    tracing::info!(db_path = %config.db_path.display(), "Opening repository");

    let pages = Pages::from_schema(config, load_schema()?).await?;
    pages.install().await?;

    let options = FindOptions {
        load_pages: !ids_only,
        ..FindOptions::default().with_caller("dev-query")
    };
    let found = pages.find(selector, &options).await?;

    let output = if ids_only {
        json!({
            "ids": found.ids,
            "total": found.total,
            "start": found.start,
            "limit": found.limit,
        })
    } else {
        let mut rows = Vec::with_capacity(found.len());
        for page in found.iter() {
            rows.push(json!({
                "id": page.id(),
                "name": page.name(),
                "path": pages.path(page).await?,
                "template": pages.template(page.template_id())?.name.clone(),
                "status": page.status().names(),
                "numChildren": page.num_children(),
                "values": page.values(),
            }));
        }
        json!({
            "pages": rows,
            "total": found.total,
            "start": found.start,
            "limit": found.limit,
            "warnings": found.warnings,
        })
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
