//! Page name helpers
//!
//! Names are URL segments: lowercase ASCII letters, digits, `-`, `_` and `.`.
//! Sibling collisions are resolved by appending or bumping a numeric suffix
//! (`about`, `about-1`, `about-2`, ...).

use crate::models::PageId;
use crate::services::error::{PageError, PageResult};
use crate::services::pages::Pages;
use chrono::Utc;
use libsql::Value;

/// Base name used when a new page has neither a name nor a title
pub const UNTITLED: &str = "untitled";

const MAX_NAME_LENGTH: usize = 128;

/// Reduce arbitrary text to a valid page name (may return an empty string)
pub fn sanitize_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches(|c| c == '-' || c == '.');
    let mut name: String = trimmed.chars().take(MAX_NAME_LENGTH).collect();
    while name.ends_with('-') || name.ends_with('.') {
        name.pop();
    }
    name
}

/// Split `about-3` into (`about`, Some(3))
fn split_suffix(name: &str) -> (&str, Option<u64>) {
    if let Some((base, suffix)) = name.rsplit_once('-') {
        if !base.is_empty() && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = suffix.parse() {
                return (base, Some(n));
            }
        }
    }
    (name, None)
}

/// `base` followed by `suffix`, shortening `base` so the result stays a valid length
fn with_suffix(base: &str, suffix: &str) -> String {
    let keep = MAX_NAME_LENGTH.saturating_sub(suffix.len());
    let mut end = base.len().min(keep);
    while !base.is_char_boundary(end) {
        end -= 1;
    }
    let base = base[..end].trim_end_matches(|c| c == '-' || c == '.');
    format!("{}{}", base, suffix)
}

/// Next candidate after a collision: `untitled` -> `untitled-1` -> `untitled-2`
pub fn next_suffix(name: &str) -> String {
    match split_suffix(name) {
        (base, Some(n)) => with_suffix(base, &format!("-{}", n + 1)),
        (base, None) => with_suffix(base, "-1"),
    }
}

impl Pages {
    /// Whether `parent_id` already has a child called `name` (other than `exclude`)
    pub(crate) async fn sibling_name_exists(
        &self,
        parent_id: PageId,
        name: &str,
        exclude: PageId,
    ) -> PageResult<bool> {
        let count = self
            .db
            .query_i64(
                "SELECT COUNT(*) FROM pages WHERE parent_id = ? AND name = ? AND id != ?",
                vec![
                    Value::Integer(parent_id),
                    Value::Text(name.to_string()),
                    Value::Integer(exclude),
                ],
            )
            .await?;
        Ok(count > 0)
    }

    /// First free sibling name starting at `base`
    ///
    /// After `max_name_attempts` candidates a timestamp-suffixed name is tried
    /// once before giving up.
    pub(crate) async fn unique_name(
        &self,
        base: &str,
        parent_id: PageId,
        exclude: PageId,
    ) -> PageResult<String> {
        let mut candidate = base.to_string();
        for _ in 0..self.config.max_name_attempts {
            if !self.sibling_name_exists(parent_id, &candidate, exclude).await? {
                return Ok(candidate);
            }
            candidate = next_suffix(&candidate);
        }

        let fallback = with_suffix(base, &format!("-{}", Utc::now().timestamp_micros()));
        if !self.sibling_name_exists(parent_id, &fallback, exclude).await? {
            return Ok(fallback);
        }
        Err(PageError::NameExhausted {
            name: base.to_string(),
            parent_id,
            attempts: self.config.max_name_attempts + 1,
        })
    }
}
