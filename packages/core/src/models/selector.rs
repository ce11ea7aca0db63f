//! Selector parsing
//!
//! A selector is a comma-separated list of `field<op>value` items:
//!
//! ```text
//! parent=/about/, template=basic-page|article, title*=news, !status=hidden,
//! sort=-created, limit=10
//! ```
//!
//! - OR over fields: `title|body*=rust`
//! - OR over values: `name=a|b`
//! - quoted values keep commas and pipes: `title="a, b"`
//! - `!` negates an item
//! - runtime options (`limit`, `start`, `sort`, `include`, `check_access`) are
//!   ordinary items consumed by the finder instead of becoming predicates
//!
//! A bare integer selects by id and a bare `/path/` selects by path.

use crate::models::page::PageId;
use crate::models::status::Status;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Items consumed as options rather than predicates
pub const RUNTIME_OPTIONS: &[&str] = &["limit", "start", "sort", "include", "check_access"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectorError {
    #[error("Selector item '{0}' has no operator")]
    MissingOperator(String),

    #[error("Invalid field '{field}' in selector item '{item}'")]
    InvalidField { field: String, item: String },

    #[error("Invalid value '{value}' for '{field}'")]
    InvalidValue { field: String, value: String },

    #[error("Unterminated quote in selector '{0}'")]
    UnterminatedQuote(String),
}

impl SelectorError {
    pub fn invalid_value(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    /// `*=` phrase anywhere in the value
    ContainsPhrase,
    /// `~=` every word anywhere in the value
    ContainsWords,
    /// `^=`
    StartsWith,
    /// `$=`
    EndsWith,
    /// `%=` SQL LIKE, value used as a substring
    ContainsLike,
    /// `&` bitwise AND is non-zero
    BitAnd,
}

impl Operator {
    /// Two-character operators first so `!=` never parses as `!` + `=`
    const PARSE_ORDER: [(&'static str, Operator); 12] = [
        ("!=", Operator::NotEqual),
        ("<=", Operator::LessEqual),
        (">=", Operator::GreaterEqual),
        ("*=", Operator::ContainsPhrase),
        ("~=", Operator::ContainsWords),
        ("^=", Operator::StartsWith),
        ("$=", Operator::EndsWith),
        ("%=", Operator::ContainsLike),
        ("=", Operator::Equal),
        ("<", Operator::Less),
        (">", Operator::Greater),
        ("&", Operator::BitAnd),
    ];

    const CHARS: [char; 10] = ['=', '!', '<', '>', '*', '~', '^', '$', '%', '&'];

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::Less => "<",
            Operator::Greater => ">",
            Operator::LessEqual => "<=",
            Operator::GreaterEqual => ">=",
            Operator::ContainsPhrase => "*=",
            Operator::ContainsWords => "~=",
            Operator::StartsWith => "^=",
            Operator::EndsWith => "$=",
            Operator::ContainsLike => "%=",
            Operator::BitAnd => "&",
        }
    }

    fn parse_prefix(s: &str) -> Option<Operator> {
        Self::PARSE_ORDER
            .iter()
            .find(|(token, _)| s.starts_with(token))
            .map(|(_, op)| *op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `fields<op>values` term
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectorItem {
    /// OR-ed field names (at least one)
    pub fields: Vec<String>,
    pub operator: Operator,
    /// OR-ed values (at least one, possibly empty string)
    pub values: Vec<String>,
    pub negated: bool,
}

impl SelectorItem {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            fields: vec![normalize_field(&field.into())],
            operator,
            values: vec![value.into()],
            negated: false,
        }
    }

    /// First field name
    pub fn field(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or_default()
    }

    /// First value
    pub fn value(&self) -> &str {
        self.values.first().map(String::as_str).unwrap_or_default()
    }

    pub fn is_option(&self) -> bool {
        self.fields.len() == 1 && RUNTIME_OPTIONS.contains(&self.field())
    }

    fn canonical(&self) -> String {
        let values: Vec<String> = self.values.iter().map(|v| quote_if_needed(v)).collect();
        format!(
            "{}{}{}{}",
            if self.negated { "!" } else { "" },
            self.fields.join("|"),
            self.operator,
            values.join("|")
        )
    }
}

/// Which statuses a find may return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Include {
    /// Only pages below the hidden threshold
    #[default]
    #[serde(rename = "none")]
    Visible,
    Hidden,
    Unpublished,
    /// Everything, including trash; callers must pass access control separately
    All,
}

impl Include {
    pub fn from_name(name: &str) -> Option<Include> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Some(Include::Visible),
            "hidden" => Some(Include::Hidden),
            "unpublished" => Some(Include::Unpublished),
            "all" => Some(Include::All),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Include::Visible => "none",
            Include::Hidden => "hidden",
            Include::Unpublished => "unpublished",
            Include::All => "all",
        }
    }

    /// Exclusive upper bound on `status`, if any
    pub fn status_ceiling(self) -> Option<Status> {
        match self {
            Include::Visible => Some(Status::HIDDEN),
            Include::Hidden => Some(Status::UNPUBLISHED),
            Include::Unpublished => Some(Status::TRASH),
            Include::All => None,
        }
    }

    pub fn allows(self, status: Status) -> bool {
        self.status_ceiling().map_or(true, |ceiling| status < ceiling)
    }
}

/// Options that shape a find independently of its selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOptions {
    /// Stop after the first match
    pub find_one: bool,
    /// Default include mode becomes `all`
    pub find_all: bool,
    /// Compute the total ignoring limit/start
    pub get_total: bool,
    /// Hydrate pages; when false only ids are returned
    pub load_pages: bool,
    /// Include mode when the selector has no `include=` item
    pub include: Option<Include>,
    /// Tag for logging
    pub caller: Option<String>,
    /// Consult and populate the selector result cache
    pub cache: bool,
    /// Run results through the access filter unless the selector says otherwise
    pub check_access: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            find_one: false,
            find_all: false,
            get_total: true,
            load_pages: true,
            include: None,
            caller: None,
            cache: true,
            check_access: true,
        }
    }
}

impl FindOptions {
    pub fn find_one() -> Self {
        Self {
            find_one: true,
            ..Self::default()
        }
    }

    pub fn with_include(mut self, include: Include) -> Self {
        self.include = Some(include);
        self
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    pub fn without_access_check(mut self) -> Self {
        self.check_access = false;
        self
    }

    /// Options that affect results, sorted by key; `caller` is excluded
    pub fn signature(&self) -> String {
        format!(
            "cache={};checkAccess={};findAll={};findOne={};getTotal={};include={};loadPages={}",
            self.cache as u8,
            self.check_access as u8,
            self.find_all as u8,
            self.find_one as u8,
            self.get_total as u8,
            self.include.map(Include::as_str).unwrap_or("-"),
            self.load_pages as u8,
        )
    }
}

/// An immutable parsed selector
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selector {
    items: Vec<SelectorItem>,
}

fn field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap()
    })
}

impl Selector {
    /// Parse a selector string
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        let mut items = Vec::new();
        for raw in split_outside_quotes(trimmed, ',')? {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            items.push(parse_item(raw)?);
        }
        Ok(Self { items })
    }

    pub fn from_items(items: Vec<SelectorItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[SelectorItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append an item, returning the extended selector
    #[must_use]
    pub fn with_item(mut self, item: SelectorItem) -> Self {
        self.items.push(item);
        self
    }

    /// Append every item of `other`
    #[must_use]
    pub fn merged(mut self, other: &Selector) -> Self {
        self.items.extend(other.items.iter().cloned());
        self
    }

    /// Last item naming `field` as its only field
    pub fn find_item(&self, field: &str) -> Option<&SelectorItem> {
        self.items
            .iter()
            .rev()
            .find(|item| item.fields.len() == 1 && item.field() == field)
    }

    /// The `include=` option, if present
    pub fn include(&self) -> Result<Option<Include>, SelectorError> {
        match self.find_item("include") {
            Some(item) => Include::from_name(item.value())
                .map(Some)
                .ok_or_else(|| SelectorError::invalid_value("include", item.value())),
            None => Ok(None),
        }
    }

    /// Ids when the selector is nothing more than `id=N[|M...]`
    /// (optionally with `include`/`check_access`)
    pub fn id_shortcut(&self) -> Option<Vec<PageId>> {
        let mut ids = None;
        for item in &self.items {
            match item.field() {
                "include" | "check_access" if item.fields.len() == 1 => continue,
                "id" if item.fields.len() == 1
                    && item.operator == Operator::Equal
                    && !item.negated
                    && ids.is_none() =>
                {
                    let parsed: Option<Vec<PageId>> =
                        item.values.iter().map(|v| v.parse().ok()).collect();
                    ids = Some(parsed?);
                }
                _ => return None,
            }
        }
        ids
    }

    /// Normalized text form; equivalent selectors share it
    pub fn canonical(&self) -> String {
        self.items
            .iter()
            .map(SelectorItem::canonical)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl std::str::FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

fn parse_item(raw: &str) -> Result<SelectorItem, SelectorError> {
    let (negated, body) = match raw.strip_prefix('!') {
        Some(rest) if !rest.starts_with('=') => (true, rest.trim_start()),
        _ => (false, raw),
    };

    let Some(op_index) = body.find(Operator::CHARS) else {
        return shortcut_item(body, negated);
    };

    let field_part = body[..op_index].trim();
    let rest = &body[op_index..];
    let operator =
        Operator::parse_prefix(rest).ok_or_else(|| SelectorError::MissingOperator(raw.to_string()))?;
    let value_part = rest[operator.as_str().len()..].trim();

    let mut fields = Vec::new();
    for field in field_part.split('|') {
        let field = field.trim();
        if !field_regex().is_match(field) {
            return Err(SelectorError::InvalidField {
                field: field.to_string(),
                item: raw.to_string(),
            });
        }
        fields.push(normalize_field(field));
    }

    let mut values: Vec<String> = split_outside_quotes(value_part, '|')?
        .into_iter()
        .map(|v| unquote(v.trim()).to_string())
        .collect();
    if fields.iter().any(|f| f == "path") {
        values = values.iter().map(|v| normalize_path(v)).collect();
    }

    Ok(SelectorItem {
        fields,
        operator,
        values,
        negated,
    })
}

/// Items without an operator: bare ids and bare paths
fn shortcut_item(body: &str, negated: bool) -> Result<SelectorItem, SelectorError> {
    let body = body.trim();
    let values: Vec<&str> = body.split('|').map(str::trim).collect();
    if !values.is_empty() && values.iter().all(|v| v.parse::<PageId>().is_ok()) {
        return Ok(SelectorItem {
            fields: vec!["id".to_string()],
            operator: Operator::Equal,
            values: values.into_iter().map(String::from).collect(),
            negated,
        });
    }
    if body.starts_with('/') {
        return Ok(SelectorItem {
            fields: vec!["path".to_string()],
            operator: Operator::Equal,
            values: vec![normalize_path(body)],
            negated,
        });
    }
    Err(SelectorError::MissingOperator(body.to_string()))
}

/// Aliases collapse onto one spelling so signatures match
fn normalize_field(field: &str) -> String {
    match field {
        "parent_id" => "parent".to_string(),
        "templates_id" => "template".to_string(),
        "numChildren" => "num_children".to_string(),
        _ => match field.split_once('.') {
            Some(("parent_id", sub)) => format!("parent.{}", sub),
            _ => field.to_string(),
        },
    }
}

/// `/a/b` → `/a/b/`, `a` → `/a/`, `/` stays `/`
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", segments.join("/"))
    }
}

fn split_outside_quotes(input: &str, separator: char) -> Result<Vec<&str>, SelectorError> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (idx, c) in input.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == separator => {
                parts.push(&input[start..idx]);
                start = idx + c.len_utf8();
            }
            None => {}
        }
    }
    if quote.is_some() {
        return Err(SelectorError::UnterminatedQuote(input.to_string()));
    }
    parts.push(&input[start..]);
    Ok(parts)
}

fn unquote(value: &str) -> &str {
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn quote_if_needed(value: &str) -> String {
    if value.contains([',', '|', '"', '\'']) || value.trim() != value {
        format!("\"{}\"", value.replace('"', "'"))
    } else {
        value.to_string()
    }
}
