//! Selector-to-SQL translation
//!
//! [`PageFinder`] compiles a [`Selector`] into a single `SELECT` over `pages`
//! and returns lightweight `{id, template}` rows in result order. Hydration is
//! left to the loader.
//!
//! # Query shape
//!
//! - native columns filter `pages` directly
//! - custom fields become `EXISTS (SELECT 1 FROM field_x ...)` subqueries, so a
//!   multi-row field never multiplies result rows
//! - `has_parent` uses the `pages_parents` ancestor table
//! - unless the selector names `status` or asks for `include=all`, a status
//!   ceiling hides hidden/unpublished/trashed pages
//! - when exactly one parent is pinned and no sort is given, the parent's
//!   child sort applies; `pages.id` always breaks ties

use crate::models::{
    FieldDef, FindOptions, Include, Operator, PageId, Selector, SelectorError, SelectorItem,
    Status, TemplateId,
};
use crate::services::error::{PageError, PageResult};
use crate::services::pages::Pages;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use libsql::Value;
use tracing::debug;

/// Selector names of native `pages` columns
const NATIVE_COLUMNS: &[(&str, &str)] = &[
    ("id", "id"),
    ("parent", "parent_id"),
    ("template", "templates_id"),
    ("name", "name"),
    ("status", "status"),
    ("sort", "sort"),
    ("num_children", "num_children"),
    ("created", "created"),
    ("modified", "modified"),
    ("published", "published"),
    ("created_users_id", "created_users_id"),
    ("modified_users_id", "modified_users_id"),
];

const DATE_COLUMNS: &[&str] = &["created", "modified", "published"];

pub(crate) fn native_column(name: &str) -> Option<&'static str> {
    NATIVE_COLUMNS
        .iter()
        .find(|(field, _)| *field == name)
        .map(|(_, column)| *column)
}

/// One matching page, before hydration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRow {
    pub id: PageId,
    pub template_id: TemplateId,
}

/// Output of a find: ordered rows plus paging facts
#[derive(Debug, Clone, Default)]
pub struct FinderResult {
    pub rows: Vec<PageRow>,
    /// Matches ignoring limit/start
    pub total: usize,
    pub start: usize,
    pub limit: Option<usize>,
    /// Set when the selector pins exactly one parent
    pub parent_id: Option<PageId>,
    pub include: Include,
    pub check_access: bool,
}

impl FinderResult {
    pub fn ids(&self) -> Vec<PageId> {
        self.rows.iter().map(|row| row.id).collect()
    }
}

#[derive(Debug, Default)]
struct Plan {
    where_sql: String,
    params: Vec<Value>,
    order_sql: String,
    limit: Option<usize>,
    start: usize,
    parent_id: Option<PageId>,
    include: Include,
    check_access: bool,
}

impl Plan {
    fn select_sql(&self) -> String {
        let paging = match (self.limit, self.start) {
            (Some(limit), start) => format!(" LIMIT {} OFFSET {}", limit, start),
            (None, start) if start > 0 => format!(" LIMIT -1 OFFSET {}", start),
            _ => String::new(),
        };
        format!(
            "SELECT pages.id, pages.templates_id FROM pages{} ORDER BY {}{}",
            self.where_sql, self.order_sql, paging
        )
    }

    fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM pages{}", self.where_sql)
    }
}

/// How a bound value should be typed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Affinity {
    Text,
    Numeric,
}

fn bind(value: &str, affinity: Affinity) -> Value {
    if affinity == Affinity::Numeric {
        if let Ok(i) = value.trim().parse::<i64>() {
            return Value::Integer(i);
        }
        if let Ok(f) = value.trim().parse::<f64>() {
            return Value::Real(f);
        }
    }
    Value::Text(value.to_string())
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Predicate for one value against `column`
fn condition(
    column: &str,
    operator: Operator,
    value: &str,
    affinity: Affinity,
    params: &mut Vec<Value>,
) -> String {
    let like = |pattern: String, params: &mut Vec<Value>| {
        params.push(Value::Text(pattern));
        format!("{} LIKE ? ESCAPE '\\'", column)
    };
    match operator {
        Operator::Equal | Operator::NotEqual if value.is_empty() => {
            if operator == Operator::Equal {
                format!("({c} IS NULL OR {c} = '')", c = column)
            } else {
                format!("({c} IS NOT NULL AND {c} != '')", c = column)
            }
        }
        Operator::Equal
        | Operator::NotEqual
        | Operator::Less
        | Operator::Greater
        | Operator::LessEqual
        | Operator::GreaterEqual => {
            params.push(bind(value, affinity));
            format!("{} {} ?", column, operator.as_str())
        }
        Operator::ContainsPhrase | Operator::ContainsLike => {
            like(format!("%{}%", escape_like(value)), params)
        }
        Operator::StartsWith => like(format!("{}%", escape_like(value)), params),
        Operator::EndsWith => like(format!("%{}", escape_like(value)), params),
        Operator::ContainsWords => {
            let words: Vec<&str> = value.split_whitespace().collect();
            if words.is_empty() {
                return "1 = 1".to_string();
            }
            let parts: Vec<String> = words
                .into_iter()
                .map(|word| like(format!("%{}%", escape_like(word)), params))
                .collect();
            format!("({})", parts.join(" AND "))
        }
        Operator::BitAnd => {
            params.push(bind(value, Affinity::Numeric));
            format!("({} & ?) != 0", column)
        }
    }
}

/// OR over values; `!=` means "none of" and joins with AND
fn values_clause(
    column: &str,
    operator: Operator,
    values: &[String],
    affinity: Affinity,
    params: &mut Vec<Value>,
) -> String {
    let joiner = if operator == Operator::NotEqual {
        " AND "
    } else {
        " OR "
    };
    let parts: Vec<String> = values
        .iter()
        .map(|value| condition(column, operator, value, affinity, params))
        .collect();
    if parts.len() == 1 {
        parts.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", parts.join(joiner))
    }
}

fn parse_date_value(field: &str, value: &str) -> Result<String, SelectorError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.parse::<i64>().is_ok() {
        return Ok(trimmed.to_string());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc().timestamp().to_string());
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp().to_string());
        }
    }
    Err(SelectorError::invalid_value(field, value))
}

fn parse_usize(field: &str, value: &str) -> Result<usize, SelectorError> {
    value
        .trim()
        .parse()
        .map_err(|_| SelectorError::invalid_value(field, value))
}

/// Compiles selectors into queries against the page tables
pub struct PageFinder<'a> {
    pages: &'a Pages,
}

impl<'a> PageFinder<'a> {
    pub fn new(pages: &'a Pages) -> Self {
        Self { pages }
    }

    /// Matching rows in result order
    pub async fn find(&self, selector: &Selector, options: &FindOptions) -> PageResult<FinderResult> {
        let plan = self.plan(selector, options).await?;
        let sql = plan.select_sql();
        debug!(
            sql = %sql,
            caller = options.caller.as_deref().unwrap_or("-"),
            "Executing finder query"
        );

        let rows: Vec<PageRow> = self
            .pages
            .db
            .query(&sql, plan.params.clone())
            .await?
            .iter()
            .map(|row| PageRow {
                id: row.get_i64(0),
                template_id: row.get_i64(1),
            })
            .collect();

        let paged = plan.limit.is_some() || plan.start > 0;
        let total = if options.get_total && paged {
            self.total(&plan).await?
        } else {
            rows.len()
        };

        Ok(FinderResult {
            rows,
            total,
            start: plan.start,
            limit: plan.limit,
            parent_id: plan.parent_id,
            include: plan.include,
            check_access: plan.check_access,
        })
    }

    /// Number of matches ignoring limit/start
    pub async fn count(&self, selector: &Selector, options: &FindOptions) -> PageResult<usize> {
        let plan = self.plan(selector, options).await?;
        self.total(&plan).await
    }

    async fn total(&self, plan: &Plan) -> PageResult<usize> {
        let count = self
            .pages
            .db
            .query_i64(&plan.count_sql(), plan.params.clone())
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn plan(&self, selector: &Selector, options: &FindOptions) -> PageResult<Plan> {
        let mut plan = Plan {
            include: options
                .include
                .unwrap_or(if options.find_all { Include::All } else { Include::Visible }),
            check_access: options.check_access,
            ..Plan::default()
        };
        let mut wheres: Vec<String> = Vec::new();
        let mut sorts: Vec<String> = Vec::new();
        let mut has_status = false;
        let mut pinned_parents = 0;

        for item in selector.items() {
            if item.is_option() {
                match item.field() {
                    "limit" => plan.limit = Some(parse_usize("limit", item.value())?),
                    "start" => plan.start = parse_usize("start", item.value())?,
                    "sort" => sorts.extend(item.values.iter().cloned()),
                    "include" => {
                        plan.include = Include::from_name(item.value())
                            .ok_or_else(|| SelectorError::invalid_value("include", item.value()))?
                    }
                    "check_access" => {
                        plan.check_access = !matches!(item.value(), "0" | "false")
                    }
                    _ => {}
                }
                continue;
            }

            if item.fields.iter().any(|f| f == "status") {
                has_status = true;
            }
            if item.fields.len() == 1
                && item.field() == "parent"
                && item.operator == Operator::Equal
                && !item.negated
                && item.values.len() == 1
            {
                pinned_parents += 1;
                plan.parent_id = self.resolve_page_ref(item.value()).await?;
            }

            wheres.push(self.item_clause(item, &mut plan.params).await?);
        }

        if pinned_parents != 1 {
            plan.parent_id = None;
        }

        if !has_status {
            if let Some(ceiling) = plan.include.status_ceiling() {
                wheres.push("pages.status < ?".to_string());
                plan.params.push(Value::Integer(ceiling.bits()));
            }
        }

        if options.find_one && plan.limit.is_none() {
            plan.limit = Some(1);
        }

        if sorts.is_empty() {
            if let Some(parent_id) = plan.parent_id {
                sorts.push(self.pages.child_sortfield(parent_id).await?);
            }
        }
        let mut order: Vec<String> = Vec::new();
        for sort in &sorts {
            order.push(self.sort_clause(sort)?);
        }
        order.push("pages.id".to_string());
        plan.order_sql = order.join(", ");

        if !wheres.is_empty() {
            plan.where_sql = format!(" WHERE {}", wheres.join(" AND "));
        }
        Ok(plan)
    }

    async fn item_clause(&self, item: &SelectorItem, params: &mut Vec<Value>) -> PageResult<String> {
        let mut parts = Vec::with_capacity(item.fields.len());
        for field in &item.fields {
            parts.push(self.field_clause(field, item, params).await?);
        }
        let clause = if parts.len() == 1 {
            parts.remove(0)
        } else {
            format!("({})", parts.join(" OR "))
        };
        Ok(if item.negated {
            format!("NOT ({})", clause)
        } else {
            clause
        })
    }

    /// Numeric id, or a path resolved to an id
    async fn resolve_page_ref(&self, value: &str) -> PageResult<Option<PageId>> {
        if let Ok(id) = value.trim().parse::<PageId>() {
            return Ok(Some(id));
        }
        if value.starts_with('/') {
            return self.pages.id_by_path(value).await;
        }
        Err(SelectorError::invalid_value("parent", value).into())
    }

    /// Page-ref values as ids; unresolvable paths become -1 and match nothing
    async fn resolve_page_refs(&self, values: &[String]) -> PageResult<Vec<String>> {
        let mut ids = Vec::with_capacity(values.len());
        for value in values {
            if value.is_empty() {
                ids.push(String::new());
                continue;
            }
            let id = self.resolve_page_ref(value).await?.unwrap_or(-1);
            ids.push(id.to_string());
        }
        Ok(ids)
    }

    async fn field_clause(
        &self,
        field: &str,
        item: &SelectorItem,
        params: &mut Vec<Value>,
    ) -> PageResult<String> {
        let (base, sub) = match field.split_once('.') {
            Some((base, sub)) => (base, Some(sub)),
            None => (field, None),
        };
        let op = item.operator;

        match (base, sub) {
            ("path", None) => {
                if !matches!(op, Operator::Equal | Operator::NotEqual) {
                    return Err(SelectorError::invalid_value("path", op.as_str()).into());
                }
                let mut ids = Vec::new();
                for value in &item.values {
                    ids.push(self.pages.id_by_path(value).await?.unwrap_or(-1).to_string());
                }
                Ok(values_clause("pages.id", op, &ids, Affinity::Numeric, params))
            }
            ("has_parent", None) => {
                let ids = self.resolve_page_refs(&item.values).await?;
                let parts: Vec<String> = ids
                    .iter()
                    .map(|id| {
                        let id = bind(id, Affinity::Numeric);
                        params.push(id.clone());
                        params.push(id);
                        "(pages.parent_id = ? OR pages.parent_id IN \
                         (SELECT pages_id FROM pages_parents WHERE parents_id = ?))"
                            .to_string()
                    })
                    .collect();
                let clause = format!("({})", parts.join(" OR "));
                Ok(if op == Operator::NotEqual {
                    format!("NOT {}", clause)
                } else {
                    clause
                })
            }
            ("parent", Some(sub)) => {
                let column = native_column(sub)
                    .ok_or_else(|| PageError::UnknownField(field.to_string()))?;
                let (values, affinity) = self.native_values(sub, &item.values).await?;
                let inner = values_clause(&format!("p.{}", column), op, &values, affinity, params);
                Ok(format!(
                    "pages.parent_id IN (SELECT p.id FROM pages AS p WHERE {})",
                    inner
                ))
            }
            (native, None) if native_column(native).is_some() => {
                let column = format!("pages.{}", native_column(native).unwrap_or(native));
                if native == "status"
                    && matches!(op, Operator::Equal | Operator::NotEqual)
                    && item.values.iter().all(|v| v.parse::<i64>().is_err())
                {
                    return self.status_flag_clause(op, &item.values, params);
                }
                let (values, affinity) = self.native_values(native, &item.values).await?;
                Ok(values_clause(&column, op, &values, affinity, params))
            }
            (custom, sub) => {
                let definition = self
                    .pages
                    .fields
                    .get(custom)
                    .ok_or_else(|| PageError::UnknownField(field.to_string()))?;
                match sub {
                    None | Some("data") => self.custom_clause(&definition, item, params),
                    Some("count") => Ok(self.count_clause(&definition, item, params)),
                    Some(_) => Err(PageError::UnknownField(field.to_string())),
                }
            }
        }
    }

    /// Convert native values (template names, status names, dates, paths)
    async fn native_values(
        &self,
        native: &str,
        values: &[String],
    ) -> PageResult<(Vec<String>, Affinity)> {
        match native {
            "name" => Ok((values.to_vec(), Affinity::Text)),
            "template" => {
                let mut ids = Vec::with_capacity(values.len());
                for value in values {
                    let template = self
                        .pages
                        .templates
                        .resolve(value)
                        .ok_or_else(|| PageError::unknown_template(value))?;
                    ids.push(template.id.to_string());
                }
                Ok((ids, Affinity::Numeric))
            }
            "status" => {
                let mut bits = Vec::with_capacity(values.len());
                for value in values {
                    let status = Status::from_name(value)
                        .ok_or_else(|| SelectorError::invalid_value("status", value))?;
                    bits.push(status.bits().to_string());
                }
                Ok((bits, Affinity::Numeric))
            }
            "parent" | "id" => Ok((self.resolve_page_refs(values).await?, Affinity::Numeric)),
            date if DATE_COLUMNS.contains(&date) => {
                let converted: Result<Vec<String>, SelectorError> =
                    values.iter().map(|v| parse_date_value(date, v)).collect();
                Ok((converted?, Affinity::Numeric))
            }
            _ => Ok((values.to_vec(), Affinity::Numeric)),
        }
    }

    /// `status=hidden` tests the flag rather than equality
    fn status_flag_clause(
        &self,
        op: Operator,
        values: &[String],
        params: &mut Vec<Value>,
    ) -> PageResult<String> {
        let mut parts = Vec::with_capacity(values.len());
        for value in values {
            let status = Status::from_name(value)
                .ok_or_else(|| SelectorError::invalid_value("status", value))?;
            params.push(Value::Integer(status.bits()));
            parts.push(if op == Operator::Equal {
                "(pages.status & ?) != 0"
            } else {
                "(pages.status & ?) = 0"
            });
        }
        let joiner = if op == Operator::Equal { " OR " } else { " AND " };
        Ok(format!("({})", parts.join(joiner)))
    }

    fn custom_clause(
        &self,
        field: &FieldDef,
        item: &SelectorItem,
        params: &mut Vec<Value>,
    ) -> PageResult<String> {
        let table = field.table();
        let affinity = match self.pages.fieldtypes.for_field(field)?.column_type() {
            "INTEGER" | "REAL" | "NUMERIC" => Affinity::Numeric,
            _ => Affinity::Text,
        };
        let op = item.operator;
        let non_empty = "t.data IS NOT NULL AND t.data != ''";
        let all_empty = item.values.iter().all(String::is_empty);

        let clause = match op {
            Operator::Equal if all_empty => format!(
                "NOT EXISTS (SELECT 1 FROM {} AS t WHERE t.pages_id = pages.id AND {})",
                table, non_empty
            ),
            Operator::NotEqual if all_empty => format!(
                "EXISTS (SELECT 1 FROM {} AS t WHERE t.pages_id = pages.id AND {})",
                table, non_empty
            ),
            Operator::NotEqual => {
                let matches = values_clause("t.data", Operator::Equal, &item.values, affinity, params);
                format!(
                    "NOT EXISTS (SELECT 1 FROM {} AS t WHERE t.pages_id = pages.id AND {})",
                    table, matches
                )
            }
            _ => {
                let matches = values_clause("t.data", op, &item.values, affinity, params);
                format!(
                    "EXISTS (SELECT 1 FROM {} AS t WHERE t.pages_id = pages.id AND {})",
                    table, matches
                )
            }
        };
        Ok(clause)
    }

    fn count_clause(&self, field: &FieldDef, item: &SelectorItem, params: &mut Vec<Value>) -> String {
        let column = format!(
            "(SELECT COUNT(*) FROM {} AS t WHERE t.pages_id = pages.id)",
            field.table()
        );
        values_clause(&column, item.operator, &item.values, Affinity::Numeric, params)
    }

    fn sort_clause(&self, spec: &str) -> PageResult<String> {
        let spec = spec.trim();
        let (descending, name) = match spec.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let direction = if descending { " DESC" } else { "" };

        if name == "random" {
            return Ok("RANDOM()".to_string());
        }
        if let Some(column) = native_column(name) {
            return Ok(format!("pages.{}{}", column, direction));
        }
        if let Some(column) = name.strip_prefix("parent.").and_then(native_column) {
            return Ok(format!(
                "(SELECT p.{} FROM pages AS p WHERE p.id = pages.parent_id){}",
                column, direction
            ));
        }
        let field = self
            .pages
            .fields
            .get(name)
            .ok_or_else(|| PageError::UnknownField(name.to_string()))?;
        Ok(format!(
            "(SELECT t.data FROM {} AS t WHERE t.pages_id = pages.id ORDER BY t.sort LIMIT 1){}",
            field.table(),
            direction
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_operators() {
        let mut params = Vec::new();
        assert_eq!(
            condition("pages.name", Operator::StartsWith, "ab_c", Affinity::Text, &mut params),
            "pages.name LIKE ? ESCAPE '\\'"
        );
        assert_eq!(params, vec![Value::Text("ab\\_c%".into())]);

        let mut params = Vec::new();
        assert_eq!(
            condition("pages.sort", Operator::GreaterEqual, "3", Affinity::Numeric, &mut params),
            "pages.sort >= ?"
        );
        assert_eq!(params, vec![Value::Integer(3)]);
    }

    #[test]
    fn test_not_equal_means_none_of() {
        let mut params = Vec::new();
        let values = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            values_clause("pages.name", Operator::NotEqual, &values, Affinity::Text, &mut params),
            "(pages.name != ? AND pages.name != ?)"
        );
    }

    #[test]
    fn test_contains_words_requires_every_word() {
        let mut params = Vec::new();
        let sql = condition("t.data", Operator::ContainsWords, "rust sql", Affinity::Text, &mut params);
        assert_eq!(sql, "(t.data LIKE ? ESCAPE '\\' AND t.data LIKE ? ESCAPE '\\')");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_empty_value_matches_null() {
        let mut params = Vec::new();
        let sql = condition("pages.published", Operator::Equal, "", Affinity::Numeric, &mut params);
        assert_eq!(sql, "(pages.published IS NULL OR pages.published = '')");
        assert!(params.is_empty());
    }

    #[test]
    fn test_date_values() {
        assert_eq!(parse_date_value("created", "2024-01-02").unwrap(), "1704153600");
        assert_eq!(parse_date_value("created", "1700000000").unwrap(), "1700000000");
        assert!(parse_date_value("created", "yesterday").is_err());
    }
}
