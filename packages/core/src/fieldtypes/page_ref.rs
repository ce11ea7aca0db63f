//! References to other pages
//!
//! Stored one row per referenced id, ordered by `sort`. When autojoined the
//! ids are aggregated into one comma-separated column.

use super::{AutojoinQuery, Fieldtype, FieldtypeError};
use crate::db::value_as_i64;
use crate::models::{FieldDef, FieldValue, PageId};
use async_trait::async_trait;
use libsql::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct PageRefFieldtype;

fn parse_ids(text: &str) -> Vec<PageId> {
    text.split([',', '|'])
        .filter_map(|s| s.trim().parse::<PageId>().ok())
        .filter(|id| *id > 0)
        .collect()
}

#[async_trait]
impl Fieldtype for PageRefFieldtype {
    fn name(&self) -> &'static str {
        "page"
    }

    fn column_type(&self) -> &'static str {
        "INTEGER"
    }

    fn multiple(&self) -> bool {
        true
    }

    fn blank_value(&self, _field: &FieldDef) -> FieldValue {
        FieldValue::Refs(Vec::new())
    }

    fn wakeup_value(&self, _field: &FieldDef, rows: &[Value]) -> FieldValue {
        FieldValue::Refs(
            rows.iter()
                .filter_map(value_as_i64)
                .filter(|id| *id > 0)
                .collect(),
        )
    }

    fn wakeup_joined(&self, field: &FieldDef, raw: &Value) -> FieldValue {
        match raw {
            Value::Text(text) => FieldValue::Refs(parse_ids(text)),
            Value::Null => self.blank_value(field),
            other => self.wakeup_value(field, std::slice::from_ref(other)),
        }
    }

    fn sleep_value(&self, field: &FieldDef, value: &FieldValue) -> Result<Vec<Value>, FieldtypeError> {
        let ids = match value {
            FieldValue::Null => Vec::new(),
            FieldValue::Ref(_) | FieldValue::Refs(_) => value.ref_ids(),
            FieldValue::Integer(id) => vec![*id],
            FieldValue::Text(text) => parse_ids(text),
            FieldValue::Float(_) => return Err(FieldtypeError::invalid_value(field, value)),
        };
        Ok(ids
            .into_iter()
            .filter(|id| *id > 0)
            .map(Value::Integer)
            .collect())
    }

    fn autojoin(&self, field: &FieldDef, query: &mut AutojoinQuery) -> bool {
        let alias = format!("_{}", field.name);
        query.left_join(format!(
            "LEFT JOIN (SELECT pages_id, GROUP_CONCAT(data) AS data FROM \
             (SELECT pages_id, data FROM {table} ORDER BY pages_id, sort) GROUP BY pages_id) \
             AS {alias} ON {alias}.pages_id = pages.id",
            table = field.table()
        ));
        query.select(format!("{}.data", alias));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joined_value_parsing() {
        let field = FieldDef::new(4, "related", "page");
        assert_eq!(
            PageRefFieldtype.wakeup_joined(&field, &Value::Text("5,3,9".into())),
            FieldValue::Refs(vec![5, 3, 9])
        );
        assert_eq!(
            PageRefFieldtype.wakeup_joined(&field, &Value::Integer(8)),
            FieldValue::Refs(vec![8])
        );
        assert_eq!(
            PageRefFieldtype.wakeup_joined(&field, &Value::Null),
            FieldValue::Refs(vec![])
        );
    }

    #[test]
    fn test_sleep_drops_null_ids() {
        let field = FieldDef::new(4, "related", "page");
        assert_eq!(
            PageRefFieldtype
                .sleep_value(&field, &FieldValue::Refs(vec![3, 0, 4]))
                .unwrap(),
            vec![Value::Integer(3), Value::Integer(4)]
        );
    }
}
