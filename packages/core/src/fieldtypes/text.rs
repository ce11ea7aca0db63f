//! Single-line and multi-line text

use super::{Fieldtype, FieldtypeError};
use crate::db::value_as_string;
use crate::models::{FieldDef, FieldValue};
use async_trait::async_trait;
use libsql::Value;

/// Text stored in a TEXT column; the empty string is not stored
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFieldtype;

#[async_trait]
impl Fieldtype for TextFieldtype {
    fn name(&self) -> &'static str {
        "text"
    }

    fn column_type(&self) -> &'static str {
        "TEXT"
    }

    fn blank_value(&self, _field: &FieldDef) -> FieldValue {
        FieldValue::Text(String::new())
    }

    fn wakeup_value(&self, _field: &FieldDef, rows: &[Value]) -> FieldValue {
        FieldValue::Text(rows.first().and_then(value_as_string).unwrap_or_default())
    }

    fn sleep_value(&self, field: &FieldDef, value: &FieldValue) -> Result<Vec<Value>, FieldtypeError> {
        let text = match value {
            FieldValue::Null => return Ok(Vec::new()),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Ref(_) | FieldValue::Refs(_) => {
                return Err(FieldtypeError::invalid_value(field, value))
            }
        };
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Value::Text(text)])
    }
}
