//! Integer and floating point numbers

use super::{Fieldtype, FieldtypeError};
use crate::db::value_as_i64;
use crate::models::{FieldDef, FieldValue};
use async_trait::async_trait;
use libsql::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerFieldtype;

#[async_trait]
impl Fieldtype for IntegerFieldtype {
    fn name(&self) -> &'static str {
        "integer"
    }

    fn column_type(&self) -> &'static str {
        "INTEGER"
    }

    fn blank_value(&self, _field: &FieldDef) -> FieldValue {
        FieldValue::Null
    }

    fn wakeup_value(&self, _field: &FieldDef, rows: &[Value]) -> FieldValue {
        rows.first()
            .and_then(value_as_i64)
            .map(FieldValue::Integer)
            .unwrap_or(FieldValue::Null)
    }

    fn sleep_value(&self, field: &FieldDef, value: &FieldValue) -> Result<Vec<Value>, FieldtypeError> {
        match value {
            FieldValue::Null => Ok(Vec::new()),
            FieldValue::Text(s) if s.trim().is_empty() => Ok(Vec::new()),
            FieldValue::Integer(_) | FieldValue::Float(_) | FieldValue::Text(_) => value
                .as_i64()
                .map(|i| vec![Value::Integer(i)])
                .ok_or_else(|| FieldtypeError::invalid_value(field, value)),
            FieldValue::Ref(_) | FieldValue::Refs(_) => {
                Err(FieldtypeError::invalid_value(field, value))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FloatFieldtype;

#[async_trait]
impl Fieldtype for FloatFieldtype {
    fn name(&self) -> &'static str {
        "float"
    }

    fn column_type(&self) -> &'static str {
        "REAL"
    }

    fn blank_value(&self, _field: &FieldDef) -> FieldValue {
        FieldValue::Null
    }

    fn wakeup_value(&self, _field: &FieldDef, rows: &[Value]) -> FieldValue {
        match rows.first() {
            Some(Value::Real(f)) => FieldValue::Float(*f),
            Some(Value::Integer(i)) => FieldValue::Float(*i as f64),
            Some(Value::Text(s)) => s
                .trim()
                .parse()
                .map(FieldValue::Float)
                .unwrap_or(FieldValue::Null),
            _ => FieldValue::Null,
        }
    }

    fn sleep_value(&self, field: &FieldDef, value: &FieldValue) -> Result<Vec<Value>, FieldtypeError> {
        match value {
            FieldValue::Null => Ok(Vec::new()),
            FieldValue::Text(s) if s.trim().is_empty() => Ok(Vec::new()),
            FieldValue::Integer(_) | FieldValue::Float(_) | FieldValue::Text(_) => value
                .as_f64()
                .map(|f| vec![Value::Real(f)])
                .ok_or_else(|| FieldtypeError::invalid_value(field, value)),
            FieldValue::Ref(_) | FieldValue::Refs(_) => {
                Err(FieldtypeError::invalid_value(field, value))
            }
        }
    }
}
