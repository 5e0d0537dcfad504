//! Report context: the values a template is filled with for one run.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

const DATE_INPUT_FORMAT: &str = "%Y-%m-%d";
const DATE_DISPLAY_FORMAT: &str = "%d-%b-%Y";

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to parse report context: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported value for field '{field}': {kind} (expected string, number or date)")]
    UnsupportedValue { field: String, kind: &'static str },
    #[error("field name must not be empty")]
    EmptyName,
}

/// A single substitution value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Date(NaiveDate),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Integer(value) => write!(f, "{value}"),
            FieldValue::Number(value) => write!(f, "{value:.2}"),
            FieldValue::Date(date) => write!(f, "{}", date.format(DATE_DISPLAY_FORMAT)),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

impl FieldValue {
    fn from_json(field: &str, value: Value) -> Result<Self, ContextError> {
        match value {
            Value::String(text) => Ok(NaiveDate::parse_from_str(&text, DATE_INPUT_FORMAT)
                .map(FieldValue::Date)
                .unwrap_or(FieldValue::Text(text))),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => Ok(FieldValue::Integer(integer)),
                None => Ok(FieldValue::Number(number.as_f64().unwrap_or_default())),
            },
            other => Err(ContextError::UnsupportedValue {
                field: field.to_string(),
                kind: json_kind(&other),
            }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::String(_) => "string",
        Value::Number(_) => "number",
    }
}

/// Immutable mapping from template field name to value.
///
/// Built once per run through [`ReportContextBuilder`] or deserialized from a
/// flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, Value>")]
pub struct ReportContext {
    fields: BTreeMap<String, FieldValue>,
}

impl ReportContext {
    pub fn builder() -> ReportContextBuilder {
        ReportContextBuilder::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self, ContextError> {
        let raw: BTreeMap<String, Value> = serde_json::from_str(json)?;
        Self::try_from(raw)
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Start a builder pre-filled with this context's values.
    pub fn to_builder(&self) -> ReportContextBuilder {
        ReportContextBuilder {
            fields: self.fields.clone(),
        }
    }
}

impl TryFrom<BTreeMap<String, Value>> for ReportContext {
    type Error = ContextError;

    fn try_from(raw: BTreeMap<String, Value>) -> Result<Self, Self::Error> {
        let mut builder = ReportContext::builder();
        for (name, value) in raw {
            let value = FieldValue::from_json(&name, value)?;
            builder = builder.field(name, value);
        }
        builder.build()
    }
}

#[derive(Debug, Default)]
pub struct ReportContextBuilder {
    fields: BTreeMap<String, FieldValue>,
}

impl ReportContextBuilder {
    /// Set a field, replacing any earlier value.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into().trim().to_string(), value.into());
        self
    }

    /// Set a field only when it has no value yet.
    pub fn with_default(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields
            .entry(name.into().trim().to_string())
            .or_insert_with(|| value.into());
        self
    }

    pub fn build(self) -> Result<ReportContext, ContextError> {
        if self.fields.contains_key("") {
            return Err(ContextError::EmptyName);
        }
        Ok(ReportContext {
            fields: self.fields,
        })
    }
}
