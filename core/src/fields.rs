//! Typed field declarations and the values they hold.
//!
//! # Design
//! A [`Field`] is declared once per schema and coerces whatever it is given
//! (raw JSON from a response, or a typed value from the caller) into a
//! [`FieldValue`] of its kind. `many` fields apply the same coercion to every
//! element of a list. Nested-resource fields name their target schema and
//! resolve it through the registry only when a value is first coerced, so
//! schemas may reference each other in any order.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Number, Value};

use crate::error::ApiError;
use crate::resource::{Context, Resource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Boolean,
    Integer,
    Float,
    Char,
    DateTime,
    Dict,
    /// Nested resource of the named schema.
    Resource(String),
}

impl FieldKind {
    fn describe(&self) -> &str {
        match self {
            FieldKind::Boolean => "a boolean",
            FieldKind::Integer => "an integer",
            FieldKind::Float => "a number",
            FieldKind::Char => "a string",
            FieldKind::DateTime => "a date-time",
            FieldKind::Dict => "an object",
            FieldKind::Resource(_) => "an object or an identifier",
        }
    }
}

/// One named attribute of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    kind: FieldKind,
    many: bool,
    expand: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            many: false,
            expand: false,
        }
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn char(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Char)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    pub fn dict(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Dict)
    }

    pub fn resource(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Resource(schema.into()))
    }

    /// The field holds a list of values of its kind.
    pub fn many(mut self) -> Self {
        self.many = true;
        self
    }

    /// Nested resources are saved as `{id_field: id}` instead of the bare id.
    pub fn expand(mut self) -> Self {
        self.expand = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_many(&self) -> bool {
        self.many
    }

    pub fn is_expanded(&self) -> bool {
        self.expand
    }

    pub(crate) fn coerce(&self, value: FieldValue, context: &Context) -> Result<FieldValue, ApiError> {
        match value {
            FieldValue::Null => Ok(FieldValue::Null),
            FieldValue::List(items) if self.many => items
                .into_iter()
                .map(|item| self.coerce_one(item, context))
                .collect::<Result<Vec<_>, _>>()
                .map(FieldValue::List),
            other if self.many => Err(self.invalid(format!("expected a list, got {}", other.type_name()))),
            other => self.coerce_one(other, context),
        }
    }

    fn coerce_one(&self, value: FieldValue, context: &Context) -> Result<FieldValue, ApiError> {
        match (&self.kind, value) {
            (_, FieldValue::Null) => Ok(FieldValue::Null),
            (FieldKind::Boolean, v @ FieldValue::Bool(_)) => Ok(v),
            (FieldKind::Integer, v @ FieldValue::Integer(_)) => Ok(v),
            (FieldKind::Float, v @ FieldValue::Float(_)) => Ok(v),
            (FieldKind::Float, FieldValue::Integer(i)) => Ok(FieldValue::Float(i as f64)),
            (FieldKind::Char, v @ FieldValue::Char(_)) => Ok(v),
            (FieldKind::DateTime, v @ FieldValue::DateTime(_)) => Ok(v),
            (FieldKind::DateTime, FieldValue::Char(text)) => parse_datetime(&text)
                .map(FieldValue::DateTime)
                .ok_or_else(|| self.invalid(format!("`{text}` is not a date-time"))),
            (FieldKind::Dict, v @ FieldValue::Dict(_)) => Ok(v),
            (FieldKind::Resource(target), value) => self.coerce_resource(target, value, context),
            (kind, other) => Err(self.invalid(format!(
                "expected {}, got {}",
                kind.describe(),
                other.type_name()
            ))),
        }
    }

    fn coerce_resource(
        &self,
        target: &str,
        value: FieldValue,
        context: &Context,
    ) -> Result<FieldValue, ApiError> {
        let schema = context.registry().resolve(target)?;
        match value {
            FieldValue::Resource(resource) if resource.schema().name() == target => {
                Ok(FieldValue::Resource(resource))
            }
            FieldValue::Resource(resource) => Err(self.invalid(format!(
                "expected a `{target}` resource, got `{}`",
                resource.schema().name()
            ))),
            FieldValue::Dict(attributes) => {
                let mut child = Resource::new(schema, context.clone());
                child.populate_from_dict(&attributes)?;
                Ok(FieldValue::Resource(Box::new(child)))
            }
            FieldValue::List(_) => Err(self.invalid("expected an object or an identifier, got a list")),
            identifier => {
                let id_field = schema.meta().id_field.clone();
                let mut child = Resource::new(schema, context.clone());
                child.update([(id_field, identifier)])?;
                Ok(FieldValue::Resource(Box::new(child)))
            }
        }
    }

    /// JSON sent for this field by `save`, or `None` to leave it out.
    ///
    /// Nested-resource lists are never sent.
    pub(crate) fn serialize(&self, value: &FieldValue) -> Option<Value> {
        if value.is_null() {
            return None;
        }
        match (&self.kind, value) {
            (FieldKind::Resource(_), _) if self.many => None,
            (FieldKind::Resource(_), FieldValue::Resource(resource)) => {
                let id = resource.id()?.to_json();
                if self.expand {
                    let mut reference = Map::new();
                    reference.insert(resource.schema().meta().id_field.clone(), id);
                    Some(Value::Object(reference))
                } else {
                    Some(id)
                }
            }
            (_, value) => Some(value.to_json()),
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> ApiError {
        ApiError::InvalidField {
            field: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// A typed value stored on a resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Char(String),
    DateTime(DateTime<FixedOffset>),
    Dict(Map<String, Value>),
    Resource(Box<Resource>),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Lift raw JSON without any schema knowledge.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => FieldValue::Char(s),
            Value::Array(items) => FieldValue::List(items.into_iter().map(Self::from_json).collect()),
            Value::Object(map) => FieldValue::Dict(map),
        }
    }

    /// JSON form of the value. Resources reduce to their identity value and
    /// date-times to RFC 3339 text.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            FieldValue::Char(s) => Value::String(s.clone()),
            FieldValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
            FieldValue::Dict(map) => Value::Object(map.clone()),
            FieldValue::Resource(resource) => resource.id().map(FieldValue::to_json).unwrap_or(Value::Null),
            FieldValue::List(items) => Value::Array(items.iter().map(FieldValue::to_json).collect()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            FieldValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Char(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            FieldValue::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Map<String, Value>> {
        match self {
            FieldValue::Dict(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            FieldValue::Resource(resource) => Some(resource),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "a boolean",
            FieldValue::Integer(_) => "an integer",
            FieldValue::Float(_) => "a float",
            FieldValue::Char(_) => "a string",
            FieldValue::DateTime(_) => "a date-time",
            FieldValue::Dict(_) => "an object",
            FieldValue::Resource(_) => "a resource",
            FieldValue::List(_) => "a list",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Char(s) => f.write_str(s),
            FieldValue::DateTime(dt) => f.write_str(&dt.to_rfc3339()),
            FieldValue::Resource(resource) => write!(f, "{resource}"),
            FieldValue::Dict(_) | FieldValue::List(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(value.into())
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Integer(value.into())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Char(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Char(value)
    }
}

impl From<DateTime<FixedOffset>> for FieldValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        FieldValue::DateTime(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::DateTime(value.fixed_offset())
    }
}

impl From<Map<String, Value>> for FieldValue {
    fn from(value: Map<String, Value>) -> Self {
        FieldValue::Dict(value)
    }
}

impl From<Resource> for FieldValue {
    fn from(value: Resource) -> Self {
        FieldValue::Resource(Box::new(value))
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::from_json(value)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(values: Vec<T>) -> Self {
        FieldValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Parse the date-time formats REST APIs commonly emit.
///
/// RFC 3339 first, then ISO-8601 with a `T` or space separator (with or
/// without offset; no offset means UTC), then a bare date at midnight UTC.
pub fn parse_datetime(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}
