//! Entity schemas and records held by the host store.
//!
//! An [`EntitySchema`] is the introspection surface adapters are validated
//! against: a named entity type, its primary key, and its typed fields.
//! A [`Record`] is one row of an entity type, its primary key carried as a
//! string so numeric and textual keys share one representation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Text, Value::String(_)) => true,
            (Self::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (Self::Float, Value::Number(_)) => true,
            (Self::Boolean, Value::Bool(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

fn default_primary_key() -> FieldDef {
    FieldDef::new("id", FieldKind::Integer)
}

/// Describes one entity type: its name, primary key and fields.
///
/// The primary key defaults to an integer `id`. It is not listed in
/// `fields`; it is addressed by name like any other field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: FieldDef,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: default_primary_key(),
            fields: Vec::new(),
        }
    }

    /// Use a textual primary key with the given name.
    pub fn text_primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = FieldDef::new(name, FieldKind::Text);
        self
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef::new(name, kind));
        self
    }

    pub fn text(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Text)
    }

    pub fn integer(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Integer)
    }

    pub fn float(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Float)
    }

    pub fn boolean(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Boolean)
    }

    /// Look up a field by name, including the primary key.
    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        if self.primary_key.name == name {
            return Some(&self.primary_key);
        }
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names of every textual field, primary key first when it is textual.
    pub fn textual_fields(&self) -> Vec<&str> {
        std::iter::once(&self.primary_key)
            .chain(self.fields.iter())
            .filter(|f| f.kind == FieldKind::Text)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Check that a record only carries declared fields of the right kind.
    pub fn validate(&self, record: &Record) -> Result<()> {
        for (name, value) in &record.fields {
            if name == &self.primary_key.name {
                return Err(Error::Schema(format!(
                    "primary key '{name}' of '{}' must not be set as a field",
                    self.name
                )));
            }
            let def = self.get(name).ok_or_else(|| {
                Error::Schema(format!(
                    "'{}' has no field named '{name}'",
                    self.name
                ))
            })?;
            if !def.kind.accepts(value) {
                return Err(Error::Schema(format!(
                    "field '{}.{name}' expects {:?}, got {value}",
                    self.name, def.kind
                )));
            }
        }
        Ok(())
    }
}

/// One stored row of an entity type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field assignment.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Resolve a field value the way a schema sees it, so the primary key
    /// is addressable by name with its declared kind.
    pub fn value(&self, schema: &EntitySchema, field: &str) -> Option<Value> {
        if field == schema.primary_key.name {
            return Some(self.primary_key_value(schema.primary_key.kind));
        }
        self.fields.get(field).cloned()
    }

    fn primary_key_value(&self, kind: FieldKind) -> Value {
        if kind == FieldKind::Integer {
            if let Ok(n) = self.id.parse::<i64>() {
                return Value::from(n);
            }
            if let Ok(n) = self.id.parse::<u64>() {
                return Value::from(n);
            }
        }
        Value::String(self.id.clone())
    }

    /// Render a field as display text; missing and null fields are empty.
    pub fn text(&self, schema: &EntitySchema, field: &str) -> String {
        self.value(schema, field)
            .map(|v| value_to_text(&v))
            .unwrap_or_default()
    }
}

/// Flatten a JSON value into the text that gets indexed.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(_) => value.to_string(),
    }
}
