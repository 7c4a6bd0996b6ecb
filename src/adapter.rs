//! Search adapters: how one entity type is turned into searchable text.
//!
//! [`AdapterOptions`] is the user-facing registration surface. It is
//! validated against the entity schema once, producing a
//! [`SearchAdapter`] that derives a [`SearchDocument`] from any record of
//! that type.

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    collection::{Collection, Filter},
    error::{Error, Result},
    schema::{EntitySchema, Record},
};

const DEFAULT_TITLE_FIELD: &str = "title";
const DEFAULT_DESCRIPTION_FIELD: &str = "description";

/// Relevance class of an indexed field, A strongest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub enum Weight {
    A,
    B,
    C,
    D,
}

impl Weight {
    /// Contribution of one matching occurrence to a rank.
    pub fn factor(self) -> f32 {
        match self {
            Self::A => 1.0,
            Self::B => 0.4,
            Self::C => 0.2,
            Self::D => 0.1,
        }
    }
}

/// Registration options for one entity type.
///
/// Deserializes from the `[[engine.adapter]]` tables of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterOptions {
    pub entity: String,
    /// Fields to index. When absent, every textual field is indexed.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Fields copied into each entry's metadata bag.
    #[serde(default)]
    pub stored: Vec<String>,
    #[serde(default)]
    pub weights: BTreeMap<String, Weight>,
    #[serde(default)]
    pub title_field: Option<String>,
    #[serde(default)]
    pub description_field: Option<String>,
    #[serde(default)]
    pub url_field: Option<String>,
    /// Predicate deciding whether a record is publicly visible.
    #[serde(default)]
    pub live: Option<Filter>,
}

impl AdapterOptions {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Default::default()
        }
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn stored<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stored = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn weight(mut self, field: &str, weight: Weight) -> Self {
        self.weights.insert(field.to_string(), weight);
        self
    }

    pub fn title_field(mut self, field: &str) -> Self {
        self.title_field = Some(field.to_string());
        self
    }

    pub fn description_field(mut self, field: &str) -> Self {
        self.description_field = Some(field.to_string());
        self
    }

    pub fn url_field(mut self, field: &str) -> Self {
        self.url_field = Some(field.to_string());
        self
    }

    /// Restrict the default search scope to records matching `collection`.
    pub fn live(mut self, collection: Collection) -> Self {
        self.live = Some(collection.filter);
        self
    }
}

/// One indexed field and the relevance class its text carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedField {
    pub name: String,
    pub weight: Weight,
}

/// A weighted run of text derived from one indexed field.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub field: String,
    pub weight: Weight,
    pub text: String,
}

/// Everything derived from one record for indexing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchDocument {
    pub title: String,
    pub description: String,
    /// Every indexed field other than title and description, joined.
    pub content: String,
    pub url: Option<String>,
    pub meta: Map<String, Value>,
    pub is_live: bool,
    pub sections: Vec<Section>,
}

impl SearchDocument {
    /// Title, description and content as one searchable string.
    pub fn text(&self) -> String {
        [&self.title, &self.description, &self.content]
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A validated registration of one entity type.
#[derive(Debug, Clone)]
pub struct SearchAdapter {
    schema: Arc<EntitySchema>,
    fields: Vec<IndexedField>,
    stored: Vec<String>,
    title_field: Option<String>,
    description_field: Option<String>,
    url_field: Option<String>,
    live: Collection,
}

impl SearchAdapter {
    /// Validate `options` against `schema`.
    pub fn new(schema: Arc<EntitySchema>, options: &AdapterOptions) -> Result<Self> {
        let entity = &schema.name;
        let require = |field: &str, role: &str| -> Result<()> {
            if schema.has_field(field) {
                Ok(())
            } else {
                Err(Error::registration(format!(
                    "{role} field '{field}' does not exist on '{entity}'"
                )))
            }
        };

        // Explicit fields are taken as given; exclude only trims the default set.
        let names: Vec<String> = match &options.fields {
            Some(_) if !options.exclude.is_empty() => {
                return Err(Error::registration(format!(
                    "'{entity}' sets both fields and exclude; exclude only applies \
                     when fields is not given"
                )));
            }
            Some(fields) => {
                let mut names = Vec::with_capacity(fields.len());
                for field in fields {
                    require(field, "indexed")?;
                    if !names.contains(field) {
                        names.push(field.clone());
                    }
                }
                names
            }
            None => {
                for field in &options.exclude {
                    require(field, "excluded")?;
                }
                schema
                    .textual_fields()
                    .into_iter()
                    .filter(|name| !options.exclude.iter().any(|e| e == name))
                    .map(str::to_string)
                    .collect()
            }
        };
        if names.is_empty() {
            return Err(Error::registration(format!(
                "'{entity}' has no fields left to index"
            )));
        }

        let mut stored = Vec::new();
        for field in &options.stored {
            require(field, "stored")?;
            if names.contains(field) {
                return Err(Error::registration(format!(
                    "field '{field}' of '{entity}' cannot be both indexed and stored"
                )));
            }
            if !stored.contains(field) {
                stored.push(field.clone());
            }
        }

        let title_field =
            role_field(&names, options.title_field.as_deref(), DEFAULT_TITLE_FIELD)
                .map_err(|f| missing_role(entity, "title", f))?;
        let description_field = role_field(
            &names,
            options.description_field.as_deref(),
            DEFAULT_DESCRIPTION_FIELD,
        )
        .map_err(|f| missing_role(entity, "description", f))?;
        if let Some(url) = &options.url_field {
            require(url, "url")?;
        }

        for field in options.weights.keys() {
            if !names.contains(field) {
                return Err(Error::registration(format!(
                    "weighted field '{field}' is not indexed on '{entity}'"
                )));
            }
        }
        let fields = names
            .into_iter()
            .map(|name| {
                let weight = options.weights.get(&name).copied().unwrap_or(
                    if Some(&name) == title_field.as_ref() {
                        Weight::A
                    } else if Some(&name) == description_field.as_ref() {
                        Weight::B
                    } else {
                        Weight::C
                    },
                );
                IndexedField { name, weight }
            })
            .collect();

        let mut live = Collection::new(entity.clone());
        if let Some(filter) = &options.live {
            for field in filter.fields() {
                require(field, "live predicate")?;
            }
            live = live.filter(filter.clone());
        }

        Ok(Self {
            fields,
            stored,
            title_field,
            description_field,
            url_field: options.url_field.clone(),
            live,
            schema,
        })
    }

    pub fn entity_type(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn indexed_fields(&self) -> &[IndexedField] {
        &self.fields
    }

    pub fn stored_fields(&self) -> &[String] {
        &self.stored
    }

    /// The records searched when this type is scoped without a collection.
    pub fn live_collection(&self) -> &Collection {
        &self.live
    }

    pub fn is_live(&self, record: &Record) -> bool {
        self.live.contains(&self.schema, record)
    }

    /// Derive the searchable document for one record.
    pub fn document(&self, record: &Record) -> SearchDocument {
        let schema = &self.schema;
        let sections: Vec<Section> = self
            .fields
            .iter()
            .map(|f| Section {
                field: f.name.clone(),
                weight: f.weight,
                text: record.text(schema, &f.name),
            })
            .collect();

        let pick = |role: &Option<String>| -> String {
            role.as_ref()
                .and_then(|name| sections.iter().find(|s| &s.field == name))
                .map(|s| s.text.clone())
                .unwrap_or_default()
        };
        let title = pick(&self.title_field);
        let description = pick(&self.description_field);
        let content = sections
            .iter()
            .filter(|s| {
                Some(&s.field) != self.title_field.as_ref()
                    && Some(&s.field) != self.description_field.as_ref()
            })
            .map(|s| s.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let url = self
            .url_field
            .as_ref()
            .map(|f| record.text(schema, f))
            .filter(|u| !u.is_empty());

        let meta = self
            .stored
            .iter()
            .map(|f| (f.clone(), record.value(schema, f).unwrap_or(Value::Null)))
            .collect();

        SearchDocument {
            title,
            description,
            content,
            url,
            meta,
            is_live: self.is_live(record),
            sections,
        }
    }
}

/// Resolve the field carrying a display role. An explicitly named field
/// must be indexed; the default is used only when it is indexed.
fn role_field<'a>(
    indexed: &[String],
    explicit: Option<&'a str>,
    default: &str,
) -> std::result::Result<Option<String>, &'a str> {
    match explicit {
        Some(field) if indexed.iter().any(|n| n == field) => {
            Ok(Some(field.to_string()))
        }
        Some(field) => Err(field),
        None => Ok(indexed
            .iter()
            .find(|n| n.as_str() == default)
            .cloned()),
    }
}

fn missing_role(entity: &str, role: &str, field: &str) -> Error {
    Error::registration(format!(
        "{role} field '{field}' is not an indexed field of '{entity}'"
    ))
}
