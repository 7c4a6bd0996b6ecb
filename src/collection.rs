//! Filtered collections: a predicate-restricted view of one entity type.
//!
//! Collections serve as registration-time live predicates, as search
//! scopes, and as the target records are resolved through.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{EntitySchema, Record, value_to_text};

/// A predicate over records of one entity type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    #[default]
    All,
    /// Field equals the given value exactly.
    Eq { field: String, value: Value },
    /// Field text contains the needle, ignoring case.
    IContains { field: String, needle: String },
    /// Primary key is one of the given ids.
    IdIn(BTreeSet<String>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn matches(&self, schema: &EntitySchema, record: &Record) -> bool {
        match self {
            Self::All => true,
            Self::Eq { field, value } => {
                record.value(schema, field).as_ref() == Some(value)
            }
            Self::IContains { field, needle } => record
                .value(schema, field)
                .map(|v| {
                    value_to_text(&v)
                        .to_lowercase()
                        .contains(&needle.to_lowercase())
                })
                .unwrap_or(false),
            Self::IdIn(ids) => ids.contains(&record.id),
            Self::And(filters) => {
                filters.iter().all(|f| f.matches(schema, record))
            }
            Self::Or(filters) => {
                filters.iter().any(|f| f.matches(schema, record))
            }
            Self::Not(inner) => !inner.matches(schema, record),
        }
    }

    /// Every field name the predicate references.
    pub(crate) fn fields(&self) -> Vec<&str> {
        match self {
            Self::All | Self::IdIn(_) => Vec::new(),
            Self::Eq { field, .. } | Self::IContains { field, .. } => {
                vec![field.as_str()]
            }
            Self::And(filters) | Self::Or(filters) => {
                filters.iter().flat_map(Filter::fields).collect()
            }
            Self::Not(inner) => inner.fields(),
        }
    }

    fn and(self, other: Filter) -> Filter {
        match self {
            Self::All => other,
            Self::And(mut filters) => {
                filters.push(other);
                Self::And(filters)
            }
            current => Self::And(vec![current, other]),
        }
    }
}

/// A filtered set of records of one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub entity_type: String,
    #[serde(default)]
    pub filter: Filter,
}

impl Collection {
    /// Every record of the entity type.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            filter: Filter::All,
        }
    }

    /// Narrow the collection with an additional predicate.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = self.filter.and(filter);
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq {
            field: field.to_string(),
            value: value.into(),
        })
    }

    pub fn icontains(self, field: &str, needle: &str) -> Self {
        self.filter(Filter::IContains {
            field: field.to_string(),
            needle: needle.to_string(),
        })
    }

    pub fn ids<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter(Filter::IdIn(ids.into_iter().map(Into::into).collect()))
    }

    pub fn contains(&self, schema: &EntitySchema, record: &Record) -> bool {
        self.filter.matches(schema, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> EntitySchema {
        EntitySchema::new("post").text("title").boolean("is_published")
    }

    fn post(id: &str, title: &str, published: bool) -> Record {
        Record::new(id)
            .with("title", title)
            .with("is_published", published)
    }

    #[test]
    fn all_matches_everything() {
        let c = Collection::new("post");
        assert!(c.contains(&schema(), &post("1", "x", false)));
    }

    #[test]
    fn chained_predicates_are_conjunctive() {
        let c = Collection::new("post")
            .icontains("title", "HELLO")
            .eq("is_published", true);
        assert!(c.contains(&schema(), &post("1", "hello world", true)));
        assert!(!c.contains(&schema(), &post("2", "hello world", false)));
        assert!(!c.contains(&schema(), &post("3", "goodbye", true)));
    }

    #[test]
    fn id_filter_and_negation() {
        let c = Collection::new("post").ids(["1", "2"]);
        assert!(c.contains(&schema(), &post("2", "", true)));
        assert!(!c.contains(&schema(), &post("3", "", true)));

        let not = Filter::Not(Box::new(Filter::IdIn(["1".to_string()].into())));
        assert!(!not.matches(&schema(), &post("1", "", true)));
    }

    #[test]
    fn eq_on_integer_primary_key() {
        let schema = schema();
        let record = post("5", "Fooo", true);
        assert!(Collection::new("post").eq("id", 5).contains(&schema, &record));
        assert!(!Collection::new("post").eq("id", "5").contains(&schema, &record));
    }

    #[test]
    fn icontains_on_missing_field_is_false() {
        let c = Collection::new("post").icontains("summary", "x");
        assert!(!c.contains(&schema(), &post("1", "x", true)));
    }

    #[test]
    fn referenced_fields_are_collected() {
        let c = Collection::new("post")
            .icontains("title", "a")
            .filter(Filter::Or(vec![Filter::Eq {
                field: "is_published".into(),
                value: true.into(),
            }]));
        assert_eq!(c.filter.fields(), vec!["title", "is_published"]);
    }
}
