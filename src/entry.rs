//! Index entries and the tables that hold them.
//!
//! Every engine shares three tables: `search_entries` maps an entry id to
//! the serialized [`IndexEntry`], `search_entry_keys` maps the
//! `(engine, entity type, object id)` key to the ids indexed under it, and
//! `search_fulltext_postings` maps `(engine, term)` to the ids of full-text
//! rows containing the term. The key table is a multimap because a key may
//! transiently carry duplicate rows; rebuilding an engine collapses them.
//!
//! Postings are kept in step with the rows here rather than by a backend, so
//! a row rewritten by any backend drops the terms of the row it replaces.

use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use redb::{
    MultimapTableDefinition,
    ReadTransaction,
    ReadableMultimapTable,
    ReadableTable,
    TableDefinition,
    WriteTransaction,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    adapter::{SearchDocument, Weight},
    backend::QueryScope,
    error::Result,
    store,
};

pub type EntryId = u64;

const ENTRIES: TableDefinition<u64, &[u8]> =
    TableDefinition::new("search_entries");
const ENTRY_KEYS: MultimapTableDefinition<(&str, &str, &str), u64> =
    MultimapTableDefinition::new("search_entry_keys");
pub(crate) const POSTINGS: MultimapTableDefinition<(&str, &str), u64> =
    MultimapTableDefinition::new("search_fulltext_postings");

/// Identifies the record an entry was derived from, within one engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey {
    pub engine_slug: String,
    pub entity_type: String,
    pub object_id: String,
}

impl EntryKey {
    pub fn new(engine_slug: &str, entity_type: &str, object_id: &str) -> Self {
        Self {
            engine_slug: engine_slug.to_string(),
            entity_type: entity_type.to_string(),
            object_id: object_id.to_string(),
        }
    }
}

/// Backend-specific searchable representation of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum SearchVector {
    /// Lowercased concatenation of title, description and content.
    Generic { text: String },
    /// Analyzed lexemes with the weight of every occurrence.
    WeightedVector {
        lexemes: BTreeMap<String, Vec<Weight>>,
    },
    /// Term frequencies plus the lowercased raw text.
    Fulltext {
        terms: BTreeMap<String, u32>,
        text: String,
    },
}

/// One indexed record, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: EntryId,
    pub engine_slug: String,
    pub entity_type: String,
    pub object_id: String,
    pub title: String,
    pub description: String,
    pub url: Option<String>,
    pub meta: Map<String, Value>,
    pub is_live: bool,
    pub search: SearchVector,
    /// Seconds since the Unix epoch of the last write.
    pub updated_at: u64,
}

impl IndexEntry {
    /// Build an entry from a derived document. The search representation
    /// starts empty; the backend fills it in when writing.
    pub fn from_document(
        id: EntryId,
        key: &EntryKey,
        document: &SearchDocument,
    ) -> Self {
        Self {
            id,
            engine_slug: key.engine_slug.clone(),
            entity_type: key.entity_type.clone(),
            object_id: key.object_id.clone(),
            title: document.title.clone(),
            description: document.description.clone(),
            url: document.url.clone(),
            meta: document.meta.clone(),
            is_live: document.is_live,
            search: SearchVector::Generic {
                text: String::new(),
            },
            updated_at: now_secs(),
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(&self.engine_slug, &self.entity_type, &self.object_id)
    }

    pub fn meta(&self, name: &str) -> Option<&Value> {
        self.meta.get(name)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Create the entry tables if they do not exist yet.
pub(crate) fn ensure_tables(txn: &WriteTransaction) -> Result<()> {
    txn.open_table(ENTRIES)?;
    txn.open_multimap_table(ENTRY_KEYS)?;
    txn.open_multimap_table(POSTINGS)?;
    Ok(())
}

pub(crate) fn allocate_id(txn: &WriteTransaction) -> Result<EntryId> {
    store::next_sequence(txn, "search_entry")
}

/// Insert or replace an entry row and link it under its key and terms.
pub(crate) fn put(txn: &WriteTransaction, entry: &IndexEntry) -> Result<()> {
    let bytes = serde_json::to_vec(entry)?;
    let previous: Option<IndexEntry> = {
        let mut table = txn.open_table(ENTRIES)?;
        let replaced = table.insert(entry.id, bytes.as_slice())?;
        match replaced {
            Some(guard) => Some(serde_json::from_slice(guard.value())?),
            None => None,
        }
    };
    if let Some(previous) = &previous {
        link_postings(txn, previous, false)?;
    }
    link_postings(txn, entry, true)?;

    let mut keys = txn.open_multimap_table(ENTRY_KEYS)?;
    keys.insert(
        (
            entry.engine_slug.as_str(),
            entry.entity_type.as_str(),
            entry.object_id.as_str(),
        ),
        entry.id,
    )?;
    Ok(())
}

/// Delete an entry row with its key link and postings. Returns whether it
/// existed.
pub(crate) fn delete(txn: &WriteTransaction, entry: &IndexEntry) -> Result<bool> {
    let stored: Option<IndexEntry> = {
        let mut table = txn.open_table(ENTRIES)?;
        let removed = table.remove(entry.id)?;
        match removed {
            Some(guard) => Some(serde_json::from_slice(guard.value())?),
            None => None,
        }
    };
    link_postings(txn, stored.as_ref().unwrap_or(entry), false)?;

    let mut keys = txn.open_multimap_table(ENTRY_KEYS)?;
    keys.remove(
        (
            entry.engine_slug.as_str(),
            entry.entity_type.as_str(),
            entry.object_id.as_str(),
        ),
        entry.id,
    )?;
    Ok(stored.is_some())
}

/// Add or drop the postings of a full-text row. Other rows carry no terms.
fn link_postings(txn: &WriteTransaction, entry: &IndexEntry, insert: bool) -> Result<()> {
    let SearchVector::Fulltext { terms, .. } = &entry.search else {
        return Ok(());
    };
    let mut postings = txn.open_multimap_table(POSTINGS)?;
    for term in terms.keys() {
        let key = (entry.engine_slug.as_str(), term.as_str());
        if insert {
            postings.insert(key, entry.id)?;
        } else {
            postings.remove(key, entry.id)?;
        }
    }
    Ok(())
}

/// Ids of every row indexed under `key`, ascending.
pub(crate) fn ids_for(txn: &WriteTransaction, key: &EntryKey) -> Result<Vec<EntryId>> {
    let keys = txn.open_multimap_table(ENTRY_KEYS)?;
    let mut ids = Vec::new();
    for id in keys.get((
        key.engine_slug.as_str(),
        key.entity_type.as_str(),
        key.object_id.as_str(),
    ))? {
        ids.push(id?.value());
    }
    ids.sort_unstable();
    Ok(ids)
}

pub(crate) fn get(txn: &WriteTransaction, id: EntryId) -> Result<Option<IndexEntry>> {
    let table = txn.open_table(ENTRIES)?;
    read_entry(&table, id)
}

/// Every entry of an engine inside a write transaction, ascending by id.
pub(crate) fn scan_write(
    txn: &WriteTransaction,
    engine_slug: &str,
) -> Result<Vec<IndexEntry>> {
    let keys = txn.open_multimap_table(ENTRY_KEYS)?;
    let ids = linked_ids(&keys, engine_slug, None)?;
    let table = txn.open_table(ENTRIES)?;
    read_entries(&table, ids)
}

/// Every entry of an engine in a read snapshot, ascending by id.
pub(crate) fn scan_read(
    txn: &ReadTransaction,
    engine_slug: &str,
) -> Result<Vec<IndexEntry>> {
    let keys = txn.open_multimap_table(ENTRY_KEYS)?;
    let ids = linked_ids(&keys, engine_slug, None)?;
    let table = txn.open_table(ENTRIES)?;
    read_entries(&table, ids)
}

/// Entries a query may see: rows of the scope's entity types that pass
/// its live restriction, ascending by id.
pub(crate) fn scan_scope(
    txn: &ReadTransaction,
    scope: &QueryScope<'_>,
) -> Result<Vec<IndexEntry>> {
    let keys = txn.open_multimap_table(ENTRY_KEYS)?;
    let mut ids = Vec::new();
    for entity_type in scope.entity_types {
        ids.extend(linked_ids(&keys, scope.engine_slug, Some(entity_type.as_str()))?);
    }
    ids.sort_unstable();
    let table = txn.open_table(ENTRIES)?;
    let mut entries = read_entries(&table, ids)?;
    entries.retain(|e| scope.includes(e));
    Ok(entries)
}

/// Number of entries an engine holds.
pub(crate) fn count_read(txn: &ReadTransaction, engine_slug: &str) -> Result<usize> {
    let keys = txn.open_multimap_table(ENTRY_KEYS)?;
    Ok(linked_ids(&keys, engine_slug, None)?.len())
}

/// Load specific entries in a read snapshot; missing ids are skipped.
pub(crate) fn load_many(
    txn: &ReadTransaction,
    ids: impl IntoIterator<Item = EntryId>,
) -> Result<Vec<IndexEntry>> {
    let table = txn.open_table(ENTRIES)?;
    read_entries(&table, ids)
}

fn read_entry<T>(table: &T, id: EntryId) -> Result<Option<IndexEntry>>
where
    T: ReadableTable<u64, &'static [u8]>,
{
    match table.get(id)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

fn read_entries<T>(
    table: &T,
    ids: impl IntoIterator<Item = EntryId>,
) -> Result<Vec<IndexEntry>>
where
    T: ReadableTable<u64, &'static [u8]>,
{
    let mut entries = Vec::new();
    for id in ids {
        if let Some(entry) = read_entry(table, id)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Ids linked under an engine, optionally narrowed to one entity type,
/// read from the key prefix so other engines and types are never touched.
fn linked_ids<T>(
    keys: &T,
    engine_slug: &str,
    entity_type: Option<&str>,
) -> Result<Vec<EntryId>>
where
    T: ReadableMultimapTable<(&'static str, &'static str, &'static str), u64>,
{
    let start = (engine_slug, entity_type.unwrap_or(""), "");
    let mut ids = Vec::new();
    for row in keys.range(start..)? {
        let (key, values) = row?;
        let (slug, kind, _) = key.value();
        if slug != engine_slug || entity_type.is_some_and(|t| t != kind) {
            break;
        }
        for id in values {
            ids.push(id?.value());
        }
    }
    ids.sort_unstable();
    Ok(ids)
}
