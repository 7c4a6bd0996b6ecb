//! Keeping index entries in step with records.
//!
//! Single-record operations run inside the caller's write transaction.
//! The maintenance passes [`SearchEngine::rebuild`] and
//! [`SearchEngine::prune_orphans`] open their own transactions and heal
//! drift: stale rows, duplicated keys and entries of deleted records.

use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;

use crate::{
    adapter::SearchDocument,
    engine::SearchEngine,
    entry::{self, EntryId, EntryKey, IndexEntry},
    error::Result,
    schema::Record,
    store::{Store, Transaction},
};

/// What [`SearchEngine::index_record`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Created(EntryId),
    Updated(EntryId),
}

impl IndexOutcome {
    pub fn id(self) -> EntryId {
        match self {
            Self::Created(id) | Self::Updated(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    pub indexed: usize,
    pub stale_removed: usize,
    pub duplicates_removed: usize,
}

impl SearchEngine {
    /// Derive and upsert the entry for one record.
    pub fn index_record(
        &self,
        txn: &Transaction<'_>,
        entity_type: &str,
        record: &Record,
    ) -> Result<IndexOutcome> {
        let adapter = self.adapter(entity_type)?;
        let document = adapter.document(record);
        self.write_document(txn, entity_type, &record.id, &document)
    }

    /// Delete every entry for a record. Returns whether any existed.
    pub fn remove_record(
        &self,
        txn: &Transaction<'_>,
        entity_type: &str,
        object_id: &str,
    ) -> Result<bool> {
        self.adapter(entity_type)?;
        let key = EntryKey::new(self.slug(), entity_type, object_id);
        let ids = entry::ids_for(txn.raw(), &key)?;
        for id in &ids {
            if let Some(existing) = entry::get(txn.raw(), *id)? {
                self.backend().remove(txn, &existing)?;
            }
        }
        if !ids.is_empty() {
            tracing::debug!(
                engine = %self.slug(),
                entity_type,
                object_id,
                "removed index entry"
            );
        }
        Ok(!ids.is_empty())
    }

    /// Index the record as it currently exists in `txn`, or remove its
    /// entries when it no longer does.
    pub(crate) fn refresh(
        &self,
        txn: &Transaction<'_>,
        entity_type: &str,
        object_id: &str,
    ) -> Result<bool> {
        match txn.get(entity_type, object_id)? {
            Some(record) => {
                self.index_record(txn, entity_type, &record)?;
                Ok(true)
            }
            None => {
                self.remove_record(txn, entity_type, object_id)?;
                Ok(false)
            }
        }
    }

    fn write_document(
        &self,
        txn: &Transaction<'_>,
        entity_type: &str,
        object_id: &str,
        document: &SearchDocument,
    ) -> Result<IndexOutcome> {
        let key = EntryKey::new(self.slug(), entity_type, object_id);
        let ids = entry::ids_for(txn.raw(), &key)?;

        let outcome = match ids.first() {
            None => {
                let id = entry::allocate_id(txn.raw())?;
                self.write_row(txn, id, &key, document)?;
                IndexOutcome::Created(id)
            }
            Some(&first) => {
                if ids.len() > 1 {
                    tracing::warn!(
                        engine = %self.slug(),
                        entity_type,
                        object_id,
                        rows = ids.len(),
                        "duplicate index entries; rebuild will collapse them"
                    );
                }
                for id in &ids {
                    self.write_row(txn, *id, &key, document)?;
                }
                IndexOutcome::Updated(first)
            }
        };
        tracing::debug!(
            engine = %self.slug(),
            entity_type,
            object_id,
            outcome = ?outcome,
            "indexed record"
        );
        Ok(outcome)
    }

    fn write_row(
        &self,
        txn: &Transaction<'_>,
        id: EntryId,
        key: &EntryKey,
        document: &SearchDocument,
    ) -> Result<()> {
        let mut entry = IndexEntry::from_document(id, key, document);
        self.backend().write(txn, &mut entry, document)
    }

    /// Reindex every record of every registered type, drop rows no record
    /// backs, then collapse duplicated keys keeping the lowest row id.
    pub fn rebuild(&self, store: &Store) -> Result<RebuildSummary> {
        let mut summary = RebuildSummary::default();

        for entity_type in self.registered_types() {
            let adapter = self.adapter(&entity_type)?;
            let txn = store.begin()?;
            let records = txn.all(&entity_type)?;

            let documents: Vec<(String, SearchDocument)> = records
                .par_iter()
                .map(|record| (record.id.clone(), adapter.document(record)))
                .collect();

            let mut touched = HashSet::with_capacity(documents.len());
            for (object_id, document) in &documents {
                self.write_document(&txn, &entity_type, object_id, document)?;
                touched.insert(object_id.as_str());
            }
            summary.indexed += documents.len();

            for stale in entry::scan_write(txn.raw(), self.slug())? {
                if stale.entity_type == entity_type
                    && !touched.contains(stale.object_id.as_str())
                {
                    self.backend().remove(&txn, &stale)?;
                    summary.stale_removed += 1;
                }
            }
            txn.commit()?;
            tracing::debug!(
                engine = %self.slug(),
                entity_type = %entity_type,
                records = documents.len(),
                "rebuilt entity type"
            );
        }

        let txn = store.begin()?;
        summary.duplicates_removed = self.collapse_duplicates(&txn)?;
        txn.commit()?;
        self.mark_backend_current(store)?;

        tracing::info!(
            engine = %self.slug(),
            indexed = summary.indexed,
            stale_removed = summary.stale_removed,
            duplicates_removed = summary.duplicates_removed,
            "rebuild complete"
        );
        Ok(summary)
    }

    fn collapse_duplicates(&self, txn: &Transaction<'_>) -> Result<usize> {
        let mut groups: BTreeMap<EntryKey, Vec<IndexEntry>> = BTreeMap::new();
        for entry in entry::scan_write(txn.raw(), self.slug())? {
            groups.entry(entry.key()).or_default().push(entry);
        }

        let mut removed = 0;
        for (key, rows) in groups {
            // Rows arrive in ascending id order; the first one is kept.
            for duplicate in rows.iter().skip(1) {
                self.backend().remove(txn, duplicate)?;
                removed += 1;
            }
            if rows.len() > 1 {
                tracing::warn!(
                    engine = %self.slug(),
                    entity_type = %key.entity_type,
                    object_id = %key.object_id,
                    kept = rows[0].id,
                    "collapsed duplicate index entries"
                );
            }
        }
        Ok(removed)
    }

    /// Delete entries whose record is gone or whose type is no longer
    /// registered. Returns how many were removed.
    pub fn prune_orphans(&self, store: &Store) -> Result<usize> {
        let txn = store.begin()?;
        let mut removed = 0;
        for entry in entry::scan_write(txn.raw(), self.slug())? {
            let orphaned = !self.is_registered(&entry.entity_type)
                || txn.get(&entry.entity_type, &entry.object_id)?.is_none();
            if orphaned {
                self.backend().remove(&txn, &entry)?;
                removed += 1;
            }
        }
        txn.commit()?;

        tracing::info!(engine = %self.slug(), removed, "pruned orphaned entries");
        Ok(removed)
    }
}
