//! The host record store the search core layers on top of.
//!
//! Records of every entity type live in one redb database, keyed by
//! `(entity type, primary key)` and holding a JSON object of field values.
//! Writes happen inside a [`Transaction`]; every save and delete is
//! announced to subscribed [`ChangeListener`]s while the transaction is
//! still open, so listeners can write their own tables atomically with the
//! mutation that triggered them.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::Arc,
};

use parking_lot::RwLock;
use redb::{
    Database,
    ReadTransaction,
    ReadableDatabase,
    ReadableTable,
    TableDefinition,
    WriteTransaction,
};
use serde_json::{Map, Value};

use crate::{
    collection::Collection,
    error::{Error, Result},
    schema::{EntitySchema, FieldKind, Record},
};

const RECORDS: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("records");
const SEQUENCES: TableDefinition<&str, u64> =
    TableDefinition::new("sequences");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// A mutation announced to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Saved { entity_type: String, record: Record },
    Deleted { entity_type: String, id: String },
}

impl Change {
    pub fn entity_type(&self) -> &str {
        match self {
            Self::Saved { entity_type, .. } | Self::Deleted { entity_type, .. } => {
                entity_type
            }
        }
    }

    pub fn object_id(&self) -> &str {
        match self {
            Self::Saved { record, .. } => &record.id,
            Self::Deleted { id, .. } => id,
        }
    }
}

/// Receives save/delete notifications inside the mutating transaction.
///
/// An error returned here fails the mutation, and the caller's
/// transaction is expected to be dropped without committing.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, txn: &Transaction<'_>, change: &Change) -> Result<()>;
}

pub struct Store {
    db: Database,
    schemas: RwLock<BTreeMap<String, Arc<EntitySchema>>>,
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(RECORDS)?;
        txn.open_table(SEQUENCES)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self {
            db,
            schemas: RwLock::new(BTreeMap::new()),
            listeners: RwLock::new(Vec::new()),
        })
    }

    // -- Schemas --

    /// Declare an entity type. Redefining an existing type is an error.
    pub fn define(&self, schema: EntitySchema) -> Result<()> {
        let mut schemas = self.schemas.write();
        if schemas.contains_key(&schema.name) {
            return Err(Error::Schema(format!(
                "entity type '{}' is already defined",
                schema.name
            )));
        }
        tracing::debug!(entity_type = %schema.name, "defined entity type");
        schemas.insert(schema.name.clone(), Arc::new(schema));
        Ok(())
    }

    pub fn schema(&self, entity_type: &str) -> Result<Arc<EntitySchema>> {
        self.schemas
            .read()
            .get(entity_type)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "entity type",
                name: entity_type.to_string(),
            })
    }

    pub fn entity_types(&self) -> Vec<String> {
        self.schemas.read().keys().cloned().collect()
    }

    // -- Listeners --

    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.write().push(listener);
    }

    // -- Transactions --

    pub fn begin(&self) -> Result<Transaction<'_>> {
        Ok(Transaction {
            store: self,
            txn: self.db.begin_write()?,
        })
    }

    /// Run `f` in a write transaction, committing on `Ok` and rolling
    /// back on `Err`.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut txn = self.begin()?;
        let value = f(&mut txn)?;
        txn.commit()?;
        Ok(value)
    }

    pub fn read(&self) -> Result<Snapshot<'_>> {
        Ok(Snapshot {
            store: self,
            txn: self.db.begin_read()?,
        })
    }

    pub fn get(&self, entity_type: &str, id: &str) -> Result<Option<Record>> {
        self.read()?.get(entity_type, id)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("entity_types", &self.entity_types())
            .finish_non_exhaustive()
    }
}

/// A write transaction over the store.
///
/// Dropping it without calling [`Transaction::commit`] rolls back every
/// write made through it, including writes made by listeners.
pub struct Transaction<'s> {
    store: &'s Store,
    txn: WriteTransaction,
}

impl<'s> Transaction<'s> {
    pub fn store(&self) -> &'s Store {
        self.store
    }

    pub(crate) fn raw(&self) -> &WriteTransaction {
        &self.txn
    }

    pub fn schema(&self, entity_type: &str) -> Result<Arc<EntitySchema>> {
        self.store.schema(entity_type)
    }

    pub fn get(&self, entity_type: &str, id: &str) -> Result<Option<Record>> {
        let table = self.txn.open_table(RECORDS)?;
        read_record(&table, entity_type, id)
    }

    pub fn all(&self, entity_type: &str) -> Result<Vec<Record>> {
        let table = self.txn.open_table(RECORDS)?;
        read_all(&table, entity_type)
    }

    /// Insert a new record, allocating the next primary key for its type.
    pub fn create(
        &mut self,
        entity_type: &str,
        fields: Map<String, Value>,
    ) -> Result<Record> {
        let schema = self.schema(entity_type)?;
        let next = next_sequence(&self.txn, &format!("record:{entity_type}"))?;
        let id = match schema.primary_key.kind {
            FieldKind::Integer | FieldKind::Text => next.to_string(),
            other => {
                return Err(Error::Schema(format!(
                    "cannot allocate a {other:?} primary key for '{entity_type}'"
                )));
            }
        };
        let record = Record { id, fields };
        self.save(entity_type, &record)?;
        Ok(record)
    }

    /// Insert or replace a record and notify listeners.
    pub fn save(&mut self, entity_type: &str, record: &Record) -> Result<()> {
        self.update_raw(entity_type, record)?;
        self.notify(&Change::Saved {
            entity_type: entity_type.to_string(),
            record: record.clone(),
        })
    }

    /// Delete a record and notify listeners. Returns whether it existed.
    pub fn delete(&mut self, entity_type: &str, id: &str) -> Result<bool> {
        let removed = self.delete_raw(entity_type, id)?;
        if removed {
            self.notify(&Change::Deleted {
                entity_type: entity_type.to_string(),
                id: id.to_string(),
            })?;
        }
        Ok(removed)
    }

    /// Write a record without notifying listeners, the way a bulk
    /// administrative update bypasses per-record hooks.
    pub fn update_raw(&mut self, entity_type: &str, record: &Record) -> Result<()> {
        let schema = self.schema(entity_type)?;
        schema.validate(record)?;
        let bytes = serde_json::to_vec(&record.fields)?;
        let mut table = self.txn.open_table(RECORDS)?;
        table.insert((entity_type, record.id.as_str()), bytes.as_slice())?;
        Ok(())
    }

    /// Delete a record without notifying listeners.
    pub fn delete_raw(&mut self, entity_type: &str, id: &str) -> Result<bool> {
        let mut table = self.txn.open_table(RECORDS)?;
        let removed = table.remove((entity_type, id))?.is_some();
        Ok(removed)
    }

    pub fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }

    pub fn abort(self) -> Result<()> {
        self.txn.abort()?;
        Ok(())
    }

    fn notify(&self, change: &Change) -> Result<()> {
        let listeners = self.store.listeners.read().clone();
        for listener in listeners {
            listener.on_change(self, change)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").finish_non_exhaustive()
    }
}

/// A consistent read view of the store.
pub struct Snapshot<'s> {
    store: &'s Store,
    txn: ReadTransaction,
}

impl<'s> Snapshot<'s> {
    pub fn store(&self) -> &'s Store {
        self.store
    }

    pub(crate) fn raw(&self) -> &ReadTransaction {
        &self.txn
    }

    pub fn get(&self, entity_type: &str, id: &str) -> Result<Option<Record>> {
        let table = self.txn.open_table(RECORDS)?;
        read_record(&table, entity_type, id)
    }

    /// Fetch several records of one type at once; missing ids are absent
    /// from the returned map.
    pub fn get_many<'i>(
        &self,
        entity_type: &str,
        ids: impl IntoIterator<Item = &'i str>,
    ) -> Result<HashMap<String, Record>> {
        let table = self.txn.open_table(RECORDS)?;
        let mut found = HashMap::new();
        for id in ids {
            if let Some(record) = read_record(&table, entity_type, id)? {
                found.insert(record.id.clone(), record);
            }
        }
        Ok(found)
    }

    pub fn all(&self, entity_type: &str) -> Result<Vec<Record>> {
        let table = self.txn.open_table(RECORDS)?;
        read_all(&table, entity_type)
    }

    /// Every record the collection contains.
    pub fn fetch(&self, collection: &Collection) -> Result<Vec<Record>> {
        let schema = self.store.schema(&collection.entity_type)?;
        Ok(self
            .all(&collection.entity_type)?
            .into_iter()
            .filter(|r| collection.contains(&schema, r))
            .collect())
    }
}

impl std::fmt::Debug for Snapshot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").finish_non_exhaustive()
    }
}

/// Allocate the next value of a named counter inside a write transaction.
pub(crate) fn next_sequence(txn: &WriteTransaction, name: &str) -> Result<u64> {
    let mut table = txn.open_table(SEQUENCES)?;
    let current = table.get(name)?.map(|v| v.value()).unwrap_or(0);
    let next = current + 1;
    table.insert(name, next)?;
    Ok(next)
}

fn read_record<T>(table: &T, entity_type: &str, id: &str) -> Result<Option<Record>>
where
    T: ReadableTable<(&'static str, &'static str), &'static [u8]>,
{
    let Some(guard) = table.get((entity_type, id))? else {
        return Ok(None);
    };
    let fields = serde_json::from_slice(guard.value())?;
    Ok(Some(Record {
        id: id.to_string(),
        fields,
    }))
}

fn read_all<T>(table: &T, entity_type: &str) -> Result<Vec<Record>>
where
    T: ReadableTable<(&'static str, &'static str), &'static [u8]>,
{
    let mut result = Vec::new();
    for entry in table.range((entity_type, "")..)? {
        let (k, v) = entry?;
        let (kind, id) = k.value();
        if kind != entity_type {
            break;
        }
        result.push(Record {
            id: id.to_string(),
            fields: serde_json::from_slice(v.value())?,
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn test_store() -> (tempfile::TempDir, Store) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(&tmp.path().join("store.redb")).unwrap();
        store
            .define(EntitySchema::new("note").text("title").boolean("pinned"))
            .unwrap();
        (tmp, store)
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[derive(Default)]
    struct Counter {
        saved: AtomicUsize,
        deleted: AtomicUsize,
    }

    impl ChangeListener for Counter {
        fn on_change(&self, _txn: &Transaction<'_>, change: &Change) -> Result<()> {
            match change {
                Change::Saved { .. } => self.saved.fetch_add(1, Ordering::SeqCst),
                Change::Deleted { .. } => {
                    self.deleted.fetch_add(1, Ordering::SeqCst)
                }
            };
            Ok(())
        }
    }

    #[test]
    fn records_crud() {
        let (_tmp, store) = test_store();

        let created = store
            .write(|txn| txn.create("note", fields(json!({"title": "First"}))))
            .unwrap();
        assert_eq!(created.id, "1");

        let second = store
            .write(|txn| txn.create("note", fields(json!({"title": "Second"}))))
            .unwrap();
        assert_eq!(second.id, "2");

        let loaded = store.get("note", "1").unwrap().unwrap();
        assert_eq!(loaded.get("title"), Some(&json!("First")));

        assert!(store.write(|txn| txn.delete("note", "1")).unwrap());
        assert!(!store.write(|txn| txn.delete("note", "1")).unwrap());
        assert_eq!(store.get("note", "1").unwrap(), None);
        assert_eq!(store.read().unwrap().all("note").unwrap().len(), 1);
    }

    #[test]
    fn all_stays_within_its_entity_type() {
        let (_tmp, store) = test_store();
        store.define(EntitySchema::new("notebook").text("title")).unwrap();
        store.define(EntitySchema::new("a").text("title")).unwrap();
        store
            .write(|txn| {
                txn.save("notebook", &Record::new("1").with("title", "Book"))?;
                txn.save("a", &Record::new("1").with("title", "Before"))?;
                txn.save("note", &Record::new("2").with("title", "Two"))?;
                txn.save("note", &Record::new("1").with("title", "One"))
            })
            .unwrap();

        let notes = store.read().unwrap().all("note").unwrap();
        let ids: Vec<_> = notes.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(store.read().unwrap().all("missing").unwrap().is_empty());
    }

    #[test]
    fn define_twice_fails() {
        let (_tmp, store) = test_store();
        assert!(store.define(EntitySchema::new("note")).is_err());
        assert!(matches!(
            store.schema("ghost"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn save_rejects_undeclared_fields() {
        let (_tmp, store) = test_store();
        let record = Record::new("1").with("colour", "red");
        assert!(store.write(|txn| txn.save("note", &record)).is_err());
        assert_eq!(store.get("note", "1").unwrap(), None);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let (_tmp, store) = test_store();
        {
            let mut txn = store.begin().unwrap();
            txn.save("note", &Record::new("9").with("title", "draft"))
                .unwrap();
            assert!(txn.get("note", "9").unwrap().is_some());
        }
        assert_eq!(store.get("note", "9").unwrap(), None);
    }

    #[test]
    fn listeners_see_saves_and_deletes() {
        let (_tmp, store) = test_store();
        let counter = Arc::new(Counter::default());
        store.subscribe(counter.clone());

        store
            .write(|txn| {
                txn.save("note", &Record::new("1").with("title", "a"))?;
                txn.save("note", &Record::new("1").with("title", "b"))?;
                txn.delete("note", "1")?;
                // Deleting a missing record is not announced.
                txn.delete("note", "1")
            })
            .unwrap();

        assert_eq!(counter.saved.load(Ordering::SeqCst), 2);
        assert_eq!(counter.deleted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn raw_writes_bypass_listeners() {
        let (_tmp, store) = test_store();
        let counter = Arc::new(Counter::default());
        store.subscribe(counter.clone());

        store
            .write(|txn| {
                txn.update_raw("note", &Record::new("1").with("title", "x"))?;
                txn.delete_raw("note", "1")
            })
            .unwrap();

        assert_eq!(counter.saved.load(Ordering::SeqCst), 0);
        assert_eq!(counter.deleted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fetch_applies_collection_filter() {
        let (_tmp, store) = test_store();
        store
            .write(|txn| {
                txn.save("note", &Record::new("1").with("pinned", true))?;
                txn.save("note", &Record::new("2").with("pinned", false))
            })
            .unwrap();

        let snapshot = store.read().unwrap();
        let pinned = snapshot
            .fetch(&Collection::new("note").eq("pinned", true))
            .unwrap();
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].id, "1");

        let many = snapshot.get_many("note", ["1", "2", "3"]).unwrap();
        assert_eq!(many.len(), 2);
    }

    #[test]
    fn settings_crud() {
        let (_tmp, store) = test_store();

        assert_eq!(store.get_setting("engine.default.backend").unwrap(), None);
        assert_eq!(
            store.get_setting_or("engine.default.backend", "generic").unwrap(),
            "generic"
        );

        store.set_setting("engine.default.backend", "fulltext").unwrap();
        assert_eq!(
            store.get_setting("engine.default.backend").unwrap(),
            Some("fulltext".to_string())
        );
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.redb");

        {
            let store = Store::open(&path).unwrap();
            store.define(EntitySchema::new("note").text("title")).unwrap();
            store
                .write(|txn| txn.save("note", &Record::new("1").with("title", "kept")))
                .unwrap();
        }

        {
            let store = Store::open(&path).unwrap();
            store.define(EntitySchema::new("note").text("title")).unwrap();
            let record = store.get("note", "1").unwrap().unwrap();
            assert_eq!(record.get("title"), Some(&json!("kept")));
        }
    }
}
