//! Search engines and the registry of engines.
//!
//! A [`SearchEngine`] binds entity types to their [`SearchAdapter`]s and to
//! one [`Backend`]. Engines are cheap handles; clones share the same
//! registrations. Once attached to a [`Store`], an engine keeps its
//! entries in step with every save and delete of a registered type.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
    adapter::{AdapterOptions, SearchAdapter},
    backend::{self, Backend},
    config::SearchConfig,
    context,
    entry::{self, IndexEntry},
    error::{Error, Result},
    indexer::RebuildSummary,
    store::{Change, ChangeListener, Store, Transaction},
};

/// Slug of the engine used when none is named.
pub const DEFAULT_ENGINE: &str = "default";

#[derive(Clone)]
pub struct SearchEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    slug: String,
    backend: Arc<dyn Backend>,
    adapters: RwLock<BTreeMap<String, Arc<SearchAdapter>>>,
}

impl SearchEngine {
    pub fn new(slug: &str, backend: Arc<dyn Backend>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                slug: slug.to_string(),
                backend,
                adapters: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    pub fn from_config(slug: &str, config: &SearchConfig) -> Self {
        Self::new(slug, backend::from_config(config))
    }

    pub fn slug(&self) -> &str {
        &self.inner.slug
    }

    pub fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    pub fn supports_ranking(&self) -> bool {
        self.inner.backend.supports_ranking()
    }

    // -- Registry --

    /// Register an entity type, validating `options` against its schema.
    pub fn register(&self, store: &Store, options: AdapterOptions) -> Result<()> {
        let schema = store.schema(&options.entity).map_err(|_| {
            Error::registration(format!(
                "unknown entity type '{}'",
                options.entity
            ))
        })?;
        let adapter = SearchAdapter::new(schema, &options)?;

        let mut adapters = self.inner.adapters.write();
        if adapters.contains_key(&options.entity) {
            return Err(Error::registration(format!(
                "entity type '{}' is already registered with search engine '{}'",
                options.entity,
                self.slug()
            )));
        }
        tracing::debug!(
            engine = %self.slug(),
            entity_type = %options.entity,
            "registered entity type"
        );
        adapters.insert(options.entity, Arc::new(adapter));
        Ok(())
    }

    /// Remove a registration. Existing entries stay until pruned.
    pub fn unregister(&self, entity_type: &str) -> Result<()> {
        match self.inner.adapters.write().remove(entity_type) {
            Some(_) => {
                tracing::debug!(
                    engine = %self.slug(),
                    entity_type,
                    "unregistered entity type"
                );
                Ok(())
            }
            None => Err(Error::not_registered(self.slug(), entity_type)),
        }
    }

    pub fn is_registered(&self, entity_type: &str) -> bool {
        self.inner.adapters.read().contains_key(entity_type)
    }

    pub fn adapter(&self, entity_type: &str) -> Result<Arc<SearchAdapter>> {
        self.inner
            .adapters
            .read()
            .get(entity_type)
            .cloned()
            .ok_or_else(|| Error::not_registered(self.slug(), entity_type))
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.inner.adapters.read().keys().cloned().collect()
    }

    // -- Store integration --

    fn backend_setting_key(&self) -> String {
        format!("engine.{}.backend", self.slug())
    }

    /// Prepare backend storage and start following changes to `store`.
    /// Attach each engine to a store once.
    pub fn attach(&self, store: &Store) -> Result<()> {
        let txn = store.begin()?;
        self.backend().setup(&txn)?;
        txn.commit()?;

        let key = self.backend_setting_key();
        match store.get_setting(&key)? {
            None => store.set_setting(&key, self.backend().name())?,
            Some(previous) if previous != self.backend().name() => {
                tracing::warn!(
                    engine = %self.slug(),
                    previous = %previous,
                    current = self.backend().name(),
                    "entries were written by another backend; rebuild required"
                );
            }
            Some(_) => {}
        }

        store.subscribe(Arc::new(self.clone()));
        Ok(())
    }

    /// Whether stored entries were written by a different backend than the
    /// configured one.
    pub fn needs_rebuild(&self, store: &Store) -> Result<bool> {
        Ok(store
            .get_setting(&self.backend_setting_key())?
            .is_some_and(|name| name != self.backend().name()))
    }

    /// Record that every entry now belongs to the configured backend.
    pub(crate) fn mark_backend_current(&self, store: &Store) -> Result<()> {
        store.set_setting(&self.backend_setting_key(), self.backend().name())
    }

    /// Every entry of this engine, ascending by id.
    pub fn entries(&self, store: &Store) -> Result<Vec<IndexEntry>> {
        let snapshot = store.read()?;
        entry::scan_read(snapshot.raw(), self.slug())
    }

    pub fn entry_count(&self, store: &Store) -> Result<usize> {
        let snapshot = store.read()?;
        entry::count_read(snapshot.raw(), self.slug())
    }
}

impl ChangeListener for SearchEngine {
    fn on_change(&self, txn: &Transaction<'_>, change: &Change) -> Result<()> {
        let entity_type = change.entity_type();
        if !self.is_registered(entity_type) {
            return Ok(());
        }
        if context::capture(self, change) {
            return Ok(());
        }
        match change {
            Change::Saved { record, .. } => {
                self.index_record(txn, entity_type, record)?;
            }
            Change::Deleted { id, .. } => {
                self.remove_record(txn, entity_type, id)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("slug", &self.slug())
            .field("backend", &self.backend().name())
            .field("registered_types", &self.registered_types())
            .finish()
    }
}

/// The set of engines a process runs, keyed by slug.
#[derive(Debug, Default)]
pub struct Engines {
    engines: RwLock<BTreeMap<String, SearchEngine>>,
}

impl Engines {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding only the conventional default engine.
    pub fn with_default(backend: Arc<dyn Backend>) -> Self {
        let engine = SearchEngine::new(DEFAULT_ENGINE, backend);
        Self {
            engines: RwLock::new(BTreeMap::from([(
                DEFAULT_ENGINE.to_string(),
                engine,
            )])),
        }
    }

    pub fn add(&self, engine: SearchEngine) -> Result<()> {
        let mut engines = self.engines.write();
        if engines.contains_key(engine.slug()) {
            return Err(Error::registration(format!(
                "search engine '{}' already exists",
                engine.slug()
            )));
        }
        engines.insert(engine.slug().to_string(), engine);
        Ok(())
    }

    pub fn get(&self, slug: &str) -> Result<SearchEngine> {
        self.engines
            .read()
            .get(slug)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "search engine",
                name: slug.to_string(),
            })
    }

    pub fn default_engine(&self) -> Result<SearchEngine> {
        self.get(DEFAULT_ENGINE)
    }

    pub fn slugs(&self) -> Vec<String> {
        self.engines.read().keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<SearchEngine> {
        self.engines.read().values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.read().is_empty()
    }

    pub fn attach(&self, store: &Store) -> Result<()> {
        for engine in self.all() {
            engine.attach(store)?;
        }
        Ok(())
    }

    pub fn rebuild(&self, store: &Store, slug: &str) -> Result<RebuildSummary> {
        self.get(slug)?.rebuild(store)
    }

    pub fn prune_orphans(&self, store: &Store, slug: &str) -> Result<usize> {
        self.get(slug)?.prune_orphans(store)
    }
}
