//! The lazy search builder.
//!
//! [`SearchEngine::search`] returns a [`Search`] that is narrowed with
//! scopes and evaluated once, on the first terminal call. Evaluation asks
//! the backend for ranked entries, keeps the first entry per record,
//! resolves records in one batch per entity type and then applies the
//! scope collections and exclusions.

use std::{
    cell::OnceCell,
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    ops::Range,
    sync::Arc,
};

use serde_json::Value;

use crate::{
    adapter::SearchAdapter,
    backend::{EntryMatch, QueryScope},
    collection::Collection,
    engine::SearchEngine,
    entry::IndexEntry,
    error::{Error, Result},
    schema::Record,
    store::Store,
};

/// One element of a `models` or `exclude` list.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// Every live record of the type.
    Type(String),
    /// Exactly the records the collection contains.
    Collection(Collection),
}

impl Scope {
    pub fn entity_type(&self) -> &str {
        match self {
            Self::Type(entity_type) => entity_type,
            Self::Collection(collection) => &collection.entity_type,
        }
    }
}

impl From<&str> for Scope {
    fn from(entity_type: &str) -> Self {
        Self::Type(entity_type.to_string())
    }
}

impl From<String> for Scope {
    fn from(entity_type: String) -> Self {
        Self::Type(entity_type)
    }
}

impl From<Collection> for Scope {
    fn from(collection: Collection) -> Self {
        Self::Collection(collection)
    }
}

/// A matched record.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entry: IndexEntry,
    pub record: Record,
    /// Backend rank; `None` when ranking was disabled.
    pub rank: Option<f32>,
}

impl SearchHit {
    pub fn entity_type(&self) -> &str {
        &self.entry.entity_type
    }

    pub fn object_id(&self) -> &str {
        &self.entry.object_id
    }

    pub fn title(&self) -> &str {
        &self.entry.title
    }

    /// A stored metadata value; `None` for fields the adapter did not store.
    pub fn meta(&self, name: &str) -> Option<&Value> {
        self.entry.meta(name)
    }
}

/// How records of one entity type are admitted into results.
struct TypePlan {
    adapter: Arc<SearchAdapter>,
    include: Vec<Collection>,
    exclude: Vec<Collection>,
    /// Only bare scopes name this type, so non-live entries can be dropped
    /// before their records are loaded.
    live_only: bool,
}

impl TypePlan {
    fn admits(&self, record: &Record) -> bool {
        let schema = self.adapter.schema();
        self.include.iter().any(|c| c.contains(schema, record))
            && !self.exclude.iter().any(|c| c.contains(schema, record))
    }
}

fn plan(
    engine: &SearchEngine,
    models: Option<&[Scope]>,
    exclude: &[Scope],
) -> Result<BTreeMap<String, TypePlan>> {
    for scope in models.unwrap_or_default().iter().chain(exclude) {
        engine.adapter(scope.entity_type())?;
    }

    let mut plans: BTreeMap<String, TypePlan> = BTreeMap::new();
    let bare: Vec<Scope>;
    let models: &[Scope] = match models {
        Some(models) => models,
        None => {
            bare = engine
                .registered_types()
                .into_iter()
                .map(Scope::Type)
                .collect();
            &bare
        }
    };
    for scope in models {
        let entity_type = scope.entity_type();
        if !plans.contains_key(entity_type) {
            let adapter = engine.adapter(entity_type)?;
            plans.insert(
                entity_type.to_string(),
                TypePlan {
                    adapter,
                    include: Vec::new(),
                    exclude: Vec::new(),
                    live_only: true,
                },
            );
        }
        let Some(plan) = plans.get_mut(entity_type) else {
            continue;
        };
        match scope {
            Scope::Type(_) => {
                plan.include.push(plan.adapter.live_collection().clone());
            }
            Scope::Collection(collection) => {
                plan.include.push(collection.clone());
                plan.live_only = false;
            }
        }
    }

    for scope in exclude {
        match scope {
            Scope::Type(entity_type) => {
                plans.remove(entity_type);
            }
            Scope::Collection(collection) => {
                if let Some(plan) = plans.get_mut(&collection.entity_type) {
                    plan.exclude.push(collection.clone());
                }
            }
        }
    }
    Ok(plans)
}

/// A lazily evaluated search against one engine.
pub struct Search<'a> {
    engine: &'a SearchEngine,
    store: &'a Store,
    query: String,
    models: Option<Vec<Scope>>,
    exclude: Vec<Scope>,
    ranking: bool,
    require_ranking: bool,
    hits: OnceCell<Vec<SearchHit>>,
}

impl<'a> Search<'a> {
    pub(crate) fn new(engine: &'a SearchEngine, store: &'a Store, query: &str) -> Self {
        Self {
            engine,
            store,
            query: query.to_string(),
            models: None,
            exclude: Vec::new(),
            ranking: true,
            require_ranking: false,
            hits: OnceCell::new(),
        }
    }

    /// Restrict results to these scopes, unioned.
    pub fn models<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scope>,
    {
        self.models = Some(scopes.into_iter().map(Into::into).collect());
        self.hits = OnceCell::new();
        self
    }

    pub fn exclude<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scope>,
    {
        self.exclude = scopes.into_iter().map(Into::into).collect();
        self.hits = OnceCell::new();
        self
    }

    /// Whether hits carry ranks. Disabling keeps the backend order.
    pub fn ranking(mut self, enabled: bool) -> Self {
        self.ranking = enabled;
        self.hits = OnceCell::new();
        self
    }

    /// Fail evaluation when the backend cannot rank.
    pub fn require_ranking(mut self) -> Self {
        self.require_ranking = true;
        self.hits = OnceCell::new();
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Every hit, evaluating the search on first use.
    pub fn hits(&self) -> Result<&[SearchHit]> {
        if let Some(hits) = self.hits.get() {
            return Ok(hits);
        }
        let hits = self.evaluate()?;
        Ok(self.hits.get_or_init(|| hits))
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.hits()?.len())
    }

    pub fn get(&self, index: usize) -> Result<Option<&SearchHit>> {
        Ok(self.hits()?.get(index))
    }

    pub fn first(&self) -> Result<Option<&SearchHit>> {
        self.get(0)
    }

    /// Hits in `range`, clamped to the available results.
    pub fn slice(&self, range: Range<usize>) -> Result<&[SearchHit]> {
        let hits = self.hits()?;
        let end = range.end.min(hits.len());
        let start = range.start.min(end);
        Ok(&hits[start..end])
    }

    /// The only hit; anything other than exactly one is an error.
    pub fn one(&self) -> Result<&SearchHit> {
        match self.hits()? {
            [hit] => Ok(hit),
            hits => Err(Error::NotUnique { count: hits.len() }),
        }
    }

    pub fn into_hits(self) -> Result<Vec<SearchHit>> {
        match self.hits.into_inner() {
            Some(hits) => Ok(hits),
            None => {
                let search = Search {
                    hits: OnceCell::new(),
                    ..self
                };
                search.evaluate()
            }
        }
    }

    fn evaluate(&self) -> Result<Vec<SearchHit>> {
        let engine = self.engine;
        let plans = plan(engine, self.models.as_deref(), &self.exclude)?;
        if self.require_ranking && !engine.supports_ranking() {
            return Err(Error::BackendCapability {
                backend: engine.backend().name(),
                capability: "ranking",
            });
        }
        if self.query.trim().is_empty() || plans.is_empty() {
            return Ok(Vec::new());
        }

        let snapshot = self.store.read()?;
        let entity_types: BTreeSet<String> = plans.keys().cloned().collect();
        let live_only: BTreeSet<String> = plans
            .iter()
            .filter(|(_, plan)| plan.live_only)
            .map(|(entity_type, _)| entity_type.clone())
            .collect();
        // Backends apply the live restriction before any fallback.
        let scope = QueryScope {
            engine_slug: engine.slug(),
            entity_types: &entity_types,
            live_only: &live_only,
        };

        let mut seen = HashSet::new();
        let mut matched: Vec<EntryMatch> = Vec::new();
        for m in engine.backend().query(&snapshot, scope, &self.query)? {
            if !scope.includes(&m.entry) {
                continue;
            }
            if !seen.insert((m.entry.entity_type.clone(), m.entry.object_id.clone())) {
                continue;
            }
            matched.push(m);
        }

        let mut records: HashMap<String, HashMap<String, Record>> = HashMap::new();
        for entity_type in plans.keys() {
            let ids = matched
                .iter()
                .filter(|m| &m.entry.entity_type == entity_type)
                .map(|m| m.entry.object_id.as_str());
            records.insert(entity_type.clone(), snapshot.get_many(entity_type, ids)?);
        }

        let mut hits = Vec::with_capacity(matched.len());
        for m in matched {
            let entity_type = &m.entry.entity_type;
            let Some(record) = records
                .get_mut(entity_type)
                .and_then(|found| found.remove(&m.entry.object_id))
            else {
                continue;
            };
            let Some(plan) = plans.get(entity_type) else {
                continue;
            };
            if !plan.admits(&record) {
                continue;
            }
            hits.push(SearchHit {
                rank: self.ranking.then_some(m.rank),
                entry: m.entry,
                record,
            });
        }

        tracing::debug!(
            engine = %engine.slug(),
            query = %self.query,
            hits = hits.len(),
            "search evaluated"
        );
        Ok(hits)
    }
}

impl std::fmt::Debug for Search<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Search")
            .field("engine", &self.engine.slug())
            .field("query", &self.query)
            .field("models", &self.models)
            .field("exclude", &self.exclude)
            .field("ranking", &self.ranking)
            .finish_non_exhaustive()
    }
}

impl SearchEngine {
    /// Start a search over every registered type.
    pub fn search<'a>(&'a self, store: &'a Store, query: &str) -> Search<'a> {
        Search::new(self, store, query)
    }

    /// Search a single scope.
    pub fn filter<'a>(
        &'a self,
        store: &'a Store,
        target: impl Into<Scope>,
        query: &str,
    ) -> Search<'a> {
        self.search(store, query).models([target.into()])
    }
}
