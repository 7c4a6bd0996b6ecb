//! Behavioural scenarios run against every backend.

use std::{
    collections::BTreeSet,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use rowsift::{
    AdapterOptions,
    Backend,
    BackendKind,
    Collection,
    EntitySchema,
    Error,
    FulltextBackend,
    GenericBackend,
    Record,
    Result,
    SearchDocument,
    SearchEngine,
    Snapshot,
    Store,
    TextSearchConfig,
    Transaction,
    UpdateContext,
    WeightedVectorBackend,
    backend::{Matches, QueryScope},
    entry::IndexEntry,
    query::Search,
};

fn backends() -> Vec<Arc<dyn Backend>> {
    vec![
        Arc::new(GenericBackend),
        Arc::new(WeightedVectorBackend::new(TextSearchConfig::English)),
        Arc::new(FulltextBackend::default()),
    ]
}

fn schema(name: &str) -> EntitySchema {
    EntitySchema::new(name)
        .text("title")
        .text("description")
        .text("content")
        .boolean("is_published")
}

fn seed(model: &str, instance: &str) -> Record {
    Record::new(&instance[instance.len() - 1..])
        .with("title", format!("title {model} instance{instance}"))
        .with("description", format!("description {model} instance{instance}"))
        .with("content", format!("content {model} instance{instance}"))
        .with("is_published", true)
}

struct World {
    _tmp: tempfile::TempDir,
    store: Store,
    engine: SearchEngine,
}

impl World {
    fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_adapters(
            backend,
            vec![AdapterOptions::new("model1"), AdapterOptions::new("model2")],
        )
    }

    fn with_adapters(backend: Arc<dyn Backend>, adapters: Vec<AdapterOptions>) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(&tmp.path().join("store.redb")).unwrap();
        store.define(schema("model1")).unwrap();
        store.define(schema("model2")).unwrap();

        let engine = SearchEngine::new("default", backend);
        for options in adapters {
            engine.register(&store, options).unwrap();
        }
        engine.attach(&store).unwrap();

        store
            .write(|txn| {
                txn.save("model1", &seed("model1", "11"))?;
                txn.save("model1", &seed("model1", "12"))?;
                txn.save("model2", &seed("model2", "21"))?;
                txn.save("model2", &seed("model2", "22"))
            })
            .unwrap();

        Self {
            _tmp: tmp,
            store,
            engine,
        }
    }

    fn search(&self, query: &str) -> Search<'_> {
        self.engine.search(&self.store, query)
    }

    fn save(&self, entity_type: &str, record: Record) {
        self.store
            .write(|txn| txn.save(entity_type, &record))
            .unwrap();
    }

    fn name(&self) -> &'static str {
        self.engine.backend().name()
    }
}

fn keys(search: &Search<'_>) -> BTreeSet<String> {
    search
        .hits()
        .unwrap()
        .iter()
        .map(|h| format!("{}:{}", h.entity_type(), h.object_id()))
        .collect()
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn registration_errors() {
    for backend in backends() {
        let w = World::new(backend);
        let err = w
            .engine
            .register(&w.store, AdapterOptions::new("model1"))
            .unwrap_err();
        assert!(err.is_registration(), "{}", w.name());

        w.engine.unregister("model2").unwrap();
        assert!(w.engine.unregister("model2").unwrap_err().is_registration());
    }
}

#[test]
fn multi_table_search() {
    for backend in backends() {
        let w = World::new(backend);
        let name = w.name();
        assert_eq!(keys(&w.search("instance11")), set(&["model1:1"]), "{name}");
        assert_eq!(keys(&w.search("instance12")), set(&["model1:2"]), "{name}");
        assert_eq!(
            keys(&w.search("model1")),
            set(&["model1:1", "model1:2"]),
            "{name}"
        );
        assert_eq!(w.search("instance").count().unwrap(), 4, "{name}");
        assert_eq!(w.search("fooo").count().unwrap(), 0, "{name}");
        assert_eq!(w.search("INSTANCE21").count().unwrap(), 1, "{name}");
    }
}

#[test]
fn title_is_carried_on_hits() {
    for backend in backends() {
        let w = World::new(backend);
        let search = w.search("instance21");
        let hit = search.one().unwrap();
        assert_eq!(hit.title(), "title model2 instance21", "{}", w.name());
        assert_eq!(hit.entry.description, "description model2 instance21");
        assert_eq!(hit.record.id, "1");
    }
}

#[test]
fn limited_and_excluded_models() {
    for backend in backends() {
        let w = World::new(backend);
        let name = w.name();
        assert_eq!(
            keys(&w.search("instance").models(["model1"])),
            set(&["model1:1", "model1:2"]),
            "{name}"
        );
        assert_eq!(
            keys(&w.search("instance").exclude(["model1"])),
            set(&["model2:1", "model2:2"]),
            "{name}"
        );
        assert_eq!(
            w.search("instance").models(["model1", "model2"]).count().unwrap(),
            4,
            "{name}"
        );
        assert_eq!(
            w.search("instance")
                .models(["model1"])
                .exclude(["model1"])
                .count()
                .unwrap(),
            0,
            "{name}"
        );
    }
}

#[test]
fn models_and_exclude_partition_results() {
    let partitions: [&[&str]; 4] =
        [&[], &["model1"], &["model2"], &["model1", "model2"]];
    for backend in backends() {
        let w = World::new(backend);
        let all = keys(&w.search("instance"));
        for part in partitions {
            let included = keys(&w.search("instance").models(part.iter().copied()));
            let excluded = keys(&w.search("instance").exclude(part.iter().copied()));
            assert!(included.is_disjoint(&excluded), "{} {part:?}", w.name());
            let union: BTreeSet<_> = included.union(&excluded).cloned().collect();
            assert_eq!(union, all, "{} {part:?}", w.name());
        }
    }
}

#[test]
fn collection_scopes() {
    for backend in backends() {
        let w = World::new(backend);
        let name = w.name();
        let only_11 = Collection::new("model1").icontains("title", "instance11");
        assert_eq!(
            keys(&w.search("instance").models([only_11.clone()])),
            set(&["model1:1"]),
            "{name}"
        );
        assert_eq!(
            keys(&w.engine.filter(&w.store, only_11.clone(), "model1")),
            set(&["model1:1"]),
            "{name}"
        );
        assert_eq!(
            keys(&w.search("model1").exclude([only_11])),
            set(&["model1:2"]),
            "{name}"
        );
    }
}

#[test]
fn kitchen_sink() {
    for backend in backends() {
        let w = World::new(backend);
        let search = w
            .search("instance")
            .models([
                rowsift::Scope::from(Collection::new("model1").ids(["1"])),
                rowsift::Scope::from("model2"),
            ])
            .exclude([Collection::new("model2").ids(["2"])]);
        assert_eq!(keys(&search), set(&["model1:1", "model2:1"]), "{}", w.name());
    }
}

#[test]
fn unregistered_scope_is_an_error() {
    for backend in backends() {
        let w = World::new(backend);
        w.engine.unregister("model2").unwrap();
        let err = w.search("instance").models(["model2"]).count().unwrap_err();
        assert!(err.is_registration(), "{}", w.name());
        assert_eq!(w.search("instance").count().unwrap(), 2, "{}", w.name());
    }
}

#[test]
fn live_filter_and_override() {
    for backend in backends() {
        let w = World::with_adapters(
            backend,
            vec![
                AdapterOptions::new("model1")
                    .live(Collection::new("model1").eq("is_published", true)),
                AdapterOptions::new("model2"),
            ],
        );
        let name = w.name();
        w.save("model1", seed("model1", "13").with("is_published", false));

        assert_eq!(
            keys(&w.search("model1")),
            set(&["model1:1", "model1:2"]),
            "{name}"
        );
        assert_eq!(w.search("instance13").count().unwrap(), 0, "{name}");
        assert_eq!(
            keys(&w.search("model1").models([Collection::new("model1")])),
            set(&["model1:1", "model1:2", "model1:3"]),
            "{name}"
        );

        // Publishing makes it visible through the default scope.
        w.save("model1", seed("model1", "13"));
        assert_eq!(w.search("instance13").count().unwrap(), 1, "{name}");
    }
}

#[test]
fn live_filter_applies_before_fallback_matching() {
    for backend in backends() {
        let w = World::with_adapters(
            backend,
            vec![
                AdapterOptions::new("model1")
                    .live(Collection::new("model1").eq("is_published", true)),
                AdapterOptions::new("model2"),
            ],
        );
        w.save(
            "model1",
            seed("model1", "13")
                .with("title", "fooo draft")
                .with("is_published", false),
        );
        w.save("model1", seed("model1", "14").with("title", "fooobar live"));

        assert_eq!(keys(&w.search("fooo")), set(&["model1:4"]), "{}", w.name());
    }
}

#[test]
fn engines_keep_independent_field_policies() {
    for backend in backends() {
        let w = World::new(backend.clone());
        let restricted = SearchEngine::new("restricted", backend);
        for entity_type in ["model1", "model2"] {
            restricted
                .register(
                    &w.store,
                    AdapterOptions::new(entity_type)
                        .exclude(["content", "description"])
                        .stored(["is_published"]),
                )
                .unwrap();
        }
        restricted.attach(&w.store).unwrap();
        restricted.rebuild(&w.store).unwrap();
        w.save("model1", seed("model1", "13"));
        let name = w.name();

        for query in ["content", "description"] {
            assert_eq!(restricted.search(&w.store, query).count().unwrap(), 0, "{name}");
            assert_eq!(w.search(query).count().unwrap(), 5, "{name}");
            assert_eq!(
                restricted.filter(&w.store, "model1", query).count().unwrap(),
                0,
                "{name}"
            );
            assert_eq!(
                w.engine.filter(&w.store, "model1", query).count().unwrap(),
                3,
                "{name}"
            );
        }

        let search = restricted.search(&w.store, "instance13");
        let hit = search.one().unwrap();
        assert_eq!(
            hit.meta("is_published").and_then(|v| v.as_bool()),
            Some(true),
            "{name}"
        );
        let search = w.search("instance13");
        assert_eq!(search.one().unwrap().meta("is_published"), None, "{name}");

        assert_eq!(restricted.entry_count(&w.store).unwrap(), 5, "{name}");
        assert_eq!(w.engine.entry_count(&w.store).unwrap(), 5, "{name}");
    }
}

fn reopen(path: &Path, backend: Arc<dyn Backend>) -> (Store, SearchEngine) {
    let store = Store::open(path).unwrap();
    store.define(schema("model1")).unwrap();
    store.define(schema("model2")).unwrap();
    let engine = SearchEngine::new("default", backend);
    engine.register(&store, AdapterOptions::new("model1")).unwrap();
    engine.attach(&store).unwrap();
    (store, engine)
}

#[test]
fn switching_backends_and_back_keeps_matches_exact() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("store.redb");
    {
        let (store, _engine) = reopen(&path, Arc::new(FulltextBackend::default()));
        store
            .write(|txn| txn.save("model1", &Record::new("1").with("title", "fooo")))
            .unwrap();
    }
    {
        let (store, engine) = reopen(&path, Arc::new(GenericBackend));
        assert!(engine.needs_rebuild(&store).unwrap());
        engine.rebuild(&store).unwrap();
        store
            .write(|txn| txn.save("model1", &Record::new("1").with("title", "baar")))
            .unwrap();
    }
    let (store, engine) = reopen(&path, Arc::new(FulltextBackend::default()));
    engine.rebuild(&store).unwrap();

    assert_eq!(engine.search(&store, "fooo").count().unwrap(), 0);
    let search = engine.search(&store, "baar");
    let hit = search.one().unwrap();
    assert_eq!(hit.title(), "baar");
    assert!(hit.rank.unwrap() > 0.0);
}

#[test]
fn ranking_prefers_repeated_terms() {
    for backend in backends() {
        let w = World::new(backend);
        w.save(
            "model1",
            seed("model1", "11").with("title", "title model1 instance11 fooo baar fooo"),
        );
        w.save(
            "model1",
            seed("model1", "12").with("title", "title model1 instance12 fooo baar"),
        );

        let search = w.search("fooo");
        assert_eq!(search.count().unwrap(), 2, "{}", w.name());
        if !w.engine.supports_ranking() {
            let err = w.search("fooo").require_ranking().count().unwrap_err();
            assert!(matches!(err, Error::BackendCapability { .. }));
            continue;
        }
        let hits = search.hits().unwrap();
        assert_eq!(hits[0].object_id(), "1", "{}", w.name());
        assert!(hits[0].rank.unwrap() > hits[1].rank.unwrap(), "{}", w.name());

        let unranked = w.search("fooo").ranking(false);
        assert!(unranked.hits().unwrap().iter().all(|h| h.rank.is_none()));
    }
}

#[test]
fn stored_meta_is_available_on_hits() {
    for backend in backends() {
        let w = World::with_adapters(
            backend,
            vec![
                AdapterOptions::new("model1")
                    .fields(["title", "description"])
                    .stored(["content", "is_published"]),
                AdapterOptions::new("model2"),
            ],
        );
        let name = w.name();

        let model1 = w.search("instance11");
        let hit = model1.one().unwrap();
        assert_eq!(
            hit.meta("content").and_then(|v| v.as_str()),
            Some("content model1 instance11"),
            "{name}"
        );
        assert_eq!(
            hit.meta("is_published").and_then(|v| v.as_bool()),
            Some(true)
        );

        let model2 = w.search("instance21");
        assert_eq!(model2.one().unwrap().meta("content"), None, "{name}");
    }
}

#[test]
fn excluded_fields_are_not_searchable() {
    for backend in backends() {
        let w = World::with_adapters(
            backend,
            vec![
                AdapterOptions::new("model1").exclude(["content"]),
                AdapterOptions::new("model2"),
            ],
        );
        assert_eq!(
            keys(&w.search("content")),
            set(&["model2:1", "model2:2"]),
            "{}",
            w.name()
        );
    }
}

#[test]
fn email_parts_are_searchable() {
    for backend in backends() {
        let w = World::new(backend);
        w.save("model1", seed("model1", "11").with("title", "fooo@baar.com"));
        for query in ["fooo", "baar.com", "fooo@baar.com"] {
            assert_eq!(
                keys(&w.search(query)),
                set(&["model1:1"]),
                "{} {query}",
                w.name()
            );
        }
    }
}

#[test]
fn deleting_a_record_removes_its_entry() {
    for backend in backends() {
        let w = World::new(backend);
        w.store.write(|txn| txn.delete("model1", "1")).unwrap();
        assert_eq!(w.search("instance11").count().unwrap(), 0, "{}", w.name());
        assert_eq!(w.engine.entry_count(&w.store).unwrap(), 3);
    }
}

#[test]
fn blank_queries_match_nothing() {
    for backend in backends() {
        let w = World::new(backend);
        assert_eq!(w.search("").count().unwrap(), 0, "{}", w.name());
        assert_eq!(w.search(" \t ").count().unwrap(), 0, "{}", w.name());
    }
}

#[test]
fn rebuild_picks_up_bulk_updates() {
    for backend in backends() {
        let w = World::new(backend);
        w.store
            .write(|txn| {
                txn.update_raw(
                    "model1",
                    &seed("model1", "11").with("title", "title bulkedit"),
                )
            })
            .unwrap();
        assert_eq!(w.search("bulkedit").count().unwrap(), 0, "{}", w.name());

        let summary = w.engine.rebuild(&w.store).unwrap();
        assert_eq!(summary.indexed, 4);
        assert_eq!(summary.duplicates_removed, 0);
        assert_eq!(keys(&w.search("bulkedit")), set(&["model1:1"]), "{}", w.name());
    }
}

#[test]
fn prune_removes_orphaned_entries() {
    for backend in backends() {
        let w = World::new(backend);
        w.store.write(|txn| txn.delete_raw("model2", "1")).unwrap();
        assert_eq!(w.engine.entry_count(&w.store).unwrap(), 4);
        assert_eq!(w.engine.prune_orphans(&w.store).unwrap(), 1);
        assert_eq!(w.engine.entry_count(&w.store).unwrap(), 3);
        assert_eq!(w.engine.prune_orphans(&w.store).unwrap(), 0);
    }
}

#[derive(Debug)]
struct CountingBackend {
    inner: Arc<dyn Backend>,
    writes: AtomicUsize,
}

impl CountingBackend {
    fn new(inner: Arc<dyn Backend>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            writes: AtomicUsize::new(0),
        })
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Backend for CountingBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn supports_ranking(&self) -> bool {
        self.inner.supports_ranking()
    }

    fn setup(&self, txn: &Transaction<'_>) -> Result<()> {
        self.inner.setup(txn)
    }

    fn write(
        &self,
        txn: &Transaction<'_>,
        entry: &mut IndexEntry,
        document: &SearchDocument,
    ) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(txn, entry, document)
    }

    fn remove(&self, txn: &Transaction<'_>, entry: &IndexEntry) -> Result<()> {
        self.inner.remove(txn, entry)
    }

    fn query(
        &self,
        snapshot: &Snapshot<'_>,
        scope: QueryScope<'_>,
        query: &str,
    ) -> Result<Matches> {
        self.inner.query(snapshot, scope, query)
    }
}

#[test]
fn context_writes_each_record_once() {
    for backend in backends() {
        let counting = CountingBackend::new(backend);
        let w = World::new(counting.clone());
        let before = counting.writes();

        let mut txn = w.store.begin().unwrap();
        let context = UpdateContext::enter();
        txn.save("model1", &seed("model1", "11").with("title", "changed once"))
            .unwrap();
        txn.save("model1", &seed("model1", "11").with("title", "changed twice"))
            .unwrap();
        assert_eq!(counting.writes(), before, "{}", w.name());
        context.finish(&txn).unwrap();
        txn.commit().unwrap();

        assert_eq!(counting.writes(), before + 1, "{}", w.name());
        assert_eq!(keys(&w.search("twice")), set(&["model1:1"]), "{}", w.name());
        assert_eq!(w.search("once").count().unwrap(), 0, "{}", w.name());
    }
}

#[test]
fn without_context_every_save_writes() {
    let counting = CountingBackend::new(Arc::new(GenericBackend));
    let w = World::new(counting.clone());
    let before = counting.writes();
    w.store
        .write(|txn| {
            txn.save("model1", &seed("model1", "11").with("title", "a"))?;
            txn.save("model1", &seed("model1", "11").with("title", "b"))
        })
        .unwrap();
    assert_eq!(counting.writes(), before + 2);
}

#[test]
fn abandoned_context_leaves_entry_untouched() {
    for backend in backends() {
        let w = World::new(backend);
        let mut txn = w.store.begin().unwrap();
        {
            let _context = UpdateContext::enter();
            txn.save("model1", &seed("model1", "11").with("title", "abandoned"))
                .unwrap();
        }
        txn.commit().unwrap();

        assert_eq!(w.search("abandoned").count().unwrap(), 0, "{}", w.name());
        let search = w.search("instance11");
        let hit = search.one().unwrap();
        assert_eq!(hit.title(), "title model1 instance11", "{}", w.name());
    }
}

#[test]
fn context_run_flushes_deletes() {
    for backend in backends() {
        let w = World::new(backend);
        let mut txn = w.store.begin().unwrap();
        UpdateContext::run(&mut txn, |txn| {
            txn.delete("model2", "1")?;
            txn.save("model2", &seed("model2", "23"))
        })
        .unwrap();
        txn.commit().unwrap();

        assert_eq!(w.search("instance21").count().unwrap(), 0, "{}", w.name());
        assert_eq!(w.search("instance23").count().unwrap(), 1, "{}", w.name());
    }
}
