//! rowsift - full-text search over a transactional record store.
//!
//! Entity types are registered with a [`SearchEngine`] through a
//! [`SearchAdapter`] describing which fields are searchable. Once attached
//! to a [`Store`], the engine maintains one [`IndexEntry`] per record in
//! the same transaction as each save or delete, and answers queries
//! through a pluggable [`Backend`].
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rowsift::{
//!     AdapterOptions, EntitySchema, Engines, GenericBackend, Record, Store,
//!     UpdateContext,
//! };
//!
//! let store = Store::open("store.redb".as_ref()).unwrap();
//! store.define(EntitySchema::new("article").text("title").text("body")).unwrap();
//!
//! let engines = Engines::with_default(Arc::new(GenericBackend));
//! let engine = engines.default_engine().unwrap();
//! engine.register(&store, AdapterOptions::new("article")).unwrap();
//! engine.attach(&store).unwrap();
//!
//! let mut txn = store.begin().unwrap();
//! UpdateContext::run(&mut txn, |txn| {
//!     txn.save("article", &Record::new("1").with("title", "Hello search"))
//! })
//! .unwrap();
//! txn.commit().unwrap();
//!
//! for hit in engine.search(&store, "hello").hits().unwrap() {
//!     println!("{}:{} {}", hit.entity_type(), hit.object_id(), hit.title());
//! }
//! ```

pub mod adapter;
pub mod analysis;
pub mod backend;
pub mod cli;
pub mod collection;
pub mod config;
pub mod context;
pub mod data_dir;
pub mod engine;
pub mod entry;
pub mod error;
pub mod indexer;
pub mod query;
pub mod schema;
pub mod store;

pub use adapter::{AdapterOptions, SearchAdapter, SearchDocument, Weight};
pub use analysis::TextSearchConfig;
pub use backend::{
    Backend,
    BackendKind,
    FulltextBackend,
    GenericBackend,
    WeightedVectorBackend,
};
pub use collection::{Collection, Filter};
pub use config::{Manifest, SearchConfig};
pub use context::{FlushSummary, UpdateContext};
pub use data_dir::DataDir;
pub use engine::{DEFAULT_ENGINE, Engines, SearchEngine};
pub use entry::{EntryId, IndexEntry, SearchVector};
pub use error::{Error, Result};
pub use indexer::{IndexOutcome, RebuildSummary};
pub use query::{Scope, Search, SearchHit};
pub use schema::{EntitySchema, FieldKind, Record};
pub use store::{Change, ChangeListener, Snapshot, Store, Transaction};
