//! Search configuration and the TOML manifest the CLI loads.
//!
//! A manifest declares entity schemas, the search engines to run and the
//! entity types registered with each:
//!
//! ```toml
//! [[entity]]
//! name = "article"
//! fields = [
//!     { name = "title", kind = "text" },
//!     { name = "is_published", kind = "boolean" },
//! ]
//!
//! [[engine]]
//! slug = "default"
//! backend = "weighted_vector"
//!
//! [[engine.adapter]]
//! entity = "article"
//! live = { eq = { field = "is_published", value = true } }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    adapter::AdapterOptions,
    analysis::TextSearchConfig,
    backend::{BackendKind, DEFAULT_MIN_TOKEN_LEN},
    engine::{DEFAULT_ENGINE, Engines, SearchEngine},
    error::{Error, Result},
    schema::EntitySchema,
    store::Store,
};

const MANIFEST_ENV: &str = "ROWSIFT_MANIFEST";
const DEFAULT_MANIFEST: &str = "rowsift.toml";

/// Backend selection for one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub backend: BackendKind,
    /// Analyzer used by the weighted vector backend.
    pub text_search_config: TextSearchConfig,
    /// Shortest term the full-text backend indexes.
    pub min_token_len: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            text_search_config: TextSearchConfig::default(),
            min_token_len: DEFAULT_MIN_TOKEN_LEN,
        }
    }
}

fn default_slug() -> String {
    DEFAULT_ENGINE.to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineManifest {
    #[serde(default = "default_slug")]
    pub slug: String,
    #[serde(flatten)]
    pub search: SearchConfig,
    #[serde(default, rename = "adapter")]
    pub adapters: Vec<AdapterOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Manifest {
    #[serde(default, rename = "entity")]
    pub entities: Vec<EntitySchema>,
    #[serde(default, rename = "engine")]
    pub engines: Vec<EngineManifest>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read manifest {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Define the declared schemas on `store`, build every engine with its
    /// registrations and attach them. A manifest without engines gets an
    /// empty default one.
    pub fn apply(&self, store: &Store) -> Result<Engines> {
        for schema in &self.entities {
            store.define(schema.clone())?;
        }

        let engines = Engines::new();
        for manifest in &self.engines {
            let engine = SearchEngine::from_config(&manifest.slug, &manifest.search);
            for options in &manifest.adapters {
                engine.register(store, options.clone())?;
            }
            engines.add(engine)?;
        }
        if engines.is_empty() {
            engines.add(SearchEngine::from_config(
                DEFAULT_ENGINE,
                &SearchConfig::default(),
            ))?;
        }

        engines.attach(store)?;
        Ok(engines)
    }
}

/// Resolve the manifest path from, in order of priority:
/// 1. An explicit path (from --manifest)
/// 2. The ROWSIFT_MANIFEST environment variable
/// 3. `rowsift.toml` in the working directory
pub fn resolve_manifest_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        path.to_path_buf()
    } else if let Ok(val) = std::env::var(MANIFEST_ENV) {
        PathBuf::from(val)
    } else {
        PathBuf::from(DEFAULT_MANIFEST)
    }
}
