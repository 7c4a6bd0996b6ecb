//! Search backends: how entries are represented, matched and ranked.
//!
//! A [`Backend`] owns the searchable representation of an entry. The
//! indexer hands it a freshly derived [`SearchDocument`] to store, and the
//! query builder hands it raw query text to match. Three backends ship:
//!
//! - [`GenericBackend`] substring-matches every token against the
//!   lowercased text. It cannot rank.
//! - [`WeightedVectorBackend`] stores analyzed lexemes with per-field
//!   weights and ranks by summed weight.
//! - [`FulltextBackend`] keeps an inverted index and ranks by TF-IDF,
//!   falling back to a substring match when the natural query finds
//!   nothing.

mod fulltext;
mod generic;
mod weighted_vector;

use std::{collections::BTreeSet, fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

pub use self::{
    fulltext::{DEFAULT_MIN_TOKEN_LEN, FulltextBackend},
    generic::GenericBackend,
    weighted_vector::WeightedVectorBackend,
};
use crate::{
    adapter::SearchDocument,
    config::SearchConfig,
    entry::{self, IndexEntry},
    error::Result,
    store::{Snapshot, Transaction},
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Generic,
    WeightedVector,
    Fulltext,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] =
        [Self::Generic, Self::WeightedVector, Self::Fulltext];

    pub fn name(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::WeightedVector => "weighted_vector",
            Self::Fulltext => "fulltext",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown search backend: {s}"))
    }
}

/// What a backend query is restricted to.
#[derive(Debug, Clone, Copy)]
pub struct QueryScope<'a> {
    pub engine_slug: &'a str,
    pub entity_types: &'a BTreeSet<String>,
    /// Entity types whose entries are only admissible while live.
    pub live_only: &'a BTreeSet<String>,
}

impl QueryScope<'_> {
    pub fn includes(&self, entry: &IndexEntry) -> bool {
        entry.engine_slug == self.engine_slug
            && self.entity_types.contains(&entry.entity_type)
            && (entry.is_live || !self.live_only.contains(&entry.entity_type))
    }
}

/// One entry a backend matched, with its rank.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMatch {
    pub entry: IndexEntry,
    pub rank: f32,
}

/// Matched entries, highest rank first and ties by ascending entry id.
#[derive(Debug)]
pub struct Matches {
    inner: std::vec::IntoIter<EntryMatch>,
}

impl Matches {
    pub fn empty() -> Self {
        Self {
            inner: Vec::new().into_iter(),
        }
    }

    pub fn ranked(mut matches: Vec<EntryMatch>) -> Self {
        matches.sort_by(|a, b| {
            b.rank
                .total_cmp(&a.rank)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        Self {
            inner: matches.into_iter(),
        }
    }
}

impl Iterator for Matches {
    type Item = EntryMatch;

    fn next(&mut self) -> Option<EntryMatch> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

pub trait Backend: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Whether match ranks carry relevance information.
    fn supports_ranking(&self) -> bool;

    /// Create whatever storage the backend needs. Called on attach.
    fn setup(&self, txn: &Transaction<'_>) -> Result<()> {
        entry::ensure_tables(txn.raw())
    }

    /// Fill in `entry.search` from the document and persist the entry.
    fn write(
        &self,
        txn: &Transaction<'_>,
        entry: &mut IndexEntry,
        document: &SearchDocument,
    ) -> Result<()>;

    /// Remove an entry along with any backend-owned data for it.
    fn remove(&self, txn: &Transaction<'_>, entry: &IndexEntry) -> Result<()> {
        entry::delete(txn.raw(), entry)?;
        Ok(())
    }

    /// Match entries against raw query text.
    fn query(
        &self,
        snapshot: &Snapshot<'_>,
        scope: QueryScope<'_>,
        query: &str,
    ) -> Result<Matches>;
}

/// Build the backend a search configuration selects.
pub fn from_config(config: &SearchConfig) -> Arc<dyn Backend> {
    match config.backend {
        BackendKind::Generic => Arc::new(GenericBackend),
        BackendKind::WeightedVector => {
            Arc::new(WeightedVectorBackend::new(config.text_search_config))
        }
        BackendKind::Fulltext => {
            Arc::new(FulltextBackend::new(config.min_token_len))
        }
    }
}
