use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    adapter::SearchDocument,
    analysis::{Analyzer, TextSearchConfig, query_tokens},
    backend::{Backend, BackendKind, EntryMatch, Matches, QueryScope},
    entry::{self, EntryId, IndexEntry, POSTINGS, SearchVector},
    error::Result,
    store::{Snapshot, Transaction},
};

pub const DEFAULT_MIN_TOKEN_LEN: usize = 4;

/// An inverted index with natural-language and boolean query modes.
///
/// Natural mode ignores terms shorter than the minimum token length,
/// requires every remaining term, and ranks by TF-IDF. When it finds
/// nothing, the query is retried in boolean mode: every raw token must
/// occur in the lowercased text, ranked by occurrence count.
#[derive(Debug, Clone)]
pub struct FulltextBackend {
    analyzer: Analyzer,
    min_token_len: usize,
}

impl FulltextBackend {
    pub fn new(min_token_len: usize) -> Self {
        Self {
            analyzer: Analyzer::new(TextSearchConfig::Simple),
            min_token_len,
        }
    }

    fn terms(&self, text: &str) -> Vec<String> {
        self.analyzer
            .lexemes(text)
            .into_iter()
            .filter(|t| t.chars().count() >= self.min_token_len)
            .collect()
    }

    fn natural(
        &self,
        snapshot: &Snapshot<'_>,
        scope: QueryScope<'_>,
        query: &str,
    ) -> Result<Vec<EntryMatch>> {
        let mut terms = self.terms(query);
        terms.sort();
        terms.dedup();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let postings = snapshot.raw().open_multimap_table(POSTINGS)?;
        let mut document_frequency = HashMap::new();
        let mut candidates: Option<BTreeSet<EntryId>> = None;
        for term in &terms {
            let mut ids = BTreeSet::new();
            for id in postings.get((scope.engine_slug, term.as_str()))? {
                ids.insert(id?.value());
            }
            document_frequency.insert(term.as_str(), ids.len());
            candidates = Some(match candidates {
                Some(current) => current.intersection(&ids).copied().collect(),
                None => ids,
            });
        }
        let candidates = candidates.unwrap_or_default();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let total = entry::count_read(snapshot.raw(), scope.engine_slug)?;
        let mut matches = Vec::new();
        for entry in entry::load_many(snapshot.raw(), candidates)? {
            if !scope.includes(&entry) {
                continue;
            }
            let SearchVector::Fulltext { terms: tf, .. } = &entry.search else {
                continue;
            };
            // Postings are only a candidate set; the row itself decides.
            if !terms.iter().all(|t| tf.contains_key(t)) {
                continue;
            }
            let rank = terms
                .iter()
                .map(|t| {
                    let count = tf.get(t).copied().unwrap_or(0) as f32;
                    let df = document_frequency.get(t.as_str()).copied().unwrap_or(1);
                    count * idf(total, df)
                })
                .sum();
            matches.push(EntryMatch { entry, rank });
        }
        Ok(matches)
    }

    fn boolean(
        &self,
        snapshot: &Snapshot<'_>,
        scope: QueryScope<'_>,
        query: &str,
    ) -> Result<Vec<EntryMatch>> {
        let tokens = query_tokens(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut matches = Vec::new();
        for entry in entry::scan_scope(snapshot.raw(), &scope)? {
            let SearchVector::Fulltext { text, .. } = &entry.search else {
                continue;
            };
            let counts: Vec<usize> = tokens
                .iter()
                .map(|t| text.matches(t.as_str()).count())
                .collect();
            if counts.iter().all(|&c| c > 0) {
                let rank = counts.iter().sum::<usize>() as f32;
                matches.push(EntryMatch { entry, rank });
            }
        }
        Ok(matches)
    }
}

impl Default for FulltextBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_TOKEN_LEN)
    }
}

fn idf(total: usize, df: usize) -> f32 {
    let df = df.max(1) as f32;
    let total = total.max(1) as f32;
    (total / df).ln() + 1.0
}

impl Backend for FulltextBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fulltext
    }

    fn supports_ranking(&self) -> bool {
        true
    }

    fn write(
        &self,
        txn: &Transaction<'_>,
        entry: &mut IndexEntry,
        document: &SearchDocument,
    ) -> Result<()> {
        let text = document.text();
        let mut terms: BTreeMap<String, u32> = BTreeMap::new();
        for term in self.terms(&text) {
            *terms.entry(term).or_insert(0) += 1;
        }
        entry.search = SearchVector::Fulltext {
            terms,
            text: text.to_lowercase(),
        };

        entry::put(txn.raw(), entry)
    }

    fn query(
        &self,
        snapshot: &Snapshot<'_>,
        scope: QueryScope<'_>,
        query: &str,
    ) -> Result<Matches> {
        let mut matches = self.natural(snapshot, scope, query)?;
        if matches.is_empty() {
            tracing::debug!(query, "natural query found nothing, retrying in boolean mode");
            matches = self.boolean(snapshot, scope, query)?;
        }
        Ok(Matches::ranked(matches))
    }
}
