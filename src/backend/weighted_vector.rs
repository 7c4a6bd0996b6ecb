use std::{collections::BTreeMap, ops::Bound};

use crate::{
    adapter::{SearchDocument, Weight},
    analysis::{Analyzer, TextSearchConfig},
    backend::{Backend, BackendKind, EntryMatch, Matches, QueryScope},
    entry::{self, IndexEntry, SearchVector},
    error::Result,
    store::{Snapshot, Transaction},
};

/// Weighted lexeme vectors with prefix matching.
///
/// Each indexed field is analyzed separately and every lexeme occurrence
/// remembers the weight of the field it came from. A query matches when
/// each of its lexemes is a prefix of some stored lexeme; the rank sums
/// the weight factors of all matching occurrences.
#[derive(Debug, Clone)]
pub struct WeightedVectorBackend {
    analyzer: Analyzer,
}

impl WeightedVectorBackend {
    pub fn new(config: TextSearchConfig) -> Self {
        Self {
            analyzer: Analyzer::new(config),
        }
    }

    fn vectorize(&self, document: &SearchDocument) -> BTreeMap<String, Vec<Weight>> {
        let mut lexemes: BTreeMap<String, Vec<Weight>> = BTreeMap::new();
        for section in &document.sections {
            for lexeme in self.analyzer.lexemes(&section.text) {
                lexemes.entry(lexeme).or_default().push(section.weight);
            }
        }
        lexemes
    }
}

/// Summed weight of every stored lexeme starting with `prefix`, or `None`
/// when none does.
fn prefix_weight(
    lexemes: &BTreeMap<String, Vec<Weight>>,
    prefix: &str,
) -> Option<f32> {
    let mut matched = false;
    let mut total = 0.0;
    let range = lexemes.range::<str, _>((Bound::Included(prefix), Bound::Unbounded));
    for (lexeme, weights) in range {
        if !lexeme.starts_with(prefix) {
            break;
        }
        matched = true;
        total += weights.iter().map(|w| w.factor()).sum::<f32>();
    }
    matched.then_some(total)
}

impl Backend for WeightedVectorBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::WeightedVector
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
        entry.search = SearchVector::WeightedVector {
            lexemes: self.vectorize(document),
        };
        entry::put(txn.raw(), entry)
    }

    fn query(
        &self,
        snapshot: &Snapshot<'_>,
        scope: QueryScope<'_>,
        query: &str,
    ) -> Result<Matches> {
        let mut terms = self.analyzer.lexemes(query);
        terms.sort();
        terms.dedup();
        // A query made only of stop words analyzes to nothing.
        if terms.is_empty() {
            return Ok(Matches::empty());
        }

        let mut matches = Vec::new();
        for entry in entry::scan_scope(snapshot.raw(), &scope)? {
            let SearchVector::WeightedVector { lexemes } = &entry.search else {
                continue;
            };
            let rank = terms
                .iter()
                .map(|t| prefix_weight(lexemes, t))
                .sum::<Option<f32>>();
            if let Some(rank) = rank {
                matches.push(EntryMatch { entry, rank });
            }
        }
        Ok(Matches::ranked(matches))
    }
}
