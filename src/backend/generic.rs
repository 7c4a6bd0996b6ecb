use crate::{
    adapter::SearchDocument,
    analysis::query_tokens,
    backend::{Backend, BackendKind, EntryMatch, Matches, QueryScope},
    entry::{self, IndexEntry, SearchVector},
    error::Result,
    store::{Snapshot, Transaction},
};

/// Portable substring matching over the lowercased entry text.
///
/// Every whitespace-separated query token must occur somewhere in the
/// text. All matches rank equally, so results come back in entry order.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericBackend;

impl Backend for GenericBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Generic
    }

    fn supports_ranking(&self) -> bool {
        false
    }

    fn write(
        &self,
        txn: &Transaction<'_>,
        entry: &mut IndexEntry,
        document: &SearchDocument,
    ) -> Result<()> {
        entry.search = SearchVector::Generic {
            text: document.text().to_lowercase(),
        };
        entry::put(txn.raw(), entry)
    }

    fn query(
        &self,
        snapshot: &Snapshot<'_>,
        scope: QueryScope<'_>,
        query: &str,
    ) -> Result<Matches> {
        let tokens = query_tokens(query);
        if tokens.is_empty() {
            return Ok(Matches::empty());
        }

        let matches = entry::scan_scope(snapshot.raw(), &scope)?
            .into_iter()
            .filter(|e| match &e.search {
                SearchVector::Generic { text } => {
                    tokens.iter().all(|t| text.contains(t.as_str()))
                }
                _ => false,
            })
            .map(|entry| EntryMatch { entry, rank: 1.0 })
            .collect();
        Ok(Matches::ranked(matches))
    }
}
