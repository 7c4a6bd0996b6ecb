//! Batching index writes for a unit of work.
//!
//! While an [`UpdateContext`] is active on a thread, changes to registered
//! records are only noted; each touched record is indexed once, in its
//! final state, when the outermost context finishes. Contexts nest and
//! share one pending set per thread.

use std::{cell::RefCell, collections::BTreeMap, marker::PhantomData};

use crate::{
    engine::SearchEngine,
    entry::EntryKey,
    error::{Error, Result},
    store::{Change, Transaction},
};

#[derive(Default)]
struct ContextState {
    depth: usize,
    abandoned: bool,
    dirty: BTreeMap<EntryKey, SearchEngine>,
}

thread_local! {
    static CONTEXT: RefCell<Option<ContextState>> = const { RefCell::new(None) };
}

/// Counts from flushing a context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub indexed: usize,
    pub removed: usize,
}

/// A scoped batching guard.
///
/// Call [`UpdateContext::finish`] to flush. Dropping the guard instead,
/// whether by early return, `?` or unwinding, abandons the unit of work:
/// nothing pending is indexed. The guard is bound to the thread that
/// entered it.
#[must_use = "dropping an update context without finishing it discards pending index writes"]
#[derive(Debug)]
pub struct UpdateContext {
    finished: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl UpdateContext {
    pub fn enter() -> Self {
        CONTEXT.with_borrow_mut(|state| {
            state.get_or_insert_with(ContextState::default).depth += 1;
        });
        Self {
            finished: false,
            _thread_bound: PhantomData,
        }
    }

    /// Whether a context is active on the current thread.
    pub fn is_active() -> bool {
        CONTEXT.with_borrow(|state| state.is_some())
    }

    /// Number of distinct records waiting to be flushed on this thread.
    pub fn pending() -> usize {
        CONTEXT.with_borrow(|state| state.as_ref().map_or(0, |s| s.dirty.len()))
    }

    /// Leave the context. The outermost level flushes every pending record
    /// inside `txn`; inner levels only step out.
    ///
    /// Fails with [`Error::ContextAbandoned`] when a nested context was
    /// dropped without finishing, in which case nothing is flushed.
    pub fn finish(mut self, txn: &Transaction<'_>) -> Result<FlushSummary> {
        self.finished = true;
        let outermost = CONTEXT.with_borrow_mut(|slot| {
            let state = slot.as_mut()?;
            state.depth -= 1;
            if state.depth == 0 { slot.take() } else { None }
        });

        let Some(state) = outermost else {
            return Ok(FlushSummary::default());
        };
        if state.abandoned {
            tracing::warn!(
                pending = state.dirty.len(),
                "nested update context was abandoned; discarding pending index writes"
            );
            return Err(Error::ContextAbandoned);
        }
        flush(txn, state.dirty)
    }

    /// Run `f` inside a context, finishing on `Ok` and abandoning on `Err`.
    pub fn run<'s, T>(
        txn: &mut Transaction<'s>,
        f: impl FnOnce(&mut Transaction<'s>) -> Result<T>,
    ) -> Result<T> {
        let context = Self::enter();
        let value = f(txn)?;
        context.finish(txn)?;
        Ok(value)
    }
}

impl Drop for UpdateContext {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let _ = CONTEXT.try_with(|cell| {
            let mut slot = cell.borrow_mut();
            let Some(state) = slot.as_mut() else {
                return;
            };
            state.depth -= 1;
            if state.depth == 0 {
                let discarded = slot.take().map_or(0, |s| s.dirty.len());
                tracing::debug!(discarded, "update context abandoned");
            } else {
                state.abandoned = true;
            }
        });
    }
}

/// Note a change for the active context. Returns false when no context is
/// active, in which case the caller indexes immediately.
pub(crate) fn capture(engine: &SearchEngine, change: &Change) -> bool {
    CONTEXT.with_borrow_mut(|slot| match slot {
        Some(state) => {
            let key = EntryKey::new(
                engine.slug(),
                change.entity_type(),
                change.object_id(),
            );
            state.dirty.insert(key, engine.clone());
            true
        }
        None => false,
    })
}

fn flush(
    txn: &Transaction<'_>,
    dirty: BTreeMap<EntryKey, SearchEngine>,
) -> Result<FlushSummary> {
    let mut summary = FlushSummary::default();
    for (key, engine) in dirty {
        if !engine.is_registered(&key.entity_type) {
            continue;
        }
        if engine.refresh(txn, &key.entity_type, &key.object_id)? {
            summary.indexed += 1;
        } else {
            summary.removed += 1;
        }
    }
    tracing::debug!(
        indexed = summary.indexed,
        removed = summary.removed,
        "flushed update context"
    );
    Ok(summary)
}
