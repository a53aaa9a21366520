// deferwrite-core/src/manager.rs
// Deferred-write coordination for one unit of work

use crate::config::Mode;
use crate::document::{DocumentRef, DocumentSnapshot, DocumentView, Fields};
use crate::error::Result;
use crate::mutation::{Mutation, MutationLog, Precondition, SetOptions};
use crate::mutator::MutatorAdapter;
use crate::query::{Query, QuerySnapshot};
use crate::store::DocumentStore;

/// Outcome of `apply_writes`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Adapter calls issued
    pub issued: usize,
    /// Empty updates dropped without an adapter call
    pub skipped: usize,
    pub documents: usize,
}

/// Buffers every write of one unit of work and answers `get` by folding the
/// buffered writes over storage state.
///
/// Writes reach the adapter only in `apply_writes`, which consumes the
/// manager. `query`, `list_ids` and `get_many` read committed storage only
/// and never see the pending log.
pub struct TransactionManager<'a> {
    store: &'a dyn DocumentStore,
    adapter: MutatorAdapter<'a>,
    log: MutationLog,
}

impl<'a> TransactionManager<'a> {
    pub fn new(store: &'a dyn DocumentStore, adapter: MutatorAdapter<'a>) -> Self {
        TransactionManager {
            store,
            adapter,
            log: MutationLog::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.adapter.mode()
    }

    /// Mutations queued so far
    pub fn pending(&self) -> &MutationLog {
        &self.log
    }

    // ========== Read path ==========

    /// Read-your-writes view of one document
    pub fn get(&mut self, target: &DocumentRef) -> Result<DocumentView> {
        let snapshot = match self.adapter.get(target) {
            Some(read) => read?,
            None => self.store.get(target)?,
        };
        let view = self.log.fold(snapshot);
        tracing::trace!(
            document = %target,
            exists = view.exists(),
            pending = view.pending(),
            "merged read"
        );
        Ok(view)
    }

    pub fn exists(&mut self, target: &DocumentRef) -> Result<bool> {
        Ok(self.get(target)?.exists())
    }

    /// Committed storage only; pending writes are not reflected
    pub fn query(&self, query: &Query) -> Result<QuerySnapshot> {
        self.store.query(query)
    }

    /// Committed ids of a collection; pending writes are not reflected
    pub fn list_ids(&self, collection: &str) -> Result<Vec<String>> {
        self.store.list_ids(collection)
    }

    /// Batched committed reads; pending writes are not reflected
    pub fn get_many(&self, targets: &[DocumentRef]) -> Result<Vec<DocumentSnapshot>> {
        self.store.get_all(targets)
    }

    // ========== Write path ==========

    pub fn create(&mut self, target: &DocumentRef, data: Fields) {
        self.enqueue(Mutation::Create {
            target: target.clone(),
            data,
        });
    }

    pub fn set(&mut self, target: &DocumentRef, data: Fields, options: SetOptions) {
        self.enqueue(Mutation::Set {
            target: target.clone(),
            data,
            options,
        });
    }

    pub fn update(&mut self, target: &DocumentRef, data: Fields, precondition: Option<Precondition>) {
        self.enqueue(Mutation::Update {
            target: target.clone(),
            data,
            precondition,
        });
    }

    pub fn delete(&mut self, target: &DocumentRef, precondition: Option<Precondition>) {
        self.enqueue(Mutation::Delete {
            target: target.clone(),
            precondition,
        });
    }

    fn enqueue(&mut self, mutation: Mutation) {
        tracing::trace!(document = %mutation.target(), kind = ?mutation.kind(), "mutation queued");
        self.log.push(mutation);
    }

    /// Replay the log onto the adapter, each document's mutations in
    /// insertion order, then commit the batch when bound to one.
    pub fn apply_writes(self) -> Result<ApplySummary> {
        let TransactionManager { mut adapter, log, .. } = self;
        let mut summary = ApplySummary {
            documents: log.document_count(),
            ..ApplySummary::default()
        };

        for document in log {
            for mutation in document.into_mutations() {
                if mutation.is_noop() {
                    summary.skipped += 1;
                    continue;
                }
                adapter.apply(mutation)?;
                summary.issued += 1;
            }
        }

        adapter.finish()?;

        tracing::debug!(
            mode = %adapter.mode(),
            documents = summary.documents,
            issued = summary.issued,
            skipped = summary.skipped,
            "writes applied"
        );
        Ok(summary)
    }
}
