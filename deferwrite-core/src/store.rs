// deferwrite-core/src/store.rs
// Contract the transaction layer consumes from the underlying document engine

use crate::document::{DocumentRef, DocumentSnapshot};
use crate::error::Result;
use crate::mutator::{BatchHandle, TransactionHandle};
use crate::query::{Query, QuerySnapshot};

/// Unit of work handed to the engine's transaction primitive.
/// Re-invoked from scratch whenever the engine retries.
pub type TransactionBody<'b> = dyn FnMut(&mut dyn TransactionHandle) -> Result<()> + 'b;

/// Process-wide handle to a document engine.
///
/// The engine provides document-level snapshot reads, a retryable optimistic
/// transaction primitive and an atomic multi-document batch.
pub trait DocumentStore: Send + Sync {
    /// Committed state of one document
    fn get(&self, target: &DocumentRef) -> Result<DocumentSnapshot>;

    /// Committed state of several documents, in request order
    fn get_all(&self, targets: &[DocumentRef]) -> Result<Vec<DocumentSnapshot>> {
        targets.iter().map(|target| self.get(target)).collect()
    }

    /// Ids of every committed document in a collection
    fn list_ids(&self, collection: &str) -> Result<Vec<String>>;

    fn query(&self, query: &Query) -> Result<QuerySnapshot>;

    /// Run `body` inside an optimistic transaction. The engine commits the
    /// handle's writes when `body` returns `Ok`, and re-runs `body` on
    /// conflict up to `max_attempts` times in total.
    fn run_transaction(&self, max_attempts: u32, body: &mut TransactionBody<'_>) -> Result<()>;

    /// Open a fresh write batch
    fn batch(&self) -> Box<dyn BatchHandle + '_>;
}
