// deferwrite-core/src/mutator.rs
// Uniform write interface over transaction and batch handles

use crate::config::Mode;
use crate::document::{DocumentRef, DocumentSnapshot, Fields};
use crate::error::Result;
use crate::mutation::{Mutation, Precondition, SetOptions};

/// Physical write operations. Implementations never buffer on behalf of the
/// caller: each call is issued exactly once, in final form.
pub trait Mutator {
    fn create(&mut self, target: &DocumentRef, data: Fields) -> Result<()>;

    fn set(&mut self, target: &DocumentRef, data: Fields, options: SetOptions) -> Result<()>;

    fn update(
        &mut self,
        target: &DocumentRef,
        data: Fields,
        precondition: Option<Precondition>,
    ) -> Result<()>;

    fn delete(&mut self, target: &DocumentRef, precondition: Option<Precondition>) -> Result<()>;
}

/// Handle into the engine's optimistic transaction; reads are snapshot reads
/// and participate in conflict detection.
pub trait TransactionHandle: Mutator {
    fn get(&mut self, target: &DocumentRef) -> Result<DocumentSnapshot>;
}

/// Handle onto an atomic multi-document write batch
pub trait BatchHandle: Mutator {
    /// Commit every write issued so far as one atomic unit. A batch commits once.
    fn commit(&mut self) -> Result<()>;
}

/// The one handle a `TransactionManager` is bound to
pub enum MutatorAdapter<'h> {
    Transaction(&'h mut dyn TransactionHandle),
    Batch(&'h mut dyn BatchHandle),
}

impl<'h> MutatorAdapter<'h> {
    pub fn mode(&self) -> Mode {
        match self {
            MutatorAdapter::Transaction(_) => Mode::Transaction,
            MutatorAdapter::Batch(_) => Mode::Batch,
        }
    }

    /// Snapshot read through the handle; `None` when the handle has no read path
    pub fn get(&mut self, target: &DocumentRef) -> Option<Result<DocumentSnapshot>> {
        match self {
            MutatorAdapter::Transaction(handle) => Some(handle.get(target)),
            MutatorAdapter::Batch(_) => None,
        }
    }

    /// Issue one mutation with the kind-appropriate call
    pub fn apply(&mut self, mutation: Mutation) -> Result<()> {
        match mutation {
            Mutation::Create { target, data } => self.create(&target, data),
            Mutation::Set { target, data, options } => self.set(&target, data, options),
            Mutation::Update { target, data, precondition } => {
                self.update(&target, data, precondition)
            }
            Mutation::Delete { target, precondition } => self.delete(&target, precondition),
        }
    }

    /// Commit point for batch-bound adapters. Transactions commit when the
    /// engine's callback returns, so this is a no-op for them.
    pub fn finish(&mut self) -> Result<()> {
        match self {
            MutatorAdapter::Transaction(_) => Ok(()),
            MutatorAdapter::Batch(batch) => batch.commit(),
        }
    }
}

impl<'h> Mutator for MutatorAdapter<'h> {
    fn create(&mut self, target: &DocumentRef, data: Fields) -> Result<()> {
        match self {
            MutatorAdapter::Transaction(handle) => handle.create(target, data),
            MutatorAdapter::Batch(batch) => batch.create(target, data),
        }
    }

    fn set(&mut self, target: &DocumentRef, data: Fields, options: SetOptions) -> Result<()> {
        match self {
            MutatorAdapter::Transaction(handle) => handle.set(target, data, options),
            MutatorAdapter::Batch(batch) => batch.set(target, data, options),
        }
    }

    fn update(
        &mut self,
        target: &DocumentRef,
        data: Fields,
        precondition: Option<Precondition>,
    ) -> Result<()> {
        match self {
            MutatorAdapter::Transaction(handle) => handle.update(target, data, precondition),
            MutatorAdapter::Batch(batch) => batch.update(target, data, precondition),
        }
    }

    fn delete(&mut self, target: &DocumentRef, precondition: Option<Precondition>) -> Result<()> {
        match self {
            MutatorAdapter::Transaction(handle) => handle.delete(target, precondition),
            MutatorAdapter::Batch(batch) => batch.delete(target, precondition),
        }
    }
}
