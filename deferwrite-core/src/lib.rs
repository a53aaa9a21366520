// deferwrite-core/src/lib.rs
// Deferred-write transaction layer over a document store

pub mod error;
pub mod config;
pub mod document;
pub mod mutation;
pub mod mutator;
pub mod query;
pub mod store;
pub mod memory;
pub mod manager;
pub mod repository;
pub mod orchestrator;


// Public exports
pub use error::{TxError, Result};
pub use config::{Mode, RunConfig, DEFAULT_MAX_ATTEMPTS};
pub use document::{DocumentRef, DocumentSnapshot, DocumentView, Fields};
pub use mutation::{Mutation, MutationKind, MutationLog, Precondition, SetOptions};
pub use mutator::{BatchHandle, Mutator, MutatorAdapter, TransactionHandle};
pub use query::{Direction, FilterOp, Query, QuerySnapshot};
pub use store::{DocumentStore, TransactionBody};
pub use memory::{MemoryStore, StoreStats};
pub use manager::{ApplySummary, TransactionManager};
pub use repository::{Base64UrlIds, Entity, IdCodec, PlainIds, Repository, WithId};
pub use orchestrator::Orchestrator;
