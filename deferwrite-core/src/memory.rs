// deferwrite-core/src/memory.rs
// In-memory document engine: snapshot reads, optimistic transactions, atomic batches

use std::collections::{BTreeMap, HashMap};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::document::{deep_merge, DocumentRef, DocumentSnapshot, Fields};
use crate::error::{Result, TxError};
use crate::mutation::{Mutation, Precondition, SetOptions};
use crate::mutator::{BatchHandle, Mutator, TransactionHandle};
use crate::query::{Query, QuerySnapshot};
use crate::store::{DocumentStore, TransactionBody};

/// Version recorded for a document that does not exist
const ABSENT_VERSION: u64 = 0;

#[derive(Debug, Clone)]
struct StoredDocument {
    data: Fields,
    version: u64,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Collections {
    docs: HashMap<String, BTreeMap<String, StoredDocument>>,
    last_version: u64,
}

impl Collections {
    fn lookup(&self, target: &DocumentRef) -> Option<&StoredDocument> {
        self.docs.get(&target.collection)?.get(&target.id)
    }

    fn version_of(&self, target: &DocumentRef) -> u64 {
        self.lookup(target).map_or(ABSENT_VERSION, |doc| doc.version)
    }

    fn snapshot(&self, target: &DocumentRef) -> DocumentSnapshot {
        match self.lookup(target) {
            Some(doc) => DocumentSnapshot {
                reference: target.clone(),
                data: Some(doc.data.clone()),
                create_time: Some(doc.create_time),
                update_time: Some(doc.update_time),
            },
            None => DocumentSnapshot::missing(target.clone()),
        }
    }

    fn install(&mut self, target: DocumentRef, doc: Option<StoredDocument>) {
        match doc {
            Some(doc) => {
                self.docs
                    .entry(target.collection)
                    .or_default()
                    .insert(target.id, doc);
            }
            None => {
                if let Some(collection) = self.docs.get_mut(&target.collection) {
                    collection.remove(&target.id);
                }
            }
        }
    }
}

/// Commit counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub transaction_commits: u64,
    pub batch_commits: u64,
    pub conflicts: u64,
    pub writes_applied: u64,
}

/// Thread-safe in-memory engine implementing `DocumentStore`.
///
/// Writes follow document-database rules: `create` fails on an existing
/// document, `update` fails on a missing one, `delete` of a missing document
/// succeeds. Preconditions are checked at commit. Transactions must issue all
/// reads before any write and fail with a conflict when a document they read
/// was changed by another commit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
    stats: Mutex<StoreStats>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a document directly, outside any transaction or batch.
    /// Not counted in `stats()`.
    pub fn seed(&self, target: &DocumentRef, data: Fields) -> Result<()> {
        let write = Mutation::Set {
            target: target.clone(),
            data,
            options: SetOptions::replace(),
        };
        self.commit(None, std::slice::from_ref(&write))
    }

    pub fn stats(&self) -> StoreStats {
        *self.stats.lock()
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .docs
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Validate and apply `writes` as one atomic step. When `reads` is given,
    /// every recorded version must still be current.
    fn commit(&self, reads: Option<&AHashMap<DocumentRef, u64>>, writes: &[Mutation]) -> Result<()> {
        let mut collections = self.collections.write();

        if let Some(reads) = reads {
            for (target, version) in reads {
                if collections.version_of(target) != *version {
                    tracing::debug!(document = %target, "read set changed since transaction start");
                    return Err(TxError::Conflict { attempts: 0 });
                }
            }
        }

        let now = Utc::now();
        let mut version = collections.last_version;
        let mut staged: AHashMap<DocumentRef, Option<StoredDocument>> = AHashMap::new();

        for write in writes {
            let target = write.target();
            let current = match staged.get(target) {
                Some(doc) => doc.clone(),
                None => collections.lookup(target).cloned(),
            };
            version += 1;
            let next = apply_write(current, write, now, version)?;
            staged.insert(target.clone(), next);
        }

        collections.last_version = version;
        for (target, doc) in staged {
            collections.install(target, doc);
        }

        Ok(())
    }
}

fn check_precondition(
    current: Option<&StoredDocument>,
    precondition: Option<Precondition>,
    target: &DocumentRef,
) -> Result<()> {
    let failed = |reason: String| TxError::PreconditionFailed {
        document: target.to_string(),
        reason,
    };

    match precondition {
        None => Ok(()),
        Some(Precondition::Exists(expected)) => {
            if current.is_some() == expected {
                Ok(())
            } else if expected {
                Err(failed("document does not exist".into()))
            } else {
                Err(failed("document already exists".into()))
            }
        }
        Some(Precondition::LastUpdateTime(expected)) => match current {
            Some(doc) if doc.update_time == expected => Ok(()),
            Some(doc) => Err(failed(format!(
                "last update time is {}, expected {}",
                doc.update_time, expected
            ))),
            None => Err(failed("document does not exist".into())),
        },
    }
}

fn apply_write(
    current: Option<StoredDocument>,
    write: &Mutation,
    now: DateTime<Utc>,
    version: u64,
) -> Result<Option<StoredDocument>> {
    let target = write.target();
    let not_found = || TxError::DocumentNotFound {
        collection: target.collection.clone(),
        id: target.id.clone(),
    };

    let (data, create_time) = match write {
        Mutation::Create { data, .. } => {
            if current.is_some() {
                return Err(TxError::AlreadyExists {
                    collection: target.collection.clone(),
                    id: target.id.clone(),
                });
            }
            (data.clone(), now)
        }
        Mutation::Set { data, options, .. } => {
            let create_time = current.as_ref().map_or(now, |doc| doc.create_time);
            let mut body = current.map(|doc| doc.data).unwrap_or_default();
            match &options.merge_fields {
                Some(fields) => {
                    for field in fields {
                        match data.get(field) {
                            Some(value) => {
                                body.insert(field.clone(), value.clone());
                            }
                            None => {
                                body.remove(field);
                            }
                        }
                    }
                }
                None if options.merge => deep_merge(&mut body, data),
                None => body = data.clone(),
            }
            (body, create_time)
        }
        Mutation::Update { data, precondition, .. } => {
            check_precondition(current.as_ref(), *precondition, target)?;
            let doc = current.ok_or_else(not_found)?;
            let mut body = doc.data;
            for (field, value) in data {
                body.insert(field.clone(), value.clone());
            }
            (body, doc.create_time)
        }
        Mutation::Delete { precondition, .. } => {
            check_precondition(current.as_ref(), *precondition, target)?;
            return Ok(None);
        }
    };

    Ok(Some(StoredDocument {
        data,
        version,
        create_time,
        update_time: now,
    }))
}

impl DocumentStore for MemoryStore {
    fn get(&self, target: &DocumentRef) -> Result<DocumentSnapshot> {
        Ok(self.collections.read().snapshot(target))
    }

    fn list_ids(&self, collection: &str) -> Result<Vec<String>> {
        Ok(self
            .collections
            .read()
            .docs
            .get(collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn query(&self, query: &Query) -> Result<QuerySnapshot> {
        let docs = {
            let collections = self.collections.read();
            match collections.docs.get(&query.collection) {
                Some(docs) => docs
                    .keys()
                    .map(|id| collections.snapshot(&DocumentRef::new(query.collection.clone(), id.clone())))
                    .collect(),
                None => Vec::new(),
            }
        };
        Ok(QuerySnapshot { docs: query.apply(docs) })
    }

    fn run_transaction(&self, max_attempts: u32, body: &mut TransactionBody<'_>) -> Result<()> {
        if max_attempts == 0 {
            return Err(TxError::InvalidConfig("max_attempts must be at least 1".into()));
        }

        for attempt in 1..=max_attempts {
            let mut txn = MemoryTransaction {
                store: self,
                reads: AHashMap::new(),
                writes: Vec::new(),
            };
            body(&mut txn)?;

            match self.commit(Some(&txn.reads), &txn.writes) {
                Ok(()) => {
                    let mut stats = self.stats.lock();
                    stats.transaction_commits += 1;
                    stats.writes_applied += txn.writes.len() as u64;
                    return Ok(());
                }
                Err(err) if err.is_retryable() => {
                    self.stats.lock().conflicts += 1;
                    tracing::warn!(attempt, max_attempts, "transaction conflict");
                }
                Err(err) => return Err(err),
            }
        }

        Err(TxError::Conflict { attempts: max_attempts })
    }

    fn batch(&self) -> Box<dyn BatchHandle + '_> {
        Box::new(MemoryBatch {
            store: self,
            writes: Vec::new(),
            committed: false,
        })
    }
}

/// Transaction handle: records read versions and buffers writes until the
/// engine commits on the caller's behalf.
struct MemoryTransaction<'s> {
    store: &'s MemoryStore,
    reads: AHashMap<DocumentRef, u64>,
    writes: Vec<Mutation>,
}

impl Mutator for MemoryTransaction<'_> {
    fn create(&mut self, target: &DocumentRef, data: Fields) -> Result<()> {
        self.writes.push(Mutation::Create { target: target.clone(), data });
        Ok(())
    }

    fn set(&mut self, target: &DocumentRef, data: Fields, options: SetOptions) -> Result<()> {
        self.writes.push(Mutation::Set { target: target.clone(), data, options });
        Ok(())
    }

    fn update(
        &mut self,
        target: &DocumentRef,
        data: Fields,
        precondition: Option<Precondition>,
    ) -> Result<()> {
        self.writes.push(Mutation::Update { target: target.clone(), data, precondition });
        Ok(())
    }

    fn delete(&mut self, target: &DocumentRef, precondition: Option<Precondition>) -> Result<()> {
        self.writes.push(Mutation::Delete { target: target.clone(), precondition });
        Ok(())
    }
}

impl TransactionHandle for MemoryTransaction<'_> {
    fn get(&mut self, target: &DocumentRef) -> Result<DocumentSnapshot> {
        if !self.writes.is_empty() {
            return Err(TxError::ReadAfterWrite(target.to_string()));
        }
        let collections = self.store.collections.read();
        self.reads
            .entry(target.clone())
            .or_insert_with(|| collections.version_of(target));
        Ok(collections.snapshot(target))
    }
}

struct MemoryBatch<'s> {
    store: &'s MemoryStore,
    writes: Vec<Mutation>,
    committed: bool,
}

impl Mutator for MemoryBatch<'_> {
    fn create(&mut self, target: &DocumentRef, data: Fields) -> Result<()> {
        self.writes.push(Mutation::Create { target: target.clone(), data });
        Ok(())
    }

    fn set(&mut self, target: &DocumentRef, data: Fields, options: SetOptions) -> Result<()> {
        self.writes.push(Mutation::Set { target: target.clone(), data, options });
        Ok(())
    }

    fn update(
        &mut self,
        target: &DocumentRef,
        data: Fields,
        precondition: Option<Precondition>,
    ) -> Result<()> {
        self.writes.push(Mutation::Update { target: target.clone(), data, precondition });
        Ok(())
    }

    fn delete(&mut self, target: &DocumentRef, precondition: Option<Precondition>) -> Result<()> {
        self.writes.push(Mutation::Delete { target: target.clone(), precondition });
        Ok(())
    }
}

impl BatchHandle for MemoryBatch<'_> {
    fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Err(TxError::BatchCommitted);
        }
        self.committed = true;
        self.store.commit(None, &self.writes)?;

        let mut stats = self.store.stats.lock();
        stats.batch_commits += 1;
        stats.writes_applied += self.writes.len() as u64;
        Ok(())
    }
}
