// deferwrite-core/src/mutation.rs
// Pending writes and the per-document mutation log

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::document::{deep_merge, DocumentRef, DocumentSnapshot, DocumentView, Fields};

/// The four write kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    Create,
    Set,
    Update,
    Delete,
}

/// How a `set` combines with an existing document at commit time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOptions {
    /// Deep-merge into the stored document instead of replacing it
    pub merge: bool,
    /// Only these top-level fields are written; takes precedence over `merge`
    pub merge_fields: Option<Vec<String>>,
}

impl SetOptions {
    pub fn replace() -> Self {
        Self::default()
    }

    pub fn merge() -> Self {
        SetOptions {
            merge: true,
            merge_fields: None,
        }
    }

    pub fn merge_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SetOptions {
            merge: false,
            merge_fields: Some(fields.into_iter().map(Into::into).collect()),
        }
    }
}

/// Condition the engine checks at commit time for `update`/`delete`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precondition {
    Exists(bool),
    LastUpdateTime(DateTime<Utc>),
}

/// A single pending write. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    Create {
        target: DocumentRef,
        data: Fields,
    },
    Set {
        target: DocumentRef,
        data: Fields,
        options: SetOptions,
    },
    Update {
        target: DocumentRef,
        data: Fields,
        precondition: Option<Precondition>,
    },
    Delete {
        target: DocumentRef,
        precondition: Option<Precondition>,
    },
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Create { .. } => MutationKind::Create,
            Mutation::Set { .. } => MutationKind::Set,
            Mutation::Update { .. } => MutationKind::Update,
            Mutation::Delete { .. } => MutationKind::Delete,
        }
    }

    pub fn target(&self) -> &DocumentRef {
        match self {
            Mutation::Create { target, .. }
            | Mutation::Set { target, .. }
            | Mutation::Update { target, .. }
            | Mutation::Delete { target, .. } => target,
        }
    }

    /// Payload for the three writing kinds; `None` for deletes
    pub fn payload(&self) -> Option<&Fields> {
        match self {
            Mutation::Create { data, .. }
            | Mutation::Set { data, .. }
            | Mutation::Update { data, .. } => Some(data),
            Mutation::Delete { .. } => None,
        }
    }

    /// Updates with nothing to write are never sent to the adapter
    pub fn is_noop(&self) -> bool {
        matches!(self, Mutation::Update { data, .. } if data.is_empty())
    }
}

/// All mutations queued against one document, in insertion order
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentLog {
    reference: DocumentRef,
    mutations: Vec<Mutation>,
}

impl DocumentLog {
    pub fn reference(&self) -> &DocumentRef {
        &self.reference
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }

    /// Fold this log onto a storage snapshot of the same document.
    ///
    /// Create/Set/Update deep-merge their payload into the accumulator; Delete
    /// resets it to empty. A write after a delete brings the document back.
    /// Empty updates are never issued, so they leave the view untouched.
    pub fn fold(&self, snapshot: DocumentSnapshot) -> DocumentView {
        let mut exists = snapshot.exists();
        let mut data = snapshot.data.unwrap_or_default();

        for mutation in self.mutations.iter().filter(|m| !m.is_noop()) {
            match mutation.payload() {
                Some(payload) => {
                    deep_merge(&mut data, payload);
                    exists = true;
                }
                None => {
                    data.clear();
                    exists = false;
                }
            }
        }

        DocumentView {
            reference: snapshot.reference,
            exists,
            data,
            update_time: snapshot.update_time,
            pending: self.mutations.len(),
        }
    }
}

/// Append-only mutation log keyed by document.
///
/// Documents are kept in first-touch order; within a document, mutations
/// keep their insertion order. Nothing is ever reordered or rewritten.
#[derive(Debug, Clone, Default)]
pub struct MutationLog {
    documents: Vec<DocumentLog>,
    index: AHashMap<DocumentRef, usize>,
    len: usize,
}

impl MutationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        let position = match self.index.get(mutation.target()) {
            Some(&position) => position,
            None => {
                let position = self.documents.len();
                self.index.insert(mutation.target().clone(), position);
                self.documents.push(DocumentLog {
                    reference: mutation.target().clone(),
                    mutations: Vec::new(),
                });
                position
            }
        };
        self.documents[position].mutations.push(mutation);
        self.len += 1;
    }

    pub fn for_document(&self, reference: &DocumentRef) -> Option<&DocumentLog> {
        self.index.get(reference).map(|&position| &self.documents[position])
    }

    /// Merged view of `snapshot` with whatever is queued for its document
    pub fn fold(&self, snapshot: DocumentSnapshot) -> DocumentView {
        match self.for_document(&snapshot.reference) {
            Some(log) => log.fold(snapshot),
            None => DocumentView {
                exists: snapshot.exists(),
                reference: snapshot.reference,
                data: snapshot.data.unwrap_or_default(),
                update_time: snapshot.update_time,
                pending: 0,
            },
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentLog> {
        self.documents.iter()
    }

    /// Total number of mutations across all documents
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }
}

impl IntoIterator for MutationLog {
    type Item = DocumentLog;
    type IntoIter = std::vec::IntoIter<DocumentLog>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}
