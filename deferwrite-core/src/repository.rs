// deferwrite-core/src/repository.rs
// Typed CRUD over one collection, built on TransactionManager

use std::marker::PhantomData;
use std::ops::Deref;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Serialize, Deserialize};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::document::{generate_id, strip_undefined, DocumentRef, Fields};
use crate::error::{Result, TxError};
use crate::manager::TransactionManager;
use crate::mutation::SetOptions;
use crate::query::Query;

/// A collection's document schema
pub trait Entity: Serialize + DeserializeOwned {
    const COLLECTION: &'static str;

    /// Checked before every create/set
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Reversible mapping between caller-facing ids and stored ids.
/// `decode(encode(id)) == id` must hold for every id.
pub trait IdCodec: Send + Sync {
    fn encode(&self, id: &str) -> String;
    fn decode(&self, stored: &str) -> Result<String>;
}

/// Ids are stored as given
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainIds;

impl IdCodec for PlainIds {
    fn encode(&self, id: &str) -> String {
        id.to_string()
    }

    fn decode(&self, stored: &str) -> Result<String> {
        Ok(stored.to_string())
    }
}

/// URL-safe base64 without padding; for ids containing `/` or other
/// characters a document path cannot carry
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64UrlIds;

impl IdCodec for Base64UrlIds {
    fn encode(&self, id: &str) -> String {
        URL_SAFE_NO_PAD.encode(id.as_bytes())
    }

    fn decode(&self, stored: &str) -> Result<String> {
        let bytes = URL_SAFE_NO_PAD
            .decode(stored)
            .map_err(|e| TxError::InvalidId(format!("{}: {}", stored, e)))?;
        String::from_utf8(bytes).map_err(|e| TxError::InvalidId(format!("{}: {}", stored, e)))
    }
}

/// Entity together with its caller-facing id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithId<T> {
    pub id: String,
    #[serde(flatten)]
    pub entity: T,
}

impl<T> Deref for WithId<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entity
    }
}

/// Stateless typed view of one collection. All I/O goes through the
/// `TransactionManager` passed to each call.
pub struct Repository<T, C = PlainIds> {
    codec: C,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T, PlainIds> {
    pub fn new() -> Self {
        Self::with_codec(PlainIds)
    }
}

impl<T: Entity> Default for Repository<T, PlainIds> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity, C: IdCodec> Repository<T, C> {
    pub fn with_codec(codec: C) -> Self {
        Repository {
            codec,
            _entity: PhantomData,
        }
    }

    pub fn collection(&self) -> &'static str {
        T::COLLECTION
    }

    /// Storage reference for a caller-facing id
    pub fn doc_ref(&self, id: &str) -> DocumentRef {
        DocumentRef::new(T::COLLECTION, self.codec.encode(id))
    }

    fn to_fields<P: Serialize>(&self, payload: &P) -> Result<Fields> {
        let mut value = serde_json::to_value(payload)?;
        strip_undefined(&mut value);
        match value {
            Value::Object(map) => Ok(map),
            other => Err(TxError::Serialization(format!(
                "'{}' payload must serialize to an object, got {}",
                T::COLLECTION,
                other
            ))),
        }
    }

    fn validated_fields(&self, entity: &T) -> Result<Fields> {
        entity.validate().map_err(|reason| TxError::Validation {
            collection: T::COLLECTION.to_string(),
            reason,
        })?;
        self.to_fields(entity)
    }

    fn from_fields(&self, id: String, data: Fields) -> Result<WithId<T>> {
        let entity = serde_json::from_value(Value::Object(data))?;
        Ok(WithId { id, entity })
    }

    /// Queue a create and return the optimistic view without waiting for commit
    pub fn create(
        &self,
        payload: &T,
        manager: &mut TransactionManager<'_>,
        id: Option<&str>,
    ) -> Result<WithId<T>> {
        let id = id.map_or_else(generate_id, str::to_owned);
        if id.is_empty() {
            return Err(TxError::InvalidId(format!("empty id for '{}'", T::COLLECTION)));
        }
        let data = self.validated_fields(payload)?;
        let created = self.from_fields(id, data.clone())?;
        manager.create(&self.doc_ref(&created.id), data);
        Ok(created)
    }

    /// Merged read. A missing document is `Ok(None)`, or
    /// `Err(DocumentNotFound)` when `should_throw` is set.
    pub fn get(
        &self,
        id: &str,
        manager: &mut TransactionManager<'_>,
        should_throw: bool,
    ) -> Result<Option<WithId<T>>> {
        let view = manager.get(&self.doc_ref(id))?;
        if !view.exists() {
            if should_throw {
                return Err(TxError::DocumentNotFound {
                    collection: T::COLLECTION.to_string(),
                    id: id.to_string(),
                });
            }
            return Ok(None);
        }
        self.from_fields(id.to_string(), view.into_data()).map(Some)
    }

    /// Queue a full replacement of the document
    pub fn set(&self, id: &str, data: &T, manager: &mut TransactionManager<'_>) -> Result<()> {
        let fields = self.validated_fields(data)?;
        manager.set(&self.doc_ref(id), fields, SetOptions::replace());
        Ok(())
    }

    /// Queue a partial update; null fields in `changes` are dropped
    pub fn update<P: Serialize>(
        &self,
        id: &str,
        changes: &P,
        manager: &mut TransactionManager<'_>,
    ) -> Result<()> {
        let fields = self.to_fields(changes)?;
        manager.update(&self.doc_ref(id), fields, None);
        Ok(())
    }

    pub fn delete(&self, id: &str, manager: &mut TransactionManager<'_>) {
        manager.delete(&self.doc_ref(id), None);
    }

    pub fn exists(&self, id: &str, manager: &mut TransactionManager<'_>) -> Result<bool> {
        manager.exists(&self.doc_ref(id))
    }

    /// Every committed id in the collection, decoded. Pending writes are not listed.
    pub fn get_all(&self, manager: &TransactionManager<'_>) -> Result<Vec<String>> {
        manager
            .list_ids(T::COLLECTION)?
            .iter()
            .map(|stored| self.codec.decode(stored))
            .collect()
    }

    /// Committed documents for `ids`, skipping missing ones. Pending writes are not seen.
    pub fn get_from_ids<I, S>(&self, ids: I, manager: &TransactionManager<'_>) -> Result<Vec<WithId<T>>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets: Vec<DocumentRef> = ids.into_iter().map(|id| self.doc_ref(id.as_ref())).collect();
        manager
            .get_many(&targets)?
            .into_iter()
            .filter_map(|snapshot| snapshot.data.map(|data| (snapshot.reference, data)))
            .map(|(reference, data)| self.from_fields(self.codec.decode(&reference.id)?, data))
            .collect()
    }

    /// Query builder scoped to this collection
    pub fn query(&self) -> Query {
        Query::collection(T::COLLECTION)
    }

    /// Run a storage-only query and decode the results
    pub fn fetch(&self, query: &Query, manager: &TransactionManager<'_>) -> Result<Vec<WithId<T>>> {
        if query.collection != T::COLLECTION {
            return Err(TxError::InvalidQuery(format!(
                "query targets '{}', repository holds '{}'",
                query.collection,
                T::COLLECTION
            )));
        }
        manager
            .query(query)?
            .docs
            .into_iter()
            .filter_map(|snapshot| snapshot.data.map(|data| (snapshot.reference, data)))
            .map(|(reference, data)| self.from_fields(self.codec.decode(&reference.id)?, data))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::mutator::testing::RecordingMutator;
    use crate::mutator::MutatorAdapter;
    use crate::query::FilterOp;
    use crate::store::DocumentStore;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        handle: String,
        display_name: Option<String>,
        followers: u32,
    }

    impl Profile {
        fn new(handle: &str, followers: u32) -> Self {
            Profile {
                handle: handle.to_string(),
                display_name: None,
                followers,
            }
        }
    }

    impl Entity for Profile {
        const COLLECTION: &'static str = "profiles";

        fn validate(&self) -> std::result::Result<(), String> {
            if self.handle.starts_with('@') {
                Ok(())
            } else {
                Err(format!("handle '{}' must start with '@'", self.handle))
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Nanopub {
        title: String,
    }

    impl Entity for Nanopub {
        const COLLECTION: &'static str = "nanopubs";
    }

    #[test]
    fn test_create_returns_optimistic_view() {
        let store = MemoryStore::new();
        let mut recorder = RecordingMutator::default();
        let mut manager = TransactionManager::new(&store, MutatorAdapter::Batch(&mut recorder));
        let repo: Repository<Profile> = Repository::new();

        let created = repo.create(&Profile::new("@a", 3), &mut manager, Some("p1")).unwrap();
        assert_eq!(created.id, "p1");
        assert_eq!(created.handle, "@a");

        let generated = repo.create(&Profile::new("@b", 0), &mut manager, None).unwrap();
        assert_eq!(generated.id.len(), 32);
        assert_eq!(manager.pending().len(), 2);
    }

    #[test]
    fn test_create_strips_none_fields() {
        let store = MemoryStore::new();
        let mut recorder = RecordingMutator::default();
        {
            let mut manager = TransactionManager::new(&store, MutatorAdapter::Batch(&mut recorder));
            let repo: Repository<Profile> = Repository::new();
            repo.create(&Profile::new("@a", 3), &mut manager, Some("p1")).unwrap();
            manager.apply_writes().unwrap();
        }

        let payload = recorder.calls[0].payload().unwrap();
        assert!(!payload.contains_key("display_name"));
        assert_eq!(payload.get("followers"), Some(&json!(3)));
    }

    #[test]
    fn test_create_rejects_invalid_entity() {
        let store = MemoryStore::new();
        let mut recorder = RecordingMutator::default();
        let mut manager = TransactionManager::new(&store, MutatorAdapter::Batch(&mut recorder));
        let repo: Repository<Profile> = Repository::new();

        let result = repo.create(&Profile::new("no-at", 0), &mut manager, None);
        assert!(matches!(result, Err(TxError::Validation { .. })));
        assert!(manager.pending().is_empty());
    }

    #[test]
    fn test_create_rejects_empty_id() {
        let store = MemoryStore::new();
        let mut recorder = RecordingMutator::default();
        let mut manager = TransactionManager::new(&store, MutatorAdapter::Batch(&mut recorder));
        let repo: Repository<Profile> = Repository::new();
        let encoded = Repository::<Nanopub, _>::with_codec(Base64UrlIds);

        assert!(matches!(
            repo.create(&Profile::new("@a", 1), &mut manager, Some("")),
            Err(TxError::InvalidId(_))
        ));
        assert!(matches!(
            encoded.create(&Nanopub { title: "t".into() }, &mut manager, Some("")),
            Err(TxError::InvalidId(_))
        ));
        assert!(manager.pending().is_empty());
    }

    #[test]
    fn test_get_sees_pending_create() {
        let store = MemoryStore::new();
        let mut recorder = RecordingMutator::default();
        let mut manager = TransactionManager::new(&store, MutatorAdapter::Transaction(&mut recorder));
        let repo: Repository<Profile> = Repository::new();

        assert!(!repo.exists("p1", &mut manager).unwrap());
        repo.create(&Profile::new("@a", 1), &mut manager, Some("p1")).unwrap();
        assert!(repo.exists("p1", &mut manager).unwrap());

        let fetched = repo.get("p1", &mut manager, true).unwrap().unwrap();
        assert_eq!(fetched.entity, Profile::new("@a", 1));
    }

    #[test]
    fn test_get_missing_with_and_without_throw() {
        let store = MemoryStore::new();
        let mut recorder = RecordingMutator::default();
        let mut manager = TransactionManager::new(&store, MutatorAdapter::Transaction(&mut recorder));
        let repo: Repository<Profile> = Repository::new();

        assert!(repo.get("ghost", &mut manager, false).unwrap().is_none());
        assert!(matches!(
            repo.get("ghost", &mut manager, true),
            Err(TxError::DocumentNotFound { id, .. }) if id == "ghost"
        ));
    }

    #[test]
    fn test_update_and_delete_through_merged_view() {
        let store = MemoryStore::new();
        store
            .seed(&DocumentRef::new("profiles", "p1"), json!({"handle": "@a", "followers": 1}).as_object().cloned().unwrap())
            .unwrap();
        let mut recorder = RecordingMutator::default();
        let mut manager = TransactionManager::new(&store, MutatorAdapter::Batch(&mut recorder));
        let repo: Repository<Profile> = Repository::new();

        repo.update("p1", &json!({"followers": 2, "display_name": null}), &mut manager).unwrap();
        let updated = repo.get("p1", &mut manager, true).unwrap().unwrap();
        assert_eq!(updated.followers, 2);
        assert_eq!(updated.display_name, None);

        repo.delete("p1", &mut manager);
        assert!(repo.get("p1", &mut manager, false).unwrap().is_none());
    }

    #[test]
    fn test_empty_update_does_not_materialize_document() {
        let store = MemoryStore::new();
        store
            .seed(&DocumentRef::new("profiles", "p2"), json!({"handle": "@b", "followers": 1}).as_object().cloned().unwrap())
            .unwrap();
        let mut recorder = RecordingMutator::default();
        let mut manager = TransactionManager::new(&store, MutatorAdapter::Batch(&mut recorder));
        let repo: Repository<Profile> = Repository::new();

        repo.update("ghost", &json!({}), &mut manager).unwrap();
        assert!(!repo.exists("ghost", &mut manager).unwrap());
        assert!(repo.get("ghost", &mut manager, false).unwrap().is_none());

        repo.delete("p2", &mut manager);
        repo.update("p2", &json!({"display_name": null}), &mut manager).unwrap();
        assert!(repo.get("p2", &mut manager, false).unwrap().is_none());
        assert!(matches!(
            repo.get("p2", &mut manager, true),
            Err(TxError::DocumentNotFound { .. })
        ));
    }

    #[test]
    fn test_set_replaces_and_validates() {
        let store = MemoryStore::new();
        let mut recorder = RecordingMutator::default();
        let mut manager = TransactionManager::new(&store, MutatorAdapter::Batch(&mut recorder));
        let repo: Repository<Profile> = Repository::new();

        repo.set("p1", &Profile::new("@z", 9), &mut manager).unwrap();
        assert!(matches!(
            repo.set("p1", &Profile::new("z", 9), &mut manager),
            Err(TxError::Validation { .. })
        ));
        assert_eq!(repo.get("p1", &mut manager, true).unwrap().unwrap().followers, 9);
    }

    #[test]
    fn test_get_all_and_get_from_ids_are_storage_only() {
        let store = MemoryStore::new();
        let repo: Repository<Profile> = Repository::new();
        for (id, handle) in [("p1", "@a"), ("p2", "@b")] {
            store
                .seed(&repo.doc_ref(id), json!({"handle": handle, "followers": 0}).as_object().cloned().unwrap())
                .unwrap();
        }

        let mut recorder = RecordingMutator::default();
        let mut manager = TransactionManager::new(&store, MutatorAdapter::Batch(&mut recorder));
        repo.create(&Profile::new("@c", 0), &mut manager, Some("p3")).unwrap();

        assert_eq!(repo.get_all(&manager).unwrap(), vec!["p1", "p2"]);

        let found = repo.get_from_ids(["p2", "p3", "p1"], &manager).unwrap();
        let ids: Vec<_> = found.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p1"]);
    }

    #[test]
    fn test_fetch_query() {
        let store = MemoryStore::new();
        let repo: Repository<Profile> = Repository::new();
        store
            .seed(&repo.doc_ref("p1"), json!({"handle": "@a", "followers": 10}).as_object().cloned().unwrap())
            .unwrap();
        store
            .seed(&repo.doc_ref("p2"), json!({"handle": "@b", "followers": 1}).as_object().cloned().unwrap())
            .unwrap();

        let mut recorder = RecordingMutator::default();
        let manager = TransactionManager::new(&store, MutatorAdapter::Batch(&mut recorder));

        let popular = repo
            .fetch(&repo.query().filter("followers", FilterOp::Gte(json!(5))), &manager)
            .unwrap();
        assert_eq!(popular.len(), 1);
        assert_eq!(popular[0].id, "p1");

        assert!(matches!(
            repo.fetch(&Query::collection("posts"), &manager),
            Err(TxError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_base64_codec_round_trip() {
        let codec = Base64UrlIds;
        for id in ["https://w3id.org/np/RA1x", "a/b/c", "plain", "ünï/cödé", ""] {
            let encoded = codec.encode(id);
            assert!(!encoded.contains('/'));
            assert_eq!(codec.decode(&encoded).unwrap(), id);
        }
        assert!(matches!(codec.decode("***"), Err(TxError::InvalidId(_))));
    }

    #[test]
    fn test_encoded_ids_used_for_references() {
        let store = MemoryStore::new();
        let repo = Repository::<Nanopub, _>::with_codec(Base64UrlIds);
        let uri = "https://w3id.org/np/RA1x";

        let mut recorder = RecordingMutator::default();
        {
            let mut manager = TransactionManager::new(&store, MutatorAdapter::Batch(&mut recorder));
            let created = repo
                .create(&Nanopub { title: "claim".into() }, &mut manager, Some(uri))
                .unwrap();
            assert_eq!(created.id, uri);
            assert_eq!(repo.get(uri, &mut manager, true).unwrap().unwrap().id, uri);
            manager.apply_writes().unwrap();
        }

        let stored_id = &recorder.calls[0].target().id;
        assert_ne!(stored_id, uri);
        assert!(!stored_id.contains('/'));
        assert_eq!(Base64UrlIds.decode(stored_id).unwrap(), uri);

        store
            .seed(&repo.doc_ref(uri), json!({"title": "claim"}).as_object().cloned().unwrap())
            .unwrap();
        let manager = TransactionManager::new(&store, MutatorAdapter::Batch(&mut recorder));
        assert_eq!(repo.get_all(&manager).unwrap(), vec![uri.to_string()]);
        assert_eq!(repo.get_from_ids([uri], &manager).unwrap()[0].id, uri);
        assert!(store.get(&repo.doc_ref(uri)).unwrap().exists());
    }
}
