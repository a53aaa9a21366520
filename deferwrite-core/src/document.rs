// src/document.rs
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// Document body: string-keyed JSON map, no schema enforced at this layer
pub type Fields = serde_json::Map<String, Value>;

/// Identity of a single document: collection name + string id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef {
    pub collection: String,
    pub id: String,
}

impl DocumentRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        DocumentRef {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Reference with a freshly generated id (UUID v4, simple form)
    pub fn generate(collection: impl Into<String>) -> Self {
        DocumentRef::new(collection, generate_id())
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Merge `source` into `target`. Nested objects merge key by key; any other
/// value (scalar, array, null) replaces what was there.
pub fn deep_merge(target: &mut Fields, source: &Fields) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Recursively drop null-valued object keys.
///
/// `Option::None` fields serialize to null; storage must never receive them
/// as explicit values.
pub fn strip_undefined(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                strip_undefined(v);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                strip_undefined(item);
            }
        }
        _ => {}
    }
}

/// Resolve a dotted field path (`profile.name`) inside a document body
pub fn field_at<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = fields.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Raw, committed state of one document as read from storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub reference: DocumentRef,
    pub data: Option<Fields>,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
}

impl DocumentSnapshot {
    pub fn missing(reference: DocumentRef) -> Self {
        DocumentSnapshot {
            reference,
            data: None,
            create_time: None,
            update_time: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn id(&self) -> &str {
        &self.reference.id
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| field_at(data, field))
    }
}

/// Storage state with the pending mutation log folded over it
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentView {
    pub(crate) reference: DocumentRef,
    pub(crate) exists: bool,
    pub(crate) data: Fields,
    pub(crate) update_time: Option<DateTime<Utc>>,
    pub(crate) pending: usize,
}

impl DocumentView {
    pub fn reference(&self) -> &DocumentRef {
        &self.reference
    }

    pub fn id(&self) -> &str {
        &self.reference.id
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn data(&self) -> &Fields {
        &self.data
    }

    pub fn into_data(self) -> Fields {
        self.data
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        field_at(&self.data, field)
    }

    /// Last committed update time; pending writes do not move it
    pub fn update_time(&self) -> Option<DateTime<Utc>> {
        self.update_time
    }

    /// Number of uncommitted mutations folded into this view
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("Expected object"),
        }
    }

    #[test]
    fn test_document_ref_display() {
        let doc = DocumentRef::new("users", "u1");
        assert_eq!(doc.to_string(), "users/u1");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = DocumentRef::generate("posts");
        let b = DocumentRef::generate("posts");

        assert_eq!(a.collection, "posts");
        assert_eq!(a.id.len(), 32);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_deep_merge_later_field_wins() {
        let mut target = fields(json!({"x": 1, "y": 2}));
        deep_merge(&mut target, &fields(json!({"x": 9})));
        assert_eq!(Value::Object(target), json!({"x": 9, "y": 2}));
    }

    #[test]
    fn test_deep_merge_nested_objects() {
        let mut target = fields(json!({"profile": {"name": "a", "bio": "hi"}}));
        deep_merge(&mut target, &fields(json!({"profile": {"name": "b"}})));
        assert_eq!(
            Value::Object(target),
            json!({"profile": {"name": "b", "bio": "hi"}})
        );
    }

    #[test]
    fn test_deep_merge_arrays_replace() {
        let mut target = fields(json!({"tags": ["a", "b", "c"]}));
        deep_merge(&mut target, &fields(json!({"tags": ["z"]})));
        assert_eq!(Value::Object(target), json!({"tags": ["z"]}));
    }

    #[test]
    fn test_deep_merge_object_replaces_scalar() {
        let mut target = fields(json!({"meta": 3}));
        deep_merge(&mut target, &fields(json!({"meta": {"v": 1}})));
        assert_eq!(Value::Object(target), json!({"meta": {"v": 1}}));
    }

    #[test]
    fn test_strip_undefined_recursive() {
        let mut value = json!({
            "name": "a",
            "email": null,
            "profile": {"bio": null, "links": [{"url": null, "label": "x"}]}
        });
        strip_undefined(&mut value);
        assert_eq!(
            value,
            json!({"name": "a", "profile": {"links": [{"label": "x"}]}})
        );
    }

    #[test]
    fn test_field_at_dotted_path() {
        let data = fields(json!({"profile": {"contacts": {"email": "e@x"}}}));
        assert_eq!(field_at(&data, "profile.contacts.email"), Some(&json!("e@x")));
        assert!(field_at(&data, "profile.missing").is_none());
        assert!(field_at(&data, "profile.contacts.email.deeper").is_none());
    }

    #[test]
    fn test_missing_snapshot() {
        let snapshot = DocumentSnapshot::missing(DocumentRef::new("users", "ghost"));
        assert!(!snapshot.exists());
        assert_eq!(snapshot.id(), "ghost");
        assert!(snapshot.get("name").is_none());
    }

    #[test]
    fn test_view_deserialize() {
        #[derive(Deserialize)]
        struct User {
            name: String,
        }

        let view = DocumentView {
            reference: DocumentRef::new("users", "u1"),
            exists: true,
            data: fields(json!({"name": "a"})),
            update_time: None,
            pending: 1,
        };
        let user: User = view.deserialize().unwrap();
        assert_eq!(user.name, "a");
        assert_eq!(view.pending(), 1);
    }
}
