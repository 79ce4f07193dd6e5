//! Generic document-store collaborator
//!
//! The deletion core talks to storage through the object-safe traits in this
//! module. It needs very little from an engine: predicate-driven reads and
//! writes per named collection, "match by field path including array-embedded
//! fields", "pull one array element by sub-field match", and a way to run a
//! block of writes as one atomic, isolated unit. Anything engine-specific
//! stays behind these traits.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by a store implementation
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

/// Describes where a reference lives inside a document. Dot paths are parsed
/// once, when the relationship registry is built; everything downstream
/// branches on this enum instead of splitting strings per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "shape")]
pub enum FieldRef {
    /// Plain (possibly nested) scalar field, e.g. `refs.pId`
    Scalar { path: Vec<String> },
    /// Field inside elements of an array, e.g. `attendees.studentId`
    /// where `attendees` is an array of objects
    ArrayMember {
        container: Vec<String>,
        match_field: String,
    },
}

impl FieldRef {
    /// Build a scalar descriptor from a dot-addressed path
    pub fn scalar(path: &str) -> Self {
        Self::Scalar {
            path: path.split('.').map(str::to_string).collect(),
        }
    }

    /// Build an array-member descriptor: `container` is a dot-addressed path
    /// to the array, `match_field` the key inside each element
    pub fn array_member(container: &str, match_field: &str) -> Self {
        Self::ArrayMember {
            container: container.split('.').map(str::to_string).collect(),
            match_field: match_field.to_string(),
        }
    }

    /// Dot-addressed display form (for reports and logs)
    pub fn display_path(&self) -> String {
        match self {
            Self::Scalar { path } => path.join("."),
            Self::ArrayMember {
                container,
                match_field,
            } => format!("{}.{}", container.join("."), match_field),
        }
    }
}

/// Predicate over documents in one collection
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every document
    All,
    /// Matches the document whose `id` field equals the given string
    IdEq(String),
    /// Matches when the referenced field equals the value; for an array
    /// member, when any element matches
    FieldEq(FieldRef, Value),
    /// Matches when the referenced field is present and non-null; for an
    /// array member, when any element carries the match field
    FieldExists(FieldRef),
    /// Conjunction
    And(Vec<Predicate>),
}

/// Write operation applied to every document matched by a predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// Overwrite the whole document
    Replace(Value),
    /// Set a (possibly nested) scalar field, creating intermediate objects
    Set { path: Vec<String>, value: Value },
    /// Overwrite the reference location currently equal to `target` with
    /// `value` (redaction stamps)
    SetRef {
        field: FieldRef,
        target: Value,
        value: Value,
    },
    /// Remove the reference equal to `target`: unset the scalar field, or
    /// pull the matching array element
    ClearRef { field: FieldRef, target: Value },
}

impl Patch {
    /// Convenience constructor for a top-level or dotted scalar set
    pub fn set(path: &str, value: Value) -> Self {
        Self::Set {
            path: path.split('.').map(str::to_string).collect(),
            value,
        }
    }
}

/// Predicate-driven operations over named collections. Implemented both by
/// stores (auto-committed) and by open sessions (staged until commit), so the
/// cascade policy dispatch can run against either.
#[async_trait]
pub trait CollectionOps: Send + Sync {
    async fn find(&self, collection: &str, predicate: &Predicate) -> Result<Vec<Value>, StoreError>;

    async fn find_one(
        &self,
        collection: &str,
        predicate: &Predicate,
    ) -> Result<Option<Value>, StoreError>;

    async fn insert(&self, collection: &str, document: Value) -> Result<(), StoreError>;

    /// Returns the number of documents modified
    async fn update_many(
        &self,
        collection: &str,
        predicate: &Predicate,
        patch: &Patch,
    ) -> Result<u64, StoreError>;

    /// Returns the number of documents removed
    async fn delete_many(
        &self,
        collection: &str,
        predicate: &Predicate,
    ) -> Result<u64, StoreError>;

    async fn count(&self, collection: &str, predicate: &Predicate) -> Result<u64, StoreError>;
}

/// A document store that can open atomic, isolated units of work
#[async_trait]
pub trait DocumentStore: CollectionOps {
    /// Open a session; writes stage inside it and become visible only on
    /// commit. Dropping an uncommitted session discards its writes.
    async fn begin(&self) -> Result<Box<dyn StoreSession>, StoreError>;
}

/// An open atomic unit of work
#[async_trait]
pub trait StoreSession: CollectionOps {
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn abort(self: Box<Self>) -> Result<(), StoreError>;
}

/// Extract the string `id` of a document
pub fn doc_id(document: &Value) -> Option<&str> {
    document.get("id").and_then(Value::as_str)
}

/// Walk a dot path into a document
pub fn get_path<'a>(document: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = document;
    for segment in path {
        current = current.get(segment)?;
    }
    Some(current)
}

fn get_path_mut<'a>(document: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut current = document;
    for segment in path {
        current = current.get_mut(segment)?;
    }
    Some(current)
}

/// Evaluate a predicate against one document
pub fn matches(document: &Value, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::All => true,
        Predicate::IdEq(id) => doc_id(document) == Some(id.as_str()),
        Predicate::FieldEq(field, value) => match field {
            FieldRef::Scalar { path } => get_path(document, path) == Some(value),
            FieldRef::ArrayMember {
                container,
                match_field,
            } => get_path(document, container)
                .and_then(Value::as_array)
                .map(|elements| {
                    elements
                        .iter()
                        .any(|element| element.get(match_field) == Some(value))
                })
                .unwrap_or(false),
        },
        Predicate::FieldExists(field) => match field {
            FieldRef::Scalar { path } => {
                matches!(get_path(document, path), Some(v) if !v.is_null())
            }
            FieldRef::ArrayMember {
                container,
                match_field,
            } => get_path(document, container)
                .and_then(Value::as_array)
                .map(|elements| {
                    elements.iter().any(|element| {
                        matches!(element.get(match_field), Some(v) if !v.is_null())
                    })
                })
                .unwrap_or(false),
        },
        Predicate::And(parts) => parts.iter().all(|part| matches(document, part)),
    }
}

/// Apply a patch to one document in place; returns whether anything changed
pub fn apply_patch(document: &mut Value, patch: &Patch) -> bool {
    match patch {
        Patch::Replace(replacement) => {
            if document == replacement {
                false
            } else {
                *document = replacement.clone();
                true
            }
        }
        Patch::Set { path, value } => set_path(document, path, value.clone()),
        Patch::SetRef {
            field,
            target,
            value,
        } => match field {
            FieldRef::Scalar { path } => match get_path_mut(document, path) {
                Some(current) if current == target => {
                    *current = value.clone();
                    true
                }
                _ => false,
            },
            FieldRef::ArrayMember {
                container,
                match_field,
            } => {
                let Some(elements) =
                    get_path_mut(document, container).and_then(Value::as_array_mut)
                else {
                    return false;
                };
                let mut changed = false;
                for element in elements.iter_mut() {
                    if element.get(match_field) == Some(target) {
                        if let Some(slot) = element.get_mut(match_field) {
                            *slot = value.clone();
                            changed = true;
                        }
                    }
                }
                changed
            }
        },
        Patch::ClearRef { field, target } => match field {
            FieldRef::Scalar { path } => {
                if get_path(document, path) != Some(target) {
                    return false;
                }
                let (parent_path, leaf) = match path.split_last() {
                    Some((leaf, parent)) => (parent, leaf),
                    None => return false,
                };
                match get_path_mut(document, parent_path).and_then(Value::as_object_mut) {
                    Some(parent) => parent.remove(leaf).is_some(),
                    None => false,
                }
            }
            FieldRef::ArrayMember {
                container,
                match_field,
            } => {
                let Some(elements) =
                    get_path_mut(document, container).and_then(Value::as_array_mut)
                else {
                    return false;
                };
                let before = elements.len();
                elements.retain(|element| element.get(match_field) != Some(target));
                elements.len() != before
            }
        },
    }
}

/// Set a dotted scalar path, creating intermediate objects as needed
fn set_path(document: &mut Value, path: &[String], value: Value) -> bool {
    let (leaf, parents) = match path.split_last() {
        Some(split) => split,
        None => return false,
    };
    let mut current = document;
    for segment in parents {
        if !current.is_object() {
            return false;
        }
        let map = match current.as_object_mut() {
            Some(map) => map,
            None => return false,
        };
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    match current.as_object_mut() {
        Some(map) => {
            let previous = map.insert(leaf.clone(), value.clone());
            previous.as_ref() != Some(&value)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_eq_scalar_nested() {
        let doc = json!({"id": "b1", "refs": {"pId": "P"}});
        let field = FieldRef::scalar("refs.pId");
        assert!(matches(&doc, &Predicate::FieldEq(field.clone(), json!("P"))));
        assert!(!matches(&doc, &Predicate::FieldEq(field, json!("Q"))));
    }

    #[test]
    fn test_field_eq_array_member() {
        let doc = json!({
            "id": "s1",
            "attendees": [
                {"studentId": "P", "status": "present"},
                {"studentId": "Q", "status": "absent"}
            ]
        });
        let field = FieldRef::array_member("attendees", "studentId");
        assert!(matches(&doc, &Predicate::FieldEq(field.clone(), json!("P"))));
        assert!(!matches(&doc, &Predicate::FieldEq(field, json!("Z"))));
    }

    #[test]
    fn test_and_predicate() {
        let doc = json!({"id": "p1", "active": true});
        let pred = Predicate::And(vec![
            Predicate::IdEq("p1".to_string()),
            Predicate::FieldEq(FieldRef::scalar("active"), json!(true)),
        ]);
        assert!(matches(&doc, &pred));

        let inactive = json!({"id": "p1", "active": false});
        assert!(!matches(&inactive, &pred));
    }

    #[test]
    fn test_clear_ref_unsets_scalar() {
        let mut doc = json!({"id": "b1", "refs": {"pId": "P", "other": 1}});
        let patch = Patch::ClearRef {
            field: FieldRef::scalar("refs.pId"),
            target: json!("P"),
        };
        assert!(apply_patch(&mut doc, &patch));
        assert_eq!(doc, json!({"id": "b1", "refs": {"other": 1}}));
        // Second application is a no-op
        assert!(!apply_patch(&mut doc, &patch));
    }

    #[test]
    fn test_clear_ref_pulls_array_element() {
        let mut doc = json!({
            "id": "s1",
            "attendees": [{"studentId": "P"}, {"studentId": "Q"}]
        });
        let patch = Patch::ClearRef {
            field: FieldRef::array_member("attendees", "studentId"),
            target: json!("P"),
        };
        assert!(apply_patch(&mut doc, &patch));
        assert_eq!(doc, json!({"id": "s1", "attendees": [{"studentId": "Q"}]}));
    }

    #[test]
    fn test_set_ref_stamps_matching_element_only() {
        let mut doc = json!({
            "id": "s1",
            "attendees": [{"studentId": "P"}, {"studentId": "Q"}]
        });
        let stamp = json!({"originalEntityId": "P"});
        let patch = Patch::SetRef {
            field: FieldRef::array_member("attendees", "studentId"),
            target: json!("P"),
            value: stamp.clone(),
        };
        assert!(apply_patch(&mut doc, &patch));
        assert_eq!(doc["attendees"][0]["studentId"], stamp);
        assert_eq!(doc["attendees"][1]["studentId"], json!("Q"));
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut doc = json!({"id": "p1"});
        assert!(apply_patch(&mut doc, &Patch::set("meta.active", json!(false))));
        assert_eq!(doc["meta"]["active"], json!(false));
    }

    #[test]
    fn test_field_exists_skips_null() {
        let doc = json!({"id": "b1", "refs": {"pId": null}});
        assert!(!matches(
            &doc,
            &Predicate::FieldExists(FieldRef::scalar("refs.pId"))
        ));
    }
}
