//! In-memory document store
//!
//! Reference `DocumentStore` implementation used by the test suite and by
//! embedders that do not need a durable engine. A session takes the store's
//! single write lock for its whole lifetime, which gives the atomicity and
//! isolation the executor requires: nothing else can observe or interleave
//! with a half-applied cascade.

use super::{
    apply_patch, matches, CollectionOps, DocumentStore, Patch, Predicate, StoreError, StoreSession,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Collections = HashMap<String, Vec<Value>>;

/// In-memory, lock-based document store
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<Mutex<Collections>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn find_in(data: &Collections, collection: &str, predicate: &Predicate) -> Vec<Value> {
    data.get(collection)
        .map(|documents| {
            documents
                .iter()
                .filter(|document| matches(document, predicate))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn insert_in(data: &mut Collections, collection: &str, document: Value) -> Result<(), StoreError> {
    if !document.is_object() {
        return Err(StoreError::InvalidDocument(
            "documents must be JSON objects".to_string(),
        ));
    }
    data.entry(collection.to_string())
        .or_default()
        .push(document);
    Ok(())
}

fn update_in(data: &mut Collections, collection: &str, predicate: &Predicate, patch: &Patch) -> u64 {
    let Some(documents) = data.get_mut(collection) else {
        return 0;
    };
    let mut modified = 0;
    for document in documents.iter_mut() {
        if matches(document, predicate) && apply_patch(document, patch) {
            modified += 1;
        }
    }
    modified
}

fn delete_in(data: &mut Collections, collection: &str, predicate: &Predicate) -> u64 {
    let Some(documents) = data.get_mut(collection) else {
        return 0;
    };
    let before = documents.len();
    documents.retain(|document| !matches(document, predicate));
    (before - documents.len()) as u64
}

#[async_trait]
impl CollectionOps for MemoryStore {
    async fn find(&self, collection: &str, predicate: &Predicate) -> Result<Vec<Value>, StoreError> {
        let data = self.collections.lock().await;
        Ok(find_in(&data, collection, predicate))
    }

    async fn find_one(
        &self,
        collection: &str,
        predicate: &Predicate,
    ) -> Result<Option<Value>, StoreError> {
        let data = self.collections.lock().await;
        Ok(data.get(collection).and_then(|documents| {
            documents
                .iter()
                .find(|document| matches(document, predicate))
                .cloned()
        }))
    }

    async fn insert(&self, collection: &str, document: Value) -> Result<(), StoreError> {
        let mut data = self.collections.lock().await;
        insert_in(&mut data, collection, document)
    }

    async fn update_many(
        &self,
        collection: &str,
        predicate: &Predicate,
        patch: &Patch,
    ) -> Result<u64, StoreError> {
        let mut data = self.collections.lock().await;
        Ok(update_in(&mut data, collection, predicate, patch))
    }

    async fn delete_many(
        &self,
        collection: &str,
        predicate: &Predicate,
    ) -> Result<u64, StoreError> {
        let mut data = self.collections.lock().await;
        Ok(delete_in(&mut data, collection, predicate))
    }

    async fn count(&self, collection: &str, predicate: &Predicate) -> Result<u64, StoreError> {
        let data = self.collections.lock().await;
        Ok(data
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|document| matches(document, predicate))
                    .count() as u64
            })
            .unwrap_or(0))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        let guard = Arc::clone(&self.collections).lock_owned().await;
        let backup = guard.clone();
        Ok(Box::new(MemorySession {
            state: std::sync::Mutex::new(SessionState {
                guard,
                backup,
                committed: false,
            }),
        }))
    }
}

struct SessionState {
    guard: OwnedMutexGuard<Collections>,
    backup: Collections,
    committed: bool,
}

impl Drop for SessionState {
    fn drop(&mut self) {
        // Uncommitted sessions roll everything back to the pre-session state
        if !self.committed {
            *self.guard = std::mem::take(&mut self.backup);
        }
    }
}

/// An open unit of work against a `MemoryStore`. Holds the store lock, so
/// concurrent sessions and auto-committed operations serialize behind it.
pub struct MemorySession {
    state: std::sync::Mutex<SessionState>,
}

impl MemorySession {
    fn state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CollectionOps for MemorySession {
    async fn find(&self, collection: &str, predicate: &Predicate) -> Result<Vec<Value>, StoreError> {
        let state = self.state();
        Ok(find_in(&state.guard, collection, predicate))
    }

    async fn find_one(
        &self,
        collection: &str,
        predicate: &Predicate,
    ) -> Result<Option<Value>, StoreError> {
        let state = self.state();
        Ok(state.guard.get(collection).and_then(|documents| {
            documents
                .iter()
                .find(|document| matches(document, predicate))
                .cloned()
        }))
    }

    async fn insert(&self, collection: &str, document: Value) -> Result<(), StoreError> {
        let mut state = self.state();
        insert_in(&mut state.guard, collection, document)
    }

    async fn update_many(
        &self,
        collection: &str,
        predicate: &Predicate,
        patch: &Patch,
    ) -> Result<u64, StoreError> {
        let mut state = self.state();
        Ok(update_in(&mut state.guard, collection, predicate, patch))
    }

    async fn delete_many(
        &self,
        collection: &str,
        predicate: &Predicate,
    ) -> Result<u64, StoreError> {
        let mut state = self.state();
        Ok(delete_in(&mut state.guard, collection, predicate))
    }

    async fn count(&self, collection: &str, predicate: &Predicate) -> Result<u64, StoreError> {
        let state = self.state();
        Ok(state
            .guard
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|document| matches(document, predicate))
                    .count() as u64
            })
            .unwrap_or(0))
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.state().committed = true;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), StoreError> {
        // Drop discards the staged writes
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldRef;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemoryStore::new();
        store
            .insert("persons", json!({"id": "p1", "name": "Ada"}))
            .await
            .unwrap();

        let found = store
            .find_one("persons", &Predicate::IdEq("p1".to_string()))
            .await
            .unwrap();
        assert_eq!(found.unwrap()["name"], json!("Ada"));
    }

    #[tokio::test]
    async fn test_uncommitted_session_discards_writes() {
        let store = MemoryStore::new();
        store
            .insert("persons", json!({"id": "p1"}))
            .await
            .unwrap();

        let session = store.begin().await.unwrap();
        session
            .delete_many("persons", &Predicate::All)
            .await
            .unwrap();
        session
            .insert("persons", json!({"id": "p2"}))
            .await
            .unwrap();
        session.abort().await.unwrap();

        let remaining = store.find("persons", &Predicate::All).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["id"], json!("p1"));
    }

    #[tokio::test]
    async fn test_committed_session_applies_writes() {
        let store = MemoryStore::new();
        store
            .insert("persons", json!({"id": "p1", "active": true}))
            .await
            .unwrap();

        let session = store.begin().await.unwrap();
        session
            .update_many(
                "persons",
                &Predicate::IdEq("p1".to_string()),
                &Patch::set("active", json!(false)),
            )
            .await
            .unwrap();
        session.commit().await.unwrap();

        let person = store
            .find_one("persons", &Predicate::IdEq("p1".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(person["active"], json!(false));
    }

    #[tokio::test]
    async fn test_update_many_counts_modified_only() {
        let store = MemoryStore::new();
        for id in ["a", "b"] {
            store
                .insert("sessions", json!({"id": id, "attendees": [{"studentId": "P"}]}))
                .await
                .unwrap();
        }
        store
            .insert("sessions", json!({"id": "c", "attendees": [{"studentId": "Q"}]}))
            .await
            .unwrap();

        let field = FieldRef::array_member("attendees", "studentId");
        let modified = store
            .update_many(
                "sessions",
                &Predicate::FieldEq(field.clone(), json!("P")),
                &Patch::ClearRef {
                    field,
                    target: json!("P"),
                },
            )
            .await
            .unwrap();
        assert_eq!(modified, 2);
    }

    #[tokio::test]
    async fn test_rejects_non_object_documents() {
        let store = MemoryStore::new();
        let err = store.insert("persons", json!("not-a-doc")).await;
        assert!(matches!(err, Err(StoreError::InvalidDocument(_))));
    }
}
