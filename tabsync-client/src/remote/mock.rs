//! Mock remote service for testing.
//!
//! Keeps tables in memory, detects duplicate keys and missing parents,
//! and allows scripting failures and latency for drain tests.

use super::{RemoteError, RemoteService};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tabsync_types::TableKind;
use uuid::Uuid;

/// Mock remote service for testing.
#[derive(Debug, Default)]
pub struct MockRemote {
    inner: Arc<Mutex<MockRemoteInner>>,
}

#[derive(Debug, Default)]
struct MockRemoteInner {
    tables: HashMap<TableKind, HashMap<Uuid, serde_json::Value>>,
    missing_parents: HashSet<Uuid>,
    fail_next: VecDeque<RemoteError>,
    unavailable: bool,
    latency: Option<Duration>,
    calls: Vec<String>,
}

impl MockRemote {
    /// Create a new empty mock remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record, bypassing error scripting.
    pub fn seed(&self, table: TableKind, id: Uuid, record: serde_json::Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.tables.entry(table).or_default().insert(id, record);
    }

    /// Mark a parent identifier as deleted remotely: any insert or
    /// update referencing it fails with a foreign-key violation.
    pub fn mark_parent_missing(&self, parent_id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        inner.missing_parents.insert(parent_id);
    }

    /// Script the next call to fail with the given error.
    pub fn fail_next(&self, error: RemoteError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next.push_back(error);
    }

    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.unavailable = unavailable;
    }

    /// Add artificial latency to every call.
    pub fn set_latency(&self, latency: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.latency = Some(latency);
    }

    /// All calls made so far, e.g. `"insert groups <id>"`.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Fetch a stored record.
    pub fn record(&self, table: TableKind, id: Uuid) -> Option<serde_json::Value> {
        let inner = self.inner.lock().unwrap();
        inner.tables.get(&table).and_then(|t| t.get(&id)).cloned()
    }

    /// Number of records in a table.
    pub fn table_len(&self, table: TableKind) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.tables.get(&table).map_or(0, |t| t.len())
    }

    async fn pre_call(&self, description: String) -> Result<(), RemoteError> {
        let (latency, verdict) = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(description);
            let verdict = if let Some(err) = inner.fail_next.pop_front() {
                Err(err)
            } else if inner.unavailable {
                Err(RemoteError::Unavailable("service offline".to_string()))
            } else {
                Ok(())
            };
            (inner.latency, verdict)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        verdict
    }

    fn parent_of(record: &serde_json::Value) -> Option<Uuid> {
        for key in ["group_id", "expense_id"] {
            if let Some(value) = record.get(key).and_then(|v| v.as_str()) {
                if let Ok(uuid) = Uuid::parse_str(value) {
                    return Some(uuid);
                }
            }
        }
        None
    }
}

impl Clone for MockRemote {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl RemoteService for MockRemote {
    async fn insert(
        &self,
        table: TableKind,
        record: serde_json::Value,
    ) -> Result<(), RemoteError> {
        let id = record
            .get("id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| RemoteError::CheckViolation("record without id".to_string()))?;
        self.pre_call(format!("insert {table} {id}")).await?;

        let mut inner = self.inner.lock().unwrap();
        if let Some(parent) = Self::parent_of(&record) {
            if inner.missing_parents.contains(&parent) {
                return Err(RemoteError::ForeignKeyViolation { parent_id: parent });
            }
        }
        let rows = inner.tables.entry(table).or_default();
        if rows.contains_key(&id) {
            return Err(RemoteError::UniqueViolation);
        }
        rows.insert(id, record);
        Ok(())
    }

    async fn update(
        &self,
        table: TableKind,
        id: Uuid,
        patch: serde_json::Value,
    ) -> Result<(), RemoteError> {
        self.pre_call(format!("update {table} {id}")).await?;

        let mut inner = self.inner.lock().unwrap();
        if let Some(parent) = Self::parent_of(&patch) {
            if inner.missing_parents.contains(&parent) {
                return Err(RemoteError::ForeignKeyViolation { parent_id: parent });
            }
        }
        let rows = inner.tables.entry(table).or_default();
        let Some(existing) = rows.get_mut(&id) else {
            return Err(RemoteError::NotFound);
        };
        if let (Some(target), Some(fields)) = (existing.as_object_mut(), patch.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, table: TableKind, id: Uuid) -> Result<(), RemoteError> {
        self.pre_call(format!("delete {table} {id}")).await?;

        let mut inner = self.inner.lock().unwrap();
        let rows = inner.tables.entry(table).or_default();
        if rows.remove(&id).is_none() {
            return Err(RemoteError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: Uuid) -> serde_json::Value {
        json!({ "id": id.to_string(), "name": "Trip" })
    }

    #[tokio::test]
    async fn insert_then_fetch() {
        let remote = MockRemote::new();
        let id = Uuid::new_v4();
        remote
            .insert(TableKind::Groups, record(id))
            .await
            .unwrap();

        let stored = remote.record(TableKind::Groups, id).unwrap();
        assert_eq!(stored["name"], "Trip");
    }

    #[tokio::test]
    async fn duplicate_insert_is_unique_violation() {
        let remote = MockRemote::new();
        let id = Uuid::new_v4();
        remote.insert(TableKind::Groups, record(id)).await.unwrap();

        let err = remote.insert(TableKind::Groups, record(id)).await.unwrap_err();
        assert_eq!(err, RemoteError::UniqueViolation);
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let remote = MockRemote::new();
        let id = Uuid::new_v4();
        remote.insert(TableKind::Groups, record(id)).await.unwrap();

        remote
            .update(TableKind::Groups, id, json!({ "name": "Holiday" }))
            .await
            .unwrap();

        let stored = remote.record(TableKind::Groups, id).unwrap();
        assert_eq!(stored["name"], "Holiday");
        assert_eq!(stored["id"], id.to_string());
    }

    #[tokio::test]
    async fn update_missing_record_is_not_found() {
        let remote = MockRemote::new();
        let err = remote
            .update(TableKind::Groups, Uuid::new_v4(), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::NotFound);
    }

    #[tokio::test]
    async fn delete_missing_record_is_not_found() {
        let remote = MockRemote::new();
        let err = remote
            .delete(TableKind::Groups, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::NotFound);
    }

    #[tokio::test]
    async fn missing_parent_rejects_insert() {
        let remote = MockRemote::new();
        let group = Uuid::new_v4();
        remote.mark_parent_missing(group);

        let member = json!({
            "id": Uuid::new_v4().to_string(),
            "group_id": group.to_string(),
            "name": "Dana"
        });
        let err = remote.insert(TableKind::Members, member).await.unwrap_err();
        assert_eq!(err, RemoteError::ForeignKeyViolation { parent_id: group });
    }

    #[tokio::test]
    async fn scripted_failure_applies_once() {
        let remote = MockRemote::new();
        remote.fail_next(RemoteError::Unavailable("timeout".to_string()));

        let id = Uuid::new_v4();
        let err = remote.insert(TableKind::Groups, record(id)).await.unwrap_err();
        assert!(err.is_transient());

        remote.insert(TableKind::Groups, record(id)).await.unwrap();
    }

    #[tokio::test]
    async fn unavailable_mode_fails_everything() {
        let remote = MockRemote::new();
        remote.set_unavailable(true);

        let err = remote
            .delete(TableKind::Groups, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(err.is_transient());

        remote.set_unavailable(false);
        let err = remote
            .delete(TableKind::Groups, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::NotFound);
    }

    #[tokio::test]
    async fn calls_are_logged_in_order() {
        let remote = MockRemote::new();
        let id = Uuid::new_v4();
        remote.insert(TableKind::Groups, record(id)).await.unwrap();
        let _ = remote.delete(TableKind::Groups, id).await;

        let calls = remote.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("insert groups"));
        assert!(calls[1].starts_with("delete groups"));
    }
}
