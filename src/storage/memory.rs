use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::remote::{owner_of, RemoteError, RemoteResult, RemoteStore};
use crate::models::daily_log::{date_key, DailyLog};

#[derive(Debug, Clone)]
struct StoredDoc {
    user_id: String,
    date: NaiveDate,
    doc: Value,
}

/// In-process remote store with failure injection. Documents are kept as raw
/// JSON so legacy shapes can be seeded.
#[derive(Default)]
pub struct MemoryRemoteStore {
    docs: Mutex<HashMap<Uuid, StoredDoc>>,
    failure: Mutex<Option<RemoteError>>,
    upserts: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with `error` until cleared with `None`.
    pub async fn set_failure(&self, error: Option<RemoteError>) {
        *self.failure.lock().await = error;
    }

    /// Seed a document as-is. Returns its id.
    pub async fn insert_raw(&self, user_id: &str, date: NaiveDate, mut doc: Value) -> Uuid {
        let id = Uuid::new_v4();
        if let Some(obj) = doc.as_object_mut() {
            obj.insert("id".into(), Value::String(id.to_string()));
            obj.insert("userId".into(), Value::String(user_id.to_string()));
        }
        self.docs.lock().await.insert(
            id,
            StoredDoc {
                user_id: user_id.to_string(),
                date,
                doc,
            },
        );
        id
    }

    pub async fn raw(&self, user_id: &str, date: NaiveDate) -> Option<Value> {
        self.docs
            .lock()
            .await
            .values()
            .find(|d| d.user_id == user_id && d.date == date)
            .map(|d| d.doc.clone())
    }

    pub async fn len(&self) -> usize {
        self.docs.lock().await.len()
    }

    /// Number of upsert calls received, including failed ones.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    async fn check(&self) -> RemoteResult<()> {
        match self.failure.lock().await.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn select(&self, user_id: &str, keep: impl Fn(NaiveDate) -> bool) -> Vec<(NaiveDate, Value)> {
        let docs = self.docs.lock().await;
        let mut out: Vec<(NaiveDate, Value)> = docs
            .values()
            .filter(|d| d.user_id == user_id && keep(d.date))
            .map(|d| (d.date, d.doc.clone()))
            .collect();
        out.sort_by_key(|(date, _)| *date);
        out
    }
}

fn updated_at_of(doc: &Value) -> Option<DateTime<Utc>> {
    doc.get("updatedAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn created_at_of(doc: &Value) -> Option<DateTime<Utc>> {
    doc.get("createdAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get_by_date(&self, user_id: &str, date: NaiveDate) -> RemoteResult<Option<Value>> {
        self.check().await?;
        Ok(self.raw(user_id, date).await)
    }

    async fn get_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RemoteResult<Vec<Value>> {
        self.check().await?;
        let docs = self.select(user_id, |d| d >= start && d <= end).await;
        Ok(docs.into_iter().map(|(_, doc)| doc).collect())
    }

    async fn get_recent(&self, user_id: &str, limit: usize) -> RemoteResult<Vec<Value>> {
        self.check().await?;
        let docs = self.select(user_id, |_| true).await;
        Ok(docs.into_iter().rev().take(limit).map(|(_, doc)| doc).collect())
    }

    async fn get_all(&self, user_id: &str) -> RemoteResult<Vec<Value>> {
        self.check().await?;
        let docs = self.select(user_id, |_| true).await;
        Ok(docs.into_iter().map(|(_, doc)| doc).collect())
    }

    async fn upsert(&self, log: &DailyLog) -> RemoteResult<DailyLog> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.check().await?;
        let user_id = owner_of(log)?.to_string();

        let mut docs = self.docs.lock().await;
        let existing = match log.id {
            Some(id) => docs.get(&id).map(|d| (id, d.clone())),
            None => None,
        }
        .or_else(|| {
            docs.iter()
                .find(|(_, d)| d.user_id == user_id && d.date == log.date)
                .map(|(id, d)| (*id, d.clone()))
        });

        let mut saved = log.clone();
        let id = match &existing {
            Some((id, current)) => {
                if updated_at_of(&current.doc).is_some_and(|stored| stored > log.updated_at) {
                    return Err(RemoteError::Stale(date_key(log.date)));
                }
                if let Some(created) = created_at_of(&current.doc) {
                    saved.created_at = created;
                }
                *id
            }
            None => Uuid::new_v4(),
        };
        saved.id = Some(id);
        saved.user_id = Some(user_id.clone());

        let doc = serde_json::to_value(&saved).map_err(|e| RemoteError::Other(e.to_string()))?;
        docs.insert(
            id,
            StoredDoc {
                user_id,
                date: saved.date,
                doc,
            },
        );
        Ok(saved)
    }

    async fn delete(&self, id: Uuid) -> RemoteResult<()> {
        self.check().await?;
        match self.docs.lock().await.remove(&id) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(id.to_string())),
        }
    }

    async fn ping(&self) -> RemoteResult<()> {
        self.check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn log_for(d: u32) -> DailyLog {
        DailyLog::empty(day(d), Some("u1".into()), Utc::now())
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let store = MemoryRemoteStore::new();
        let created = store.upsert(&log_for(1)).await.unwrap();
        let id = created.id.unwrap();

        let mut edit = created.clone();
        edit.exercise = "swim".into();
        edit.updated_at = Utc::now();
        let updated = store.upsert(&edit).await.unwrap();

        assert_eq!(updated.id, Some(id));
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.upsert_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_write_rejected() {
        let store = MemoryRemoteStore::new();
        let older = log_for(1);
        let mut newer = older.clone();
        newer.updated_at = older.updated_at + chrono::Duration::seconds(5);
        store.upsert(&newer).await.unwrap();
        assert!(matches!(store.upsert(&older).await, Err(RemoteError::Stale(_))));
    }

    #[tokio::test]
    async fn test_queries_are_ordered_and_scoped() {
        let store = MemoryRemoteStore::new();
        for d in [3, 1, 2] {
            store.upsert(&log_for(d)).await.unwrap();
        }
        store.insert_raw("someone-else", day(2), json!({ "date": "2024-03-02" })).await;

        let range = store.get_range("u1", day(1), day(2)).await.unwrap();
        let dates: Vec<_> = range.iter().map(|d| d["date"].clone()).collect();
        assert_eq!(dates, vec![json!("2024-03-01"), json!("2024-03-02")]);

        let recent = store.get_recent("u1", 2).await.unwrap();
        assert_eq!(recent[0]["date"], "2024-03-03");
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_and_ownerless_write() {
        let store = MemoryRemoteStore::new();
        let mut anonymous = log_for(1);
        anonymous.user_id = None;
        assert!(matches!(store.upsert(&anonymous).await, Err(RemoteError::Permission(_))));

        store.set_failure(Some(RemoteError::Network("offline".into()))).await;
        assert!(store.get_recent("u1", 10).await.is_err());
        store.set_failure(None).await;
        assert!(store.ping().await.is_ok());
    }
}
