use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use uuid::Uuid;

use crate::models::daily_log::DailyLog;

/// Failure of a remote store call. Every adapter operation reports through this
/// instead of panicking, so callers treat each remote call as fallible.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("permission denied: {0}")]
    Permission(String),

    /// The query or its backing index/schema is misconfigured. Operational,
    /// not a problem with the user's data.
    #[error("query configuration error: {0}")]
    IndexConfiguration(String),

    /// The stored copy was updated after the one being written.
    #[error("stale write for {0}: the stored copy is newer")]
    Stale(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote store error: {0}")]
    Other(String),
}

impl RemoteError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, RemoteError::IndexConfiguration(_))
    }

    /// Text suitable for showing to the person using the journal.
    pub fn user_message(&self) -> String {
        match self {
            RemoteError::IndexConfiguration(_) => {
                "The journal database is not set up correctly. Please refresh the page, \
                 and contact support if this keeps happening."
                    .to_string()
            }
            RemoteError::Network(_) => {
                "Could not reach the sync server. Your entries are saved on this device.".to_string()
            }
            RemoteError::Permission(_) => {
                "You are not allowed to sync this journal. Try signing in again.".to_string()
            }
            RemoteError::Stale(_) => {
                "This day was changed on another device; the newer copy was kept.".to_string()
            }
            RemoteError::NotFound(_) => "That entry no longer exists on the server.".to_string(),
            RemoteError::Other(_) => {
                "Sync failed. Your entries are saved on this device.".to_string()
            }
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Per-user collection of food log documents keyed by `(user_id, date)`.
///
/// Reads hand back raw documents because stored records may predate the
/// current encoding; callers run them through `validate_and_migrate`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_by_date(&self, user_id: &str, date: NaiveDate) -> RemoteResult<Option<Value>>;

    /// Inclusive range, ascending by date.
    async fn get_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RemoteResult<Vec<Value>>;

    /// Most recent `limit` documents, descending by date.
    async fn get_recent(&self, user_id: &str, limit: usize) -> RemoteResult<Vec<Value>>;

    /// Every document of the user, ascending by date. Used by migration sweeps.
    async fn get_all(&self, user_id: &str) -> RemoteResult<Vec<Value>>;

    /// Create when `log.id` is `None`, update otherwise. The store assigns the
    /// id and `created_at`; a write whose `updated_at` is older than the stored
    /// copy is rejected with [`RemoteError::Stale`].
    async fn upsert(&self, log: &DailyLog) -> RemoteResult<DailyLog>;

    async fn delete(&self, id: Uuid) -> RemoteResult<()>;

    async fn ping(&self) -> RemoteResult<()>;
}

pub(crate) fn owner_of(log: &DailyLog) -> RemoteResult<&str> {
    log.user_id
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| RemoteError::Permission("record has no owning user".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_get_their_own_message() {
        let err = RemoteError::IndexConfiguration("missing index".into());
        assert!(err.is_configuration());
        assert!(err.user_message().contains("contact support"));
        assert!(!RemoteError::Network("timeout".into()).user_message().contains("support"));
    }
}
