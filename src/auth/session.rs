use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::store::FoodLogStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The current user, or `None`, as published by the auth provider. Consumers
/// subscribe to changes.
#[derive(Clone)]
pub struct AuthSession {
    tx: Arc<watch::Sender<Option<SessionUser>>>,
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSession {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<SessionUser> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SessionUser>> {
        self.tx.subscribe()
    }

    pub fn sign_in(&self, user: SessionUser) {
        tracing::info!(user_id = %user.id, "Signed in");
        self.tx.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        if self.tx.send_replace(None).is_some() {
            tracing::info!("Signed out");
        }
    }
}

/// Forward every session change to the store until the session is dropped.
pub fn spawn_listener(session: &AuthSession, store: FoodLogStore) -> JoinHandle<()> {
    let mut rx = session.subscribe();
    tokio::spawn(async move {
        loop {
            let user_id = rx.borrow_and_update().as_ref().map(|u| u.id.clone());
            if let Err(e) = store.set_user_id(user_id.clone()).await {
                tracing::error!(user_id = ?user_id, error = %e, "Sync after session change failed");
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}
