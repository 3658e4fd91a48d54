use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_types::events::{DropReason, ServerEvent};

/// Outcome of handing an event to a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Dropped(DropReason),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Transport handle for one live connection: a connection id plus the
/// sending half of its bounded outbound queue.
///
/// Two handles are equal when they belong to the same connection.
#[derive(Debug, Clone)]
pub struct Handle {
    conn_id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
}

impl Handle {
    /// Allocate a handle with a fresh connection id. The receiver is drained
    /// by the connection's writer task.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            conn_id: Uuid::new_v4(),
            tx,
        };
        (handle, rx)
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queue an event without waiting. A full or closed queue drops it.
    pub fn deliver(&self, event: ServerEvent) -> Delivery {
        match self.tx.try_send(event) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %self.conn_id, "Outbound queue full, dropping event");
                Delivery::Dropped(DropReason::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %self.conn_id, "Connection closing, dropping event");
                Delivery::Dropped(DropReason::Closed)
            }
        }
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.conn_id == other.conn_id
    }
}

impl Eq for Handle {}

/// Who is reachable right now: username -> live transport handle.
///
/// Only the dispatcher writes to it; the negotiator and router read.
#[derive(Clone, Default)]
pub struct Registry {
    handles: Arc<RwLock<HashMap<String, Handle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the handle for `username`. The replaced handle, if
    /// any, is returned and not notified.
    pub async fn register(&self, username: &str, handle: Handle) -> Option<Handle> {
        self.handles
            .write()
            .await
            .insert(username.to_string(), handle)
    }

    pub async fn lookup(&self, username: &str) -> Option<Handle> {
        self.handles.read().await.get(username).cloned()
    }

    /// Remove whichever username maps to this exact handle. Returns that
    /// username, or `None` if the handle was already gone or replaced.
    pub async fn remove(&self, handle: &Handle) -> Option<String> {
        let mut handles = self.handles.write().await;
        let username = handles
            .iter()
            .find(|(_, h)| *h == handle)
            .map(|(name, _)| name.clone())?;
        handles.remove(&username);
        Some(username)
    }

    /// Look up `username` and queue `event` on its handle.
    pub async fn send_to(&self, username: &str, event: ServerEvent) -> Delivery {
        // Clone the handle out first so the queue is never touched under the lock
        let Some(handle) = self.lookup(username).await else {
            return Delivery::Dropped(DropReason::NotRegistered);
        };
        handle.deliver(event)
    }

    /// Usernames currently joined, sorted.
    pub async fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(username: &str) -> ServerEvent {
        ServerEvent::Ready {
            username: username.to_string(),
        }
    }

    #[tokio::test]
    async fn lookup_returns_latest_join() {
        let registry = Registry::new();
        let (first, _rx1) = Handle::channel(4);
        let (second, _rx2) = Handle::channel(4);

        assert!(registry.register("dave", first.clone()).await.is_none());
        let replaced = registry.register("dave", second.clone()).await;

        assert_eq!(replaced, Some(first));
        assert_eq!(registry.lookup("dave").await, Some(second));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_user_is_absent() {
        let registry = Registry::new();
        assert!(registry.lookup("ghost").await.is_none());
        assert_eq!(
            registry.send_to("ghost", ready("ghost")).await,
            Delivery::Dropped(DropReason::NotRegistered)
        );
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = Registry::new();
        let (handle, _rx) = Handle::channel(4);
        registry.register("alice", handle.clone()).await;

        assert_eq!(registry.remove(&handle).await.as_deref(), Some("alice"));
        assert!(registry.remove(&handle).await.is_none());
        assert!(registry.lookup("alice").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn removing_a_replaced_handle_keeps_the_new_one() {
        let registry = Registry::new();
        let (stale, _rx1) = Handle::channel(4);
        let (fresh, _rx2) = Handle::channel(4);
        registry.register("erin", stale.clone()).await;
        registry.register("erin", fresh.clone()).await;

        assert!(registry.remove(&stale).await.is_none());
        assert_eq!(registry.lookup("erin").await, Some(fresh));
    }

    #[tokio::test]
    async fn send_to_reaches_only_the_current_handle() {
        let registry = Registry::new();
        let (stale, mut stale_rx) = Handle::channel(4);
        let (fresh, mut fresh_rx) = Handle::channel(4);
        registry.register("erin", stale).await;
        registry.register("erin", fresh).await;

        assert!(registry.send_to("erin", ready("erin")).await.is_delivered());
        assert_eq!(fresh_rx.try_recv().unwrap(), ready("erin"));
        assert!(stale_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let registry = Registry::new();
        let (handle, _rx) = Handle::channel(1);
        registry.register("slow", handle).await;

        assert!(registry.send_to("slow", ready("slow")).await.is_delivered());
        assert_eq!(
            registry.send_to("slow", ready("slow")).await,
            Delivery::Dropped(DropReason::QueueFull)
        );
    }

    #[tokio::test]
    async fn closed_queue_is_a_silent_failure() {
        let registry = Registry::new();
        let (handle, rx) = Handle::channel(4);
        registry.register("gone", handle).await;
        drop(rx);

        assert_eq!(
            registry.send_to("gone", ready("gone")).await,
            Delivery::Dropped(DropReason::Closed)
        );
    }

    #[tokio::test]
    async fn usernames_are_sorted() {
        let registry = Registry::new();
        for name in ["carol", "alice", "bob"] {
            let (handle, _rx) = Handle::channel(1);
            registry.register(name, handle).await;
        }
        assert_eq!(registry.usernames().await, vec!["alice", "bob", "carol"]);
    }
}
