//! Session registry and per-session event bus
//!
//! Each video analysis session owns a bounded MPSC queue: the pipeline
//! task is the single producer, the SSE handler the single consumer.
//! Publishing into a full queue blocks (back-pressure); publishing into a
//! missing or abandoned session is a no-op so a slow or disconnected
//! dashboard can never wedge a pipeline.

pub mod events;

pub use events::SessionEvent;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Queue capacity per session. Large enough to absorb a bursty pipeline,
/// small enough to bound memory when a consumer stalls.
const SESSION_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session already has a subscriber")]
    AlreadySubscribed,
    #[error("session id already registered")]
    AlreadyRegistered,
}

struct SessionEntry {
    tx: mpsc::Sender<SessionEvent>,
    receiver: Option<mpsc::Receiver<SessionEvent>>,
    cancel: CancellationToken,
}

/// Process-wide map of live analysis sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session queue. Returns the cancellation token owned by the
    /// session's pipeline task.
    pub fn register(&self, session_id: Uuid) -> Result<CancellationToken, SessionError> {
        if self.sessions.contains_key(&session_id) {
            return Err(SessionError::AlreadyRegistered);
        }
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        self.sessions.insert(
            session_id,
            SessionEntry {
                tx,
                receiver: Some(rx),
                cancel: cancel.clone(),
            },
        );
        debug!(%session_id, "Session registered");
        Ok(cancel)
    }

    /// Enqueue an event, blocking while the queue is full. No-op when the
    /// session is gone or its consumer hung up.
    pub async fn publish(&self, session_id: Uuid, event: SessionEvent) {
        // Clone the sender out of the map so the dashmap guard is not held
        // across the await point.
        let Some(tx) = self
            .sessions
            .get(&session_id)
            .map(|entry| entry.tx.clone())
        else {
            return;
        };
        if tx.send(event).await.is_err() {
            debug!(%session_id, "Consumer gone, dropping event");
        }
    }

    /// Take the session's single consumer end.
    pub fn subscribe(
        &self,
        session_id: Uuid,
    ) -> Result<mpsc::Receiver<SessionEvent>, SessionError> {
        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound)?;
        entry
            .receiver
            .take()
            .ok_or(SessionError::AlreadySubscribed)
    }

    /// Request cancellation of the session's pipeline task. The task
    /// finalizes its own stream (`error` + `end`) and removes the entry.
    pub fn cancel(&self, session_id: Uuid) {
        if let Some(entry) = self.sessions.get(&session_id) {
            entry.cancel.cancel();
        }
    }

    /// Drop the session entry. Called by the pipeline after `end` has been
    /// enqueued; an attached subscriber keeps draining its receiver.
    pub fn remove(&self, session_id: Uuid) {
        if self.sessions.remove(&session_id).is_some() {
            debug!(%session_id, "Session removed");
        }
    }

    pub fn contains(&self, session_id: Uuid) -> bool {
        self.sessions.contains_key(&session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_subscribe_preserves_order() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id).unwrap();

        registry
            .publish(id, SessionEvent::Error { detail: "one".to_string() })
            .await;
        registry
            .publish(id, SessionEvent::Error { detail: "two".to_string() })
            .await;
        registry.publish(id, SessionEvent::End { session_id: id }).await;

        let mut rx = registry.subscribe(id).unwrap();
        match rx.recv().await.unwrap() {
            SessionEvent::Error { detail } => assert_eq!(detail, "one"),
            other => panic!("unexpected event {}", other.name()),
        }
        match rx.recv().await.unwrap() {
            SessionEvent::Error { detail } => assert_eq!(detail, "two"),
            other => panic!("unexpected event {}", other.name()),
        }
        assert!(rx.recv().await.unwrap().is_end());
    }

    #[tokio::test]
    async fn second_subscribe_fails() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id).unwrap();

        let _rx = registry.subscribe(id).unwrap();
        assert_eq!(
            registry.subscribe(id).unwrap_err(),
            SessionError::AlreadySubscribed
        );
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let registry = SessionRegistry::new();
        assert_eq!(
            registry.subscribe(Uuid::new_v4()).unwrap_err(),
            SessionError::NotFound
        );
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id).unwrap();
        assert_eq!(
            registry.register(id).unwrap_err(),
            SessionError::AlreadyRegistered
        );
    }

    #[tokio::test]
    async fn publish_after_removal_is_noop() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id).unwrap();
        registry.remove(id);
        assert!(!registry.contains(id));
        // Must not panic or block.
        registry
            .publish(id, SessionEvent::Error { detail: "late".to_string() })
            .await;
    }

    #[tokio::test]
    async fn publish_after_consumer_drop_is_noop() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id).unwrap();
        drop(registry.subscribe(id).unwrap());
        registry
            .publish(id, SessionEvent::Error { detail: "void".to_string() })
            .await;
    }

    #[tokio::test]
    async fn cancel_trips_the_session_token() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let token = registry.register(id).unwrap();
        assert!(!token.is_cancelled());
        registry.cancel(id);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn subscriber_drains_after_removal() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id).unwrap();
        let mut rx = registry.subscribe(id).unwrap();

        registry.publish(id, SessionEvent::End { session_id: id }).await;
        registry.remove(id);

        // Entry is gone, but the queued event still reaches the consumer.
        assert!(rx.recv().await.unwrap().is_end());
        assert!(rx.recv().await.is_none());
    }
}
