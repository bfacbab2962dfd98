//! Commit fan-out to every connected front-end client.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::protocol::{CommitNotice, Notification};
use super::registry::SessionId;

/// Serialized JSON text queued for one connection's socket writer
pub type OutboundFrame = Arc<String>;

/// Result of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Members in the snapshot taken at publish time
    pub attempted: usize,
    /// Members whose channel accepted the frame
    pub delivered: usize,
}

impl PublishOutcome {
    pub fn skipped(&self) -> usize {
        self.attempted - self.delivered
    }
}

/// Live connection set. Lease state plays no part in membership.
#[derive(Default)]
pub struct Broadcaster {
    members: RwLock<HashMap<SessionId, mpsc::Sender<OutboundFrame>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Joining twice replaces the sender.
    pub async fn join(&self, id: SessionId, sender: mpsc::Sender<OutboundFrame>) {
        self.members.write().await.insert(id, sender);
    }

    /// Remove a connection. Unknown ids are ignored.
    pub async fn leave(&self, id: SessionId) {
        self.members.write().await.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Push a broadcast envelope to every member without waiting on any of
    /// them. Full or closed channels are skipped.
    pub async fn publish(&self, notice: CommitNotice) -> PublishOutcome {
        let targets: Vec<(SessionId, mpsc::Sender<OutboundFrame>)> = {
            let members = self.members.read().await;
            if members.is_empty() {
                return PublishOutcome::default();
            }
            members
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };

        let notification = Notification::Broadcast { payload: notice };
        let frame: OutboundFrame = match serde_json::to_string(&notification) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!("failed to serialize broadcast: {}", e);
                return PublishOutcome {
                    attempted: targets.len(),
                    delivered: 0,
                };
            }
        };

        let mut outcome = PublishOutcome {
            attempted: targets.len(),
            delivered: 0,
        };
        for (id, tx) in targets {
            match tx.try_send(Arc::clone(&frame)) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(session = %id, "broadcast skipped: channel full");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session = %id, "broadcast skipped: channel closed");
                }
            }
        }

        debug!(
            attempted = outcome.attempted,
            delivered = outcome.delivered,
            "broadcast published"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(message: &str) -> CommitNotice {
        CommitNotice {
            message: message.to_string(),
            timestamp: "2024-05-01 12:00:00".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_to_empty_set_is_noop() {
        let broadcaster = Broadcaster::new();
        let outcome = broadcaster.publish(notice("hello")).await;
        assert_eq!(outcome, PublishOutcome::default());
    }

    #[tokio::test]
    async fn test_join_and_leave_are_idempotent() {
        let broadcaster = Broadcaster::new();
        let id = SessionId::new();
        let (tx, _rx) = mpsc::channel(4);

        broadcaster.join(id, tx.clone()).await;
        broadcaster.join(id, tx).await;
        assert_eq!(broadcaster.len().await, 1);

        broadcaster.leave(id).await;
        broadcaster.leave(id).await;
        broadcaster.leave(SessionId::new()).await;
        assert!(broadcaster.is_empty().await);
    }

    #[tokio::test]
    async fn test_publish_reaches_every_member() {
        let broadcaster = Broadcaster::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        broadcaster.join(SessionId::new(), tx1).await;
        broadcaster.join(SessionId::new(), tx2).await;

        let outcome = broadcaster.publish(notice("hello")).await;
        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.delivered, 2);

        let expected = serde_json::json!({
            "type": "broadcast",
            "payload": {"message": "hello", "timestamp": "2024-05-01 12:00:00"}
        });
        for rx in [&mut rx1, &mut rx2] {
            let frame = rx.try_recv().unwrap();
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(value, expected);
        }
    }

    #[tokio::test]
    async fn test_closed_member_is_skipped() {
        let broadcaster = Broadcaster::new();
        let (live_tx, mut live_rx) = mpsc::channel(4);
        let (dead_tx, dead_rx) = mpsc::channel(4);
        drop(dead_rx);
        broadcaster.join(SessionId::new(), live_tx).await;
        broadcaster.join(SessionId::new(), dead_tx).await;

        let outcome = broadcaster.publish(notice("hi")).await;
        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.skipped(), 1);
        assert!(live_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_full_member_does_not_block_others() {
        let broadcaster = Broadcaster::new();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        broadcaster.join(SessionId::new(), slow_tx).await;
        broadcaster.join(SessionId::new(), fast_tx).await;

        let first = broadcaster.publish(notice("one")).await;
        assert_eq!(first.delivered, 2);

        // slow member's single slot is still occupied
        let second = broadcaster.publish(notice("two")).await;
        assert_eq!(second.attempted, 2);
        assert_eq!(second.delivered, 1);

        assert!(fast_rx.try_recv().unwrap().contains("\"one\""));
        assert!(fast_rx.try_recv().unwrap().contains("\"two\""));
        assert!(slow_rx.try_recv().unwrap().contains("\"one\""));
        assert!(slow_rx.try_recv().is_err());
    }
}
