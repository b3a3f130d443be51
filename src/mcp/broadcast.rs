//! Catalog-changed notification fan-out.

use serde::Serialize;
use tracing::info;

use crate::mcp::protocol::{methods, JsonRpcNotification};
use crate::mcp::session::{SessionId, SessionManager};
use crate::metrics;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastReport {
    /// Live sessions when the broadcast was triggered.
    pub live: usize,
    /// Sessions that accepted the notification.
    pub delivered: usize,
    /// Sessions dropped because delivery failed.
    pub pruned: Vec<SessionId>,
}

/// Pushes notifications to every live session.
#[derive(Debug, Clone)]
pub struct NotificationBroadcaster {
    sessions: SessionManager,
}

impl NotificationBroadcaster {
    pub fn new(sessions: SessionManager) -> Self {
        Self { sessions }
    }

    /// Tell every live session the resource list may have changed.
    ///
    /// Delivery is best effort. Failures prune the session and are counted,
    /// never returned.
    pub async fn broadcast_catalog_changed(&self) -> BroadcastReport {
        self.broadcast(JsonRpcNotification::new(
            methods::NOTIFY_RESOURCES_LIST_CHANGED,
            None,
        ))
        .await
    }

    pub async fn broadcast(&self, notification: JsonRpcNotification) -> BroadcastReport {
        let outcome = self
            .sessions
            .for_each_live(|session| {
                let notification = notification.clone();
                async move { session.notify(notification).await }
            })
            .await;

        metrics::record_broadcast(outcome.delivered, outcome.pruned.len());
        info!(
            "Broadcast {}: delivered to {}/{} sessions, pruned {}",
            notification.method,
            outcome.delivered,
            outcome.attempted,
            outcome.pruned.len()
        );

        BroadcastReport {
            live: outcome.attempted,
            delivered: outcome.delivered,
            pruned: outcome.pruned,
        }
    }
}
