//! Client sessions and the live-session registry.
//!
//! The live set is owned by a single task. Registration, removal and
//! snapshots are messages to that task, so a broadcast never observes a set
//! that is halfway through an update.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::mcp::protocol::{Implementation, JsonRpcNotification};
use crate::mcp::transport::{Message, MessageSink};
use crate::metrics;

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What was agreed during `initialize`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiatedCapabilities {
    pub protocol_version: String,
    pub client_info: Option<Implementation>,
    pub client_capabilities: Value,
}

/// One connected client.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    sink: MessageSink,
    negotiated: OnceLock<NegotiatedCapabilities>,
    cancel: CancellationToken,
    connected_at: DateTime<Utc>,
}

impl Session {
    pub fn new(sink: MessageSink) -> Self {
        Self::with_id(SessionId::generate(), sink)
    }

    pub fn with_id(id: SessionId, sink: MessageSink) -> Self {
        Self {
            id,
            sink,
            negotiated: OnceLock::new(),
            cancel: CancellationToken::new(),
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn sink(&self) -> &MessageSink {
        &self.sink
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Whether `initialize` has completed. Never reverts once true.
    pub fn is_initialized(&self) -> bool {
        self.negotiated.get().is_some()
    }

    pub fn negotiated(&self) -> Option<&NegotiatedCapabilities> {
        self.negotiated.get()
    }

    /// Record the outcome of `initialize`. Fails if it already happened.
    pub fn mark_initialized(&self, negotiated: NegotiatedCapabilities) -> Result<()> {
        self.negotiated
            .set(negotiated)
            .map_err(|_| Error::Protocol("session already initialized".to_string()))
    }

    /// Send an unsolicited notification to this client.
    pub async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::ChannelClosed);
        }
        self.sink.send(Message::Notification(notification)).await
    }

    /// Token cancelled when the session closes. In-flight work uses children of it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Mark the session closed and cancel everything running on its behalf.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.sink.is_closed()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            initialized: self.is_initialized(),
            connected_at: self.connected_at,
            client: self.negotiated().and_then(|n| n.client_info.clone()),
        }
    }
}

/// Serializable view of a session for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub initialized: bool,
    pub connected_at: DateTime<Utc>,
    pub client: Option<Implementation>,
}

/// Result of running a callback against every live session.
#[derive(Debug, Clone, Default)]
pub struct ForEachOutcome {
    /// Live sessions at the moment of the snapshot.
    pub attempted: usize,
    /// Sessions for which the callback succeeded.
    pub delivered: usize,
    /// Sessions whose callback failed; they have been unregistered and closed.
    pub pruned: Vec<SessionId>,
}

enum Command {
    Register {
        session: Arc<Session>,
        reply: oneshot::Sender<()>,
    },
    Unregister {
        id: SessionId,
        reply: oneshot::Sender<Option<Arc<Session>>>,
    },
    Get {
        id: SessionId,
        reply: oneshot::Sender<Option<Arc<Session>>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Arc<Session>>>,
    },
}

/// Handle to the live-session registry.
#[derive(Clone)]
pub struct SessionManager {
    commands: mpsc::Sender<Command>,
}

impl SessionManager {
    /// Spawn the registry task. Must be called inside a tokio runtime.
    pub fn spawn() -> Self {
        let (commands, mut rx) = mpsc::channel::<Command>(256);

        tokio::spawn(async move {
            let mut live: HashMap<SessionId, Arc<Session>> = HashMap::new();

            while let Some(command) = rx.recv().await {
                match command {
                    Command::Register { session, reply } => {
                        debug!("Registering session {}", session.id());
                        live.insert(session.id().clone(), session);
                        metrics::set_live_sessions(live.len());
                        let _ = reply.send(());
                    }
                    Command::Unregister { id, reply } => {
                        let removed = live.remove(&id);
                        if removed.is_some() {
                            debug!("Unregistered session {}", id);
                            metrics::set_live_sessions(live.len());
                        }
                        let _ = reply.send(removed);
                    }
                    Command::Get { id, reply } => {
                        let _ = reply.send(live.get(&id).cloned());
                    }
                    Command::Snapshot { reply } => {
                        let _ = reply.send(live.values().cloned().collect());
                    }
                }
            }

            debug!("Session registry stopped with {} live sessions", live.len());
        });

        Self { commands }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| Error::Internal("session registry stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Internal("session registry stopped".to_string()))
    }

    /// Create and register a session for a freshly accepted channel.
    pub async fn register(&self, sink: MessageSink) -> Result<Arc<Session>> {
        let session = Arc::new(Session::new(sink));
        self.register_session(session.clone()).await?;
        info!("Session {} opened", session.id());
        Ok(session)
    }

    /// Register an already constructed session.
    pub async fn register_session(&self, session: Arc<Session>) -> Result<()> {
        self.request(|reply| Command::Register { session, reply })
            .await
    }

    /// Remove a session. Returns whether it was live.
    pub async fn unregister(&self, id: &SessionId) -> bool {
        let id = id.clone();
        match self.request(|reply| Command::Unregister { id, reply }).await {
            Ok(removed) => removed.is_some(),
            Err(e) => {
                error!("Failed to unregister session: {}", e);
                false
            }
        }
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        let id = id.clone();
        self.request(|reply| Command::Get { id, reply })
            .await
            .ok()
            .flatten()
    }

    /// A consistent copy of the live set.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        match self.request(|reply| Command::Snapshot { reply }).await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!("Failed to snapshot sessions: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn live_count(&self) -> usize {
        self.snapshot().await.len()
    }

    /// Run `f` against every live session concurrently.
    ///
    /// Failures are never returned: the failing session is unregistered,
    /// closed and reported in [`ForEachOutcome::pruned`].
    pub async fn for_each_live<F, Fut>(&self, f: F) -> ForEachOutcome
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let sessions = self.snapshot().await;
        let attempted = sessions.len();

        let attempts = sessions.into_iter().map(|session| {
            let delivery = f(session.clone());
            async move { (session, delivery.await) }
        });
        let results = join_all(attempts).await;

        let mut outcome = ForEachOutcome {
            attempted,
            ..Default::default()
        };
        for (session, result) in results {
            match result {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    warn!("Pruning session {}: {}", session.id(), e);
                    self.unregister(session.id()).await;
                    session.close();
                    outcome.pruned.push(session.id().clone());
                }
            }
        }
        outcome
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}
