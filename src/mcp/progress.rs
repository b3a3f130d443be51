//! MCP Progress Notifications
//!
//! Support for emitting progress updates during long-running tool calls.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::mcp::protocol::{methods, JsonRpcNotification};
use crate::mcp::transport::{Message, MessageSink};

/// Progress token for tracking operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ProgressToken {
    String(String),
    Number(i64),
}

impl std::fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Progress notification params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    pub progress_token: ProgressToken,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressParams {
    /// Wrap these params in a `notifications/progress` message.
    pub fn into_message(self) -> Result<Message> {
        Ok(Message::Notification(JsonRpcNotification::new(
            methods::NOTIFY_PROGRESS,
            Some(serde_json::to_value(self)?),
        )))
    }
}

/// Emits ordered progress notifications for one in-flight tool call.
///
/// Cloning shares the same ordering state. An emitter built without a token
/// accepts every emission and writes nothing.
#[derive(Clone, Default)]
pub struct ProgressEmitter {
    inner: Option<Arc<EmitterInner>>,
}

struct EmitterInner {
    token: ProgressToken,
    sink: MessageSink,
    state: Mutex<EmitterState>,
}

#[derive(Default)]
struct EmitterState {
    last: Option<f64>,
    total: Option<f64>,
    sealed: bool,
}

impl ProgressEmitter {
    /// Create an emitter writing to `sink` under `token`.
    pub fn new(token: ProgressToken, sink: MessageSink) -> Self {
        Self {
            inner: Some(Arc::new(EmitterInner {
                token,
                sink,
                state: Mutex::new(EmitterState::default()),
            })),
        }
    }

    /// Create an emitter for a call that supplied no progress token.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Build an emitter from an optional token.
    pub fn for_call(token: Option<ProgressToken>, sink: &MessageSink) -> Self {
        match token {
            Some(token) => Self::new(token, sink.clone()),
            None => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn token(&self) -> Option<&ProgressToken> {
        self.inner.as_ref().map(|inner| &inner.token)
    }

    /// Emit one progress notification.
    ///
    /// Values are clamped so the emitted sequence never decreases and never
    /// exceeds `total`. A failed write means the session is gone and is
    /// returned as [`Error::ChannelClosed`] so the caller stops working.
    pub async fn emit(&self, progress: f64, total: f64, message: impl Into<String>) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };

        if !progress.is_finite() || !total.is_finite() {
            return Err(Error::Internal("progress values must be finite".to_string()));
        }

        // Held across the write so concurrent emissions and `seal` stay ordered.
        let mut state = inner.state.lock().await;
        if state.sealed {
            return Err(Error::Internal(format!(
                "progress for token {} emitted after completion",
                inner.token
            )));
        }

        let mut value = progress.min(total);
        if let Some(last) = state.last {
            value = value.max(last);
        }

        let params = ProgressParams {
            progress_token: inner.token.clone(),
            progress: value,
            total: Some(total),
            message: Some(message.into()),
        };
        inner.sink.send(params.into_message()?).await?;

        state.last = Some(value);
        state.total = Some(total);
        Ok(())
    }

    /// Emit a final notification with `progress == total`, using the last total seen.
    pub async fn complete(&self, message: impl Into<String>) -> Result<()> {
        let total = match &self.inner {
            Some(inner) => inner.state.lock().await.total,
            None => None,
        };
        match total {
            Some(total) => self.emit(total, total, message).await,
            None => Ok(()),
        }
    }

    /// Stop accepting emissions. Waits for an emission already in progress.
    pub async fn seal(&self) {
        if let Some(inner) = &self.inner {
            inner.state.lock().await.sealed = true;
        }
    }
}

impl std::fmt::Debug for ProgressEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressEmitter")
            .field("token", &self.token())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::{ChannelPeer, MessageChannel};
    use std::time::Duration;

    fn emitter(token: &str) -> (ProgressEmitter, ChannelPeer) {
        let (channel, peer) = MessageChannel::pair(16, Duration::from_millis(200));
        let emitter = ProgressEmitter::new(ProgressToken::String(token.to_string()), channel.sink);
        (emitter, peer)
    }

    fn params_of(message: Message) -> ProgressParams {
        match message {
            Message::Notification(n) => {
                assert_eq!(n.method, methods::NOTIFY_PROGRESS);
                serde_json::from_value(n.params.unwrap()).unwrap()
            }
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emit_writes_notification() {
        let (emitter, mut peer) = emitter("combat-1");
        emitter.emit(1.0, 3.0, "Round 1").await.unwrap();

        let params = params_of(peer.rx.recv().await.unwrap());
        assert_eq!(params.progress_token, ProgressToken::String("combat-1".into()));
        assert_eq!(params.progress, 1.0);
        assert_eq!(params.total, Some(3.0));
        assert_eq!(params.message.as_deref(), Some("Round 1"));
    }

    #[tokio::test]
    async fn test_emit_is_non_decreasing_and_capped() {
        let (emitter, mut peer) = emitter("t");
        emitter.emit(2.0, 3.0, "a").await.unwrap();
        emitter.emit(1.0, 3.0, "b").await.unwrap();
        emitter.emit(9.0, 3.0, "c").await.unwrap();

        let values: Vec<f64> = (0..3)
            .map(|_| params_of(peer.rx.try_recv().unwrap()).progress)
            .collect();
        assert_eq!(values, vec![2.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_complete_uses_last_total() {
        let (emitter, mut peer) = emitter("t");
        emitter.emit(1.0, 4.0, "start").await.unwrap();
        emitter.complete("done").await.unwrap();

        peer.rx.recv().await.unwrap();
        let last = params_of(peer.rx.recv().await.unwrap());
        assert_eq!(last.progress, 4.0);
        assert_eq!(last.total, Some(4.0));
    }

    #[tokio::test]
    async fn test_sealed_emitter_rejects() {
        let (emitter, mut peer) = emitter("t");
        emitter.seal().await;

        assert!(emitter.emit(1.0, 3.0, "late").await.is_err());
        assert!(peer.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disabled_emitter_drops_silently() {
        let emitter = ProgressEmitter::disabled();
        assert!(!emitter.is_enabled());
        assert!(emitter.token().is_none());
        emitter.emit(1.0, 3.0, "ignored").await.unwrap();
        emitter.complete("ignored").await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_channel_aborts() {
        let (emitter, peer) = emitter("t");
        drop(peer);

        let result = emitter.emit(1.0, 3.0, "Round 1").await;
        assert!(matches!(result, Err(Error::ChannelClosed)));
    }

    #[test]
    fn test_progress_token_serialization() {
        let token_str = ProgressToken::String("test-token".to_string());
        let token_num = ProgressToken::Number(42);

        assert_eq!(serde_json::to_string(&token_str).unwrap(), "\"test-token\"");
        assert_eq!(serde_json::to_string(&token_num).unwrap(), "42");

        let parsed: ProgressToken = serde_json::from_str("42").unwrap();
        assert_eq!(parsed, token_num);
    }

    #[test]
    fn test_progress_params_serialization() {
        let params = ProgressParams {
            progress_token: ProgressToken::Number(1),
            progress: 2.0,
            total: Some(3.0),
            message: Some("Working...".to_string()),
        };

        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"progressToken\":1"));
        assert!(json.contains("\"progress\":2.0"));
        assert!(json.contains("\"total\":3.0"));
        assert!(json.contains("\"message\":\"Working...\""));
    }
}
