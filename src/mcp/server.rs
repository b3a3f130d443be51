//! MCP server implementation.
//!
//! Every accepted channel becomes a [`Session`] driven by its own loop.
//! Requests on one session are answered strictly in arrival order; sessions
//! never wait on each other.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mcp::broadcast::NotificationBroadcaster;
use crate::mcp::handler::{validate_arguments, ToolContext, ToolRegistry};
use crate::mcp::progress::ProgressEmitter;
use crate::mcp::prompts::{ListPromptsResult, PromptRegistry};
use crate::mcp::protocol::*;
use crate::mcp::resources::ResourceRegistry;
use crate::mcp::session::{NegotiatedCapabilities, Session, SessionManager};
use crate::mcp::transport::{Message, MessageChannel, Transport};
use crate::metrics::{self, Timer};
use crate::VERSION;

/// Server identity and limits.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub name: String,
    pub version: String,
    /// Internal ceiling on one tool invocation.
    pub tool_timeout: Duration,
    /// Queue depth of session channels created by the server, and the most
    /// messages held back while a tool call runs.
    pub channel_capacity: usize,
    /// Ceiling on delivering one outbound message.
    pub send_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: "marvel-mcp".to_string(),
            version: VERSION.to_string(),
            tool_timeout: Duration::from_secs(120),
            channel_capacity: 100,
            send_timeout: Duration::from_secs(5),
        }
    }
}

struct ServerState {
    tools: ToolRegistry,
    prompts: PromptRegistry,
    resources: ResourceRegistry,
    sessions: SessionManager,
    options: ServerOptions,
}

/// MCP server.
#[derive(Clone)]
pub struct McpServer {
    state: Arc<ServerState>,
}

impl McpServer {
    /// Create a server. Must be called inside a tokio runtime.
    pub fn new(
        tools: ToolRegistry,
        prompts: PromptRegistry,
        resources: ResourceRegistry,
        options: ServerOptions,
    ) -> Self {
        Self {
            state: Arc::new(ServerState {
                tools,
                prompts,
                resources,
                sessions: SessionManager::spawn(),
                options,
            }),
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.state.options
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.state.sessions
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.state.tools
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.state.resources
    }

    pub fn broadcaster(&self) -> NotificationBroadcaster {
        NotificationBroadcaster::new(self.state.sessions.clone())
    }

    /// Run the server with the given transport until its session ends.
    pub async fn run<T: Transport>(&self, mut transport: T) -> Result<()> {
        info!(
            "Starting MCP server: {} v{}",
            self.state.options.name, self.state.options.version
        );

        let channel = transport.start().await?;
        self.serve(channel).await?;

        transport.stop().await?;
        info!("MCP server stopped");
        Ok(())
    }

    /// Serve one channel on the current task until it closes.
    pub async fn serve(&self, channel: MessageChannel) -> Result<()> {
        let session = self.state.sessions.register(channel.sink).await?;
        self.drive(session, channel.incoming).await;
        Ok(())
    }

    /// Register a channel and serve it on a background task.
    pub async fn connect(&self, channel: MessageChannel) -> Result<Arc<Session>> {
        let session = self.state.sessions.register(channel.sink).await?;
        let server = self.clone();
        let driven = session.clone();
        tokio::spawn(async move { server.drive(driven, channel.incoming).await });
        Ok(session)
    }

    async fn drive(&self, session: Arc<Session>, incoming: mpsc::Receiver<Message>) {
        SessionLoop {
            server: self.clone(),
            session: session.clone(),
            incoming,
            pending: VecDeque::new(),
        }
        .run()
        .await;

        self.state.sessions.unregister(session.id()).await;
        session.close();
        info!("Session {} closed", session.id());
    }

    fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: false,
            }),
            resources: Some(ResourcesCapability {
                subscribe: false,
                list_changed: true,
            }),
            prompts: Some(PromptsCapability {
                list_changed: false,
            }),
        }
    }
}

/// Dispatch loop for one session.
struct SessionLoop {
    server: McpServer,
    session: Arc<Session>,
    incoming: mpsc::Receiver<Message>,
    /// Messages that arrived while a tool call was running. Bounded by
    /// `channel_capacity`; past that the transport blocks the sender.
    pending: VecDeque<Message>,
}

impl SessionLoop {
    async fn run(mut self) {
        loop {
            let message = match self.pending.pop_front() {
                Some(message) => message,
                None => {
                    tokio::select! {
                        message = self.incoming.recv() => match message {
                            Some(message) => message,
                            None => break,
                        },
                        _ = self.session.cancellation().cancelled() => break,
                    }
                }
            };

            let handled = match message {
                Message::Request(req) => self.handle_request(req).await,
                Message::Notification(notif) => {
                    self.handle_notification(notif);
                    Ok(())
                }
                Message::Response(res) => {
                    debug!("Ignoring response from client (id: {:?})", res.id);
                    Ok(())
                }
            };

            if let Err(e) = handled {
                debug!("Session {} ending: {}", self.session.id(), e);
                break;
            }
        }
    }

    /// Handle one request and write its response. Only fails when the channel is gone.
    async fn handle_request(&mut self, req: JsonRpcRequest) -> Result<()> {
        debug!(
            "Session {} handling request: {} (id: {})",
            self.session.id(),
            req.method,
            req.id
        );

        let outcome = if !self.session.is_initialized() && req.method != methods::INITIALIZE {
            Err(Error::Protocol("session not initialized".to_string()))
        } else {
            self.dispatch(&req).await
        };

        let label = metric_label(&req.method);
        let response = match outcome {
            Ok(value) => {
                metrics::record_request(label, "ok");
                JsonRpcResponse::success(req.id, value)
            }
            Err(Error::ChannelClosed) => {
                metrics::record_request(label, "closed");
                return Err(Error::ChannelClosed);
            }
            Err(Error::Cancelled) => {
                metrics::record_request(label, "cancelled");
                info!("Request {} cancelled, no response sent", req.id);
                return Ok(());
            }
            Err(e) => {
                metrics::record_request(label, "error");
                debug!("Request {} failed: {}", req.id, e);
                JsonRpcResponse::failure(req.id, &e)
            }
        };

        self.session.sink().send(Message::Response(response)).await
    }

    async fn dispatch(&mut self, req: &JsonRpcRequest) -> Result<Value> {
        let state = self.server.state.clone();
        let params = req.params.clone();

        match req.method.as_str() {
            // Core
            methods::INITIALIZE => self.initialize(params),
            methods::PING => Ok(serde_json::json!({})),
            // Resources
            methods::RESOURCES_LIST => Ok(serde_json::to_value(state.resources.list().await?)?),
            methods::RESOURCES_TEMPLATES_LIST => {
                Ok(serde_json::to_value(state.resources.list_templates())?)
            }
            methods::RESOURCES_READ => {
                #[derive(Deserialize)]
                struct ReadParams {
                    uri: String,
                }
                let read: ReadParams = parse_params(params)?;
                Ok(serde_json::to_value(state.resources.read(&read.uri).await?)?)
            }
            // Tools
            methods::TOOLS_LIST => Ok(serde_json::to_value(ListToolsResult {
                tools: state.tools.list_tools(),
            })?),
            methods::TOOLS_CALL => self.call_tool(&req.id, parse_params(params)?).await,
            // Prompts
            methods::PROMPTS_LIST => Ok(serde_json::to_value(ListPromptsResult {
                prompts: state.prompts.list(),
            })?),
            methods::PROMPTS_GET => {
                #[derive(Deserialize)]
                struct GetPromptParams {
                    name: String,
                    #[serde(default)]
                    arguments: HashMap<String, String>,
                }
                let get: GetPromptParams = parse_params(params)?;
                Ok(serde_json::to_value(
                    state.prompts.get(&get.name, &get.arguments)?,
                )?)
            }
            // Unknown
            other => Err(Error::UnknownMethod(other.to_string())),
        }
    }

    fn initialize(&self, params: Option<Value>) -> Result<Value> {
        let params: InitializeParams = match params {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| Error::InvalidArguments(format!("invalid initialize params: {}", e)))?,
            None => InitializeParams::default(),
        };

        let version = negotiate_version(params.protocol_version.as_deref());
        self.session.mark_initialized(NegotiatedCapabilities {
            protocol_version: version.to_string(),
            client_info: params.client_info.clone(),
            client_capabilities: params.capabilities,
        })?;

        info!(
            "Session {} initialized (protocol {}, client {:?})",
            self.session.id(),
            version,
            params.client_info.map(|c| c.name)
        );

        let options = &self.server.state.options;
        Ok(serde_json::to_value(InitializeResult {
            protocol_version: version.to_string(),
            capabilities: self.server.capabilities(),
            server_info: ServerInfo {
                name: options.name.clone(),
                version: options.version.clone(),
            },
        })?)
    }

    /// Run a tool on a background task while still watching the channel.
    ///
    /// Other inbound messages are queued and handled after the call, keeping
    /// responses in request order. Cancellation, a closed channel or the
    /// internal ceiling stop the task.
    async fn call_tool(&mut self, id: &RequestId, params: CallToolParams) -> Result<Value> {
        let state = self.server.state.clone();
        let handler = state
            .tools
            .get_tool(&params.name)
            .ok_or_else(|| Error::ToolNotFound(params.name.clone()))?;
        validate_arguments(&handler.definition().input_schema, &params.arguments)?;

        let emitter = ProgressEmitter::for_call(params.progress_token().cloned(), self.session.sink());
        let cancel = self.session.cancellation().child_token();
        let ctx = ToolContext::new(emitter.clone(), cancel.clone());

        let tool_name = params.name;
        let arguments = params.arguments;
        let timer = Timer::start();
        let mut task = tokio::spawn(async move { handler.execute(arguments, ctx).await });

        let ceiling = tokio::time::sleep(state.options.tool_timeout);
        tokio::pin!(ceiling);
        let queue_limit = state.options.channel_capacity.max(1);
        let mut input_open = true;

        let outcome = loop {
            tokio::select! {
                joined = &mut task => {
                    break match joined {
                        Ok(result) => result,
                        Err(e) if e.is_cancelled() => Err(Error::Cancelled),
                        Err(e) => Err(Error::Internal(format!("tool task failed: {}", e))),
                    };
                }
                _ = &mut ceiling => {
                    warn!("Tool {} exceeded {:?}", tool_name, state.options.tool_timeout);
                    break Err(Error::Timeout {
                        seconds: state.options.tool_timeout.as_secs(),
                    });
                }
                _ = self.session.sink().closed() => {
                    info!("Session {} channel closed during {}", self.session.id(), tool_name);
                    break Err(Error::ChannelClosed);
                }
                _ = self.session.cancellation().cancelled() => {
                    break Err(Error::ChannelClosed);
                }
                message = self.incoming.recv(), if input_open && self.pending.len() < queue_limit => match message {
                    Some(Message::Notification(notif)) if notif.method == methods::NOTIFY_CANCELLED => {
                        if cancelled_request(&notif).as_ref() == Some(id) {
                            info!("Client cancelled {} (id: {})", tool_name, id);
                            break Err(Error::Cancelled);
                        }
                        debug!("Cancellation for a request that is not running");
                    }
                    Some(other) => self.pending.push_back(other),
                    None => input_open = false,
                },
            }
        };

        if !task.is_finished() {
            cancel.cancel();
            task.abort();
        }
        emitter.seal().await;
        metrics::record_tool_call(&tool_name, timer.elapsed_secs());

        Ok(serde_json::to_value(outcome?)?)
    }

    fn handle_notification(&mut self, notif: JsonRpcNotification) {
        match notif.method.as_str() {
            methods::NOTIFY_INITIALIZED => {
                info!("Client initialized session {}", self.session.id());
            }
            methods::NOTIFY_CANCELLED => {
                debug!(
                    "Cancellation for {:?} arrived with nothing in flight",
                    cancelled_request(&notif)
                );
            }
            _ => {
                debug!("Unknown notification: {}", notif.method);
            }
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    let value = params.unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(value).map_err(|e| Error::InvalidArguments(e.to_string()))
}

fn cancelled_request(notif: &JsonRpcNotification) -> Option<RequestId> {
    let params = notif.params.clone()?;
    serde_json::from_value::<CancelledParams>(params)
        .ok()
        .map(|p| p.request_id)
}

/// Bounded label set for the request counter.
fn metric_label(method: &str) -> &str {
    match method {
        methods::INITIALIZE
        | methods::PING
        | methods::RESOURCES_LIST
        | methods::RESOURCES_TEMPLATES_LIST
        | methods::RESOURCES_READ
        | methods::TOOLS_LIST
        | methods::TOOLS_CALL
        | methods::PROMPTS_LIST
        | methods::PROMPTS_GET => method,
        _ => "unknown",
    }
}
