//! Model Context Protocol (MCP) implementation.
//!
//! # Architecture
//!
//! - `protocol` - JSON-RPC and MCP message types
//! - `transport` - Message channels and the line-delimited (stdio) transport
//! - `session` - Sessions and the live-session registry
//! - `server` - Per-session request dispatch
//! - `handler` - Tool trait, registry and argument validation
//! - `progress` - Progress notifications for in-flight tool calls
//! - `templates` - URI template matching and identifier normalization
//! - `resources` - Resource catalog and its storage backend
//! - `prompts` - Prompt templates
//! - `broadcast` - Catalog-changed notification fan-out

pub mod broadcast;
pub mod handler;
pub mod progress;
pub mod prompts;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod session;
pub mod templates;
pub mod transport;

pub use broadcast::{BroadcastReport, NotificationBroadcaster};
pub use handler::{ToolContext, ToolHandler, ToolRegistry};
pub use protocol::*;
pub use server::{McpServer, ServerOptions};
pub use session::{Session, SessionId, SessionManager};
pub use transport::{LineTransport, Message, MessageChannel, StdioTransport, Transport};
