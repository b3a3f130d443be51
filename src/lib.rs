//! Marvel MCP Server
//!
//! A Model Context Protocol (MCP) capability server. Clients connect over
//! stdio or an HTTP event stream, negotiate a protocol version, and then
//! discover and use what the server offers: resources (static and
//! templated), tools (with progress reporting) and prompts.
//!
//! # Architecture
//!
//! 1. **MCP Layer** (`mcp`) - Protocol types, transports, sessions, dispatch
//! 2. **Catalog** (`catalog`) - The Marvel resources, templates and prompts
//! 3. **Tools Layer** (`tools`) - Combat simulation, power estimate, SQL queries
//! 4. **HTTP** (`http`) - SSE transport and the admin surface
//!
//! # Features
//!
//! - **Templates**: `mcp://marvel/heroes/{name}` style URIs with identifier
//!   normalization and naming overrides
//! - **Progress**: Monotonic progress notifications for long tool calls
//! - **Notifications**: Catalog-changed broadcast to every live session

pub mod catalog;
pub mod config;
pub mod error;
pub mod http;
pub mod mcp;
pub mod metrics;
pub mod tools;

pub use error::{Error, Result};

/// Server version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest resource served (1MB).
pub const MAX_RESOURCE_SIZE: u64 = 1024 * 1024;
