//! mcprt - Model Context Protocol runtime core
//!
//! This library provides the server-side building blocks of a Model
//! Context Protocol runtime: a resource URI template engine, a route
//! table, a generic bounded LRU cache, a fixed-window rate limiter, a
//! session manager, an SSE stream context, and the Streamable HTTP and
//! WebSocket transports that sit on top of them, dispatched through a
//! single JSON-RPC 2.0 dispatcher.
//!
//! # Architecture
//!
//! - `error`: Error types and the crate-wide result alias
//! - `config`: Runtime configuration
//! - `mcp`: MCP/JSON-RPC wire types
//! - `template`: Resource URI template compiler and matcher
//! - `router`: Route table built over compiled templates
//! - `cache`: Generic bounded LRU cache and the fixed-window rate limiter
//! - `session`: Session manager built on the bounded LRU cache
//! - `transport`: SSE stream context, Streamable HTTP, and WebSocket transports
//! - `dispatcher`: JSON-RPC request/batch dispatch
//! - `handler`: Tool/resource handler traits and registry
//!
//! # Example
//!
//! ```no_run
//! use mcprt::config::RuntimeConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RuntimeConfig::load("config/runtime.yaml")?;
//!     config.validate()?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod mcp;
pub mod router;
pub mod session;
pub mod template;
pub mod transport;

pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
