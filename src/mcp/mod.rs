//! Model Context Protocol wire types.
//!
//! - `types` -- JSON-RPC 2.0 envelope types and the MCP 2025-11-25 wire
//!   types this runtime dispatches (`initialize`, `tools/list`,
//!   `tools/call`, `resources/read`, `resources/templates/list`).
#![allow(dead_code)]

pub mod types;

pub use types::*;
