//! Error types for the MCP runtime
//!
//! This module defines every error that can surface from the template
//! engine, router, caches, session manager, transports, and dispatcher,
//! using `thiserror` for ergonomic error handling and `anyhow::Result`
//! as the crate-wide result alias.

#![allow(dead_code)]

use thiserror::Error;

/// Main error type for runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration-related errors
    #[error("configuration error: {0}")]
    Config(String),

    /// A URI template failed to compile (malformed placeholder, modifier, etc.)
    #[error("template compile error: {0}")]
    TemplateCompile(String),

    /// A URI did not match any segment of a compiled template
    #[error("template mismatch: {0}")]
    TemplateMismatch(String),

    /// A matched placeholder value did not satisfy its declared type
    #[error("placeholder type mismatch: expected {expected}, got {got:?}")]
    TypeMismatch {
        /// The placeholder's declared type (string/int/number/bool/pattern)
        expected: &'static str,
        /// The raw string value that failed to parse as that type
        got: String,
    },

    /// A required placeholder modifier was absent and had no default
    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    /// No registered route matched the request URI
    #[error("no route matched: {0}")]
    NoRouteMatched(String),

    /// The request named a resource URI that does not exist
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The request named a tool that is not registered
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Invalid JSON-RPC params for the given method
    #[error("invalid params for {method}: {message}")]
    InvalidParams {
        /// The method whose params failed validation
        method: String,
        /// Explanation of what was wrong
        message: String,
    },

    /// The client requested a protocol version this runtime does not support
    #[error("unsupported protocol version: {0}")]
    ProtocolVersion(String),

    /// Client is not authorized to perform the requested operation
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Client exceeded its configured request rate
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The named session does not exist or has expired
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// An SSE or WebSocket send was dropped due to backpressure
    #[error("backpressure dropped message for {0}")]
    BackpressureDropped(String),

    /// The transport connection was closed, mid-operation
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// A fixed-size buffer or slot table could not grow to satisfy a request
    #[error("allocation failed: {0}")]
    AllocationFailure(String),

    /// Internal runtime error with no more specific classification
    #[error("internal error: {0}")]
    Internal(String),

    /// JSON serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// axum transport errors
    #[error("transport error: {0}")]
    Axum(#[from] axum::Error),
}

impl RuntimeError {
    /// The JSON-RPC 2.0 error code this error maps to on the wire.
    ///
    /// Matches the code table used by the dispatcher when it turns a
    /// [`RuntimeError`] into a [`crate::mcp::types::JsonRpcError`].
    pub fn rpc_code(&self) -> i64 {
        use crate::mcp::types::{
            ERROR_INTERNAL_ERROR, ERROR_INVALID_PARAMS, ERROR_METHOD_NOT_FOUND,
            ERROR_RATE_LIMITED, ERROR_UNAUTHORIZED,
        };
        match self {
            RuntimeError::InvalidParams { .. }
            | RuntimeError::TemplateMismatch(_)
            | RuntimeError::TypeMismatch { .. }
            | RuntimeError::MissingParameter(_) => ERROR_INVALID_PARAMS,
            RuntimeError::ToolNotFound(_)
            | RuntimeError::ResourceNotFound(_)
            | RuntimeError::NoRouteMatched(_) => ERROR_METHOD_NOT_FOUND,
            RuntimeError::Unauthorized(_) => ERROR_UNAUTHORIZED,
            RuntimeError::RateLimited(_) => ERROR_RATE_LIMITED,
            _ => ERROR_INTERNAL_ERROR,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = anyhow::Result<T>;
