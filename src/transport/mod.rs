//! Transports: SSE stream context plus the Streamable HTTP and
//! WebSocket server transports built on top of it.

pub mod sse;
pub mod streamable_http;
pub mod ws_server;

pub use sse::{SseEvent, SseStream};
