//! WebSocket server transport
//!
//! A bitmap-indexed client table tracks which of `max_clients` slots are
//! occupied; slot state itself lives behind `num_segments` independent
//! mutexes so unrelated clients never contend on the same lock. A
//! separate global mutex guards the bitmap and aggregate counters and is
//! always acquired before any segment lock when both are needed — never
//! two segment locks at once. Each connection is driven by its own task,
//! which reads, assembles, dispatches, and writes the reply itself; a
//! background sweep pings idle clients and tears down ones that stop
//! answering.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{RateLimiter, Verdict};
use crate::config::RuntimeConfig;
use crate::dispatcher;
use crate::error::RuntimeError;
use crate::handler::HandlerRegistry;

/// WebSocket close code for a policy violation (RFC 6455 §7.4.1), used
/// when a connection is closed for exceeding the rate limit.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Fixed-size buffers at or under this size are reused across messages
/// rather than freed; larger ones are allocated directly.
const POOL_BUFFER_SIZE: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Inactive,
    Active,
    Closing,
}

struct ClientSlot {
    state: SlotState,
    client_id: Option<String>,
    last_activity_at: Instant,
    outstanding_pings: u32,
    ping_tx: Option<mpsc::UnboundedSender<()>>,
    close_tx: Option<mpsc::UnboundedSender<()>>,
}

impl ClientSlot {
    fn inactive() -> Self {
        ClientSlot {
            state: SlotState::Inactive,
            client_id: None,
            last_activity_at: Instant::now(),
            outstanding_pings: 0,
            ping_tx: None,
            close_tx: None,
        }
    }
}

struct Global {
    bitmap: Vec<u32>,
    active_count: usize,
    rejected_connections: u64,
    total_connections: u64,
}

/// The client slot table: a bitmap of occupancy plus `num_segments`
/// independently-locked slot vectors. Slot `i` lives in
/// `segments[i % num_segments]` at position `i / num_segments`.
pub struct WsClientTable {
    max_clients: usize,
    num_segments: usize,
    segments: Vec<Mutex<Vec<ClientSlot>>>,
    global: Mutex<Global>,
}

impl WsClientTable {
    pub fn new(max_clients: usize, num_segments: usize) -> Self {
        let num_segments = num_segments.max(1);
        let words = max_clients.div_ceil(32).max(1);
        let segments = (0..num_segments)
            .map(|segment_index| {
                let segment_size = (0..max_clients)
                    .filter(|i| i % num_segments == segment_index)
                    .count();
                Mutex::new((0..segment_size).map(|_| ClientSlot::inactive()).collect())
            })
            .collect();

        WsClientTable {
            max_clients,
            num_segments,
            segments,
            global: Mutex::new(Global {
                bitmap: vec![0u32; words],
                active_count: 0,
                rejected_connections: 0,
                total_connections: 0,
            }),
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn active_count(&self) -> usize {
        self.global.lock().expect("ws global lock poisoned").active_count
    }

    pub fn rejected_connections(&self) -> u64 {
        self.global.lock().expect("ws global lock poisoned").rejected_connections
    }

    pub fn total_connections(&self) -> u64 {
        self.global.lock().expect("ws global lock poisoned").total_connections
    }

    fn slot_location(&self, index: usize) -> (usize, usize) {
        (index % self.num_segments, index / self.num_segments)
    }

    /// Claim a free slot for a newly accepted connection, or
    /// `AllocationFailure` if the table is at capacity.
    pub fn allocate(
        &self,
        client_id: String,
        ping_tx: mpsc::UnboundedSender<()>,
        close_tx: mpsc::UnboundedSender<()>,
    ) -> Result<usize, RuntimeError> {
        let mut global = self.global.lock().expect("ws global lock poisoned");
        let index = match find_free_bit(&global.bitmap, self.max_clients) {
            Some(index) => index,
            None => {
                global.rejected_connections += 1;
                return Err(RuntimeError::AllocationFailure(format!(
                    "websocket client table has no free slot among {} max clients",
                    self.max_clients
                )));
            }
        };
        set_bit(&mut global.bitmap, index);
        global.active_count += 1;
        global.total_connections += 1;

        let (segment_index, position) = self.slot_location(index);
        let mut slots = self.segments[segment_index]
            .lock()
            .expect("ws segment lock poisoned");
        slots[position] = ClientSlot {
            state: SlotState::Active,
            client_id: Some(client_id),
            last_activity_at: Instant::now(),
            outstanding_pings: 0,
            ping_tx: Some(ping_tx),
            close_tx: Some(close_tx),
        };
        Ok(index)
    }

    /// Release a slot back to the free pool.
    pub fn release(&self, index: usize) {
        let mut global = self.global.lock().expect("ws global lock poisoned");
        clear_bit(&mut global.bitmap, index);
        global.active_count = global.active_count.saturating_sub(1);

        let (segment_index, position) = self.slot_location(index);
        let mut slots = self.segments[segment_index]
            .lock()
            .expect("ws segment lock poisoned");
        slots[position] = ClientSlot::inactive();
    }

    /// Refresh a slot's recency on a received message.
    pub fn touch(&self, index: usize) {
        let (segment_index, position) = self.slot_location(index);
        let mut slots = self.segments[segment_index]
            .lock()
            .expect("ws segment lock poisoned");
        slots[position].last_activity_at = Instant::now();
    }

    /// Clear a slot's failed-ping counter on a received pong.
    pub fn reset_pings(&self, index: usize) {
        let (segment_index, position) = self.slot_location(index);
        let mut slots = self.segments[segment_index]
            .lock()
            .expect("ws segment lock poisoned");
        slots[position].outstanding_pings = 0;
    }

    /// Ping every active slot idle longer than `ping_timeout`, and close
    /// any slot whose outstanding ping count has reached
    /// `max_ping_failures`. A slot that has heard from its client more
    /// recently than `ping_timeout` is left alone entirely. Acquires the
    /// global lock first, then visits segments one at a time.
    pub fn sweep(&self, max_ping_failures: u32, ping_timeout: Duration) {
        let now = Instant::now();
        let _global = self.global.lock().expect("ws global lock poisoned");
        for segment in &self.segments {
            let mut slots = segment.lock().expect("ws segment lock poisoned");
            for slot in slots.iter_mut() {
                if slot.state != SlotState::Active {
                    continue;
                }
                if now.duration_since(slot.last_activity_at) < ping_timeout {
                    continue;
                }
                slot.outstanding_pings += 1;
                if slot.outstanding_pings >= max_ping_failures {
                    slot.state = SlotState::Closing;
                    if let Some(close_tx) = &slot.close_tx {
                        let _ = close_tx.send(());
                    }
                } else if let Some(ping_tx) = &slot.ping_tx {
                    let _ = ping_tx.send(());
                }
            }
        }
    }
}

fn find_free_bit(bitmap: &[u32], max_clients: usize) -> Option<usize> {
    for (word_index, word) in bitmap.iter().enumerate() {
        if *word != u32::MAX {
            let free_bit = (!word).trailing_zeros() as usize;
            let index = word_index * 32 + free_bit;
            if index < max_clients {
                return Some(index);
            }
        }
    }
    None
}

fn set_bit(bitmap: &mut [u32], index: usize) {
    bitmap[index / 32] |= 1 << (index % 32);
}

fn clear_bit(bitmap: &mut [u32], index: usize) {
    bitmap[index / 32] &= !(1 << (index % 32));
}

/// Accumulates one client's inbound bytes. Axum reassembles WebSocket
/// fragments into complete text/binary messages already, so this
/// mainly owns the growth/alignment bookkeeping and the optional
/// length-prefix strip; the buffer itself is reused across messages up
/// to `POOL_BUFFER_SIZE`.
struct ReceiveAssembler {
    buffer: Vec<u8>,
    length_prefix_fast_path: bool,
}

impl ReceiveAssembler {
    fn new(length_prefix_fast_path: bool) -> Self {
        ReceiveAssembler {
            buffer: Vec::with_capacity(POOL_BUFFER_SIZE),
            length_prefix_fast_path,
        }
    }

    /// Ingest one complete message, stripping a plausible length
    /// prefix, and return the payload bytes.
    fn ingest(&mut self, mut payload: Vec<u8>) -> Vec<u8> {
        if self.length_prefix_fast_path && payload.len() >= 4 {
            let declared =
                u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
            if declared == payload.len() - 4 {
                payload.drain(0..4);
            }
        }
        self.grow_to_fit(payload.len());
        self.buffer.clear();
        self.buffer.extend_from_slice(&payload);
        self.buffer.clone()
    }

    fn grow_to_fit(&mut self, needed: usize) {
        if self.buffer.capacity() >= needed {
            return;
        }
        let grown = ((self.buffer.capacity() as f64 * 1.5) as usize).max(needed);
        let aligned = align_up(grown, POOL_BUFFER_SIZE);
        self.buffer.reserve(aligned.saturating_sub(self.buffer.capacity()));
    }
}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

#[derive(Clone)]
struct WsState {
    handlers: Arc<HandlerRegistry>,
    table: Arc<WsClientTable>,
    config: Arc<RuntimeConfig>,
    rate_limiter: Arc<RateLimiter>,
}

/// Run the WebSocket server transport until `shutdown` is cancelled.
pub async fn serve(
    config: RuntimeConfig,
    handlers: HandlerRegistry,
    shutdown: CancellationToken,
) -> crate::Result<()> {
    let table = Arc::new(WsClientTable::new(
        config.websocket.max_clients,
        config.websocket.num_segments,
    ));
    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit.max_requests,
        Duration::from_secs(config.rate_limit.window_secs),
        64,
    ));
    let state = WsState {
        handlers: Arc::new(handlers),
        table: table.clone(),
        config: Arc::new(config.clone()),
        rate_limiter,
    };

    let app = Router::new()
        .route("/ws", get(handle_upgrade))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.websocket.bind_addr)
        .await
        .map_err(RuntimeError::Io)?;
    tracing::info!(addr = %config.websocket.bind_addr, "websocket transport listening");

    let sweep = spawn_ping_sweep(
        table.clone(),
        Duration::from_secs(config.websocket.ping_interval_secs),
        config.websocket.max_ping_failures,
        Duration::from_secs(config.websocket.ping_timeout_secs),
        shutdown.clone(),
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .map_err(|e| RuntimeError::Internal(e.to_string()))?;

    sweep.abort();
    Ok(())
}

fn spawn_ping_sweep(
    table: Arc<WsClientTable>,
    interval: Duration,
    max_ping_failures: u32,
    ping_timeout: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => break,
            }
            table.sweep(max_ping_failures, ping_timeout);
        }
    })
}

async fn handle_upgrade(State(state): State<WsState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_task(socket, state))
}

/// Close a connection that has exceeded the rate limit with a
/// policy-violation close frame.
async fn close_for_rate_limit(socket: &mut WebSocket, client_id: &str) {
    let err = RuntimeError::RateLimited(format!("websocket client {client_id} exceeded the rate limit"));
    tracing::warn!(error = %err, client_id = %client_id, "closing websocket for rate limit");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: err.to_string().into(),
        })))
        .await;
}

async fn client_task(mut socket: WebSocket, state: WsState) {
    let client_id = uuid::Uuid::new_v4().simple().to_string();
    let (ping_tx, mut ping_rx) = mpsc::unbounded_channel::<()>();
    let (close_tx, mut close_rx) = mpsc::unbounded_channel::<()>();

    let slot_index = match state.table.allocate(client_id.clone(), ping_tx, close_tx) {
        Ok(index) => index,
        Err(e) => {
            tracing::warn!(error = %e, "websocket client rejected, table at capacity");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    tracing::info!(client_id = %client_id, slot = slot_index, "websocket client connected");

    let mut assembler = ReceiveAssembler::new(state.config.websocket.length_prefix_fast_path);

    loop {
        tokio::select! {
            frame = socket.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        state.table.touch(slot_index);
                        if let Verdict::Deny = state.rate_limiter.check(&client_id) {
                            close_for_rate_limit(&mut socket, &client_id).await;
                            break;
                        }
                        let payload = assembler.ingest(text.into_bytes());
                        if let Some(response) = dispatcher::dispatch_bytes(&state.handlers, &payload).await {
                            let text = String::from_utf8_lossy(&response).into_owned();
                            if let Err(e) = socket.send(Message::Text(text)).await {
                                let err = RuntimeError::TransportClosed(format!(
                                    "websocket send to client {client_id} failed: {e}"
                                ));
                                tracing::warn!(error = %err, "websocket send failed");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        state.table.touch(slot_index);
                        if let Verdict::Deny = state.rate_limiter.check(&client_id) {
                            close_for_rate_limit(&mut socket, &client_id).await;
                            break;
                        }
                        let payload = assembler.ingest(bytes);
                        if let Some(response) = dispatcher::dispatch_bytes(&state.handlers, &payload).await {
                            if let Err(e) = socket.send(Message::Binary(response)).await {
                                let err = RuntimeError::TransportClosed(format!(
                                    "websocket send to client {client_id} failed: {e}"
                                ));
                                tracing::warn!(error = %err, "websocket send failed");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        state.table.reset_pings(slot_index);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
            _ = ping_rx.recv() => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            _ = close_rx.recv() => break,
        }
    }

    state.table.release(slot_index);
    tracing::info!(client_id = %client_id, slot = slot_index, "websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender_pair() -> (mpsc::UnboundedSender<()>, mpsc::UnboundedSender<()>) {
        (mpsc::unbounded_channel().0, mpsc::unbounded_channel().0)
    }

    #[test]
    fn slot_reuse_matches_the_accept_reject_reuse_cycle() {
        let table = WsClientTable::new(2, 1);
        let (ping_a, close_a) = sender_pair();
        let (ping_b, close_b) = sender_pair();
        let (ping_c, close_c) = sender_pair();

        let first = table.allocate("a".to_string(), ping_a, close_a).unwrap();
        let second = table.allocate("b".to_string(), ping_b, close_b).unwrap();
        assert_eq!(table.active_count(), 2);
        assert!(table.allocate("c".to_string(), ping_c, close_c).is_err());
        assert_eq!(table.rejected_connections(), 1);

        table.release(first);
        assert_eq!(table.active_count(), 1);

        let (ping_d, close_d) = sender_pair();
        let reused = table.allocate("d".to_string(), ping_d, close_d).unwrap();
        assert_eq!(reused, first);
        assert_eq!(table.active_count(), 2);
        assert_eq!(table.total_connections(), 3);
        let _ = second;
    }

    #[test]
    fn last_slot_is_allocatable_and_table_then_rejects() {
        let table = WsClientTable::new(1, 4);
        let (ping, close) = sender_pair();
        let index = table.allocate("only".to_string(), ping, close).unwrap();
        assert_eq!(index, 0);
        let (ping2, close2) = sender_pair();
        assert!(table.allocate("overflow".to_string(), ping2, close2).is_err());
    }

    #[test]
    fn sweep_closes_slots_past_max_ping_failures() {
        let table = WsClientTable::new(1, 1);
        let (ping_tx, mut ping_rx) = mpsc::unbounded_channel::<()>();
        let (close_tx, mut close_rx) = mpsc::unbounded_channel::<()>();
        table.allocate("a".to_string(), ping_tx, close_tx).unwrap();

        table.sweep(3, Duration::ZERO);
        assert!(ping_rx.try_recv().is_ok());
        assert!(close_rx.try_recv().is_err());

        table.sweep(3, Duration::ZERO);
        table.sweep(3, Duration::ZERO);
        assert!(close_rx.try_recv().is_ok());
    }

    #[test]
    fn sweep_leaves_recently_active_slots_alone() {
        let table = WsClientTable::new(1, 1);
        let (ping_tx, mut ping_rx) = mpsc::unbounded_channel::<()>();
        let (close_tx, _close_rx) = mpsc::unbounded_channel::<()>();
        let index = table.allocate("a".to_string(), ping_tx, close_tx).unwrap();
        table.touch(index);

        table.sweep(3, Duration::from_secs(3600));
        assert!(ping_rx.try_recv().is_err());
    }

    #[test]
    fn length_prefix_fast_path_strips_a_matching_prefix() {
        let mut assembler = ReceiveAssembler::new(true);
        let payload = b"hello";
        let mut framed = (payload.len() as u32).to_be_bytes().to_vec();
        framed.extend_from_slice(payload);
        assert_eq!(assembler.ingest(framed), payload.to_vec());
    }

    #[test]
    fn length_prefix_fast_path_leaves_non_matching_bytes_alone() {
        let mut assembler = ReceiveAssembler::new(true);
        let payload = b"\x00\x00\x00\x00rest".to_vec();
        assert_eq!(assembler.ingest(payload.clone()), payload);
    }

    #[test]
    fn align_up_rounds_to_the_next_multiple() {
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
    }
}
