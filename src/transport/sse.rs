//! SSE stream context
//!
//! Models one server-sent-events stream as an object with `publish`
//! and `subscribe`, per-subscriber queues drained by the transport's
//! service task — no generator or coroutine machinery needed. Events
//! are held in a fixed-size ring; an auxiliary map gives O(1)
//! `event_id -> position` lookup for replay.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::broadcast;

/// One published SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event_id: u64,
    pub event_type: Option<String>,
    pub data: String,
    pub sequence_number: u64,
}

struct Ring {
    events: VecDeque<SseEvent>,
    index: HashMap<u64, usize>,
    base_offset: usize,
    next_event_id: u64,
    next_sequence_number: u64,
    max_stored_events: usize,
}

impl Ring {
    fn new(max_stored_events: usize) -> Self {
        Ring {
            events: VecDeque::new(),
            index: HashMap::new(),
            base_offset: 0,
            next_event_id: 1,
            next_sequence_number: 1,
            max_stored_events: max_stored_events.max(1),
        }
    }

    fn push(&mut self, event_type: Option<String>, data: String) -> SseEvent {
        let event = SseEvent {
            event_id: self.next_event_id,
            event_type,
            data,
            sequence_number: self.next_sequence_number,
        };
        self.next_event_id += 1;
        self.next_sequence_number += 1;

        if self.events.len() >= self.max_stored_events {
            self.events.pop_front();
            self.base_offset += 1;
        }
        let position = self.base_offset + self.events.len();
        self.events.push_back(event.clone());
        self.index.insert(event.event_id, position);

        // Drop the index entry that just scrolled out of the ring.
        if self.index.len() > self.max_stored_events {
            let evicted_position = self.base_offset - 1;
            self.index.retain(|_, &mut pos| pos != evicted_position);
        }

        event
    }

    /// Events strictly after `last_event_id`, oldest first. Events that
    /// have already scrolled out of the ring are simply not replayed.
    fn events_after(&self, last_event_id: Option<u64>) -> Vec<SseEvent> {
        match last_event_id {
            None => self.events.iter().cloned().collect(),
            Some(id) => match self.index.get(&id) {
                Some(&position) => {
                    let local = position - self.base_offset;
                    self.events.iter().skip(local + 1).cloned().collect()
                }
                None => self.events.iter().cloned().collect(),
            },
        }
    }
}

/// A live SSE stream: a bounded ring of published events plus a
/// broadcast channel that fans new events out to every active
/// subscriber (the per-subscriber queue the transport's service task
/// drains).
pub struct SseStream {
    ring: Mutex<Ring>,
    sender: broadcast::Sender<SseEvent>,
}

impl SseStream {
    pub fn new(max_stored_events: usize) -> Self {
        let (sender, _) = broadcast::channel(max_stored_events.max(1));
        SseStream {
            ring: Mutex::new(Ring::new(max_stored_events)),
            sender,
        }
    }

    /// Publish an event and fan it out to current subscribers. The
    /// handler that calls this returns immediately; delivery happens on
    /// the transport's event loop.
    pub fn publish(&self, event_type: Option<String>, data: String) -> SseEvent {
        let event = self.ring.lock().expect("sse ring lock poisoned").push(event_type, data);
        let _ = self.sender.send(event.clone());
        event
    }

    /// Subscribe to future events, optionally replaying everything
    /// published strictly after `last_event_id` first.
    pub fn subscribe(&self, last_event_id: Option<u64>) -> SseSubscription {
        let receiver = self.sender.subscribe();
        let replay = self
            .ring
            .lock()
            .expect("sse ring lock poisoned")
            .events_after(last_event_id);
        SseSubscription { replay, receiver }
    }
}

/// A subscriber's view of a stream: a replay batch to drain first,
/// followed by live events from the broadcast channel.
pub struct SseSubscription {
    pub replay: Vec<SseEvent>,
    pub receiver: broadcast::Receiver<SseEvent>,
}

/// Render one event in SSE wire format: `id:`/`event:`/`data:` lines
/// terminated by a blank line. Multi-line data produces one `data:`
/// line per input line, preserving order.
pub fn format_sse_event(event: &SseEvent) -> String {
    let mut out = String::new();
    out.push_str(&format!("id: {}\n", event.event_id));
    if let Some(event_type) = &event.event_type {
        out.push_str(&format!("event: {event_type}\n"));
    }
    for line in event.data.split('\n') {
        out.push_str(&format!("data: {line}\n"));
    }
    out.push('\n');
    out
}

/// A heartbeat is a comment-only frame: a line starting with `:` and
/// nothing else, so clients that only parse `data:`/`event:` ignore it.
pub fn format_heartbeat() -> String {
    ": heartbeat\n\n".to_string()
}
