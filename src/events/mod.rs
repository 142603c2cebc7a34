//! Event & scorecard pipeline.
//!
//! Each flow emits [`Event`]s into one bounded [`EventBus`]. A single pump
//! task drains the bus and fans out to three consumers: the JSONL log sink,
//! the dashboard broadcast, and the scorecard aggregator. Saturation drops
//! the oldest non-error event, counts the drop, and warns at most once per
//! second — the data path never blocks on observability.

pub mod scorecard;
pub mod sink;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

use self::scorecard::Scorecard;
use self::sink::EventLogSink;

/// Default bus capacity; the contract is "at least 1024".
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Per-subscriber dashboard buffer; laggards beyond it are dropped.
pub const DASHBOARD_SUBSCRIBER_BUFFER: usize = 256;

// ============================================================================
// Event record
// ============================================================================

/// Flow lifecycle phase an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPhase {
    /// Request accepted and classified.
    Request,
    /// Response completed (upstream, playback, or synthesized).
    Response,
    /// Chaos was applied to the flow.
    Chaos,
    /// A strategy failed; the flow continued.
    Error,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// One structured per-flow record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// RFC 3339 timestamp.
    pub t: String,
    /// Sequence number from the global atomic counter shared with tape
    /// entries; strictly increasing within one flow's events.
    pub seq: u64,
    /// Lifecycle phase.
    pub phase: EventPhase,
    /// Classified traffic type wire name.
    pub traffic_type: String,
    /// Classified traffic subtype wire name.
    pub traffic_subtype: String,
    /// Agent role, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
    /// Request URL after PII redaction.
    pub url_redacted: String,
    /// HTTP method.
    pub method: String,
    /// Response status, for response-phase events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Scenario names applied so far, in order.
    pub applied_strategies: Vec<String>,
    /// Whether any strategy mutated the flow.
    pub chaos_applied: bool,
    /// Milliseconds since the flow entered the request hook.
    pub latency_ms: u64,
    /// Error code, for error-phase events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Kind tags of applied strategies (scorecard accounting).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attack_tags: Vec<String>,
    /// PII substitutions made while redacting this event.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub pii_hits: u64,
}

// ============================================================================
// Bounded bus
// ============================================================================

/// Bounded multi-producer event queue with drop-oldest backpressure.
///
/// Error-phase events are never the drop victim; when the queue is full of
/// errors the incoming non-error event is dropped instead.
pub struct EventBus {
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    last_drop_warn: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Creates a bus; capacities below the contract floor are raised to it.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(DEFAULT_BUS_CAPACITY))),
            notify: Notify::new(),
            capacity: capacity.max(DEFAULT_BUS_CAPACITY),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            last_drop_warn: Mutex::new(None),
        })
    }

    /// Publishes an event, dropping the oldest non-error event on overflow.
    pub fn publish(&self, event: Event) {
        {
            let mut queue = self.queue.lock().expect("event queue poisoned");
            if queue.len() >= self.capacity {
                let victim = queue.iter().position(|e| e.phase != EventPhase::Error);
                match victim {
                    Some(index) => {
                        queue.remove(index);
                    }
                    None if event.phase != EventPhase::Error => {
                        // Queue is all errors; shed the incoming event.
                        self.count_drop();
                        return;
                    }
                    None => {
                        queue.pop_front();
                    }
                }
                self.count_drop();
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
        metrics::counter!("chaosproxy_events_published_total").increment(1);
    }

    fn count_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("chaosproxy_events_dropped_total").increment(1);

        let mut last = self.last_drop_warn.lock().expect("drop warn lock poisoned");
        let now = Instant::now();
        if last.map_or(true, |t| now.duration_since(t).as_secs() >= 1) {
            *last = Some(now);
            warn!(
                dropped_total = self.dropped.load(Ordering::Relaxed),
                "event bus saturated; dropping oldest non-error events"
            );
        }
    }

    /// Receives the next event; `None` once closed and drained.
    pub async fn next(&self) -> Option<Event> {
        loop {
            // Arm the notification before checking the queue so a publish
            // racing this check cannot be missed.
            let notified = self.notify.notified();
            if let Some(event) = self.queue.lock().expect("event queue poisoned").pop_front() {
                return Some(event);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Closes the bus; `next()` drains the remainder then returns `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Total events dropped so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Handles shared by the pipeline's producers and the control plane.
#[derive(Clone)]
pub struct EventPipeline {
    /// The bounded bus flows publish into.
    pub bus: Arc<EventBus>,
    /// Dashboard fan-out; the control plane subscribes SSE clients here.
    pub dashboard: broadcast::Sender<Event>,
    /// Scorecard aggregator.
    pub scorecard: Arc<Scorecard>,
}

impl EventPipeline {
    /// Builds the pipeline and spawns its single pump task.
    ///
    /// The pump is the only consumer of the bus and the only writer to the
    /// scorecard; it copies each event to the log sink and the dashboard
    /// broadcast. It exits when the bus is closed and drained.
    #[must_use]
    pub fn spawn(bus: Arc<EventBus>, sink: EventLogSink) -> (Self, JoinHandle<()>) {
        let (dashboard, _) = broadcast::channel(DASHBOARD_SUBSCRIBER_BUFFER);
        let scorecard = Arc::new(Scorecard::new());

        let pipeline = Self {
            bus: Arc::clone(&bus),
            dashboard: dashboard.clone(),
            scorecard: Arc::clone(&scorecard),
        };

        let pump = tokio::spawn(async move {
            while let Some(event) = bus.next().await {
                scorecard.observe(&event);
                sink.write(&event);
                // Send fails only when no subscriber is connected; that is
                // the normal idle state, not an error.
                let _ = dashboard.send(event);
            }
            scorecard.set_events_dropped(bus.dropped());
            sink.flush();
        });

        (pipeline, pump)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// A minimal event for pipeline tests.
    #[must_use]
    pub fn event(seq: u64, phase: EventPhase) -> Event {
        Event {
            t: "2026-01-01T00:00:00Z".to_string(),
            seq,
            phase,
            traffic_type: "TOOL_CALL".to_string(),
            traffic_subtype: "none".to_string(),
            agent_role: None,
            url_redacted: "http://x/a".to_string(),
            method: "GET".to_string(),
            status: None,
            applied_strategies: Vec::new(),
            chaos_applied: false,
            latency_ms: 0,
            error_code: None,
            attack_tags: Vec::new(),
            pii_hits: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::event;
    use super::*;

    #[tokio::test]
    async fn publish_then_next_in_order() {
        let bus = EventBus::new(DEFAULT_BUS_CAPACITY);
        bus.publish(event(0, EventPhase::Request));
        bus.publish(event(1, EventPhase::Response));
        assert_eq!(bus.next().await.unwrap().seq, 0);
        assert_eq!(bus.next().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let bus = EventBus::new(DEFAULT_BUS_CAPACITY);
        bus.publish(event(0, EventPhase::Request));
        bus.close();
        assert!(bus.next().await.is_some());
        assert!(bus.next().await.is_none());
    }

    #[tokio::test]
    async fn overflow_drops_oldest_non_error() {
        let bus = EventBus::new(DEFAULT_BUS_CAPACITY);
        // Fill to capacity: first an error event, then plain ones.
        bus.publish(event(0, EventPhase::Error));
        for i in 1..DEFAULT_BUS_CAPACITY as u64 {
            bus.publish(event(i, EventPhase::Request));
        }
        // One more: the oldest NON-error (seq 1) is the victim.
        bus.publish(event(9999, EventPhase::Request));
        assert_eq!(bus.dropped(), 1);

        let first = bus.next().await.unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(first.phase, EventPhase::Error);
        let second = bus.next().await.unwrap();
        assert_eq!(second.seq, 2);
    }

    #[tokio::test]
    async fn waiting_consumer_wakes_on_publish() {
        let bus = EventBus::new(DEFAULT_BUS_CAPACITY);
        let waiter = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.next().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        bus.publish(event(42, EventPhase::Request));
        let received = waiter.await.unwrap().unwrap();
        assert_eq!(received.seq, 42);
    }

    #[tokio::test]
    async fn pipeline_fans_out_to_dashboard() {
        let bus = EventBus::new(DEFAULT_BUS_CAPACITY);
        let sink = EventLogSink::to_vec();
        let (pipeline, pump) = EventPipeline::spawn(Arc::clone(&bus), sink);

        let mut rx = pipeline.dashboard.subscribe();
        bus.publish(event(7, EventPhase::Chaos));
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.seq, 7);

        bus.close();
        pump.await.unwrap();
        assert_eq!(pipeline.scorecard.snapshot().chaos_injections, 1);
    }

    #[test]
    fn event_serializes_compactly() {
        let e = event(3, EventPhase::Request);
        let json = serde_json::to_string(&e).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["phase"], "request");
        assert_eq!(parsed["seq"], 3);
        // Optional empties are omitted.
        assert!(parsed.get("status").is_none());
        assert!(parsed.get("error_code").is_none());
        assert!(parsed.get("attack_tags").is_none());
    }
}
