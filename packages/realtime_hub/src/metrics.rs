//! Hub metrics for observability
//!
//! Counters are bumped from the control loop and the connection actors; the
//! registry itself is never read to produce them.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct HubMetrics {
    // Connection metrics
    /// Connections currently registered
    pub active_connections: AtomicU64,
    /// Connections registered since start
    pub total_connections: AtomicU64,
    /// Entries replaced by a newer connection for the same user
    pub superseded_connections: AtomicU64,
    /// Connections force-closed because their outbound queue was full or gone
    pub evictions: AtomicU64,

    // Message metrics
    /// Envelopes pushed onto a recipient's queue
    pub messages_routed: AtomicU64,
    /// Private messages whose recipient was not connected
    pub messages_undeliverable: AtomicU64,
    /// Inbound frames that failed to decode
    pub frames_rejected: AtomicU64,
    /// Envelopes of a kind the router does not act on
    pub envelopes_ignored: AtomicU64,

    start_time: Option<Instant>,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub(crate) fn connection_registered(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_superseded(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        self.superseded_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_removed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_evicted(&self) {
        self.connection_removed();
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_routed(&self) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_undeliverable(&self) {
        self.messages_undeliverable.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn envelope_ignored(&self) {
        self.envelopes_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                superseded: self.superseded_connections.load(Ordering::Relaxed),
                evicted: self.evictions.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                routed: self.messages_routed.load(Ordering::Relaxed),
                undeliverable: self.messages_undeliverable.load(Ordering::Relaxed),
                frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
                ignored: self.envelopes_ignored.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubMetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub superseded: u64,
    pub evicted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub routed: u64,
    pub undeliverable: u64,
    pub frames_rejected: u64,
    pub ignored: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_counts_as_removal() {
        let m = HubMetrics::new();
        m.connection_registered();
        m.connection_registered();
        m.connection_evicted();

        let snap = m.snapshot();
        assert_eq!(snap.connections.active, 1);
        assert_eq!(snap.connections.total, 2);
        assert_eq!(snap.connections.evicted, 1);
    }

    #[test]
    fn test_supersede_keeps_total() {
        let m = HubMetrics::new();
        m.connection_registered();
        m.connection_registered();
        m.connection_superseded();

        let snap = m.snapshot();
        assert_eq!(snap.connections.active, 1);
        assert_eq!(snap.connections.total, 2);
        assert_eq!(snap.connections.superseded, 1);
    }

    #[test]
    fn test_default_has_no_uptime() {
        assert_eq!(HubMetrics::default().uptime_secs(), 0);
    }
}
