//! Server metrics for observability
//!
//! Counters for front-end connections, writer leases and broadcast fan-out.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently open WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,

    // Frame metrics
    /// Envelopes received from clients
    pub frames_received: AtomicU64,
    /// Replies sent back to the requesting client
    pub replies_sent: AtomicU64,
    /// Error replies (any kind)
    pub error_replies: AtomicU64,

    // Lease metrics
    pub leases_granted: AtomicU64,
    pub leases_released: AtomicU64,
    /// Leases dropped because the connection went away or idled out
    pub leases_abandoned: AtomicU64,

    // Write / broadcast metrics
    pub writes_committed: AtomicU64,
    pub broadcasts_attempted: AtomicU64,
    pub broadcasts_delivered: AtomicU64,
    /// Broadcast frames skipped (closed or full channel)
    pub broadcasts_skipped: AtomicU64,

    // Backend metrics
    /// Backend transport failures (`TCP error` replies and failed connects)
    pub backend_errors: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reply_sent(&self, is_error: bool) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.error_replies.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Lease tracking
    pub fn lease_granted(&self) {
        self.leases_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lease_released(&self) {
        self.leases_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lease_abandoned(&self) {
        self.leases_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_committed(&self, attempted: usize, delivered: usize) {
        self.writes_committed.fetch_add(1, Ordering::Relaxed);
        self.broadcasts_attempted
            .fetch_add(attempted as u64, Ordering::Relaxed);
        self.broadcasts_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.broadcasts_skipped
            .fetch_add(attempted.saturating_sub(delivered) as u64, Ordering::Relaxed);
    }

    pub fn backend_error(&self) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            frames: FrameMetrics {
                received: self.frames_received.load(Ordering::Relaxed),
                replies: self.replies_sent.load(Ordering::Relaxed),
                errors: self.error_replies.load(Ordering::Relaxed),
            },
            leases: LeaseMetrics {
                granted: self.leases_granted.load(Ordering::Relaxed),
                released: self.leases_released.load(Ordering::Relaxed),
                abandoned: self.leases_abandoned.load(Ordering::Relaxed),
            },
            broadcasts: BroadcastMetrics {
                writes_committed: self.writes_committed.load(Ordering::Relaxed),
                attempted: self.broadcasts_attempted.load(Ordering::Relaxed),
                delivered: self.broadcasts_delivered.load(Ordering::Relaxed),
                skipped: self.broadcasts_skipped.load(Ordering::Relaxed),
            },
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub frames: FrameMetrics,
    pub leases: LeaseMetrics,
    pub broadcasts: BroadcastMetrics,
    pub backend_errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub received: u64,
    pub replies: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseMetrics {
    pub granted: u64,
    pub released: u64,
    pub abandoned: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMetrics {
    pub writes_committed: u64,
    pub attempted: u64,
    pub delivered: u64,
    pub skipped: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: u64,
    pub active_leases: u64,
    /// Connections subscribed to broadcasts
    pub listeners: u64,
    pub backend: String,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_tracking() {
        let metrics = ServerMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);

        metrics.connection_closed();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_reply_tracking() {
        let metrics = ServerMetrics::new();
        metrics.frame_received();
        metrics.reply_sent(false);
        metrics.frame_received();
        metrics.reply_sent(true);

        let snap = metrics.snapshot();
        assert_eq!(snap.frames.received, 2);
        assert_eq!(snap.frames.replies, 2);
        assert_eq!(snap.frames.errors, 1);
    }

    #[test]
    fn test_write_committed_counts_skips() {
        let metrics = ServerMetrics::new();
        metrics.write_committed(3, 2);
        metrics.write_committed(1, 1);

        let snap = metrics.snapshot();
        assert_eq!(snap.broadcasts.writes_committed, 2);
        assert_eq!(snap.broadcasts.attempted, 4);
        assert_eq!(snap.broadcasts.delivered, 3);
        assert_eq!(snap.broadcasts.skipped, 1);
    }

    #[test]
    fn test_lease_tracking() {
        let metrics = ServerMetrics::new();
        metrics.lease_granted();
        metrics.lease_granted();
        metrics.lease_released();
        metrics.lease_abandoned();

        let snap = metrics.snapshot();
        assert_eq!(snap.leases.granted, 2);
        assert_eq!(snap.leases.released, 1);
        assert_eq!(snap.leases.abandoned, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = ServerMetrics::new();
        metrics.backend_error();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["backend_errors"], 1);
        assert_eq!(json["connections"]["active"], 0);
        assert!(json["uptime_secs"].is_u64());
    }
}
