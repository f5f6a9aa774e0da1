//! Per-client metrics
//!
//! Plain atomic counters updated by the engine task and read by anyone
//! holding the client handle. `snapshot()` returns a serializable copy.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Thread-safe counters for one Bayeux client
#[derive(Debug)]
pub struct ClientMetrics {
    // Traffic
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    outgoing_vetoes: AtomicU64,
    incoming_vetoes: AtomicU64,
    deserialize_failures: AtomicU64,
    heartbeats_sent: AtomicU64,
    publishes_acknowledged: AtomicU64,
    publishes_failed: AtomicU64,

    // Session
    connected: AtomicBool,
    handshakes_attempted: AtomicU64,
    sessions_established: AtomicU64,
    handshake_failures: AtomicU64,
    connection_losses: AtomicU64,
    reconnect_attempts: AtomicU64,
    session_start: AtomicU64,
    last_heartbeat: AtomicU64,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            outgoing_vetoes: AtomicU64::new(0),
            incoming_vetoes: AtomicU64::new(0),
            deserialize_failures: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
            publishes_acknowledged: AtomicU64::new(0),
            publishes_failed: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            handshakes_attempted: AtomicU64::new(0),
            sessions_established: AtomicU64::new(0),
            handshake_failures: AtomicU64::new(0),
            connection_losses: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            session_start: AtomicU64::new(0),
            last_heartbeat: AtomicU64::new(0),
        }
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn outgoing_vetoed(&self) {
        self.outgoing_vetoes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incoming_vetoed(&self) {
        self.incoming_vetoes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deserialize_failed(&self) {
        self.deserialize_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        self.last_heartbeat
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn publish_completed(&self, success: bool) {
        if success {
            self.publishes_acknowledged.fetch_add(1, Ordering::Relaxed);
        } else {
            self.publishes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn handshake_started(&self) {
        self.handshakes_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_established(&self) {
        self.sessions_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        self.session_start
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connection_losses.fetch_add(1, Ordering::Relaxed);
        self.session_ended();
    }

    /// Session over without counting a loss (explicit disconnect)
    pub fn session_ended(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.session_start.store(0, Ordering::Relaxed);
    }

    pub fn reconnect_attempted(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Calculate session duration (pure function)
    fn session_duration(&self, now: u64) -> u64 {
        let start = self.session_start.load(Ordering::Relaxed);
        if self.connected.load(Ordering::Relaxed) && start > 0 {
            now.saturating_sub(start)
        } else {
            0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        MetricsSnapshot {
            traffic: TrafficMetrics {
                messages_sent: self.messages_sent.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
                outgoing_vetoes: self.outgoing_vetoes.load(Ordering::Relaxed),
                incoming_vetoes: self.incoming_vetoes.load(Ordering::Relaxed),
                deserialize_failures: self.deserialize_failures.load(Ordering::Relaxed),
                heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
                publishes_acknowledged: self.publishes_acknowledged.load(Ordering::Relaxed),
                publishes_failed: self.publishes_failed.load(Ordering::Relaxed),
            },
            session: SessionMetrics {
                connected: self.connected.load(Ordering::Relaxed),
                handshakes_attempted: self.handshakes_attempted.load(Ordering::Relaxed),
                sessions_established: self.sessions_established.load(Ordering::Relaxed),
                handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
                connection_losses: self.connection_losses.load(Ordering::Relaxed),
                reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
                last_heartbeat: self.last_heartbeat.load(Ordering::Relaxed),
                session_duration_seconds: self.session_duration(now),
            },
            timestamp: now,
        }
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub traffic: TrafficMetrics,
    pub session: SessionMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrafficMetrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub outgoing_vetoes: u64,
    pub incoming_vetoes: u64,
    pub deserialize_failures: u64,
    pub heartbeats_sent: u64,
    pub publishes_acknowledged: u64,
    pub publishes_failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionMetrics {
    pub connected: bool,
    pub handshakes_attempted: u64,
    pub sessions_established: u64,
    pub handshake_failures: u64,
    pub connection_losses: u64,
    pub reconnect_attempts: u64,
    pub last_heartbeat: u64,
    pub session_duration_seconds: u64,
}

/// Seconds since the Unix epoch, 0 if the clock is before it
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_zero() {
        let snapshot = ClientMetrics::new().snapshot();
        assert_eq!(snapshot.traffic.messages_sent, 0);
        assert_eq!(snapshot.session.handshakes_attempted, 0);
        assert!(!snapshot.session.connected);
        assert_eq!(snapshot.session.session_duration_seconds, 0);
        assert!(snapshot.timestamp > 0);
    }

    #[test]
    fn test_session_lifecycle_counters() {
        let metrics = ClientMetrics::new();
        metrics.handshake_started();
        metrics.handshake_failed();
        metrics.handshake_started();
        metrics.session_established();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.session.handshakes_attempted, 2);
        assert_eq!(snapshot.session.handshake_failures, 1);
        assert_eq!(snapshot.session.sessions_established, 1);
        assert!(snapshot.session.connected);

        metrics.connection_lost();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.session.connection_losses, 1);
        assert!(!snapshot.session.connected);
    }

    #[test]
    fn test_traffic_counters() {
        let metrics = ClientMetrics::new();
        metrics.message_sent();
        metrics.message_sent();
        metrics.message_received();
        metrics.outgoing_vetoed();
        metrics.incoming_vetoed();
        metrics.deserialize_failed();
        metrics.heartbeat_sent();
        metrics.publish_completed(true);
        metrics.publish_completed(false);

        let traffic = metrics.snapshot().traffic;
        assert_eq!(traffic.messages_sent, 2);
        assert_eq!(traffic.messages_received, 1);
        assert_eq!(traffic.outgoing_vetoes, 1);
        assert_eq!(traffic.incoming_vetoes, 1);
        assert_eq!(traffic.deserialize_failures, 1);
        assert_eq!(traffic.heartbeats_sent, 1);
        assert_eq!(traffic.publishes_acknowledged, 1);
        assert_eq!(traffic.publishes_failed, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = ClientMetrics::new();
        metrics.message_sent();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["traffic"]["messages_sent"], 1);
        assert_eq!(json["session"]["connected"], false);
    }
}
