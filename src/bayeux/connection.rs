//! Pure connection state management for the Bayeux client
//!
//! This module contains the connection state type, the reconnect policy and
//! pure decision functions. Nothing here performs I/O; the engine in
//! [`super::client`] feeds events in and acts on the decisions.

use crate::error::BayeuxError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

/// Connection state of a Bayeux session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// No transport, no session
    Disconnected,
    /// Transport opening or handshake in flight
    Handshaking,
    /// Session established, heartbeat running
    Connected,
    /// Explicit disconnect in progress
    Disconnecting,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectReason {
    /// The application called `disconnect()`
    ClientRequested,
    /// The socket was closed underneath us
    TransportClosed { code: Option<u16>, reason: String },
    /// Opening or writing to the socket failed
    TransportFailed(String),
    /// No inbound traffic within the grace period after a heartbeat
    HeartbeatStalled,
    /// The server refused the handshake
    HandshakeRejected(String),
    /// No handshake reply in time
    HandshakeTimeout,
    /// Server advice `reconnect: none`
    ServerAdvisedNone,
}

impl DisconnectReason {
    /// Whether the reconnect policy may be consulted after this reason
    pub fn allows_reconnect(&self) -> bool {
        !matches!(
            self,
            DisconnectReason::ClientRequested | DisconnectReason::ServerAdvisedNone
        )
    }

    /// Error reported to the application for this reason
    pub fn to_error(&self) -> BayeuxError {
        match self {
            DisconnectReason::ClientRequested => BayeuxError::ConnectionLost,
            DisconnectReason::TransportClosed { code, reason } => BayeuxError::transport(match code {
                Some(code) => format!("connection closed ({code}): {reason}"),
                None => format!("connection closed: {reason}"),
            }),
            DisconnectReason::TransportFailed(reason) => BayeuxError::transport(reason.clone()),
            DisconnectReason::HeartbeatStalled => {
                BayeuxError::transport("no reply to heartbeat within grace period")
            }
            DisconnectReason::HandshakeRejected(reason) => {
                BayeuxError::protocol(format!("handshake rejected: {reason}"))
            }
            DisconnectReason::HandshakeTimeout => BayeuxError::protocol("handshake timed out"),
            DisconnectReason::ServerAdvisedNone => {
                BayeuxError::protocol("server advised not to reconnect")
            }
        }
    }
}

/// Caller-configurable reconnection policy
///
/// Disabled by default: a failed handshake or lost link leaves the client
/// Disconnected until the application calls `connect()` again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Maximum consecutive reconnection attempts (0 = never reconnect)
    #[serde(default)]
    pub max_attempts: u32,
    /// Delays in milliseconds for the first attempts
    #[serde(default = "default_backoff_pattern")]
    pub backoff_pattern_ms: Vec<u64>,
    /// Delay used once the pattern is exhausted
    #[serde(default = "default_sustained_delay")]
    pub sustained_delay_ms: u64,
}

fn default_backoff_pattern() -> Vec<u64> {
    vec![250, 500, 1000, 2000]
}

fn default_sustained_delay() -> u64 {
    5000
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            backoff_pattern_ms: default_backoff_pattern(),
            sustained_delay_ms: default_sustained_delay(),
        }
    }
}

impl ReconnectPolicy {
    /// Policy that retries up to `max_attempts` times with the default backoff
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Backoff delay for the given 1-based attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let millis = self
            .backoff_pattern_ms
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay_ms);
        Duration::from_millis(millis)
    }

    /// Sum of all delays if every attempt is used
    pub fn calculate_max_total_time(&self) -> Duration {
        (1..=self.max_attempts)
            .map(|attempt| self.calculate_backoff_delay(attempt))
            .sum()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.is_enabled() && self.sustained_delay_ms == 0 && self.backoff_pattern_ms.is_empty() {
            return Err("reconnect needs a backoff_pattern_ms or sustained_delay_ms > 0".to_string());
        }
        Ok(())
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Schedule another handshake after `delay`
    Proceed { attempt: u32, delay: Duration },
    /// Policy is disabled
    AbortDisabled,
    /// The disconnect reason rules out reconnecting
    AbortNotAllowed,
    /// Every attempt has been used
    AbortMaxAttemptsExceeded,
}

/// Pure connection decision logic
pub struct ConnectionMonitor;

impl ConnectionMonitor {
    /// Decide whether to schedule another handshake (pure function)
    pub fn should_attempt_reconnection(
        attempts_so_far: u32,
        policy: &ReconnectPolicy,
        reason: &DisconnectReason,
    ) -> ReconnectionDecision {
        if !reason.allows_reconnect() {
            return ReconnectionDecision::AbortNotAllowed;
        }
        if !policy.is_enabled() {
            return ReconnectionDecision::AbortDisabled;
        }
        if attempts_so_far >= policy.max_attempts {
            return ReconnectionDecision::AbortMaxAttemptsExceeded;
        }

        let attempt = attempts_so_far + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay: policy.calculate_backoff_delay(attempt),
        }
    }

    /// `connect()` only starts a handshake from Disconnected (pure function)
    pub fn can_start_handshake(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Disconnected)
    }

    /// Application publishes need an established session (pure function)
    pub fn can_publish(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
        match (from, to) {
            (ConnectionState::Disconnected, ConnectionState::Handshaking) => {
                info!("Bayeux handshake started");
            }
            (ConnectionState::Handshaking, ConnectionState::Connected) => {
                info!("Bayeux session established");
            }
            (ConnectionState::Handshaking, ConnectionState::Disconnected) => {
                error!("Bayeux handshake failed");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected) => {
                warn!("Bayeux connection lost");
            }
            (ConnectionState::Connected, ConnectionState::Handshaking) => {
                warn!("Bayeux session expired, handshaking again");
            }
            (ConnectionState::Disconnecting, ConnectionState::Disconnected) => {
                info!("Bayeux client disconnected");
            }
            _ => {
                info!("Bayeux connection state: {:?} -> {:?}", from, to);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_policy_default_is_disabled() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 0);
        assert!(!policy.is_enabled());
        assert_eq!(policy.backoff_pattern_ms, vec![250, 500, 1000, 2000]);
        assert_eq!(policy.sustained_delay_ms, 5000);
    }

    #[test]
    fn test_calculate_backoff_delay() {
        let policy = ReconnectPolicy::with_max_attempts(10);

        assert_eq!(policy.calculate_backoff_delay(1), Duration::from_millis(250));
        assert_eq!(policy.calculate_backoff_delay(2), Duration::from_millis(500));
        assert_eq!(policy.calculate_backoff_delay(4), Duration::from_millis(2000));

        // Sustained delay after pattern exhausted
        assert_eq!(policy.calculate_backoff_delay(5), Duration::from_millis(5000));
        assert_eq!(policy.calculate_backoff_delay(100), Duration::from_millis(5000));
    }

    #[test]
    fn test_calculate_max_total_time() {
        let policy = ReconnectPolicy::with_max_attempts(5);
        assert_eq!(
            policy.calculate_max_total_time(),
            Duration::from_millis(250 + 500 + 1000 + 2000 + 5000)
        );
        assert_eq!(
            ReconnectPolicy::default().calculate_max_total_time(),
            Duration::ZERO
        );
    }

    #[test]
    fn test_should_attempt_reconnection() {
        let policy = ReconnectPolicy::with_max_attempts(3);
        let lost = DisconnectReason::HeartbeatStalled;

        assert_eq!(
            ConnectionMonitor::should_attempt_reconnection(0, &policy, &lost),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay: Duration::from_millis(250)
            }
        );
        assert_eq!(
            ConnectionMonitor::should_attempt_reconnection(2, &policy, &lost),
            ReconnectionDecision::Proceed {
                attempt: 3,
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(
            ConnectionMonitor::should_attempt_reconnection(3, &policy, &lost),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
    }

    #[test]
    fn test_no_reconnect_after_explicit_disconnect_or_advice() {
        let policy = ReconnectPolicy::with_max_attempts(3);

        assert_eq!(
            ConnectionMonitor::should_attempt_reconnection(
                0,
                &policy,
                &DisconnectReason::ClientRequested
            ),
            ReconnectionDecision::AbortNotAllowed
        );
        assert_eq!(
            ConnectionMonitor::should_attempt_reconnection(
                0,
                &policy,
                &DisconnectReason::ServerAdvisedNone
            ),
            ReconnectionDecision::AbortNotAllowed
        );
    }

    #[test]
    fn test_disabled_policy_never_reconnects() {
        assert_eq!(
            ConnectionMonitor::should_attempt_reconnection(
                0,
                &ReconnectPolicy::default(),
                &DisconnectReason::HandshakeTimeout
            ),
            ReconnectionDecision::AbortDisabled
        );
    }

    #[test]
    fn test_state_guards() {
        assert!(ConnectionMonitor::can_start_handshake(ConnectionState::Disconnected));
        assert!(!ConnectionMonitor::can_start_handshake(ConnectionState::Handshaking));
        assert!(!ConnectionMonitor::can_start_handshake(ConnectionState::Connected));
        assert!(!ConnectionMonitor::can_start_handshake(ConnectionState::Disconnecting));

        assert!(ConnectionMonitor::can_publish(ConnectionState::Connected));
        assert!(!ConnectionMonitor::can_publish(ConnectionState::Handshaking));
        assert!(!ConnectionMonitor::can_publish(ConnectionState::Disconnected));
    }

    #[test]
    fn test_disconnect_reason_errors() {
        assert_eq!(
            DisconnectReason::ClientRequested.to_error(),
            BayeuxError::ConnectionLost
        );
        assert!(matches!(
            DisconnectReason::HeartbeatStalled.to_error(),
            BayeuxError::Transport(_)
        ));
        assert!(matches!(
            DisconnectReason::HandshakeRejected("403::denied".to_string()).to_error(),
            BayeuxError::Protocol(_)
        ));
        let closed = DisconnectReason::TransportClosed {
            code: Some(1006),
            reason: "abnormal".to_string(),
        };
        assert!(closed.to_error().to_string().contains("1006"));
        assert!(closed.allows_reconnect());
    }

    #[test]
    fn test_validate_policy() {
        assert!(ReconnectPolicy::default().validate().is_ok());

        let invalid = ReconnectPolicy {
            max_attempts: 3,
            backoff_pattern_ms: vec![],
            sustained_delay_ms: 0,
        };
        assert!(invalid.validate().is_err());
    }
}
