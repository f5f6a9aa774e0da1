//! Observability for the Bayeux client
//!
//! Structured logging setup and per-client metrics.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{ClientMetrics, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{channel_span, session_span};
