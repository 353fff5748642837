//! Observability for the secure publisher
//!
//! Structured logging to stderr with span macros for the MQTT session.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span};
