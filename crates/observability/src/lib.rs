//! # roomcast-observability
//!
//! Structured Logging fuer roomcast via tracing-subscriber, als Text oder
//! JSON, gesteuert ueber Konfiguration und Umgebungsvariablen.

pub mod logging;

pub use logging::{log_level_pruefen, logging_initialisieren, LogFormat, LoggingError};
