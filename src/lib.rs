//! Lesson Relay - Resilience and real-time fanout for the lesson platform.
//!
//! Two services live here:
//!
//! - The budget gate wraps calls to paid external services (transcription,
//!   speech synthesis, LLM completion, analysis) with retry, circuit
//!   breaking and an optional fallback, and enforces each tenant's monthly
//!   budget before the call is made.
//! - The realtime hub tracks live connections and rooms on each instance and
//!   fans events out across instances through a broker.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
