//! Real-time streaming pipeline for XPS detector frames.
//!
//! Five components, in dependency order: [`processor`] (pure numerical
//! pipeline over one scan), [`operator`] (owns the scan lifecycle and a
//! `Processor`), [`decoder`] (wire protocol → [`messages::Message`]),
//! [`publisher`] (per-subscriber fan-out), [`sinks`] (WebSocket + archive).
//!
//! [`settings`] and [`tracing_init`] are the ambient configuration/logging
//! layers `main.rs` wires up before any of the above run.

pub mod decoder;
pub mod error;
pub mod messages;
pub mod operator;
pub mod processor;
pub mod protocol;
pub mod publisher;
pub mod settings;
pub mod sinks;
pub mod tracing_init;
pub mod validation;
