//! Lifecycle event forwarding to an external HTTP sink.
//!
//! [`WebhookForwarder`] is a [`wagate_sessions::LifecycleSink`]: `publish`
//! only enqueues, and a single background worker delivers events in order
//! with bounded retry. Failed deliveries are logged and dropped; they never
//! reach session state.

pub mod error;
pub mod forwarder;
pub mod signature;

pub use {
    error::SinkDeliveryError,
    forwarder::{ForwarderOptions, ForwarderStats, WebhookForwarder, backoff_delay},
    signature::{SIGNATURE_HEADER, sign, verify_signature},
};
