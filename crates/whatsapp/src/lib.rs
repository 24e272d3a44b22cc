//! WhatsApp Web binding for wagate.
//!
//! Implements [`wagate_sessions::SessionBackend`] on top of a Node.js
//! browser-automation sidecar, reached over a local WebSocket.

pub mod backend;
pub mod process;
pub mod sidecar;
pub mod types;

pub use {
    backend::{SidecarBackend, SidecarOptions},
    process::{ProcessConfig, SidecarProcess, find_sidecar_dir, start_sidecar},
    sidecar::{DEFAULT_SIDECAR_PORT, SidecarHandle, connect_with_retry, sidecar_url},
    types::{GatewayMessage, ProfileEvent, SidecarMessage},
};
