//! Multi-tenant session registry with lifecycle-event forwarding.
//!
//! A profile id maps to at most one live [`SessionHandle`]. Handles are
//! driven by a [`SessionBackend`] (the messaging collaborator) and every
//! state transition is published to a [`LifecycleSink`]. The
//! [`SessionManager`] is the transport-agnostic control surface on top.

pub mod backend;
pub mod error;
pub mod event;
pub mod handle;
pub mod manager;
pub mod memory;
pub mod recipient;
pub mod registry;
pub mod state;

pub use {
    backend::{BackendEvent, ConnectRequest, EventStream, SendReceipt, SessionBackend},
    error::{Error, Result},
    event::{EventKind, LifecycleEvent, LifecycleSink, NoopSink},
    handle::{SessionHandle, SessionSnapshot},
    manager::{
        Health, InitOutcome, InitRequest, ManagerOptions, SendRequest, SessionManager,
        StatusReport,
    },
    recipient::{CHAT_ID_SUFFIX, normalize_phone_number, normalize_recipient},
    registry::SessionRegistry,
    state::SessionState,
};
