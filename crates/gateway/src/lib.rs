//! HTTP control API for wagate.
//!
//! Routes: `POST /init`, `POST /disconnect`, `GET /status/{profileId}`,
//! `POST /send`, `GET /health`, `GET /sessions`. Every error is answered with
//! `{"success": false, "error": "..."}`.

pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use {
    error::ApiError,
    server::{build_app, shutdown_signal, start_gateway},
    state::AppState,
};
