use wagate_sessions::SessionManager;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub version: &'static str,
}

impl AppState {
    pub fn new(manager: SessionManager) -> Self {
        Self {
            manager,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
