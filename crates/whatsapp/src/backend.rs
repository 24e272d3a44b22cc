//! [`SessionBackend`] over the sidecar connection.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc, Mutex, RwLock as StdRwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::sync::{RwLock, mpsc, oneshot},
    tracing::{debug, info, warn},
    uuid::Uuid,
    wagate_sessions::{
        BackendEvent, ConnectRequest, Error, EventStream, Result, SendReceipt, SessionBackend,
    },
};

use crate::{
    process::{ProcessConfig, SidecarProcess, find_sidecar_dir, start_sidecar},
    sidecar::{
        DEFAULT_SIDECAR_PORT, MessageCallback, SidecarHandle, connect_with_retry, sidecar_url,
    },
    types::{GatewayMessage, ProfileEvent, SidecarMessage},
};

/// Per-profile event buffer between the reader task and the session pump.
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct SidecarOptions {
    /// WebSocket URL of the sidecar.
    pub url: String,
    /// Spawn the sidecar process on first use.
    pub auto_start: bool,
    pub sidecar_dir: Option<PathBuf>,
    pub port: u16,
    pub auth_dir: Option<PathBuf>,
    /// How long to wait for a `send_result`.
    pub send_timeout: Duration,
    pub connect_attempts: u32,
}

impl Default for SidecarOptions {
    fn default() -> Self {
        Self {
            url: sidecar_url(DEFAULT_SIDECAR_PORT),
            auto_start: true,
            sidecar_dir: None,
            port: DEFAULT_SIDECAR_PORT,
            auth_dir: None,
            send_timeout: Duration::from_secs(30),
            connect_attempts: 10,
        }
    }
}

impl SidecarOptions {
    pub fn from_config(config: &wagate_config::SidecarConfig) -> Self {
        Self {
            url: sidecar_url(config.port),
            auto_start: config.auto_start,
            sidecar_dir: config.dir.clone(),
            port: config.port,
            auth_dir: config.auth_dir.clone(),
            send_timeout: config.send_timeout(),
            ..Self::default()
        }
    }
}

/// A live WebSocket to the sidecar. `epoch` increases with every reconnect
/// and tags the routes and pending sends that travel over it.
struct Connection {
    epoch: u64,
    handle: SidecarHandle,
}

struct Route {
    session_id: Uuid,
    epoch: u64,
    tx: mpsc::Sender<BackendEvent>,
}

struct PendingSend {
    epoch: u64,
    tx: oneshot::Sender<SendOutcome>,
}

#[derive(Debug)]
struct SendOutcome {
    success: bool,
    message_id: Option<String>,
    error: Option<String>,
}

/// Drives WhatsApp sessions through the sidecar.
///
/// One WebSocket carries every profile. Lifecycle frames are routed to the
/// profile's event stream; `send_result` frames complete pending sends.
#[derive(Clone)]
pub struct SidecarBackend {
    inner: Arc<Inner>,
}

struct Inner {
    options: SidecarOptions,
    connection: RwLock<Option<Connection>>,
    next_epoch: AtomicU64,
    process: RwLock<Option<SidecarProcess>>,
    routes: StdRwLock<HashMap<String, Route>>,
    pending: Mutex<HashMap<String, PendingSend>>,
}

impl SidecarBackend {
    pub fn new(options: SidecarOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                connection: RwLock::new(None),
                next_epoch: AtomicU64::new(1),
                process: RwLock::new(None),
                routes: StdRwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start the sidecar process if configured, and connect to it.
    pub async fn ensure_connected(&self) -> anyhow::Result<()> {
        {
            let connection = self.inner.connection.read().await;
            if connection.as_ref().is_some_and(|c| c.handle.is_connected()) {
                return Ok(());
            }
        }

        if self.inner.options.auto_start {
            self.ensure_process_running().await?;
        }

        let mut connection = self.inner.connection.write().await;
        if connection.as_ref().is_some_and(|c| c.handle.is_connected()) {
            return Ok(());
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let callback: MessageCallback = Arc::new(move |msg| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_message(msg);
            }
        });
        let (handle, closed) = connect_with_retry(
            &self.inner.options.url,
            callback,
            self.inner.options.connect_attempts,
        )
        .await?;

        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let _ = closed.await;
            if let Some(inner) = weak.upgrade() {
                inner.connection_lost(epoch);
            }
        });

        debug!(epoch, "sidecar connection established");
        *connection = Some(Connection { epoch, handle });
        Ok(())
    }

    async fn ensure_process_running(&self) -> anyhow::Result<()> {
        let mut process = self.inner.process.write().await;
        if let Some(proc) = process.as_mut() {
            if proc.is_running() {
                return Ok(());
            }
            warn!("sidecar process died, restarting");
        }

        let sidecar_dir = find_sidecar_dir(self.inner.options.sidecar_dir.as_deref())?;
        let proc = start_sidecar(ProcessConfig {
            sidecar_dir,
            port: self.inner.options.port,
            auth_dir: self.inner.options.auth_dir.clone(),
        })
        .await?;
        *process = Some(proc);
        Ok(())
    }

    /// Drop the connection and stop the sidecar process if we started it.
    pub async fn stop(&self) -> anyhow::Result<()> {
        if let Some(mut proc) = self.inner.process.write().await.take() {
            proc.stop().await?;
        }
        self.inner.connection.write().await.take();
        Ok(())
    }

    async fn send_frame(&self, message: &GatewayMessage) -> anyhow::Result<()> {
        let connection = self.inner.connection.read().await;
        match connection.as_ref() {
            Some(conn) => conn.handle.send(message),
            None => anyhow::bail!("sidecar not connected"),
        }
    }
}

impl Inner {
    fn handle_message(&self, msg: SidecarMessage) {
        match msg.into_profile_event() {
            Ok(routed) => self.route_event(routed),
            Err(SidecarMessage::SendResult {
                request_id,
                success,
                message_id,
                error,
            }) => {
                let waiter = self
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&request_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.tx.send(SendOutcome {
                            success,
                            message_id,
                            error,
                        });
                    },
                    None => debug!(request_id, "send_result for unknown request"),
                }
            },
            Err(SidecarMessage::Error { profile_id, error }) => {
                warn!(?profile_id, error, "sidecar reported an error");
            },
            Err(other) => debug!(?other, "ignoring unexpected sidecar frame"),
        }
    }

    fn route_event(&self, routed: ProfileEvent) {
        let ProfileEvent {
            profile_id,
            session_id,
            event,
        } = routed;
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        let Some(route) = routes.get(&profile_id) else {
            debug!(profile_id, ?event, "event for unknown profile");
            return;
        };
        if session_id.is_some_and(|id| id != route.session_id) {
            debug!(profile_id, ?session_id, "event for stale session");
            return;
        }
        match route.tx.try_send(event) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(profile_id, ?event, "session event buffer full, dropping event");
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(profile_id, "session event stream already closed");
            },
        }
    }

    fn remove_route(&self, profile_id: &str, session_id: Uuid) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        if routes
            .get(profile_id)
            .is_some_and(|r| r.session_id == session_id)
        {
            routes.remove(profile_id);
        }
    }

    /// The clients opened over connection `epoch` lived inside the sidecar
    /// and are gone with it. Routes and sends registered over a newer
    /// connection are left alone.
    fn connection_lost(&self, epoch: u64) {
        let routes: Vec<_> = self
            .routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .extract_if(|_, route| route.epoch == epoch)
            .collect();
        let failed_sends = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let before = pending.len();
            pending.retain(|_, waiter| waiter.epoch != epoch);
            before - pending.len()
        };
        warn!(
            epoch,
            sessions = routes.len(),
            failed_sends,
            "lost connection to sidecar"
        );
        for (profile_id, route) in routes {
            let lost = BackendEvent::Disconnected {
                reason: Some("sidecar connection lost".into()),
            };
            if route.tx.try_send(lost).is_err() {
                debug!(profile_id, "could not notify session of sidecar loss");
            }
        }
    }
}

#[async_trait]
impl SessionBackend for SidecarBackend {
    async fn connect(&self, request: ConnectRequest) -> Result<EventStream> {
        self.ensure_connected()
            .await
            .map_err(|e| Error::collaborator(format!("{e:#}")))?;

        let frame = GatewayMessage::Init {
            profile_id: request.profile_id.clone(),
            session_id: request.session_id,
            use_pairing: request.use_pairing(),
            phone_number: request.pairing_phone.clone(),
        };
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        {
            // The route is tagged with the connection the init frame goes out
            // on, under the same guard.
            let connection = self.inner.connection.read().await;
            let Some(conn) = connection.as_ref() else {
                return Err(Error::collaborator("sidecar not connected"));
            };
            self.inner
                .routes
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(request.profile_id.clone(), Route {
                    session_id: request.session_id,
                    epoch: conn.epoch,
                    tx,
                });
            if let Err(e) = conn.handle.send(&frame) {
                self.inner
                    .remove_route(&request.profile_id, request.session_id);
                return Err(Error::collaborator(format!("{e:#}")));
            }
        }

        info!(
            profile_id = %request.profile_id,
            session_id = %request.session_id,
            use_pairing = request.use_pairing(),
            "sidecar session requested"
        );
        Ok(rx)
    }

    async fn destroy(&self, profile_id: &str, session_id: Uuid) -> Result<()> {
        self.inner.remove_route(profile_id, session_id);
        let frame = GatewayMessage::Destroy {
            profile_id: profile_id.to_string(),
            session_id,
        };
        if let Err(e) = self.send_frame(&frame).await {
            // Without a sidecar connection there is no client left to destroy.
            debug!(profile_id, error = %e, "skipping sidecar teardown");
        }
        Ok(())
    }

    async fn send_message(&self, profile_id: &str, to: &str, body: &str) -> Result<SendReceipt> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        let frame = GatewayMessage::Send {
            request_id: request_id.clone(),
            profile_id: profile_id.to_string(),
            to: to.to_string(),
            body: body.to_string(),
        };
        {
            let connection = self.inner.connection.read().await;
            let Some(conn) = connection.as_ref() else {
                return Err(Error::collaborator("sidecar not connected"));
            };
            self.inner
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(request_id.clone(), PendingSend {
                    epoch: conn.epoch,
                    tx,
                });
            if let Err(e) = conn.handle.send(&frame) {
                self.forget_request(&request_id);
                return Err(Error::collaborator(format!("{e:#}")));
            }
        }

        let timeout = self.inner.options.send_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) if outcome.success => Ok(SendReceipt {
                message_id: outcome.message_id,
            }),
            Ok(Ok(outcome)) => Err(Error::collaborator(
                outcome.error.unwrap_or_else(|| "send failed".into()),
            )),
            Ok(Err(_)) => Err(Error::collaborator("sidecar connection lost")),
            Err(_) => {
                self.forget_request(&request_id);
                Err(Error::collaborator(format!(
                    "no send confirmation after {}s",
                    timeout.as_secs()
                )))
            },
        }
    }
}

impl SidecarBackend {
    fn forget_request(&self, request_id: &str) {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
    }
}
