//! Control surface over the registry: init, disconnect, status, send, health.
//!
//! `init` returns as soon as the handle is registered; the connection attempt
//! runs in a per-handle pump task whose outcome is only visible through
//! lifecycle events and `status`.

use std::{sync::Arc, time::Duration};

use {
    futures::future::join_all,
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    backend::{BackendEvent, ConnectRequest, SendReceipt, SessionBackend},
    event::LifecycleSink,
    handle::{SessionHandle, SessionSnapshot},
    recipient::{normalize_phone_number, normalize_recipient},
    registry::SessionRegistry,
    state::SessionState,
};

/// Tunables for [`SessionManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Profile used by `send_message` when the request names none.
    pub default_profile: String,
    /// Upper bound for the backend to accept a connection attempt.
    pub connect_timeout: Duration,
    /// Upper bound for a backend teardown.
    pub teardown_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            default_profile: "default".into(),
            connect_timeout: Duration::from_secs(60),
            teardown_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InitRequest {
    pub profile_id: String,
    pub user_id: String,
    pub use_pairing: bool,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InitOutcome {
    /// A live handle was already registered; nothing was started.
    Existing,
    /// A new handle was registered and its connection attempt started.
    Initializing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub profile_id: Option<String>,
    pub recipient: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub connected: bool,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub active_session_count: usize,
    pub connected_session_count: usize,
}

/// Cheaply cloneable; clones share the same registry.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    registry: SessionRegistry,
    backend: Arc<dyn SessionBackend>,
    sink: Arc<dyn LifecycleSink>,
    options: ManagerOptions,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        sink: Arc<dyn LifecycleSink>,
        options: ManagerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry: SessionRegistry::new(),
                backend,
                sink,
                options,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.inner.options
    }

    /// Start linking a profile.
    ///
    /// A live handle is left alone (`Existing`). A handle that ended in
    /// `auth_failed` or `disconnected` is torn down and replaced.
    pub async fn init(&self, request: InitRequest) -> Result<InitOutcome> {
        let profile_id = required(&request.profile_id, "profileId")?;
        let user_id = required(&request.user_id, "userId")?;
        let pairing_phone = if request.use_pairing {
            let phone = request
                .phone_number
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    Error::invalid_argument("phoneNumber is required when usePairing is set")
                })?;
            Some(normalize_phone_number(phone)?)
        } else {
            None
        };

        let inner = &self.inner;
        if let Some(existing) = inner.registry.get(profile_id).await {
            if !existing.state().is_terminal() && !existing.is_cancelled() {
                debug!(profile_id, state = %existing.state(), "init on live session, keeping it");
                return Ok(InitOutcome::Existing);
            }
            info!(profile_id, state = %existing.state(), "replacing ended session");
            inner
                .registry
                .destroy_handle(
                    &existing,
                    inner.backend.as_ref(),
                    inner.options.teardown_timeout,
                )
                .await;
        }

        let handle = match inner
            .registry
            .create(profile_id, user_id, request.use_pairing)
            .await
        {
            Ok(handle) => handle,
            // Lost a race with a concurrent init for the same profile.
            Err(Error::AlreadyExists { .. }) => return Ok(InitOutcome::Existing),
            Err(e) => return Err(e),
        };

        info!(
            profile_id,
            user_id,
            session_id = %handle.session_id(),
            use_pairing = request.use_pairing,
            "session initializing"
        );
        tokio::spawn(run_session(Arc::clone(inner), handle, pairing_phone));
        Ok(InitOutcome::Initializing)
    }

    /// Close and tear down a profile's session. Succeeds when there is none.
    pub async fn disconnect(&self, profile_id: &str) -> Result<()> {
        let profile_id = required(profile_id, "profileId")?;
        let inner = &self.inner;
        let Some(handle) = inner.registry.get(profile_id).await else {
            debug!(profile_id, "disconnect for unknown profile");
            return Ok(());
        };

        handle.close(Some("requested"), inner.sink.as_ref());
        inner
            .registry
            .destroy_handle(&handle, inner.backend.as_ref(), inner.options.teardown_timeout)
            .await;
        info!(profile_id, "session disconnected");
        Ok(())
    }

    /// Last known state. Unknown profiles report `disconnected`.
    pub async fn status(&self, profile_id: &str) -> Result<StatusReport> {
        let profile_id = required(profile_id, "profileId")?;
        Ok(match self.inner.registry.get(profile_id).await {
            Some(handle) => {
                let snapshot = handle.snapshot();
                StatusReport {
                    connected: snapshot.connected,
                    state: snapshot.state,
                    session: Some(snapshot),
                }
            },
            None => StatusReport {
                connected: false,
                state: SessionState::Disconnected,
                session: None,
            },
        })
    }

    /// Send a text message. Fails with `NotReady` without touching the
    /// backend unless the profile is connected.
    pub async fn send_message(&self, request: SendRequest) -> Result<SendReceipt> {
        let inner = &self.inner;
        let profile_id = request
            .profile_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(inner.options.default_profile.as_str());
        if request.message.trim().is_empty() {
            return Err(Error::invalid_argument("message is required"));
        }
        let to = normalize_recipient(&request.recipient)?;

        let connected = inner
            .registry
            .get(profile_id)
            .await
            .is_some_and(|h| h.is_connected() && !h.is_cancelled());
        if !connected {
            return Err(Error::not_ready(profile_id));
        }

        let receipt = inner
            .backend
            .send_message(profile_id, &to, &request.message)
            .await?;
        info!(
            profile_id,
            to = %to,
            message_id = receipt.message_id.as_deref().unwrap_or(""),
            "message sent"
        );
        Ok(receipt)
    }

    pub async fn health(&self) -> Health {
        let handles = self.inner.registry.list().await;
        Health {
            status: "healthy",
            active_session_count: handles.len(),
            connected_session_count: handles.iter().filter(|h| h.is_connected()).count(),
        }
    }

    pub async fn list(&self) -> Vec<SessionSnapshot> {
        self.inner
            .registry
            .list()
            .await
            .iter()
            .map(|h| h.snapshot())
            .collect()
    }

    /// Close and tear down every session concurrently.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let handles = inner.registry.list().await;
        if handles.is_empty() {
            return;
        }
        info!(count = handles.len(), "shutting down sessions");
        join_all(handles.iter().map(|handle| async move {
            handle.close(Some("shutdown"), inner.sink.as_ref());
            inner
                .registry
                .destroy_handle(handle, inner.backend.as_ref(), inner.options.teardown_timeout)
                .await;
        }))
        .await;
    }
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_argument(format!("{field} is required")));
    }
    Ok(trimmed)
}

/// Pump for one handle: connect, then feed backend events into the handle in
/// arrival order until the handle is cancelled or the backend hangs up.
async fn run_session(
    inner: Arc<ManagerInner>,
    handle: Arc<SessionHandle>,
    pairing_phone: Option<String>,
) {
    let profile_id = handle.profile_id().to_string();
    let sink = inner.sink.as_ref();
    let backend = inner.backend.as_ref();
    let request = ConnectRequest {
        profile_id: profile_id.clone(),
        user_id: handle.user_id().to_string(),
        session_id: handle.session_id(),
        pairing_phone,
    };

    let connect = tokio::time::timeout(inner.options.connect_timeout, backend.connect(request));
    let connected = tokio::select! {
        biased;
        () = handle.cancelled() => None,
        result = connect => Some(result),
    };

    let mut events = match connected {
        None => {
            // Disconnected while connecting. The attempt may already be
            // registered on the backend side.
            debug!(profile_id, "connect interrupted");
            best_effort_destroy(&inner, &handle).await;
            return;
        },
        // Cancelled while the backend was registering the attempt: the
        // teardown that cancelled us may have reached the backend first.
        Some(Ok(Ok(_))) if handle.is_cancelled() => {
            debug!(profile_id, "connect completed after disconnect");
            best_effort_destroy(&inner, &handle).await;
            return;
        },
        Some(Ok(Ok(events))) => events,
        Some(Ok(Err(e))) => {
            warn!(profile_id, error = %e, "session connect failed");
            handle.apply(
                BackendEvent::AuthFailure {
                    message: Some(e.to_string()),
                },
                sink,
            );
            return;
        },
        Some(Err(_)) => {
            let secs = inner.options.connect_timeout.as_secs();
            warn!(profile_id, timeout_secs = secs, "session connect timed out");
            handle.apply(
                BackendEvent::AuthFailure {
                    message: Some(format!("connect timed out after {secs}s")),
                },
                sink,
            );
            best_effort_destroy(&inner, &handle).await;
            return;
        },
    };

    loop {
        let event = tokio::select! {
            biased;
            () = handle.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Some(event @ BackendEvent::Disconnected { .. }) => {
                handle.apply(event, sink);
                inner
                    .registry
                    .destroy_handle(&handle, backend, inner.options.teardown_timeout)
                    .await;
                break;
            },
            Some(event) => {
                handle.apply(event, sink);
            },
            None => {
                if !handle.is_cancelled() {
                    warn!(profile_id, "backend closed the event stream");
                    handle.close(Some("backend stream closed"), sink);
                    inner
                        .registry
                        .destroy_handle(&handle, backend, inner.options.teardown_timeout)
                        .await;
                }
                break;
            },
        }
    }
    debug!(profile_id, session_id = %handle.session_id(), "session pump stopped");
}

async fn best_effort_destroy(inner: &ManagerInner, handle: &SessionHandle) {
    let destroy = inner
        .backend
        .destroy(handle.profile_id(), handle.session_id());
    match tokio::time::timeout(inner.options.teardown_timeout, destroy).await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => debug!(profile_id = %handle.profile_id(), error = %e, "teardown failed"),
        Err(_) => debug!(profile_id = %handle.profile_id(), "teardown timed out"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            backend::EventStream,
            memory::{InMemoryBackend, RecordingSink},
        },
        async_trait::async_trait,
        std::{
            collections::HashMap,
            sync::atomic::{AtomicUsize, Ordering},
        },
        tokio::sync::{Notify, mpsc},
        uuid::Uuid,
    };

    const WAIT: Duration = Duration::from_secs(2);

    fn setup_with(options: ManagerOptions) -> (SessionManager, Arc<InMemoryBackend>, Arc<RecordingSink>) {
        let backend = Arc::new(InMemoryBackend::new());
        let sink = Arc::new(RecordingSink::new());
        let manager = SessionManager::new(backend.clone(), sink.clone(), options);
        (manager, backend, sink)
    }

    fn setup() -> (SessionManager, Arc<InMemoryBackend>, Arc<RecordingSink>) {
        setup_with(ManagerOptions {
            teardown_timeout: Duration::from_secs(1),
            ..ManagerOptions::default()
        })
    }

    fn init_req(profile_id: &str, user_id: &str) -> InitRequest {
        InitRequest {
            profile_id: profile_id.into(),
            user_id: user_id.into(),
            ..InitRequest::default()
        }
    }

    async fn wait_until(check: impl Fn() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT;
        while tokio::time::Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        check()
    }

    async fn connected_profile(
        manager: &SessionManager,
        backend: &InMemoryBackend,
        sink: &RecordingSink,
        profile_id: &str,
    ) {
        let before = sink.events().len();
        manager.init(init_req(profile_id, "u1")).await.unwrap();
        assert!(wait_until(|| backend.is_open(profile_id)).await);
        assert!(
            backend
                .emit(profile_id, BackendEvent::Ready {
                    phone_number: Some("15551234567".into()),
                    display_name: Some("Alice".into()),
                })
                .await
        );
        assert!(sink.wait_for(before + 1, WAIT).await);
    }

    #[tokio::test]
    async fn init_registers_and_forwards_connected_once() {
        let (manager, backend, sink) = setup();
        let outcome = manager.init(init_req("p1", "u1")).await.unwrap();
        assert_eq!(outcome, InitOutcome::Initializing);
        assert!(manager.registry().get("p1").await.is_some());

        assert!(wait_until(|| backend.is_open("p1")).await);
        backend
            .emit("p1", BackendEvent::Ready {
                phone_number: Some("15551234567".into()),
                display_name: Some("Alice".into()),
            })
            .await;
        assert!(sink.wait_for(1, WAIT).await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let events = sink.events_for("p1");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, "u1");
        assert_eq!(events[0].kind, crate::EventKind::Connected {
            phone_number: Some("15551234567".into()),
            display_name: Some("Alice".into()),
        });

        let status = manager.status("p1").await.unwrap();
        assert!(status.connected);
        assert_eq!(status.state, SessionState::Connected);
    }

    #[tokio::test]
    async fn second_init_returns_existing() {
        let (manager, backend, sink) = setup();
        manager.init(init_req("p1", "u1")).await.unwrap();
        assert!(wait_until(|| backend.is_open("p1")).await);
        backend.emit("p1", BackendEvent::Qr("qr-1".into())).await;
        assert!(sink.wait_for(1, WAIT).await);

        let outcome = manager.init(init_req("p1", "u1")).await.unwrap();
        assert_eq!(outcome, InitOutcome::Existing);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(manager.registry().len().await, 1);
        assert_eq!(backend.connects().len(), 1);
        assert_eq!(sink.event_names(), vec!["qr_updated"]);
    }

    #[tokio::test]
    async fn disconnect_while_awaiting_qr_stops_events() {
        let (manager, backend, sink) = setup();
        manager.init(init_req("p1", "u1")).await.unwrap();
        assert!(wait_until(|| backend.is_open("p1")).await);
        backend.emit("p1", BackendEvent::Qr("qr-1".into())).await;
        assert!(sink.wait_for(1, WAIT).await);
        let session_id = manager.registry().get("p1").await.unwrap().session_id();

        manager.disconnect("p1").await.unwrap();

        assert!(manager.registry().get("p1").await.is_none());
        let status = manager.status("p1").await.unwrap();
        assert!(!status.connected);
        assert_eq!(status.state, SessionState::Disconnected);
        assert!(!backend.emit("p1", BackendEvent::Qr("qr-2".into())).await);
        assert!(backend.destroyed().contains(&("p1".to_string(), session_id)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.event_names(), vec!["qr_updated", "disconnected"]);
        assert_eq!(
            sink.events()[1].kind,
            crate::EventKind::Disconnected {
                reason: Some("requested".into())
            }
        );
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (manager, backend, sink) = setup();
        manager.init(init_req("p1", "u1")).await.unwrap();
        assert!(wait_until(|| backend.is_open("p1")).await);

        manager.disconnect("p1").await.unwrap();
        manager.disconnect("p1").await.unwrap();
        manager.disconnect("never-seen").await.unwrap();

        assert!(manager.registry().is_empty().await);
        assert_eq!(sink.event_names(), vec!["disconnected"]);
    }

    #[tokio::test]
    async fn disconnect_interrupts_slow_connect() {
        let (manager, backend, sink) = setup();
        backend.set_connect_delay(Some(Duration::from_millis(300)));
        manager.init(init_req("p1", "u1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.disconnect("p1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(manager.registry().get("p1").await.is_none());
        assert!(!backend.is_open("p1"));
        assert_eq!(sink.event_names(), vec!["disconnected"]);
    }

    /// Backend whose `connect` parks until released, tracking the sessions
    /// that are live on its side.
    #[derive(Default)]
    struct GatedBackend {
        gate: Notify,
        entered: AtomicUsize,
        open: std::sync::Mutex<HashMap<Uuid, mpsc::Sender<BackendEvent>>>,
    }

    #[async_trait]
    impl SessionBackend for GatedBackend {
        async fn connect(&self, request: ConnectRequest) -> Result<EventStream> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            let (tx, rx) = mpsc::channel(8);
            self.open.lock().unwrap().insert(request.session_id, tx);
            Ok(rx)
        }

        async fn destroy(&self, _profile_id: &str, session_id: Uuid) -> Result<()> {
            self.open.lock().unwrap().remove(&session_id);
            Ok(())
        }

        async fn send_message(&self, _: &str, _: &str, _: &str) -> Result<SendReceipt> {
            Err(Error::collaborator("not connected"))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_racing_connect_completion_leaves_nothing_open() {
        let backend = Arc::new(GatedBackend::default());
        let manager = SessionManager::new(
            backend.clone(),
            Arc::new(RecordingSink::new()),
            ManagerOptions {
                teardown_timeout: Duration::from_secs(1),
                ..ManagerOptions::default()
            },
        );

        for round in 1..=64 {
            manager.init(init_req("p1", "u1")).await.unwrap();
            assert!(wait_until(|| backend.entered.load(Ordering::SeqCst) == round).await);
            backend.gate.notify_one();
            manager.disconnect("p1").await.unwrap();
        }

        assert!(
            wait_until(|| backend.open.lock().unwrap().is_empty()).await,
            "sessions still open on the backend: {}",
            backend.open.lock().unwrap().len()
        );
        assert!(manager.registry().is_empty().await);
    }

    #[tokio::test]
    async fn events_are_forwarded_in_order() {
        let (manager, backend, sink) = setup();
        manager.init(init_req("p1", "u1")).await.unwrap();
        assert!(wait_until(|| backend.is_open("p1")).await);

        for i in 0..10 {
            backend
                .emit("p1", BackendEvent::Qr(format!("qr-{i}")))
                .await;
        }
        backend
            .emit("p1", BackendEvent::Ready {
                phone_number: None,
                display_name: None,
            })
            .await;
        assert!(sink.wait_for(11, WAIT).await);

        let qrs: Vec<_> = sink
            .events_for("p1")
            .into_iter()
            .filter_map(|e| match e.kind {
                crate::EventKind::QrUpdated { qr } => Some(qr),
                _ => None,
            })
            .collect();
        let expected: Vec<_> = (0..10).map(|i| format!("qr-{i}")).collect();
        assert_eq!(qrs, expected);
        assert_eq!(sink.event_names().last(), Some(&"connected"));
    }

    #[tokio::test]
    async fn send_requires_connected_session() {
        let (manager, backend, sink) = setup();
        let request = SendRequest {
            profile_id: Some("p1".into()),
            recipient: "15551234567".into(),
            message: "hi".into(),
        };

        let err = manager.send_message(request.clone()).await.unwrap_err();
        assert!(matches!(err, Error::NotReady { ref profile_id } if profile_id == "p1"));

        manager.init(init_req("p1", "u1")).await.unwrap();
        assert!(wait_until(|| backend.is_open("p1")).await);
        backend.emit("p1", BackendEvent::Qr("qr".into())).await;
        assert!(sink.wait_for(1, WAIT).await);

        let err = manager.send_message(request).await.unwrap_err();
        assert!(matches!(err, Error::NotReady { .. }));
        assert!(backend.sent().is_empty());
    }

    #[tokio::test]
    async fn send_normalizes_recipient_and_uses_default_profile() {
        let (manager, backend, sink) = setup();
        connected_profile(&manager, &backend, &sink, "default").await;

        let receipt = manager
            .send_message(SendRequest {
                profile_id: None,
                recipient: "+1 555-123-4567".into(),
                message: "hello".into(),
            })
            .await
            .unwrap();
        assert!(receipt.message_id.is_some());

        let sent = backend.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].profile_id, "default");
        assert_eq!(sent[0].to, "15551234567@c.us");
        assert_eq!(sent[0].body, "hello");
    }

    #[tokio::test]
    async fn send_surfaces_backend_errors() {
        let (manager, backend, sink) = setup();
        connected_profile(&manager, &backend, &sink, "p1").await;
        backend.fail_sends(true);

        let err = manager
            .send_message(SendRequest {
                profile_id: Some("p1".into()),
                recipient: "15551234567".into(),
                message: "hello".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Collaborator { .. }));
    }

    #[tokio::test]
    async fn send_validates_arguments() {
        let (manager, ..) = setup();
        let err = manager
            .send_message(SendRequest {
                profile_id: None,
                recipient: "15551234567".into(),
                message: "  ".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        let err = manager
            .send_message(SendRequest {
                profile_id: None,
                recipient: "bob".into(),
                message: "hi".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn init_validates_arguments() {
        let (manager, backend, _sink) = setup();
        for request in [
            init_req("", "u1"),
            init_req("p1", "  "),
            InitRequest {
                use_pairing: true,
                ..init_req("p1", "u1")
            },
        ] {
            let err = manager.init(request).await.unwrap_err();
            assert!(matches!(err, Error::InvalidArgument { .. }));
        }
        assert!(manager.registry().is_empty().await);
        assert!(backend.connects().is_empty());
    }

    #[tokio::test]
    async fn pairing_passes_normalized_phone_number() {
        let (manager, backend, sink) = setup();
        manager
            .init(InitRequest {
                use_pairing: true,
                phone_number: Some("+49 170 1234567".into()),
                ..init_req("p1", "u1")
            })
            .await
            .unwrap();
        assert!(wait_until(|| backend.is_open("p1")).await);

        let connects = backend.connects();
        assert_eq!(connects[0].pairing_phone.as_deref(), Some("491701234567"));
        assert!(connects[0].use_pairing());

        backend
            .emit("p1", BackendEvent::PairingCode("ABCD-EFGH".into()))
            .await;
        assert!(sink.wait_for(1, WAIT).await);
        let status = manager.status("p1").await.unwrap();
        assert_eq!(status.state, SessionState::AwaitingPairing);
        assert_eq!(
            status.session.unwrap().pairing_code.as_deref(),
            Some("ABCD-EFGH")
        );
    }

    #[tokio::test]
    async fn connect_failure_reports_auth_failure_and_allows_retry() {
        let (manager, backend, sink) = setup();
        backend.fail_connects(true);
        manager.init(init_req("p1", "u1")).await.unwrap();
        assert!(sink.wait_for(1, WAIT).await);

        assert_eq!(sink.event_names(), vec!["auth_failure"]);
        let status = manager.status("p1").await.unwrap();
        assert_eq!(status.state, SessionState::AuthFailed);

        backend.fail_connects(false);
        let outcome = manager.init(init_req("p1", "u1")).await.unwrap();
        assert_eq!(outcome, InitOutcome::Initializing);
        assert!(wait_until(|| backend.is_open("p1")).await);
        assert_eq!(
            manager.status("p1").await.unwrap().state,
            SessionState::Initializing
        );
    }

    #[tokio::test]
    async fn connect_timeout_reports_auth_failure() {
        let (manager, backend, sink) = setup_with(ManagerOptions {
            connect_timeout: Duration::from_millis(50),
            teardown_timeout: Duration::from_secs(1),
            ..ManagerOptions::default()
        });
        backend.set_connect_delay(Some(Duration::from_millis(500)));
        manager.init(init_req("p1", "u1")).await.unwrap();
        assert!(sink.wait_for(1, WAIT).await);

        let events = sink.events();
        assert_eq!(events[0].kind.name(), "auth_failure");
        assert_eq!(
            manager.status("p1").await.unwrap().state,
            SessionState::AuthFailed
        );
    }

    #[tokio::test]
    async fn backend_disconnect_removes_session() {
        let (manager, backend, sink) = setup();
        connected_profile(&manager, &backend, &sink, "p1").await;

        backend
            .emit("p1", BackendEvent::Disconnected {
                reason: Some("LOGOUT".into()),
            })
            .await;
        assert!(sink.wait_for(2, WAIT).await);
        let registry = manager.registry();
        let mut removed = false;
        for _ in 0..200 {
            if registry.get("p1").await.is_none() {
                removed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(removed);
        assert_eq!(sink.event_names(), vec!["connected", "disconnected"]);
    }

    #[tokio::test]
    async fn health_and_list_reflect_registry() {
        let (manager, backend, sink) = setup();
        connected_profile(&manager, &backend, &sink, "p1").await;
        manager.init(init_req("p2", "u2")).await.unwrap();

        let health = manager.health().await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.active_session_count, 2);
        assert_eq!(health.connected_session_count, 1);

        let profiles: Vec<_> = manager
            .list()
            .await
            .into_iter()
            .map(|s| s.profile_id)
            .collect();
        assert_eq!(profiles, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn sink_failures_do_not_affect_sessions() {
        // The sink swallows everything; session state must not depend on it.
        struct DroppingSink;
        impl LifecycleSink for DroppingSink {
            fn publish(&self, _event: crate::LifecycleEvent) {}
        }

        let backend = Arc::new(InMemoryBackend::new());
        let manager = SessionManager::new(
            backend.clone(),
            Arc::new(DroppingSink),
            ManagerOptions::default(),
        );
        manager.init(init_req("p1", "u1")).await.unwrap();
        assert!(wait_until(|| backend.is_open("p1")).await);
        backend
            .emit("p1", BackendEvent::Ready {
                phone_number: None,
                display_name: None,
            })
            .await;

        let mut connected = false;
        for _ in 0..200 {
            if manager.status("p1").await.unwrap().connected {
                connected = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(connected);
    }

    #[tokio::test]
    async fn shutdown_closes_every_session() {
        let (manager, backend, sink) = setup();
        connected_profile(&manager, &backend, &sink, "p1").await;
        manager.init(init_req("p2", "u2")).await.unwrap();
        assert!(wait_until(|| backend.is_open("p2")).await);

        manager.shutdown().await;

        assert!(manager.registry().is_empty().await);
        assert_eq!(backend.destroyed().len(), 2);
        let disconnects = sink
            .event_names()
            .into_iter()
            .filter(|n| *n == "disconnected")
            .count();
        assert_eq!(disconnects, 2);
    }
}
