//! In-memory backend and sink for tests.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {async_trait::async_trait, tokio::sync::mpsc, uuid::Uuid};

use crate::{
    Error, Result,
    backend::{BackendEvent, ConnectRequest, EventStream, SendReceipt, SessionBackend},
    event::{LifecycleEvent, LifecycleSink},
};

/// A message accepted by [`InMemoryBackend::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub profile_id: String,
    pub to: String,
    pub body: String,
}

/// Backend whose events are pushed by the test through [`InMemoryBackend::emit`].
/// No network, no persistence.
pub struct InMemoryBackend {
    streams: Mutex<HashMap<String, (Uuid, mpsc::Sender<BackendEvent>)>>,
    connects: Mutex<Vec<ConnectRequest>>,
    destroyed: Mutex<Vec<(String, Uuid)>>,
    sent: Mutex<Vec<SentMessage>>,
    fail_connect: AtomicBool,
    fail_send: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    next_message_id: AtomicU64,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            connects: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            fail_connect: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            connect_delay: Mutex::new(None),
            next_message_id: AtomicU64::new(1),
        }
    }

    /// Make every subsequent `connect` fail.
    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `send_message` fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    /// Delay `connect` to simulate a slow handshake.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.connect_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Push an event into a profile's stream. Returns `false` when no stream
    /// is open or its consumer is gone.
    pub async fn emit(&self, profile_id: &str, event: BackendEvent) -> bool {
        let sender = {
            let streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
            streams.get(profile_id).map(|(_, tx)| tx.clone())
        };
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Whether a stream for the profile is open.
    pub fn is_open(&self, profile_id: &str) -> bool {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(profile_id)
    }

    pub fn connects(&self) -> Vec<ConnectRequest> {
        self.connects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn destroyed(&self) -> Vec<(String, Uuid)> {
        self.destroyed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionBackend for InMemoryBackend {
    async fn connect(&self, request: ConnectRequest) -> Result<EventStream> {
        let delay = *self.connect_delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::collaborator("connect refused"));
        }

        let (tx, rx) = mpsc::channel(64);
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request.profile_id.clone(), (request.session_id, tx));
        self.connects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        Ok(rx)
    }

    async fn destroy(&self, profile_id: &str, session_id: Uuid) -> Result<()> {
        {
            let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
            if streams
                .get(profile_id)
                .is_some_and(|(id, _)| *id == session_id)
            {
                streams.remove(profile_id);
            }
        }
        self.destroyed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((profile_id.to_string(), session_id));
        Ok(())
    }

    async fn send_message(&self, profile_id: &str, to: &str, body: &str) -> Result<SendReceipt> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(Error::collaborator("send rejected"));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMessage {
                profile_id: profile_id.to_string(),
                to: to.to_string(),
                body: body.to_string(),
            });
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        Ok(SendReceipt {
            message_id: Some(format!("msg-{id}")),
        })
    }
}

/// Sink that keeps every published event in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.kind.name())
            .collect()
    }

    /// Events for one profile, in publish order.
    pub fn events_for(&self, profile_id: &str) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.profile_id == profile_id)
            .cloned()
            .collect()
    }

    /// Poll until at least `count` events were published or `timeout` elapses.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.events.lock().unwrap_or_else(|e| e.into_inner()).len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl LifecycleSink for RecordingSink {
    fn publish(&self, event: LifecycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
