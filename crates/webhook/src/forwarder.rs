use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    reqwest::header::{CONTENT_TYPE, USER_AGENT},
    secrecy::{ExposeSecret, Secret},
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, error, info, warn},
    wagate_config::WebhookConfig,
    wagate_sessions::{LifecycleEvent, LifecycleSink},
};

use crate::{
    error::SinkDeliveryError,
    signature::{SIGNATURE_HEADER, sign},
};

#[derive(Clone)]
pub struct ForwarderOptions {
    pub url: String,
    pub secret: Option<Secret<String>>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts per event, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub queue_capacity: usize,
}

impl std::fmt::Debug for ForwarderOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwarderOptions")
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl ForwarderOptions {
    /// `None` when no sink URL is configured.
    pub fn from_config(config: &WebhookConfig) -> Option<Self> {
        let url = config.url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
        Some(Self {
            url: url.to_string(),
            secret: config.secret.clone(),
            timeout: config.timeout(),
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            queue_capacity: config.queue_capacity.max(1),
        })
    }
}

/// Delivery counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    pub delivered: u64,
    pub failed: u64,
    /// Rejected at `publish` because the queue was full or closed.
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Queue plus delivery worker for one sink URL.
pub struct WebhookForwarder {
    tx: Mutex<Option<mpsc::Sender<LifecycleEvent>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl WebhookForwarder {
    /// Build the HTTP client and start the worker. Must run inside a tokio
    /// runtime.
    pub fn spawn(options: ForwarderOptions) -> Result<Self, SinkDeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()?;
        let (tx, rx) = mpsc::channel(options.queue_capacity);
        let counters = Arc::new(Counters::default());

        info!(
            url = %options.url,
            signed = options.secret.is_some(),
            max_attempts = options.max_attempts,
            "webhook forwarding enabled"
        );
        let worker = tokio::spawn(run_worker(client, options, rx, Arc::clone(&counters)));

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: tokio::sync::Mutex::new(Some(worker)),
            counters,
        })
    }

    pub fn stats(&self) -> ForwarderStats {
        ForwarderStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting events and wait until everything queued so far has
    /// been delivered or given up on.
    pub async fn shutdown(&self) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(tx);
        if let Some(worker) = self.worker.lock().await.take()
            && let Err(e) = worker.await
        {
            warn!(error = %e, "webhook worker ended abnormally");
        }
        let stats = self.stats();
        info!(
            delivered = stats.delivered,
            failed = stats.failed,
            dropped = stats.dropped,
            "webhook forwarder stopped"
        );
    }
}

impl LifecycleSink for WebhookForwarder {
    fn publish(&self, event: LifecycleEvent) {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(profile_id = %event.profile_id, event = event.kind.name(), "webhook forwarder stopped, dropping event");
            return;
        };
        if let Err(e) = tx.try_send(event) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            let (reason, event) = match e {
                mpsc::error::TrySendError::Full(event) => ("queue full", event),
                mpsc::error::TrySendError::Closed(event) => ("worker gone", event),
            };
            warn!(
                profile_id = %event.profile_id,
                event = event.kind.name(),
                reason,
                "dropping lifecycle event"
            );
        }
    }
}

async fn run_worker(
    client: reqwest::Client,
    options: ForwarderOptions,
    mut rx: mpsc::Receiver<LifecycleEvent>,
    counters: Arc<Counters>,
) {
    while let Some(event) = rx.recv().await {
        match deliver_with_retry(&client, &options, &event).await {
            Ok(attempts) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    profile_id = %event.profile_id,
                    event = event.kind.name(),
                    attempts,
                    "lifecycle event delivered"
                );
            },
            Err((attempts, e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    profile_id = %event.profile_id,
                    event = event.kind.name(),
                    attempts,
                    error = %e,
                    "webhook delivery failed, event dropped"
                );
            },
        }
    }
    debug!("webhook worker drained");
}

/// Deliver one event. Returns the number of attempts used.
async fn deliver_with_retry(
    client: &reqwest::Client,
    options: &ForwarderOptions,
    event: &LifecycleEvent,
) -> Result<u32, (u32, SinkDeliveryError)> {
    let body = match serde_json::to_vec(event) {
        Ok(body) => body,
        Err(e) => return Err((0, SinkDeliveryError::from(e))),
    };
    let signature = options
        .secret
        .as_ref()
        .map(|secret| sign(&body, secret.expose_secret()));

    let mut attempt = 1;
    loop {
        match deliver_once(client, &options.url, &body, signature.as_deref()).await {
            Ok(()) => return Ok(attempt),
            Err(e) if !e.is_retryable() || attempt >= options.max_attempts => {
                return Err((attempt, e));
            },
            Err(e) => {
                let delay = backoff_delay(attempt, options.initial_backoff, options.max_backoff);
                warn!(
                    profile_id = %event.profile_id,
                    event = event.kind.name(),
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "webhook delivery failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
        }
    }
}

async fn deliver_once(
    client: &reqwest::Client,
    url: &str,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), SinkDeliveryError> {
    let mut request = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header(USER_AGENT, concat!("wagate/", env!("CARGO_PKG_VERSION")))
        .body(body.to_vec());
    if let Some(signature) = signature {
        request = request.header(SIGNATURE_HEADER, signature);
    }

    let resp = request.send().await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SinkDeliveryError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Delay after the given (1-based) failed attempt: `initial * 2^(attempt-1)`,
/// capped at `max`.
pub fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    initial.saturating_mul(factor).min(max)
}
