//! WebSocket connection to the sidecar.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Context, Result, anyhow, bail},
    futures::{SinkExt, StreamExt},
    tokio::sync::{mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
};

use crate::types::{GatewayMessage, SidecarMessage};

/// Port the sidecar listens on unless configured otherwise.
pub const DEFAULT_SIDECAR_PORT: u16 = 18_770;

/// Base delay between connection attempts; grows linearly per attempt.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Invoked on the reader task for every parsed frame, in arrival order.
pub type MessageCallback = Arc<dyn Fn(SidecarMessage) + Send + Sync>;

/// Loopback URL of a locally spawned sidecar.
pub fn sidecar_url(port: u16) -> String {
    format!("ws://127.0.0.1:{port}")
}

/// Write side of a live sidecar connection. The read side runs in a
/// background task that feeds the [`MessageCallback`].
pub struct SidecarHandle {
    write_tx: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
}

impl SidecarHandle {
    /// Open a connection. The returned receiver fires once when it closes.
    pub async fn connect(
        url: &str,
        callback: MessageCallback,
    ) -> Result<(Self, oneshot::Receiver<()>)> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .with_context(|| format!("failed to connect to sidecar at {url}"))?;
        let (mut ws_sink, mut ws_reader) = ws_stream.split();

        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();
        let (closed_tx, closed_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&connected);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = ws_reader.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => dispatch_frame(text.as_str(), &callback),
                            Some(Ok(Message::Ping(data))) => {
                                if ws_sink.send(Message::Pong(data)).await.is_err() {
                                    break;
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("sidecar closed the connection");
                                break;
                            },
                            Some(Ok(_)) => {},
                            Some(Err(e)) => {
                                warn!(error = %e, "sidecar websocket error");
                                break;
                            },
                        }
                    },
                    frame = write_rx.recv() => {
                        match frame {
                            Some(text) => {
                                if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                                    warn!(error = %e, "failed to write to sidecar");
                                    break;
                                }
                            },
                            None => {
                                let _ = ws_sink.send(Message::Close(None)).await;
                                break;
                            },
                        }
                    },
                }
            }
            flag.store(false, Ordering::SeqCst);
            let _ = closed_tx.send(());
        });

        info!(url, "connected to sidecar");
        Ok((Self { write_tx, connected }, closed_rx))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.write_tx.is_closed()
    }

    /// Queue a frame for the writer task.
    pub fn send(&self, message: &GatewayMessage) -> Result<()> {
        if !self.is_connected() {
            bail!("sidecar connection closed");
        }
        let text = serde_json::to_string(message).context("failed to encode sidecar frame")?;
        self.write_tx
            .send(text)
            .map_err(|_| anyhow!("sidecar connection closed"))
    }
}

/// Connect, retrying while the sidecar process is still starting up.
pub async fn connect_with_retry(
    url: &str,
    callback: MessageCallback,
    max_attempts: u32,
) -> Result<(SidecarHandle, oneshot::Receiver<()>)> {
    let mut last_error = None;
    for attempt in 1..=max_attempts.max(1) {
        match SidecarHandle::connect(url, Arc::clone(&callback)).await {
            Ok(connected) => return Ok(connected),
            Err(e) => {
                debug!(attempt, max_attempts, error = %e, "sidecar not reachable yet");
                last_error = Some(e);
            },
        }
        if attempt < max_attempts {
            tokio::time::sleep(RETRY_DELAY * attempt).await;
        }
    }
    Err(last_error
        .unwrap_or_else(|| anyhow!("sidecar connection failed"))
        .context(format!("giving up on sidecar after {max_attempts} attempts")))
}

fn dispatch_frame(text: &str, callback: &MessageCallback) {
    match serde_json::from_str::<SidecarMessage>(text) {
        Ok(message) => callback(message),
        Err(e) => warn!(error = %e, frame = text, "unparseable sidecar frame"),
    }
}
