use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    axum::Router,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use {
    wagate_config::WagateConfig,
    wagate_sessions::{LifecycleSink, ManagerOptions, NoopSink, SessionManager},
    wagate_webhook::{ForwarderOptions, WebhookForwarder},
    wagate_whatsapp::{SidecarBackend, SidecarOptions},
};

use crate::{routes, state::AppState};

/// Upper bound for flushing queued webhook events on shutdown.
const WEBHOOK_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the router (shared between production startup and tests).
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::router()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Wire the sidecar backend, the webhook forwarder and the session manager
/// from `config`, then serve until Ctrl-C or SIGTERM.
pub async fn start_gateway(config: WagateConfig) -> anyhow::Result<()> {
    let backend = SidecarBackend::new(SidecarOptions::from_config(&config.sidecar));

    let forwarder = match ForwarderOptions::from_config(&config.webhook) {
        Some(options) => Some(Arc::new(
            WebhookForwarder::spawn(options).context("failed to start webhook forwarder")?,
        )),
        None => {
            info!("no webhook url configured, lifecycle events will only be logged");
            None
        },
    };
    let sink: Arc<dyn LifecycleSink> = match &forwarder {
        Some(forwarder) => Arc::clone(forwarder) as Arc<dyn LifecycleSink>,
        None => Arc::new(NoopSink),
    };

    let manager = SessionManager::new(Arc::new(backend.clone()), sink, ManagerOptions {
        default_profile: config.sessions.default_profile.clone(),
        connect_timeout: config.sessions.connect_timeout(),
        teardown_timeout: config.sessions.teardown_timeout(),
    });

    if config.sidecar.auto_start {
        let backend = backend.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.ensure_connected().await {
                warn!(error = %format!("{e:#}"), "sidecar not available yet, will retry on first init");
            }
        });
    }

    let app = build_app(AppState::new(manager.clone()));
    let bind = config.server.bind.as_str();
    let port = config.server.port;
    let listener = tokio::net::TcpListener::bind((bind, port))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    info!(addr = %listener.local_addr()?, "wagate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    manager.shutdown().await;
    if let Some(forwarder) = forwarder
        && tokio::time::timeout(WEBHOOK_DRAIN_TIMEOUT, forwarder.shutdown())
            .await
            .is_err()
    {
        warn!("timed out draining webhook queue");
    }
    if let Err(e) = backend.stop().await {
        warn!(error = %e, "failed to stop sidecar");
    }
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
