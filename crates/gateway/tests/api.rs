#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the HTTP control API.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    serde_json::{Value, json},
    tokio::net::TcpListener,
};

use {
    wagate_gateway::{AppState, build_app},
    wagate_sessions::{
        BackendEvent, LifecycleSink, ManagerOptions, SessionManager,
        memory::{InMemoryBackend, RecordingSink},
    },
    wagate_webhook::{ForwarderOptions, WebhookForwarder},
};

struct TestServer {
    addr: SocketAddr,
    backend: Arc<InMemoryBackend>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> (Self, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let server = Self::start_with_sink(sink.clone()).await;
        (server, sink)
    }

    async fn start_with_sink(sink: Arc<dyn LifecycleSink>) -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = SessionManager::new(backend.clone(), sink, ManagerOptions {
            default_profile: "default".into(),
            connect_timeout: Duration::from_secs(2),
            teardown_timeout: Duration::from_secs(1),
        });
        let app = build_app(AppState::new(manager));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            backend,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn wait_open(&self, profile_id: &str) {
        for _ in 0..400 {
            if self.backend.is_open(profile_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("backend stream for {profile_id} never opened");
    }

    async fn wait_connected(&self, profile_id: &str) {
        for _ in 0..400 {
            let (_, body) = self.get(&format!("/status/{profile_id}")).await;
            if body["connected"] == true {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{profile_id} never connected");
    }

    /// Init a profile and drive it to `connected`.
    async fn connect(&self, profile_id: &str) {
        let (status, _) = self
            .post(
                "/init",
                json!({ "profileId": profile_id, "userId": "u1" }),
            )
            .await;
        assert_eq!(status, 200);
        self.wait_open(profile_id).await;
        self.backend
            .emit(profile_id, BackendEvent::Ready {
                phone_number: Some("15551234567".into()),
                display_name: Some("Alice".into()),
            })
            .await;
        self.wait_connected(profile_id).await;
    }
}

#[tokio::test]
async fn health_reports_active_sessions() {
    let (server, _sink) = TestServer::start().await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["activeSessionCount"], 0);

    server
        .post("/init", json!({ "profileId": "p1", "userId": "u1" }))
        .await;
    let (_, body) = server.get("/health").await;
    assert_eq!(body["activeSessionCount"], 1);
}

#[tokio::test]
async fn init_then_init_again_returns_existing() {
    let (server, _sink) = TestServer::start().await;
    let (status, body) = server
        .post("/init", json!({ "profileId": "p1", "userId": "u1" }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "success": true, "status": "initializing" }));

    let (status, body) = server
        .post("/init", json!({ "profileId": "p1", "userId": "u1" }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "existing");
    server.wait_open("p1").await;
    assert_eq!(server.backend.connects().len(), 1);
}

#[tokio::test]
async fn init_requires_profile_and_user() {
    let (server, _sink) = TestServer::start().await;
    for body in [
        json!({ "userId": "u1" }),
        json!({ "profileId": "p1" }),
        json!({ "profileId": "p1", "userId": "u1", "usePairing": true }),
    ] {
        let (status, body) = server.post("/init", body).await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("required"));
    }
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let (server, _sink) = TestServer::start().await;
    let resp = server
        .client
        .post(server.url("/init"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn pairing_code_flow() {
    let (server, sink) = TestServer::start().await;
    let (status, _) = server
        .post(
            "/init",
            json!({
                "profileId": "p1",
                "userId": "u1",
                "usePairing": true,
                "phoneNumber": "+1 555 123 4567",
            }),
        )
        .await;
    assert_eq!(status, 200);
    server.wait_open("p1").await;
    assert_eq!(
        server.backend.connects()[0].pairing_phone.as_deref(),
        Some("15551234567")
    );

    server
        .backend
        .emit("p1", BackendEvent::PairingCode("ABCD-EFGH".into()))
        .await;
    assert!(sink.wait_for(1, Duration::from_secs(2)).await);
    let (_, body) = server.get("/status/p1").await;
    assert_eq!(body["state"], "awaiting_pairing");
    assert_eq!(body["session"]["pairingCode"], "ABCD-EFGH");
}

#[tokio::test]
async fn status_of_unknown_profile_is_disconnected() {
    let (server, _sink) = TestServer::start().await;
    let (status, body) = server.get("/status/nobody").await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["profileId"], "nobody");
    assert_eq!(body["connected"], false);
    assert_eq!(body["state"], "disconnected");
    assert!(body.get("session").is_none());
}

#[tokio::test]
async fn connected_profile_can_send() {
    let (server, sink) = TestServer::start().await;
    server.connect("p1").await;

    let (_, body) = server.get("/status/p1").await;
    assert_eq!(body["state"], "connected");
    assert_eq!(body["session"]["displayName"], "Alice");

    let (status, body) = server
        .post(
            "/send",
            json!({ "profileId": "p1", "number": "+1 (555) 987-6543", "message": "hi" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert!(body["messageId"].is_string());

    let sent = server.backend.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "15559876543@c.us");
    assert_eq!(sink.event_names(), vec!["connected"]);
}

#[tokio::test]
async fn send_defaults_to_default_profile() {
    let (server, _sink) = TestServer::start().await;
    server.connect("default").await;

    let (status, _) = server
        .post(
            "/send",
            json!({ "number": "15551234567@c.us", "message": "hello" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(server.backend.sent()[0].profile_id, "default");
}

#[tokio::test]
async fn send_without_connected_session_is_not_ready() {
    let (server, _sink) = TestServer::start().await;
    let (status, body) = server
        .post("/send", json!({ "number": "15551234567", "message": "hi" }))
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["success"], false);

    server
        .post("/init", json!({ "profileId": "default", "userId": "u1" }))
        .await;
    server.wait_open("default").await;
    let (status, _) = server
        .post("/send", json!({ "number": "15551234567", "message": "hi" }))
        .await;
    assert_eq!(status, 409);
    assert!(server.backend.sent().is_empty());
}

#[tokio::test]
async fn backend_send_failure_is_bad_gateway() {
    let (server, _sink) = TestServer::start().await;
    server.connect("p1").await;
    server.backend.fail_sends(true);

    let (status, body) = server
        .post(
            "/send",
            json!({ "profileId": "p1", "number": "15551234567", "message": "hi" }),
        )
        .await;
    assert_eq!(status, 502);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (server, sink) = TestServer::start().await;
    server.connect("p1").await;

    for _ in 0..2 {
        let (status, body) = server
            .post("/disconnect", json!({ "profileId": "p1" }))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({ "success": true }));
    }

    let (_, body) = server.get("/status/p1").await;
    assert_eq!(body["connected"], false);
    assert_eq!(sink.event_names(), vec!["connected", "disconnected"]);

    let (status, _) = server.post("/disconnect", json!({})).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn sessions_lists_profiles() {
    let (server, _sink) = TestServer::start().await;
    server.connect("p1").await;
    server
        .post("/init", json!({ "profileId": "p2", "userId": "u2" }))
        .await;

    let (status, body) = server.get("/sessions").await;
    assert_eq!(status, 200);
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0]["profileId"], "p1");
    assert_eq!(sessions[0]["connected"], true);
    assert_eq!(sessions[1]["profileId"], "p2");
    assert_eq!(sessions[1]["userId"], "u2");
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let (server, _sink) = TestServer::start().await;
    let (status, body) = server.get("/nope").await;
    assert_eq!(status, 404);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn connected_event_reaches_webhook() {
    let mut hook = mockito::Server::new_async().await;
    let mock = hook
        .mock("POST", "/events")
        .match_body(mockito::Matcher::PartialJson(json!({
            "profileId": "p1",
            "userId": "u1",
            "event": "connected",
            "data": { "phoneNumber": "15551234567", "displayName": "Alice" },
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let forwarder = Arc::new(
        WebhookForwarder::spawn(ForwarderOptions {
            url: format!("{}/events", hook.url()),
            secret: None,
            timeout: Duration::from_secs(2),
            max_attempts: 1,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(10),
            queue_capacity: 16,
        })
        .unwrap(),
    );
    let server = TestServer::start_with_sink(forwarder.clone()).await;
    server.connect("p1").await;

    forwarder.shutdown().await;
    mock.assert_async().await;
    assert_eq!(forwarder.stats().delivered, 1);
}

#[tokio::test]
async fn unreachable_webhook_does_not_affect_sessions() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let forwarder = Arc::new(
        WebhookForwarder::spawn(ForwarderOptions {
            url: format!("http://127.0.0.1:{port}/events"),
            secret: None,
            timeout: Duration::from_secs(1),
            max_attempts: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            queue_capacity: 16,
        })
        .unwrap(),
    );
    let server = TestServer::start_with_sink(forwarder.clone()).await;
    server.connect("p1").await;

    forwarder.shutdown().await;
    assert_eq!(forwarder.stats().failed, 1);

    let (_, body) = server.get("/status/p1").await;
    assert_eq!(body["connected"], true);
    assert_eq!(body["state"], "connected");
}
