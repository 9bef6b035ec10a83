#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

use stage_viewer_core::channel::RecordingChannel;
use stage_viewer_core::config::ViewerMode;
use stage_viewer_core::registry::{RawResponse, RegistryBackend, RegistryClient, RegistryError};
use stage_viewer_core::scene::{AssetCatalog, AssetEntry, SceneSynchronizer};

pub fn stream_item(id: &str) -> Value {
    json!({
        "id": id,
        "routes": {
            "node-7.stream.test": { "routes": [
                { "description": "control", "source_port": 30999, "destination_port": 8080, "protocol": "TCP" },
                { "description": "signaling", "source_port": 31001, "destination_port": 49100, "protocol": "TCP" },
                { "description": "media", "source_port": 31000, "destination_port": 47998, "protocol": "UDP" },
                { "description": "media", "source_port": 31005, "destination_port": 47999, "protocol": "UDP" }
            ] },
            "node-8.stream.test": { "routes": [
                { "description": "signaling", "source_port": 41001, "destination_port": 49100, "protocol": "TCP" },
                { "description": "media", "source_port": 41000, "destination_port": 47998, "protocol": "UDP" }
            ] }
        }
    })
}

pub fn sample_catalog() -> AssetCatalog {
    AssetCatalog::new(vec![
        AssetEntry::new("Sample 1", "/app/samples/stage01.usd"),
        AssetEntry::new("Sample 2", "/app/samples/stage02.usd"),
    ])
    .expect("catalog is not empty")
}

pub fn recording_synchronizer(
    mode: ViewerMode,
) -> (SceneSynchronizer<RecordingChannel>, RecordingChannel) {
    let channel = RecordingChannel::new();
    let synchronizer = SceneSynchronizer::new(
        channel.clone(),
        sample_catalog(),
        mode,
        Duration::from_secs(3),
    );
    (synchronizer, channel)
}

pub fn envelope(event_type: &str, payload: Value) -> String {
    json!({ "event_type": event_type, "payload": payload }).to_string()
}

/// Registry backend answering from a queue; unscripted requests get a 404.
#[derive(Default)]
pub struct ScriptedRegistry {
    replies: Mutex<VecDeque<RawResponse>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRegistry {
    pub fn push(&self, status: u16, body: Value) {
        let status = reqwest::StatusCode::from_u16(status).expect("valid status");
        let body = if body.is_null() {
            String::new()
        } else {
            body.to_string()
        };
        self.replies
            .lock()
            .unwrap()
            .push_back(RawResponse::new(status, body));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn next(&self, call: String) -> Result<RawResponse, RegistryError> {
        self.calls.lock().unwrap().push(call);
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| RawResponse::new(reqwest::StatusCode::NOT_FOUND, "")))
    }
}

#[async_trait]
impl RegistryBackend for ScriptedRegistry {
    async fn get(&self, url: Url) -> Result<RawResponse, RegistryError> {
        self.next(format!("GET {}", url.path()))
    }

    async fn post_json(&self, url: Url, _body: Value) -> Result<RawResponse, RegistryError> {
        self.next(format!("POST {}", url.path()))
    }

    async fn delete_json(&self, url: Url, _body: Value) -> Result<RawResponse, RegistryError> {
        self.next(format!("DELETE {}", url.path()))
    }
}

pub fn scripted_client(backend: Arc<ScriptedRegistry>) -> RegistryClient {
    RegistryClient::with_backend(
        Url::parse("http://apps.test/").unwrap(),
        Url::parse("http://stream.test/").unwrap(),
        backend,
    )
}

/// In-process stand-in for the catalog and streaming registry.
#[derive(Clone, Default)]
pub struct FakeRegistry {
    inner: Arc<Mutex<FakeRegistryState>>,
}

#[derive(Default)]
struct FakeRegistryState {
    create_reply: Option<(StatusCode, Value)>,
    status_replies: VecDeque<(StatusCode, Value)>,
    delete_reply: Option<(StatusCode, String)>,
    requests: Vec<String>,
    bodies: Vec<Value>,
}

impl FakeRegistry {
    pub fn on_create(&self, status: u16, body: Value) {
        self.inner.lock().unwrap().create_reply = Some((status_code(status), body));
    }

    pub fn on_status(&self, status: u16, body: Value) {
        self.inner
            .lock()
            .unwrap()
            .status_replies
            .push_back((status_code(status), body));
    }

    pub fn on_delete(&self, status: u16, body: &str) {
        self.inner.lock().unwrap().delete_reply = Some((status_code(status), body.to_string()));
    }

    pub fn requests(&self) -> Vec<String> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.inner.lock().unwrap().bodies.clone()
    }

    fn record(&self, request: String, body: Option<Value>) {
        let mut state = self.inner.lock().unwrap();
        state.requests.push(request);
        if let Some(body) = body {
            state.bodies.push(body);
        }
    }

    pub async fn spawn(self) -> Url {
        let app = Router::new()
            .route("/cfg/apps", get(list_apps))
            .route(
                "/streaming/stream",
                get(list_streams).post(create_stream).delete(delete_stream),
            )
            .route("/streaming/stream/:id", get(stream_status))
            .with_state(self);
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake registry");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve fake registry");
        });
        Url::parse(&format!("http://{addr}/")).expect("fake registry url")
    }
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).expect("valid status")
}

async fn list_apps(State(registry): State<FakeRegistry>) -> Json<Value> {
    registry.record("GET /cfg/apps".into(), None);
    Json(json!({
        "offset": 0,
        "limit": 50,
        "count": 2,
        "items": [
            { "id": "usd_viewer", "name": "USD Viewer", "description": "Stage viewer", "tags": ["viewer"] },
            { "id": "usd_composer", "name": "USD Composer", "description": "", "tags": [] }
        ]
    }))
}

async fn list_streams(State(registry): State<FakeRegistry>) -> Json<Value> {
    registry.record("GET /streaming/stream".into(), None);
    Json(json!({ "offset": 0, "limit": 50, "count": 1, "items": [stream_item("s-live")] }))
}

async fn create_stream(
    State(registry): State<FakeRegistry>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    registry.record("POST /streaming/stream".into(), Some(body));
    let reply = registry.inner.lock().unwrap().create_reply.clone();
    let (status, body) =
        reply.unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, json!({ "detail": "unscripted" })));
    (status, Json(body))
}

async fn stream_status(
    State(registry): State<FakeRegistry>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    registry.record(format!("GET /streaming/stream/{id}"), None);
    let reply = registry.inner.lock().unwrap().status_replies.pop_front();
    let (status, body) =
        reply.unwrap_or((StatusCode::NOT_FOUND, json!({ "detail": "not found" })));
    (status, Json(body))
}

async fn delete_stream(
    State(registry): State<FakeRegistry>,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    registry.record("DELETE /streaming/stream".into(), Some(body));
    let reply = registry.inner.lock().unwrap().delete_reply.clone();
    reply.unwrap_or((StatusCode::OK, String::new()))
}
