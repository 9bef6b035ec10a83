//! Lifecycle of the single streaming session this client drives.

use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::registry::{
    CreateOutcome, CreateSessionRequest, RegistryClient, RegistryError, SessionCheck, StreamItem,
};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Creating,
    PendingReady,
    Ready,
    Ended,
    Failed,
}

impl SessionStatus {
    fn accepts_create(self) -> bool {
        matches!(
            self,
            SessionStatus::Idle | SessionStatus::Ended | SessionStatus::Failed
        )
    }

    fn is_live(self) -> bool {
        matches!(self, SessionStatus::Ready | SessionStatus::PendingReady)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Creating => "creating",
            SessionStatus::PendingReady => "pending-ready",
            SessionStatus::Ready => "ready",
            SessionStatus::Ended => "ended",
            SessionStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub protocol: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;
        if !self.protocol.is_empty() {
            write!(f, " ({})", self.protocol)?;
        }
        Ok(())
    }
}

/// Where to reach a provisioned session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub host_group: String,
    pub signaling: Endpoint,
    pub media: Endpoint,
}

impl RouteInfo {
    /// Takes the first route group and, within it, the first `signaling` and
    /// the first `media` route.
    pub fn from_stream(item: &StreamItem) -> Result<Self, RegistryError> {
        let group = item.routes.first().ok_or_else(|| {
            RegistryError::Protocol(format!("session {} has no route groups", item.id))
        })?;
        let endpoint = |description: &str| {
            group
                .routes
                .iter()
                .find(|route| route.description == description)
                .map(|route| Endpoint {
                    host: group.host.clone(),
                    port: route.source_port,
                    protocol: route.protocol.clone(),
                })
                .ok_or_else(|| {
                    RegistryError::Protocol(format!(
                        "session {} has no {description} route",
                        item.id
                    ))
                })
        };
        Ok(Self {
            host_group: group.host.clone(),
            signaling: endpoint("signaling")?,
            media: endpoint("media")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    pub id: Option<String>,
    pub status: SessionStatus,
    pub route_info: Option<RouteInfo>,
    pub created_at: Option<OffsetDateTime>,
    pub request: Option<CreateSessionRequest>,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("cannot {operation} while session is {status}")]
    InvalidState {
        operation: &'static str,
        status: SessionStatus,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result of a teardown attempt that reached the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    Destroyed,
    /// The status check did not answer 200; nothing was destroyed.
    Skipped(StatusCode),
}

/// Verifies that `session_id` is known to the registry and destroys it.
pub async fn teardown(
    registry: &RegistryClient,
    session_id: &str,
) -> Result<Teardown, RegistryError> {
    match registry.session_status(session_id).await? {
        SessionCheck::NotReady(status) => {
            info!(
                target: "stage_viewer::session",
                session_id = %session_id,
                status = %status,
                "status check did not confirm session; skipping teardown"
            );
            Ok(Teardown::Skipped(status))
        }
        SessionCheck::Ready(_) => {
            registry.destroy_session(session_id).await?;
            info!(target: "stage_viewer::session", session_id = %session_id, "session destroyed");
            Ok(Teardown::Destroyed)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionTimer {
    PollStatus { session_id: String },
}

pub struct SessionController {
    registry: RegistryClient,
    poll_interval: Duration,
    session: Session,
    timers: Scheduler<SessionTimer>,
}

impl SessionController {
    pub fn new(registry: RegistryClient, poll_interval: Duration) -> Self {
        Self {
            registry,
            poll_interval,
            session: Session::default(),
            timers: Scheduler::new(),
        }
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn snapshot(&self) -> Session {
        self.session.clone()
    }

    /// Fence for poll timers; bumped by every create, teardown and channel
    /// loss.
    pub fn generation(&self) -> u64 {
        self.timers.generation()
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn pending_polls(&self) -> usize {
        self.timers.pending()
    }

    pub async fn create_session(
        &mut self,
        app_id: &str,
        version: &str,
        profile: &str,
    ) -> Result<&Session, SessionError> {
        if !self.session.status.accepts_create() {
            return Err(SessionError::InvalidState {
                operation: "create a session",
                status: self.session.status,
            });
        }
        self.timers.cancel_all();
        let request = CreateSessionRequest {
            app_id: app_id.to_string(),
            version: version.to_string(),
            profile: profile.to_string(),
        };
        self.session = Session {
            id: None,
            status: SessionStatus::Creating,
            route_info: None,
            created_at: Some(OffsetDateTime::now_utc()),
            request: Some(request.clone()),
        };
        info!(
            target: "stage_viewer::session",
            app = %app_id,
            version = %version,
            profile = %profile,
            "creating streaming session"
        );

        let outcome = match self.registry.create_session(&request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(target: "stage_viewer::session", error = %err, "session creation failed");
                self.session.status = SessionStatus::Failed;
                return Err(err.into());
            }
        };

        match outcome {
            CreateOutcome::Ready(item) => {
                self.session.id = Some(item.id.clone());
                self.become_ready(&item)?;
            }
            CreateOutcome::Provisioning(item) => {
                info!(
                    target: "stage_viewer::session",
                    session_id = %item.id,
                    "session accepted; waiting for provisioning"
                );
                self.session.id = Some(item.id.clone());
                self.session.status = SessionStatus::PendingReady;
                self.schedule_poll(item.id);
            }
        }
        Ok(&self.session)
    }

    fn become_ready(&mut self, item: &StreamItem) -> Result<(), SessionError> {
        match RouteInfo::from_stream(item) {
            Ok(routes) => {
                info!(
                    target: "stage_viewer::session",
                    session_id = %item.id,
                    signaling = %routes.signaling,
                    media = %routes.media,
                    "session ready"
                );
                self.session.route_info = Some(routes);
                self.session.status = SessionStatus::Ready;
                Ok(())
            }
            Err(err) => {
                warn!(target: "stage_viewer::session", error = %err, "session has unusable routes");
                self.session.status = SessionStatus::Failed;
                Err(err.into())
            }
        }
    }

    fn schedule_poll(&mut self, session_id: String) {
        self.timers.schedule_in(
            Instant::now(),
            self.poll_interval,
            SessionTimer::PollStatus { session_id },
        );
    }

    /// Runs every poll whose deadline has passed.
    pub async fn run_due(&mut self, now: Instant) -> Result<(), SessionError> {
        while let Some(SessionTimer::PollStatus { session_id }) = self.timers.pop_due(now) {
            self.poll_session_status(&session_id).await?;
        }
        Ok(())
    }

    /// One provisioning check. Anything but a 200 (including a transport
    /// failure) schedules the next check; there is no retry limit.
    pub async fn poll_session_status(
        &mut self,
        session_id: &str,
    ) -> Result<SessionStatus, SessionError> {
        if self.session.status != SessionStatus::PendingReady
            || self.session.id.as_deref() != Some(session_id)
        {
            debug!(target: "stage_viewer::session", session_id = %session_id, "ignoring poll for inactive session");
            return Ok(self.session.status);
        }
        let generation = self.timers.generation();
        let check = self.registry.session_status(session_id).await;
        if self.timers.generation() != generation {
            debug!(target: "stage_viewer::session", session_id = %session_id, "discarding stale poll result");
            return Ok(self.session.status);
        }

        match check {
            Ok(SessionCheck::Ready(item)) => self.become_ready(&item)?,
            Ok(SessionCheck::NotReady(status)) => {
                debug!(
                    target: "stage_viewer::session",
                    session_id = %session_id,
                    status = %status,
                    "session not ready yet"
                );
                self.schedule_poll(session_id.to_string());
            }
            Err(err) => {
                warn!(
                    target: "stage_viewer::session",
                    session_id = %session_id,
                    error = %err,
                    "status poll failed; retrying"
                );
                self.schedule_poll(session_id.to_string());
            }
        }
        Ok(self.session.status)
    }

    /// Blocks until the session is ready, driving provisioning polls.
    pub async fn wait_until_ready(&mut self) -> Result<&Session, SessionError> {
        loop {
            match self.session.status {
                SessionStatus::Ready => return Ok(&self.session),
                SessionStatus::PendingReady => {
                    let Some(deadline) = self.timers.next_deadline() else {
                        return Err(SessionError::InvalidState {
                            operation: "wait for readiness",
                            status: self.session.status,
                        });
                    };
                    tokio::time::sleep_until(deadline).await;
                    self.run_due(Instant::now()).await?;
                }
                status => {
                    return Err(SessionError::InvalidState {
                        operation: "wait for readiness",
                        status,
                    });
                }
            }
        }
    }

    /// Tears the session down. A failed status check or a refusal from the
    /// registry leaves the session exactly as it was.
    pub async fn end_session(&mut self) -> Result<Teardown, SessionError> {
        let status = self.session.status;
        let session_id = match (&self.session.id, status.is_live()) {
            (Some(id), true) => id.clone(),
            _ => {
                return Err(SessionError::InvalidState {
                    operation: "end the session",
                    status,
                });
            }
        };

        let outcome = teardown(&self.registry, &session_id).await?;
        if outcome == Teardown::Destroyed {
            self.timers.cancel_all();
            self.session.status = SessionStatus::Ended;
            self.session.route_info = None;
        }
        Ok(outcome)
    }

    /// The message channel died. Tries to release the session, then ends it
    /// locally whatever the registry says.
    pub async fn handle_channel_loss(&mut self, reason: Option<&str>) {
        warn!(
            target: "stage_viewer::session",
            reason = reason.unwrap_or("unknown"),
            "message channel lost; ending session"
        );
        if self.session.status.is_live() {
            if let Err(err) = self.end_session().await {
                warn!(target: "stage_viewer::session", error = %err, "best-effort teardown failed");
            }
        }
        self.timers.cancel_all();
        self.session.status = SessionStatus::Ended;
        self.session.route_info = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RawResponse, RegistryBackend};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use url::Url;

    #[derive(Default)]
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<RawResponse, RegistryError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn push(&self, status: StatusCode, body: Value) {
            let body = if body.is_null() {
                String::new()
            } else {
                body.to_string()
            };
            self.replies
                .lock()
                .unwrap()
                .push_back(Ok(RawResponse::new(status, body)));
        }

        fn push_error(&self) {
            self.replies
                .lock()
                .unwrap()
                .push_back(Err(RegistryError::Unavailable("connection refused".into())));
        }

        fn next(&self, call: String) -> Result<RawResponse, RegistryError> {
            self.calls.lock().unwrap().push(call);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RawResponse::new(StatusCode::NOT_FOUND, "")))
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RegistryBackend for ScriptedBackend {
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

    fn stream_item(id: &str) -> Value {
        json!({
            "id": id,
            "routes": {
                "node-7.stream.test": { "routes": [
                    { "description": "media", "source_port": 31000, "destination_port": 47998, "protocol": "UDP" },
                    { "description": "signaling", "source_port": 31001, "destination_port": 49100, "protocol": "TCP" },
                    { "description": "signaling", "source_port": 31002, "destination_port": 49101, "protocol": "TCP" }
                ] }
            }
        })
    }

    fn controller() -> (SessionController, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::default());
        let registry = RegistryClient::with_backend(
            Url::parse("http://apps.test/").unwrap(),
            Url::parse("http://stream.test/").unwrap(),
            backend.clone(),
        );
        (
            SessionController::new(registry, Duration::from_secs(10)),
            backend,
        )
    }

    #[test]
    fn route_info_takes_first_matching_routes() {
        let item: StreamItem = serde_json::from_value(stream_item("s-1")).unwrap();
        let routes = RouteInfo::from_stream(&item).unwrap();
        assert_eq!(routes.host_group, "node-7.stream.test");
        assert_eq!(routes.signaling.port, 31001);
        assert_eq!(routes.media.port, 31000);
        assert_eq!(routes.media.protocol, "UDP");
    }

    #[test]
    fn route_info_requires_signaling_and_media() {
        let item: StreamItem = serde_json::from_value(json!({
            "id": "s-1",
            "routes": { "h": { "routes": [
                { "description": "media", "source_port": 1 }
            ] } }
        }))
        .unwrap();
        assert!(matches!(
            RouteInfo::from_stream(&item),
            Err(RegistryError::Protocol(_))
        ));
        let empty: StreamItem = serde_json::from_value(json!({ "id": "s-2" })).unwrap();
        assert!(RouteInfo::from_stream(&empty).is_err());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn immediate_ready_populates_routes() {
        let (mut controller, backend) = controller();
        backend.push(StatusCode::OK, stream_item("s-1"));
        let session = controller
            .create_session("usd_viewer", "1.0", "default")
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Ready);
        assert_eq!(session.id.as_deref(), Some("s-1"));
        assert!(session.created_at.is_some());
        assert_eq!(controller.pending_polls(), 0);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn rejected_create_fails_and_allows_retry() {
        let (mut controller, backend) = controller();
        backend.push(StatusCode::BAD_REQUEST, json!({ "detail": "unknown profile" }));
        let err = controller
            .create_session("usd_viewer", "1.0", "bogus")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Registry(RegistryError::Rejected { .. })
        ));
        assert_eq!(controller.status(), SessionStatus::Failed);
        assert_eq!(backend.calls().len(), 1);

        backend.push(StatusCode::OK, stream_item("s-2"));
        controller
            .create_session("usd_viewer", "1.0", "default")
            .await
            .unwrap();
        assert_eq!(controller.status(), SessionStatus::Ready);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn create_is_rejected_while_session_is_live() {
        let (mut controller, backend) = controller();
        backend.push(StatusCode::OK, stream_item("s-1"));
        controller
            .create_session("usd_viewer", "1.0", "default")
            .await
            .unwrap();
        let err = controller
            .create_session("usd_viewer", "1.0", "default")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                status: SessionStatus::Ready,
                ..
            }
        ));
        assert_eq!(backend.calls().len(), 1);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn polling_survives_transport_failures() {
        let (mut controller, backend) = controller();
        backend.push(StatusCode::ACCEPTED, json!({ "id": "s-9" }));
        backend.push_error();
        backend.push(StatusCode::OK, stream_item("s-9"));
        controller
            .create_session("usd_viewer", "1.0", "default")
            .await
            .unwrap();
        let session = controller.wait_until_ready().await.unwrap();
        assert_eq!(session.status, SessionStatus::Ready);
        assert_eq!(
            backend.calls(),
            vec![
                "POST /streaming/stream",
                "GET /streaming/stream/s-9",
                "GET /streaming/stream/s-9"
            ]
        );
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn end_session_destroys_and_clears_routes() {
        let (mut controller, backend) = controller();
        backend.push(StatusCode::OK, stream_item("s-1"));
        controller
            .create_session("usd_viewer", "1.0", "default")
            .await
            .unwrap();
        backend.push(StatusCode::OK, stream_item("s-1"));
        backend.push(StatusCode::OK, Value::Null);
        assert_eq!(controller.end_session().await.unwrap(), Teardown::Destroyed);
        assert_eq!(controller.status(), SessionStatus::Ended);
        assert!(controller.session().route_info.is_none());
        assert_eq!(backend.calls().last().unwrap(), "DELETE /streaming/stream");
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn refused_destroy_keeps_session() {
        let (mut controller, backend) = controller();
        backend.push(StatusCode::OK, stream_item("s-1"));
        controller
            .create_session("usd_viewer", "1.0", "default")
            .await
            .unwrap();
        backend.push(StatusCode::OK, stream_item("s-1"));
        backend.push(StatusCode::OK, json!({ "detail": "session is busy" }));
        let err = controller.end_session().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Registry(RegistryError::Rejected { ref detail, .. }) if detail == "session is busy"
        ));
        assert_eq!(controller.status(), SessionStatus::Ready);
        assert!(controller.session().route_info.is_some());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn end_session_requires_live_session() {
        let (mut controller, backend) = controller();
        assert!(matches!(
            controller.end_session().await,
            Err(SessionError::InvalidState {
                status: SessionStatus::Idle,
                ..
            })
        ));
        assert!(backend.calls().is_empty());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn channel_loss_forces_end_and_cancels_polls() {
        let (mut controller, backend) = controller();
        backend.push(StatusCode::ACCEPTED, json!({ "id": "s-3" }));
        controller
            .create_session("usd_viewer", "1.0", "default")
            .await
            .unwrap();
        assert_eq!(controller.pending_polls(), 1);

        // status check during best-effort teardown answers 404
        controller.handle_channel_loss(Some("peer went away")).await;
        assert_eq!(controller.status(), SessionStatus::Ended);
        assert_eq!(controller.pending_polls(), 0);
        assert_eq!(controller.next_deadline(), None);

        let calls_before = backend.calls().len();
        tokio::time::sleep(Duration::from_secs(30)).await;
        controller.run_due(Instant::now()).await.unwrap();
        assert_eq!(backend.calls().len(), calls_before);
    }
}
