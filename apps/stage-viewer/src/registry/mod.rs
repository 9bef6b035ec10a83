//! Client for the application catalog and streaming session registry.
//!
//! The HTTP transport sits behind [`RegistryBackend`] so the lifecycle
//! controller can be exercised against scripted responses.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::{self, DeserializeOwned, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::ViewerConfig;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid registry configuration: {0}")]
    InvalidConfig(String),
    #[error("registry unavailable: {0}")]
    Unavailable(String),
    #[error("registry rejected request ({status}): {detail}")]
    Rejected { status: StatusCode, detail: String },
    #[error("unexpected registry response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::Unavailable(err.to_string())
    }
}

/// Status and body of a registry reply, before interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait RegistryBackend: Send + Sync {
    async fn get(&self, url: Url) -> Result<RawResponse, RegistryError>;

    async fn post_json(&self, url: Url, body: Value) -> Result<RawResponse, RegistryError>;

    async fn delete_json(&self, url: Url, body: Value) -> Result<RawResponse, RegistryError>;
}

pub struct ReqwestRegistryBackend {
    client: reqwest::Client,
}

impl ReqwestRegistryBackend {
    pub fn new(connect_timeout: Duration, timeout: Duration) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn finish(response: reqwest::Response) -> Result<RawResponse, RegistryError> {
        let status = response.status();
        let body = response.text().await?;
        Ok(RawResponse { status, body })
    }
}

#[async_trait]
impl RegistryBackend for ReqwestRegistryBackend {
    async fn get(&self, url: Url) -> Result<RawResponse, RegistryError> {
        let response = self.client.get(url).send().await?;
        Self::finish(response).await
    }

    async fn post_json(&self, url: Url, body: Value) -> Result<RawResponse, RegistryError> {
        let response = self.client.post(url).json(&body).send().await?;
        Self::finish(response).await
    }

    async fn delete_json(&self, url: Url, body: Value) -> Result<RawResponse, RegistryError> {
        let response = self.client.delete(url).json(&body).send().await?;
        Self::finish(response).await
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Application {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct VersionItem {
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Page<T> {
    #[serde(default)]
    items: Vec<T>,
}

/// One port mapping of a provisioned session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Route {
    pub description: String,
    pub source_port: u16,
    #[serde(default)]
    pub destination_port: u16,
    #[serde(default)]
    pub protocol: String,
}

/// Routes exposed through one host, in the order the registry listed them.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteGroup {
    pub host: String,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamItem {
    pub id: String,
    #[serde(default, deserialize_with = "ordered_route_groups")]
    pub routes: Vec<RouteGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateSessionRequest {
    #[serde(rename = "id")]
    pub app_id: String,
    pub version: String,
    pub profile: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// Session is up and its routes are in the payload.
    Ready(StreamItem),
    /// Accepted (202); the session is still being provisioned.
    Provisioning(StreamItem),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCheck {
    Ready(StreamItem),
    NotReady(StatusCode),
}

#[derive(Clone)]
pub struct RegistryClient {
    app_server: Url,
    stream_server: Url,
    backend: Arc<dyn RegistryBackend>,
}

impl RegistryClient {
    pub fn new(config: &ViewerConfig) -> Result<Self, RegistryError> {
        let backend = ReqwestRegistryBackend::new(config.http_connect_timeout, config.http_timeout)?;
        Ok(Self::with_backend(
            config.app_server.clone(),
            config.stream_server.clone(),
            Arc::new(backend),
        ))
    }

    pub fn with_backend(app_server: Url, stream_server: Url, backend: Arc<dyn RegistryBackend>) -> Self {
        Self {
            app_server,
            stream_server,
            backend,
        }
    }

    pub fn stream_server(&self) -> &Url {
        &self.stream_server
    }

    pub async fn list_applications(&self) -> Result<Vec<Application>, RegistryError> {
        let url = endpoint(&self.app_server, &["cfg", "apps"])?;
        let page: Page<Application> = self.get_listing(url).await?;
        Ok(page.items)
    }

    pub async fn list_versions(&self, app_id: &str) -> Result<Vec<String>, RegistryError> {
        let url = endpoint(&self.app_server, &["cfg", "apps", app_id, "versions"])?;
        let page: Page<VersionItem> = self.get_listing(url).await?;
        Ok(page.items.into_iter().map(|item| item.version).collect())
    }

    pub async fn list_profiles(
        &self,
        app_id: &str,
        version: &str,
    ) -> Result<Vec<Profile>, RegistryError> {
        let url = endpoint(
            &self.app_server,
            &["cfg", "apps", app_id, "versions", version, "profiles"],
        )?;
        let page: Page<Profile> = self.get_listing(url).await?;
        Ok(page.items)
    }

    pub async fn list_sessions(&self) -> Result<Vec<StreamItem>, RegistryError> {
        let url = endpoint(&self.stream_server, &["streaming", "stream"])?;
        let page: Page<StreamItem> = self.get_listing(url).await?;
        Ok(page.items)
    }

    /// 200 means the session is ready; anything else means not (yet).
    pub async fn session_status(&self, session_id: &str) -> Result<SessionCheck, RegistryError> {
        let url = endpoint(&self.stream_server, &["streaming", "stream", session_id])?;
        let response = self.backend.get(url).await?;
        debug!(target: "stage_viewer::registry", session_id, status = %response.status, "session status");
        if response.status != StatusCode::OK {
            return Ok(SessionCheck::NotReady(response.status));
        }
        let item = parse_body::<StreamItem>(&response.body, "session status")?;
        Ok(SessionCheck::Ready(item))
    }

    pub async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateOutcome, RegistryError> {
        let url = endpoint(&self.stream_server, &["streaming", "stream"])?;
        let body = serde_json::to_value(request)
            .map_err(|err| RegistryError::Protocol(format!("unable to encode request: {err}")))?;
        let response = self.backend.post_json(url, body).await?;
        debug!(target: "stage_viewer::registry", app = %request.app_id, status = %response.status, "create session");
        if response.status.as_u16() >= 400 {
            return Err(rejected(response));
        }
        if !response.status.is_success() {
            return Err(RegistryError::Protocol(format!(
                "unexpected status {} creating session",
                response.status
            )));
        }
        let item = parse_body::<StreamItem>(&response.body, "created session")?;
        if response.status == StatusCode::ACCEPTED {
            Ok(CreateOutcome::Provisioning(item))
        } else {
            Ok(CreateOutcome::Ready(item))
        }
    }

    /// The registry answers a successful destroy with an empty body; any text
    /// it sends back is the reason it refused.
    pub async fn destroy_session(&self, session_id: &str) -> Result<(), RegistryError> {
        let url = endpoint(&self.stream_server, &["streaming", "stream"])?;
        let body = serde_json::json!({ "id": session_id });
        let response = self.backend.delete_json(url, body).await?;
        debug!(target: "stage_viewer::registry", session_id, status = %response.status, "destroy session");
        if !response.status.is_success() || !response.body.trim().is_empty() {
            return Err(rejected(response));
        }
        Ok(())
    }

    async fn get_listing<T: DeserializeOwned>(&self, url: Url) -> Result<T, RegistryError> {
        let context = url.path().to_string();
        let response = self.backend.get(url).await?;
        debug!(target: "stage_viewer::registry", path = %context, status = %response.status, "listing");
        if !response.status.is_success() {
            return Err(rejected(response));
        }
        parse_body(&response.body, &context)
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, RegistryError> {
    let mut url = base.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            RegistryError::InvalidConfig(format!("{base} cannot be used as a base url"))
        })?;
        path.pop_if_empty().extend(segments);
    }
    Ok(url)
}

fn parse_body<T: DeserializeOwned>(body: &str, context: &str) -> Result<T, RegistryError> {
    serde_json::from_str(body)
        .map_err(|err| RegistryError::Protocol(format!("malformed {context} payload: {err}")))
}

#[derive(Deserialize)]
struct ErrorItem {
    detail: Value,
}

fn rejected(response: RawResponse) -> RegistryError {
    let detail = match serde_json::from_str::<ErrorItem>(&response.body) {
        Ok(ErrorItem {
            detail: Value::String(text),
        }) => text,
        Ok(ErrorItem { detail }) => detail.to_string(),
        Err(_) => response.body.trim().to_string(),
    };
    RegistryError::Rejected {
        status: response.status,
        detail,
    }
}

#[derive(Deserialize)]
struct RawRouteGroup {
    #[serde(default)]
    routes: Vec<Route>,
}

fn ordered_route_groups<'de, D>(deserializer: D) -> Result<Vec<RouteGroup>, D::Error>
where
    D: Deserializer<'de>,
{
    struct GroupsVisitor;

    impl<'de> Visitor<'de> for GroupsVisitor {
        type Value = Vec<RouteGroup>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of host to route group")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut groups = Vec::new();
            while let Some((host, group)) = map.next_entry::<String, RawRouteGroup>()? {
                groups.push(RouteGroup {
                    host,
                    routes: group.routes,
                });
            }
            Ok(groups)
        }
    }

    deserializer.deserialize_any(GroupsVisitor)
}
