use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::scene::catalog::AssetEntry;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8011";
pub const DEFAULT_SESSION_POLL_SECS: u64 = 10;
pub const DEFAULT_LIVENESS_QUERY_SECS: u64 = 3;

/// Where the streamed application runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StreamSource {
    /// Provisioned through the streaming registry.
    Stream,
    /// Already running next to the client.
    Local,
}

/// Whether the client mirrors the stage or just shows the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ViewerMode {
    WebUi,
    StreamOnly,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub app_server: Url,
    pub stream_server: Url,
    pub source: StreamSource,
    pub mode: ViewerMode,
    pub session_poll_interval: Duration,
    pub liveness_query_interval: Duration,
    pub http_connect_timeout: Duration,
    pub http_timeout: Duration,
    pub assets: Vec<AssetEntry>,
}

/// On-disk shape; every field is optional and overrides the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    app_server: Option<String>,
    stream_server: Option<String>,
    source: Option<StreamSource>,
    mode: Option<ViewerMode>,
    session_poll_secs: Option<u64>,
    liveness_query_secs: Option<u64>,
    http_connect_timeout_secs: Option<u64>,
    http_timeout_secs: Option<u64>,
    assets: Option<Vec<AssetEntry>>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        let server = Url::parse(DEFAULT_SERVER).expect("default server url is valid");
        Self {
            app_server: server.clone(),
            stream_server: server,
            source: StreamSource::Stream,
            mode: ViewerMode::WebUi,
            session_poll_interval: Duration::from_secs(DEFAULT_SESSION_POLL_SECS),
            liveness_query_interval: Duration::from_secs(DEFAULT_LIVENESS_QUERY_SECS),
            http_connect_timeout: Duration::from_secs(3),
            http_timeout: Duration::from_secs(15),
            assets: default_assets(StreamSource::Stream),
        }
    }
}

impl ViewerConfig {
    /// Defaults, then the optional file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            config.apply_toml(&raw).map_err(|err| match err {
                FileError::Parse(source) => ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                },
                FileError::Invalid(message) => ConfigError::Invalid(message),
            })?;
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_toml(&mut self, raw: &str) -> Result<(), FileError> {
        let file: FileConfig = toml::from_str(raw).map_err(FileError::Parse)?;
        let source_changed = file.source.is_some() && file.assets.is_none();
        if let Some(source) = file.source {
            self.source = source;
        }
        if let Some(server) = file.app_server {
            self.app_server = parse_server_url(&server).map_err(|e| FileError::Invalid(e.to_string()))?;
        }
        if let Some(server) = file.stream_server {
            self.stream_server =
                parse_server_url(&server).map_err(|e| FileError::Invalid(e.to_string()))?;
        }
        if let Some(mode) = file.mode {
            self.mode = mode;
        }
        if let Some(secs) = file.session_poll_secs {
            self.session_poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.liveness_query_secs {
            self.liveness_query_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.http_connect_timeout_secs {
            self.http_connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.http_timeout_secs {
            self.http_timeout = Duration::from_secs(secs);
        }
        if let Some(assets) = file.assets {
            self.assets = assets;
        } else if source_changed {
            self.assets = default_assets(self.source);
        }
        Ok(())
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(server) = non_empty("STAGE_VIEWER_APP_SERVER") {
            self.app_server = parse_server_url(&server)?;
        }
        if let Some(server) = non_empty("STAGE_VIEWER_STREAM_SERVER") {
            self.stream_server = parse_server_url(&server)?;
        }
        if let Some(source) = non_empty("STAGE_VIEWER_SOURCE") {
            let parsed = match source.to_ascii_lowercase().as_str() {
                "stream" => StreamSource::Stream,
                "local" => StreamSource::Local,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "STAGE_VIEWER_SOURCE must be 'stream' or 'local', got '{other}'"
                    )));
                }
            };
            if parsed != self.source {
                self.source = parsed;
                self.assets = default_assets(parsed);
            }
        }
        Ok(())
    }

    pub fn with_app_server(mut self, server: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(server) = server {
            self.app_server = parse_server_url(server)?;
        }
        Ok(self)
    }

    pub fn with_stream_server(mut self, server: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(server) = server {
            self.stream_server = parse_server_url(server)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assets.is_empty() {
            return Err(ConfigError::Invalid("asset catalog cannot be empty".into()));
        }
        if self.session_poll_interval.is_zero() || self.liveness_query_interval.is_zero() {
            return Err(ConfigError::Invalid("poll intervals must be non-zero".into()));
        }
        Ok(())
    }
}

enum FileError {
    Parse(toml::de::Error),
    Invalid(String),
}

pub fn default_assets(source: StreamSource) -> Vec<AssetEntry> {
    let prefix = match source {
        StreamSource::Stream => "/app/samples",
        StreamSource::Local => "./samples",
    };
    vec![
        AssetEntry::new("Sample 1", format!("{prefix}/stage01.usd")),
        AssetEntry::new("Sample 2", format!("{prefix}/stage02.usd")),
    ]
}

/// Accepts `host:port` as well as full URLs; bare hosts get `http://` when
/// they look local or private and `https://` otherwise.
pub fn parse_server_url(raw: &str) -> Result<Url, ConfigError> {
    let mut base = raw.trim().to_string();
    if base.is_empty() {
        return Err(ConfigError::Invalid("server url cannot be empty".into()));
    }
    if !base.contains("://") {
        base = format!("{}{base}", infer_scheme(&base));
    }
    Url::parse(&base)
        .map_err(|err| ConfigError::Invalid(format!("invalid server url '{raw}': {err}")))
}

fn infer_scheme(base: &str) -> &'static str {
    if is_local_host(host_of(base)) {
        "http://"
    } else {
        "https://"
    }
}

/// Host of a scheme-less `host[:port][/path]`, without brackets or port.
fn host_of(base: &str) -> &str {
    let authority = base.split(['/', '?', '#']).next().unwrap_or(base);
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    match authority.strip_prefix('[') {
        Some(bracketed) => bracketed.split(']').next().unwrap_or(bracketed),
        None => authority.split(':').next().unwrap_or(authority),
    }
}

fn is_local_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip.is_loopback() || ip.is_private() || ip.is_unspecified(),
        Ok(IpAddr::V6(ip)) => ip.is_loopback() || ip.is_unspecified(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_registry_provisioned_stream() {
        let config = ViewerConfig::default();
        assert_eq!(config.session_poll_interval, Duration::from_secs(10));
        assert_eq!(config.liveness_query_interval, Duration::from_secs(3));
        assert_eq!(config.assets[0].url, "/app/samples/stage01.usd");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bare_hosts_get_an_inferred_scheme() {
        assert_eq!(
            parse_server_url("localhost:8011").unwrap().as_str(),
            "http://localhost:8011/"
        );
        assert_eq!(
            parse_server_url("10.0.0.5:8011").unwrap().as_str(),
            "http://10.0.0.5:8011/"
        );
        assert_eq!(
            parse_server_url("streaming.example.com").unwrap().as_str(),
            "https://streaming.example.com/"
        );
        assert!(matches!(
            parse_server_url("  "),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn inferred_scheme_ignores_the_port() {
        assert_eq!(
            parse_server_url("0.0.0.0:8011").unwrap().as_str(),
            "http://0.0.0.0:8011/"
        );
        assert_eq!(
            parse_server_url("[::1]:8011").unwrap().as_str(),
            "http://[::1]:8011/"
        );
        assert_eq!(
            parse_server_url("172.20.1.4:8011/api").unwrap().as_str(),
            "http://172.20.1.4:8011/api"
        );
        assert_eq!(
            parse_server_url("172.40.1.4:8011").unwrap().as_str(),
            "https://172.40.1.4:8011/"
        );
        assert_eq!(
            parse_server_url("localhost.example.com:443").unwrap().as_str(),
            "https://localhost.example.com/"
        );
    }

    #[test]
    fn toml_overrides_defaults() {
        let mut config = ViewerConfig::default();
        let raw = r#"
            app_server = "apps.internal:9000"
            source = "local"
            mode = "stream-only"
            session_poll_secs = 4
        "#;
        assert!(config.apply_toml(raw).is_ok());
        assert_eq!(config.app_server.as_str(), "https://apps.internal:9000/");
        assert_eq!(config.source, StreamSource::Local);
        assert_eq!(config.mode, ViewerMode::StreamOnly);
        assert_eq!(config.session_poll_interval, Duration::from_secs(4));
        assert_eq!(config.assets[1].url, "./samples/stage02.usd");
    }

    #[test]
    fn toml_assets_replace_catalog() {
        let mut config = ViewerConfig::default();
        let raw = r#"
            [[assets]]
            name = "Factory"
            url = "/data/factory.usd"
        "#;
        assert!(config.apply_toml(raw).is_ok());
        assert_eq!(config.assets, vec![AssetEntry::new("Factory", "/data/factory.usd")]);
    }

    #[test]
    fn unknown_toml_keys_are_rejected() {
        let mut config = ViewerConfig::default();
        assert!(matches!(
            config.apply_toml("poll = 3"),
            Err(FileError::Parse(_))
        ));
    }

    #[test]
    fn environment_overrides_servers_and_source() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("STAGE_VIEWER_STREAM_SERVER", "192.168.1.20:8011"),
            ("STAGE_VIEWER_SOURCE", "local"),
        ]);
        let mut config = ViewerConfig::default();
        config
            .apply_env(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();
        assert_eq!(config.stream_server.as_str(), "http://192.168.1.20:8011/");
        assert_eq!(config.source, StreamSource::Local);
        assert_eq!(config.assets[0].url, "./samples/stage01.usd");
    }

    #[test]
    fn invalid_source_in_environment_is_an_error() {
        let mut config = ViewerConfig::default();
        let err = config
            .apply_env(|key| (key == "STAGE_VIEWER_SOURCE").then(|| "cloud".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
