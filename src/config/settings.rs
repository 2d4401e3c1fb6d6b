use super::{default_state_root, ConfigError};
use crate::broadcast::{RetryPolicy, DEFAULT_TOPIC_PREFIX};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_WEBSOCKET_BIND: &str = "127.0.0.1:8765";
const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_STORE_FILE: &str = "history.sqlite3";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    File,
    Memory,
}

impl CacheBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default)]
    pub backend: CacheBackend,
    /// Directory for the file backend; relative paths resolve under `state_root`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSettings {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_websocket_bind")]
    pub websocket_bind: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_retry_backoff_ms() -> u64 {
    RetryPolicy::default().backoff.as_millis() as u64
}

fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.to_string()
}

fn default_websocket_bind() -> String {
    DEFAULT_WEBSOCKET_BIND.to_string()
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            topic_prefix: default_topic_prefix(),
            websocket_bind: default_websocket_bind(),
            webhook_url: None,
        }
    }
}

impl BroadcastSettings {
    /// Where `emit` posts envelopes: the configured webhook, otherwise the
    /// publish endpoint of a local `serve` on `websocket_bind`.
    pub fn publish_url(&self) -> String {
        if let Some(url) = &self.webhook_url {
            return url.trim().to_string();
        }
        match self.websocket_bind.parse::<SocketAddr>() {
            Ok(mut addr) => {
                if addr.ip().is_unspecified() {
                    let loopback = match addr {
                        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
                    };
                    addr.set_ip(loopback);
                }
                format!("http://{addr}")
            }
            Err(_) => format!("http://{}", self.websocket_bind),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub state_root: Option<PathBuf>,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub broadcast: BroadcastSettings,
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(root) = &self.state_root {
            if !root.is_absolute() {
                return Err(ConfigError::Settings(
                    "`state_root` must be an absolute path".to_string(),
                ));
            }
        }
        if self.broadcast.max_attempts == 0 {
            return Err(ConfigError::Settings(
                "`broadcast.max_attempts` must be at least 1".to_string(),
            ));
        }
        if self.broadcast.topic_prefix.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`broadcast.topic_prefix` must be non-empty".to_string(),
            ));
        }
        if self.broadcast.websocket_bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Settings(format!(
                "`broadcast.websocket_bind` must be a socket address, got `{}`",
                self.broadcast.websocket_bind
            )));
        }
        if let Some(url) = &self.broadcast.webhook_url {
            let url = url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Settings(
                    "`broadcast.webhook_url` must start with http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn resolve_state_root(&self) -> Result<PathBuf, ConfigError> {
        match &self.state_root {
            Some(root) => Ok(root.clone()),
            None => default_state_root(),
        }
    }

    pub fn resolve_cache_dir(&self) -> Result<PathBuf, ConfigError> {
        self.resolve_under_root(self.cache.path.as_deref(), DEFAULT_CACHE_DIR)
    }

    pub fn resolve_store_path(&self) -> Result<PathBuf, ConfigError> {
        self.resolve_under_root(self.store.path.as_deref(), DEFAULT_STORE_FILE)
    }

    fn resolve_under_root(
        &self,
        configured: Option<&Path>,
        fallback: &str,
    ) -> Result<PathBuf, ConfigError> {
        match configured {
            Some(path) if path.is_absolute() => Ok(path.to_path_buf()),
            Some(path) => Ok(self.resolve_state_root()?.join(path)),
            None => Ok(self.resolve_state_root()?.join(fallback)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_store_path_resolves_under_state_root() {
        let settings: Settings = serde_yaml::from_str(
            r#"
state_root: /tmp/ledger
store:
  path: db/history.sqlite3
"#,
        )
        .expect("parse settings");
        assert_eq!(
            settings.resolve_store_path().expect("store path"),
            PathBuf::from("/tmp/ledger/db/history.sqlite3")
        );
        assert_eq!(
            settings.resolve_cache_dir().expect("cache dir"),
            PathBuf::from("/tmp/ledger/cache")
        );
    }

    #[test]
    fn publish_url_defaults_to_local_serve() {
        let mut broadcast = BroadcastSettings::default();
        assert_eq!(broadcast.publish_url(), "http://127.0.0.1:8765");

        broadcast.websocket_bind = "0.0.0.0:9000".to_string();
        assert_eq!(broadcast.publish_url(), "http://127.0.0.1:9000");

        broadcast.webhook_url = Some(" https://gateway.local ".to_string());
        assert_eq!(broadcast.publish_url(), "https://gateway.local");
    }

    #[test]
    fn unknown_backend_fails_at_parse() {
        let err = serde_yaml::from_str::<Settings>(
            r#"
cache:
  backend: redis
"#,
        )
        .expect_err("unknown backend");
        assert!(err.to_string().contains("redis"));
    }
}
