//! Server configuration: TOML file + CLI overrides.

use crate::error::{ServerError, ServerResult};
use inviter_core::ProtocolVersion;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub daemon: DaemonSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

/// `[daemon]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSection {
    #[serde(default = "default_required_version")]
    pub required_version: String,
    #[serde(default)]
    pub download_url: String,
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_ms: u64,
    #[serde(default)]
    pub request_timeout_secs: u64,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            required_version: default_required_version(),
            download_url: String::new(),
            keepalive_interval_ms: default_keepalive_interval(),
            request_timeout_secs: 0,
        }
    }
}

/// `[store]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSection {
    /// Bindings file. Without one, bindings live in memory only.
    pub path: Option<String>,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_port() -> u16 {
    3000
}
fn default_stats_interval() -> u64 {
    3600
}

const DEFAULT_REQUIRED_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0, 0);

fn default_required_version() -> String {
    DEFAULT_REQUIRED_VERSION.to_string()
}

fn default_keepalive_interval() -> u64 {
    30_000
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Interval of the statistics log line; `None` disables it.
    pub stats_interval: Option<Duration>,
    /// Oldest daemon protocol version accepted at handshake.
    pub required_version: ProtocolVersion,
    /// Where outdated daemons are told to download an update.
    pub download_url: String,
    /// Liveness probe interval; one unanswered probe terminates the connection.
    pub keepalive_interval: Duration,
    /// Per-request timeout; `None` waits until the connection closes.
    pub request_timeout: Option<Duration>,
    pub store_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let server = ServerSection::default();
        let daemon = DaemonSection::default();
        Self {
            bind: server.bind,
            port: server.port,
            stats_interval: non_zero_secs(server.stats_interval_secs),
            required_version: DEFAULT_REQUIRED_VERSION,
            download_url: daemon.download_url,
            keepalive_interval: Duration::from_millis(daemon.keepalive_interval_ms),
            request_timeout: None,
            store_path: None,
        }
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_bind: Option<IpAddr>,
        cli_store: Option<&str>,
        cli_required_version: Option<&str>,
    ) -> ServerResult<Self> {
        let mut file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| ServerError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        // Merge CLI overrides
        if let Some(port) = cli_port {
            file_config.server.port = port;
        }
        if let Some(bind) = cli_bind {
            file_config.server.bind = bind;
        }
        if let Some(store) = cli_store {
            file_config.store.path = Some(store.to_string());
        }
        if let Some(version) = cli_required_version {
            file_config.daemon.required_version = version.to_string();
        }

        Self::from_file(file_config)
    }

    /// Resolve a parsed config file.
    pub fn from_file(file: ConfigFile) -> ServerResult<Self> {
        let required_version = file
            .daemon
            .required_version
            .parse::<ProtocolVersion>()
            .map_err(|e| ServerError::Config(format!("daemon.required_version: {e}")))?;

        if file.daemon.keepalive_interval_ms == 0 {
            return Err(ServerError::Config(
                "daemon.keepalive_interval_ms must be positive".into(),
            ));
        }

        Ok(Self {
            bind: file.server.bind,
            port: file.server.port,
            stats_interval: non_zero_secs(file.server.stats_interval_secs),
            required_version,
            download_url: file.daemon.download_url,
            keepalive_interval: Duration::from_millis(file.daemon.keepalive_interval_ms),
            request_timeout: non_zero_secs(file.daemon.request_timeout_secs),
            store_path: file.store.path.as_deref().map(expand_tilde_str),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
