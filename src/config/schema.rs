//! Configuration schema definitions.
//!
//! Every setting is a command-line flag with an environment-variable
//! fallback; an explicit flag wins, and an empty variable counts as unset.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::http::middleware::Credentials;
use crate::observability::logging::LogOutput;

pub const DEFAULT_BACKEND: &str = "http://example.com:80";
pub const DEFAULT_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_METRICS_PORT: u16 = 2112;
pub const DEFAULT_CRT: &str = "./example.crt";
pub const DEFAULT_KEY: &str = "./example.key";
pub const DEFAULT_LOGOUT: &str = "stdout";

/// Root configuration for the proxy.
#[derive(Debug, Clone, Parser)]
#[command(name = "p3y", version, about = "Authenticating single-backend reverse proxy")]
pub struct ProxyConfig {
    /// Backend server.
    #[arg(long, env = "BACKEND", default_value = DEFAULT_BACKEND)]
    pub backend: String,

    /// Server IP address to bind to.
    #[arg(long, env = "IP", default_value_t = DEFAULT_IP)]
    pub ip: IpAddr,

    /// Server port.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Metrics server port.
    #[arg(long = "metrics_port", env = "METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// BasicAuth username to secure the proxy.
    #[arg(long, env = "USERNAME", default_value = "")]
    pub username: String,

    /// BasicAuth password to secure the proxy.
    #[arg(long, env = "PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// TLS support (requires crt and key).
    #[arg(long, env = "TLS")]
    pub tls: bool,

    /// TLS policy descriptor path.
    #[arg(long = "tlsCfg", env = "TLSCFG", default_value = "")]
    pub tls_cfg: String,

    /// Path to certificate (with --tls).
    #[arg(long, env = "CRT", default_value = DEFAULT_CRT)]
    pub crt: PathBuf,

    /// Path to private key (with --tls).
    #[arg(long, env = "KEY", default_value = DEFAULT_KEY)]
    pub key: PathBuf,

    /// Skip backend TLS verification.
    #[arg(long = "skip-verify", env = "SKIP_VERIFY")]
    pub skip_verify: bool,

    /// Log output: stdout, stderr, or a file path.
    #[arg(long, env = "LOGOUT", default_value = DEFAULT_LOGOUT)]
    pub logout: String,

    /// Give up on the backend after this many seconds (no limit when unset).
    #[arg(long = "upstream-timeout", env = "UPSTREAM_TIMEOUT")]
    pub upstream_timeout_secs: Option<u64>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            ip: DEFAULT_IP,
            port: DEFAULT_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            username: String::new(),
            password: String::new(),
            tls: false,
            tls_cfg: String::new(),
            crt: PathBuf::from(DEFAULT_CRT),
            key: PathBuf::from(DEFAULT_KEY),
            skip_verify: false,
            logout: DEFAULT_LOGOUT.to_string(),
            upstream_timeout_secs: None,
        }
    }
}

impl ProxyConfig {
    pub fn proxy_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.metrics_port)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::from_parts(&self.username, &self.password)
    }

    /// The TLS descriptor, if one is named.
    pub fn tls_descriptor(&self) -> Option<&Path> {
        Some(self.tls_cfg.trim())
            .filter(|path| !path.is_empty())
            .map(Path::new)
    }

    pub fn log_output(&self) -> LogOutput {
        LogOutput::parse(&self.logout)
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        self.upstream_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
