//! # Configuration
//!
//! Reads the three knobs the process needs from the environment, the
//! same three the original Python server read via `os.environ.get(...)`:
//! listen host, listen port, and an optional static-files root.

use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 6001;

/// Process configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub static_dir: Option<PathBuf>,
}

impl Config {
    /// Reads `HOST`, `PORT`, and `STATIC_DIR` from the environment,
    /// falling back to `127.0.0.1:6001` with no static root when unset.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let static_dir = std::env::var("STATIC_DIR").ok().map(PathBuf::from);

        Self {
            host,
            port,
            static_dir,
        }
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|err| anyhow::anyhow!("invalid HOST/PORT ({}:{}): {err}", self.host, self.port))
    }
}
