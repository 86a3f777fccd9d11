//! Service configuration.
//!
//! Defaults, overridden by `FULFILL_*` environment variables:
//!
//! | Variable | Default |
//! |---|---|
//! | `FULFILL_ADDR` | `0.0.0.0:8080` |
//! | `FULFILL_READ_TIMEOUT_SECS` | `15` |
//! | `FULFILL_WRITE_TIMEOUT_SECS` | `15` |
//! | `FULFILL_IDLE_TIMEOUT_SECS` | `60` |
//! | `FULFILL_SHUTDOWN_GRACE_SECS` | `15` |
//! | `FULFILL_KEEP_ALIVE` | `true` |
//! | `FULFILL_LOG_BODY_LIMIT` | `1048576` |
//! | `FULFILL_LOG_JSON` | `true` |

use std::net::SocketAddr;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Serialized};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::middleware::DEFAULT_BODY_LIMIT;

const ENV_PREFIX: &str = "FULFILL_";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address.
    pub addr: SocketAddr,
    /// How long a client may take to send request headers.
    pub read_timeout_secs: u64,
    /// How long a request may take to produce its response.
    pub write_timeout_secs: u64,
    /// How long a keep-alive connection may wait for its next request.
    pub idle_timeout_secs: u64,
    /// How long in-flight connections may run after a shutdown signal.
    pub shutdown_grace_secs: u64,
    /// HTTP/1.1 connection reuse.
    pub keep_alive: bool,
    /// Request bodies larger than this are not captured in the access log.
    pub log_body_limit: usize,
    /// JSON log lines (`true`) or human-readable ones.
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            read_timeout_secs: 15,
            write_timeout_secs: 15,
            idle_timeout_secs: 60,
            shutdown_grace_secs: 15,
            keep_alive: true,
            log_body_limit: DEFAULT_BODY_LIMIT,
            log_json: true,
        }
    }
}

impl Config {
    /// Loads defaults overridden by the process environment.
    pub fn load() -> Result<Self, Error> {
        Self::figment(Env::prefixed(ENV_PREFIX)).extract().map_err(Error::from)
    }

    fn figment(env: Env) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(env)
    }

    pub fn read_timeout(&self) -> Duration { Duration::from_secs(self.read_timeout_secs) }
    pub fn write_timeout(&self) -> Duration { Duration::from_secs(self.write_timeout_secs) }
    pub fn idle_timeout(&self) -> Duration { Duration::from_secs(self.idle_timeout_secs) }
    pub fn shutdown_grace(&self) -> Duration { Duration::from_secs(self.shutdown_grace_secs) }
}
