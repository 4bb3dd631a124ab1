//! Startup configuration, read from the process environment.
//!
//! Everything is resolved once in `main` and handed down by value; nothing in
//! the crate reads the environment after startup.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `TASKBOARD_ADDR` | `0.0.0.0:5000` | HTTP/WebSocket bind address |
//! | `PORT` | (unset) | port-only fallback when `TASKBOARD_ADDR` is unset |
//! | `MONGODB_URI` | `mongodb://127.0.0.1:27017` | store connection string |
//! | `TASKBOARD_DB` | `taskManagerDB` | store database name |
//! | `TASKBOARD_REALTIME` | `true` | realtime bridge + WebSocket endpoint, and the fatal-on-unreachable-store startup policy |

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_MONGODB_URI: &str = "mongodb://127.0.0.1:27017";
const DEFAULT_DATABASE: &str = "taskManagerDB";
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Store adapter configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// MongoDB connection string.
    pub uri: String,
    /// Database holding the `users` and `tasks` collections.
    pub database: String,
    /// Upper bound for a single store operation before it surfaces as
    /// [`Error::StoreUnavailable`](crate::Error::StoreUnavailable).
    pub op_timeout: Duration,
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Store adapter settings.
    pub store: StoreConfig,
    /// Whether the change-notification bridge and `/ws` endpoint are enabled.
    /// Also selects the startup policy: with realtime on, an unreachable
    /// store is fatal; with it off the process starts degraded.
    pub realtime: bool,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through a lookup function. Tests use this to avoid
    /// mutating the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_addr = match lookup("TASKBOARD_ADDR") {
            Some(addr) => addr
                .parse()
                .map_err(|_| Error::Config(format!("TASKBOARD_ADDR is not a socket address: {addr}")))?,
            None => match lookup("PORT") {
                Some(port) => {
                    let port: u16 = port
                        .parse()
                        .map_err(|_| Error::Config(format!("PORT is not a port number: {port}")))?;
                    SocketAddr::from(([0, 0, 0, 0], port))
                }
                None => DEFAULT_ADDR.parse().expect("default address parses"),
            },
        };

        let realtime = match lookup("TASKBOARD_REALTIME") {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| Error::Config(format!("TASKBOARD_REALTIME is not a boolean: {raw}")))?,
            None => true,
        };

        Ok(Self {
            bind_addr,
            store: StoreConfig {
                uri: lookup("MONGODB_URI").unwrap_or_else(|| DEFAULT_MONGODB_URI.to_string()),
                database: lookup("TASKBOARD_DB").unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
                op_timeout: DEFAULT_OP_TIMEOUT,
            },
            realtime,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:5000");
        assert_eq!(config.store.uri, "mongodb://127.0.0.1:27017");
        assert_eq!(config.store.database, "taskManagerDB");
        assert!(config.realtime);
    }

    #[test]
    fn port_fallback_applies_when_addr_unset() {
        let config = Config::from_lookup(lookup_from(&[("PORT", "8123")])).unwrap();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8123");
    }

    #[test]
    fn explicit_addr_wins_over_port() {
        let config = Config::from_lookup(lookup_from(&[
            ("TASKBOARD_ADDR", "127.0.0.1:9000"),
            ("PORT", "8123"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn realtime_toggle_parses_common_forms() {
        for raw in ["0", "false", "No", "OFF"] {
            let config = Config::from_lookup(lookup_from(&[("TASKBOARD_REALTIME", raw)])).unwrap();
            assert!(!config.realtime, "{raw} should disable realtime");
        }
        let config = Config::from_lookup(lookup_from(&[("TASKBOARD_REALTIME", "true")])).unwrap();
        assert!(config.realtime);
    }

    #[test]
    fn bad_values_are_config_errors() {
        assert!(matches!(
            Config::from_lookup(lookup_from(&[("TASKBOARD_ADDR", "not-an-addr")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup_from(&[("PORT", "eighty")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup_from(&[("TASKBOARD_REALTIME", "maybe")])),
            Err(Error::Config(_))
        ));
    }
}
