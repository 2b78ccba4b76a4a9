//! Connection configuration.
use std::{fmt, str::FromStr, time::Duration};

use crate::{Compression, settings::Settings};

pub const DEFAULT_PORT: u16 = 9000;

/// A `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// Accepts `host`, `host:port` and `[v6-address]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| format!("unterminated '[' in '{s}'"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => port.parse().map_err(|_| format!("invalid port in '{s}'"))?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(format!("invalid endpoint '{s}'")),
            };
            return Ok(Endpoint::new(host, port));
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                let port = port.parse().map_err(|_| format!("invalid port in '{s}'"))?;
                Ok(Endpoint::new(host, port))
            }
            _ if s.is_empty() => Err("empty endpoint".to_string()),
            _ => Ok(Endpoint::new(s, DEFAULT_PORT)),
        }
    }
}

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Endpoint,
    /// Tried in order when the primary endpoint cannot be reached.
    pub fallbacks: Vec<Endpoint>,
    pub database: String,
    pub user: String,
    pub password: String,
    pub client_name: String,
    pub quota_key: String,
    pub compression: Compression,
    pub connect_timeout: Duration,
    /// Sent with every query, below the query's own settings.
    pub settings: Settings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            fallbacks: Vec::new(),
            database: "default".to_string(),
            user: "default".to_string(),
            password: String::new(),
            client_name: "chwire".to_string(),
            quota_key: String::new(),
            compression: Compression::None,
            connect_timeout: Duration::from_secs(10),
            settings: Settings::new(),
        }
    }
}

impl Config {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    pub fn with_fallback(mut self, endpoint: Endpoint) -> Self {
        self.fallbacks.push(endpoint);
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn with_client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn with_quota_key(mut self, quota_key: impl Into<String>) -> Self {
        self.quota_key = quota_key.into();
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_setting(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.settings.set(name, value);
        self
    }

    /// The primary endpoint followed by the fallbacks.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        std::iter::once(&self.endpoint).chain(&self.fallbacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parsing() {
        assert_eq!("db:9440".parse(), Ok(Endpoint::new("db", 9440)));
        assert_eq!("db".parse(), Ok(Endpoint::new("db", DEFAULT_PORT)));
        assert_eq!("[::1]:9001".parse(), Ok(Endpoint::new("::1", 9001)));
        assert_eq!("[::1]".parse(), Ok(Endpoint::new("::1", DEFAULT_PORT)));
        assert!("db:port".parse::<Endpoint>().is_err());
        assert!("".parse::<Endpoint>().is_err());
    }

    #[test]
    fn endpoint_display_round_trips() {
        for s in ["db:9000", "[::1]:9000"] {
            assert_eq!(s.parse::<Endpoint>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn endpoints_in_order() {
        let config = Config::new(Endpoint::new("a", 1))
            .with_fallback(Endpoint::new("b", 2))
            .with_fallback(Endpoint::new("c", 3));
        let hosts: Vec<_> = config.endpoints().map(|e| e.host.as_str()).collect();
        assert_eq!(hosts, vec!["a", "b", "c"]);
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.endpoint.to_string(), "localhost:9000");
        assert_eq!(config.user, "default");
        assert_eq!(config.client_name, "chwire");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }
}
