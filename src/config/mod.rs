//! Configuration management

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub call: CallConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret the account service signs bearer tokens with
    pub token_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// Server-side ring deadline; an unanswered call resolves to missed
    /// after this many seconds even if no client ever hangs up
    pub ring_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://postgres@localhost/portico".to_string(),
            },
            auth: AuthConfig {
                token_secret: "change-me".to_string(),
            },
            call: CallConfig {
                ring_timeout_secs: 60,
            },
        }
    }
}

impl Config {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("PORTICO_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("PORTICO_PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(secret) = std::env::var("PORTICO_TOKEN_SECRET") {
            config.auth.token_secret = secret;
        }
        if let Ok(timeout) = std::env::var("PORTICO_RING_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse() {
                config.call.ring_timeout_secs = timeout;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.call.ring_timeout_secs, 60);
    }
}
