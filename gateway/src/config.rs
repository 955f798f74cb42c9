//! Startup configuration, loaded from CLI flags or environment variables,
//! mirroring the `clap::Parser` + `#[arg(env = ...)]` style the corpus uses
//! for its binaries (see `proxy`'s `LocalProxyCliArgs`).

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::auth::AuthMode;

/// Database connection parameters. Immutable once built; `Debug` redacts
/// the password and any driver option whose key looks secret-shaped.
#[derive(Clone, serde::Serialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    pub schema: Option<String>,
    pub options: HashMap<String, String>,
}

const SECRET_OPTION_KEYS: &[&str] = &["password", "secret", "token"];

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted_options: HashMap<&str, &str> = self
            .options
            .iter()
            .map(|(k, v)| {
                if SECRET_OPTION_KEYS.iter().any(|s| k.to_lowercase().contains(s)) {
                    (k.as_str(), "***")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("options", &redacted_options)
            .finish()
    }
}

impl DatabaseConfig {
    /// Validates host shape (hostname or dotted-quad IPv4) and port range.
    /// Used both at startup and when merging `/auth` body overrides.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("host must not be empty".to_string());
        }
        if self.host.parse::<IpAddr>().is_err() && !is_valid_hostname(&self.host) {
            return Err(format!("invalid host: {}", self.host));
        }
        if self.port == 0 {
            return Err("port must be in 1-65535".to_string());
        }
        if self.username.is_empty() {
            return Err("username must not be empty".to_string());
        }
        Ok(())
    }
}

fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum SessionMode {
    Stateful,
    Stateless,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Transport {
    Stdio,
    Http,
    Both,
}

/// Rate-limiter keying strategy; resolves the open question in the design
/// notes. Defaults to `Global`, matching the reference implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, Default)]
pub enum RateLimitKeyMode {
    #[default]
    Global,
    PerToken,
    PerIp,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-db-gateway", version, about)]
pub struct GatewayConfig {
    #[arg(long, env = "DB_HOST")]
    pub db_host: String,
    #[arg(long, env = "DB_PORT", default_value_t = 446)]
    pub db_port: u16,
    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,
    #[arg(long, env = "DB_USER_FILE")]
    pub db_user_file: Option<PathBuf>,
    #[arg(long, env = "DB_PASSWORD")]
    pub db_password: Option<String>,
    #[arg(long, env = "DB_PASSWORD_FILE")]
    pub db_password_file: Option<PathBuf>,
    #[arg(long, env = "DB_DATABASE", default_value = "*LOCAL")]
    pub db_database: String,
    #[arg(long, env = "DB_SCHEMA")]
    pub db_schema: Option<String>,
    #[arg(long, env = "DB_OPTIONS")]
    pub db_options: Option<String>,

    #[arg(long, env = "MCP_TRANSPORT", value_enum, default_value_t = Transport::Stdio)]
    pub transport: Transport,
    #[arg(long, env = "MCP_HTTP_PORT", default_value_t = 3000)]
    pub http_port: u16,
    #[arg(long, env = "MCP_HTTP_HOST", default_value = "127.0.0.1")]
    pub http_host: String,

    #[arg(long, env = "MCP_SESSION_MODE", value_enum, default_value_t = SessionMode::Stateful)]
    pub session_mode: SessionMode,
    #[arg(long, env = "MCP_MAX_SESSIONS", default_value_t = 100)]
    pub max_sessions: usize,
    #[arg(long, env = "MCP_TOKEN_EXPIRY", default_value_t = 3600)]
    pub token_expiry_secs: u64,

    #[arg(long, env = "MCP_AUTH_MODE", value_enum, default_value_t = AuthMode::Required)]
    pub auth_mode: AuthMode,
    #[arg(long, env = "MCP_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    #[arg(long, env = "MCP_TLS_ENABLED", default_value_t = false)]
    pub tls_enabled: bool,
    #[arg(long, env = "MCP_TLS_CERT_PATH")]
    pub tls_cert_path: Option<PathBuf>,
    #[arg(long, env = "MCP_TLS_KEY_PATH")]
    pub tls_key_path: Option<PathBuf>,

    #[arg(long, env = "MCP_CORS_ORIGINS", default_value = "")]
    pub cors_origins: String,

    #[arg(long, env = "RATE_LIMIT_WINDOW_MS", default_value_t = 900_000)]
    pub rate_limit_window_ms: u64,
    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value_t = 100)]
    pub rate_limit_max_requests: u32,
    #[arg(long, env = "RATE_LIMIT_ENABLED", default_value_t = true)]
    pub rate_limit_enabled: bool,
    #[arg(long, env = "MCP_RATE_LIMIT_KEY_MODE", value_enum, default_value_t = RateLimitKeyMode::Global)]
    pub rate_limit_key_mode: RateLimitKeyMode,

    #[arg(long, env = "QUERY_DEFAULT_LIMIT", default_value_t = 1000)]
    pub query_default_limit: u32,
    #[arg(long, env = "QUERY_MAX_LIMIT", default_value_t = 10000)]
    pub query_max_limit: u32,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
    #[arg(long, env = "MCP_LOG_FORMAT", default_value = "auto")]
    pub log_format: String,

    #[arg(long, env = "MCP_TRUST_PROXY_HEADERS", default_value_t = false)]
    pub trust_proxy_headers: bool,
}

/// Raised when environment/CLI configuration cannot be turned into a
/// runnable gateway. Startup failures of this kind are fatal (exit 1).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read secret file {path}: {source}")]
    SecretFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GatewayConfig {
    pub fn database_config(&self) -> Result<DatabaseConfig, ConfigError> {
        let username = read_secret(&self.db_user, &self.db_user_file, "DB_USER")?;
        let password = read_secret(&self.db_password, &self.db_password_file, "DB_PASSWORD")?;
        let options = self
            .db_options
            .as_deref()
            .map(parse_options)
            .unwrap_or_default();

        let config = DatabaseConfig {
            host: self.db_host.clone(),
            port: self.db_port,
            username,
            password,
            database: self.db_database.clone(),
            schema: self.db_schema.clone(),
            options,
        };
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    pub fn cors_allowed_origins(&self) -> Vec<String> {
        if self.cors_origins.is_empty() {
            Vec::new()
        } else {
            self.cors_origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if matches!(self.auth_mode, AuthMode::Token) && self.auth_token.is_none() {
            return Err(ConfigError::Missing(
                "MCP_AUTH_TOKEN is required when MCP_AUTH_MODE=token".to_string(),
            ));
        }
        if self.tls_enabled {
            let cert = self
                .tls_cert_path
                .as_ref()
                .ok_or_else(|| ConfigError::Missing("MCP_TLS_CERT_PATH".to_string()))?;
            let key = self
                .tls_key_path
                .as_ref()
                .ok_or_else(|| ConfigError::Missing("MCP_TLS_KEY_PATH".to_string()))?;
            if !cert.exists() {
                return Err(ConfigError::Invalid(format!(
                    "TLS cert not found at {}",
                    cert.display()
                )));
            }
            if !key.exists() {
                return Err(ConfigError::Invalid(format!(
                    "TLS key not found at {}",
                    key.display()
                )));
            }
        }
        Ok(())
    }
}

fn read_secret(
    plain: &Option<String>,
    file: &Option<PathBuf>,
    env_name: &str,
) -> Result<String, ConfigError> {
    if let Some(path) = file {
        return std::fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|source| ConfigError::SecretFile {
                path: path.clone(),
                source,
            });
    }
    plain
        .clone()
        .ok_or_else(|| ConfigError::Missing(env_name.to_string()))
}

fn parse_options(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.trim();
            let value = parts.next()?.trim();
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_validation_accepts_dotted_quad_and_hostnames() {
        assert!(is_valid_hostname("db.internal.example.com"));
        assert!(is_valid_hostname("localhost"));
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("-bad.example.com"));
    }

    #[test]
    fn parse_options_splits_on_comma_and_equals() {
        let opts = parse_options("sslmode=require,appname=gateway");
        assert_eq!(opts.get("sslmode"), Some(&"require".to_string()));
        assert_eq!(opts.get("appname"), Some(&"gateway".to_string()));
    }

    #[test]
    fn database_config_debug_redacts_password() {
        let cfg = DatabaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            username: "alice".to_string(),
            password: "hunter2".to_string(),
            database: "*LOCAL".to_string(),
            schema: None,
            options: HashMap::new(),
        };
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("hunter2"));
    }
}
