//! Listener, environment and instance identity.

use serde::Deserialize;
use std::net::SocketAddr;

use crate::domain::foundation::InstanceId;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub environment: Environment,

    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Name stamped as the origin of every envelope this instance
    /// publishes. Falls back to `$HOSTNAME:<port>`.
    #[serde(default)]
    pub instance_id: Option<String>,
}

/// Deployment environment. Production switches logs to JSON.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl ServerConfig {
    /// Address the HTTP and WebSocket listener binds to.
    pub fn socket_addr(&self) -> Result<SocketAddr, ValidationError> {
        let candidate = format!("{}:{}", self.host, self.port);
        candidate
            .parse()
            .map_err(|_| ValidationError::InvalidSocketAddr(candidate))
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment, Environment::Production)
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(InstanceId::new)
            .unwrap_or_else(|| InstanceId::from_env(self.port))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        self.socket_addr().map(|_| ())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: Environment::default(),
            log_level: default_log_level(),
            instance_id: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info,lesson_relay=debug".to_string()
}
