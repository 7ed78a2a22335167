//! Runtime settings, read from `LESSON_RELAY__*` environment variables.
//!
//! A `.env` file in the working directory is honoured for local runs. Every
//! section except `redis` has usable defaults, so the smallest working
//! environment is a single `LESSON_RELAY__REDIS__URL`.

mod budget;
mod error;
mod realtime;
mod redis;
mod resilience;
mod server;

pub use budget::BudgetConfig;
pub use error::{ConfigError, ValidationError};
pub use realtime::RealtimeConfig;
pub use redis::RedisConfig;
pub use resilience::ResilienceConfig;
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

/// Everything the binary needs to start.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Broker and usage ledger connection. No default.
    pub redis: RedisConfig,

    #[serde(default)]
    pub resilience: ResilienceConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub realtime: RealtimeConfig,
}

impl AppConfig {
    /// Reads the process environment. Nested keys are joined with `__`,
    /// e.g. `LESSON_RELAY__RESILIENCE__MAX_RETRIES=5`.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let source = config::Environment::with_prefix("LESSON_RELAY").separator("__");
        let settings = config::Config::builder().add_source(source).build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Stops at the first section that is out of range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.redis.validate()?;
        self.resilience.validate()?;
        self.budget.validate()?;
        self.realtime.validate()
    }

    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
