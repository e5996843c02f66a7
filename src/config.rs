use crate::domain::{FailurePolicy, KeyScope, Quota, WindowStrategy};
use crate::errors::{AppError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub store: StoreConfig,
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub access_lists: AccessListConfig,
    pub audit: AuditConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Accept X-Principal-Id / X-Principal-Tier from an authenticating gateway
    #[serde(default)]
    pub trust_principal_headers: bool,
    /// Serve /admin/counters for inspecting and clearing counters
    #[serde(default)]
    pub admin_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub strategy: WindowStrategy,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Upper bound on a single counter update
    pub timeout_ms: u64,
    /// Minimum delay between reconnect attempts while Redis is down
    pub reconnect_interval_seconds: u64,
    /// How often the in-memory store purges expired records
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Quota applied when no rule prefix matches
    pub default: Quota,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub prefix: String,
    #[serde(default)]
    pub scope: KeyScope,
    /// Tier name to quota; "normal" is the fallback tier
    pub tiers: HashMap<String, Quota>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessListConfig {
    #[serde(default)]
    pub allow: Vec<AccessEntryConfig>,
    #[serde(default)]
    pub deny: Vec<AccessEntryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessEntryConfig {
    pub identifier: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackend {
    Log,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub channel_buffer_size: usize,
    pub backends: Vec<AuditBackend>,
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let environment = env::var("RATEKEEPER_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(
                config::File::with_name(&format!("config/{}", environment)).required(false),
            )
            // e.g., RATEKEEPER__STORE__FAILURE_POLICY=fail_closed
            .add_source(
                config::Environment::with_prefix("RATEKEEPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parse a complete configuration from a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(AppError::Configuration("Invalid port number".to_string()));
        }

        if self.store.backend == StoreBackend::Redis && self.redis.url.is_empty() {
            return Err(AppError::Configuration(
                "Redis URL is required for the redis store backend".to_string(),
            ));
        }

        if self.store.timeout_ms == 0 {
            return Err(AppError::Configuration(
                "Store timeout must be greater than zero".to_string(),
            ));
        }

        validate_quota("rate_limit.default", &self.rate_limit.default)?;

        for rule in &self.rate_limit.rules {
            if rule.prefix.is_empty() {
                return Err(AppError::Configuration(
                    "Rate limit rule prefix must not be empty".to_string(),
                ));
            }
            if rule.tiers.is_empty() {
                return Err(AppError::Configuration(format!(
                    "Rate limit rule '{}' has no tiers",
                    rule.prefix
                )));
            }
            for (tier, quota) in &rule.tiers {
                validate_quota(&format!("{} ({})", rule.prefix, tier), quota)?;
            }
        }

        if self.audit.enabled
            && self.audit.backends.contains(&AuditBackend::File)
            && self.audit.file_path.as_deref().map_or(true, str::is_empty)
        {
            return Err(AppError::Configuration(
                "audit.file_path is required for the file audit backend".to_string(),
            ));
        }

        if self.audit.enabled && self.audit.batch_size == 0 {
            return Err(AppError::Configuration(
                "audit.batch_size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_quota(name: &str, quota: &Quota) -> Result<()> {
    if quota.limit == 0 || quota.window_seconds == 0 {
        return Err(AppError::Configuration(format!(
            "Quota for {} must have a positive limit and window",
            name
        )));
    }
    Ok(())
}
