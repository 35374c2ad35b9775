//! Configuration module for reconciliation-service.

use crate::models::Channel;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub channel_source: ChannelSourceConfig,
    pub platform_source: PlatformSourceConfig,
    pub report: ReportConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ChannelSourceConfig {
    pub base_url: String,
    pub settlement_dir: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PlatformSourceConfig {
    pub payment_gateway_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub report_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub channels: Vec<String>,
    /// How long a task may stay `processing` before the sweep fails it.
    pub processing_deadline: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(24 * 60 * 60),
            channels: default_channels(),
            processing_deadline: Duration::from_secs(2 * 60 * 60),
        }
    }
}

fn default_channels() -> Vec<String> {
    ["stripe", "paypal", "alipay", "wechat"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

impl ReconciliationConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_lookup(common, |key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required")))?;

        let channels = match lookup("RECONCILIATION_CHANNELS") {
            Some(raw) => parse_channels(&raw)?,
            None => default_channels(),
        };

        Ok(Self {
            common,
            service_name: var_or("SERVICE_NAME", "reconciliation-service"),
            service_version: var_or("SERVICE_VERSION", env!("CARGO_PKG_VERSION")),
            log_level: var_or("LOG_LEVEL", "info"),
            otlp_endpoint: lookup("OTLP_ENDPOINT").filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: Secret::new(database_url),
                max_connections: parsed("DATABASE_MAX_CONNECTIONS").unwrap_or(10) as u32,
                min_connections: parsed("DATABASE_MIN_CONNECTIONS").unwrap_or(2) as u32,
            },
            channel_source: ChannelSourceConfig {
                base_url: var_or("CHANNEL_SOURCE_URL", "http://settlement-gateway:8080"),
                settlement_dir: PathBuf::from(var_or("SETTLEMENT_DIR", "/var/lib/reconciliation/settlements")),
                timeout: Duration::from_secs(parsed("CHANNEL_SOURCE_TIMEOUT_SECS").unwrap_or(120)),
            },
            platform_source: PlatformSourceConfig {
                payment_gateway_url: var_or("PAYMENT_GATEWAY_URL", "http://payment-gateway:8080"),
                timeout: Duration::from_secs(parsed("PAYMENT_GATEWAY_TIMEOUT_SECS").unwrap_or(60)),
            },
            report: ReportConfig {
                report_dir: PathBuf::from(var_or("REPORT_DIR", "/var/lib/reconciliation/reports")),
            },
            scheduler: SchedulerConfig {
                enabled: lookup("SCHEDULER_ENABLED")
                    .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                    .unwrap_or(false),
                interval: Duration::from_secs(
                    parsed("SCHEDULER_INTERVAL_SECS").unwrap_or(24 * 60 * 60).max(1),
                ),
                channels,
                processing_deadline: Duration::from_secs(
                    parsed("PROCESSING_DEADLINE_SECS").unwrap_or(2 * 60 * 60),
                ),
            },
        })
    }
}

/// Comma-separated channel list, normalised to lowercase. Unknown names are
/// a configuration error rather than a silent skip.
fn parse_channels(raw: &str) -> Result<Vec<String>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            Channel::parse(name)
                .map(|c| c.as_str().to_string())
                .ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!("unknown channel in RECONCILIATION_CHANNELS: {}", name))
                })
        })
        .collect()
}
