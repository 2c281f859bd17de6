//! Configuration management for the verification API
//!
//! Configuration is layered with figment: built-in defaults, an
//! optional `Config.toml`, then `EVERIFY_`-prefixed environment
//! variables (double underscore separates sections, e.g.
//! `EVERIFY_SMTP__TIMEOUT_MS=20000`).

use anyhow::Context;
use serde::{Deserialize, Serialize};
use verifier_core::{lists::parse_domain_list, VerifierConfig};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub smtp: SmtpConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub lists: DomainListConfig,
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// SMTP probing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Per-socket connect/read timeout in milliseconds
    pub timeout_ms: u64,
    /// Identity announced in EHLO
    pub helo_name: String,
    /// Envelope sender used in MAIL FROM
    pub mail_from: String,
    /// Ports raced for every probe
    pub ports: Vec<u16>,
    /// DNS query timeout in milliseconds
    pub dns_timeout_ms: u64,
    /// Maximum number of DNS lookup attempts
    pub dns_attempts: usize,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            helo_name: "validator.com".to_string(),
            mail_from: "validator@validator.com".to_string(),
            ports: vec![25, 587, 465],
            dns_timeout_ms: 5_000,
            dns_attempts: 2,
        }
    }
}

/// Storage configuration: the primary address table and the verdict
/// cache live on separate databases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Primary database holding tracked addresses
    pub primary_url: String,
    /// Cache database holding serialized verdicts
    pub cache_url: String,
    /// Cache row time-to-live in days
    pub cache_ttl_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            primary_url: "sqlite://emails.db".to_string(),
            cache_url: "sqlite://verification_cache.db".to_string(),
            cache_ttl_days: 30,
        }
    }
}

/// Refresh/backfill driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the background driver runs at all
    pub enabled: bool,
    /// Cadence of the driver in milliseconds
    pub interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 60_000,
        }
    }
}

/// Domain lists, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DomainListConfig {
    pub whitelist: Vec<String>,
    pub disposable: Vec<String>,
    pub blacklist: Vec<String>,
    /// Optional newline-delimited file merged into the disposable set
    pub disposable_file: Option<String>,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable JSON structured logging
    pub json_logs: bool,
    /// Log level filter
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Build the engine configuration, reading the optional disposable
    /// list file
    pub fn verifier_config(&self) -> anyhow::Result<VerifierConfig> {
        let mut disposable = self.lists.disposable.clone();
        if let Some(path) = &self.lists.disposable_file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read disposable list {path}"))?;
            disposable.extend(parse_domain_list(&content));
        }

        Ok(VerifierConfig {
            smtp_timeout_ms: self.smtp.timeout_ms,
            helo_name: self.smtp.helo_name.clone(),
            mail_from: self.smtp.mail_from.clone(),
            smtp_ports: self.smtp.ports.clone(),
            dns_timeout_ms: self.smtp.dns_timeout_ms,
            dns_attempts: self.smtp.dns_attempts,
            whitelist: self.lists.whitelist.clone(),
            disposable,
            blacklist: self.lists.blacklist.clone(),
            ..VerifierConfig::default()
        })
    }
}
