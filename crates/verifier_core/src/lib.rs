//! # verifier_core
//!
//! Recipient-probing email verification engine. Determines whether an
//! address is deliverable by interrogating the recipient domain's mail
//! infrastructure without ever sending a message.
//!
//! ## Probe flow
//!
//! - **Syntax + domain classification** against configurable
//!   whitelist / disposable / blacklist sets
//! - **MX resolution** with A-record fallback via hickory-resolver
//! - **Catch-all detection** using a synthetic local-part
//! - **Concurrent multi-port SMTP dialog** (25/587/465, opportunistic
//!   STARTTLS and implicit TLS) racing for the first acceptance
//! - **Response classification** into a recipient status plus a
//!   diagnostic tag, preserving the full wire transcript
//!
//! A TTL-bounded [`cache::VerdictCache`] sits in front of the engine so
//! repeat probes of the same address are served locally.
//!
//! ## Example
//!
//! ```rust,no_run
//! use verifier_core::{EmailVerifier, VerifierConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let verifier = EmailVerifier::new(VerifierConfig::default())?;
//!     let verdict = verifier.categorize("someone@example.com").await;
//!     println!("{} -> {}", verdict.email, verdict.category);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod catchall;
pub mod lists;
pub mod resolver;
pub mod smtp;
pub mod verifier;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Configuration for the probing engine
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Per-socket connect/read timeout in milliseconds
    pub smtp_timeout_ms: u64,
    /// Identity announced in EHLO
    pub helo_name: String,
    /// Envelope sender used in MAIL FROM
    pub mail_from: String,
    /// Ports raced for every probe; 465 and 2465 use implicit TLS
    pub smtp_ports: Vec<u16>,
    /// DNS query timeout in milliseconds
    pub dns_timeout_ms: u64,
    /// Maximum number of DNS lookup attempts
    pub dns_attempts: usize,
    /// Domains that are always reported as `Whitelisted`
    pub whitelist: Vec<String>,
    /// Disposable-provider domains (merged with the built-in seed list)
    pub disposable: Vec<String>,
    /// Domains that are always reported as `Blacklisted`
    pub blacklist: Vec<String>,
    /// False positive rate of the Bloom pre-filter over the disposable set
    pub bloom_fp_rate: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            smtp_timeout_ms: 15_000,
            helo_name: "validator.com".to_string(),
            mail_from: "validator@validator.com".to_string(),
            smtp_ports: vec![25, 587, 465],
            dns_timeout_ms: 5_000,
            dns_attempts: 2,
            whitelist: Vec::new(),
            disposable: Vec::new(),
            blacklist: Vec::new(),
            bloom_fp_rate: 0.0001, // 0.01%
        }
    }
}

/// Recipient status observed at the SMTP level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecipientStatus {
    Valid,
    UserNotFound,
    TemporaryFailure,
    UnknownFailure,
    Blacklisted,
}

impl fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Valid => "Valid",
            Self::UserNotFound => "UserNotFound",
            Self::TemporaryFailure => "TemporaryFailure",
            Self::UnknownFailure => "UnknownFailure",
            Self::Blacklisted => "Blacklisted",
        };
        f.write_str(name)
    }
}

/// Outward category assigned to a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Valid,
    Invalid,
    #[serde(rename = "Catch-All")]
    CatchAll,
    Disposable,
    Blacklisted,
    Whitelisted,
    UserNotFound,
    Greylisted,
    RelayDenied,
    AccessDenied,
    Forwarded,
    CannotVerify,
    MailboxBusy,
    LocalError,
    InsufficientStorage,
    SyntaxError,
    Unknown,
    Error,
}

impl Category {
    /// Wire label of the category, as serialized in verdict JSON
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "Valid",
            Self::Invalid => "Invalid",
            Self::CatchAll => "Catch-All",
            Self::Disposable => "Disposable",
            Self::Blacklisted => "Blacklisted",
            Self::Whitelisted => "Whitelisted",
            Self::UserNotFound => "UserNotFound",
            Self::Greylisted => "Greylisted",
            Self::RelayDenied => "RelayDenied",
            Self::AccessDenied => "AccessDenied",
            Self::Forwarded => "Forwarded",
            Self::CannotVerify => "CannotVerify",
            Self::MailboxBusy => "MailboxBusy",
            Self::LocalError => "LocalError",
            Self::InsufficientStorage => "InsufficientStorage",
            Self::SyntaxError => "SyntaxError",
            Self::Unknown => "Unknown",
            Self::Error => "Error",
        }
    }

    /// Case-insensitive match against a user-supplied label
    pub fn matches_label(&self, label: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(label.trim())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final verdict for one probed address
///
/// Field names are the stable wire schema; consumers rely on the
/// camelCase spelling, so renames here are breaking changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub email: String,
    pub category: Category,
    #[serde(default)]
    pub diagnostic_tag: Option<String>,
    #[serde(default)]
    pub smtp_code: i32,
    #[serde(default)]
    pub status: Option<RecipientStatus>,
    /// Full wire transcript of the winning session, newline-joined
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub mail_host: Option<String>,
    #[serde(default)]
    pub port_opened: bool,
    #[serde(default)]
    pub connection_successful: bool,
    #[serde(default)]
    pub errors: Option<String>,
    #[serde(default)]
    pub catch_all: bool,
    /// ISO-8601 timestamp with millisecond precision
    pub timestamp: String,
}

impl Verdict {
    /// Fresh verdict carrying only the address and the current time;
    /// every probe starts from this shape.
    pub fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            category: Category::Unknown,
            diagnostic_tag: None,
            smtp_code: 0,
            status: None,
            transcript: None,
            mail_host: None,
            port_opened: false,
            connection_successful: false,
            errors: None,
            catch_all: false,
            timestamp: now_timestamp(),
        }
    }
}

/// ISO-8601 UTC timestamp with millisecond precision
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

/// Errors surfaced by the engine's fallible edges
///
/// The session runner and racer never return these; they fold failures
/// into a `SessionOutcome`. Errors here come from startup validation,
/// DNS resolution, and the catch-all probe.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("DNS resolution failed: {0}")]
    Dns(String),
    #[error("catch-all probe failed: {0}")]
    CatchAllProbe(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VerifyError>;

// Re-export the main entry points
pub use cache::{CachedVerdict, Prober, VerdictCache, VerdictStore};
pub use verifier::EmailVerifier;
