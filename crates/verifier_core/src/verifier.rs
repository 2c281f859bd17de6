//! Probe orchestrator
//!
//! Assembles syntax checking, domain-list classification, MX
//! resolution, catch-all detection, and the multi-port SMTP race into
//! a single `categorize(address) -> Verdict` call. The first step that
//! yields a verdict returns immediately; the orchestrator itself never
//! fails.

use crate::cache::Prober;
use crate::catchall;
use crate::lists::DomainLists;
use crate::resolver::MxResolver;
use crate::smtp::session::SessionOutcome;
use crate::smtp::racer;
use crate::{Category, RecipientStatus, Verdict, VerifierConfig, VerifyError};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, instrument};

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}$").unwrap());

/// Backoff before the single retry after a temporary failure
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// The recipient-probing engine
///
/// Owns its collaborators (domain lists, resolver, SMTP configuration)
/// outright; construct one per process and share it behind an `Arc`.
pub struct EmailVerifier {
    lists: DomainLists,
    resolver: MxResolver,
    config: VerifierConfig,
}

impl EmailVerifier {
    /// Build the engine from its configuration
    pub fn new(config: VerifierConfig) -> crate::Result<Self> {
        if config.smtp_ports.is_empty() {
            return Err(VerifyError::Configuration(
                "at least one SMTP port is required".to_string(),
            ));
        }
        if config.smtp_timeout_ms == 0 {
            return Err(VerifyError::Configuration(
                "smtp_timeout_ms must be positive".to_string(),
            ));
        }

        let lists = DomainLists::new(
            &config.whitelist,
            &config.disposable,
            &config.blacklist,
            config.bloom_fp_rate,
        );
        let resolver = MxResolver::new(&config);

        info!(
            "Email verifier initialized - ports {:?}, timeout {}ms",
            config.smtp_ports, config.smtp_timeout_ms
        );

        Ok(Self {
            lists,
            resolver,
            config,
        })
    }

    /// Whether `email` matches the canonical address pattern
    pub fn is_valid_syntax(email: &str) -> bool {
        EMAIL_PATTERN.is_match(email)
    }

    /// Domain after the last `@`, lowercased and IDN-folded to ASCII
    pub fn extract_domain(email: &str) -> Option<String> {
        let at = email.rfind('@')?;
        let domain = &email[at + 1..];
        if domain.is_empty() {
            return None;
        }
        let lowered = domain.to_lowercase();
        // Keep the lowercased form when IDNA mapping rejects the input;
        // the syntax gate has already bounded the character set.
        Some(idna::domain_to_ascii(&lowered).unwrap_or(lowered))
    }

    /// Probe `email` and produce a verdict
    #[instrument(skip(self), fields(email = %email))]
    pub async fn categorize(&self, email: &str) -> Verdict {
        let mut verdict = Verdict::new(email);

        // Syntax gate
        if !Self::is_valid_syntax(email) {
            verdict.category = Category::Invalid;
            return verdict;
        }

        let domain = match Self::extract_domain(email) {
            Some(domain) => domain,
            None => {
                verdict.category = Category::Invalid;
                return verdict;
            }
        };

        // Domain lists, whitelist first
        if self.lists.is_whitelisted(&domain) {
            verdict.category = Category::Whitelisted;
            return verdict;
        }
        if self.lists.is_disposable(&domain) {
            verdict.category = Category::Disposable;
            return verdict;
        }
        if self.lists.is_blacklisted(&domain) {
            verdict.category = Category::Blacklisted;
            return verdict;
        }

        // MX resolution; only the lowest-preference host is probed
        let candidates = match self.resolver.resolve_mx(&domain).await {
            Ok(candidates) if candidates.is_empty() => {
                verdict.category = Category::Invalid;
                return verdict;
            }
            Ok(candidates) => candidates,
            Err(err) => {
                verdict.category = Category::Unknown;
                verdict.errors = Some(err.to_string());
                return verdict;
            }
        };
        let mx_host = &candidates[0].host;

        match catchall::is_catch_all(mx_host, &domain, &self.config).await {
            Ok(true) => {
                info!("Domain {} is catch-all", domain);
                verdict.category = Category::CatchAll;
                verdict.catch_all = true;
                return verdict;
            }
            Ok(false) => {}
            Err(err) => {
                verdict.category = Category::Unknown;
                verdict.errors = Some(err.to_string());
                return verdict;
            }
        }

        let outcome = self.race_with_retry(mx_host, email).await;
        apply_session_outcome(&mut verdict, &outcome);
        verdict
    }

    async fn race_with_retry(&self, host: &str, email: &str) -> SessionOutcome {
        let outcome = racer::race(host, email, &self.config).await;
        if outcome.status != RecipientStatus::TemporaryFailure {
            return outcome;
        }
        debug!("Temporary failure from {}, retrying once after backoff", host);
        tokio::time::sleep(RETRY_BACKOFF).await;
        racer::race(host, email, &self.config).await
    }
}

#[async_trait]
impl Prober for EmailVerifier {
    async fn categorize(&self, email: &str) -> Verdict {
        EmailVerifier::categorize(self, email).await
    }
}

/// Fold the racer's outcome into the verdict
fn apply_session_outcome(verdict: &mut Verdict, outcome: &SessionOutcome) {
    // No port produced a server reply at all; nothing was opened, so
    // the session fields stay at their initial values
    if outcome.diagnostic_tag == racer::ALL_PORTS_FAILED {
        verdict.category = Category::Unknown;
        verdict.errors = outcome.error.clone();
        return;
    }

    // Explicit policy refusals surfaced in the error text
    if let Some(error) = outcome.error.as_deref() {
        let lower = error.to_ascii_lowercase();
        if lower.contains("550 5.7.1") || lower.contains("blocked") || lower.contains("spamhaus") {
            verdict.category = Category::Blacklisted;
            verdict.errors = Some(error.to_string());
            return;
        }
    }

    verdict.diagnostic_tag = Some(outcome.diagnostic_tag.clone());
    verdict.smtp_code = outcome.smtp_code;
    verdict.status = Some(outcome.status);
    verdict.transcript = outcome.transcript_text();
    verdict.mail_host = Some(outcome.mx_host.clone());
    verdict.timestamp = outcome.timestamp.clone();
    verdict.port_opened = true;
    verdict.connection_successful = outcome.status != RecipientStatus::UnknownFailure;
    if let Some(error) = &outcome.error {
        verdict.errors = Some(error.clone());
    }
    verdict.category = category_for(outcome);
}

/// Map a session's diagnostic tag to the outward category
fn category_for(outcome: &SessionOutcome) -> Category {
    match outcome.diagnostic_tag.trim() {
        "Accepted" => Category::Valid,
        "Forwarded" => Category::Forwarded,
        "CannotVerify" => Category::CannotVerify,
        "MailboxBusy" => Category::MailboxBusy,
        "LocalError" => Category::LocalError,
        "InsufficientStorage" => Category::InsufficientStorage,
        "UserNotFound" | "MailboxNotFound" | "UserNotLocal" | "MailboxNameInvalid" => {
            Category::UserNotFound
        }
        "RelayDenied" => Category::RelayDenied,
        "AccessDenied" => Category::AccessDenied,
        "Greylisted" => Category::Greylisted,
        "SyntaxError" => Category::SyntaxError,
        "TransactionFailed" => Category::Invalid,
        "BlockedByBlacklist" | "BlockedBySpamhaus" | "Blocked" => Category::Blacklisted,
        _ => {
            if outcome.status == RecipientStatus::TemporaryFailure {
                Category::Unknown
            } else {
                Category::Invalid
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn verifier_with_lists(white: &[&str], disp: &[&str], black: &[&str]) -> EmailVerifier {
        let to_vec = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        EmailVerifier::new(VerifierConfig {
            whitelist: to_vec(white),
            disposable: to_vec(disp),
            blacklist: to_vec(black),
            ..VerifierConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_syntax_gate() {
        assert!(EmailVerifier::is_valid_syntax("user@example.com"));
        assert!(EmailVerifier::is_valid_syntax("USER.name+tag@sub.Example.CO.UK"));
        assert!(!EmailVerifier::is_valid_syntax(" "));
        assert!(!EmailVerifier::is_valid_syntax(""));
        assert!(!EmailVerifier::is_valid_syntax("no-at-sign"));
        assert!(!EmailVerifier::is_valid_syntax("user@"));
        assert!(!EmailVerifier::is_valid_syntax("@example.com"));
        assert!(!EmailVerifier::is_valid_syntax("user@no-tld"));
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            EmailVerifier::extract_domain("User@Example.COM"),
            Some("example.com".to_string())
        );
        // The last @ wins
        assert_eq!(
            EmailVerifier::extract_domain("quoted@local@example.com"),
            Some("example.com".to_string())
        );
        assert_eq!(EmailVerifier::extract_domain("user@"), None);
        assert_eq!(EmailVerifier::extract_domain("no-at"), None);
    }

    #[test]
    fn test_extract_domain_idn_folding() {
        assert_eq!(
            EmailVerifier::extract_domain("user@münchen.de"),
            Some("xn--mnchen-3ya.de".to_string())
        );
    }

    #[test]
    fn test_extract_domain_idempotent() {
        let once = EmailVerifier::extract_domain("user@MÜNCHEN.de").unwrap();
        let twice = EmailVerifier::extract_domain(&format!("user@{once}")).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_config_validation() {
        let no_ports = VerifierConfig {
            smtp_ports: Vec::new(),
            ..VerifierConfig::default()
        };
        assert!(EmailVerifier::new(no_ports).is_err());

        let zero_timeout = VerifierConfig {
            smtp_timeout_ms: 0,
            ..VerifierConfig::default()
        };
        assert!(EmailVerifier::new(zero_timeout).is_err());
    }

    #[tokio::test]
    async fn test_blank_address_is_invalid() {
        let verifier = verifier_with_lists(&[], &[], &[]);
        let verdict = verifier.categorize(" ").await;
        assert_eq!(verdict.category, Category::Invalid);
        assert_eq!(verdict.smtp_code, 0);
        assert_eq!(verdict.transcript, None);
        assert_eq!(verdict.mail_host, None);
        assert!(!verdict.port_opened);
        assert!(!verdict.connection_successful);
    }

    #[tokio::test]
    async fn test_disposable_domain_short_circuits() {
        let verifier = verifier_with_lists(&[], &["mailinator.com"], &[]);
        let verdict = verifier.categorize("foo@mailinator.com").await;
        assert_eq!(verdict.category, Category::Disposable);
        // No MX lookup happened, so no session fields are populated
        assert_eq!(verdict.mail_host, None);
        assert_eq!(verdict.transcript, None);
        assert!(!verdict.port_opened);
    }

    #[tokio::test]
    async fn test_whitelist_wins_on_conflict() {
        let verifier =
            verifier_with_lists(&["corp.example"], &["corp.example"], &["corp.example"]);
        let verdict = verifier.categorize("boss@corp.example").await;
        assert_eq!(verdict.category, Category::Whitelisted);
    }

    #[tokio::test]
    async fn test_blacklisted_domain() {
        let verifier = verifier_with_lists(&[], &[], &["spam.example"]);
        let verdict = verifier.categorize("x@spam.example").await;
        assert_eq!(verdict.category, Category::Blacklisted);
        assert_eq!(verdict.mail_host, None);
    }

    fn outcome_with_tag(tag: &str, status: RecipientStatus, code: i32) -> SessionOutcome {
        SessionOutcome {
            status,
            smtp_code: code,
            reply_text: None,
            diagnostic_tag: tag.to_string(),
            mx_host: "mx.example.com".to_string(),
            port: 25,
            tls: false,
            transcript: Vec::new(),
            timestamp: crate::now_timestamp(),
            error: None,
        }
    }

    #[test]
    fn test_all_ports_failed_reports_unknown() {
        let mut outcome =
            outcome_with_tag(racer::ALL_PORTS_FAILED, RecipientStatus::UnknownFailure, -1);
        outcome.error =
            Some("All ports failed: timed out after 15000 ms during connect".to_string());

        let mut verdict = Verdict::new("user@example.com");
        apply_session_outcome(&mut verdict, &outcome);

        assert_eq!(verdict.category, Category::Unknown);
        assert!(!verdict.port_opened);
        assert!(!verdict.connection_successful);
        assert_eq!(verdict.mail_host, None);
        assert_eq!(verdict.transcript, None);
        assert_eq!(verdict.smtp_code, 0);
        assert!(verdict.errors.unwrap().contains("timed out"));
    }

    #[test]
    fn test_outcome_populates_session_fields() {
        let outcome = outcome_with_tag("Accepted", RecipientStatus::Valid, 250);

        let mut verdict = Verdict::new("user@example.com");
        apply_session_outcome(&mut verdict, &outcome);

        assert_eq!(verdict.category, Category::Valid);
        assert_eq!(verdict.smtp_code, 250);
        assert!(verdict.port_opened);
        assert!(verdict.connection_successful);
        assert_eq!(verdict.mail_host.as_deref(), Some("mx.example.com"));
        assert_eq!(verdict.status, Some(RecipientStatus::Valid));
    }

    #[test]
    fn test_policy_refusal_in_error_text_is_blacklisted() {
        let mut outcome = outcome_with_tag("PortFailed", RecipientStatus::UnknownFailure, -1);
        outcome.error = Some("server said: 550 5.7.1 listed by Spamhaus".to_string());

        let mut verdict = Verdict::new("user@example.com");
        apply_session_outcome(&mut verdict, &outcome);

        assert_eq!(verdict.category, Category::Blacklisted);
        assert!(!verdict.port_opened);
        assert!(verdict.errors.unwrap().contains("Spamhaus"));
    }

    #[test]
    fn test_category_mapping() {
        use RecipientStatus::*;
        let cases = [
            ("Accepted", Valid, 250, Category::Valid),
            ("Forwarded", Valid, 251, Category::Forwarded),
            ("CannotVerify", Valid, 252, Category::CannotVerify),
            ("MailboxBusy", TemporaryFailure, 450, Category::MailboxBusy),
            ("LocalError", TemporaryFailure, 451, Category::LocalError),
            ("InsufficientStorage", TemporaryFailure, 452, Category::InsufficientStorage),
            ("UserNotFound", UserNotFound, 550, Category::UserNotFound),
            ("UserNotLocal", UserNotFound, 551, Category::UserNotFound),
            ("MailboxNameInvalid", UserNotFound, 553, Category::UserNotFound),
            ("RelayDenied", UnknownFailure, 554, Category::RelayDenied),
            ("AccessDenied", UnknownFailure, 554, Category::AccessDenied),
            ("Greylisted", TemporaryFailure, 451, Category::Greylisted),
            ("BlockedByBlacklist", Blacklisted, 550, Category::Blacklisted),
            ("BlockedBySpamhaus", Blacklisted, 550, Category::Blacklisted),
            ("ServiceUnavailable", TemporaryFailure, 421, Category::Unknown),
            ("Rejected", UnknownFailure, 554, Category::Invalid),
            ("Unclassified", TemporaryFailure, 499, Category::Unknown),
            ("Unclassified", UnknownFailure, 599, Category::Invalid),
        ];
        for (tag, status, code, expected) in cases {
            assert_eq!(
                category_for(&outcome_with_tag(tag, status, code)),
                expected,
                "tag {tag}"
            );
        }
    }
}
