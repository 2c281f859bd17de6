//! MX resolution
//!
//! DNS MX lookup with A-record fallback via hickory-resolver. The
//! orchestrator only probes the lowest-preference candidate, but the
//! full sorted list is returned so callers can extend to fallback
//! hosts if they want to.

use crate::{VerifyError, VerifierConfig};
use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    AsyncResolver, TokioAsyncResolver,
};
use std::time::Duration;
use tracing::{debug, info};

/// One mail-exchanger candidate, preference-sorted ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxCandidate {
    /// Host name, lowercased, trailing dot stripped. May be a raw IP
    /// when the candidate was synthesized from an A record.
    pub host: String,
    pub preference: u16,
}

/// DNS resolver wrapper for MX discovery
pub struct MxResolver {
    resolver: TokioAsyncResolver,
}

impl MxResolver {
    /// Create a resolver with the engine's timeout and retry settings
    pub fn new(config: &VerifierConfig) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_millis(config.dns_timeout_ms);
        opts.attempts = config.dns_attempts;

        let resolver = AsyncResolver::tokio(ResolverConfig::default(), opts);

        info!(
            "MX resolver initialized - timeout: {}ms, attempts: {}",
            config.dns_timeout_ms, config.dns_attempts
        );

        Self { resolver }
    }

    /// Resolve the mail exchangers for `domain`
    ///
    /// # Returns
    /// * `Ok(candidates)` sorted ascending by preference; empty when the
    ///   domain has neither MX nor A records
    /// * `Err(VerifyError::Dns)` on resolver failures (servfail, timeout)
    pub async fn resolve_mx(&self, domain: &str) -> Result<Vec<MxCandidate>, VerifyError> {
        debug!("Resolving MX records for domain: {}", domain);

        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => {
                let mut candidates: Vec<MxCandidate> = lookup
                    .iter()
                    .map(|mx| MxCandidate {
                        host: normalize_exchange(&mx.exchange().to_utf8()),
                        preference: mx.preference(),
                    })
                    .filter(|c| !c.host.is_empty())
                    .collect();

                if candidates.is_empty() {
                    return self.resolve_a_fallback(domain).await;
                }

                candidates.sort_by_key(|c| c.preference);
                debug!("Domain {} has {} MX candidate(s)", domain, candidates.len());
                Ok(candidates)
            }
            Err(err) if is_no_records(&err) => self.resolve_a_fallback(domain).await,
            Err(err) => Err(VerifyError::Dns(err.to_string())),
        }
    }

    /// A-record fallback for domains without MX records (RFC 5321 §5.1):
    /// each address becomes a preference-0 candidate.
    async fn resolve_a_fallback(&self, domain: &str) -> Result<Vec<MxCandidate>, VerifyError> {
        debug!("No MX records for {}, falling back to A records", domain);

        match self.resolver.ipv4_lookup(domain).await {
            Ok(lookup) => {
                let candidates: Vec<MxCandidate> = lookup
                    .iter()
                    .map(|a| MxCandidate {
                        host: a.0.to_string(),
                        preference: 0,
                    })
                    .collect();
                debug!(
                    "Domain {} resolved to {} A-record candidate(s)",
                    domain,
                    candidates.len()
                );
                Ok(candidates)
            }
            Err(err) if is_no_records(&err) => Ok(Vec::new()),
            Err(err) => Err(VerifyError::Dns(err.to_string())),
        }
    }
}

fn is_no_records(err: &ResolveError) -> bool {
    matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

/// Lowercase an exchange name and strip the trailing root dot
pub(crate) fn normalize_exchange(exchange: &str) -> String {
    exchange.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_exchange() {
        assert_eq!(normalize_exchange("MX1.Example.COM."), "mx1.example.com");
        assert_eq!(normalize_exchange("mx.example.com"), "mx.example.com");
        assert_eq!(normalize_exchange(" mx.example.com. "), "mx.example.com");
        assert_eq!(normalize_exchange("."), "");
    }

    #[test]
    fn test_candidate_ordering() {
        let mut candidates = vec![
            MxCandidate { host: "backup.example.com".into(), preference: 20 },
            MxCandidate { host: "primary.example.com".into(), preference: 5 },
            MxCandidate { host: "secondary.example.com".into(), preference: 10 },
        ];
        candidates.sort_by_key(|c| c.preference);
        assert_eq!(candidates[0].host, "primary.example.com");
        assert_eq!(candidates[2].host, "backup.example.com");
    }
}
