//! Catch-all detection
//!
//! A domain that accepts mail for a local-part that cannot exist
//! accepts mail for everything, which defeats per-mailbox probing.
//! The probe runs one session for a synthetic recipient and reports
//! catch-all when the server replies with an acceptance.

use crate::smtp::session;
use crate::{RecipientStatus, VerifierConfig, VerifyError};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

/// Check whether `domain` accepts any recipient
///
/// Runs a single session for a synthetic address at `domain` against
/// `host`, on the first configured port. A connection-level failure
/// (the server never said anything) propagates as an error so the
/// caller can report the probe as inconclusive.
pub async fn is_catch_all(
    host: &str,
    domain: &str,
    config: &VerifierConfig,
) -> Result<bool, VerifyError> {
    let probe_address = synthetic_address(domain);
    let port = config.smtp_ports.first().copied().unwrap_or(25);
    debug!("Catch-all probe for {} via {}:{}", domain, host, port);

    let outcome = session::run_session(host, port, &probe_address, config).await;
    if outcome.status == RecipientStatus::Valid {
        debug!("Domain {} accepted synthetic recipient - catch-all", domain);
        return Ok(true);
    }
    if outcome.smtp_code >= 0 {
        // A reachable server rejected the synthetic recipient
        return Ok(false);
    }
    Err(VerifyError::CatchAllProbe(
        outcome
            .error
            .unwrap_or_else(|| format!("no response from {host}")),
    ))
}

/// Synthetic local-part guaranteed not to exist; the random suffix
/// defeats servers that special-case known probe strings.
fn synthetic_address(domain: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("nonexistent-{suffix}@{domain}")
}
