//! Multi-port racer
//!
//! Fans one probing session out per candidate port and returns the
//! first `Valid` outcome, cancelling the rest. When no port yields an
//! acceptance, the first completed outcome that carries a real server
//! reply wins; failing that, an `AllPortsFailed` outcome is returned.

use crate::smtp::session::{run_session, SessionOutcome};
use crate::{RecipientStatus, VerifierConfig};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Grace on top of the per-socket timeout before a whole session is
/// abandoned
const RACE_GRACE: Duration = Duration::from_secs(2);

/// Diagnostic tag of the synthetic outcome returned when no port
/// produced a server reply
pub const ALL_PORTS_FAILED: &str = "AllPortsFailed";

/// Race probing sessions for `target` across the configured ports
pub async fn race(host: &str, target: &str, config: &VerifierConfig) -> SessionOutcome {
    debug!("Racing SMTP sessions to {} on ports {:?}", host, config.smtp_ports);

    let deadline = Duration::from_millis(config.smtp_timeout_ms) + RACE_GRACE;
    let mut sessions = JoinSet::new();
    for &port in &config.smtp_ports {
        let host = host.to_string();
        let target = target.to_string();
        let config = config.clone();
        sessions.spawn(async move {
            match tokio::time::timeout(deadline, run_session(&host, port, &target, &config)).await {
                Ok(outcome) => outcome,
                Err(_) => SessionOutcome::timed_out(&host, port, config.smtp_timeout_ms),
            }
        });
    }

    let mut fallback: Option<SessionOutcome> = None;
    let mut last_failure: Option<SessionOutcome> = None;

    while let Some(joined) = sessions.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            // Aborted or panicked session; nothing to report
            Err(err) => {
                if err.is_panic() {
                    warn!("Probing session panicked: {err}");
                }
                continue;
            }
        };

        if outcome.status == RecipientStatus::Valid {
            info!("Recipient accepted on {}:{}", outcome.mx_host, outcome.port);
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
            return outcome;
        }

        debug!(
            "Port {} finished without acceptance - status {:?}, tag {}",
            outcome.port, outcome.status, outcome.diagnostic_tag
        );
        if fallback.is_none() && outcome.smtp_code >= 0 {
            fallback = Some(outcome);
        } else if last_failure.is_none() {
            last_failure = Some(outcome);
        }
    }

    if let Some(outcome) = fallback {
        return outcome;
    }

    warn!("All ports failed for {}", host);
    all_ports_failed(host, last_failure)
}

fn all_ports_failed(host: &str, last_failure: Option<SessionOutcome>) -> SessionOutcome {
    let error = match last_failure.as_ref().and_then(|o| o.error.as_deref()) {
        Some(detail) => format!("All ports failed: {detail}"),
        None => "All ports failed".to_string(),
    };
    SessionOutcome {
        status: RecipientStatus::UnknownFailure,
        smtp_code: -1,
        reply_text: None,
        diagnostic_tag: ALL_PORTS_FAILED.to_string(),
        mx_host: host.to_string(),
        port: 0,
        tls: false,
        transcript: last_failure.map(|o| o.transcript).unwrap_or_default(),
        timestamp: crate::now_timestamp(),
        error: Some(error),
    }
}
