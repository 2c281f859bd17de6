//! SMTP response classification
//!
//! Pure mapping from (reply code, enhanced status code, reply text) to
//! a recipient status, and from (reply code, reply text) to a
//! diagnostic tag. Text matching is case-insensitive and
//! substring-based; enhanced codes take precedence over reply codes.

use crate::RecipientStatus;

/// Classify an RCPT reply into a recipient status
pub fn classify_response(code: i32, enhanced: Option<&str>, text: &str) -> RecipientStatus {
    let lower = text.to_ascii_lowercase();

    if let Some(enhanced) = enhanced {
        match enhanced {
            "5.1.1" | "5.1.0" => return RecipientStatus::UserNotFound,
            "4.2.1" | "4.3.0" | "4.4.7" => return RecipientStatus::TemporaryFailure,
            "5.7.1" => return RecipientStatus::Blacklisted,
            _ => {}
        }
    }

    if (250..=259).contains(&code) {
        return RecipientStatus::Valid;
    }
    if (400..500).contains(&code) {
        return RecipientStatus::TemporaryFailure;
    }
    if code == 550
        || lower.contains("user unknown")
        || lower.contains("no such user")
        || lower.contains("recipient address rejected")
    {
        return RecipientStatus::UserNotFound;
    }
    if lower.contains("blacklist") || lower.contains("spamhaus") || lower.contains("blocked") {
        return RecipientStatus::Blacklisted;
    }
    RecipientStatus::UnknownFailure
}

/// Summarize an RCPT reply into a short diagnostic tag
pub fn diagnostic_tag(code: i32, text: &str) -> &'static str {
    let lower = text.to_ascii_lowercase();

    // Greylisting announces itself in the text of a transient reply
    if (400..500).contains(&code) && lower.contains("greylist") {
        return "Greylisted";
    }

    match code {
        250 => "Accepted",
        251 => "Forwarded",
        252 => "CannotVerify",
        421 => "ServiceUnavailable",
        450 => "MailboxBusy",
        451 => "LocalError",
        452 => "InsufficientStorage",
        550 => {
            if lower.contains("spamhaus") {
                "BlockedBySpamhaus"
            } else if lower.contains("blacklist") {
                "BlockedByBlacklist"
            } else if lower.contains("blocked") {
                "Blocked"
            } else {
                "UserNotFound"
            }
        }
        551 => "UserNotLocal",
        552 => "StorageExceeded",
        553 => "MailboxNameInvalid",
        _ => {
            if lower.contains("relay access denied") {
                "RelayDenied"
            } else if lower.contains("not permitted") {
                "AccessDenied"
            } else if code == 554 {
                "Rejected"
            } else {
                "Unclassified"
            }
        }
    }
}
