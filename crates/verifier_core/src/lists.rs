//! Domain-list classification
//!
//! Membership tests against the whitelist, disposable, and blacklist
//! sets. The disposable set is by far the largest of the three, so a
//! Bloom filter sits in front of it to short-circuit the common case
//! of an address that is on none of the lists.

use fastbloom::BloomFilter;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Built-in seed of well-known disposable providers, merged with
/// whatever the configuration supplies.
const BUILTIN_DISPOSABLE: &str = include_str!("builtin_disposable.txt");

/// Immutable domain lists, loaded once at startup
pub struct DomainLists {
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
    disposable: HashSet<String>,
    disposable_filter: Option<BloomFilter>,
}

impl DomainLists {
    /// Build the three sets from configured domain lists
    ///
    /// # Arguments
    /// * `whitelist` - domains always categorized `Whitelisted`
    /// * `disposable` - disposable providers, merged with the built-in seed
    /// * `blacklist` - domains always categorized `Blacklisted`
    /// * `bloom_fp_rate` - false positive rate for the disposable pre-filter
    pub fn new(
        whitelist: &[String],
        disposable: &[String],
        blacklist: &[String],
        bloom_fp_rate: f64,
    ) -> Self {
        let whitelist = normalize_set(whitelist.iter().map(String::as_str));
        let blacklist = normalize_set(blacklist.iter().map(String::as_str));

        let mut disposable_set = normalize_set(disposable.iter().map(String::as_str));
        for domain in parse_domain_list(BUILTIN_DISPOSABLE) {
            disposable_set.insert(domain);
        }

        let disposable_filter = if disposable_set.is_empty() {
            None
        } else {
            Some(
                BloomFilter::with_false_pos(bloom_fp_rate)
                    .items(disposable_set.iter().cloned()),
            )
        };

        info!(
            "Domain lists loaded - {} whitelisted, {} disposable, {} blacklisted",
            whitelist.len(),
            disposable_set.len(),
            blacklist.len()
        );

        Self {
            whitelist,
            blacklist,
            disposable: disposable_set,
            disposable_filter,
        }
    }

    /// O(1) membership test against the whitelist
    pub fn is_whitelisted(&self, domain: &str) -> bool {
        self.whitelist.contains(domain)
    }

    /// O(1) membership test against the disposable set
    ///
    /// The Bloom filter rejects most non-members without touching the
    /// exact set; a filter hit is confirmed against the set so the
    /// answer is never a false positive.
    pub fn is_disposable(&self, domain: &str) -> bool {
        let key = domain.to_ascii_lowercase();
        if let Some(filter) = &self.disposable_filter {
            if !filter.contains(&key) {
                return false;
            }
        }
        let hit = self.disposable.contains(&key);
        if hit {
            debug!("Domain '{}' matched the disposable list", domain);
        }
        hit
    }

    /// O(1) membership test against the blacklist
    pub fn is_blacklisted(&self, domain: &str) -> bool {
        self.blacklist.contains(domain)
    }

    /// Number of domains in the disposable set
    pub fn disposable_count(&self) -> usize {
        self.disposable.len()
    }
}

fn normalize_set<'a>(domains: impl Iterator<Item = &'a str>) -> HashSet<String> {
    domains
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

/// Parse a newline-delimited domain list
///
/// Empty lines and `#` comments are skipped; entries that are not a
/// plausible host name are dropped with a warning.
pub fn parse_domain_list(content: &str) -> Vec<String> {
    let mut domains = Vec::new();
    let mut invalid_count = 0usize;

    for (line_no, line) in content.lines().enumerate() {
        let domain = line.trim();
        if domain.is_empty() || domain.starts_with('#') {
            continue;
        }
        if is_valid_domain_format(domain) {
            domains.push(domain.to_ascii_lowercase());
        } else {
            invalid_count += 1;
            if invalid_count <= 10 {
                warn!("Invalid domain format at line {}: '{}'", line_no + 1, domain);
            }
        }
    }

    if invalid_count > 10 {
        warn!("... and {} more invalid domain entries", invalid_count - 10);
    }

    domains
}

/// Basic host-label validation for list entries
pub fn is_valid_domain_format(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }
    if !domain.contains('.') {
        return false;
    }
    if domain.starts_with('.') || domain.ends_with('.') {
        return false;
    }
    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return false;
        }
        if label.starts_with('-') || label.ends_with('-') {
            return false;
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lists(white: &[&str], disp: &[&str], black: &[&str]) -> DomainLists {
        let to_vec = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        DomainLists::new(&to_vec(white), &to_vec(disp), &to_vec(black), 0.0001)
    }

    #[test]
    fn test_membership() {
        let lists = lists(&["corp.example"], &["mailinator.com"], &["spam.example"]);
        assert!(lists.is_whitelisted("corp.example"));
        assert!(lists.is_disposable("mailinator.com"));
        assert!(lists.is_blacklisted("spam.example"));
        assert!(!lists.is_whitelisted("gmail.com"));
        assert!(!lists.is_blacklisted("gmail.com"));
    }

    #[test]
    fn test_configured_entries_are_normalized() {
        let lists = lists(&[" Corp.Example "], &["MAILINATOR.COM"], &[]);
        assert!(lists.is_whitelisted("corp.example"));
        assert!(lists.is_disposable("mailinator.com"));
    }

    #[test]
    fn test_builtin_seed_is_loaded() {
        let lists = lists(&[], &[], &[]);
        assert!(lists.disposable_count() > 0);
        assert!(lists.is_disposable("10minutemail.com"));
        assert!(!lists.is_disposable("gmail.com"));
    }

    #[test]
    fn test_parse_domain_list() {
        let content = r#"
# comment
mailinator.com
TempMail.Org

not a domain
"#;
        let domains = parse_domain_list(content);
        assert_eq!(domains, vec!["mailinator.com", "tempmail.org"]);
    }

    #[test]
    fn test_domain_format_validation() {
        assert!(is_valid_domain_format("example.com"));
        assert!(is_valid_domain_format("sub.example.co.uk"));
        assert!(!is_valid_domain_format(""));
        assert!(!is_valid_domain_format("no-dot"));
        assert!(!is_valid_domain_format(".example.com"));
        assert!(!is_valid_domain_format("example.com."));
        assert!(!is_valid_domain_format("-example.com"));
        assert!(!is_valid_domain_format("ex ample.com"));
    }
}
