use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}")
            .expect("email pattern compiles")
    })
}

/// Normalizes an email address for comparison and storage.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Builds the normalized ignore set from configuration values.
pub fn build_ignored_email_set<'a>(values: impl IntoIterator<Item = &'a str>) -> HashSet<String> {
    values
        .into_iter()
        .map(normalize_email)
        .filter(|email| !email.is_empty())
        .collect::<HashSet<_>>()
}

/// Scans body text for email-shaped substrings and returns the first one not
/// on the ignore list, normalized. Placeholder-sender tickets carry the real
/// requester address somewhere in the forwarded body; system addresses on the
/// ignore list must never win.
pub fn first_usable_email(body: &str, ignored: &HashSet<String>) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    email_pattern()
        .find_iter(body)
        .map(|candidate| normalize_email(candidate.as_str()))
        .find(|candidate| !ignored.contains(candidate))
}

/// Derives a display name for a newly created contact from the email local
/// part.
pub fn contact_name_from_email(email: &str) -> String {
    email
        .split('@')
        .next()
        .filter(|local| !local.is_empty())
        .unwrap_or(email)
        .to_string()
}
