/// Parses an RFC 3339 timestamp into epoch milliseconds.
pub fn rfc3339_to_unix_ms(raw: &str) -> Option<u64> {
    let parsed = chrono::DateTime::parse_from_rfc3339(raw).ok()?;
    u64::try_from(parsed.timestamp_millis()).ok()
}

/// Ordering key for ticket creation time. Unparseable timestamps sort first
/// (epoch zero) so a malformed record can never displace a valid primary.
pub fn creation_sort_key(created_at: &str) -> u64 {
    rfc3339_to_unix_ms(created_at).unwrap_or(0)
}

/// Milliseconds elapsed between `raw` and `now_unix_ms`. Returns `None` when
/// the timestamp is unparseable or lies in the future.
pub fn elapsed_ms_since(raw: &str, now_unix_ms: u64) -> Option<u64> {
    let then = rfc3339_to_unix_ms(raw)?;
    now_unix_ms.checked_sub(then)
}

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{creation_sort_key, current_unix_timestamp_ms, elapsed_ms_since, rfc3339_to_unix_ms};

    #[test]
    fn unit_rfc3339_to_unix_ms_handles_valid_and_invalid_values() {
        assert_eq!(
            rfc3339_to_unix_ms("1970-01-01T00:00:01Z"),
            Some(1_000)
        );
        assert!(rfc3339_to_unix_ms("2026-02-01T10:00:00Z").is_some());
        assert_eq!(rfc3339_to_unix_ms("not-a-timestamp"), None);
    }

    #[test]
    fn unit_creation_sort_key_maps_unparseable_values_to_zero() {
        assert_eq!(creation_sort_key("garbage"), 0);
        assert!(creation_sort_key("2026-02-01T10:00:00Z") > 0);
    }

    #[test]
    fn functional_elapsed_ms_since_rejects_future_and_invalid_timestamps() {
        let now = rfc3339_to_unix_ms("2026-02-01T12:00:00Z").expect("now");
        assert_eq!(
            elapsed_ms_since("2026-02-01T10:00:00Z", now),
            Some(2 * 60 * 60 * 1_000)
        );
        assert_eq!(elapsed_ms_since("2026-02-01T13:00:00Z", now), None);
        assert_eq!(elapsed_ms_since("garbage", now), None);
    }

    #[test]
    fn unit_current_unix_timestamp_ms_is_after_2020() {
        assert!(current_unix_timestamp_ms() > 1_577_836_800_000);
    }
}
