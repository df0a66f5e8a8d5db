//! Storage quota parsing
//!
//! Quotas are given either as a raw byte count or as a human-readable size
//! such as `"5GB"`. Units are powers of 1024.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static HUMAN_SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+)\s*(KB|MB|GB|TB)$").expect("human size pattern compiles")
});

/// Quota value as declared on a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuotaValue {
    /// Raw byte count
    Bytes(u64),
    /// Human-readable size, e.g. `"5GB"`
    Human(String),
}

impl QuotaValue {
    /// Quota in bytes; unparseable values yield 0
    pub fn to_bytes(&self) -> u64 {
        match self {
            Self::Bytes(bytes) => *bytes,
            Self::Human(s) => parse_quota_to_bytes(s),
        }
    }
}

impl std::fmt::Display for QuotaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "{}", bytes),
            Self::Human(s) => f.write_str(s),
        }
    }
}

/// Parse a quota string into bytes.
///
/// Accepts a plain number (`"500"`) or `<number><unit>` with a
/// case-insensitive unit of `KB`, `MB`, `GB` or `TB`. Anything else,
/// including values that overflow `u64`, returns 0.
pub fn parse_quota_to_bytes(quota: &str) -> u64 {
    let quota = quota.trim();

    if !quota.is_empty() && quota.bytes().all(|b| b.is_ascii_digit()) {
        return quota.parse().unwrap_or(0);
    }

    let Some(caps) = HUMAN_SIZE.captures(quota) else {
        return 0;
    };

    let Ok(value) = caps[1].parse::<u64>() else {
        return 0;
    };

    let exponent = match caps[2].to_ascii_uppercase().as_str() {
        "KB" => 1,
        "MB" => 2,
        "GB" => 3,
        "TB" => 4,
        _ => return 0,
    };

    1024u64
        .checked_pow(exponent)
        .and_then(|multiplier| value.checked_mul(multiplier))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_quota_to_bytes("2GB"), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_quota_to_bytes("5gb"), 5 * 1024u64.pow(3));
        assert_eq!(parse_quota_to_bytes("10 MB"), 10 * 1024 * 1024);
        assert_eq!(parse_quota_to_bytes("3KB"), 3 * 1024);
        assert_eq!(parse_quota_to_bytes("1TB"), 1024u64.pow(4));
    }

    #[test]
    fn test_parse_raw_bytes() {
        assert_eq!(parse_quota_to_bytes("500"), 500);
        assert_eq!(parse_quota_to_bytes("0"), 0);
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(parse_quota_to_bytes(""), 0);
        assert_eq!(parse_quota_to_bytes("lots"), 0);
        assert_eq!(parse_quota_to_bytes("5PB"), 0);
        assert_eq!(parse_quota_to_bytes("1.5GB"), 0);
        assert_eq!(parse_quota_to_bytes("-5GB"), 0);
        assert_eq!(parse_quota_to_bytes("99999999999999999999TB"), 0);
    }

    #[test]
    fn test_quota_value_deserializes_both_forms() {
        let bytes: QuotaValue = serde_json::from_str("1024").unwrap();
        assert_eq!(bytes, QuotaValue::Bytes(1024));
        assert_eq!(bytes.to_bytes(), 1024);

        let human: QuotaValue = serde_json::from_str("\"1MB\"").unwrap();
        assert_eq!(human.to_bytes(), 1024 * 1024);
        assert_eq!(human.to_string(), "1MB");
    }
}
