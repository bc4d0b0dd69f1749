//! Duration type with human-readable parsing support.
//!
//! Supports parsing from:
//! - Numbers (interpreted as milliseconds): `5000`
//! - Strings with suffixes: `"5ms"`, `"5s"`, `"5m"`, `"5h"`, `"1d"`

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Duration in milliseconds with human-readable parsing support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Duration(pub u64);

impl Duration {
    pub const fn from_millis(ms: u64) -> Self {
        Duration(ms)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Duration(secs * 1000)
    }

    pub const fn from_mins(mins: u64) -> Self {
        Duration(mins * 60 * 1000)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    pub const fn as_secs(&self) -> u64 {
        self.0 / 1000
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Converts to std::time::Duration, the form tokio and std APIs take.
    pub const fn as_std(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.0)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(d: Duration) -> Self {
        std::time::Duration::from_millis(d.0)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl de::Visitor<'_> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a duration like '5s', '100ms', '30m', '1h' or a number in milliseconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Duration, E>
            where
                E: de::Error,
            {
                if v < 0 {
                    return Err(E::custom("duration cannot be negative"));
                }
                Ok(Duration(v as u64))
            }

            fn visit_str<E>(self, s: &str) -> Result<Duration, E>
            where
                E: de::Error,
            {
                parse_duration(s).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

impl Serialize for Duration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

/// Parse a duration string into milliseconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration(ms));
    }

    let s_lower = s.to_lowercase();

    let (num_str, multiplier) = if s_lower.ends_with("ms") {
        (&s[..s.len() - 2], 1u64)
    } else if s_lower.ends_with('s') {
        (&s[..s.len() - 1], 1000u64)
    } else if s_lower.ends_with('m') {
        (&s[..s.len() - 1], 60 * 1000u64)
    } else if s_lower.ends_with('h') {
        (&s[..s.len() - 1], 60 * 60 * 1000u64)
    } else if s_lower.ends_with('d') {
        (&s[..s.len() - 1], 24 * 60 * 60 * 1000u64)
    } else {
        return Err(format!(
            "invalid duration format: '{s}'. Expected a number or a string with suffix (ms, s, m, h, d)"
        ));
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number in duration: '{num_str}'"))?;

    Ok(Duration(num * multiplier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_plain_numbers() {
        assert_eq!(parse_duration("0").unwrap(), Duration(0));
        assert_eq!(parse_duration("5000").unwrap(), Duration(5000));
    }

    #[test]
    fn test_parse_duration_suffixes() {
        assert_eq!(parse_duration("100ms").unwrap(), Duration(100));
        assert_eq!(parse_duration("5s").unwrap(), Duration(5_000));
        assert_eq!(parse_duration("5m").unwrap(), Duration(300_000));
        assert_eq!(parse_duration("1h").unwrap(), Duration(3_600_000));
        assert_eq!(parse_duration("1d").unwrap(), Duration(86_400_000));
        assert_eq!(parse_duration("5S").unwrap(), Duration(5_000));
        assert_eq!(parse_duration("  5 s ").unwrap(), Duration(5_000));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn test_deserialize() {
        let d: Duration = serde_yaml::from_str("5000").unwrap();
        assert_eq!(d, Duration(5000));

        let d: Duration = serde_yaml::from_str("\"30s\"").unwrap();
        assert_eq!(d, Duration(30_000));

        #[derive(Deserialize)]
        struct Conf {
            timeout: Duration,
        }
        let conf: Conf = toml::from_str("timeout = \"5m\"").unwrap();
        assert_eq!(conf.timeout, Duration(300_000));
    }

    #[test]
    fn test_serialize() {
        let d = Duration::from_secs(30);
        assert_eq!(serde_json::to_string(&d).unwrap(), "30000");
    }

    #[test]
    fn test_as_std() {
        assert_eq!(
            Duration::from_secs(5).as_std(),
            std::time::Duration::from_millis(5000)
        );
    }
}
