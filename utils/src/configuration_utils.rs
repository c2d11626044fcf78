use std::time::Duration;

use tracing::warn;

use crate::ByteSize;

/// A value that can be read from a user-supplied configuration string, typically an
/// environment variable.
pub trait ParsableConfigValue: Sized {
    fn parse_user_value(value: &str) -> Option<Self>;

    /// Parse `value` if present, falling back to `default` with a warning when parsing fails.
    fn parse(variable_name: &str, value: Option<String>, default: Self) -> Self {
        let Some(v) = value else {
            return default;
        };

        match Self::parse_user_value(&v) {
            Some(parsed) => parsed,
            None => {
                warn!(
                    variable_name,
                    value = %v,
                    "Configuration value could not be parsed; using the default instead."
                );
                default
            },
        }
    }
}

macro_rules! impl_parsable_from_str {
    ($($t:ty),+) => {
        $(
            impl ParsableConfigValue for $t {
                fn parse_user_value(value: &str) -> Option<Self> {
                    value.trim().parse::<$t>().ok()
                }
            }
        )+
    };
}

impl_parsable_from_str!(usize, u64, u32, i64, f64);

impl ParsableConfigValue for bool {
    fn parse_user_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "on" => Some(true),
            "0" | "false" | "no" | "n" | "off" => Some(false),
            _ => None,
        }
    }
}

impl ParsableConfigValue for String {
    fn parse_user_value(value: &str) -> Option<Self> {
        Some(value.to_owned())
    }
}

impl ParsableConfigValue for ByteSize {
    fn parse_user_value(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

/// Durations are given as an integer with an optional unit: `ms`, `s`, `m` or `h`.
/// A bare integer is read as seconds.
impl ParsableConfigValue for Duration {
    fn parse_user_value(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        let split_at = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
        let (number, unit) = value.split_at(split_at);
        let n: u64 = number.parse().ok()?;

        match unit.trim() {
            "ms" => Some(Duration::from_millis(n)),
            "" | "s" | "sec" | "secs" => Some(Duration::from_secs(n)),
            "m" | "min" | "mins" => n.checked_mul(60).map(Duration::from_secs),
            "h" | "hr" | "hrs" => n.checked_mul(3600).map(Duration::from_secs),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_falls_back_to_default() {
        assert_eq!(usize::parse("x", Some("12".into()), 3), 12);
        assert_eq!(usize::parse("x", Some("twelve".into()), 3), 3);
        assert_eq!(usize::parse("x", None, 3), 3);
    }

    #[test]
    fn test_bool_values() {
        assert_eq!(bool::parse_user_value("TRUE"), Some(true));
        assert_eq!(bool::parse_user_value("off"), Some(false));
        assert_eq!(bool::parse_user_value("maybe"), None);
    }

    #[test]
    fn test_duration_values() {
        assert_eq!(Duration::parse_user_value("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(Duration::parse_user_value("30"), Some(Duration::from_secs(30)));
        assert_eq!(Duration::parse_user_value("2m"), Some(Duration::from_secs(120)));
        assert_eq!(Duration::parse_user_value("1 fortnight"), None);
    }

    #[test]
    fn test_byte_size_values() {
        assert_eq!(ByteSize::parse_user_value("2mb"), Some(ByteSize::new(2_000_000)));
        assert_eq!(ByteSize::parse("x", Some("lots".into()), ByteSize::new(7)), ByteSize::new(7));
    }
}
