use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A size in bytes, parsed from strings such as `"10mb"`, `"512kib"` or `"10000000"`.
///
/// Decimal suffixes (`kb`, `mb`, `gb`, `tb`) are powers of 1000; binary suffixes
/// (`kib`, `mib`, `gib`, `tib`) are powers of 1024. Suffixes are case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteSize(u64);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid byte size '{0}'")]
pub struct ByteSizeParseError(String);

impl ByteSize {
    pub const fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The size as a `usize`, saturating on platforms where it does not fit.
    pub fn as_usize(&self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl From<u64> for ByteSize {
    fn from(bytes: u64) -> Self {
        Self(bytes)
    }
}

impl FromStr for ByteSize {
    type Err = ByteSizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_lowercase();
        let split_at = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '_'))
            .unwrap_or(trimmed.len());
        let (number, suffix) = trimmed.split_at(split_at);
        let number = number.replace('_', "");

        let multiplier: u64 = match suffix.trim() {
            "" | "b" => 1,
            "kb" | "k" => 1_000,
            "mb" | "m" => 1_000_000,
            "gb" | "g" => 1_000_000_000,
            "tb" | "t" => 1_000_000_000_000,
            "kib" => 1 << 10,
            "mib" => 1 << 20,
            "gib" => 1 << 30,
            "tib" => 1 << 40,
            _ => return Err(ByteSizeParseError(s.to_owned())),
        };

        if number.is_empty() {
            return Err(ByteSizeParseError(s.to_owned()));
        }

        if let Ok(whole) = number.parse::<u64>() {
            return whole
                .checked_mul(multiplier)
                .map(ByteSize)
                .ok_or_else(|| ByteSizeParseError(s.to_owned()));
        }

        // Fractional values such as "1.5mb".
        let value = number.parse::<f64>().map_err(|_| ByteSizeParseError(s.to_owned()))?;
        let bytes = value * multiplier as f64;
        if !bytes.is_finite() || bytes < 0. || bytes > u64::MAX as f64 {
            return Err(ByteSizeParseError(s.to_owned()));
        }
        Ok(ByteSize(bytes as u64))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(u64, &str); 4] = [
            (1_000_000_000_000, "tb"),
            (1_000_000_000, "gb"),
            (1_000_000, "mb"),
            (1_000, "kb"),
        ];
        for (scale, unit) in UNITS {
            if self.0 >= scale && self.0 % scale == 0 {
                return write!(f, "{}{unit}", self.0 / scale);
            }
        }
        write!(f, "{}", self.0)
    }
}
