//! Scalar config types with a human readable YAML form.

use std::fmt;
use std::str::FromStr;
use std::time;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use super::merge::{Merge, MergeError};
use super::schema::{KnownKeys, Schema};

/// A unit parse failure.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    /// The duration string is malformed.
    #[error("invalid duration {0:?}")]
    Duration(String),
    /// The size string is malformed.
    #[error("invalid size {0:?}")]
    Size(String),
}

/// A duration written the way Go formats them: `1h30m`, `500ms`, `8760h0m0s`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(pub time::Duration);

impl Duration {
    /// Wraps a std duration.
    pub fn new(d: time::Duration) -> Self {
        Duration(d)
    }

    /// A duration of whole seconds.
    pub fn from_secs(secs: u64) -> Self {
        Duration(time::Duration::from_secs(secs))
    }

    /// The std duration.
    pub fn get(self) -> time::Duration {
        self.0
    }

    /// True for a zero duration.
    pub fn is_zero(&self) -> bool {
        self.0.as_nanos() == 0
    }
}

fn unit_nanos(unit: &str) -> Option<f64> {
    Some(match unit {
        "ns" => 1.0,
        "us" | "µs" | "μs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3600e9,
        _ => return None,
    })
}

impl FromStr for Duration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::Duration(s.to_string());
        let input = s.trim();
        let input = input.strip_prefix('+').unwrap_or(input);
        if input.is_empty() || input.starts_with('-') {
            return Err(err());
        }
        if input == "0" {
            return Ok(Duration::default());
        }

        let mut total = 0f64;
        let mut rest = input;
        while !rest.is_empty() {
            let number_len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .ok_or_else(err)?;
            if number_len == 0 {
                return Err(err());
            }
            let number: f64 = rest[..number_len].parse().map_err(|_| err())?;
            rest = &rest[number_len..];
            let unit_len = rest
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or_else(|| rest.len());
            let unit = unit_nanos(&rest[..unit_len]).ok_or_else(err)?;
            rest = &rest[unit_len..];
            total += number * unit;
        }
        Ok(Duration(time::Duration::from_nanos(total.round() as u64)))
    }
}

fn format_fraction(value: u128, scale: u128) -> String {
    let whole = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let width = scale.to_string().len() - 1;
    let digits = format!("{:0width$}", frac, width = width);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        if nanos == 0 {
            return f.write_str("0s");
        }
        if nanos < 1_000 {
            return write!(f, "{}ns", nanos);
        }
        if nanos < 1_000_000 {
            return write!(f, "{}µs", format_fraction(nanos, 1_000));
        }
        if nanos < 1_000_000_000 {
            return write!(f, "{}ms", format_fraction(nanos, 1_000_000));
        }
        let hours = nanos / 3_600_000_000_000;
        let minutes = (nanos / 60_000_000_000) % 60;
        let seconds = nanos % 60_000_000_000;
        if hours > 0 {
            write!(f, "{}h", hours)?;
        }
        if hours > 0 || minutes > 0 {
            write!(f, "{}m", minutes)?;
        }
        write!(f, "{}s", format_fraction(seconds, 1_000_000_000))
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct DurationVisitor;

impl<'de> Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a duration such as 30s or 1h0m0s")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
        value.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
        Ok(Duration(time::Duration::from_nanos(value)))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
        if value < 0 {
            return Err(E::custom("negative durations are not allowed"));
        }
        self.visit_u64(value as u64)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }
}

impl Merge for Duration {
    fn merge(&mut self, other: Self, _path: &str) -> Result<(), MergeError> {
        if !other.is_zero() {
            *self = other;
        }
        Ok(())
    }
}

impl KnownKeys for Duration {
    fn schema() -> Schema {
        Schema::Scalar
    }
}

/// A disk size in bytes. Accepts plain numbers or human readable sizes
/// such as `4GB` or `100 MiB`; encodes as a number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DiskSize(pub u64);

/// Parses a byte size with an optional SI or IEC suffix.
pub fn parse_bytes(s: &str) -> Result<u64, ParseError> {
    let err = || ParseError::Size(s.to_string());
    let input = s.trim();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or_else(|| input.len());
    let (number, suffix) = input.split_at(split);
    let number: f64 = number.parse().map_err(|_| err())?;
    let multiplier: f64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "k" | "kb" => 1e3,
        "m" | "mb" => 1e6,
        "g" | "gb" => 1e9,
        "t" | "tb" => 1e12,
        "p" | "pb" => 1e15,
        "ki" | "kib" => 1024.0,
        "mi" | "mib" => 1024f64.powi(2),
        "gi" | "gib" => 1024f64.powi(3),
        "ti" | "tib" => 1024f64.powi(4),
        "pi" | "pib" => 1024f64.powi(5),
        _ => return Err(err()),
    };
    Ok((number * multiplier).round() as u64)
}

struct DiskSizeVisitor;

impl<'de> Visitor<'de> for DiskSizeVisitor {
    type Value = DiskSize;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a size in bytes or a human readable size")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<DiskSize, E> {
        Ok(DiskSize(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<DiskSize, E> {
        if value < 0 {
            return Err(E::custom("negative sizes are not allowed"));
        }
        Ok(DiskSize(value as u64))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<DiskSize, E> {
        parse_bytes(value).map(DiskSize).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for DiskSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DiskSizeVisitor)
    }
}

impl Merge for DiskSize {
    fn merge(&mut self, other: Self, _path: &str) -> Result<(), MergeError> {
        if other.0 != 0 {
            *self = other;
        }
        Ok(())
    }
}

impl KnownKeys for DiskSize {
    fn schema() -> Schema {
        Schema::Scalar
    }
}
