//! Resource quantities
//!
//! A fixed-point quantity with millis precision, parsed from and rendered
//! to the familiar resource notation: `100m`, `256Mi`, `1Gi`, `2`.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;

const BINARY_SUFFIXES: &[(&str, i64)] = &[
    ("Pi", 1 << 50),
    ("Ti", 1 << 40),
    ("Gi", 1 << 30),
    ("Mi", 1 << 20),
    ("Ki", 1 << 10),
];

const DECIMAL_SUFFIXES: &[(&str, i64)] = &[
    ("P", 1_000_000_000_000_000),
    ("T", 1_000_000_000_000),
    ("G", 1_000_000_000),
    ("M", 1_000_000),
    ("k", 1_000),
];

/// A resource quantity stored with millis precision.
///
/// Byte and count quantities are whole-valued; CPU quantities use the
/// milli range (`100m` == 0.1 cores).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quantity {
    millis: i64,
}

impl Quantity {
    pub const fn zero() -> Self {
        Quantity { millis: 0 }
    }

    /// Build from a whole value (bytes, inodes, pids).
    pub const fn from_value(value: i64) -> Self {
        Quantity {
            millis: value.saturating_mul(1000),
        }
    }

    /// Build from a milli value (millicores).
    pub const fn from_milli(millis: i64) -> Self {
        Quantity { millis }
    }

    /// Whole value, rounded away from zero.
    pub fn value(&self) -> i64 {
        if self.millis >= 0 {
            (self.millis + 999) / 1000
        } else {
            (self.millis - 999) / 1000
        }
    }

    pub fn milli_value(&self) -> i64 {
        self.millis
    }

    /// -1, 0, or 1.
    pub fn sign(&self) -> i32 {
        self.millis.signum() as i32
    }

    pub fn is_positive(&self) -> bool {
        self.millis > 0
    }

    pub fn saturating_add(self, other: Quantity) -> Quantity {
        Quantity {
            millis: self.millis.saturating_add(other.millis),
        }
    }

    pub fn saturating_sub(self, other: Quantity) -> Quantity {
        Quantity {
            millis: self.millis.saturating_sub(other.millis),
        }
    }

    pub fn max(self, other: Quantity) -> Quantity {
        if self.millis >= other.millis {
            self
        } else {
            other
        }
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, other: Quantity) -> Quantity {
        self.saturating_add(other)
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, other: Quantity) -> Quantity {
        self.saturating_sub(other)
    }
}

impl Neg for Quantity {
    type Output = Quantity;

    fn neg(self) -> Quantity {
        Quantity {
            millis: self.millis.saturating_neg(),
        }
    }
}

impl FromStr for Quantity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("empty quantity");
        }

        if let Some(digits) = s.strip_suffix('m') {
            let millis: i64 = digits
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid milli quantity {s:?}"))?;
            return Ok(Quantity { millis });
        }

        for (suffix, scale) in BINARY_SUFFIXES.iter().chain(DECIMAL_SUFFIXES) {
            if let Some(digits) = s.strip_suffix(suffix) {
                let value: i64 = digits
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid quantity {s:?}"))?;
                return Ok(Quantity::from_value(value.saturating_mul(*scale)));
            }
        }

        let value: i64 = s
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid quantity {s:?}"))?;
        Ok(Quantity::from_value(value))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis % 1000 != 0 {
            return write!(f, "{}m", self.millis);
        }
        let value = self.millis / 1000;
        if value != 0 {
            for (suffix, scale) in BINARY_SUFFIXES {
                if value % scale == 0 {
                    return write!(f, "{}{}", value / scale, suffix);
                }
            }
        }
        write!(f, "{}", value)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
