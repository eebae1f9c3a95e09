//! Kubernetes-style resource quantities (`"10Gi"`, `"500M"`, `"1.5Ti"`).
//!
//! A [`Quantity`] keeps the text it was parsed from, so objects serialize
//! back unchanged, and compares by value so `"1Gi"` equals `"1024Mi"`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ExpandError;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

const DECIMAL_SUFFIXES: [(&str, u32); 6] = [
    ("k", 1),
    ("M", 2),
    ("G", 3),
    ("T", 4),
    ("P", 5),
    ("E", 6),
];

/// A parsed resource quantity.
///
/// The value is held in thousandths of a unit so the `m` suffix is exact.
/// Fractions below one milli-unit round up, matching the API server.
#[derive(Debug, Clone)]
pub struct Quantity {
    text: String,
    milli: i128,
}

impl Quantity {
    /// Build a quantity from a byte count, choosing the largest binary
    /// suffix that represents it exactly.
    pub fn from_bytes(bytes: u64) -> Self {
        let mut text = bytes.to_string();
        for (suffix, power) in BINARY_SUFFIXES.iter().rev() {
            let unit = 1u64 << (10 * power);
            if bytes != 0 && bytes % unit == 0 {
                text = format!("{}{}", bytes / unit, suffix);
                break;
            }
        }
        Self {
            text,
            milli: i128::from(bytes) * 1000,
        }
    }

    /// Shorthand for `n` gibibytes.
    pub fn gibibytes(n: u64) -> Self {
        Self::from_bytes(n << 30)
    }

    /// Value in whole units, rounded up.
    pub fn value(&self) -> i128 {
        ceil_div(self.milli, 1000)
    }

    /// Value in thousandths of a unit.
    pub fn milli_value(&self) -> i128 {
        self.milli
    }

    /// Whether the quantity is zero.
    pub fn is_zero(&self) -> bool {
        self.milli == 0
    }

    /// The original text form.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self {
            text: "0".to_owned(),
            milli: 0,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.milli == other.milli
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.milli.cmp(&other.milli)
    }
}

impl FromStr for Quantity {
    type Err = ExpandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ExpandError::InvalidQuantity(s.to_owned());
        let text = s.trim();
        if text.is_empty() {
            return Err(invalid());
        }

        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
            .unwrap_or(text.len());
        let (number, suffix) = text.split_at(split);

        let (negative, digits) = match number.as_bytes().first() {
            Some(b'-') => (true, &number[1..]),
            Some(b'+') => (false, &number[1..]),
            _ => (false, number),
        };
        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        // mantissa = significand / 10^fraction_len
        let significand: i128 = format!("{whole}{fraction}")
            .trim_start_matches('0')
            .parse()
            .or_else(|e: std::num::ParseIntError| match e.kind() {
                std::num::IntErrorKind::Empty => Ok(0),
                _ => Err(invalid()),
            })?;
        let mut numerator = significand.checked_mul(1000).ok_or_else(invalid)?;
        let mut denominator = pow10(fraction.len() as u32).ok_or_else(invalid)?;

        match suffix {
            "" => {}
            "m" => denominator = denominator.checked_mul(1000).ok_or_else(invalid)?,
            _ => {
                if let Some((_, power)) = BINARY_SUFFIXES.iter().find(|(sfx, _)| *sfx == suffix) {
                    numerator = numerator
                        .checked_mul(1i128 << (10 * power))
                        .ok_or_else(invalid)?;
                } else if let Some((_, power)) =
                    DECIMAL_SUFFIXES.iter().find(|(sfx, _)| *sfx == suffix)
                {
                    numerator = numerator
                        .checked_mul(pow10(3 * power).ok_or_else(invalid)?)
                        .ok_or_else(invalid)?;
                } else if let Some(exp) = suffix
                    .strip_prefix(['e', 'E'])
                    .and_then(|e| e.parse::<i32>().ok())
                {
                    let scale = pow10(exp.unsigned_abs()).ok_or_else(invalid)?;
                    if exp >= 0 {
                        numerator = numerator.checked_mul(scale).ok_or_else(invalid)?;
                    } else {
                        denominator = denominator.checked_mul(scale).ok_or_else(invalid)?;
                    }
                } else {
                    return Err(invalid());
                }
            }
        }

        let magnitude = ceil_div(numerator, denominator);
        Ok(Self {
            text: text.to_owned(),
            milli: if negative { -magnitude } else { magnitude },
        })
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

fn ceil_div(n: i128, d: i128) -> i128 {
    let q = n / d;
    if n % d > 0 { q + 1 } else { q }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().expect("valid quantity")
    }

    #[test]
    fn parses_suffixes() {
        assert_eq!(q("1Ki").value(), 1024);
        assert_eq!(q("10Gi").value(), 10 * (1 << 30));
        assert_eq!(q("5G").value(), 5_000_000_000);
        assert_eq!(q("1.5Gi").value(), 3 * (1 << 29));
        assert_eq!(q("1e3").value(), 1000);
        assert_eq!(q("100m").milli_value(), 100);
        assert_eq!(q("42").value(), 42);
    }

    #[test]
    fn compares_by_value() {
        assert_eq!(q("1Gi"), q("1024Mi"));
        assert!(q("10Gi") > q("5Gi"));
        assert!(q("1G") < q("1Gi"));
        assert_eq!(q("1Gi").as_str(), "1Gi");
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "Gi", "10Qi", "1.2.3", "abc", "--1"] {
            assert!(bad.parse::<Quantity>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn from_bytes_picks_exact_suffix() {
        assert_eq!(Quantity::gibibytes(10).as_str(), "10Gi");
        assert_eq!(Quantity::from_bytes(1536).as_str(), "1536");
        assert_eq!(Quantity::from_bytes(3 << 20).as_str(), "3Mi");
        assert_eq!(Quantity::from_bytes(0).as_str(), "0");
    }

    #[test]
    fn serde_keeps_original_text() {
        let json = serde_json::to_string(&q("2Ti")).unwrap();
        assert_eq!(json, "\"2Ti\"");
        let back: Quantity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, q("2048Gi"));
        assert!(serde_json::from_str::<Quantity>("\"nope\"").is_err());
    }
}
