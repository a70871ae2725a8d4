// src/decimal.rs - Fixed-point decimal used for every user-facing quantity
//! Fixed-point decimal arithmetic.
//!
//! Temperatures, gains, duty values and durations are carried as a signed
//! 64-bit integer holding millionths. Setpoint comparisons and the PID
//! integral therefore never pick up binary floating-point drift: `150.5`
//! parsed from a config file compares equal to `150.5` computed from
//! `301 / 2`.
//!
//! Products and quotients go through an `i128` intermediate and are rounded
//! half away from zero back to six fractional digits.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseDecimalError {
    #[error("empty decimal string")]
    Empty,
    #[error("invalid digit in decimal string '{0}'")]
    InvalidDigit(String),
    #[error("decimal value out of range: '{0}'")]
    OutOfRange(String),
}

/// Signed fixed-point number with six fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Decimal(i64);

impl Decimal {
    /// Raw units per whole unit.
    pub const SCALE: i64 = 1_000_000;
    /// Number of fractional digits kept.
    pub const FRAC_DIGITS: u32 = 6;

    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(Self::SCALE);
    pub const HUNDRED: Self = Self(100 * Self::SCALE);

    /// Create from a whole number, saturating at the representable range.
    pub const fn from_int(n: i64) -> Self {
        Self(n.saturating_mul(Self::SCALE))
    }

    /// Create from raw millionths.
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw millionths.
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Create `mantissa × 10^-scale`.
    ///
    /// ```
    /// use mashtun_rs::decimal::Decimal;
    /// assert_eq!(Decimal::new(1505, 1).to_string(), "150.5");
    /// ```
    pub fn new(mantissa: i64, scale: u32) -> Self {
        Self::rescale(mantissa as i128, scale).unwrap_or(if mantissa < 0 {
            Self(i64::MIN)
        } else {
            Self(i64::MAX)
        })
    }

    /// Create from milliseconds, interpreting the result as seconds.
    pub const fn from_millis(ms: i64) -> Self {
        Self(ms.saturating_mul(1_000))
    }

    /// Convert a value in seconds to whole milliseconds (rounded).
    pub fn to_millis(self) -> i64 {
        div_round(self.0 as i128, 1_000) as i64
    }

    /// Convert from a float, rounding to six fractional digits.
    ///
    /// Returns `None` for NaN, infinities and values outside the range.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * Self::SCALE as f64).round();
        if scaled < i64::MIN as f64 || scaled > i64::MAX as f64 {
            return None;
        }
        Some(Self(scaled as i64))
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    pub fn checked_mul(self, other: Self) -> Option<Self> {
        let product = div_round(self.0 as i128 * other.0 as i128, Self::SCALE as i128);
        i64::try_from(product).ok().map(Self)
    }

    /// Divide, returning `None` on a zero divisor or overflow.
    pub fn checked_div(self, other: Self) -> Option<Self> {
        if other.0 == 0 {
            return None;
        }
        let quotient = div_round(self.0 as i128 * Self::SCALE as i128, other.0 as i128);
        i64::try_from(quotient).ok().map(Self)
    }

    pub fn saturating_mul(self, other: Self) -> Self {
        self.checked_mul(other).unwrap_or(
            if self.is_negative() != other.is_negative() {
                Self(i64::MIN)
            } else {
                Self(i64::MAX)
            },
        )
    }

    /// Round to `dp` fractional digits (half away from zero).
    pub fn round_dp(self, dp: u32) -> Self {
        if dp >= Self::FRAC_DIGITS {
            return self;
        }
        let unit = 10_i128.pow(Self::FRAC_DIGITS - dp);
        Self((div_round(self.0 as i128, unit) * unit) as i64)
    }

    fn rescale(mantissa: i128, scale: u32) -> Option<Self> {
        let raw = if scale <= Self::FRAC_DIGITS {
            mantissa.checked_mul(10_i128.checked_pow(Self::FRAC_DIGITS - scale)?)?
        } else {
            div_round(mantissa, 10_i128.checked_pow(scale - Self::FRAC_DIGITS)?)
        };
        i64::try_from(raw).ok().map(Self)
    }
}

fn div_round(n: i128, d: i128) -> i128 {
    let q = n / d;
    let r = n % d;
    if 2 * r.abs() >= d.abs() {
        if (n < 0) == (d < 0) { q + 1 } else { q - 1 }
    } else {
        q
    }
}

impl Add for Decimal {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Decimal {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Decimal {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Decimal {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul for Decimal {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        self.saturating_mul(rhs)
    }
}

impl Neg for Decimal {
    type Output = Self;
    fn neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

impl From<i32> for Decimal {
    fn from(n: i32) -> Self {
        Self::from_int(n as i64)
    }
}

impl FromStr for Decimal {
    type Err = ParseDecimalError;

    /// Accepts `.` or `,` as the decimal separator, an optional sign and
    /// surrounding whitespace. Digits beyond the sixth fractional place are
    /// rounded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseDecimalError::Empty);
        }
        let (negative, body) = match trimmed.as_bytes()[0] {
            b'-' => (true, &trimmed[1..]),
            b'+' => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        let body = body.replace(',', ".");
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body.as_str(), ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(ParseDecimalError::InvalidDigit(s.to_string()));
        }
        let mut mantissa: i128 = 0;
        for c in int_part.chars().chain(frac_part.chars()) {
            let digit = c
                .to_digit(10)
                .ok_or_else(|| ParseDecimalError::InvalidDigit(s.to_string()))?;
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(digit as i128))
                .ok_or_else(|| ParseDecimalError::OutOfRange(s.to_string()))?;
        }
        if negative {
            mantissa = -mantissa;
        }
        Self::rescale(mantissa, frac_part.len() as u32)
            .ok_or_else(|| ParseDecimalError::OutOfRange(s.to_string()))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = (self.0 as i128).abs();
        let whole = abs / Self::SCALE as i128;
        let frac = abs % Self::SCALE as i128;
        if frac == 0 {
            return write!(f, "{}{}", sign, whole);
        }
        let digits = format!("{:06}", frac);
        write!(f, "{}{}.{}", sign, whole, digits.trim_end_matches('0'))
    }
}

/// Written as a plain number when the float reads back to the same value,
/// otherwise as the exact decimal string.
impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let float = self.to_f64();
        if Decimal::from_f64(float) == Some(*self) {
            serializer.serialize_f64(float)
        } else {
            serializer.collect_str(self)
        }
    }
}

struct DecimalVisitor;

impl<'de> Visitor<'de> for DecimalVisitor {
    type Value = Decimal;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number or a decimal string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Decimal, E> {
        v.checked_mul(Decimal::SCALE)
            .map(Decimal)
            .ok_or_else(|| E::custom(format!("decimal value out of range: {}", v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Decimal, E> {
        i64::try_from(v)
            .map_err(|_| E::custom(format!("decimal value out of range: {}", v)))
            .and_then(|v| self.visit_i64(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Decimal, E> {
        Decimal::from_f64(v).ok_or_else(|| E::custom(format!("invalid decimal value: {}", v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Decimal, E> {
        v.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DecimalVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(d("150.5").to_string(), "150.5");
        assert_eq!(d("168").to_string(), "168");
        assert_eq!(d("-0.25").to_string(), "-0.25");
        assert_eq!(d("2,5"), d("2.5"));
        assert_eq!(d(" +3.0 "), Decimal::from_int(3));
        assert_eq!(d(".5"), Decimal::new(5, 1));
    }

    #[test]
    fn test_parse_rounds_extra_digits() {
        assert_eq!(d("0.0000004"), Decimal::ZERO);
        assert_eq!(d("0.0000005"), Decimal::from_raw(1));
        assert_eq!(d("-0.0000005"), Decimal::from_raw(-1));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Decimal>(), Err(ParseDecimalError::Empty));
        assert!(matches!("abc".parse::<Decimal>(), Err(ParseDecimalError::InvalidDigit(_))));
        assert!(matches!("1.2.3".parse::<Decimal>(), Err(ParseDecimalError::InvalidDigit(_))));
        assert!(matches!(".".parse::<Decimal>(), Err(ParseDecimalError::InvalidDigit(_))));
        assert!(matches!(
            "99999999999999999999".parse::<Decimal>(),
            Err(ParseDecimalError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_arithmetic_is_exact() {
        assert_eq!(d("0.1") + d("0.2"), d("0.3"));
        assert_eq!(d("1.8") * d("75"), d("135"));
        assert_eq!(d("301").checked_div(d("2")), Some(d("150.5")));
        assert_eq!(d("1").checked_div(Decimal::ZERO), None);
        assert_eq!(d("2") - d("5"), d("-3"));
        assert_eq!(-d("4.5"), d("-4.5"));
    }

    #[test]
    fn test_division_rounds_half_away_from_zero() {
        assert_eq!(d("2").checked_div(d("3")), Some(d("0.666667")));
        assert_eq!(d("-2").checked_div(d("3")), Some(d("-0.666667")));
        assert_eq!(d("1.23456789").round_dp(2), d("1.23"));
        assert_eq!(d("1.235").round_dp(2), d("1.24"));
    }

    #[test]
    fn test_millis_conversion() {
        assert_eq!(d("2.5").to_millis(), 2500);
        assert_eq!(Decimal::from_millis(1500), d("1.5"));
    }

    #[test]
    fn test_serde_accepts_numbers_and_strings() {
        #[derive(Deserialize, Serialize)]
        struct Wrap {
            v: Decimal,
        }
        let w: Wrap = serde_json::from_str(r#"{"v": 152.25}"#).unwrap();
        assert_eq!(w.v, d("152.25"));
        let w: Wrap = serde_json::from_str(r#"{"v": 7}"#).unwrap();
        assert_eq!(w.v, d("7"));
        let w: Wrap = serde_json::from_str(r#"{"v": "0,5"}"#).unwrap();
        assert_eq!(w.v, d("0.5"));
        let json = serde_json::to_string(&Wrap { v: d("0.123456") }).unwrap();
        let back: Wrap = serde_json::from_str(&json).unwrap();
        assert_eq!(back.v, d("0.123456"));
    }

    #[test]
    fn test_serialize_is_exact_beyond_f64_precision() {
        let big = Decimal::from_raw(1_234_567_890_123_456_789);
        let json = serde_json::to_string(&big).unwrap();
        assert_eq!(json, r#""1234567890123.456789""#);
        let back: Decimal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, big);

        // Values a float carries exactly stay plain numbers.
        assert_eq!(serde_json::to_string(&d("150.5")).unwrap(), "150.5");
    }
}
