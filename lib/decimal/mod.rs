//! Arbitrary-precision scaled decimal used by the `bigdecimal` store value type.
//!
//! A value is `int × 10^(−scale)`. Every constructed or computed value is normalized to at
//! most [`MAX_SIGNIFICANT_DIGITS`] significant digits with trailing zeros folded into the
//! scale, so equal values share one representation and one canonical string.
//!
//! Rounding on truncation is half-up in magnitude for positive mantissas. Negative
//! mantissas are truncated toward zero, and their digit count is estimated from the bit
//! length without the upward correction applied to positive values, so a negative value
//! may keep one digit more than its positive counterpart. Snapshots written by earlier
//! releases depend on that representation; keep it unless cached data is migrated.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, Zero};
use thiserror::Error;

/// Significant digits kept after normalization.
pub const MAX_SIGNIFICANT_DIGITS: u64 = 34;

/// Significant digits kept for the intermediate result of an addition.
pub const ADD_PRECISION_DIGITS: u64 = 100;

/// Largest absolute scale accepted from parsed input.
const MAX_ABS_SCALE: i64 = i32::MAX as i64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecimalError {
    #[error("invalid decimal literal {0:?}")]
    Parse(String),
    #[error("decimal literal {0:?} has an exponent outside the supported range")]
    ScaleOutOfRange(String),
}

/// Normalized arbitrary-precision decimal.
#[derive(Debug, Clone)]
pub struct ScaledDecimal {
    int: BigInt,
    scale: i64,
}

impl ScaledDecimal {
    /// Builds `int × 10^(−scale)` and normalizes it.
    pub fn new(int: BigInt, scale: i64) -> Self {
        let (int, scale) = normalize(int, scale);
        Self { int, scale }
    }

    pub fn zero() -> Self {
        Self {
            int: BigInt::zero(),
            scale: 0,
        }
    }

    /// Mantissa of the normalized representation.
    pub fn int(&self) -> &BigInt {
        &self.int
    }

    /// Power-of-ten scale of the normalized representation.
    pub fn scale(&self) -> i64 {
        self.scale
    }

    pub fn is_zero(&self) -> bool {
        self.int.is_zero()
    }

    /// Exact sum rounded to [`ADD_PRECISION_DIGITS`], then normalized.
    pub fn add_rounded(&self, other: &ScaledDecimal) -> ScaledDecimal {
        let scale = self.scale.max(other.scale);
        let sum = rescale(&self.int, self.scale, scale) + rescale(&other.int, other.scale, scale);
        if sum.is_zero() {
            return ScaledDecimal::zero();
        }
        let (int, scale) = round_to_precision(sum, scale, ADD_PRECISION_DIGITS);
        ScaledDecimal::new(int, scale)
    }
}

impl Default for ScaledDecimal {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<i64> for ScaledDecimal {
    fn from(value: i64) -> Self {
        ScaledDecimal::new(BigInt::from(value), 0)
    }
}

impl Add for &ScaledDecimal {
    type Output = ScaledDecimal;

    fn add(self, rhs: &ScaledDecimal) -> ScaledDecimal {
        self.add_rounded(rhs)
    }
}

impl Ord for ScaledDecimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let scale = self.scale.max(other.scale);
        rescale(&self.int, self.scale, scale).cmp(&rescale(&other.int, other.scale, scale))
    }
}

impl PartialOrd for ScaledDecimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScaledDecimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScaledDecimal {}

impl FromStr for ScaledDecimal {
    type Err = DecimalError;

    /// Accepts `[+-]digits[.digits][(e|E)[+-]digits]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let parse_err = || DecimalError::Parse(s.to_string());

        let (mantissa, exponent) = match input.find(|c: char| c == 'e' || c == 'E') {
            Some(idx) => {
                let exponent = input[idx + 1..].parse::<i64>().map_err(|_| parse_err())?;
                (&input[..idx], exponent)
            }
            None => (input, 0),
        };

        let (negative, unsigned) = match mantissa.as_bytes().first() {
            Some(b'-') => (true, &mantissa[1..]),
            Some(b'+') => (false, &mantissa[1..]),
            _ => (false, mantissa),
        };
        let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(parse_err());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(parse_err());
        }

        let digits = format!("{int_part}{frac_part}");
        let magnitude = BigInt::parse_bytes(digits.as_bytes(), 10).ok_or_else(parse_err)?;
        let int = if negative { -magnitude } else { magnitude };

        let frac_len = i64::try_from(frac_part.len())
            .map_err(|_| DecimalError::ScaleOutOfRange(s.to_string()))?;
        let scale = frac_len
            .checked_sub(exponent)
            .filter(|scale| scale.abs() <= MAX_ABS_SCALE)
            .ok_or_else(|| DecimalError::ScaleOutOfRange(s.to_string()))?;

        Ok(ScaledDecimal::new(int, scale))
    }
}

/// Shortest plain decimal rendering: no exponent, no trailing fractional zeros.
impl fmt::Display for ScaledDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.int.is_zero() {
            return f.write_str("0");
        }
        if self.int.is_negative() {
            f.write_str("-")?;
        }

        let digits = self.int.magnitude().to_string();
        if self.scale <= 0 {
            f.write_str(&digits)?;
            for _ in 0..self.scale.unsigned_abs() {
                f.write_str("0")?;
            }
            return Ok(());
        }

        let scale = usize::try_from(self.scale).map_err(|_| fmt::Error)?;
        let (int_part, frac_part) = if digits.len() > scale {
            let (int_part, frac_part) = digits.split_at(digits.len() - scale);
            (int_part.to_string(), frac_part.to_string())
        } else {
            ("0".to_string(), format!("{}{digits}", "0".repeat(scale - digits.len())))
        };

        let frac_part = frac_part.trim_end_matches('0');
        if frac_part.is_empty() {
            f.write_str(&int_part)
        } else {
            write!(f, "{int_part}.{frac_part}")
        }
    }
}

fn pow10(exp: u64) -> BigInt {
    BigInt::from(10u8).pow(u32::try_from(exp).unwrap_or(u32::MAX))
}

/// Re-expresses `int × 10^(−from)` with the larger scale `to`.
fn rescale(int: &BigInt, from: i64, to: i64) -> BigInt {
    if to <= from {
        return int.clone();
    }
    int * pow10(to.abs_diff(from))
}

/// Decimal digit count of `int` as estimated from its bit length.
///
/// Positive values get the exact count. Negative values skip the correction step and may
/// be under-counted by one.
fn estimated_digits(int: &BigInt) -> u64 {
    let digits = (int.bits() as f64 / std::f64::consts::LOG2_10) as u64;
    if digits == 0 {
        1
    } else if int.sign() == Sign::Plus && pow10(digits) <= *int {
        digits + 1
    } else {
        digits
    }
}

/// Drops digits beyond `precision`, rounding the magnitude up when the discarded part is
/// at least half a unit and the value is positive.
fn round_to_precision(int: BigInt, scale: i64, precision: u64) -> (BigInt, i64) {
    let digits = estimated_digits(&int);
    if digits <= precision {
        return (int, scale);
    }

    let dropped = digits - precision;
    let divisor = pow10(dropped);
    let mut quotient = &int / &divisor;
    let remainder = &int % &divisor;
    if remainder.is_positive() && remainder * 2u8 >= divisor {
        quotient += 1u8;
    }
    (quotient, scale.saturating_sub_unsigned(dropped))
}

fn normalize(int: BigInt, scale: i64) -> (BigInt, i64) {
    if int.is_zero() {
        return (BigInt::zero(), 0);
    }

    let (mut int, mut scale) = round_to_precision(int, scale, MAX_SIGNIFICANT_DIGITS);
    let ten = BigInt::from(10u8);
    while (&int % &ten).is_zero() {
        int /= &ten;
        scale -= 1;
    }
    (int, scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: &str) -> ScaledDecimal {
        value.parse().expect("fixture decimal should parse")
    }

    fn big(value: &str) -> BigInt {
        BigInt::parse_bytes(value.as_bytes(), 10).expect("fixture bigint should parse")
    }

    #[test]
    fn parse_normalizes_int_and_scale() {
        let cases = [
            ("0.1", "1", 1),
            ("-0.1", "-1", 1),
            ("198.98765544", "19898765544", 8),
            ("0.00000093937698", "93937698", 14),
            ("98765587998098786876.0", "98765587998098786876", 0),
            ("98765000000", "98765", -6),
            ("-98765000000", "-98765", -6),
            ("98765000000.1", "987650000001", 1),
            ("-98765000000.2", "-987650000002", 1),
            ("0.00000000000000000000000000000000", "0", 0),
            ("0.10000000000000000000000000000000", "1", 1),
            ("10000000000000000000000000000000000000000", "1", -40),
            ("100000000000000000000000000000000000000001", "1", -41),
        ];
        for (input, int, scale) in cases {
            let parsed = dec(input);
            assert_eq!(parsed.int(), &big(int), "mantissa for {input}");
            assert_eq!(parsed.scale(), scale, "scale for {input}");
        }
    }

    #[test]
    fn positive_values_round_half_up_at_34_digits() {
        let cases = [
            ("0.1234567890123456789012345678901234", "1234567890123456789012345678901234", 34),
            ("0.12345678901234567890123456789012344", "1234567890123456789012345678901234", 34),
            ("0.12345678901234567890123456789012345", "1234567890123456789012345678901235", 34),
            ("0.12345678901234567890123456789012346", "1234567890123456789012345678901235", 34),
            ("12.123456789012345678901234567890124", "1212345678901234567890123456789012", 32),
            ("12.123456789012345678901234567890125", "1212345678901234567890123456789013", 32),
            ("1234567890123.123456789012345678901834567890124", "1234567890123123456789012345678902", 21),
            ("12345678901234567890123456789012345", "1234567890123456789012345678901235", -1),
            ("19999999999999999999999999999999994", "1999999999999999999999999999999999", -1),
            ("19999999999999999999999999999999995", "2", -34),
            ("199999999999999999999999999999999999999999", "2", -41),
            ("155555555555555555555555555555555555", "1555555555555555555555555555555556", -2),
            ("144444444444444444444444444444444444", "1444444444444444444444444444444444", -2),
        ];
        for (input, int, scale) in cases {
            let parsed = dec(input);
            assert_eq!(parsed.int(), &big(int), "mantissa for {input}");
            assert_eq!(parsed.scale(), scale, "scale for {input}");
        }
    }

    #[test]
    fn negative_values_truncate_and_may_keep_an_extra_digit() {
        let cases = [
            ("-0.1234567890123456789012345678901234", "-1234567890123456789012345678901234", 34),
            ("-0.12345678901234567890123456789012345", "-12345678901234567890123456789012345", 35),
            ("-0.123456789012345678901234567890123426", "-12345678901234567890123456789012342", 35),
            ("-12.1234567890123456789012345678901236", "-12123456789012345678901234567890123", 33),
            ("-1234567890123.123456789012345678901894567890124", "-12345678901231234567890123456789018", 22),
            ("-12345678901234567890123456789012345", "-12345678901234567890123456789012345", 0),
            ("-123456789012345678901234567890123456", "-12345678901234567890123456789012345", -1),
        ];
        for (input, int, scale) in cases {
            let parsed = dec(input);
            assert_eq!(parsed.int(), &big(int), "mantissa for {input}");
            assert_eq!(parsed.scale(), scale, "scale for {input}");
        }
    }

    #[test]
    fn parse_accepts_exponents_and_rejects_garbage() {
        let big_exp = dec("1234e6");
        assert_eq!((big_exp.int(), big_exp.scale()), (&big("1234"), -6));
        let small_exp = dec("1234E-6");
        assert_eq!((small_exp.int(), small_exp.scale()), (&big("1234"), 6));
        assert_eq!(dec("+.5").to_string(), "0.5");

        for bad in ["", "-", ".", "1.2.3", "12a", "1e", "e5", "1e99999999999"] {
            assert!(bad.parse::<ScaledDecimal>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn cmp_orders_across_scales() {
        let cases = [
            ("0", "0", Ordering::Equal),
            ("12.34", "1.234", Ordering::Greater),
            ("1.234", "12.34", Ordering::Less),
            ("12.34", "-1.234", Ordering::Greater),
            ("-1.23", "-1.23", Ordering::Equal),
            ("-1.23", "-4.23", Ordering::Greater),
            ("1234e6", "1234e-6", Ordering::Greater),
            ("1234e-6", "1234e6", Ordering::Less),
        ];
        for (left, right, want) in cases {
            assert_eq!(dec(left).cmp(&dec(right)), want, "{left} vs {right}");
        }
    }

    #[test]
    fn add_is_exact_within_precision() {
        let cases = [
            ("0", "0", "0"),
            ("0.000000000000000000000000000000000000000", "0.000000000000000000000000000000000000000", "0"),
            ("12.34", "1.234", "13.574"),
            ("12.34", "-1.234", "11.106"),
            ("-1.234", "12.34", "11.106"),
            ("1.23", "1.23", "2.46"),
            ("1234e6", "1234e-6", "1234000000.001234"),
            ("1234e-6", "1234e6", "1234000000.001234"),
            ("18446744073709551616.0", "1", "18446744073709551617"),
            ("184467440737e6", "0", "184467440737000000"),
        ];
        for (left, right, want) in cases {
            assert_eq!((&dec(left) + &dec(right)).to_string(), want, "{left} + {right}");
        }
    }

    #[test]
    fn display_is_canonical_and_round_trips() {
        let cases = [
            ("1", 1, 0),
            ("0.1", 1, 1),
            ("0.01", 1, 2),
            ("100", 1, -2),
            ("-1", -1, 0),
            ("-0.1", -1, 1),
            ("-0.01", -1, 2),
            ("13.574", 13574, 3),
            ("132.4", 132400000, 6),
            ("0", 0, 9),
        ];
        for (want, int, scale) in cases {
            let value = ScaledDecimal::new(BigInt::from(int), scale);
            assert_eq!(value.to_string(), want);
            assert_eq!(dec(want).to_string(), want, "round trip of {want}");
            assert_eq!(dec(want), value);
        }
    }
}
