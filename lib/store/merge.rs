use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

use num_bigint::BigInt;
use thiserror::Error;

use super::{Store, UpdatePolicy, ValueType};
use crate::decimal::ScaledDecimal;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("incompatible update policies: policy {into} cannot merge policy {from}")]
    PolicyMismatch { into: UpdatePolicy, from: UpdatePolicy },
    #[error("incompatible value types: cannot merge {into} and {from}")]
    ValueTypeMismatch { into: ValueType, from: ValueType },
    #[error("update policy {policy} not supported for value type {value_type}")]
    UnsupportedCombination {
        policy: UpdatePolicy,
        value_type: ValueType,
    },
    #[error("store {store}: key {key:?} holds {value:?}, not a valid {value_type}")]
    InvalidValue {
        store: String,
        key: String,
        value_type: ValueType,
        value: String,
    },
}

impl MergeError {
    /// Configuration errors come from the module graph and are never worth retrying.
    pub fn is_configuration_error(&self) -> bool {
        !matches!(self, MergeError::InvalidValue { .. })
    }
}

impl Store {
    /// Folds `from` into `self` under the shared update policy.
    ///
    /// `from`'s deleted prefixes are applied to `self` before any of its keys, then recorded
    /// on `self`. Every resulting value is computed before `self` is touched: on error
    /// `self` is left exactly as it was.
    pub fn merge(&mut self, from: &Store) -> Result<(), MergeError> {
        if self.update_policy != from.update_policy {
            return Err(MergeError::PolicyMismatch {
                into: self.update_policy,
                from: from.update_policy,
            });
        }
        if self.value_type != from.value_type {
            return Err(MergeError::ValueTypeMismatch {
                into: self.value_type.clone(),
                from: from.value_type.clone(),
            });
        }

        let writes = self.staged_writes(from)?;

        for prefix in &from.deleted_prefixes {
            self.delete_prefix(prefix);
        }
        self.kv.extend(writes);
        Ok(())
    }

    fn staged_writes(&self, from: &Store) -> Result<BTreeMap<String, Vec<u8>>, MergeError> {
        let policy = self.update_policy;
        match (policy, &self.value_type) {
            (UpdatePolicy::Set, _) => Ok(from.kv.clone()),
            (UpdatePolicy::SetIfNotExists, _) => Ok(from
                .kv
                .iter()
                .filter(|(key, _)| self.surviving(key, from).is_none())
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()),
            (UpdatePolicy::Append, ValueType::String | ValueType::Bytes | ValueType::Proto(_)) => {
                Ok(from
                    .kv
                    .iter()
                    .map(|(key, value)| {
                        let mut joined = self.surviving(key, from).unwrap_or_default().to_vec();
                        joined.extend_from_slice(value);
                        (key.clone(), joined)
                    })
                    .collect())
            }
            (UpdatePolicy::Add | UpdatePolicy::Min | UpdatePolicy::Max, ValueType::Int64) => {
                self.reduce::<i64>(from)
            }
            (UpdatePolicy::Add | UpdatePolicy::Min | UpdatePolicy::Max, ValueType::Float64) => {
                self.reduce::<f64>(from)
            }
            (UpdatePolicy::Add | UpdatePolicy::Min | UpdatePolicy::Max, ValueType::BigInt) => {
                self.reduce::<BigInt>(from)
            }
            (UpdatePolicy::Add | UpdatePolicy::Min | UpdatePolicy::Max, ValueType::BigDecimal) => {
                self.reduce::<ScaledDecimal>(from)
            }
            (policy, value_type) => Err(MergeError::UnsupportedCombination {
                policy,
                value_type: value_type.clone(),
            }),
        }
    }

    /// Value of `key` in `self` once `from`'s tombstones have been applied.
    fn surviving<'a>(&'a self, key: &str, from: &Store) -> Option<&'a [u8]> {
        if from
            .deleted_prefixes
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
        {
            return None;
        }
        self.get(key)
    }

    fn reduce<T: Numeric>(&self, from: &Store) -> Result<BTreeMap<String, Vec<u8>>, MergeError> {
        let mut writes = BTreeMap::new();
        for (key, raw) in &from.kv {
            let incoming = self.decode::<T>(&from.name, key, raw)?;
            let merged = match self.surviving(key, from) {
                None if self.update_policy == UpdatePolicy::Add => incoming.encode(),
                // Min and Max adopt the incoming bytes untouched.
                None => raw.clone(),
                Some(existing) => {
                    let existing = self.decode::<T>(&self.name, key, existing)?;
                    let merged = match self.update_policy {
                        UpdatePolicy::Add => existing.sum(&incoming),
                        UpdatePolicy::Min if incoming.less_than(&existing) => incoming,
                        UpdatePolicy::Max if existing.less_than(&incoming) => incoming,
                        _ => existing,
                    };
                    merged.encode()
                }
            };
            writes.insert(key.clone(), merged);
        }
        Ok(writes)
    }

    fn decode<T: Numeric>(&self, store: &str, key: &str, raw: &[u8]) -> Result<T, MergeError> {
        std::str::from_utf8(raw)
            .ok()
            .and_then(T::decode)
            .ok_or_else(|| MergeError::InvalidValue {
                store: store.to_string(),
                key: key.to_string(),
                value_type: self.value_type.clone(),
                value: String::from_utf8_lossy(raw).into_owned(),
            })
    }
}

/// Numeric value kinds reducible by `add`, `min` and `max`.
trait Numeric: Sized {
    fn decode(text: &str) -> Option<Self>;
    fn encode(&self) -> Vec<u8>;
    fn sum(&self, other: &Self) -> Self;
    fn less_than(&self, other: &Self) -> bool;
}

impl Numeric for i64 {
    fn decode(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }

    fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Fixed-width: overflow wraps.
    fn sum(&self, other: &Self) -> Self {
        self.wrapping_add(*other)
    }

    fn less_than(&self, other: &Self) -> bool {
        self < other
    }
}

impl Numeric for f64 {
    fn decode(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }

    fn encode(&self) -> Vec<u8> {
        format_float_g(*self).into_bytes()
    }

    fn sum(&self, other: &Self) -> Self {
        self + other
    }

    fn less_than(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Less)
    }
}

/// `%g` rendering over the shortest round-trip digits: scientific notation with a signed,
/// two-digit exponent below `1e-4` or from `1e6` upwards, plain decimal otherwise.
fn format_float_g(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }

    let sign = if value.is_sign_negative() { "-" } else { "" };
    let scientific = format!("{:e}", value.abs());
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return format!("{sign}{scientific}");
    };
    let exponent: i64 = exponent.parse().unwrap_or_default();
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();

    if exponent < -4 || exponent >= 6 {
        let (first, rest) = digits.split_at(1);
        let fraction = if rest.is_empty() {
            String::new()
        } else {
            format!(".{rest}")
        };
        let exponent_sign = if exponent < 0 { '-' } else { '+' };
        return format!("{sign}{first}{fraction}e{exponent_sign}{:02}", exponent.abs());
    }

    // Between -3 and 6 here.
    let integer_len = exponent + 1;
    if integer_len <= 0 {
        let zeros = "0".repeat(integer_len.unsigned_abs() as usize);
        return format!("{sign}0.{zeros}{digits}");
    }
    let integer_len = integer_len as usize;
    if digits.len() <= integer_len {
        let zeros = "0".repeat(integer_len - digits.len());
        format!("{sign}{digits}{zeros}")
    } else {
        let (integer, fraction) = digits.split_at(integer_len);
        format!("{sign}{integer}.{fraction}")
    }
}

impl Numeric for BigInt {
    fn decode(text: &str) -> Option<Self> {
        BigInt::from_str(text.trim()).ok()
    }

    fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    fn sum(&self, other: &Self) -> Self {
        self + other
    }

    fn less_than(&self, other: &Self) -> bool {
        self < other
    }
}

impl Numeric for ScaledDecimal {
    fn decode(text: &str) -> Option<Self> {
        text.parse().ok()
    }

    fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    fn sum(&self, other: &Self) -> Self {
        self.add_rounded(other)
    }

    fn less_than(&self, other: &Self) -> bool {
        self < other
    }
}
