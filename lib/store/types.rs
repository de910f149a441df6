use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreTypeError {
    #[error("unknown store value type {0:?}")]
    UnknownValueType(String),
    #[error("unknown store update policy {0:?}")]
    UnknownUpdatePolicy(String),
}

/// Declared encoding of every value held by a store.
///
/// Numeric types are stored as their decimal string rendering; `string`, `bytes` and
/// `proto:<message>` values are opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueType {
    Int64,
    Float64,
    BigInt,
    BigDecimal,
    String,
    Bytes,
    Proto(String),
}

impl ValueType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueType::Int64 | ValueType::Float64 | ValueType::BigInt | ValueType::BigDecimal
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Int64 => f.write_str("int64"),
            ValueType::Float64 => f.write_str("float64"),
            ValueType::BigInt => f.write_str("bigint"),
            ValueType::BigDecimal => f.write_str("bigdecimal"),
            ValueType::String => f.write_str("string"),
            ValueType::Bytes => f.write_str("bytes"),
            ValueType::Proto(message) => write!(f, "proto:{message}"),
        }
    }
}

impl FromStr for ValueType {
    type Err = StoreTypeError;

    /// Accepts manifest spellings case-insensitively; `bigfloat` is the legacy name of
    /// `bigdecimal`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        match lower.as_str() {
            "int64" => Ok(ValueType::Int64),
            "float64" => Ok(ValueType::Float64),
            "bigint" => Ok(ValueType::BigInt),
            "bigdecimal" | "bigfloat" => Ok(ValueType::BigDecimal),
            "string" => Ok(ValueType::String),
            "bytes" => Ok(ValueType::Bytes),
            _ => match trimmed.split_once(':') {
                Some((kind, message))
                    if kind.eq_ignore_ascii_case("proto") && !message.is_empty() =>
                {
                    Ok(ValueType::Proto(message.to_string()))
                }
                _ => Err(StoreTypeError::UnknownValueType(s.to_string())),
            },
        }
    }
}

impl TryFrom<String> for ValueType {
    type Error = StoreTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ValueType> for String {
    fn from(value: ValueType) -> Self {
        value.to_string()
    }
}

/// How writes to the same key combine across blocks and across merged stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum UpdatePolicy {
    Set,
    SetIfNotExists,
    Add,
    Min,
    Max,
    Append,
}

impl UpdatePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdatePolicy::Set => "set",
            UpdatePolicy::SetIfNotExists => "set_if_not_exists",
            UpdatePolicy::Add => "add",
            UpdatePolicy::Min => "min",
            UpdatePolicy::Max => "max",
            UpdatePolicy::Append => "append",
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdatePolicy {
    type Err = StoreTypeError;

    /// Accepts `set_if_not_exists` as well as the `UPDATE_POLICY_SET_IF_NOT_EXISTS` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let name = lower.strip_prefix("update_policy_").unwrap_or(&lower);
        match name {
            "set" => Ok(UpdatePolicy::Set),
            "set_if_not_exists" => Ok(UpdatePolicy::SetIfNotExists),
            "add" => Ok(UpdatePolicy::Add),
            "min" => Ok(UpdatePolicy::Min),
            "max" => Ok(UpdatePolicy::Max),
            "append" => Ok(UpdatePolicy::Append),
            _ => Err(StoreTypeError::UnknownUpdatePolicy(s.to_string())),
        }
    }
}

impl TryFrom<String> for UpdatePolicy {
    type Error = StoreTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UpdatePolicy> for String {
    fn from(value: UpdatePolicy) -> Self {
        value.as_str().to_string()
    }
}
