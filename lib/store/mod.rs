//! Keyed value accumulators produced by store-kind modules.
//!
//! A [`Store`] holds raw bytes per key together with its declared [`ValueType`] and
//! [`UpdatePolicy`]. Stores only interact through [`Store::merge`], which folds a later
//! store (a partial snapshot) into an earlier one (a complete snapshot, or another partial).

mod merge;
mod types;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use merge::MergeError;
pub use types::{StoreTypeError, UpdatePolicy, ValueType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    name: String,
    value_type: ValueType,
    update_policy: UpdatePolicy,
    kv: BTreeMap<String, Vec<u8>>,
    deleted_prefixes: Vec<String>,
}

/// Serialized body of a `.kv` or `.partial` snapshot file.
#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    value_type: ValueType,
    update_policy: UpdatePolicy,
    kv: BTreeMap<String, Vec<u8>>,
    #[serde(default)]
    deleted_prefixes: Vec<String>,
}

impl Store {
    pub fn new(name: impl Into<String>, value_type: ValueType, update_policy: UpdatePolicy) -> Self {
        Self {
            name: name.into(),
            value_type,
            update_policy,
            kv: BTreeMap::new(),
            deleted_prefixes: Vec::new(),
        }
    }

    /// Rebuilds a store from one job's keyed mutation set.
    pub fn from_mutations(
        name: impl Into<String>,
        value_type: ValueType,
        update_policy: UpdatePolicy,
        kv: BTreeMap<String, Vec<u8>>,
        deleted_prefixes: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value_type,
            update_policy,
            kv,
            deleted_prefixes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        self.update_policy
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.kv.get(key).map(Vec::as_slice)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.kv.insert(key.into(), value.into());
    }

    /// Removes every key starting with `prefix` and records the tombstone so that a later
    /// merge propagates the deletion.
    pub fn delete_prefix(&mut self, prefix: &str) {
        self.kv.retain(|key, _| !key.starts_with(prefix));
        if !self.deleted_prefixes.iter().any(|known| known == prefix) {
            self.deleted_prefixes.push(prefix.to_string());
        }
    }

    pub fn kv(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.kv
    }

    pub fn deleted_prefixes(&self) -> &[String] {
        &self.deleted_prefixes
    }

    pub fn len(&self) -> usize {
        self.kv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kv.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&StoreSnapshot {
            value_type: self.value_type.clone(),
            update_policy: self.update_policy,
            kv: self.kv.clone(),
            deleted_prefixes: self.deleted_prefixes.clone(),
        })
    }

    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let snapshot: StoreSnapshot = serde_json::from_slice(bytes)?;
        Ok(Self {
            name: name.into(),
            value_type: snapshot.value_type,
            update_policy: snapshot.update_policy,
            kv: snapshot.kv,
            deleted_prefixes: snapshot.deleted_prefixes,
        })
    }
}
