//! Store adapter: typed access to the key-value store holding profiles.
//!
//! Every read and write of profile records goes through [`ProfileStore`].
//! Implementations own the mapping between [`Profile`] and the backend's item
//! representation and report backend failures as [`StoreError`].

pub mod dynamo;
pub mod memory;

pub use dynamo::DynamoProfileStore;
pub use memory::InMemoryProfileStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Attribute holding the profile image URL on stored items.
pub const PROFILE_IMAGE_URL_ATTRIBUTE: &str = "profileImageUrl";

/// Errors surfaced by the store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt item in store: {0}")]
    Corrupt(String),
}

/// A handle mapped to its profile image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Public username, primary key of the record
    pub handle: String,
    /// Absolute URL of the profile image
    pub profile_image_url: String,
}

impl Profile {
    pub fn new(handle: impl Into<String>, profile_image_url: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            profile_image_url: profile_image_url.into(),
        }
    }
}

/// Typed value of a single key attribute.
///
/// Serialized in the store's own tagged form, e.g. `{"S": "alice"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAttribute {
    S(String),
    N(String),
    B(Vec<u8>),
}

/// Position in the store's iteration order, as reported by a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreKey(BTreeMap<String, KeyAttribute>);

impl StoreKey {
    /// Key with a single string attribute.
    pub fn string(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(attribute.into(), KeyAttribute::S(value.into()));
        Self(attributes)
    }

    pub fn insert(&mut self, attribute: impl Into<String>, value: KeyAttribute) {
        self.0.insert(attribute.into(), value);
    }

    pub fn get(&self, attribute: &str) -> Option<&KeyAttribute> {
        self.0.get(attribute)
    }

    /// String value of `attribute`, if present and string-typed.
    pub fn get_str(&self, attribute: &str) -> Option<&str> {
        match self.0.get(attribute) {
            Some(KeyAttribute::S(value)) => Some(value),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &KeyAttribute)> {
        self.0.iter()
    }
}

impl FromIterator<(String, KeyAttribute)> for StoreKey {
    fn from_iter<I: IntoIterator<Item = (String, KeyAttribute)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One page of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Profiles in store iteration order
    pub items: Vec<Profile>,
    /// Key to resume after, `None` once the store reports no further data
    pub next_key: Option<StoreKey>,
}

/// Get/put/scan contract over the profile table.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the profile for `handle`. Absence is `Ok(None)`, not an error.
    async fn get(&self, handle: &str) -> Result<Option<Profile>, StoreError>;

    /// Unconditional upsert of the full record.
    async fn put(&self, profile: &Profile) -> Result<(), StoreError>;

    /// Read one page, starting from the beginning or after `start_after`.
    async fn scan(&self, start_after: Option<StoreKey>) -> Result<ScanPage, StoreError>;

    /// Cheap reachability check used by readiness.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_serializes_camel_case() {
        let profile = Profile::new("alice", "https://img/alice.png");
        let json = serde_json::to_value(&profile).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"handle": "alice", "profileImageUrl": "https://img/alice.png"})
        );
    }

    #[test]
    fn test_store_key_tagged_form() {
        let key = StoreKey::string("user", "alice");
        let json = serde_json::to_value(&key).unwrap();

        assert_eq!(json, serde_json::json!({"user": {"S": "alice"}}));
        assert_eq!(key.get_str("user"), Some("alice"));
        assert_eq!(key.get_str("other"), None);
    }

    #[test]
    fn test_get_str_ignores_non_string_attributes() {
        let mut key = StoreKey::default();
        key.insert("user", KeyAttribute::N("42".to_string()));

        assert_eq!(key.len(), 1);
        assert_eq!(key.get_str("user"), None);
    }
}
