use super::{Profile, ProfileStore, ScanPage, StoreError, StoreKey};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// In-process store ordered by handle.
///
/// Pages are cut at `page_size` items; the continuation key is the last handle
/// returned and is only reported when more items remain.
pub struct InMemoryProfileStore {
    primary_key: String,
    page_size: usize,
    profiles: RwLock<BTreeMap<String, String>>,
}

impl InMemoryProfileStore {
    pub fn new(primary_key: impl Into<String>, page_size: usize) -> Self {
        Self {
            primary_key: primary_key.into(),
            page_size: page_size.max(1),
            profiles: RwLock::new(BTreeMap::new()),
        }
    }

    /// Store pre-populated with `profiles`.
    pub fn with_profiles(
        primary_key: impl Into<String>,
        page_size: usize,
        profiles: impl IntoIterator<Item = Profile>,
    ) -> Self {
        let map = profiles
            .into_iter()
            .map(|p| (p.handle, p.profile_image_url))
            .collect();
        Self {
            primary_key: primary_key.into(),
            page_size: page_size.max(1),
            profiles: RwLock::new(map),
        }
    }

    pub async fn len(&self) -> usize {
        self.profiles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.profiles.read().await.is_empty()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, handle: &str) -> Result<Option<Profile>, StoreError> {
        let profiles = self.profiles.read().await;
        Ok(profiles
            .get(handle)
            .map(|url| Profile::new(handle, url.clone())))
    }

    async fn put(&self, profile: &Profile) -> Result<(), StoreError> {
        self.profiles
            .write()
            .await
            .insert(profile.handle.clone(), profile.profile_image_url.clone());
        Ok(())
    }

    async fn scan(&self, start_after: Option<StoreKey>) -> Result<ScanPage, StoreError> {
        let lower = match &start_after {
            Some(key) => {
                let handle = key.get_str(&self.primary_key).ok_or_else(|| {
                    StoreError::Corrupt(format!(
                        "start key has no string attribute {}",
                        self.primary_key
                    ))
                })?;
                Bound::Excluded(handle.to_string())
            }
            None => Bound::Unbounded,
        };

        let profiles = self.profiles.read().await;
        let mut range = profiles.range((lower, Bound::Unbounded));

        let items: Vec<Profile> = range
            .by_ref()
            .take(self.page_size)
            .map(|(handle, url)| Profile::new(handle.clone(), url.clone()))
            .collect();

        let next_key = match (range.next(), items.last()) {
            (Some(_), Some(last)) => Some(StoreKey::string(&self.primary_key, &last.handle)),
            _ => None,
        };

        Ok(ScanPage { items, next_key })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(page_size: usize, count: usize) -> InMemoryProfileStore {
        InMemoryProfileStore::with_profiles(
            "user",
            page_size,
            (0..count).map(|i| Profile::new(format!("user_{i:02}"), format!("https://img/{i}.png"))),
        )
    }

    #[tokio::test]
    async fn test_get_present_and_absent() {
        let store = seeded(10, 3);

        let found = store.get("user_01").await.unwrap();
        assert_eq!(found, Some(Profile::new("user_01", "https://img/1.png")));
        assert_eq!(store.get("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = InMemoryProfileStore::new("user", 10);
        let profile = Profile::new("alice", "https://img/alice.png");

        store.put(&profile).await.unwrap();
        let once = store.scan(None).await.unwrap();
        store.put(&profile).await.unwrap();
        let twice = store.scan(None).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_scan_chains_through_every_item_once() {
        let store = seeded(3, 8);

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store.scan(cursor).await.unwrap();
            seen.extend(page.items.into_iter().map(|p| p.handle));
            match page.next_key {
                Some(key) => cursor = Some(key),
                None => break,
            }
        }

        let expected: Vec<String> = (0..8).map(|i| format!("user_{i:02}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_exact_page_boundary_reports_no_next_key() {
        let store = seeded(4, 4);
        let page = store.scan(None).await.unwrap();

        assert_eq!(page.items.len(), 4);
        assert!(page.next_key.is_none());
    }

    #[tokio::test]
    async fn test_scan_rejects_key_without_primary_attribute() {
        let store = seeded(4, 4);
        let result = store.scan(Some(StoreKey::string("other", "x"))).await;

        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }
}
