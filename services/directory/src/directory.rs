//! Directory queries: paginated listing and lookup by handle.

use crate::cursor::{Cursor, CursorError};
use crate::error::DirectoryError;
use crate::handle::HandleValidator;
use crate::store::{Profile, ProfileStore, StoreError, StoreKey};
use std::sync::Arc;
use tracing::{debug, instrument};

/// One page of the directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileListing {
    pub profiles: Vec<Profile>,
    /// Cursor for the next page, `None` when the listing is complete
    pub next_cursor: Option<Cursor>,
}

/// Read side of the directory.
pub struct DirectoryService {
    store: Arc<dyn ProfileStore>,
    validator: Arc<HandleValidator>,
    primary_key: String,
}

impl DirectoryService {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        validator: Arc<HandleValidator>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            validator,
            primary_key: primary_key.into(),
        }
    }

    /// List one page of profiles, starting after `cursor` if given.
    #[instrument(skip(self, cursor), fields(resumed = cursor.is_some()))]
    pub async fn list_profiles(
        &self,
        cursor: Option<&Cursor>,
    ) -> Result<ProfileListing, DirectoryError> {
        let start_after = cursor.map(|c| self.decode_cursor(c)).transpose()?;

        let page = self.store.scan(start_after).await?;

        let next_cursor = page
            .next_key
            .as_ref()
            .map(Cursor::encode)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("unencodable continuation key: {e}")))?;

        metrics::counter!("directory.profiles.listed").increment(page.items.len() as u64);
        debug!(
            count = page.items.len(),
            has_more = next_cursor.is_some(),
            "Listed profiles"
        );

        Ok(ProfileListing {
            profiles: page.items,
            next_cursor,
        })
    }

    /// Look up the profile for `handle`. Invalid handles never reach the store.
    #[instrument(skip(self))]
    pub async fn get_profile(&self, handle: &str) -> Result<Profile, DirectoryError> {
        if !self.validator.is_valid(handle) {
            return Err(DirectoryError::InvalidHandle);
        }

        metrics::counter!("directory.lookups").increment(1);

        self.store
            .get(handle)
            .await?
            .ok_or_else(|| DirectoryError::ProfileNotFound(handle.to_string()))
    }

    /// A cursor must address exactly this table's primary key.
    fn decode_cursor(&self, cursor: &Cursor) -> Result<StoreKey, CursorError> {
        let key = cursor.decode()?;
        if key.len() != 1 || key.get_str(&self.primary_key).is_none() {
            return Err(CursorError::Shape(format!(
                "expected a string key on {}",
                self.primary_key
            )));
        }
        Ok(key)
    }
}
