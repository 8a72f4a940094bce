//! Scrape-and-ingest pipeline.
//!
//! validate handle -> open render session -> snapshot -> release session ->
//! extract image -> upsert profile. Each step is a hard stop on failure and
//! nothing is retried.

use crate::error::DirectoryError;
use crate::extractor::extract_profile_image;
use crate::handle::HandleValidator;
use crate::renderer::{PageRenderer, SessionGuard};
use crate::store::{Profile, ProfileStore};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Behaviour when ingesting a handle that already has a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Re-scrape and overwrite unconditionally
    #[default]
    Always,
    /// Return the stored record without rendering
    SkipIfPresent,
}

pub struct IngestPipeline {
    validator: Arc<HandleValidator>,
    renderer: Arc<dyn PageRenderer>,
    store: Arc<dyn ProfileStore>,
    profile_url_template: String,
    refresh_policy: RefreshPolicy,
}

impl IngestPipeline {
    pub fn new(
        validator: Arc<HandleValidator>,
        renderer: Arc<dyn PageRenderer>,
        store: Arc<dyn ProfileStore>,
        profile_url_template: impl Into<String>,
        refresh_policy: RefreshPolicy,
    ) -> Self {
        Self {
            validator,
            renderer,
            store,
            profile_url_template: profile_url_template.into(),
            refresh_policy,
        }
    }

    /// Page URL scraped for `handle`.
    pub fn profile_url(&self, handle: &str) -> String {
        self.profile_url_template.replace("{handle}", handle)
    }

    #[instrument(skip(self))]
    pub async fn ingest(&self, raw_handle: &str) -> Result<Profile, DirectoryError> {
        let result = self.run(raw_handle).await;

        match &result {
            Ok(profile) => {
                metrics::counter!("directory.ingest.succeeded").increment(1);
                info!(
                    handle = %profile.handle,
                    profile_image_url = %profile.profile_image_url,
                    "Profile ingested"
                );
            }
            Err(e) => {
                metrics::counter!("directory.ingest.failed").increment(1);
                debug!(error = %e, "Ingest failed");
            }
        }

        result
    }

    async fn run(&self, handle: &str) -> Result<Profile, DirectoryError> {
        if !self.validator.is_valid(handle) {
            return Err(DirectoryError::InvalidHandle);
        }

        if self.refresh_policy == RefreshPolicy::SkipIfPresent {
            if let Some(existing) = self.store.get(handle).await? {
                metrics::counter!("directory.ingest.skipped").increment(1);
                debug!(handle = %handle, "Profile already present, not re-scraping");
                return Ok(existing);
            }
        }

        let profile_image_url = self.scrape(&self.profile_url(handle)).await?;
        let profile = Profile::new(handle, profile_image_url);

        self.store.put(&profile).await?;

        Ok(profile)
    }

    /// Render `url` and extract the profile image. The session is released
    /// on every path once it has been opened.
    async fn scrape(&self, url: &str) -> Result<String, DirectoryError> {
        let mut session = SessionGuard::new(self.renderer.open(url).await?);
        metrics::counter!("directory.render.sessions").increment(1);

        let captured = session.snapshot().await;

        if let Err(e) = session.release().await {
            warn!(error = %e, url = %url, "Failed to release render session");
        }

        let snapshot = captured?;
        debug!(url = %url, images = snapshot.images.len(), "Page snapshot captured");

        extract_profile_image(&snapshot).ok_or(DirectoryError::ImageNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::DEFAULT_HANDLE_PATTERN;
    use crate::renderer::{PageSnapshot, RenderError, RenderSession};
    use crate::store::{MockProfileStore, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const TEMPLATE: &str = "https://twitter.com/{handle}";

    /// Renderer serving a canned page and counting session lifecycle calls.
    #[derive(Default)]
    struct FakeRenderer {
        sources: Vec<String>,
        fail_snapshot: bool,
        fail_open: bool,
        snapshot_delay: Option<Duration>,
        opened: Arc<Mutex<Vec<String>>>,
        released: Arc<AtomicUsize>,
    }

    struct FakeSession {
        url: String,
        sources: Vec<String>,
        fail_snapshot: bool,
        snapshot_delay: Option<Duration>,
        released: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PageRenderer for FakeRenderer {
        async fn open(&self, url: &str) -> Result<Box<dyn RenderSession>, RenderError> {
            if self.fail_open {
                return Err(RenderError::SessionStart("driver down".to_string()));
            }
            self.opened.lock().unwrap().push(url.to_string());
            Ok(Box::new(FakeSession {
                url: url.to_string(),
                sources: self.sources.clone(),
                fail_snapshot: self.fail_snapshot,
                snapshot_delay: self.snapshot_delay,
                released: self.released.clone(),
            }))
        }
    }

    #[async_trait]
    impl RenderSession for FakeSession {
        async fn snapshot(&mut self) -> Result<PageSnapshot, RenderError> {
            if let Some(delay) = self.snapshot_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_snapshot {
                return Err(RenderError::Capture("tab crashed".to_string()));
            }
            Ok(PageSnapshot::new(self.url.clone(), self.sources.clone()))
        }

        async fn release(self: Box<Self>) -> Result<(), RenderError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn renderer(sources: &[&str]) -> FakeRenderer {
        FakeRenderer {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn pipeline(
        renderer: FakeRenderer,
        store: MockProfileStore,
        policy: RefreshPolicy,
    ) -> IngestPipeline {
        IngestPipeline::new(
            Arc::new(HandleValidator::new(DEFAULT_HANDLE_PATTERN).unwrap()),
            Arc::new(renderer),
            Arc::new(store),
            TEMPLATE,
            policy,
        )
    }

    #[tokio::test]
    async fn test_ingest_scrapes_and_upserts_once() {
        let renderer = renderer(&[
            "https://abs.twimg.com/banner.jpg",
            "https://pbs.twimg.com/profile_images/1/carol_200x200.jpg",
        ]);
        let opened = renderer.opened.clone();
        let released = renderer.released.clone();

        let mut store = MockProfileStore::new();
        store.expect_get().never();
        store
            .expect_put()
            .withf(|p| {
                p.handle == "carol"
                    && p.profile_image_url
                        == "https://pbs.twimg.com/profile_images/1/carol_400x400.jpg"
            })
            .times(1)
            .returning(|_| Ok(()));

        let profile = pipeline(renderer, store, RefreshPolicy::Always)
            .ingest("carol")
            .await
            .unwrap();

        assert_eq!(profile.handle, "carol");
        assert_eq!(
            profile.profile_image_url,
            "https://pbs.twimg.com/profile_images/1/carol_400x400.jpg"
        );
        assert_eq!(*opened.lock().unwrap(), vec!["https://twitter.com/carol"]);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_handle_touches_nothing() {
        let renderer = renderer(&["x/200x200.jpg"]);
        let opened = renderer.opened.clone();

        let mut store = MockProfileStore::new();
        store.expect_put().never();
        store.expect_get().never();

        let result = pipeline(renderer, store, RefreshPolicy::Always)
            .ingest("")
            .await;

        assert!(matches!(result, Err(DirectoryError::InvalidHandle)));
        assert!(opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_releases_session_and_skips_put() {
        let renderer = renderer(&["a/100x100.png", "b/banner.png"]);
        let released = renderer.released.clone();

        let mut store = MockProfileStore::new();
        store.expect_put().never();

        let result = pipeline(renderer, store, RefreshPolicy::Always)
            .ingest("dave")
            .await;

        assert!(matches!(result, Err(DirectoryError::ImageNotFound)));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_snapshot_failure_releases_session() {
        let mut renderer = renderer(&[]);
        renderer.fail_snapshot = true;
        let released = renderer.released.clone();

        let mut store = MockProfileStore::new();
        store.expect_put().never();

        let result = pipeline(renderer, store, RefreshPolicy::Always)
            .ingest("erin")
            .await
            .unwrap_err();

        assert!(matches!(result, DirectoryError::Render(RenderError::Capture(_))));
        assert!(result.is_internal());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_ingest_still_releases_session() {
        let mut renderer = renderer(&["x/200x200.jpg"]);
        renderer.snapshot_delay = Some(Duration::from_secs(5));
        let released = renderer.released.clone();

        let mut store = MockProfileStore::new();
        store.expect_put().never();
        let pipeline = pipeline(renderer, store, RefreshPolicy::Always);

        let outcome =
            tokio::time::timeout(Duration::from_millis(100), pipeline.ingest("kate")).await;
        assert!(outcome.is_err());

        for _ in 0..50 {
            if released.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_failure_is_internal() {
        let mut renderer = renderer(&[]);
        renderer.fail_open = true;
        let released = renderer.released.clone();

        let mut store = MockProfileStore::new();
        store.expect_put().never();

        let result = pipeline(renderer, store, RefreshPolicy::Always)
            .ingest("frank")
            .await
            .unwrap_err();

        assert!(result.is_internal());
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_put_failure_is_internal() {
        let renderer = renderer(&["x/200x200.jpg"]);
        let released = renderer.released.clone();

        let mut store = MockProfileStore::new();
        store
            .expect_put()
            .times(1)
            .returning(|_| Err(StoreError::Unavailable("throttled".to_string())));

        let result = pipeline(renderer, store, RefreshPolicy::Always)
            .ingest("grace")
            .await
            .unwrap_err();

        assert!(matches!(result, DirectoryError::Store(_)));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_always_policy_rescrapes_existing_handle() {
        let renderer = renderer(&["new/200x200.jpg"]);
        let opened = renderer.opened.clone();

        let mut store = MockProfileStore::new();
        store.expect_get().never();
        store.expect_put().times(2).returning(|_| Ok(()));

        let pipeline = pipeline(renderer, store, RefreshPolicy::Always);
        pipeline.ingest("heidi").await.unwrap();
        pipeline.ingest("heidi").await.unwrap();

        assert_eq!(opened.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_skip_if_present_returns_stored_record() {
        let renderer = renderer(&["new/200x200.jpg"]);
        let opened = renderer.opened.clone();

        let mut store = MockProfileStore::new();
        store
            .expect_get()
            .times(1)
            .returning(|h| Ok(Some(Profile::new(h, "old/400x400.jpg"))));
        store.expect_put().never();

        let profile = pipeline(renderer, store, RefreshPolicy::SkipIfPresent)
            .ingest("ivan")
            .await
            .unwrap();

        assert_eq!(profile.profile_image_url, "old/400x400.jpg");
        assert!(opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skip_if_present_scrapes_new_handle() {
        let renderer = renderer(&["new/200x200.jpg"]);

        let mut store = MockProfileStore::new();
        store.expect_get().times(1).returning(|_| Ok(None));
        store.expect_put().times(1).returning(|_| Ok(()));

        let profile = pipeline(renderer, store, RefreshPolicy::SkipIfPresent)
            .ingest("judy")
            .await
            .unwrap();

        assert_eq!(profile.profile_image_url, "new/400x400.jpg");
    }

    #[test]
    fn test_profile_url_substitutes_handle() {
        let pipeline = pipeline(renderer(&[]), MockProfileStore::new(), RefreshPolicy::Always);
        assert_eq!(pipeline.profile_url("carol"), "https://twitter.com/carol");
    }
}
