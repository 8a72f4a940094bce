//! Renderer replaying recorded page snapshots.
//!
//! Snapshots are JSON files shaped like [`PageSnapshot`], keyed by their
//! `url`. Opening a URL with no recording yields an empty page.

use super::{PageRenderer, PageSnapshot, RenderError, RenderSession};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

pub struct FixtureRenderer {
    snapshots: HashMap<String, PageSnapshot>,
}

impl FixtureRenderer {
    pub fn new(snapshots: impl IntoIterator<Item = PageSnapshot>) -> Self {
        Self {
            snapshots: snapshots
                .into_iter()
                .map(|s| (s.url.clone(), s))
                .collect(),
        }
    }

    /// Load every `*.json` file in `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut snapshots = Vec::new();

        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read fixture directory {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read fixture {}", path.display()))?;
            let snapshot: PageSnapshot = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse fixture {}", path.display()))?;
            snapshots.push(snapshot);
        }

        info!(
            dir = %dir.display(),
            count = snapshots.len(),
            "Loaded recorded page snapshots"
        );

        Ok(Self::new(snapshots))
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait]
impl PageRenderer for FixtureRenderer {
    async fn open(&self, url: &str) -> Result<Box<dyn RenderSession>, RenderError> {
        let snapshot = self.snapshots.get(url).cloned().unwrap_or_else(|| {
            debug!(url = %url, "No recording for URL, serving empty page");
            PageSnapshot::new(url, Vec::<String>::new())
        });

        Ok(Box::new(FixtureSession { snapshot }))
    }
}

struct FixtureSession {
    snapshot: PageSnapshot,
}

#[async_trait]
impl RenderSession for FixtureSession {
    async fn snapshot(&mut self) -> Result<PageSnapshot, RenderError> {
        Ok(self.snapshot.clone())
    }

    async fn release(self: Box<Self>) -> Result<(), RenderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_recorded_page() {
        let renderer = FixtureRenderer::new([PageSnapshot::new(
            "https://twitter.com/carol",
            ["https://pbs.twimg.com/profile_images/1/carol_200x200.jpg"],
        )]);

        let mut session = renderer.open("https://twitter.com/carol").await.unwrap();
        let snapshot = session.snapshot().await.unwrap();
        session.release().await.unwrap();

        assert_eq!(snapshot.images.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_url_is_empty_page() {
        let renderer = FixtureRenderer::new(Vec::<PageSnapshot>::new());

        let mut session = renderer.open("https://twitter.com/nobody").await.unwrap();
        let snapshot = session.snapshot().await.unwrap();

        assert_eq!(snapshot.url, "https://twitter.com/nobody");
        assert!(snapshot.images.is_empty());
    }

    #[test]
    fn test_loads_bundled_fixtures() {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures");
        let renderer = FixtureRenderer::from_dir(dir).unwrap();

        assert!(!renderer.is_empty());
    }
}
