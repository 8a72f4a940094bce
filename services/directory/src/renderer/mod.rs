//! Page rendering collaborator.
//!
//! A [`PageRenderer`] opens one [`RenderSession`] per page load. The session
//! is exclusively owned by its caller and must be released exactly once,
//! whatever happens after it was opened.

pub mod fixture;
pub mod webdriver;

pub use fixture::FixtureRenderer;
pub use webdriver::{SettlePolicy, WebDriverRenderer};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors raised while driving a renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to start render session: {0}")]
    SessionStart(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Failed to capture page snapshot: {0}")]
    Capture(String),

    #[error("Failed to release render session: {0}")]
    Release(String),
}

/// An image element as it appeared on the rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageElement {
    pub source_url: String,
}

/// Image elements of a rendered page, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub images: Vec<ImageElement>,
}

impl PageSnapshot {
    pub fn new<I, S>(url: impl Into<String>, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            url: url.into(),
            images: sources
                .into_iter()
                .map(|s| ImageElement {
                    source_url: s.into(),
                })
                .collect(),
        }
    }
}

/// Opens rendering sessions on a URL.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Start a session and navigate it to `url`.
    ///
    /// On error no session is handed out and the implementation has already
    /// cleaned up anything it started.
    async fn open(&self, url: &str) -> Result<Box<dyn RenderSession>, RenderError>;
}

/// A live rendering of one page.
#[async_trait]
pub trait RenderSession: Send {
    /// Wait for the page to settle and list its image elements.
    async fn snapshot(&mut self) -> Result<PageSnapshot, RenderError>;

    /// Tear the session down.
    async fn release(self: Box<Self>) -> Result<(), RenderError>;
}

/// Owns an open session until it is released.
///
/// Dropping the guard without calling [`SessionGuard::release`], e.g. when
/// the surrounding future is cancelled mid-snapshot, hands the session to a
/// background task that releases it.
pub struct SessionGuard {
    session: Option<Box<dyn RenderSession>>,
}

impl SessionGuard {
    pub fn new(session: Box<dyn RenderSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub async fn snapshot(&mut self) -> Result<PageSnapshot, RenderError> {
        match self.session.as_mut() {
            Some(session) => session.snapshot().await,
            None => Err(RenderError::Capture("session already released".to_string())),
        }
    }

    pub async fn release(mut self) -> Result<(), RenderError> {
        match self.session.take() {
            Some(session) => session.release().await,
            None => Ok(()),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = session.release().await {
                        warn!(error = %e, "Failed to release abandoned render session");
                    }
                });
            }
            Err(_) => warn!("No runtime to release abandoned render session"),
        }
    }
}
