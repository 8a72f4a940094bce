//! Renderer driving a headless browser over the W3C WebDriver protocol.
//!
//! Each [`PageRenderer::open`] creates a fresh browser session through the
//! driver (chromedriver), navigates it, and hands back a session that is
//! deleted on release. Settling is "document complete and image list stable
//! across two consecutive polls", bounded by a timeout; on timeout the last
//! observed image list is used.

use super::{PageRenderer, PageSnapshot, RenderError, RenderSession};
use crate::config::RendererConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

const SNAPSHOT_SCRIPT: &str = "return { \
    ready: document.readyState === 'complete', \
    sources: Array.from(document.getElementsByTagName('img'), img => img.src || '') \
};";

/// How long to wait for a page to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

pub struct WebDriverRenderer {
    http: Client,
    driver_url: String,
    capabilities: Value,
    settle: SettlePolicy,
}

impl WebDriverRenderer {
    pub fn new(config: &RendererConfig, settle: SettlePolicy, request_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build WebDriver HTTP client")?;

        let capabilities =
            chrome_capabilities(config.browser_binary.as_deref(), &config.browser_args);

        info!(
            driver_url = %config.driver_url,
            browser_binary = ?config.browser_binary,
            "WebDriver renderer initialized"
        );

        Ok(Self {
            http,
            driver_url: config.driver_url.trim_end_matches('/').to_string(),
            capabilities,
            settle,
        })
    }

    async fn new_session(&self) -> Result<String, RenderError> {
        let value = command(
            &self.http,
            Method::POST,
            &format!("{}/session", self.driver_url),
            Some(json!({ "capabilities": self.capabilities })),
        )
        .await
        .map_err(RenderError::SessionStart)?;

        value
            .get("sessionId")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| RenderError::SessionStart("driver returned no sessionId".to_string()))
    }
}

#[async_trait]
impl PageRenderer for WebDriverRenderer {
    #[instrument(skip(self))]
    async fn open(&self, url: &str) -> Result<Box<dyn RenderSession>, RenderError> {
        let session_id = self.new_session().await?;
        debug!(session_id = %session_id, "Browser session started");

        let session = WebDriverSession {
            http: self.http.clone(),
            base: format!("{}/session/{}", self.driver_url, session_id),
            settle: self.settle,
            deleted: AtomicBool::new(false),
        };

        if let Err(message) = session.navigate(url).await {
            if let Err(e) = session.delete().await {
                warn!(error = %e, "Failed to delete session after navigation error");
            }
            return Err(RenderError::Navigation {
                url: url.to_string(),
                message,
            });
        }

        Ok(Box::new(session))
    }
}

struct WebDriverSession {
    http: Client,
    base: String,
    settle: SettlePolicy,
    /// Set once a delete was sent; otherwise dropping the session sends one
    deleted: AtomicBool,
}

#[derive(Debug, Deserialize, PartialEq)]
struct PageState {
    ready: bool,
    sources: Vec<String>,
}

impl WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<(), String> {
        command(
            &self.http,
            Method::POST,
            &format!("{}/url", self.base),
            Some(json!({ "url": url })),
        )
        .await
        .map(|_| ())
    }

    async fn page_state(&self) -> Result<PageState, RenderError> {
        let value = command(
            &self.http,
            Method::POST,
            &format!("{}/execute/sync", self.base),
            Some(json!({ "script": SNAPSHOT_SCRIPT, "args": [] })),
        )
        .await
        .map_err(RenderError::Capture)?;

        serde_json::from_value(value).map_err(|e| RenderError::Capture(e.to_string()))
    }

    async fn delete(&self) -> Result<(), RenderError> {
        let result = command(&self.http, Method::DELETE, &self.base, None).await;
        self.deleted.store(true, Ordering::SeqCst);
        result.map(|_| ()).map_err(RenderError::Release)
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if self.deleted.load(Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session = %self.base, "No runtime to delete abandoned browser session");
            return;
        };
        let http = self.http.clone();
        let base = std::mem::take(&mut self.base);
        runtime.spawn(async move {
            if let Err(e) = command(&http, Method::DELETE, &base, None).await {
                warn!(error = %e, session = %base, "Failed to delete abandoned browser session");
            }
        });
    }
}

#[async_trait]
impl RenderSession for WebDriverSession {
    async fn snapshot(&mut self) -> Result<PageSnapshot, RenderError> {
        let deadline = Instant::now() + self.settle.timeout;
        let mut previous: Option<PageState> = None;

        let sources = loop {
            let state = self.page_state().await?;

            if state.ready && previous.as_ref() == Some(&state) {
                debug!(images = state.sources.len(), "Page settled");
                break state.sources;
            }

            if Instant::now() + self.settle.poll_interval > deadline {
                debug!(
                    images = state.sources.len(),
                    ready = state.ready,
                    "Settle timeout reached, using current page state"
                );
                break state.sources;
            }

            previous = Some(state);
            tokio::time::sleep(self.settle.poll_interval).await;
        };

        let url = command(&self.http, Method::GET, &format!("{}/url", self.base), None)
            .await
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();

        Ok(PageSnapshot::new(url, sources))
    }

    async fn release(self: Box<Self>) -> Result<(), RenderError> {
        self.delete().await
    }
}

/// Issue one WebDriver command and return its `value`, or the driver's
/// error message.
async fn command(
    http: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, String> {
    let mut request = http.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    let payload: Value = response.json().await.map_err(|e| e.to_string())?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        Ok(value)
    } else {
        Err(driver_error_message(status.as_u16(), &value))
    }
}

fn driver_error_message(status: u16, value: &Value) -> String {
    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = value.get("message").and_then(Value::as_str).unwrap_or("");
    format!("{status} {error}: {message}")
}

fn chrome_capabilities(binary: Option<&str>, args: &[String]) -> Value {
    let mut chrome_options = json!({ "args": args });
    if let Some(binary) = binary {
        chrome_options["binary"] = json!(binary);
    }

    json!({
        "alwaysMatch": {
            "browserName": "chrome",
            "goog:chromeOptions": chrome_options
        }
    })
}

/// Launch the driver binary and wait until it reports ready.
///
/// The child is killed when the returned handle is dropped.
pub async fn spawn_driver(path: &str, port: u16, driver_url: &str, wait: Duration) -> Result<Child> {
    let child = Command::new(path)
        .arg(format!("--port={port}"))
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to launch WebDriver binary {path}"))?;

    let http = Client::new();
    let status_url = format!("{}/status", driver_url.trim_end_matches('/'));
    let deadline = Instant::now() + wait;

    loop {
        let ready = command(&http, Method::GET, &status_url, None)
            .await
            .ok()
            .and_then(|v| v.get("ready").and_then(Value::as_bool))
            .unwrap_or(false);

        if ready {
            info!(path = %path, port = port, "WebDriver launched");
            return Ok(child);
        }

        if Instant::now() >= deadline {
            anyhow::bail!("WebDriver at {driver_url} not ready after {wait:?}");
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
