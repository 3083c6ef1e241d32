//! Hidden browser session lifecycle.
//!
//! One [`Session`] per automation run, bound to exactly one
//! `(user_id, certificate_id)` pair. The session owns the browser process,
//! the single working page and the CDP handler task; `close()` releases all
//! three, and `Drop` is the best-effort backstop so an errored run never
//! leaks a browser process.

use crate::browser::launcher;
use crate::core::config::CrawlConfig;
use anyhow::{anyhow, Result};
use chromiumoxide::cdp::browser_protocol::network::Cookie;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Session {
    browser: Option<Browser>,
    page: Page,
    handler_task: tokio::task::JoinHandle<()>,
    closed: Arc<AtomicBool>,
    user_id: i64,
    certificate_id: String,
}

impl Session {
    /// Launch the hidden browser and open the run's single working page.
    pub async fn launch(cfg: &CrawlConfig, user_id: i64, certificate_id: &str) -> Result<Self> {
        let exe = launcher::find_chrome_executable(cfg.resolve_chrome_executable().as_deref())
            .ok_or_else(|| {
                anyhow!("No browser found. Install Chrome or Chromium, or set CHROME_EXECUTABLE.")
            })?;

        let config = launcher::build_hidden_config(&exe)?;
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow!("Failed to launch hidden browser ({}): {}", exe, e))?;

        let closed = Arc::new(AtomicBool::new(false));
        let handler_task = spawn_handler_task(handler, Arc::clone(&closed));

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("Failed to open working page: {}", e))?;

        info!(
            user_id,
            certificate_id, "hidden session launched ({})", exe
        );

        Ok(Self {
            browser: Some(browser),
            page,
            handler_task,
            closed,
            user_id,
            certificate_id: certificate_id.to_string(),
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn certificate_id(&self) -> &str {
        &self.certificate_id
    }

    /// `true` once the CDP transport dropped or `close()` ran.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Navigate the working page and block until the navigation commits.
    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| anyhow!("goto {} failed: {}", url, e))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| anyhow!("navigation to {} did not settle: {}", url, e))?;
        Ok(())
    }

    /// Wait until the page network goes idle (no new resource entries for
    /// `quiet_ms` consecutive ms) or until `timeout` elapses.
    ///
    /// Polls `performance.getEntriesByType("resource").length` — a
    /// networkidle heuristic that works without CDP Network events.
    pub async fn settle(&self, quiet_ms: u64, timeout: Duration) {
        let poll_ms = 250u64;
        let start = std::time::Instant::now();
        let mut last_count: u64 = 0;
        let mut stable_since = std::time::Instant::now();

        loop {
            if start.elapsed() >= timeout {
                debug!("settle: timeout after {:?}", timeout);
                break;
            }

            let count: u64 = self
                .page
                .evaluate("performance.getEntriesByType('resource').length")
                .await
                .ok()
                .and_then(|v| v.into_value::<serde_json::Value>().ok())
                .and_then(|j| j.as_u64())
                .unwrap_or(0);

            let ready_complete: bool = self
                .page
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|v| v.into_value::<serde_json::Value>().ok())
                .and_then(|j| j.as_str().map(|s| s == "complete"))
                .unwrap_or(false);

            if !ready_complete {
                stable_since = std::time::Instant::now();
                last_count = count;
            } else if count != last_count {
                last_count = count;
                stable_since = std::time::Instant::now();
            } else if stable_since.elapsed().as_millis() as u64 >= quiet_ms {
                break;
            }

            tokio::time::sleep(Duration::from_millis(poll_ms)).await;
        }
    }

    /// Current URL of the working page.
    pub async fn current_url(&self) -> Result<String> {
        self.page
            .url()
            .await
            .map_err(|e| anyhow!("failed to read current url: {}", e))?
            .ok_or_else(|| anyhow!("page has no url"))
    }

    /// Snapshot of the working page's cookie jar.
    pub async fn cookies(&self) -> Result<Vec<Cookie>> {
        self.page
            .get_cookies()
            .await
            .map_err(|e| anyhow!("failed to read cookies: {}", e))
    }

    /// Gracefully release the browser. Safe to call once per session; the
    /// `Drop` backstop covers every path that never reaches here.
    pub async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut browser) = self.browser.take() {
            let _ = browser.close().await;
            let _ = browser.wait().await;
        }
        self.handler_task.abort();
        info!(
            user_id = self.user_id,
            certificate_id = %self.certificate_id,
            "hidden session closed"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.handler_task.abort();
        let Some(mut browser) = self.browser.take() else {
            return;
        };
        warn!(
            user_id = self.user_id,
            certificate_id = %self.certificate_id,
            "hidden session dropped without close(); reaping browser process"
        );
        // Drop cannot await; spawn the close when a runtime is still around
        // so an uncaught run error doesn't leave a zombie Chromium behind.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = browser.close().await;
                let _ = browser.wait().await;
            });
        }
    }
}

fn spawn_handler_task(
    mut handler: chromiumoxide::Handler,
    closed: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!("chromiumoxide handler event error: {}", e);
            }
        }
        closed.store(true, Ordering::SeqCst);
    })
}
