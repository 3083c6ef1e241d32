//! CAPTCHA hidden/visible browser handoff.
//!
//! The automation runs headless, but an anti-automation challenge needs a
//! human looking at the real page. The coordinator:
//!
//! 1. Captures the hidden session's current URL and cookie jar.
//! 2. Launches a second, human-visible browser with the same cookies,
//!    navigates it to the captured URL and decorates it with an
//!    action-required banner.
//! 3. Polls both sessions for the challenge response field at a fixed
//!    interval, bounded by the configured budget.
//! 4. When only the visible session resolved, copies the response token into
//!    the hidden session so the original flow proceeds without re-solving.
//! 5. Closes the visible browser unconditionally — resolved, timed out or
//!    errored.
//!
//! A timeout does not fail the run here; the caller resumes and the next
//! step fails terminally if the challenge truly blocked the flow.

use crate::browser::launcher::{self, VISIBLE_DEBUG_PORT};
use crate::browser::Session;
use crate::captcha::polling::{poll_until, PollOutcome};
use crate::core::config::CrawlConfig;
use crate::core::types::StatusEvent;
use crate::ws::broadcast::ConnectionRegistry;
use anyhow::{anyhow, Result};
use chromiumoxide::cdp::browser_protocol::network::{Cookie, CookieParam};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::time::Duration;
use tracing::{info, warn};

/// Emit a progress event every this many polling iterations (≈30 s at the
/// default 1-second interval).
const PROGRESS_EVERY: u32 = 30;

/// Terminal result of one handoff. Every variant resumes the calling flow.
#[derive(Debug, PartialEq, Eq)]
pub enum HandoffOutcome {
    Resolved,
    TimedOut,
    Failed(String),
}

/// Run the full handoff protocol for the given hidden session.
pub async fn run_handoff(
    hidden: &Session,
    channel: &ConnectionRegistry,
    cfg: &CrawlConfig,
) -> HandoffOutcome {
    emit(
        channel,
        hidden,
        "captcha_waiting",
        "verification challenge detected; opening a visible browser for the operator",
    );

    let challenge = match CaptchaChallenge::open(hidden, cfg).await {
        Ok(c) => c,
        Err(e) => {
            warn!(
                certificate_id = hidden.certificate_id(),
                "captcha handoff could not open the visible browser: {}", e
            );
            emit(
                channel,
                hidden,
                "captcha_error",
                format!("could not open the operator browser: {}", e),
            );
            return HandoffOutcome::Failed(e.to_string());
        }
    };

    let outcome = challenge.await_resolution(channel).await;

    // Teardown before reporting: the visible browser must be gone by the
    // time this step returns, whatever the polling outcome was.
    challenge.close().await;

    match outcome {
        PollOutcome::Resolved(token) => {
            if token.from_visible {
                if let Err(e) = copy_response_into(hidden.page(), &token.value).await {
                    warn!("captcha handoff: failed to copy response token back: {}", e);
                    emit(
                        channel,
                        hidden,
                        "captcha_error",
                        format!("challenge solved but the token could not be merged: {}", e),
                    );
                    return HandoffOutcome::Failed(e.to_string());
                }
            }
            info!(
                certificate_id = hidden.certificate_id(),
                from_visible = token.from_visible,
                "captcha resolved"
            );
            emit(channel, hidden, "captcha_resolved", "challenge solved; resuming automation");
            HandoffOutcome::Resolved
        }
        PollOutcome::TimedOut => {
            warn!(
                certificate_id = hidden.certificate_id(),
                "captcha handoff timed out waiting for the operator"
            );
            emit(
                channel,
                hidden,
                "captcha_timeout",
                "no challenge response before the deadline; continuing without it",
            );
            HandoffOutcome::TimedOut
        }
        PollOutcome::Errored(e) => {
            warn!("captcha handoff polling errored: {}", e);
            emit(channel, hidden, "captcha_error", e.to_string());
            HandoffOutcome::Failed(e.to_string())
        }
    }
}

fn emit(channel: &ConnectionRegistry, hidden: &Session, status: &str, log: impl Into<String>) {
    channel.publish(
        hidden.user_id(),
        StatusEvent::new(hidden.certificate_id(), status, log),
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Challenge state
// ─────────────────────────────────────────────────────────────────────────────

/// Transient state of one `captcha_modal` step: the originating hidden
/// session, the spawned visible browser and the resolution budget. Exists
/// only between `open` and `close`.
struct CaptchaChallenge<'a> {
    hidden: &'a Session,
    visible: VisibleBrowser,
    interval: Duration,
    budget: u32,
}

struct ResolvedToken {
    value: String,
    from_visible: bool,
}

impl<'a> CaptchaChallenge<'a> {
    async fn open(hidden: &'a Session, cfg: &CrawlConfig) -> Result<CaptchaChallenge<'a>> {
        let url = hidden.current_url().await?;
        let cookies = hidden.cookies().await?;

        let visible = VisibleBrowser::launch(cfg).await?;
        visible.import_cookies(&cookies).await?;
        visible.goto(&url).await?;

        Ok(CaptchaChallenge {
            hidden,
            visible,
            interval: cfg.resolve_captcha_poll_interval(),
            budget: cfg.resolve_captcha_poll_budget(),
        })
    }

    /// Poll both sessions until either carries a non-empty challenge
    /// response, the budget runs out, or a probe fails.
    async fn await_resolution(&self, channel: &ConnectionRegistry) -> PollOutcome<ResolvedToken> {
        let hidden_page = self.hidden.page();
        let visible_page = self.visible.page();

        poll_until(self.interval, self.budget, move |iteration| async move {
            if iteration > 0 && iteration % PROGRESS_EVERY == 0 {
                emit(
                    channel,
                    self.hidden,
                    "captcha_progress",
                    format!(
                        "still waiting for the operator ({}/{} checks)",
                        iteration, self.budget
                    ),
                );
            }

            if let Some(value) = read_response(hidden_page).await? {
                return Ok(Some(ResolvedToken {
                    value,
                    from_visible: false,
                }));
            }
            if let Some(value) = read_response(visible_page).await? {
                return Ok(Some(ResolvedToken {
                    value,
                    from_visible: true,
                }));
            }
            Ok(None)
        })
        .await
    }

    async fn close(self) {
        self.visible.close().await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response field probes
// ─────────────────────────────────────────────────────────────────────────────

const RESPONSE_PROBE_JS: &str = r#"(() => {
    const field = document.querySelector("textarea[name='g-recaptcha-response'], #g-recaptcha-response");
    if (field && field.value) return field.value;
    const frame = document.querySelector("iframe[src*='recaptcha'], iframe[title*='recaptcha'], iframe[src*='hcaptcha']");
    if (frame) {
        const attr = frame.getAttribute('data-response') || frame.getAttribute('data-hcaptcha-response');
        if (attr) return attr;
    }
    return '';
})()"#;

/// Read the challenge response field of a page. `Ok(None)` means "not
/// resolved yet"; an error means the page itself is gone.
async fn read_response(page: &Page) -> Result<Option<String>> {
    let value = page
        .evaluate(RESPONSE_PROBE_JS)
        .await
        .map_err(|e| anyhow!("response probe failed: {}", e))?
        .into_value::<String>()
        .unwrap_or_default();
    Ok(if value.is_empty() { None } else { Some(value) })
}

/// Write the solved token into a page's response field (creating the hidden
/// textarea when the widget never rendered one) and fire the change event the
/// portal's form validation listens for.
async fn copy_response_into(page: &Page, token: &str) -> Result<()> {
    let token_json = serde_json::to_string(token)?;
    let js = format!(
        r#"(() => {{
            const token = {token_json};
            let field = document.querySelector("textarea[name='g-recaptcha-response'], #g-recaptcha-response");
            if (!field) {{
                field = document.createElement('textarea');
                field.name = 'g-recaptcha-response';
                field.style.display = 'none';
                const form = document.querySelector('form');
                (form || document.body).appendChild(field);
            }}
            field.value = token;
            field.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return true;
        }})()"#
    );
    page.evaluate(js)
        .await
        .map_err(|e| anyhow!("token injection failed: {}", e))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Visible browser
// ─────────────────────────────────────────────────────────────────────────────

struct VisibleBrowser {
    browser: Option<Browser>,
    page: Page,
    handler_task: tokio::task::JoinHandle<()>,
}

impl VisibleBrowser {
    async fn launch(cfg: &CrawlConfig) -> Result<Self> {
        let exe = launcher::find_chrome_executable(cfg.resolve_chrome_executable().as_deref())
            .ok_or_else(|| anyhow!("no browser executable available for the operator window"))?;

        let config = launcher::build_visible_config(&exe)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow!("failed to launch visible browser ({}): {}", exe, e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("visible browser handler event error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("failed to open operator page: {}", e))?;

        // Re-inject the banner on every navigation the operator performs —
        // some challenges redirect through several pages.
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(banner_script()))
            .await
            .map_err(|e| anyhow!("failed to install operator banner: {}", e))?;

        Ok(Self {
            browser: Some(browser),
            page,
            handler_task,
        })
    }

    fn page(&self) -> &Page {
        &self.page
    }

    /// Import the hidden session's cookie jar so the operator lands on the
    /// same authenticated page, not a fresh anonymous one.
    async fn import_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        let params: Vec<CookieParam> = cookies
            .iter()
            .filter_map(|c| serde_json::to_value(c).ok())
            .filter_map(|v| serde_json::from_value::<CookieParam>(v).ok())
            .collect();
        if params.is_empty() {
            return Ok(());
        }
        self.page
            .set_cookies(params)
            .await
            .map_err(|e| anyhow!("cookie import failed: {}", e))?;
        Ok(())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| anyhow!("visible goto {} failed: {}", url, e))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| anyhow!("visible navigation did not settle: {}", e))?;
        // The on-new-document script covers future navigations; decorate the
        // already-loaded page directly.
        let _ = self.page.evaluate(banner_script()).await;
        Ok(())
    }

    async fn close(mut self) {
        // Sweep tabs the operator may have opened, then close the browser.
        let _ = close_leftover_tabs(VISIBLE_DEBUG_PORT).await;
        if let Some(mut browser) = self.browser.take() {
            let _ = browser.close().await;
            let _ = browser.wait().await;
        }
        self.handler_task.abort();
        info!("visible browser closed");
    }
}

impl Drop for VisibleBrowser {
    fn drop(&mut self) {
        self.handler_task.abort();
        let Some(mut browser) = self.browser.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = browser.close().await;
                let _ = browser.wait().await;
            });
        }
    }
}

/// Close every page target listed by the browser's `/json` endpoint. The
/// endpoint enumerates targets reliably without chromiumoxide-internal APIs.
async fn close_leftover_tabs(debug_port: u16) -> Result<()> {
    let list_url = format!("http://127.0.0.1:{}/json/list", debug_port);
    let close_base = format!("http://127.0.0.1:{}/json/close/", debug_port);

    let resp = reqwest::get(&list_url).await?;
    let targets: serde_json::Value = resp.json().await?;

    for t in targets.as_array().cloned().unwrap_or_default() {
        if t.get("type").and_then(|v| v.as_str()) != Some("page") {
            continue;
        }
        let id = t.get("id").and_then(|v| v.as_str()).unwrap_or("");
        if id.is_empty() {
            continue;
        }
        let _ = reqwest::get(format!("{}{}", close_base, id)).await;
    }

    Ok(())
}

fn banner_script() -> String {
    r#"(() => {
        const id = '__certcrawl_handoff_banner__';
        if (document.getElementById(id)) return;
        const div = document.createElement('div');
        div.id = id;
        div.style.position = 'fixed';
        div.style.left = '0';
        div.style.top = '0';
        div.style.right = '0';
        div.style.zIndex = '2147483647';
        div.style.padding = '18px';
        div.style.fontSize = '22px';
        div.style.fontWeight = '800';
        div.style.fontFamily = 'system-ui, -apple-system, Segoe UI, Roboto, sans-serif';
        div.style.background = 'rgba(0,0,0,0.88)';
        div.style.color = 'white';
        div.style.textAlign = 'center';
        div.style.borderBottom = '4px solid #ff4444';
        div.textContent = 'CERTCRAWL — ACTION REQUIRED: complete the verification in this window.';
        const attach = () => (document.body || document.documentElement).appendChild(div);
        if (document.readyState === 'loading') {
            document.addEventListener('DOMContentLoaded', attach);
        } else {
            attach();
        }
    })()"#
        .to_string()
}
