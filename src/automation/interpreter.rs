//! Step protocol interpreter.
//!
//! [`BoundAutomator::run`] owns the whole lifecycle of one automation run:
//! launch the hidden session, navigate to the portal, delegate form filling
//! to the site strategy, extract the protocol identifier, and close the
//! session on every exit path. [`StepRunner`] is the shared dispatcher the
//! strategies drive — every declarative step action is implemented exactly
//! once here, and every dispatched step emits one status event.

use crate::automation::automators::SiteAutomator;
use crate::automation::config::{AutomationConfig, Step, StepAction};
use crate::automation::context::RunContext;
use crate::browser::Session;
use crate::captcha::{poll_until, run_handoff, PollOutcome};
use crate::core::config::CrawlConfig;
use crate::core::types::{Outcome, StatusEvent};
use crate::ws::broadcast::ConnectionRegistry;
use anyhow::anyhow;
use rand::Rng;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const ELEMENT_POLL_BUDGET: u32 = 60; // ≈15 s

/// Mid-run failure. Fatal to the run that raised it, invisible to every
/// other run.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("navigation timed out: {0}")]
    NavigationTimeout(String),

    #[error("browser error: {0}")]
    Browser(#[from] anyhow::Error),
}

/// Everything a run needs from the outside world: the broadcast channel and
/// the process configuration. Cheap to clone per spawned run.
#[derive(Clone)]
pub struct RunEnv {
    pub channel: Arc<ConnectionRegistry>,
    pub config: Arc<CrawlConfig>,
}

/// A factory-produced automator: strategy + config + context + owning user.
/// No browser session exists until `run()` is called.
pub struct BoundAutomator {
    pub(crate) strategy: Arc<dyn SiteAutomator>,
    pub(crate) config: Arc<AutomationConfig>,
    pub(crate) context: RunContext,
    pub(crate) user_id: i64,
}

impl BoundAutomator {
    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Execute the run to completion.
    ///
    /// Returns `Outcome::success` with a non-empty protocol or
    /// `Outcome::failure` with the error message — never both, never
    /// neither. The hidden session is closed on every path out of here.
    pub async fn run(self, env: RunEnv) -> Outcome {
        let BoundAutomator {
            strategy,
            config,
            context,
            user_id,
        } = self;

        info!(
            certificate_id = %config.id,
            user_id,
            automator = %config.automator_tag,
            "automation run starting"
        );

        let session = match Session::launch(&env.config, user_id, &config.id).await {
            Ok(s) => s,
            Err(e) => {
                let message = format!("browser launch failed: {}", e);
                env.channel
                    .publish(user_id, StatusEvent::new(&config.id, "failed", &message));
                return Outcome::failure(message);
            }
        };

        let mut runner = StepRunner {
            session,
            config: Arc::clone(&config),
            context,
            env,
        };

        let filled: Result<(), StepError> = async {
            runner.session.goto(&config.target_url).await?;
            runner.session.settle(1000, Duration::from_secs(20)).await;
            runner.emit("page_loaded", format!("portal loaded: {}", config.target_url));
            strategy.fill_forms(&mut runner).await
        }
        .await;

        let outcome = match filled {
            Ok(()) => {
                let protocol = runner.extract_protocol().await;
                runner.emit_with_data(
                    "completed",
                    format!("request registered under protocol {}", protocol),
                    serde_json::json!({ "protocol": protocol }),
                );
                Outcome::success(protocol)
            }
            Err(e) => {
                warn!(certificate_id = %config.id, "automation run failed: {}", e);
                runner.emit("failed", e.to_string());
                Outcome::failure(e.to_string())
            }
        };

        runner.session.close().await;
        outcome
    }
}

/// Shared step dispatcher. Site strategies call [`StepRunner::execute_step`]
/// (or the convenience loop) and layer their portal-specific handling around
/// it.
pub struct StepRunner {
    pub(crate) session: Session,
    config: Arc<AutomationConfig>,
    context: RunContext,
    env: RunEnv,
}

impl StepRunner {
    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Publish one status event for this run's user.
    pub fn emit(&self, status: &str, log: impl Into<String>) {
        self.env.channel.publish(
            self.session.user_id(),
            StatusEvent::new(self.session.certificate_id(), status, log),
        );
    }

    pub fn emit_with_data(&self, status: &str, log: impl Into<String>, data: serde_json::Value) {
        self.env.channel.publish(
            self.session.user_id(),
            StatusEvent::new(self.session.certificate_id(), status, log).with_data(data),
        );
    }

    /// Best-effort page script for site quirks (consent overlays, legacy
    /// unload prompts). Failures are logged and swallowed.
    pub async fn run_script(&self, js: &str) {
        if let Err(e) = self.session.page().evaluate(js.to_string()).await {
            warn!("site script failed: {}", e);
        }
    }

    pub async fn execute_steps(&mut self, steps: &[Step]) -> Result<(), StepError> {
        for step in steps {
            self.execute_step(step).await?;
        }
        Ok(())
    }

    pub async fn execute_step(&mut self, step: &Step) -> Result<(), StepError> {
        match step.action {
            StepAction::WaitElement => {
                self.wait_element(step.selector()).await?;
                self.emit("step", format!("element ready: {}", step.selector()));
            }
            StepAction::Click => {
                self.click(step.selector()).await?;
                self.emit("step", format!("clicked {}", step.selector()));
            }
            StepAction::Fill => self.fill(step).await?,
            StepAction::Select => {
                self.select_option(step).await?;
                self.emit(
                    "step",
                    format!(
                        "selected '{}' in {}",
                        step.literal_value.as_deref().unwrap_or_default(),
                        step.selector()
                    ),
                );
            }
            StepAction::SelectByCity => self.select_by_city(step).await?,
            StepAction::SelectByText => {
                let needle = step.literal_value.as_deref().unwrap_or_default();
                self.click_by_text(step.selector(), needle).await?;
                self.emit("step", format!("activated '{}' in {}", needle, step.selector()));
            }
            StepAction::ToastMessage => {
                // Pure status emission — a phase marker, no page interaction.
                self.emit("phase", step.message.clone().unwrap_or_default());
            }
            StepAction::CaptchaPause => {
                let pause = self.env.config.resolve_captcha_pause();
                self.emit(
                    "captcha_waiting",
                    format!("pausing {}s for the portal challenge", pause.as_secs()),
                );
                tokio::time::sleep(pause).await;
            }
            StepAction::CaptchaModal => {
                // The coordinator emits its own waiting/progress/terminal
                // events and the flow resumes whatever the outcome was.
                run_handoff(&self.session, &self.env.channel, &self.env.config).await;
            }
        }
        Ok(())
    }

    async fn wait_element(&self, selector: &str) -> Result<(), StepError> {
        let page = self.session.page();
        let outcome = poll_until(ELEMENT_POLL_INTERVAL, ELEMENT_POLL_BUDGET, move |_| {
            let page = page.clone();
            let selector = selector.to_string();
            async move {
                match page.find_element(selector).await {
                    Ok(_) => Ok(Some(())),
                    Err(_) => Ok(None),
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Resolved(()) => Ok(()),
            PollOutcome::TimedOut => Err(StepError::ElementNotFound {
                selector: selector.to_string(),
            }),
            PollOutcome::Errored(e) => Err(StepError::Browser(e)),
        }
    }

    async fn click(&self, selector: &str) -> Result<(), StepError> {
        let element = self
            .session
            .page()
            .find_element(selector)
            .await
            .map_err(|_| StepError::ElementNotFound {
                selector: selector.to_string(),
            })?;
        element
            .click()
            .await
            .map_err(|e| anyhow!("click {} failed: {}", selector, e))?;
        self.settle_jitter().await;
        Ok(())
    }

    /// `fill` resolves its context path and skips explicitly on a miss — the
    /// portals tolerate empty optional fields, and a miss must never corrupt
    /// the steps that follow.
    async fn fill(&mut self, step: &Step) -> Result<(), StepError> {
        let selector = step.selector();
        let Some(path) = step.value_from_path.as_deref() else {
            warn!(selector, "fill step without a context path; skipping");
            self.emit_with_data(
                "step",
                format!("skipped {}: no context path configured", selector),
                serde_json::json!({ "skipped": true }),
            );
            return Ok(());
        };

        let Some(value) = self.context.resolve_str(path) else {
            warn!(selector, path, "fill skipped: context path unresolved");
            self.emit_with_data(
                "step",
                format!("skipped {}: context path '{}' unresolved", selector, path),
                serde_json::json!({ "skipped": true }),
            );
            return Ok(());
        };

        let element = self
            .session
            .page()
            .find_element(selector)
            .await
            .map_err(|_| StepError::ElementNotFound {
                selector: selector.to_string(),
            })?;
        element
            .click()
            .await
            .map_err(|e| anyhow!("focus {} failed: {}", selector, e))?;

        // Clear any prefilled value before typing.
        self.session
            .page()
            .evaluate(clear_field_js(selector))
            .await
            .map_err(|e| anyhow!("clear {} failed: {}", selector, e))?;

        element
            .type_str(&value)
            .await
            .map_err(|e| anyhow!("type into {} failed: {}", selector, e))?;

        self.emit("step", format!("filled {} from {}", selector, path));
        Ok(())
    }

    async fn select_option(&self, step: &Step) -> Result<(), StepError> {
        let selector = step.selector();
        let value = step
            .literal_value
            .as_deref()
            .ok_or_else(|| anyhow!("select step for {} has no literalValue", selector))?;

        let matched: bool = self
            .session
            .page()
            .evaluate(select_option_js(selector, value))
            .await
            .map_err(|e| anyhow!("select on {} failed: {}", selector, e))?
            .into_value()
            .unwrap_or(false);

        if !matched {
            return Err(StepError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        Ok(())
    }

    /// Map the context's city through the comarca table and activate the
    /// first candidate naming that comarca, then wait out the resulting
    /// navigation.
    async fn select_by_city(&mut self, step: &Step) -> Result<(), StepError> {
        let selector = step.selector();
        let path = step.value_from_path.as_deref().unwrap_or("property.city");
        let city = self.context.resolve_str(path).unwrap_or_default();
        let comarca = comarca_for_city(&city);

        let clicked: bool = self
            .session
            .page()
            .evaluate(click_candidate_js(selector, comarca))
            .await
            .map_err(|e| anyhow!("comarca lookup on {} failed: {}", selector, e))?
            .into_value()
            .unwrap_or(false);

        if !clicked {
            return Err(StepError::ElementNotFound {
                selector: selector.to_string(),
            });
        }

        self.session
            .page()
            .wait_for_navigation()
            .await
            .map_err(|e| StepError::NavigationTimeout(e.to_string()))?;
        self.session.settle(1000, Duration::from_secs(15)).await;

        self.emit(
            "step",
            format!("comarca selected: {} (city: {})", comarca, city),
        );
        Ok(())
    }

    async fn click_by_text(&self, selector: &str, needle: &str) -> Result<(), StepError> {
        let clicked: bool = self
            .session
            .page()
            .evaluate(click_candidate_js(selector, needle))
            .await
            .map_err(|e| anyhow!("text lookup on {} failed: {}", selector, e))?
            .into_value()
            .unwrap_or(false);

        if !clicked {
            return Err(StepError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        self.settle_jitter().await;
        Ok(())
    }

    /// Short randomized pause so portal click handlers finish before the
    /// next step probes the DOM.
    async fn settle_jitter(&self) {
        let ms = rand::rng().random_range(300..=800);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Extract the protocol identifier from the confirmation page, or
    /// synthesize a traceable one when the portal confirmed without showing
    /// a protocol.
    pub(crate) async fn extract_protocol(&self) -> String {
        let body: String = self
            .session
            .page()
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .ok()
            .and_then(|v| v.into_value().ok())
            .unwrap_or_default();

        find_protocol(&body).unwrap_or_else(|| {
            format!(
                "CC-{}-{}",
                chrono::Utc::now().format("%Y%m%d"),
                &Uuid::new_v4().simple().to_string()[..12]
            )
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Comarca mapping
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_COMARCA: &str = "Interior";

/// Fixed city → comarca category table for the registry portal's office
/// picker. Cities absent from the table fall into the `Interior` bucket.
pub fn comarca_for_city(city: &str) -> &'static str {
    match city.trim().to_lowercase().as_str() {
        "rio de janeiro" => "Capital",
        "niterói" | "niteroi" => "Niterói",
        "são gonçalo" | "sao goncalo" => "São Gonçalo",
        "duque de caxias" => "Duque de Caxias",
        "nova iguaçu" | "nova iguacu" => "Nova Iguaçu",
        "petrópolis" | "petropolis" => "Petrópolis",
        _ => DEFAULT_COMARCA,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Page scripts
// ─────────────────────────────────────────────────────────────────────────────

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn clear_field_js(selector: &str) -> String {
    format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return false;
            el.value = '';
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            return true;
        }})()"#,
        sel = js_string(selector)
    )
}

fn select_option_js(selector: &str, value: &str) -> String {
    format!(
        r#"(() => {{
            const select = document.querySelector({sel});
            if (!select) return false;
            const wanted = {val}.toLowerCase();
            for (const option of Array.from(select.options || [])) {{
                const text = (option.text || '').trim().toLowerCase();
                if (text === wanted || option.value.toLowerCase() === wanted) {{
                    select.value = option.value;
                    select.dispatchEvent(new Event('change', {{ bubbles: true }}));
                    return true;
                }}
            }}
            return false;
        }})()"#,
        sel = js_string(selector),
        val = js_string(value)
    )
}

fn click_candidate_js(selector: &str, needle: &str) -> String {
    format!(
        r#"(() => {{
            const needle = {needle}.toLowerCase();
            const candidates = Array.from(document.querySelectorAll({sel}));
            for (const el of candidates) {{
                const text = (el.innerText || el.textContent || '').toLowerCase();
                if (text.includes(needle)) {{
                    el.click();
                    return true;
                }}
            }}
            return false;
        }})()"#,
        sel = js_string(selector),
        needle = js_string(needle)
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Protocol extraction
// ─────────────────────────────────────────────────────────────────────────────

static PROTOCOL_RE: OnceLock<Regex> = OnceLock::new();

fn protocol_regex() -> &'static Regex {
    PROTOCOL_RE.get_or_init(|| {
        Regex::new(r"(?i)protocolo\s*(?:n[ºo°.]*\s*)?[:#]?\s*([0-9][0-9A-Za-z./-]{3,})")
            .expect("valid protocol pattern")
    })
}

pub(crate) fn find_protocol(text: &str) -> Option<String> {
    protocol_regex()
        .captures(text)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().trim_end_matches(['.', '-']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rio_de_janeiro_maps_to_capital() {
        assert_eq!(comarca_for_city("Rio de Janeiro"), "Capital");
        assert_eq!(comarca_for_city("  rio de janeiro  "), "Capital");
    }

    #[test]
    fn unmapped_cities_fall_back_to_interior() {
        assert_eq!(comarca_for_city("Angra dos Reis"), DEFAULT_COMARCA);
        assert_eq!(comarca_for_city(""), DEFAULT_COMARCA);
    }

    #[test]
    fn accent_variants_map_identically() {
        assert_eq!(comarca_for_city("Niterói"), comarca_for_city("niteroi"));
        assert_eq!(comarca_for_city("São Gonçalo"), comarca_for_city("sao goncalo"));
    }

    #[test]
    fn protocol_is_extracted_from_confirmation_text() {
        let body = "Pedido recebido.\nProtocolo: 2024.123456-7\nGuarde este número.";
        assert_eq!(find_protocol(body).as_deref(), Some("2024.123456-7"));

        let body = "PROTOCOLO Nº 987654";
        assert_eq!(find_protocol(body).as_deref(), Some("987654"));
    }

    #[test]
    fn unrelated_text_yields_no_protocol() {
        assert!(find_protocol("Bem-vindo ao portal de certidões").is_none());
        assert!(find_protocol("").is_none());
    }

    #[test]
    fn trailing_punctuation_is_not_part_of_the_protocol() {
        let body = "Protocolo: 2024.55.";
        assert_eq!(find_protocol(body).as_deref(), Some("2024.55"));
    }

    #[test]
    fn page_scripts_escape_selectors_and_values() {
        let js = click_candidate_js(".lista a", "O'Reilly \"Co\"");
        assert!(js.contains(r#"".lista a""#));
        assert!(js.contains(r#"O'Reilly \"Co\""#));
    }
}
