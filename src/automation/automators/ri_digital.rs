//! RI Digital — the registry-of-deeds portal.
//!
//! The portal is a two-phase flow: the landing page is a comarca picker that
//! navigates into the selected registry office's own area, and only there
//! does the actual order form live. The office area greets first-time
//! sessions with a cookie-consent overlay that swallows the first click, so
//! the strategy dismisses it between the phases.

use super::SiteAutomator;
use crate::automation::config::StepAction;
use crate::automation::interpreter::{StepError, StepRunner};
use async_trait::async_trait;

pub struct RiDigital;

const CONSENT_DISMISS_JS: &str = r#"(() => {
    const needles = ['aceitar', 'concordo', 'ok, entendi', 'continuar'];
    const candidates = Array.from(document.querySelectorAll(
        'button, [role="button"], input[type="button"], input[type="submit"]'
    ));
    for (const el of candidates) {
        const text = (el.innerText || el.value || '').trim().toLowerCase();
        if (!text) continue;
        if (needles.some(n => text === n || text.startsWith(n))) {
            el.click();
            return true;
        }
    }
    return false;
})()"#;

#[async_trait]
impl SiteAutomator for RiDigital {
    fn tag(&self) -> &'static str {
        "ridigital"
    }

    async fn fill_forms(&self, runner: &mut StepRunner) -> Result<(), StepError> {
        let steps = runner.config().steps.clone();

        // Phase 1 ends with the comarca selection that navigates into the
        // office area. Configs without a select_by_city step (a direct-entry
        // office URL) skip straight to the form phase.
        let split = steps
            .iter()
            .position(|s| s.action == StepAction::SelectByCity)
            .map(|i| i + 1)
            .unwrap_or(0);
        let (picker_phase, form_phase) = steps.split_at(split);

        runner.execute_steps(picker_phase).await?;

        runner.run_script(CONSENT_DISMISS_JS).await;

        runner.execute_steps(form_phase).await
    }
}
