//! Cartório 24 Horas — the legacy notary portal.
//!
//! A plain sequential form with none of RI Digital's phase structure, but
//! two period quirks: an `onbeforeunload` confirm that freezes a headless
//! session on the final submit, and a jQuery-era toast container that steals
//! clicks while animating. Both are neutralized before the steps run.

use super::SiteAutomator;
use crate::automation::interpreter::{StepError, StepRunner};
use async_trait::async_trait;

pub struct Cartorio24h;

const LEGACY_PREP_JS: &str = r#"(() => {
    window.onbeforeunload = null;
    const toast = document.querySelector('#toast-container, .toast-top-right');
    if (toast) toast.style.pointerEvents = 'none';
    return true;
})()"#;

#[async_trait]
impl SiteAutomator for Cartorio24h {
    fn tag(&self) -> &'static str {
        "cartorio24h"
    }

    async fn fill_forms(&self, runner: &mut StepRunner) -> Result<(), StepError> {
        runner.run_script(LEGACY_PREP_JS).await;

        let steps = runner.config().steps.clone();
        runner.execute_steps(&steps).await
    }
}
