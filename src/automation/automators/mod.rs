//! Site-specific automator strategies.
//!
//! One implementation per portal family, selected by the config's
//! `automator_tag`. Each strategy drives the shared [`StepRunner`] dispatcher
//! and layers its own portal quirks around it — adding a portal is one new
//! `impl` plus a catalog entry, nothing else.

mod cartorio24h;
mod ri_digital;

pub use cartorio24h::Cartorio24h;
pub use ri_digital::RiDigital;

use crate::automation::interpreter::{StepError, StepRunner};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait SiteAutomator: Send + Sync {
    /// Tag the registry binds configs to.
    fn tag(&self) -> &'static str;

    /// Execute the config's declarative steps with site-specific handling.
    async fn fill_forms(&self, runner: &mut StepRunner) -> Result<(), StepError>;
}

/// The strategies shipped with the binary.
pub fn default_strategies() -> Vec<Arc<dyn SiteAutomator>> {
    vec![Arc::new(RiDigital), Arc::new(Cartorio24h)]
}
