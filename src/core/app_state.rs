use crate::automation::config::load_catalog;
use crate::automation::registry::AutomationRegistry;
use crate::core::config::CrawlConfig;
use crate::core::context_provider::{ContextProvider, JsonContextProvider};
use crate::core::types::RunKey;
use crate::ws::broadcast::ConnectionRegistry;
use dashmap::DashMap;
use std::sync::Arc;

/// Process-wide state: constructed once at server start, torn down with the
/// process, injected everywhere through the router — never referenced as a
/// module-level global.
pub struct AppState {
    /// Per-user live connection registry for the status feed.
    pub channel: Arc<ConnectionRegistry>,
    /// Certificate configs + automator strategies.
    pub automations: Arc<AutomationRegistry>,
    /// Resolves property ids into run contexts (collaborator seam).
    pub context_provider: Arc<dyn ContextProvider>,
    /// Bounds concurrently running hidden browser sessions.
    pub run_limit: Arc<tokio::sync::Semaphore>,
    /// File-based config loaded from `certcrawl.json` (env-var fallbacks).
    pub config: Arc<CrawlConfig>,

    // One entry per in-flight (property, certificate) pair — duplicate
    // triggers are rejected until the running automation releases its key.
    active_runs: DashMap<RunKey, ()>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("connections", &self.channel.len())
            .field("active_runs", &self.active_runs.len())
            .finish()
    }
}

impl AppState {
    pub fn new(config: CrawlConfig) -> Self {
        let catalog = load_catalog(&config.resolve_automations_file());
        let context_provider: Arc<dyn ContextProvider> =
            Arc::new(JsonContextProvider::new(config.resolve_context_dir()));
        let run_limit = Arc::new(tokio::sync::Semaphore::new(config.resolve_run_limit()));

        Self {
            channel: Arc::new(ConnectionRegistry::new()),
            automations: Arc::new(AutomationRegistry::new(catalog)),
            context_provider,
            run_limit,
            config: Arc::new(config),
            active_runs: DashMap::new(),
        }
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context_provider = provider;
        self
    }

    /// Claim the in-flight key for a run. `false` means an identical run is
    /// already executing and the trigger must be rejected.
    pub fn claim_run(&self, key: RunKey) -> bool {
        match self.active_runs.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                true
            }
        }
    }

    /// Release the in-flight key. Called on every run exit path.
    pub fn release_run(&self, key: &RunKey) {
        self.active_runs.remove(key);
    }

    pub fn active_run_count(&self) -> usize {
        self.active_runs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RunKey {
        RunKey {
            property_id: "prop-1".into(),
            certificate_id: "onus-reais".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_claims_are_rejected_until_release() {
        let state = AppState::new(CrawlConfig::default());
        assert!(state.claim_run(key()));
        assert!(!state.claim_run(key()));

        state.release_run(&key());
        assert!(state.claim_run(key()));
    }

    #[tokio::test]
    async fn distinct_pairs_do_not_contend() {
        let state = AppState::new(CrawlConfig::default());
        assert!(state.claim_run(key()));
        assert!(state.claim_run(RunKey {
            property_id: "prop-1".into(),
            certificate_id: "inteiro-teor".into(),
        }));
        assert_eq!(state.active_run_count(), 2);
    }
}
