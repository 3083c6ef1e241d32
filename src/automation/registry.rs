//! Automator registry and factory.
//!
//! Maps certificate ids to their [`AutomationConfig`] and `automator_tag`s to
//! the [`SiteAutomator`] strategy implementing them. `create` binds the three
//! pieces into a [`BoundAutomator`] without touching a browser — both failure
//! modes surface synchronously, before any navigation.

use crate::automation::automators::{default_strategies, SiteAutomator};
use crate::automation::config::AutomationConfig;
use crate::automation::context::RunContext;
use crate::automation::interpreter::BoundAutomator;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("no automation configuration registered for certificate '{0}'")]
    ConfigurationNotFound(String),

    #[error("no automator strategy bound for tag '{0}'")]
    StrategyNotRegistered(String),

    #[error("a run for property '{property_id}' / certificate '{certificate_id}' is already in flight")]
    RunAlreadyInFlight {
        property_id: String,
        certificate_id: String,
    },
}

pub struct AutomationRegistry {
    configs: HashMap<String, Arc<AutomationConfig>>,
    strategies: HashMap<&'static str, Arc<dyn SiteAutomator>>,
}

impl AutomationRegistry {
    /// Build the registry from a loaded catalog and the default strategy set.
    pub fn new(catalog: Vec<AutomationConfig>) -> Self {
        let mut registry = Self {
            configs: HashMap::new(),
            strategies: HashMap::new(),
        };
        for strategy in default_strategies() {
            registry.bind_strategy(strategy);
        }
        for config in catalog {
            registry.add_config(config);
        }
        registry
    }

    /// Registry with no strategies bound — test seam for the factory errors.
    #[cfg(test)]
    pub(crate) fn without_strategies(catalog: Vec<AutomationConfig>) -> Self {
        let mut registry = Self {
            configs: HashMap::new(),
            strategies: HashMap::new(),
        };
        for config in catalog {
            registry.add_config(config);
        }
        registry
    }

    pub fn bind_strategy(&mut self, strategy: Arc<dyn SiteAutomator>) {
        if self.strategies.insert(strategy.tag(), strategy).is_some() {
            warn!("automator strategy re-bound; the latest registration wins");
        }
    }

    pub fn add_config(&mut self, config: AutomationConfig) {
        if url::Url::parse(&config.target_url).is_err() {
            warn!(
                "config '{}' has an unparseable target url '{}'; runs will fail at navigation",
                config.id, config.target_url
            );
        }
        if !self.strategies.contains_key(config.automator_tag.as_str()) {
            warn!(
                "config '{}' references unbound automator tag '{}'; runs will fail at create time",
                config.id, config.automator_tag
            );
        }
        if let Some(prior) = self.configs.insert(config.id.clone(), Arc::new(config)) {
            warn!("config '{}' re-registered; the latest entry wins", prior.id);
        }
    }

    pub fn config(&self, certificate_id: &str) -> Option<&Arc<AutomationConfig>> {
        self.configs.get(certificate_id)
    }

    pub fn certificate_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.configs.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Bind a certificate's config and strategy to a context and owning user.
    ///
    /// Missing required context fields are reported but not fatal — the
    /// `fill` steps that need them skip explicitly at run time.
    pub fn create(
        &self,
        certificate_id: &str,
        context: RunContext,
        user_id: i64,
    ) -> Result<BoundAutomator, AutomationError> {
        let config = self
            .configs
            .get(certificate_id)
            .cloned()
            .ok_or_else(|| AutomationError::ConfigurationNotFound(certificate_id.to_string()))?;

        let strategy = self
            .strategies
            .get(config.automator_tag.as_str())
            .cloned()
            .ok_or_else(|| AutomationError::StrategyNotRegistered(config.automator_tag.clone()))?;

        for field in &config.required_context_fields {
            if !context.has(field) {
                warn!(
                    certificate_id,
                    field, "required context field missing; the fill step will skip it"
                );
            }
        }

        Ok(BoundAutomator {
            strategy,
            config,
            context,
            user_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::config::builtin_catalog;
    use serde_json::json;

    fn context() -> RunContext {
        RunContext::new(json!({
            "owner": { "fullName": "Maria Santos", "cpf": "111.222.333-44" },
            "property": { "registryNumber": 48712, "city": "Rio de Janeiro" }
        }))
    }

    #[test]
    fn create_binds_config_context_and_user() {
        let registry = AutomationRegistry::new(builtin_catalog());
        let bound = registry.create("onus-reais", context(), 7).unwrap();
        assert_eq!(bound.config().id, "onus-reais");
        assert_eq!(bound.user_id(), 7);
    }

    #[test]
    fn unknown_certificate_is_configuration_not_found() {
        let registry = AutomationRegistry::new(builtin_catalog());
        let err = registry
            .create("certidao-inexistente", context(), 7)
            .unwrap_err();
        assert!(matches!(err, AutomationError::ConfigurationNotFound(_)));
    }

    #[test]
    fn unbound_automator_tag_is_strategy_not_registered() {
        // No strategies bound at all — the config resolves, its tag does not,
        // and the failure happens before any browser work.
        let registry = AutomationRegistry::without_strategies(builtin_catalog());
        let err = registry.create("onus-reais", context(), 7).unwrap_err();
        match err {
            AutomationError::StrategyNotRegistered(tag) => assert_eq!(tag, "ridigital"),
            other => panic!("expected StrategyNotRegistered, got {:?}", other),
        }
    }

    #[test]
    fn missing_required_fields_do_not_fail_creation() {
        let registry = AutomationRegistry::new(builtin_catalog());
        let sparse = RunContext::new(json!({ "owner": { "fullName": "Maria Santos" } }));
        assert!(registry.create("onus-reais", sparse, 7).is_ok());
    }

    #[test]
    fn every_builtin_config_has_a_bound_strategy() {
        let registry = AutomationRegistry::new(builtin_catalog());
        for id in registry.certificate_ids() {
            let config = registry.config(id).unwrap();
            assert!(
                registry.create(&config.id, context(), 1).is_ok(),
                "{} should bind",
                id
            );
        }
    }
}
