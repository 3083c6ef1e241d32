use certcrawl::automation::config::builtin_catalog;
use certcrawl::automation::{AutomationError, AutomationRegistry, RunContext};
use certcrawl::core::config::CrawlConfig;
use certcrawl::core::types::RunKey;
use certcrawl::{AppState, ConnectionRegistry, StatusEvent};
use tokio::sync::mpsc;
use uuid::Uuid;

fn sample_context() -> RunContext {
    RunContext::new(serde_json::json!({
        "requester": { "name": "Imobiliária Horizonte" },
        "owner": { "fullName": "Maria Santos", "cpf": "111.222.333-44" },
        "property": { "registryNumber": 48712, "city": "Rio de Janeiro" }
    }))
}

#[test]
fn factory_rejects_unknown_certificates_before_any_browser_work() {
    let registry = AutomationRegistry::new(builtin_catalog());
    let err = registry
        .create("certidao-negativa", sample_context(), 1)
        .unwrap_err();
    assert!(matches!(err, AutomationError::ConfigurationNotFound(_)));
}

#[test]
fn factory_rejects_configs_with_an_unbound_strategy_tag() {
    let mut rogue = builtin_catalog().remove(0);
    rogue.id = "penhor-rural".to_string();
    rogue.automator_tag = "portal-que-nao-existe".to_string();

    let registry = AutomationRegistry::new(vec![rogue]);
    let err = registry
        .create("penhor-rural", sample_context(), 1)
        .unwrap_err();
    match err {
        AutomationError::StrategyNotRegistered(tag) => {
            assert_eq!(tag, "portal-que-nao-existe")
        }
        other => panic!("expected StrategyNotRegistered, got {:?}", other),
    }
}

#[test]
fn every_builtin_certificate_binds_with_the_shipped_strategies() {
    let registry = AutomationRegistry::new(builtin_catalog());
    for id in registry.certificate_ids() {
        let bound = registry
            .create(id, sample_context(), 1)
            .unwrap_or_else(|e| panic!("{} failed to bind: {}", id, e));
        assert_eq!(bound.config().id, id);
        assert_eq!(bound.user_id(), 1);
    }
}

#[tokio::test]
async fn publishing_without_a_connection_is_a_silent_drop() {
    let channel = ConnectionRegistry::new();
    channel.publish(999, StatusEvent::new("onus-reais", "step", "no one listening"));
    assert!(channel.is_empty());
}

#[tokio::test]
async fn a_second_registration_replaces_the_first() {
    let channel = ConnectionRegistry::new();
    let (tx_first, mut rx_first) = mpsc::unbounded_channel();
    let (tx_second, mut rx_second) = mpsc::unbounded_channel();

    channel.register(7, Uuid::new_v4(), tx_first);
    channel.register(7, Uuid::new_v4(), tx_second);
    assert_eq!(channel.len(), 1, "at most one connection per user id");

    channel.publish(7, StatusEvent::new("onus-reais", "phase", "form filled"));
    assert!(rx_second.try_recv().is_ok());
    assert!(rx_first.try_recv().is_err());
}

#[tokio::test]
async fn events_reach_the_registered_user_in_order() {
    let channel = ConnectionRegistry::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    channel.register(3, Uuid::new_v4(), tx);

    for status in ["page_loaded", "step", "completed"] {
        channel.publish(3, StatusEvent::new("escritura", status, status));
    }

    for expected in ["page_loaded", "step", "completed"] {
        let event = rx.try_recv().expect("event delivered");
        assert_eq!(event.status, expected);
        assert_eq!(event.certificate_id, "escritura");
    }
}

#[tokio::test]
async fn duplicate_runs_for_the_same_pair_are_rejected() {
    let state = AppState::new(CrawlConfig::default());
    let key = RunKey {
        property_id: "prop-9".into(),
        certificate_id: "onus-reais".into(),
    };

    assert!(state.claim_run(key.clone()));
    assert!(!state.claim_run(key.clone()), "second identical run rejected");

    // A different certificate for the same property is its own run.
    assert!(state.claim_run(RunKey {
        property_id: "prop-9".into(),
        certificate_id: "escritura".into(),
    }));

    state.release_run(&key);
    assert!(state.claim_run(key));
}

#[test]
fn builtin_catalog_steps_cover_the_captcha_strategies() {
    use certcrawl::automation::StepAction;

    let catalog = builtin_catalog();
    let modal = catalog
        .iter()
        .flat_map(|c| &c.steps)
        .any(|s| s.action == StepAction::CaptchaModal);
    let pause = catalog
        .iter()
        .flat_map(|c| &c.steps)
        .any(|s| s.action == StepAction::CaptchaPause);
    assert!(modal, "catalog exercises the handoff coordinator");
    assert!(pause, "catalog exercises the legacy pause strategy");
}
