//! Declarative automation configurations.
//!
//! One [`AutomationConfig`] per certificate type: the target portal URL, the
//! strategy tag that selects the site automator, the context fields the run
//! expects, and the ordered step list the interpreter executes. Configs are
//! immutable and loaded once at startup — the built-in catalog below, or an
//! `automations.json` override next to the binary.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// One declarative unit of browser interaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    WaitElement,
    Click,
    Fill,
    Select,
    SelectByCity,
    SelectByText,
    ToastMessage,
    CaptchaPause,
    CaptchaModal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub action: StepAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Step {
    pub fn selector(&self) -> &str {
        self.selector.as_deref().unwrap_or_default()
    }
}

/// Static description of one certificate type's automation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    pub id: String,
    pub name: String,
    pub target_url: String,
    pub site_type_tag: String,
    pub automator_tag: String,
    #[serde(default)]
    pub required_context_fields: Vec<String>,
    pub steps: Vec<Step>,
}

/// Built-in certificate catalog.
///
/// The JSON literal is the same shape `automations.json` uses, so operators
/// can dump this catalog, edit it, and drop it next to the binary.
pub fn builtin_catalog() -> Vec<AutomationConfig> {
    serde_json::from_value(serde_json::json!([
        {
            "id": "onus-reais",
            "name": "Certidão de Ônus Reais",
            "targetUrl": "https://ridigital.registradores.org.br/pedidos/certidao",
            "siteTypeTag": "ri-digital",
            "automatorTag": "ridigital",
            "requiredContextFields": [
                "owner.fullName",
                "owner.cpf",
                "property.registryNumber",
                "property.city"
            ],
            "steps": [
                { "action": "wait_element", "selector": "#painelComarcas" },
                { "action": "select_by_city", "selector": ".lista-comarcas a", "valueFromPath": "property.city" },
                { "action": "wait_element", "selector": "form#pedidoCertidao" },
                { "action": "fill", "selector": "#nomeInteressado", "valueFromPath": "owner.fullName" },
                { "action": "fill", "selector": "#cpfInteressado", "valueFromPath": "owner.cpf" },
                { "action": "fill", "selector": "#numeroMatricula", "valueFromPath": "property.registryNumber" },
                { "action": "select", "selector": "#tipoCertidao", "literalValue": "Ônus Reais" },
                { "action": "toast_message", "message": "Order form filled, submitting request" },
                { "action": "captcha_modal", "selector": "textarea[name='g-recaptcha-response']" },
                { "action": "click", "selector": "#btnSolicitar" },
                { "action": "wait_element", "selector": ".protocolo-gerado" },
                { "action": "toast_message", "message": "Request registered at the registry office" }
            ]
        },
        {
            "id": "inteiro-teor",
            "name": "Certidão de Inteiro Teor de Matrícula",
            "targetUrl": "https://ridigital.registradores.org.br/pedidos/certidao",
            "siteTypeTag": "ri-digital",
            "automatorTag": "ridigital",
            "requiredContextFields": [
                "owner.fullName",
                "owner.cpf",
                "property.registryNumber",
                "property.city"
            ],
            "steps": [
                { "action": "wait_element", "selector": "#painelComarcas" },
                { "action": "select_by_city", "selector": ".lista-comarcas a", "valueFromPath": "property.city" },
                { "action": "wait_element", "selector": "form#pedidoCertidao" },
                { "action": "fill", "selector": "#nomeInteressado", "valueFromPath": "owner.fullName" },
                { "action": "fill", "selector": "#cpfInteressado", "valueFromPath": "owner.cpf" },
                { "action": "fill", "selector": "#numeroMatricula", "valueFromPath": "property.registryNumber" },
                { "action": "select", "selector": "#tipoCertidao", "literalValue": "Inteiro Teor" },
                { "action": "captcha_modal", "selector": "textarea[name='g-recaptcha-response']" },
                { "action": "click", "selector": "#btnSolicitar" },
                { "action": "wait_element", "selector": ".protocolo-gerado" }
            ]
        },
        {
            "id": "escritura",
            "name": "Certidão de Escritura",
            "targetUrl": "https://www.cartorio24horas.com.br/solicitacao",
            "siteTypeTag": "cartorio-24h",
            "automatorTag": "cartorio24h",
            "requiredContextFields": ["owner.fullName", "owner.cpf"],
            "steps": [
                { "action": "wait_element", "selector": "#formBusca" },
                { "action": "select_by_text", "selector": ".menu-servicos a", "literalValue": "Escritura" },
                { "action": "wait_element", "selector": "#dadosSolicitante" },
                { "action": "fill", "selector": "#nome", "valueFromPath": "owner.fullName" },
                { "action": "fill", "selector": "#cpf", "valueFromPath": "owner.cpf" },
                { "action": "fill", "selector": "#livro", "valueFromPath": "property.deedBook" },
                { "action": "fill", "selector": "#folha", "valueFromPath": "property.deedPage" },
                { "action": "toast_message", "message": "Applicant data submitted, waiting out the challenge" },
                { "action": "captcha_pause" },
                { "action": "click", "selector": "#btnContinuar" },
                { "action": "wait_element", "selector": ".numero-protocolo" }
            ]
        }
    ]))
    .expect("built-in automation catalog is valid")
}

/// Load the certificate catalog: `automations.json` override when present,
/// built-in catalog otherwise. A malformed override is rejected as a whole —
/// half a catalog would silently break certificate types.
pub fn load_catalog(override_path: &Path) -> Vec<AutomationConfig> {
    match std::fs::read_to_string(override_path) {
        Ok(contents) => match serde_json::from_str::<Vec<AutomationConfig>>(&contents) {
            Ok(configs) if !configs.is_empty() => {
                info!(
                    "automation catalog: loaded {} config(s) from {}",
                    configs.len(),
                    override_path.display()
                );
                configs
            }
            Ok(_) => {
                warn!(
                    "automation catalog: {} is empty; using built-in catalog",
                    override_path.display()
                );
                builtin_catalog()
            }
            Err(e) => {
                warn!(
                    "automation catalog: parse error at {}: {} — using built-in catalog",
                    override_path.display(),
                    e
                );
                builtin_catalog()
            }
        },
        Err(_) => builtin_catalog(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_consistent() {
        let catalog = builtin_catalog();
        assert!(!catalog.is_empty());

        let mut ids = std::collections::HashSet::new();
        for config in &catalog {
            assert!(ids.insert(config.id.clone()), "duplicate config id");
            assert!(!config.steps.is_empty(), "{}: empty step list", config.id);
            assert!(
                config.target_url.starts_with("https://"),
                "{}: target url",
                config.id
            );
            for step in &config.steps {
                match step.action {
                    StepAction::ToastMessage => {
                        assert!(step.message.is_some(), "{}: toast without message", config.id)
                    }
                    StepAction::Fill => assert!(
                        step.value_from_path.is_some(),
                        "{}: fill without a context path",
                        config.id
                    ),
                    StepAction::CaptchaPause => {}
                    _ => assert!(
                        step.selector.is_some(),
                        "{}: {:?} without selector",
                        config.id,
                        step.action
                    ),
                }
            }
        }
    }

    #[test]
    fn step_round_trips_through_the_documented_shape() {
        let json = r#"{
            "action": "fill",
            "selector": "#cpf",
            "valueFromPath": "owner.cpf"
        }"#;
        let step: Step = serde_json::from_str(json).unwrap();
        assert_eq!(step.action, StepAction::Fill);
        assert_eq!(step.selector(), "#cpf");
        assert_eq!(step.value_from_path.as_deref(), Some("owner.cpf"));

        let wire = serde_json::to_value(&step).unwrap();
        assert_eq!(wire["valueFromPath"], "owner.cpf");
        assert!(wire.get("literalValue").is_none());
    }

    #[test]
    fn unknown_actions_are_rejected() {
        let json = r#"{ "action": "scroll", "selector": "#x" }"#;
        assert!(serde_json::from_str::<Step>(json).is_err());
    }

    #[test]
    fn missing_override_file_falls_back_to_builtin() {
        let catalog = load_catalog(Path::new("/nonexistent/automations.json"));
        assert_eq!(catalog.len(), builtin_catalog().len());
    }
}
