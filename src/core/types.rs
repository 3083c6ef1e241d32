use serde::{Deserialize, Serialize};

/// Final result of one automation run.
///
/// Constructed only through [`Outcome::success`] / [`Outcome::failure`] so a
/// successful outcome always carries a non-empty protocol and a failed one a
/// non-empty error — never both, never neither.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Outcome {
    pub fn success(protocol: impl Into<String>) -> Self {
        let protocol = protocol.into();
        debug_assert!(!protocol.is_empty());
        Self {
            success: true,
            protocol: Some(protocol),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.is_empty() {
            "automation failed".to_string()
        } else {
            error
        };
        Self {
            success: false,
            protocol: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// One live-progress event pushed to the requesting user over the duplex
/// connection. Wire shape:
/// `{ "type": "automation_update", "certificateId", "status", "log", "data"? }`
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    #[serde(rename = "type")]
    kind: &'static str,
    pub certificate_id: String,
    pub status: String,
    pub log: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StatusEvent {
    pub fn new(
        certificate_id: impl Into<String>,
        status: impl Into<String>,
        log: impl Into<String>,
    ) -> Self {
        Self {
            kind: "automation_update",
            certificate_id: certificate_id.into(),
            status: status.into(),
            log: log.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Messages pushed by a WebSocket client. Today only registration:
/// `{ "type": "register", "userId": 42 }`
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Register {
        #[serde(rename = "userId")]
        user_id: i64,
    },
}

/// Identity of one in-flight run, used to reject duplicate concurrent runs
/// for the same certificate request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RunKey {
    pub property_id: String,
    pub certificate_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_success_and_error_are_exclusive() {
        let ok = Outcome::success("2024.123456");
        assert!(ok.is_success());
        assert_eq!(ok.protocol(), Some("2024.123456"));
        assert!(ok.error().is_none());

        let err = Outcome::failure("element not found: #cpf");
        assert!(!err.is_success());
        assert!(err.protocol().is_none());
        assert_eq!(err.error(), Some("element not found: #cpf"));
    }

    #[test]
    fn failure_never_carries_an_empty_message() {
        let err = Outcome::failure("");
        assert!(err.error().map(|e| !e.is_empty()).unwrap_or(false));
    }

    #[test]
    fn status_event_wire_shape() {
        let event = StatusEvent::new("onus-reais", "completed", "protocol issued")
            .with_data(serde_json::json!({ "protocol": "2024.1" }));
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["type"], "automation_update");
        assert_eq!(wire["certificateId"], "onus-reais");
        assert_eq!(wire["status"], "completed");
        assert_eq!(wire["data"]["protocol"], "2024.1");
    }

    #[test]
    fn register_message_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{ "type": "register", "userId": 7 }"#).unwrap();
        let ClientMessage::Register { user_id } = msg;
        assert_eq!(user_id, 7);
    }
}
