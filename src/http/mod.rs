//! HTTP surface: the automation trigger endpoint, the health probe and the
//! WebSocket upgrade route.

use crate::automation::interpreter::RunEnv;
use crate::automation::registry::AutomationError;
use crate::core::types::{ErrorResponse, RunKey};
use crate::ws::handler::ws_handler;
use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub property_id: String,
    pub certificate_id: String,
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAccepted {
    pub run_id: String,
    pub certificate_id: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/api/automations", post(start_automation))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Trigger one automation run.
///
/// Setup-time failures (unknown certificate, unbound strategy, missing
/// context, duplicate run) surface synchronously; everything after the 202
/// travels over the status feed.
async fn start_automation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RunRequest>,
) -> Result<(StatusCode, Json<RunAccepted>), (StatusCode, Json<ErrorResponse>)> {
    let context = state
        .context_provider
        .resolve(&request.property_id)
        .await
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
        })?;

    let key = RunKey {
        property_id: request.property_id.clone(),
        certificate_id: request.certificate_id.clone(),
    };
    if !state.claim_run(key.clone()) {
        let err = AutomationError::RunAlreadyInFlight {
            property_id: request.property_id.clone(),
            certificate_id: request.certificate_id.clone(),
        };
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        ));
    }

    let bound = match state
        .automations
        .create(&request.certificate_id, context, request.user_id)
    {
        Ok(b) => b,
        Err(e) => {
            state.release_run(&key);
            let status = match &e {
                AutomationError::ConfigurationNotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            return Err((
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ));
        }
    };

    let run_id = Uuid::new_v4().to_string();
    info!(
        run_id,
        property_id = %request.property_id,
        certificate_id = %request.certificate_id,
        user_id = request.user_id,
        "automation run accepted"
    );

    let env = RunEnv {
        channel: Arc::clone(&state.channel),
        config: Arc::clone(&state.config),
    };
    let task_state = Arc::clone(&state);
    let task_run_id = run_id.clone();
    tokio::spawn(async move {
        // The semaphore bounds concurrent browser launches; a closed
        // semaphore only happens at shutdown, where skipping the run is fine.
        let Ok(_permit) = task_state.run_limit.clone().acquire_owned().await else {
            task_state.release_run(&key);
            return;
        };

        let outcome = bound.run(env).await;
        task_state.release_run(&key);

        match outcome.protocol() {
            Some(protocol) => info!(run_id = %task_run_id, protocol, "automation run succeeded"),
            None => info!(
                run_id = %task_run_id,
                error = outcome.error().unwrap_or_default(),
                "automation run failed"
            ),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            run_id,
            certificate_id: request.certificate_id,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_request_uses_the_documented_shape() {
        let request: RunRequest = serde_json::from_str(
            r#"{ "propertyId": "prop-1", "certificateId": "onus-reais", "userId": 7 }"#,
        )
        .unwrap();
        assert_eq!(request.property_id, "prop-1");
        assert_eq!(request.certificate_id, "onus-reais");
        assert_eq!(request.user_id, 7);
    }

    #[test]
    fn run_accepted_serializes_camel_case() {
        let wire = serde_json::to_value(RunAccepted {
            run_id: "r-1".into(),
            certificate_id: "onus-reais".into(),
        })
        .unwrap();
        assert_eq!(wire["runId"], "r-1");
        assert_eq!(wire["certificateId"], "onus-reais");
    }
}
