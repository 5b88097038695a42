use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tokio::sync::watch;
use crate::agent::AgentHandle;
use crate::lifecycle::{PassSummary, Trigger};
use shared::protocol::API_PREFIX;
use shared::types::{PrincipalType, ServiceStatus};

#[derive(Clone)]
pub struct AppState {
    pub agent: AgentHandle,
    pub hash_rx: watch::Receiver<String>,
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/services", get(get_services))
        .route("/services/:name", get(get_service))
        .route("/services/:name/stop", post(stop_service))
        .route("/evaluate", post(evaluate))
        .route("/relations/hash", get(get_hash))
        .route("/credentials/:principal/:id", get(get_credential));

    Router::new()
        .nest(API_PREFIX, v1)
        .with_state(state)
}

fn internal_error(context: &str, e: anyhow::Error) -> StatusCode {
    tracing::error!("{}: {:#}", context, e);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn get_services(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServiceStatus>>, StatusCode> {
    state
        .agent
        .status()
        .await
        .map(Json)
        .map_err(|e| internal_error("Failed to query services", e))
}

async fn get_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServiceStatus>, StatusCode> {
    state
        .agent
        .status_of(name)
        .await
        .map_err(|e| internal_error("Failed to query service", e))?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn stop_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServiceStatus>, StatusCode> {
    match state.agent.status_of(name.clone()).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => return Err(internal_error("Failed to query service", e)),
    }

    state
        .agent
        .stop(name)
        .await
        .map(Json)
        .map_err(|e| internal_error("Failed to stop service", e))
}

async fn evaluate(State(state): State<AppState>) -> Result<Json<PassSummary>, StatusCode> {
    state
        .agent
        .evaluate(Trigger::Manual)
        .await
        .map(Json)
        .map_err(|e| internal_error("Evaluation failed", e))
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.hash_rx.borrow().clone()
}

async fn get_credential(
    State(state): State<AppState>,
    Path((principal, id)): Path<(String, String)>,
) -> Result<String, StatusCode> {
    let principal: PrincipalType = principal.parse().map_err(|_| StatusCode::BAD_REQUEST)?;

    state
        .agent
        .lookup(principal, id)
        .await
        .map_err(|e| internal_error("Credential lookup failed", e))?
        .ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::tests::{harness, publish_complete};

    fn state() -> AppState {
        let h = harness();
        publish_complete(&h.relations);
        let (_hash_tx, hash_rx) = watch::channel(String::new());
        AppState {
            agent: AgentHandle::spawn(h.manager),
            hash_rx,
        }
    }

    async fn credential(state: &AppState, principal: &str, id: &str) -> Result<String, StatusCode> {
        get_credential(
            State(state.clone()),
            Path((principal.to_string(), id.to_string())),
        )
        .await
    }

    #[tokio::test]
    async fn test_credential_status_codes() {
        let state = state();

        let text = credential(&state, "client", "admin").await.unwrap();
        assert!(text.contains("key = AQBk"));

        assert_eq!(credential(&state, "osd", "7").await, Err(StatusCode::NOT_FOUND));
        assert_eq!(credential(&state, "rgw", "gateway").await, Err(StatusCode::BAD_REQUEST));

        state.agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_service_is_not_found() {
        let state = state();

        let missing = get_service(State(state.clone()), Path("radosgw".to_string())).await;
        assert_eq!(missing.err(), Some(StatusCode::NOT_FOUND));

        let stop = stop_service(State(state.clone()), Path("radosgw".to_string())).await;
        assert_eq!(stop.err(), Some(StatusCode::NOT_FOUND));

        state.agent.shutdown().await.unwrap();
    }
}
