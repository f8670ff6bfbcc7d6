use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::hub::Hub;
use crate::protocol::{AgentRecord, Identity};

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    timestamp: DateTime<Utc>,
    agents_connected: usize,
    controller_connected: bool,
}

/// GET /health
pub async fn health(State(hub): State<Hub>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        timestamp: Utc::now(),
        agents_connected: hub.registry.agent_count(),
        controller_connected: hub.registry.has_controller(),
    })
}

#[derive(Debug, Serialize)]
pub struct AgentsResponse {
    count: usize,
    agents: Vec<AgentRecord>,
}

/// GET /api/agents, a roster snapshot for dashboards and scripts.
pub async fn list_agents(State(hub): State<Hub>) -> Json<AgentsResponse> {
    let agents = hub.registry.list_agents();
    Json(AgentsResponse {
        count: agents.len(),
        agents,
    })
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

/// POST /api/login, the upstream credential check for the trusted
/// controller registration form.
pub async fn login(
    State(hub): State<Hub>,
    Json(request): Json<LoginRequest>,
) -> (StatusCode, Json<LoginResponse>) {
    match hub.credentials.authenticate(&request.email, &request.password) {
        Some(user) => (
            StatusCode::OK,
            Json(LoginResponse {
                success: true,
                user: Some(user),
                error: None,
            }),
        ),
        None => {
            debug!(email = %request.email, "login rejected");
            (
                StatusCode::UNAUTHORIZED,
                Json(LoginResponse {
                    success: false,
                    user: None,
                    error: Some("invalid credentials"),
                }),
            )
        }
    }
}

/// GET /metrics, Prometheus exposition.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
