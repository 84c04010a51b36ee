use crate::state::AppState;
use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub connections: usize,
    pub sessions: usize,
    pub timestamp: DateTime<Utc>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.router.counts().await;

    Json(HealthResponse {
        status: "healthy".to_string(),
        connections: counts.connections,
        sessions: counts.sessions,
        timestamp: Utc::now(),
    })
}
