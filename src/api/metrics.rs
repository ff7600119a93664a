use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::api::AppState;

const CONTENT_TYPE: (&str, &str) = ("content-type", "text/plain; version=0.0.4; charset=utf-8");

/// Prometheus metrics endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, [CONTENT_TYPE], handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [CONTENT_TYPE],
            "# metrics recorder not installed\n".to_string(),
        ),
    }
}
