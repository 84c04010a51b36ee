//! ZLRemote signaling server library
//!
//! This module exposes the server components for testing and embedding.

pub mod api;
pub mod error;
pub mod signaling;
pub mod state;
pub mod tasks;
pub mod ws;

/// Create the application router together with the state it serves
pub fn create_app(config: state::Config) -> (axum::Router, state::AppState) {
    let app_state = state::AppState::new(config);
    let router = api::create_router(app_state.clone());
    (router, app_state)
}
