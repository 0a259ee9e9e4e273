use axum::{Json, Router, extract::State, routing::get};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::db::{ConnectionManager, Connector, DatabaseConnection};
use crate::error::RotorError;

pub struct RotorState<C: Connector> {
    pub connections: Arc<ConnectionManager<C>>,
}

impl<C: Connector> RotorState<C> {
    pub fn new(connections: Arc<ConnectionManager<C>>) -> Self {
        Self { connections }
    }
}

impl<C: Connector> Clone for RotorState<C> {
    fn clone(&self) -> Self {
        Self {
            connections: self.connections.clone(),
        }
    }
}

pub fn rotor_router<C: Connector>(state: RotorState<C>) -> Router {
    Router::new()
        .route("/healthz", get(healthz::<C>))
        .with_state(state)
}

/// 200 while the active connection answers a ping, 503 otherwise.
async fn healthz<C: Connector>(
    State(state): State<RotorState<C>>,
) -> Result<Json<Value>, RotorError> {
    let connection = state.connections.active_connection()?;
    connection.ping().await?;
    Ok(Json(json!({ "status": "ok" })))
}
