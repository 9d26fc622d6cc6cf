//! HTTP route handlers organized by resource.

pub mod comments;
pub mod geography;
pub mod health;
pub mod public_works;
pub mod zones;

use crate::auth::AuthConfig;
use crate::db::DatabaseGateway;
use crate::error::DbResult;
use axum::Router;
use std::sync::Arc;
use tracing::warn;

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub gateway: Arc<DatabaseGateway>,
    pub auth: Arc<AuthConfig>,
}

impl AppState {
    pub fn new(gateway: Arc<DatabaseGateway>, auth: Arc<AuthConfig>) -> Self {
        Self { gateway, auth }
    }
}

/// Every API route, without prefix or outer layers.
///
/// Write routes sit behind the bearer-token middleware; reads are public.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(geography::router())
        .merge(zones::router(&state.auth))
        .merge(public_works::router(&state.auth))
        .merge(comments::router(&state.auth))
        .with_state(state)
}

/// Turn statement-level read failures into an empty answer.
///
/// Query and timeout errors are logged and replaced by `T::default()`; an
/// unavailable pool and every other error still fail the request.
pub(crate) fn or_degraded<T: Default>(result: DbResult<T>, endpoint: &'static str) -> DbResult<T> {
    match result {
        Err(e) if e.is_degradable() => {
            warn!(endpoint, error = %e, "Read failed, serving empty result");
            Ok(T::default())
        }
        other => other,
    }
}
