//! Comments attached to map features (General database).

use crate::auth::{AuthConfig, auth_middleware};
use crate::db::DatabaseTarget;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParams, Row};
use crate::routes::{AppState, or_degraded};
use axum::extract::{Path, State};
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

const INSERT_COMMENT_SQL: &str = "INSERT INTO comments (feature_id, content) \
     VALUES (:feature_id, :content) \
     RETURNING id";

const LIST_COMMENTS_SQL: &str = "SELECT id, content, created_at \
     FROM comments \
     WHERE feature_id = :feature_id \
     ORDER BY created_at DESC, id DESC";

#[derive(Debug, Deserialize)]
pub struct CommentCreate {
    pub feature_id: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CommentCreated {
    pub message: &'static str,
    pub comment_id: JsonValue,
}

/// POST /comentarios/
async fn create_comment(
    State(state): State<Arc<AppState>>,
    Json(comment): Json<CommentCreate>,
) -> DbResult<Json<CommentCreated>> {
    if comment.content.trim().is_empty() {
        return Err(DbError::invalid_input("Comentario vacío"));
    }

    let params = QueryParams::new()
        .with("feature_id", comment.feature_id)
        .with("content", comment.content);
    let outcome = state
        .gateway
        .execute_write(DatabaseTarget::General, INSERT_COMMENT_SQL, &params)
        .await?;

    Ok(Json(CommentCreated {
        message: "Comentario guardado",
        comment_id: outcome.into_value(),
    }))
}

/// GET /comentarios/{feature_id} - newest first
async fn list_comments(
    State(state): State<Arc<AppState>>,
    Path(feature_id): Path<String>,
) -> DbResult<Json<Vec<Row>>> {
    let rows = or_degraded(
        state
            .gateway
            .execute_read(
                DatabaseTarget::General,
                LIST_COMMENTS_SQL,
                &QueryParams::new().with("feature_id", feature_id),
            )
            .await,
        "comentarios",
    )?;
    Ok(Json(rows))
}

pub fn router(auth: &Arc<AuthConfig>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/comentarios/",
            post(create_comment).route_layer(middleware::from_fn_with_state(
                Arc::clone(auth),
                auth_middleware,
            )),
        )
        .route("/comentarios/{feature_id}", get(list_comments))
}
