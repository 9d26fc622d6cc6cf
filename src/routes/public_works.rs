//! Municipal public-works records (Secondary database).

use crate::auth::{AuthConfig, auth_middleware};
use crate::db::{DatabaseGateway, DatabaseTarget};
use crate::error::DbResult;
use crate::geo::codec;
use crate::models::{QueryParams, Row};
use crate::routes::{AppState, or_degraded};
use axum::extract::State;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

const STATS_2025_SQL: &str = "SELECT tipo_proy AS label, COUNT(*) AS total \
     FROM faismun_2025 GROUP BY tipo_proy ORDER BY total DESC";

const STATS_2024_SQL: &str = "SELECT tipo AS label, COUNT(*) AS total \
     FROM faismun_2024_geo GROUP BY tipo ORDER BY total DESC";

const STATS_2023_SQL: &str = "SELECT tipo AS label, COUNT(*) AS total \
     FROM faismun_2023_geo GROUP BY tipo ORDER BY total DESC";

const INSERT_OBRA_SQL: &str = "INSERT INTO faismun_2024_geo (obra_accio, no_aprobac, colonia, geom) \
     VALUES (:nombre_obra, :num_aprobacion, :colonia, ST_SetSRID(ST_GeomFromGeoJSON(:geometry), 4326)) \
     RETURNING id";

const UNCLASSIFIED: &str = "Sin Clasificar";

/// One bar of a per-year project-type chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatEntry {
    pub label: String,
    pub value: JsonValue,
}

impl From<Row> for StatEntry {
    fn from(row: Row) -> Self {
        let label = row
            .get_non_null("label")
            .map(|v| match v {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNCLASSIFIED.to_string());
        let value = row.get("total").cloned().unwrap_or(JsonValue::from(0));
        Self { label, value }
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectStats {
    pub anio_2025: Vec<StatEntry>,
    pub anio_2024: Vec<StatEntry>,
    pub anio_2023: Vec<StatEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ObraNueva {
    pub colonia: String,
    pub nombre_obra: String,
    pub num_aprobacion: String,
    pub geometry: JsonValue,
}

#[derive(Debug, Serialize)]
pub struct ObraCreated {
    pub status: &'static str,
    pub id: JsonValue,
    pub mensaje: &'static str,
}

async fn year_stats(
    gateway: &DatabaseGateway,
    sql: &str,
    endpoint: &'static str,
) -> DbResult<Vec<StatEntry>> {
    let rows = or_degraded(
        gateway
            .execute_read(DatabaseTarget::Secondary, sql, &QueryParams::new())
            .await,
        endpoint,
    )?;
    Ok(rows.into_iter().map(StatEntry::from).collect())
}

/// GET /visop/estadisticas/obras - each year degrades to `[]` on its own
async fn estadisticas(State(state): State<Arc<AppState>>) -> DbResult<Json<ProjectStats>> {
    let gateway = state.gateway.as_ref();
    let (anio_2025, anio_2024, anio_2023) = tokio::join!(
        year_stats(gateway, STATS_2025_SQL, "estadisticas-2025"),
        year_stats(gateway, STATS_2024_SQL, "estadisticas-2024"),
        year_stats(gateway, STATS_2023_SQL, "estadisticas-2023"),
    );

    Ok(Json(ProjectStats {
        anio_2025: anio_2025?,
        anio_2024: anio_2024?,
        anio_2023: anio_2023?,
    }))
}

/// POST /visop/obras/crear
async fn crear_obra(
    State(state): State<Arc<AppState>>,
    Json(obra): Json<ObraNueva>,
) -> DbResult<Json<ObraCreated>> {
    let geometry = codec::encode(&obra.geometry)?;
    let params = QueryParams::new()
        .with("nombre_obra", obra.nombre_obra)
        .with("num_aprobacion", obra.num_aprobacion)
        .with("colonia", obra.colonia)
        .with("geometry", geometry);

    let outcome = state
        .gateway
        .execute_write(DatabaseTarget::Secondary, INSERT_OBRA_SQL, &params)
        .await?;

    Ok(Json(ObraCreated {
        status: "ok",
        id: outcome.into_value(),
        mensaje: "Obra registrada correctamente",
    }))
}

pub fn router(auth: &Arc<AuthConfig>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/visop/estadisticas/obras", get(estadisticas))
        .route(
            "/visop/obras/crear",
            post(crear_obra).route_layer(middleware::from_fn_with_state(
                Arc::clone(auth),
                auth_middleware,
            )),
        )
}
