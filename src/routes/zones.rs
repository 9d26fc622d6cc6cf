//! User-drawn zones and the centrality reference layer (General database).

use crate::auth::{AuthConfig, auth_middleware};
use crate::db::DatabaseTarget;
use crate::error::DbResult;
use crate::geo::{FeatureCollection, FeatureCollectionBuilder, codec};
use crate::models::QueryParams;
use crate::routes::{AppState, or_degraded};
use axum::extract::{Query, State};
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

const CENTRALIDADES_SQL: &str = r#"SELECT "CLAVE_2", ST_AsGeoJSON(geom) AS geom
     FROM centralidad_barrial02
     WHERE "CLAVE_2" = :c"#;

const LIST_ZONAS_SQL: &str = "SELECT id, nombre, ST_AsGeoJSON(geom) AS geom \
     FROM mis_zonas \
     ORDER BY id DESC";

const INSERT_ZONA_SQL: &str = "INSERT INTO mis_zonas (nombre, geom) \
     VALUES (:nombre, ST_SetSRID(ST_GeomFromGeoJSON(:geom), 4326)) \
     RETURNING id";

#[derive(Debug, Deserialize)]
pub struct ReferenceQuery {
    pub clave: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ZonaCreate {
    pub nombre: String,
    pub geom: JsonValue,
}

#[derive(Debug, Serialize)]
pub struct ZonaCreated {
    pub mensaje: &'static str,
    pub id: JsonValue,
}

/// GET /zonas/capa-referencia-centralidades/?clave
async fn capa_referencia(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReferenceQuery>,
) -> DbResult<Json<FeatureCollection>> {
    let Some(clave) = query.clave.filter(|c| !c.trim().is_empty()) else {
        return Ok(Json(FeatureCollection::empty()));
    };

    let rows = or_degraded(
        state
            .gateway
            .execute_read(
                DatabaseTarget::General,
                CENTRALIDADES_SQL,
                &QueryParams::new().with("c", clave),
            )
            .await,
        "capa-referencia-centralidades",
    )?;
    Ok(Json(FeatureCollectionBuilder::new().build(rows)))
}

/// GET /zonas/mis_zonas/
async fn list_zonas(State(state): State<Arc<AppState>>) -> DbResult<Json<FeatureCollection>> {
    let rows = or_degraded(
        state
            .gateway
            .execute_read(DatabaseTarget::General, LIST_ZONAS_SQL, &QueryParams::new())
            .await,
        "mis_zonas",
    )?;
    Ok(Json(FeatureCollectionBuilder::new().build(rows)))
}

/// POST /zonas/mis_zonas/
async fn create_zona(
    State(state): State<Arc<AppState>>,
    Json(zona): Json<ZonaCreate>,
) -> DbResult<Json<ZonaCreated>> {
    let geom = codec::encode(&zona.geom)?;
    let params = QueryParams::new()
        .with("nombre", zona.nombre)
        .with("geom", geom);

    let outcome = state
        .gateway
        .execute_write(DatabaseTarget::General, INSERT_ZONA_SQL, &params)
        .await?;

    Ok(Json(ZonaCreated {
        mensaje: "Zona guardada exitosamente",
        id: outcome.into_value(),
    }))
}

pub fn router(auth: &Arc<AuthConfig>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/zonas/capa-referencia-centralidades/",
            get(capa_referencia),
        )
        .route(
            "/zonas/mis_zonas/",
            get(list_zonas).merge(post(create_zona).route_layer(
                middleware::from_fn_with_state(Arc::clone(auth), auth_middleware),
            )),
        )
}
