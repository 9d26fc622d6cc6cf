//! Census, neighbourhood, street and business-registry layers (General database).

use crate::db::DatabaseTarget;
use crate::error::{DbError, DbResult};
use crate::geo::{BoundingBox, FeatureCollection, FeatureCollectionBuilder};
use crate::models::{QueryParams, Row};
use crate::routes::{AppState, or_degraded};
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

const INFO_MANZANA_SQL: &str = "SELECT cvegeo, pobtot, vivtot, pobfem, pobmas \
     FROM cpyv_2020 \
     WHERE ST_Contains(wkb_geometry, ST_SetSRID(ST_MakePoint(:lon, :lat), 4326))";

const COLONIAS_SQL: &str = r#"SELECT "NOM_ASEN" AS nom_asen, "POBTOT" AS pobtot, ST_AsGeoJSON(geom) AS geom
     FROM "COLONIAS_2023_POB2020_UTM"
     ORDER BY "NOM_ASEN" ASC"#;

const VIALIDADES_SQL: &str = r#"SELECT "NOMVIAL" AS nom_vial, ST_AsGeoJSON(geom) AS geom
     FROM "VIALIDADES_TUXTLA_UTM"
     WHERE geom && ST_MakeEnvelope(:min_lon, :min_lat, :max_lon, :max_lat, 4326)
     LIMIT 1000"#;

const DENUE_SQL: &str = "SELECT id, nom_estab, nombre_act, ST_AsGeoJSON(geom) AS geom \
     FROM denue_tuxtla_cb_2026 \
     WHERE geom && ST_MakeEnvelope(:min_lon, :min_lat, :max_lon, :max_lat, 4326) \
     LIMIT 50000";

#[derive(Debug, Deserialize)]
pub struct PointQuery {
    pub lat: f64,
    pub lon: f64,
}

impl PointQuery {
    fn validate(&self) -> DbResult<()> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(DbError::invalid_input(format!(
                "lat must be within [-90, 90], got {}",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(DbError::invalid_input(format!(
                "lon must be within [-180, 180], got {}",
                self.lon
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct BboxQuery {
    pub in_bbox: Option<String>,
}

impl BboxQuery {
    /// `None` when no box was sent.
    fn bbox(&self) -> DbResult<Option<BoundingBox>> {
        match self.in_bbox.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw.parse().map(Some),
        }
    }
}

/// Census block summary.
#[derive(Debug, Serialize)]
pub struct BlockInfo {
    pub clave_geo: JsonValue,
    pub poblacion_total: JsonValue,
    pub viviendas: JsonValue,
    pub mujeres: JsonValue,
    pub hombres: JsonValue,
}

impl From<Row> for BlockInfo {
    fn from(row: Row) -> Self {
        let field = |name: &str| row.get(name).cloned().unwrap_or(JsonValue::Null);
        Self {
            clave_geo: field("cvegeo"),
            poblacion_total: field("pobtot"),
            viviendas: field("vivtot"),
            mujeres: field("pobfem"),
            hombres: field("pobmas"),
        }
    }
}

/// GET /info-manzana/?lat&lon - census block containing the point
async fn info_manzana(
    State(state): State<Arc<AppState>>,
    Query(point): Query<PointQuery>,
) -> DbResult<Json<JsonValue>> {
    point.validate()?;
    let params = QueryParams::new()
        .with("lat", point.lat)
        .with("lon", point.lon);

    let row = or_degraded(
        state
            .gateway
            .execute_read_one(DatabaseTarget::General, INFO_MANZANA_SQL, &params)
            .await,
        "info-manzana",
    )?;

    let body = match row {
        Some(row) => serde_json::to_value(BlockInfo::from(row))
            .map_err(|e| DbError::internal(format!("Failed to serialize block: {}", e)))?,
        None => serde_json::json!({"mensaje": "Sin datos"}),
    };
    Ok(Json(body))
}

/// GET /colonias/
async fn colonias(State(state): State<Arc<AppState>>) -> DbResult<Json<FeatureCollection>> {
    let rows = or_degraded(
        state
            .gateway
            .execute_read(DatabaseTarget::General, COLONIAS_SQL, &QueryParams::new())
            .await,
        "colonias",
    )?;
    Ok(Json(FeatureCollectionBuilder::new().build(rows)))
}

/// GET /vialidades/?in_bbox
async fn vialidades(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BboxQuery>,
) -> DbResult<Json<FeatureCollection>> {
    in_bbox(&state, &query, VIALIDADES_SQL, "vialidades").await
}

/// GET /denue/?in_bbox
async fn denue(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BboxQuery>,
) -> DbResult<Json<FeatureCollection>> {
    in_bbox(&state, &query, DENUE_SQL, "denue").await
}

async fn in_bbox(
    state: &AppState,
    query: &BboxQuery,
    sql: &str,
    endpoint: &'static str,
) -> DbResult<Json<FeatureCollection>> {
    let Some(bbox) = query.bbox()? else {
        return Ok(Json(FeatureCollection::empty()));
    };

    let rows = or_degraded(
        state
            .gateway
            .execute_read(DatabaseTarget::General, sql, &bbox.to_params())
            .await,
        endpoint,
    )?;
    Ok(Json(FeatureCollectionBuilder::new().build(rows)))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/info-manzana/", get(info_manzana))
        .route("/colonias/", get(colonias))
        .route("/vialidades/", get(vialidades))
        .route("/denue/", get(denue))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_point_validation() {
        assert!(PointQuery { lat: 16.75, lon: -93.11 }.validate().is_ok());
        assert!(PointQuery { lat: 91.0, lon: 0.0 }.validate().is_err());
        assert!(PointQuery { lat: 0.0, lon: -181.0 }.validate().is_err());
        assert!(PointQuery { lat: f64::NAN, lon: 0.0 }.validate().is_err());
    }

    #[test]
    fn test_bbox_query() {
        let missing = BboxQuery { in_bbox: None };
        assert!(missing.bbox().unwrap().is_none());

        let blank = BboxQuery { in_bbox: Some(" ".to_string()) };
        assert!(blank.bbox().unwrap().is_none());

        let bad = BboxQuery { in_bbox: Some("1,2,3".to_string()) };
        assert!(matches!(bad.bbox(), Err(DbError::InvalidInput { .. })));
    }

    #[test]
    fn test_block_info_from_row() {
        let row: Row = [
            ("cvegeo".to_string(), json!("0710100010235003")),
            ("pobtot".to_string(), json!(84)),
            ("vivtot".to_string(), json!(25)),
            ("pobfem".to_string(), json!(44)),
            ("pobmas".to_string(), json!(40)),
        ]
        .into_iter()
        .collect();

        let value = serde_json::to_value(BlockInfo::from(row)).unwrap();
        assert_eq!(
            value,
            json!({
                "clave_geo": "0710100010235003",
                "poblacion_total": 84,
                "viviendas": 25,
                "mujeres": 44,
                "hombres": 40
            })
        );
    }
}
