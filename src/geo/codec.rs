//! Geometry text to structured geometry and back.
//!
//! The database returns geometry as GeoJSON text (`ST_AsGeoJSON`) and accepts
//! it the same way (`ST_GeomFromGeoJSON`). Decoding is tolerant: a bad value
//! blanks the geometry of one feature and never fails the response.

use crate::error::{DbError, DbResult};
use serde_json::Value as JsonValue;
use tracing::warn;

/// Geometry types accepted by `ST_GeomFromGeoJSON`.
pub const GEOMETRY_TYPES: [&str; 7] = [
    "Point",
    "MultiPoint",
    "LineString",
    "MultiLineString",
    "Polygon",
    "MultiPolygon",
    "GeometryCollection",
];

/// Decode a geometry column value, logging and blanking anything malformed.
pub fn decode(raw: Option<&JsonValue>) -> Option<JsonValue> {
    match try_decode(raw) {
        Ok(geometry) => geometry,
        Err(e) => {
            warn!(error = %e, "Dropping undecodable geometry");
            None
        }
    }
}

/// Decode a geometry column value.
///
/// Null, absent and empty values decode to `None`. Text is parsed as JSON;
/// an already structured value passes through. Anything that is not an object
/// with a string `type` is a `Codec` error.
pub fn try_decode(raw: Option<&JsonValue>) -> DbResult<Option<JsonValue>> {
    let value = match raw {
        None | Some(JsonValue::Null) => return Ok(None),
        Some(JsonValue::String(text)) if text.trim().is_empty() => return Ok(None),
        Some(JsonValue::String(text)) => serde_json::from_str::<JsonValue>(text)
            .map_err(|e| DbError::codec(format!("Geometry is not valid JSON: {}", e)))?,
        Some(other) => other.clone(),
    };

    if value.get("type").and_then(JsonValue::as_str).is_none() {
        return Err(DbError::codec("Geometry has no \"type\" member"));
    }
    Ok(Some(value))
}

/// Encode a client-supplied geometry as GeoJSON text for `ST_GeomFromGeoJSON`.
///
/// A `Feature` is unwrapped to its geometry. Only the seven GeoJSON geometry
/// types are accepted.
pub fn encode(geometry: &JsonValue) -> DbResult<String> {
    let geometry = match geometry.get("type").and_then(JsonValue::as_str) {
        Some("Feature") => geometry
            .get("geometry")
            .filter(|g| !g.is_null())
            .ok_or_else(|| DbError::codec("Feature has no geometry"))?,
        Some(_) => geometry,
        None => return Err(DbError::codec("Geometry must be an object with a \"type\"")),
    };

    let kind = geometry
        .get("type")
        .and_then(JsonValue::as_str)
        .unwrap_or_default();
    if !GEOMETRY_TYPES.contains(&kind) {
        return Err(DbError::codec(format!(
            "Unsupported geometry type '{}'",
            kind
        )));
    }

    let member = if kind == "GeometryCollection" {
        "geometries"
    } else {
        "coordinates"
    };
    if !geometry.get(member).is_some_and(JsonValue::is_array) {
        return Err(DbError::codec(format!(
            "{} geometry needs a \"{}\" array",
            kind, member
        )));
    }

    Ok(geometry.to_string())
}
