//! Bounding box query parameter.

use crate::error::DbError;
use crate::models::QueryParams;
use std::str::FromStr;

/// `min_lon,min_lat,max_lon,max_lat` in SRID 4326.
///
/// Ordering is not validated; an inverted box simply matches nothing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Named parameters for `ST_MakeEnvelope(:min_lon, :min_lat, :max_lon, :max_lat, 4326)`.
    pub fn to_params(&self) -> QueryParams {
        QueryParams::new()
            .with("min_lon", self.min_lon)
            .with("min_lat", self.min_lat)
            .with("max_lon", self.max_lon)
            .with("max_lat", self.max_lat)
    }

    pub fn is_inverted(&self) -> bool {
        self.min_lon > self.max_lon || self.min_lat > self.max_lat
    }
}

impl FromStr for BoundingBox {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|part| {
                let part = part.trim();
                part.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| {
                        DbError::invalid_input(format!("Invalid bbox coordinate '{}'", part))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        match values[..] {
            [min_lon, min_lat, max_lon, max_lat] => Ok(Self {
                min_lon,
                min_lat,
                max_lon,
                max_lat,
            }),
            _ => Err(DbError::invalid_input(format!(
                "in_bbox needs 4 comma-separated numbers, got {}",
                values.len()
            ))),
        }
    }
}
