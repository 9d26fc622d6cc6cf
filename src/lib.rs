//! Geo API Library
//!
//! Read-mostly HTTP API that serves municipal census, street-network,
//! business-registry and public-works layers as GeoJSON from two PostGIS
//! databases, plus a few authenticated write endpoints.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod models;
pub mod routes;
pub mod transport;

pub use config::Config;
pub use db::{DatabaseGateway, DatabaseTarget};
pub use error::{DbError, DbResult};
pub use routes::AppState;
