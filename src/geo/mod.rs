//! GeoJSON handling: geometry codec, feature assembly and bounding boxes.

pub mod bbox;
pub mod codec;
pub mod feature;

pub use bbox::BoundingBox;
pub use feature::{Feature, FeatureCollection, FeatureCollectionBuilder};
