use geo::Point;
use geojson::{Feature, Geometry, JsonObject, Value, feature::Id};

use crate::data::TileFeature;
use crate::error::{HeatmapError, Result};

/// Rendered form of a tile, owned by the tile store.
#[derive(Clone, Debug, PartialEq)]
pub struct TileRecord {
    pub tile_id: String,
    pub marker: Feature,
    pub raw_properties: JsonObject,
}

impl TileRecord {
    /// `(lon, lat)` of the marker.
    pub fn position(&self) -> Option<(f64, f64)> {
        match self.marker.geometry.as_ref().map(|g| &g.value) {
            Some(Value::Point(c)) if c.len() == 2 => Some((c[0], c[1])),
            _ => None,
        }
    }
}

/// Turns a tile into a GeoJSON point marker carrying the tile's properties.
pub fn feature_to_marker(tile: &TileFeature) -> Result<TileRecord> {
    let tile_id = tile.id_or_placeholder().to_string();
    let [lon, lat] = tile
        .coordinates
        .ok_or_else(|| HeatmapError::conversion(&tile_id, "missing coordinates"))?;

    if !lon.is_finite() || !lat.is_finite() {
        return Err(HeatmapError::conversion(&tile_id, format!("non-finite coordinates [{}, {}]", lon, lat)));
    }
    if lon.abs() > 180.0 || lat.abs() > 90.0 {
        return Err(HeatmapError::conversion(&tile_id, format!("coordinates out of range [{}, {}]", lon, lat)));
    }

    let point: Point<f64> = Point::new(lon, lat);
    let marker = Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::from(&point))),
        id: Some(Id::String(tile_id.clone())),
        properties: Some(tile.properties.clone()),
        foreign_members: None,
    };

    Ok(TileRecord { tile_id, marker, raw_properties: tile.properties.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_point_marker() {
        let tile = TileFeature::new("t1", [21.01, 52.23], 0.6, 100, Vec::new());
        let record = feature_to_marker(&tile).unwrap();

        assert_eq!(record.tile_id, "t1");
        assert_eq!(record.position(), Some((21.01, 52.23)));
        assert_eq!(record.marker.id, Some(Id::String("t1".into())));
        assert_eq!(record.marker.property("mentionCount").and_then(|v| v.as_u64()), Some(100));
    }

    #[test]
    fn rejects_missing_coordinates() {
        let mut tile = TileFeature::new("t2", [0.0, 0.0], 0.1, 1, Vec::new());
        tile.coordinates = None;
        let err = feature_to_marker(&tile).unwrap_err();
        assert!(matches!(err, HeatmapError::FeatureConversion { ref tile_id, .. } if tile_id == "t2"));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let tile = TileFeature::new("t3", [200.0, 10.0], 0.1, 1, Vec::new());
        assert!(feature_to_marker(&tile).is_err());

        let tile = TileFeature::new("t4", [10.0, f64::NAN], 0.1, 1, Vec::new());
        assert!(feature_to_marker(&tile).is_err());
    }
}
