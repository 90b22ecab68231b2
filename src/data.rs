use geojson::JsonObject;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::{HeatmapError, Result};

pub const SENTIMENT_FIELD: &str = "neg_sentiment";
pub const TILE_ID_FIELD: &str = "tileId";
pub const MENTION_COUNT_FIELD: &str = "mentionCount";
pub const TERMS_FIELD: &str = "edges";

/// Placeholder id for features that arrive without a `tileId`.
pub const UNKNOWN_TILE_ID: &str = "N/A";

/// Term co-occurring with the selected category inside one tile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedTerm {
    #[serde(rename = "f1")]
    pub name: String,
    #[serde(rename = "f2")]
    pub mentions: u64,
}

impl AssociatedTerm {
    pub fn new(name: impl Into<String>, mentions: u64) -> Self {
        Self { name: name.into(), mentions }
    }
}

/// Feature as delivered by the tile service.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawTileFeature {
    #[serde(default)]
    pub coordinates: Option<Vec<f64>>,
    #[serde(default)]
    pub properties: JsonObject,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TileFeatureCollection {
    #[serde(default)]
    pub features: Option<Vec<RawTileFeature>>,
}

/// Success body: `{ "response": { "features": [...] } }`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TileResponseBody {
    #[serde(default)]
    pub response: Option<TileFeatureCollection>,
}

impl TileResponseBody {
    pub fn from_features(features: Vec<RawTileFeature>) -> Self {
        Self { response: Some(TileFeatureCollection { features: Some(features) }) }
    }

    /// `None` when the body carries no features array at all.
    pub fn into_features(self) -> Option<Vec<RawTileFeature>> {
        self.response?.features
    }
}

/// One unit of processing: a tile with its sentiment, mentions and terms.
#[derive(Clone, Debug, PartialEq)]
pub struct TileFeature {
    pub tile_id: Option<String>,
    /// `[lon, lat]`
    pub coordinates: Option<[f64; 2]>,
    pub sentiment: f64,
    pub mention_count: u64,
    pub associated_terms: Vec<AssociatedTerm>,
    pub properties: JsonObject,
}

impl TileFeature {
    pub fn new(
        tile_id: impl Into<String>,
        coordinates: [f64; 2],
        sentiment: f64,
        mention_count: u64,
        associated_terms: Vec<AssociatedTerm>,
    ) -> Self {
        let tile_id = tile_id.into();
        let mut properties = JsonObject::new();
        properties.insert(TILE_ID_FIELD.into(), json!(tile_id));
        properties.insert(SENTIMENT_FIELD.into(), json!(sentiment));
        properties.insert(MENTION_COUNT_FIELD.into(), json!(mention_count));
        properties.insert(TERMS_FIELD.into(), json!(associated_terms));
        Self {
            tile_id: Some(tile_id),
            coordinates: Some(coordinates),
            sentiment,
            mention_count,
            associated_terms,
            properties,
        }
    }

    /// Lenient decode: absent numeric fields default to zero, malformed term lists to empty.
    pub fn from_raw(raw: RawTileFeature) -> Self {
        let props = raw.properties;
        let tile_id = props
            .get(TILE_ID_FIELD)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let sentiment = props.get(SENTIMENT_FIELD).and_then(Value::as_f64).unwrap_or(0.0);
        let mention_count = props.get(MENTION_COUNT_FIELD).and_then(Value::as_u64).unwrap_or(0);
        let associated_terms = props
            .get(TERMS_FIELD)
            .cloned()
            .and_then(|v| serde_json::from_value::<Vec<AssociatedTerm>>(v).ok())
            .unwrap_or_default();
        let coordinates = raw.coordinates.and_then(|c| match c.as_slice() {
            [lon, lat] => Some([*lon, *lat]),
            _ => None,
        });

        Self { tile_id, coordinates, sentiment, mention_count, associated_terms, properties: props }
    }

    pub fn to_raw(&self) -> RawTileFeature {
        RawTileFeature {
            coordinates: self.coordinates.map(|c| c.to_vec()),
            properties: self.properties.clone(),
        }
    }

    pub fn id_or_placeholder(&self) -> &str {
        self.tile_id.as_deref().unwrap_or(UNKNOWN_TILE_ID)
    }
}

/// Directory of pre-fetched tile responses, one file per category.
pub struct TileDataDir {
    base: PathBuf,
}

impl TileDataDir {
    pub fn new<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).map_err(|e| HeatmapError::Config(e.to_string()))?;
        Ok(Self { base })
    }

    pub fn path_for(&self, category: &str) -> PathBuf {
        let skey = category.to_lowercase().replace(' ', "_").replace('(', "").replace(')', "");
        self.base.join(format!("tiles_{}.json", skey))
    }

    /// `Ok(None)` when no file exists for the category.
    pub fn load_response(&self, category: &str) -> Result<Option<TileResponseBody>> {
        let path = self.path_for(category);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(HeatmapError::fetch(None, format!("{}: {}", path.display(), e))),
        };
        let body = serde_json::from_slice(&data)
            .map_err(|e| HeatmapError::fetch(None, format!("{}: {}", path.display(), e)))?;
        Ok(Some(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_service_feature() {
        let body: TileResponseBody = serde_json::from_value(json!({
            "response": { "features": [{
                "coordinates": [-73.9, 40.7],
                "properties": {
                    "tileId": "8_75_96",
                    "neg_sentiment": 0.35,
                    "mentionCount": 42,
                    "edges": [{ "f1": "Flood", "f2": 7 }, { "f1": "rain", "f2": 3 }],
                    "population": 1200
                }
            }]}
        }))
        .unwrap();

        let features = body.into_features().unwrap();
        let tile = TileFeature::from_raw(features[0].clone());
        assert_eq!(tile.tile_id.as_deref(), Some("8_75_96"));
        assert_eq!(tile.coordinates, Some([-73.9, 40.7]));
        assert_eq!(tile.mention_count, 42);
        assert_eq!(tile.associated_terms, vec![AssociatedTerm::new("Flood", 7), AssociatedTerm::new("rain", 3)]);
        assert_eq!(tile.properties.get("population"), Some(&json!(1200)));
    }

    #[test]
    fn missing_fields_fall_back() {
        let tile = TileFeature::from_raw(RawTileFeature {
            coordinates: Some(vec![1.0]),
            properties: JsonObject::new(),
        });
        assert_eq!(tile.id_or_placeholder(), UNKNOWN_TILE_ID);
        assert_eq!(tile.coordinates, None);
        assert_eq!(tile.mention_count, 0);
        assert!(tile.associated_terms.is_empty());
    }

    #[test]
    fn body_without_features_is_distinguishable() {
        let body: TileResponseBody = serde_json::from_value(json!({ "response": {} })).unwrap();
        assert!(body.into_features().is_none());

        let empty = TileResponseBody::from_features(Vec::new());
        assert_eq!(empty.into_features().map(|f| f.len()), Some(0));
    }

    #[test]
    fn feature_survives_raw_conversion() {
        let tile = TileFeature::new("t1", [10.0, 50.0], 0.4, 9, vec![AssociatedTerm::new("storm", 2)]);
        assert_eq!(TileFeature::from_raw(tile.to_raw()), tile);
    }
}
