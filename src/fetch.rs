use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};

use geo::{Intersects, Rect, coord};
use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;
use tracing::debug;

use crate::data::{AssociatedTerm, RawTileFeature, TileDataDir, TileFeature, TileResponseBody};

/// Parameters of one tile query.
#[derive(Clone, Debug, PartialEq)]
pub struct TileRequest {
    pub site_key: String,
    pub timespan_type: String,
    pub zoom: u8,
    pub category: String,
    pub datetime_selection: String,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bbox: [f64; 4],
    pub term_filter: Vec<String>,
}

impl TileRequest {
    pub fn bbox_rect(&self) -> Rect<f64> {
        let [min_lon, min_lat, max_lon, max_lat] = self.bbox;
        Rect::new(coord! { x: min_lon, y: min_lat }, coord! { x: max_lon, y: max_lat })
    }
}

#[derive(Clone, Debug)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Option<TileResponseBody>,
}

impl FetchResponse {
    pub fn ok(body: TileResponseBody) -> Self {
        Self { status: 200, body: Some(body) }
    }

    pub fn status(status: u16) -> Self {
        Self { status, body: None }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failure (no response at all).
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{0}")]
pub struct FetchError(pub String);

/// Source of heat map tiles for a bounding box and time window.
pub trait TileFetcher {
    fn fetch_tiles(&self, request: &TileRequest) -> impl Future<Output = Result<FetchResponse, FetchError>>;
}

fn passes_term_filter(feature: &TileFeature, filter: &[String]) -> bool {
    filter.is_empty()
        || feature
            .associated_terms
            .iter()
            .any(|t| filter.iter().any(|f| f.eq_ignore_ascii_case(&t.name)))
}

/// Serves tiles from `tiles_<category>.json` files.
pub struct FileFetcher {
    dir: TileDataDir,
}

impl FileFetcher {
    pub fn new(dir: TileDataDir) -> Self {
        Self { dir }
    }
}

impl TileFetcher for FileFetcher {
    async fn fetch_tiles(&self, request: &TileRequest) -> Result<FetchResponse, FetchError> {
        let body = match self.dir.load_response(&request.category) {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(FetchResponse::status(404)),
            Err(e) => return Err(FetchError(e.to_string())),
        };
        let Some(features) = body.into_features() else {
            return Ok(FetchResponse::ok(TileResponseBody::default()));
        };

        let rect = request.bbox_rect();
        let total = features.len();
        let selected: Vec<RawTileFeature> = features
            .into_iter()
            .filter(|raw| {
                let tile = TileFeature::from_raw(raw.clone());
                // Malformed coordinates are passed through so the pipeline can report them.
                let in_view = match tile.coordinates {
                    Some([lon, lat]) => rect.intersects(&coord! { x: lon, y: lat }),
                    None => true,
                };
                in_view && passes_term_filter(&tile, &request.term_filter)
            })
            .collect();

        debug!("File fetch - category={}, selected={}/{}", request.category, selected.len(), total);
        Ok(FetchResponse::ok(TileResponseBody::from_features(selected)))
    }
}

const SYNTHETIC_TERMS: [&str; 12] = [
    "flood", "rain", "storm", "traffic", "power", "outage", "fire", "smoke", "protest", "heat", "wind", "evacuation",
];

/// Random tiles on a zoom-dependent grid. The same cell always yields the same tile.
pub struct SyntheticFetcher {
    seed: u64,
    max_tiles: usize,
}

impl SyntheticFetcher {
    pub fn new(seed: u64) -> Self {
        Self { seed, max_tiles: 2_000 }
    }

    fn cell_step(zoom: u8) -> f64 {
        40.0 / 2f64.powi(i32::from(zoom))
    }

    fn tile_for_cell(&self, request: &TileRequest, x: i64, y: i64, step: f64) -> Option<TileFeature> {
        let mut hasher = DefaultHasher::new();
        (self.seed, &request.category, &request.datetime_selection, request.zoom, x, y).hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());

        // Roughly a third of the cells carry any mentions.
        if rng.random_range(0..3) != 0 {
            return None;
        }
        let lon = (x as f64 + rng.random::<f64>()) * step;
        let lat = (y as f64 + rng.random::<f64>()) * step;
        let mention_count = rng.random_range(1..20_000u64);
        let sentiment = rng.random::<f64>();

        let term_count = rng.random_range(1..5usize);
        let terms = (0..term_count)
            .map(|_| {
                let name = SYNTHETIC_TERMS[rng.random_range(0..SYNTHETIC_TERMS.len())];
                AssociatedTerm::new(name, rng.random_range(1..=mention_count.min(500)))
            })
            .collect();

        let tile_id = format!("{}_{}_{}", request.zoom, x, y);
        Some(TileFeature::new(tile_id, [lon, lat], sentiment, mention_count, terms))
    }
}

impl TileFetcher for SyntheticFetcher {
    async fn fetch_tiles(&self, request: &TileRequest) -> Result<FetchResponse, FetchError> {
        let [min_lon, min_lat, max_lon, max_lat] = request.bbox;
        if min_lon > max_lon || min_lat > max_lat {
            return Ok(FetchResponse::status(400));
        }
        let step = Self::cell_step(request.zoom);
        let (x0, x1) = ((min_lon / step).floor() as i64, (max_lon / step).floor() as i64);
        let (y0, y1) = ((min_lat / step).floor() as i64, (max_lat / step).floor() as i64);

        let rect = request.bbox_rect();
        let mut features = Vec::new();
        'cells: for x in x0..=x1 {
            for y in y0..=y1 {
                if features.len() >= self.max_tiles {
                    break 'cells;
                }
                if let Some(tile) = self.tile_for_cell(request, x, y, step) {
                    let [lon, lat] = tile.coordinates.unwrap_or_default();
                    if rect.intersects(&coord! { x: lon, y: lat }) && passes_term_filter(&tile, &request.term_filter) {
                        features.push(tile.to_raw());
                    }
                }
            }
        }

        debug!("Synthetic fetch - zoom={}, tiles={}", request.zoom, features.len());
        Ok(FetchResponse::ok(TileResponseBody::from_features(features)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn request(category: &str, bbox: [f64; 4]) -> TileRequest {
        TileRequest {
            site_key: "ocha".into(),
            timespan_type: "day".into(),
            zoom: 8,
            category: category.into(),
            datetime_selection: "2016-05-01".into(),
            bbox,
            term_filter: Vec::new(),
        }
    }

    #[tokio::test]
    async fn file_fetcher_filters_by_bbox_and_terms() {
        let dir = tempdir().unwrap();
        let data = TileDataDir::new(dir.path()).unwrap();
        let body = TileResponseBody::from_features(vec![
            TileFeature::new("in", [10.0, 10.0], 0.3, 5, vec![AssociatedTerm::new("Flood", 2)]).to_raw(),
            TileFeature::new("out", [50.0, 10.0], 0.3, 5, vec![AssociatedTerm::new("flood", 2)]).to_raw(),
            TileFeature::new("other", [11.0, 11.0], 0.3, 5, vec![AssociatedTerm::new("fire", 2)]).to_raw(),
        ]);
        fs::write(data.path_for("Floods"), serde_json::to_vec(&body).unwrap()).unwrap();

        let fetcher = FileFetcher::new(data);
        let mut req = request("Floods", [0.0, 0.0, 20.0, 20.0]);
        let resp = fetcher.fetch_tiles(&req).await.unwrap();
        assert_eq!(resp.body.unwrap().into_features().unwrap().len(), 2);

        req.term_filter = vec!["flood".into()];
        let resp = fetcher.fetch_tiles(&req).await.unwrap();
        let features = resp.body.unwrap().into_features().unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(TileFeature::from_raw(features[0].clone()).tile_id.as_deref(), Some("in"));
    }

    #[tokio::test]
    async fn file_fetcher_reports_missing_category() {
        let dir = tempdir().unwrap();
        let fetcher = FileFetcher::new(TileDataDir::new(dir.path()).unwrap());
        let resp = fetcher.fetch_tiles(&request("nothing", [0.0, 0.0, 1.0, 1.0])).await.unwrap();
        assert_eq!(resp.status, 404);
        assert!(!resp.is_success());
    }

    #[tokio::test]
    async fn synthetic_tiles_are_stable_and_inside_the_view() {
        let fetcher = SyntheticFetcher::new(7);
        let req = request("storm", [-10.0, 40.0, -5.0, 45.0]);

        let first = fetcher.fetch_tiles(&req).await.unwrap().body.unwrap().into_features().unwrap();
        let second = fetcher.fetch_tiles(&req).await.unwrap().body.unwrap().into_features().unwrap();
        assert!(!first.is_empty());

        let ids = |f: &[RawTileFeature]| -> Vec<String> {
            f.iter().map(|r| TileFeature::from_raw(r.clone()).id_or_placeholder().to_string()).collect()
        };
        assert_eq!(ids(&first), ids(&second));

        for raw in &first {
            let [lon, lat] = TileFeature::from_raw(raw.clone()).coordinates.unwrap();
            assert!((-10.0..=-5.0).contains(&lon) && (40.0..=45.0).contains(&lat));
        }
    }
}
