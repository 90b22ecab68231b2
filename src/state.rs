use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use crossterm::event::KeyCode;
use geojson::Feature;
use heat_atlas::{
    FetchError, FetchResponse, FileFetcher, HeatmapConfig, HeatmapPipeline, HeatmapSummary, PipelineStatus,
    RankedTerms, RawTileFeature, RefreshOutcome, Selection, SummaryPublisher, SyntheticFetcher, TileFeature,
    TileFetcher, TileRecord, TileRenderer, TileRequest, Viewport, format_mentions,
    config::{MAX_ZOOM, MIN_ZOOM},
    data::{MENTION_COUNT_FIELD, SENTIMENT_FIELD},
};
use tracing::{debug, warn};

/// Tile source picked on the command line.
pub enum AnyFetcher {
    File(FileFetcher),
    Synthetic(SyntheticFetcher),
}

impl TileFetcher for AnyFetcher {
    async fn fetch_tiles(&self, request: &TileRequest) -> Result<FetchResponse, FetchError> {
        match self {
            AnyFetcher::File(f) => f.fetch_tiles(request).await,
            AnyFetcher::Synthetic(f) => f.fetch_tiles(request).await,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarkerPoint {
    pub lon: f64,
    pub lat: f64,
    pub mentions: u64,
    pub sentiment: f64,
}

/// Marker layer drawn on the map canvas.
#[derive(Default)]
pub struct MapLayers {
    markers: RefCell<BTreeMap<String, MarkerPoint>>,
}

impl MapLayers {
    pub fn points(&self) -> Vec<MarkerPoint> {
        self.markers.borrow().values().copied().collect()
    }

    /// Id of the marker closest to `(lon, lat)` within `bbox`.
    pub fn nearest(&self, lon: f64, lat: f64, bbox: [f64; 4]) -> Option<String> {
        let [min_lon, min_lat, max_lon, max_lat] = bbox;
        self.markers
            .borrow()
            .iter()
            .filter(|(_, p)| (min_lon..=max_lon).contains(&p.lon) && (min_lat..=max_lat).contains(&p.lat))
            .map(|(id, p)| (id, (p.lon - lon).powi(2) + (p.lat - lat).powi(2)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id.clone())
    }
}

impl TileRenderer for MapLayers {
    fn add_layer(&self, tile_id: &str, marker: &Feature) {
        let position = match marker.geometry.as_ref().map(|g| &g.value) {
            Some(geojson::Value::Point(c)) if c.len() == 2 => (c[0], c[1]),
            _ => {
                warn!("Marker without point geometry - tile={}", tile_id);
                return;
            }
        };
        let point = MarkerPoint {
            lon: position.0,
            lat: position.1,
            mentions: marker.property(MENTION_COUNT_FIELD).and_then(|v| v.as_u64()).unwrap_or(0),
            sentiment: marker.property(SENTIMENT_FIELD).and_then(|v| v.as_f64()).unwrap_or(0.0),
        };
        self.markers.borrow_mut().insert(tile_id.to_string(), point);
    }

    fn clear_layers(&self) {
        self.markers.borrow_mut().clear();
    }
}

/// Progress bar and summary panel model.
pub struct Dashboard {
    progress: Cell<u8>,
    summary: RefCell<Option<HeatmapSummary>>,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self { progress: Cell::new(100), summary: RefCell::new(None) }
    }
}

impl Dashboard {
    pub fn progress(&self) -> u8 {
        self.progress.get()
    }

    pub fn sentiment_score(&self) -> Option<f64> {
        self.summary.borrow().as_ref().map(|s| s.sentiment_score)
    }
}

impl SummaryPublisher for Dashboard {
    fn publish_progress(&self, percent: u8) {
        self.progress.set(percent.min(100));
    }

    fn publish_summary(&self, summary: &HeatmapSummary) {
        *self.summary.borrow_mut() = Some(summary.clone());
    }
}

#[derive(PartialEq)]
pub enum Panel { Terms, Map }

pub type AtlasPipeline = HeatmapPipeline<AnyFetcher, MapLayers, Dashboard>;

pub struct AppState {
    pub pipeline: AtlasPipeline,
    pub viewport: Viewport,
    pub selection: Selection,
    pub categories: Vec<String>,
    pub terms: RankedTerms,
    pub selected: usize,
    pub status: PipelineStatus,
    pub tile_count: usize,
    pub info: String,
    pub active_panel: Panel,
}

impl AppState {
    const HELP_TEXT: &'static str = "\
Tab: switch panel
Arrows: pan map / move in term list
+ / -: zoom
Enter: open tile at map center
c: next category
Space: toggle term filter
r: redraw, q: quit";

    /// Degrees of longitude visible at `zoom`.
    fn span_for_zoom(zoom: u8) -> f64 {
        360.0 / 2f64.powi(i32::from(zoom) - 1)
    }

    pub fn new(config: &HeatmapConfig, fetcher: AnyFetcher) -> anyhow::Result<Self> {
        let (lat, lon) = config.location()?;
        let viewport = Viewport::around(lat, lon, Self::span_for_zoom(config.default_zoom), config.default_zoom);
        let pipeline = HeatmapPipeline::new(fetcher, MapLayers::default(), Dashboard::default(), config, viewport)?;

        let mut categories = config.categories.clone();
        if let Some(current) = &config.category {
            if !categories.contains(current) {
                categories.insert(0, current.clone());
            }
        }

        Ok(Self {
            pipeline,
            viewport,
            selection: Selection::from_config(config),
            categories,
            terms: RankedTerms::new(),
            selected: 0,
            status: PipelineStatus::Ready,
            tile_count: 0,
            info: Self::HELP_TEXT.to_string(),
            active_panel: Panel::Map,
        })
    }

    pub async fn refresh(&mut self) {
        let outcome = self.pipeline.refresh().await;
        self.after_cycle(outcome).await;
    }

    async fn after_cycle(&mut self, outcome: heat_atlas::Result<RefreshOutcome>) {
        self.info = match outcome {
            Ok(RefreshOutcome::Loaded(report)) => format!(
                "{} tiles, {} new, {} skipped\n\n{}",
                report.tiles,
                report.new_markers,
                report.tile_errors.len(),
                Self::HELP_TEXT
            ),
            Ok(RefreshOutcome::InvalidSelection) => format!("Choose a category and time window\n\n{}", Self::HELP_TEXT),
            Ok(RefreshOutcome::Busy) => self.info.clone(),
            Err(e) => format!("{}\n\n{}", e, Self::HELP_TEXT),
        };
        self.status = self.pipeline.status();
        self.viewport = self.pipeline.viewport().await;
        self.selection = self.pipeline.selection().await;
        self.terms = self.pipeline.ranked_terms().await;
        self.tile_count = self.pipeline.tile_count().await;
        if self.selected >= self.terms.len() {
            self.selected = self.terms.len().saturating_sub(1);
        }
    }

    async fn move_viewport(&mut self, viewport: Viewport) {
        debug!("Viewport moved - bbox={:?}, zoom={}", viewport.bbox, viewport.zoom);
        self.viewport = viewport;
        let outcome = self.pipeline.on_viewport_changed(viewport).await;
        self.after_cycle(outcome).await;
    }

    /// Category after the current one, wrapping around.
    fn next_category(&self) -> Option<String> {
        let current = self.selection.category.as_ref();
        let next = match current.and_then(|c| self.categories.iter().position(|x| x == c)) {
            Some(i) => (i + 1) % self.categories.len(),
            None => 0,
        };
        self.categories.get(next).cloned()
    }

    async fn switch_category(&mut self) {
        let Some(category) = self.next_category() else {
            return;
        };
        debug!("Category switched - category={}", category);
        let selection = Selection { category: Some(category), ..self.selection.clone() };
        self.selected = 0;
        let outcome = self.pipeline.on_selection_changed(selection).await;
        self.after_cycle(outcome).await;
    }

    /// Shows the tile nearest to the map center in the info panel.
    async fn open_tile(&mut self) {
        let [min_lon, min_lat, max_lon, max_lat] = self.viewport.bbox;
        let (lon, lat) = ((min_lon + max_lon) / 2.0, (min_lat + max_lat) / 2.0);
        let record = match self.pipeline.renderer().nearest(lon, lat, self.viewport.bbox) {
            Some(id) => self.pipeline.tile(&id).await,
            None => None,
        };
        self.info = match record {
            Some(record) => format!("{}\n\n{}", Self::describe_tile(&record), Self::HELP_TEXT),
            None => format!("No tile in view\n\n{}", Self::HELP_TEXT),
        };
    }

    fn describe_tile(record: &TileRecord) -> String {
        let tile = TileFeature::from_raw(RawTileFeature {
            coordinates: record.position().map(|(lon, lat)| vec![lon, lat]),
            properties: record.raw_properties.clone(),
        });
        let mut text = format!(
            "Tile {}\nAt {:.3}, {:.3}\nMentions: {}\nSentiment: {:.0}",
            record.tile_id,
            tile.coordinates.map_or(0.0, |c| c[1]),
            tile.coordinates.map_or(0.0, |c| c[0]),
            format_mentions(tile.mention_count),
            tile.sentiment * 100.0
        );
        for term in &tile.associated_terms {
            text.push_str(&format!("\n  {} ({})", term.name, format_mentions(term.mentions)));
        }
        text
    }

    fn panned(&self, dx: f64, dy: f64) -> Viewport {
        let [min_lon, min_lat, max_lon, max_lat] = self.viewport.bbox;
        let (step_x, step_y) = ((max_lon - min_lon) * 0.2 * dx, (max_lat - min_lat) * 0.2 * dy);
        Viewport { bbox: [min_lon + step_x, min_lat + step_y, max_lon + step_x, max_lat + step_y], zoom: self.viewport.zoom }
    }

    fn zoomed(&self, zoom: u8) -> Viewport {
        let [min_lon, min_lat, max_lon, max_lat] = self.viewport.bbox;
        let (lat, lon) = ((min_lat + max_lat) / 2.0, (min_lon + max_lon) / 2.0);
        Viewport::around(lat, lon, Self::span_for_zoom(zoom), zoom)
    }

    /// Returns true when the app should exit.
    pub async fn handle_input(&mut self, key: KeyCode) -> bool {
        use KeyCode::*;
        match key {
            Char('q') => return true,
            Tab => {
                self.active_panel = match self.active_panel {
                    Panel::Terms => Panel::Map,
                    Panel::Map => Panel::Terms,
                };
            }
            Char('r') => {
                self.pipeline.request_redraw().await;
                self.refresh().await;
            }
            Char('c') => self.switch_category().await,
            Enter if self.active_panel == Panel::Map => self.open_tile().await,
            Char('+') if self.viewport.zoom < MAX_ZOOM => {
                let viewport = self.zoomed(self.viewport.zoom + 1);
                self.move_viewport(viewport).await;
            }
            Char('-') if self.viewport.zoom > MIN_ZOOM => {
                let viewport = self.zoomed(self.viewport.zoom - 1);
                self.move_viewport(viewport).await;
            }
            Char(' ') if self.active_panel == Panel::Terms => {
                let Some(term) = self.terms.iter().nth(self.selected).cloned() else {
                    return false;
                };
                self.pipeline.set_term_enabled(&term.name, !term.enabled).await;
                self.refresh().await;
            }
            Up | Down | Left | Right if self.active_panel == Panel::Map => {
                let (dx, dy) = match key {
                    Up => (0.0, 1.0),
                    Down => (0.0, -1.0),
                    Left => (-1.0, 0.0),
                    _ => (1.0, 0.0),
                };
                let viewport = self.panned(dx, dy);
                self.move_viewport(viewport).await;
            }
            Up => if self.selected > 0 { self.selected -= 1 },
            Down => if self.selected + 1 < self.terms.len() { self.selected += 1 },
            _ => {}
        }
        false
    }
}
