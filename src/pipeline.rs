//! Refresh cycle orchestration.
//!
//! A cycle validates the selection, flushes the tile cache if the
//! selection moved on, fetches tiles for the current viewport, pushes every
//! feature through the bounded processor and finally publishes the weighted
//! sentiment and the ranked term table. Only one cycle runs at a time; a
//! trigger that arrives while loading is refused.

use std::collections::HashMap;
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::HeatmapConfig;
use crate::data::{AssociatedTerm, RawTileFeature, TileFeature};
use crate::error::{HeatmapError, Result};
use crate::fetch::{TileFetcher, TileRequest};
use crate::marker::{TileRecord, feature_to_marker};
use crate::processor::BoundedProcessor;
use crate::terms::{RankedTerms, enabled_filter, merge_terms};
use crate::tile_store::{TileRenderer, TileStore};
use crate::weighted_mean::WeightedMean;

/// Receives the results of completed cycles.
pub trait SummaryPublisher {
    /// 0..=100; 100 also means "nothing to show".
    fn publish_progress(&self, percent: u8);
    fn publish_summary(&self, summary: &HeatmapSummary);
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeatmapSummary {
    /// Weighted mean sentiment scaled to 0..=100.
    pub sentiment_score: f64,
    pub ranked_terms: RankedTerms,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStatus {
    Ready,
    Loading,
    Loaded,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    pub category: Option<String>,
    pub timespan_type: Option<String>,
    pub datetime_selection: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ValidSelection {
    category: String,
    timespan_type: String,
    datetime_selection: String,
}

impl Selection {
    pub fn new(category: impl Into<String>, timespan_type: impl Into<String>, datetime: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            timespan_type: Some(timespan_type.into()),
            datetime_selection: Some(datetime.into()),
        }
    }

    pub fn from_config(config: &HeatmapConfig) -> Self {
        Self {
            category: config.category.clone(),
            timespan_type: config.timespan_type.clone(),
            datetime_selection: config.datetime_selection.clone(),
        }
    }

    fn validate(&self) -> Result<ValidSelection> {
        fn present<'a>(value: &'a Option<String>, missing: &'static str) -> Result<&'a str> {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .ok_or(HeatmapError::InvalidSelection { missing })
        }
        Ok(ValidSelection {
            datetime_selection: present(&self.datetime_selection, "datetime selection")?.to_string(),
            timespan_type: present(&self.timespan_type, "timespan type")?.to_string(),
            category: present(&self.category, "category")?.to_string(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bbox: [f64; 4],
    pub zoom: u8,
}

impl Viewport {
    /// Viewport of `span` degrees around `(lat, lon)`.
    pub fn around(lat: f64, lon: f64, span: f64, zoom: u8) -> Self {
        let half = span / 2.0;
        Self { bbox: [lon - half, lat - half, lon + half, lat + half], zoom }
    }
}

#[derive(Debug)]
pub enum RefreshOutcome {
    /// Selection incomplete; nothing happened.
    InvalidSelection,
    /// Another cycle is still loading; the trigger was dropped.
    Busy,
    Loaded(CycleReport),
}

#[derive(Debug)]
pub struct CycleReport {
    pub tiles: usize,
    pub new_markers: usize,
    pub tile_errors: Vec<HeatmapError>,
    pub summary: HeatmapSummary,
}

pub fn progress_percent(processed: usize, total: usize) -> u8 {
    if processed >= total {
        return 100;
    }
    ((processed as f64 / total as f64) * 100.0).round() as u8
}

struct PipelineState {
    selection: Selection,
    viewport: Viewport,
    viewport_changed: bool,
    /// Bumped on every viewport/selection change, so a cycle only clears
    /// the change flag it actually consumed.
    change_generation: u64,
    flushed_for: Option<(String, String)>,
    force_flush: bool,
    tiles: TileStore<TileRecord>,
    terms: RankedTerms,
}

fn lock_status(status: &StdMutex<PipelineStatus>) -> MutexGuard<'_, PipelineStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the pipeline in `Loading` for one cycle.
///
/// A cycle future dropped before it settles (timeout, `select!`, abort)
/// leaves the pipeline `Failed` rather than stuck in `Loading`.
struct CycleGuard<'a> {
    status: &'a StdMutex<PipelineStatus>,
    previous: PipelineStatus,
    settled: bool,
}

impl<'a> CycleGuard<'a> {
    /// `None` while another cycle is loading.
    fn begin(status: &'a StdMutex<PipelineStatus>) -> Option<Self> {
        let mut current = lock_status(status);
        if *current == PipelineStatus::Loading {
            return None;
        }
        let previous = *current;
        *current = PipelineStatus::Loading;
        Some(Self { status, previous, settled: false })
    }

    fn settle(mut self, status: PipelineStatus) {
        *lock_status(self.status) = status;
        self.settled = true;
    }

    /// Puts back the status the cycle started from.
    fn cancel(self) {
        let previous = self.previous;
        self.settle(previous);
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Refresh cycle dropped before completion - marking pipeline failed");
            *lock_status(self.status) = PipelineStatus::Failed;
        }
    }
}

/// Accumulation owned by one cycle and dropped with it.
#[derive(Default)]
struct CycleAccumulator {
    weighted: WeightedMean,
    /// In first-seen order; the last list recorded for a tile wins.
    tile_terms: Vec<(String, Vec<AssociatedTerm>)>,
    tile_index: HashMap<String, usize>,
    new_markers: usize,
}

impl CycleAccumulator {
    fn record(&mut self, tile: &TileFeature) {
        if !tile.associated_terms.is_empty() {
            let id = tile.id_or_placeholder();
            match self.tile_index.get(id) {
                Some(&i) => self.tile_terms[i].1 = tile.associated_terms.clone(),
                None => {
                    self.tile_index.insert(id.to_string(), self.tile_terms.len());
                    self.tile_terms.push((id.to_string(), tile.associated_terms.clone()));
                }
            }
        }
        self.weighted.add(tile.sentiment, tile.mention_count as f64);
    }
}

pub struct HeatmapPipeline<F, R, P> {
    fetcher: F,
    renderer: R,
    publisher: P,
    processor: BoundedProcessor,
    site_key: String,
    neutral_sentiment: f64,
    status: StdMutex<PipelineStatus>,
    state: Mutex<PipelineState>,
}

impl<F, R, P> HeatmapPipeline<F, R, P>
where
    F: TileFetcher,
    R: TileRenderer,
    P: SummaryPublisher,
{
    pub fn new(fetcher: F, renderer: R, publisher: P, config: &HeatmapConfig, viewport: Viewport) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            fetcher,
            renderer,
            publisher,
            processor: BoundedProcessor::new(config.concurrency_limit)?,
            site_key: config.site_key.clone(),
            neutral_sentiment: config.neutral_sentiment,
            status: StdMutex::new(PipelineStatus::Ready),
            state: Mutex::new(PipelineState {
                selection: Selection::from_config(config),
                viewport,
                viewport_changed: false,
                change_generation: 0,
                flushed_for: None,
                force_flush: false,
                tiles: TileStore::new(),
                terms: RankedTerms::new(),
            }),
        })
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn status(&self) -> PipelineStatus {
        *lock_status(&self.status)
    }

    pub async fn ranked_terms(&self) -> RankedTerms {
        self.state.lock().await.terms.clone()
    }

    pub async fn tile_count(&self) -> usize {
        self.state.lock().await.tiles.len()
    }

    pub async fn viewport(&self) -> Viewport {
        self.state.lock().await.viewport
    }

    pub async fn selection(&self) -> Selection {
        self.state.lock().await.selection.clone()
    }

    /// Cached record of a rendered tile, for drill-down.
    pub async fn tile(&self, tile_id: &str) -> Option<TileRecord> {
        self.state.lock().await.tiles.get(tile_id).cloned()
    }

    /// Toggles a term in the current table; it is applied as a fetch filter
    /// on the next refresh if the viewport has not moved.
    pub async fn set_term_enabled(&self, name: &str, enabled: bool) -> bool {
        self.state.lock().await.terms.set_enabled(name, enabled)
    }

    /// Forces the next cycle to clear cached tiles.
    pub async fn request_redraw(&self) {
        self.state.lock().await.force_flush = true;
    }

    pub async fn on_viewport_changed(&self, viewport: Viewport) -> Result<RefreshOutcome> {
        {
            let mut state = self.state.lock().await;
            state.viewport = viewport;
            state.viewport_changed = true;
            state.change_generation += 1;
        }
        self.refresh().await
    }

    pub async fn on_selection_changed(&self, selection: Selection) -> Result<RefreshOutcome> {
        {
            let mut state = self.state.lock().await;
            if state.selection != selection {
                state.selection = selection;
                state.viewport_changed = true;
                state.change_generation += 1;
            }
        }
        self.refresh().await
    }

    /// Runs one refresh cycle. Fetch failures come back as `Err` after the
    /// pipeline has moved to `Failed`.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let (guard, request, viewport_changed, generation) = {
            let mut state = self.state.lock().await;
            let Some(guard) = CycleGuard::begin(&self.status) else {
                debug!("Refresh skipped - cycle already loading");
                return Ok(RefreshOutcome::Busy);
            };
            let valid = match state.selection.validate() {
                Ok(valid) => valid,
                Err(e) => {
                    debug!("Refresh skipped - {}", e);
                    drop(state);
                    guard.cancel();
                    self.publisher.publish_progress(100);
                    return Ok(RefreshOutcome::InvalidSelection);
                }
            };

            let flush_key = (valid.category.clone(), valid.datetime_selection.clone());
            if state.force_flush || state.flushed_for.as_ref() != Some(&flush_key) {
                state.tiles.clear(&self.renderer);
                state.flushed_for = Some(flush_key);
                state.force_flush = false;
            }

            let request = TileRequest {
                site_key: self.site_key.clone(),
                timespan_type: valid.timespan_type,
                zoom: state.viewport.zoom,
                category: valid.category,
                datetime_selection: valid.datetime_selection,
                bbox: state.viewport.bbox,
                term_filter: enabled_filter(&state.terms, state.viewport_changed),
            };
            (guard, request, state.viewport_changed, state.change_generation)
        };

        self.publisher.publish_progress(0);
        info!(
            "Refresh started - category={}, datetime={}, zoom={}, bbox={:?}, filter={}",
            request.category,
            request.datetime_selection,
            request.zoom,
            request.bbox,
            request.term_filter.len()
        );

        let features = match self.fetch(&request).await {
            Ok(features) => features,
            Err(e) => {
                error!(
                    "[{}] occurred while processing tile request [{}, {}, {:?}]",
                    e, request.category, request.datetime_selection, request.bbox
                );
                guard.settle(PipelineStatus::Failed);
                return Err(e);
            }
        };

        let cycle = Mutex::new(CycleAccumulator::default());
        let cycle_ref = &cycle;
        let report = self
            .processor
            .run(
                features,
                move |raw: RawTileFeature| async move {
                    let tile = TileFeature::from_raw(raw);
                    let rendered = self.render_tile(&tile).await;
                    let mut acc = cycle_ref.lock().await;
                    acc.record(&tile);
                    if let Ok(true) = rendered {
                        acc.new_markers += 1;
                    }
                    rendered.map(|_| ())
                },
                |processed, total| self.publisher.publish_progress(progress_percent(processed, total)),
                |errors| {
                    if !errors.is_empty() {
                        debug!("Tiles skipped this cycle - count={}", errors.len());
                    }
                },
            )
            .await;

        let cycle = cycle.into_inner();
        let sentiment_score = match cycle.weighted.mean() {
            Ok(mean) => mean * 100.0,
            Err(e) => {
                debug!("{} - using neutral sentiment {}", e, self.neutral_sentiment);
                self.neutral_sentiment
            }
        };

        let summary = {
            let mut state = self.state.lock().await;
            let ranked_terms = merge_terms(
                cycle.tile_terms.iter().map(|(id, terms)| (id.as_str(), terms.as_slice())),
                &state.terms,
                viewport_changed,
            );
            state.terms = ranked_terms.clone();
            if state.change_generation == generation {
                state.viewport_changed = false;
            }
            HeatmapSummary { sentiment_score, ranked_terms }
        };
        guard.settle(PipelineStatus::Loaded);

        self.publisher.publish_progress(100);
        self.publisher.publish_summary(&summary);
        info!(
            "Refresh completed - tiles={}, new_markers={}, skipped={}, sentiment={:.1}, terms={}",
            report.total,
            cycle.new_markers,
            report.failed(),
            summary.sentiment_score,
            summary.ranked_terms.len()
        );

        Ok(RefreshOutcome::Loaded(CycleReport {
            tiles: report.total,
            new_markers: cycle.new_markers,
            tile_errors: report.errors,
            summary,
        }))
    }

    async fn fetch(&self, request: &TileRequest) -> Result<Vec<RawTileFeature>> {
        let response = self
            .fetcher
            .fetch_tiles(request)
            .await
            .map_err(|e| HeatmapError::fetch(None, e.to_string()))?;
        if !response.is_success() {
            return Err(HeatmapError::fetch(Some(response.status), "non-success response status"));
        }
        response
            .body
            .and_then(|body| body.into_features())
            .ok_or_else(|| HeatmapError::fetch(Some(response.status), "response body has no features array"))
    }

    /// `Ok(true)` when a new marker was added to the map.
    async fn render_tile(&self, tile: &TileFeature) -> Result<bool> {
        let Some(tile_id) = tile.tile_id.as_deref() else {
            return Ok(false);
        };
        let mut state = self.state.lock().await;
        if state.tiles.has(tile_id) {
            return Ok(false);
        }
        let record = state.tiles.get_or_create(tile_id, || feature_to_marker(tile))?;
        self.renderer.add_layer(tile_id, &record.marker);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_rounds_and_saturates() {
        assert_eq!(progress_percent(0, 3), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(0, 0), 100);
    }

    #[test]
    fn selection_requires_all_fields() {
        let mut selection = Selection::new("flood", "day", "2016-05-01");
        assert!(selection.validate().is_ok());

        selection.category = Some(String::new());
        assert_eq!(
            selection.validate(),
            Err(HeatmapError::InvalidSelection { missing: "category" })
        );
        assert!(Selection::default().validate().is_err());
    }

    #[test]
    fn accumulator_keeps_last_term_list_per_tile() {
        let mut acc = CycleAccumulator::default();
        acc.record(&TileFeature::new("t1", [0.0, 0.0], 0.5, 4, vec![AssociatedTerm::new("a", 1)]));
        acc.record(&TileFeature::new("t1", [0.0, 0.0], 0.5, 4, vec![AssociatedTerm::new("b", 2)]));
        acc.record(&TileFeature::new("t2", [0.0, 0.0], 0.5, 4, Vec::new()));

        assert_eq!(acc.tile_terms, vec![("t1".to_string(), vec![AssociatedTerm::new("b", 2)])]);
        assert_eq!(acc.weighted.len(), 3);
    }
}
