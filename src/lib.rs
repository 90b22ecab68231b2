pub mod cluster;
pub mod config;
pub mod data;
pub mod error;
pub mod fetch;
pub mod marker;
pub mod pipeline;
pub mod processor;
pub mod terms;
pub mod tile_store;
pub mod weighted_mean;

pub use cluster::{ClusterIcon, ClusterSize, SentimentCategory, SizeClass, classify, format_mentions, sentiment_category};
pub use config::HeatmapConfig;
pub use data::{AssociatedTerm, RawTileFeature, TileFeature, TileResponseBody};
pub use error::{HeatmapError, Result};
pub use fetch::{FetchError, FetchResponse, FileFetcher, SyntheticFetcher, TileFetcher, TileRequest};
pub use marker::{TileRecord, feature_to_marker};
pub use pipeline::{
    CycleReport, HeatmapPipeline, HeatmapSummary, PipelineStatus, RefreshOutcome, Selection, SummaryPublisher, Viewport,
};
pub use processor::{BatchReport, BoundedProcessor};
pub use terms::{RankedTerms, TermEntry, enabled_filter, merge_terms};
pub use tile_store::{TileRenderer, TileStore};
pub use weighted_mean::WeightedMean;
