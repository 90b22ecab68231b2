use thiserror::Error;

pub type Result<T> = std::result::Result<T, HeatmapError>;

/// Failure modes of the tile aggregation pipeline.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HeatmapError {
    /// A refresh was requested before the selection was complete.
    #[error("Invalid selection: missing {missing}")]
    InvalidSelection { missing: &'static str },

    /// Transport error, non-success status or an unusable response body.
    #[error("Tile fetch failed (status {status:?}): {reason}")]
    FetchFailure { status: Option<u16>, reason: String },

    /// A single tile could not be turned into a map marker.
    #[error("Tile {tile_id} could not be converted: {reason}")]
    FeatureConversion { tile_id: String, reason: String },

    /// Weighted mean requested with no (non-zero weight) observations.
    #[error("No weighted observations were accumulated")]
    EmptyAccumulator,

    #[error("Concurrency limit must be greater than zero")]
    InvalidLimit,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HeatmapError {
    pub fn conversion(tile_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FeatureConversion { tile_id: tile_id.into(), reason: reason.into() }
    }

    pub fn fetch(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::FetchFailure { status, reason: reason.into() }
    }
}
