use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};

use crate::error::{HeatmapError, Result};
use crate::processor::DEFAULT_CONCURRENCY_LIMIT;

pub const MIN_ZOOM: u8 = 6;
pub const MAX_ZOOM: u8 = 17;

/// Settings for one heat map instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapConfig {
    pub site_key: String,
    /// Tiles converted concurrently within one refresh.
    pub concurrency_limit: usize,
    /// Score published when a cycle has no weighted observations (0..=100).
    pub neutral_sentiment: f64,
    /// `"lat,lon"`
    pub default_location: String,
    pub default_zoom: u8,
    pub category: Option<String>,
    /// Categories the front end cycles through.
    pub categories: Vec<String>,
    pub timespan_type: Option<String>,
    pub datetime_selection: Option<String>,
    /// Directory with `tiles_<category>.json` files; synthetic tiles when unset.
    pub data_dir: Option<PathBuf>,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            site_key: "default".to_string(),
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            neutral_sentiment: 50.0,
            default_location: "52.2297,21.0122".to_string(),
            default_zoom: 8,
            category: None,
            categories: Vec::new(),
            timespan_type: None,
            datetime_selection: None,
            data_dir: None,
        }
    }
}

impl HeatmapConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| HeatmapError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            serde_json::from_slice(&data).map_err(|e| HeatmapError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(HeatmapError::InvalidLimit);
        }
        if !(0.0..=100.0).contains(&self.neutral_sentiment) {
            return Err(HeatmapError::Config(format!(
                "neutral_sentiment {} outside 0..=100",
                self.neutral_sentiment
            )));
        }
        if !(MIN_ZOOM..=MAX_ZOOM).contains(&self.default_zoom) {
            return Err(HeatmapError::Config(format!(
                "default_zoom {} outside {}..={}",
                self.default_zoom, MIN_ZOOM, MAX_ZOOM
            )));
        }
        self.location().map(|_| ())
    }

    /// Parses `default_location` into `(lat, lon)`.
    pub fn location(&self) -> Result<(f64, f64)> {
        let invalid = || HeatmapError::Config(format!("Invalid default location {}", self.default_location));
        let parts: Vec<&str> = self.default_location.split(',').collect();
        let [lat, lon] = parts.as_slice() else {
            return Err(invalid());
        };
        let lat: f64 = lat.trim().parse().map_err(|_| invalid())?;
        let lon: f64 = lon.trim().parse().map_err(|_| invalid())?;
        if lat.abs() > 90.0 || lon.abs() > 180.0 {
            return Err(invalid());
        }
        Ok((lat, lon))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = HeatmapConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency_limit, 200);
        assert_eq!(config.location().unwrap(), (52.2297, 21.0122));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: HeatmapConfig =
            serde_json::from_str(r#"{ "site_key": "ocha", "category": "flood", "concurrency_limit": 16 }"#).unwrap();
        assert_eq!(config.site_key, "ocha");
        assert_eq!(config.category.as_deref(), Some("flood"));
        assert_eq!(config.concurrency_limit, 16);
        assert_eq!(config.default_zoom, 8);
    }

    #[test]
    fn rejects_bad_values() {
        let config = HeatmapConfig { concurrency_limit: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(HeatmapError::InvalidLimit));

        let config = HeatmapConfig { default_location: "52.2".into(), ..Default::default() };
        assert!(matches!(config.validate(), Err(HeatmapError::Config(_))));

        let config = HeatmapConfig { default_zoom: 3, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
