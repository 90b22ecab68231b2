use std::collections::HashMap;

use geojson::Feature;
use tracing::debug;

use crate::error::Result;

/// Map layer the tile markers are drawn on.
pub trait TileRenderer {
    fn add_layer(&self, tile_id: &str, marker: &Feature);
    fn clear_layers(&self);
}

/// Tile id → rendered value cache.
#[derive(Debug)]
pub struct TileStore<R> {
    tiles: HashMap<String, R>,
}

impl<R> Default for TileStore<R> {
    fn default() -> Self {
        Self { tiles: HashMap::new() }
    }
}

impl<R> TileStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value or builds it once with `factory`.
    ///
    /// A failing factory leaves nothing behind, so the id can be retried.
    pub fn get_or_create<F>(&mut self, tile_id: &str, factory: F) -> Result<&R>
    where
        F: FnOnce() -> Result<R>,
    {
        if !self.tiles.contains_key(tile_id) {
            let value = factory()?;
            self.tiles.insert(tile_id.to_string(), value);
        }
        Ok(&self.tiles[tile_id])
    }

    pub fn get(&self, tile_id: &str) -> Option<&R> {
        self.tiles.get(tile_id)
    }

    pub fn has(&self, tile_id: &str) -> bool {
        self.tiles.contains_key(tile_id)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Drops every cached tile and every layer on the renderer.
    pub fn clear<T: TileRenderer + ?Sized>(&mut self, renderer: &T) {
        debug!("Clearing tile store - tiles={}", self.tiles.len());
        renderer.clear_layers();
        self.tiles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HeatmapError;
    use std::cell::Cell;

    #[derive(Default)]
    struct CountingRenderer {
        clears: Cell<usize>,
    }

    impl TileRenderer for CountingRenderer {
        fn add_layer(&self, _tile_id: &str, _marker: &Feature) {}
        fn clear_layers(&self) {
            self.clears.set(self.clears.get() + 1);
        }
    }

    #[test]
    fn second_call_returns_cached_value() {
        let mut store: TileStore<u32> = TileStore::new();
        let calls = Cell::new(0);

        let first = *store
            .get_or_create("t1", || {
                calls.set(calls.get() + 1);
                Ok(7)
            })
            .unwrap();
        let second = *store
            .get_or_create("t1", || {
                calls.set(calls.get() + 1);
                Err(HeatmapError::conversion("t1", "should not run"))
            })
            .unwrap();

        assert_eq!((first, second), (7, 7));
        assert_eq!(store.get("t1"), Some(&7));
        assert_eq!(store.get("t2"), None);
        assert_eq!(calls.get(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn failed_factory_is_not_cached() {
        let mut store: TileStore<u32> = TileStore::new();
        let err = store.get_or_create("bad", || Err(HeatmapError::conversion("bad", "no coordinates")));
        assert!(err.is_err());
        assert!(!store.has("bad"));

        assert_eq!(store.get_or_create("bad", || Ok(3)).copied(), Ok(3));
        assert!(store.has("bad"));
    }

    #[test]
    fn clear_empties_store_and_layers() {
        let mut store: TileStore<u32> = TileStore::new();
        let renderer = CountingRenderer::default();
        store.get_or_create("a", || Ok(1)).unwrap();
        store.get_or_create("b", || Ok(2)).unwrap();

        store.clear(&renderer);

        assert!(store.is_empty());
        assert_eq!(renderer.clears.get(), 1);
    }
}
