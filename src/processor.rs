//! Bounded-concurrency batch runner.
//!
//! Workers are driven from a single `buffer_unordered` stream, so at most
//! `limit` of them are in flight and they only interleave at await points.
//! Progress and completion callbacks run on the driving loop, never
//! concurrently with each other.

use std::future::Future;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::error::{HeatmapError, Result};

/// Conversions allowed in flight at once unless configured otherwise.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 200;

/// Outcome of one batch.
#[derive(Debug)]
pub struct BatchReport<E> {
    pub total: usize,
    pub succeeded: usize,
    pub errors: Vec<E>,
}

impl<E> BatchReport<E> {
    pub fn failed(&self) -> usize {
        self.errors.len()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BoundedProcessor {
    limit: usize,
}

impl Default for BoundedProcessor {
    fn default() -> Self {
        Self { limit: DEFAULT_CONCURRENCY_LIMIT }
    }
}

impl BoundedProcessor {
    pub fn new(limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(HeatmapError::InvalidLimit);
        }
        Ok(Self { limit })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Runs `worker` once per item, keeping going past individual failures.
    ///
    /// `on_progress(processed, total)` fires after every item and
    /// `on_complete` exactly once with the collected errors.
    pub async fn run<T, E, W, Fut, P, C>(
        &self,
        items: impl IntoIterator<Item = T>,
        worker: W,
        mut on_progress: P,
        on_complete: C,
    ) -> BatchReport<E>
    where
        E: std::fmt::Display,
        W: FnMut(T) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        P: FnMut(usize, usize),
        C: FnOnce(&[E]),
    {
        let items: Vec<T> = items.into_iter().collect();
        let total = items.len();
        debug!("Batch started - items={}, limit={}", total, self.limit);

        let mut results = stream::iter(items).map(worker).buffer_unordered(self.limit);
        let mut processed = 0usize;
        let mut errors = Vec::new();

        while let Some(result) = results.next().await {
            processed += 1;
            if let Err(e) = result {
                warn!("Batch item failed - {}", e);
                errors.push(e);
            }
            on_progress(processed, total);
        }

        on_complete(&errors);
        debug!("Batch completed - processed={}, failed={}", processed, errors.len());

        BatchReport { total, succeeded: total - errors.len(), errors }
    }
}
