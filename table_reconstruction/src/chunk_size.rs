use cube_config::FetchConfig;
use tracing::debug;

/// Chooses the page size for the pages after the first, from the size of the first page.
///
/// With `observed_bytes` for `initial_limit` rows, the estimate is the row count expected to fill
/// `target_byte_budget`, never less than `min_rows`. There is no upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSizeEstimator {
    target_byte_budget: u64,
    min_rows: usize,
}

impl ChunkSizeEstimator {
    pub fn new(target_byte_budget: u64, min_rows: usize) -> Self {
        Self {
            target_byte_budget,
            min_rows,
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(config.target_chunk_bytes.as_u64(), config.min_chunk_rows)
    }

    /// `max(min_rows, floor(initial_limit * target_byte_budget / observed_bytes))`.
    /// An empty first page is treated as one byte.
    pub fn estimate(&self, observed_bytes: usize, initial_limit: usize) -> usize {
        let observed = (observed_bytes as u128).max(1);
        let rows = (initial_limit as u128) * (self.target_byte_budget as u128) / observed;
        let rows = usize::try_from(rows).unwrap_or(usize::MAX);
        let chunk_size = rows.max(self.min_rows);

        debug!(observed_bytes, initial_limit, chunk_size, "Estimated chunk size");
        chunk_size
    }

    /// The explicit chunk size if there is one, the estimate otherwise.
    pub fn resolve(&self, explicit: Option<usize>, observed_bytes: usize, initial_limit: usize) -> usize {
        match explicit {
            Some(rows) => rows,
            None => self.estimate(observed_bytes, initial_limit),
        }
    }
}

impl Default for ChunkSizeEstimator {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}
