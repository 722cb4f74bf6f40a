//! Hardware-aligned tile configurations.

use std::cmp::Ordering;

use smallvec::SmallVec;

/// One tile assignment per loop axis at one memory level.
pub type Tile = SmallVec<[i64; 4]>;

/// A candidate tile configuration: per-level tile shapes plus the derived
/// metrics the filter pipeline ranks by.
///
/// Levels are indexed outermost first: index 0 is the shared-memory level,
/// index `num_levels - 1` the register level.
#[derive(Debug, Clone, Default)]
pub struct AlignedConfig {
    pub space_tiles: Vec<Tile>,
    pub reduce_tiles: Vec<Tile>,
    /// Compute/memory-bound crossover ratio per level. Negative arithmetic
    /// results are folded onto the positive scale as `9999 - 1/k`.
    pub k_threshold: Vec<f64>,
    pub compute_intensive_ratio: Vec<f64>,
    pub single_thread_reg_usage: i64,
    pub space_production_threshold: i64,
    pub smem_usage: i64,
    pub threads_num: i64,
}

impl AlignedConfig {
    pub fn with_levels(num_levels: usize) -> Self {
        Self {
            space_tiles: vec![Tile::new(); num_levels],
            reduce_tiles: vec![Tile::new(); num_levels],
            k_threshold: vec![0.0; num_levels],
            compute_intensive_ratio: vec![0.0; num_levels],
            ..Self::default()
        }
    }

    /// Product of all per-level k-thresholds; the ascending sort key of the
    /// k-threshold filter.
    pub fn k_threshold_product(&self) -> f64 {
        self.k_threshold.iter().product()
    }
}

// Identity is the tile shape alone: derived metrics are a function of the
// tiles, and the dispatch union dedups on shape.
impl PartialEq for AlignedConfig {
    fn eq(&self, other: &Self) -> bool {
        self.space_tiles == other.space_tiles && self.reduce_tiles == other.reduce_tiles
    }
}

impl Eq for AlignedConfig {}

/// Lexicographic over `space_tiles` then `reduce_tiles`, level-major,
/// axis-minor. A stable sort/dedup key, not a performance ranking.
impl Ord for AlignedConfig {
    fn cmp(&self, other: &Self) -> Ordering {
        self.space_tiles
            .cmp(&other.space_tiles)
            .then_with(|| self.reduce_tiles.cmp(&other.reduce_tiles))
    }
}

impl PartialOrd for AlignedConfig {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
