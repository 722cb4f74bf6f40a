//! Search-engine configuration.
//!
//! Typed parameters with bon builders and environment-variable fallbacks.

use bon::bon;

// ============================================================================
// EVOLUTIONARY SEARCH PARAMETERS
// ============================================================================

/// Knobs for population sampling and the genetic search.
#[derive(Debug, Clone, PartialEq)]
pub struct EvolutionParams {
    /// Population size per generation.
    pub population: usize,
    /// Minimum accepted schedules before initial sampling stops.
    pub sample_init_min_pop: usize,
    /// Fraction of the population seeded from already-measured schedules.
    pub use_measured_ratio: f64,
    /// Generations per evolutionary round.
    pub num_iters: usize,
    /// Probability of mutating (rather than copying) a sampled parent.
    pub mutation_prob: f64,
}

impl Default for EvolutionParams {
    fn default() -> Self {
        Self {
            population: 512,
            sample_init_min_pop: 50,
            use_measured_ratio: 0.2,
            num_iters: 4,
            mutation_prob: 0.85,
        }
    }
}

// ============================================================================
// TOP-LEVEL SEARCH PARAMETERS
// ============================================================================

/// Parameters of the top-level search loop.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    /// Fraction of each measurement batch picked at random instead of by score.
    pub eps_greedy: f64,
    /// Rounds tolerated with an empty measurement batch before giving up.
    pub empty_retry_count: usize,
    /// Largest innermost split factor random tile filling may assign.
    pub max_innermost_split_factor: i64,
    /// Unroll pragma candidates, in increasing aggressiveness.
    pub auto_unroll_configs: Vec<i64>,
    pub evolution: EvolutionParams,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            eps_greedy: 0.05,
            empty_retry_count: 5,
            max_innermost_split_factor: 64,
            auto_unroll_configs: vec![0, 16, 64, 512, 1024],
            evolution: EvolutionParams::default(),
        }
    }
}

#[bon]
impl SearchParams {
    /// Create search parameters with builder pattern.
    #[builder]
    pub fn builder(
        #[builder(default = 0.05)] eps_greedy: f64,
        #[builder(default = 5)] empty_retry_count: usize,
        #[builder(default = 64)] max_innermost_split_factor: i64,
        #[builder(default = vec![0, 16, 64, 512, 1024])] auto_unroll_configs: Vec<i64>,
        #[builder(default = 512)] population: usize,
        #[builder(default = 50)] sample_init_min_pop: usize,
        #[builder(default = 0.2)] use_measured_ratio: f64,
        #[builder(default = 4)] num_iters: usize,
        #[builder(default = 0.85)] mutation_prob: f64,
    ) -> Self {
        Self {
            eps_greedy,
            empty_retry_count,
            max_innermost_split_factor,
            auto_unroll_configs,
            evolution: EvolutionParams {
                population,
                sample_init_min_pop,
                use_measured_ratio,
                num_iters,
                mutation_prob,
            },
        }
    }

    /// Create parameters from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `TESSERA_EPS_GREEDY` - Random fraction per measurement batch (default: 0.05)
    /// * `TESSERA_POPULATION` - Evolutionary population size (default: 512)
    /// * `TESSERA_EVOLUTION_ITERS` - Generations per round (default: 4)
    /// * `TESSERA_MUTATION_PROB` - Mutation probability (default: 0.85)
    pub fn from_env() -> Self {
        let mut params = Self::default();
        if let Ok(s) = std::env::var("TESSERA_EPS_GREEDY")
            && let Ok(v) = s.parse::<f64>()
        {
            params.eps_greedy = v;
        }
        if let Ok(s) = std::env::var("TESSERA_POPULATION")
            && let Ok(v) = s.parse::<usize>()
            && v > 0
        {
            params.evolution.population = v;
        }
        if let Ok(s) = std::env::var("TESSERA_EVOLUTION_ITERS")
            && let Ok(v) = s.parse::<usize>()
        {
            params.evolution.num_iters = v;
        }
        if let Ok(s) = std::env::var("TESSERA_MUTATION_PROB")
            && let Ok(v) = s.parse::<f64>()
        {
            params.evolution.mutation_prob = v;
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = SearchParams::default();
        assert_eq!(params.eps_greedy, 0.05);
        assert_eq!(params.evolution.population, 512);
        assert_eq!(params.evolution.num_iters, 4);
    }

    #[test]
    fn test_builder_overrides() {
        let params = SearchParams::builder().eps_greedy(0.3).population(16).num_iters(2).build();
        assert_eq!(params.eps_greedy, 0.3);
        assert_eq!(params.evolution.population, 16);
        assert_eq!(params.evolution.num_iters, 2);
        assert_eq!(params.empty_retry_count, 5); // default
    }
}
