//! Integer and sampling helpers shared across the search engine.

use once_cell::sync::Lazy;
use rand::Rng;
use rand::rngs::StdRng;

/// Primes below 100; enough to factor the loop extents seen in practice
/// before falling back to trial division.
static SMALL_PRIMES: Lazy<Vec<i64>> = Lazy::new(|| {
    vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97]
});

pub fn ceil_div(a: i64, b: i64) -> i64 {
    debug_assert!(b > 0);
    (a + b - 1) / b
}

/// Round `a` up to a multiple of `b`.
pub fn round_up(a: i64, b: i64) -> i64 {
    ceil_div(a, b) * b
}

pub fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}

pub fn lcm(a: i64, b: i64) -> i64 {
    a / gcd(a, b) * b
}

/// Prime factorization in ascending order, with multiplicity.
pub fn prime_factors(mut n: i64) -> Vec<i64> {
    let mut out = Vec::new();
    for &p in SMALL_PRIMES.iter() {
        while n % p == 0 {
            out.push(p);
            n /= p;
        }
        if n == 1 {
            return out;
        }
    }
    let mut p = 101;
    while p * p <= n {
        while n % p == 0 {
            out.push(p);
            n /= p;
        }
        p += 2;
    }
    if n > 1 {
        out.push(n);
    }
    out
}

/// Cumulative products of the prime factorization of `n`: for 64 this is
/// `[2, 4, 8, 16, 32, 64]`. The tile generator prepends 1 to obtain the
/// admissible per-axis multipliers.
pub fn cumulative_prime_products(n: i64) -> Vec<i64> {
    let mut acc = 1;
    prime_factors(n)
        .into_iter()
        .map(|p| {
            acc *= p;
            acc
        })
        .collect()
}

/// All positive divisors of `n`, ascending.
pub fn divisors(n: i64) -> Vec<i64> {
    let mut out = Vec::new();
    let mut d = 1;
    while d * d <= n {
        if n % d == 0 {
            out.push(d);
            if d != n / d {
                out.push(n / d);
            }
        }
        d += 1;
    }
    out.sort_unstable();
    out
}

/// Indices that would sort `scores` in descending order.
pub fn argsort_desc(scores: &[f64]) -> Vec<usize> {
    let mut ids: Vec<usize> = (0..scores.len()).collect();
    ids.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(std::cmp::Ordering::Equal));
    ids
}

/// Normalized inclusive prefix sums of non-negative weights, for roulette
/// sampling. Zero-mass input degrades to a uniform distribution.
pub fn prefix_sum_probs(weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
    let mut acc = 0.0;
    if total <= 0.0 {
        let n = weights.len().max(1) as f64;
        return (1..=weights.len()).map(|i| i as f64 / n).collect();
    }
    weights
        .iter()
        .map(|w| {
            if w.is_finite() && *w > 0.0 {
                acc += w / total;
            }
            acc
        })
        .collect()
}

/// Sample an index from an inclusive prefix-sum distribution.
pub fn sample_prefix_sum(prefix: &[f64], rng: &mut StdRng) -> usize {
    let r: f64 = rng.r#gen();
    match prefix.binary_search_by(|p| p.partial_cmp(&r).unwrap_or(std::cmp::Ordering::Less)) {
        Ok(i) | Err(i) => i.min(prefix.len().saturating_sub(1)),
    }
}

/// Random factorization of `extent` into `nparts` factors whose product
/// divides the extent. Parts are drawn from the divisor lattice innermost
/// first, each capped by `max_innermost` for the last part.
pub fn random_factorization(
    extent: i64,
    nparts: usize,
    max_innermost: i64,
    rng: &mut StdRng,
) -> Vec<i64> {
    let mut rest = extent.max(1);
    let mut parts = vec![1i64; nparts];
    for slot in (0..nparts).rev() {
        let cap = if slot == nparts - 1 { max_innermost } else { rest };
        let choices: Vec<i64> = divisors(rest).into_iter().filter(|d| *d <= cap).collect();
        let pick = choices[rng.gen_range(0..choices.len())];
        parts[slot] = pick;
        rest /= pick;
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use test_case::test_case;

    #[test_case(100, 32, 4; "rounds up")]
    #[test_case(96, 32, 3; "exact multiple")]
    #[test_case(1, 32, 1; "below divisor")]
    fn test_ceil_div(a: i64, b: i64, expect: i64) {
        assert_eq!(ceil_div(a, b), expect);
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(100, 32), 128);
        assert_eq!(round_up(96, 32), 96);
    }

    #[test]
    fn test_lcm() {
        assert_eq!(lcm(4, 6), 12);
        assert_eq!(lcm(8, 8), 8);
        assert_eq!(lcm(3, 8), 24);
    }

    #[test]
    fn test_prime_factors() {
        assert_eq!(prime_factors(64), vec![2; 6]);
        assert_eq!(prime_factors(60), vec![2, 2, 3, 5]);
        assert_eq!(prime_factors(97), vec![97]);
        assert_eq!(prime_factors(1), Vec::<i64>::new());
    }

    #[test]
    fn test_cumulative_prime_products() {
        assert_eq!(cumulative_prime_products(64), vec![2, 4, 8, 16, 32, 64]);
        assert_eq!(cumulative_prime_products(12), vec![2, 4, 12]);
    }

    #[test]
    fn test_divisors() {
        assert_eq!(divisors(12), vec![1, 2, 3, 4, 6, 12]);
        assert_eq!(divisors(1), vec![1]);
    }

    #[test]
    fn test_argsort_desc() {
        assert_eq!(argsort_desc(&[0.1, 0.9, 0.5]), vec![1, 2, 0]);
    }

    #[test]
    fn test_prefix_sum_probs_normalizes() {
        let probs = prefix_sum_probs(&[1.0, 1.0, 2.0]);
        assert!((probs[0] - 0.25).abs() < 1e-9);
        assert!((probs[1] - 0.5).abs() < 1e-9);
        assert!((probs[2] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_prefix_sum_probs_zero_mass_is_uniform() {
        let probs = prefix_sum_probs(&[0.0, 0.0]);
        assert!((probs[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_random_factorization_divides_extent() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..64 {
            let parts = random_factorization(64, 3, 16, &mut rng);
            let product: i64 = parts.iter().product();
            assert_eq!(64 % product, 0);
            assert!(parts[2] <= 16);
        }
    }
}
