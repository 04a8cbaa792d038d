use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Source of raw randomness for a run. Production uses an entropy-seeded
/// [`XorShiftSource`]; tests substitute a fixed-seed one for reproducibility.
pub trait RandomSource: Send {
    fn next_u64(&mut self) -> u64;

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }
}

#[derive(Debug, Clone)]
pub struct XorShiftSource {
    state: u64,
}

impl XorShiftSource {
    pub fn seeded(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self { state }
    }

    pub fn from_entropy() -> Self {
        let mut hasher = DefaultHasher::new();
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
            .hash(&mut hasher);
        std::process::id().hash(&mut hasher);
        Self::seeded(hasher.finish())
    }
}

impl RandomSource for XorShiftSource {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }
}

pub(crate) fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Independent stream for one trial, derived from the master seed so that
/// parallel trials stay reproducible under a fixed seed.
pub(crate) fn derive_stream(master: u64, tag: u64) -> XorShiftSource {
    XorShiftSource::seeded(splitmix64(master ^ tag.rotate_left(32)))
}

// Coefficients of Acklam's rational approximation to the standard-normal
// inverse CDF. Absolute error below 1.15e-9 over the full branch domain.
const ICDF_A: [f64; 6] = [
    -3.969683028665376e+01,
    2.209460984245205e+02,
    -2.759285104469687e+02,
    1.383577518672690e+02,
    -3.066479806614716e+01,
    2.506628277459239e+00,
];
const ICDF_B: [f64; 5] = [
    -5.447609879822406e+01,
    1.615858368580409e+02,
    -1.556989798598866e+02,
    6.680131188771972e+01,
    -1.328068155288572e+01,
];
const ICDF_C: [f64; 6] = [
    -7.784894002430293e-03,
    -3.223964580411365e-01,
    -2.400758277161838e+00,
    -2.549732539343734e+00,
    4.374664141464968e+00,
    2.938163982698783e+00,
];
const ICDF_D: [f64; 4] = [
    7.784695709041462e-03,
    3.224671290700398e-01,
    2.445134137142996e+00,
    3.754408661907416e+00,
];

const ICDF_P_LOW: f64 = 0.02425;
const ICDF_P_HIGH: f64 = 1.0 - ICDF_P_LOW;

/// Maps a uniform probability to a standard-normal deviate. Input is clamped
/// to [0.0001, 0.9999] so the tails can never produce an infinity.
pub fn inverse_normal_cdf(p: f64) -> f64 {
    let p = p.clamp(0.0001, 0.9999);

    if p < ICDF_P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((ICDF_C[0] * q + ICDF_C[1]) * q + ICDF_C[2]) * q + ICDF_C[3]) * q + ICDF_C[4]) * q
            + ICDF_C[5])
            / ((((ICDF_D[0] * q + ICDF_D[1]) * q + ICDF_D[2]) * q + ICDF_D[3]) * q + 1.0)
    } else if p > ICDF_P_HIGH {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((ICDF_C[0] * q + ICDF_C[1]) * q + ICDF_C[2]) * q + ICDF_C[3]) * q + ICDF_C[4]) * q
            + ICDF_C[5])
            / ((((ICDF_D[0] * q + ICDF_D[1]) * q + ICDF_D[2]) * q + ICDF_D[3]) * q + 1.0)
    } else {
        let q = p - 0.5;
        let r = q * q;
        (((((ICDF_A[0] * r + ICDF_A[1]) * r + ICDF_A[2]) * r + ICDF_A[3]) * r + ICDF_A[4]) * r
            + ICDF_A[5])
            * q
            / (((((ICDF_B[0] * r + ICDF_B[1]) * r + ICDF_B[2]) * r + ICDF_B[3]) * r + ICDF_B[4])
                * r
                + 1.0)
    }
}

/// One-per-stratum uniform draws over the unit interval, randomly permuted so
/// successive callers see the strata in shuffled order.
pub(crate) fn stratified_uniforms(n: usize, source: &mut dyn RandomSource) -> Vec<f64> {
    let mut values: Vec<f64> = (0..n)
        .map(|i| (i as f64 + source.next_f64()) / n as f64)
        .collect();
    for i in (1..n).rev() {
        let j = (source.next_u64() % (i as u64 + 1)) as usize;
        values.swap(i, j);
    }
    values
}

/// `n` samples of `dims` standard-normal deviates, stratified per dimension.
/// Row `i` holds sample `i` across all dimensions.
pub(crate) fn stratified_normal_matrix(
    n: usize,
    dims: usize,
    source: &mut dyn RandomSource,
) -> Vec<Vec<f64>> {
    let mut rows = vec![vec![0.0; dims]; n];
    for dim in 0..dims {
        let uniforms = stratified_uniforms(n, source);
        for (row, u) in rows.iter_mut().zip(uniforms) {
            row[dim] = inverse_normal_cdf(u);
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn seeded_streams_are_reproducible() {
        let mut a = XorShiftSource::seeded(42);
        let mut b = XorShiftSource::seeded(42);
        for _ in 0..64 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn zero_seed_does_not_wedge_the_stream() {
        let mut source = XorShiftSource::seeded(0);
        let first = source.next_u64();
        let second = source.next_u64();
        assert_ne!(first, 0);
        assert_ne!(first, second);
    }

    #[test]
    fn derived_streams_differ_per_tag() {
        let mut a = derive_stream(7, 0);
        let mut b = derive_stream(7, 1);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn next_f64_stays_in_open_unit_interval() {
        let mut source = XorShiftSource::seeded(123);
        for _ in 0..10_000 {
            let v = source.next_f64();
            assert!(v > 0.0 && v < 1.0);
        }
    }

    #[test]
    fn inverse_cdf_matches_reference_quantiles() {
        assert_relative_eq!(inverse_normal_cdf(0.5), 0.0, epsilon = 1e-9);
        assert_relative_eq!(inverse_normal_cdf(0.975), 1.959963985, epsilon = 1e-6);
        assert_relative_eq!(inverse_normal_cdf(0.84134474), 0.9999998, epsilon = 1e-4);
        // Tail branch.
        assert_relative_eq!(inverse_normal_cdf(0.01), -2.326347874, epsilon = 1e-6);
        assert_relative_eq!(inverse_normal_cdf(0.99), 2.326347874, epsilon = 1e-6);
    }

    #[test]
    fn inverse_cdf_is_symmetric_and_monotone() {
        let mut prev = f64::NEG_INFINITY;
        for i in 1..1000 {
            let p = i as f64 / 1000.0;
            let z = inverse_normal_cdf(p);
            assert!(z.is_finite());
            assert!(z >= prev);
            prev = z;
            assert_relative_eq!(z, -inverse_normal_cdf(1.0 - p), epsilon = 1e-8);
        }
    }

    #[test]
    fn inverse_cdf_clamps_degenerate_probabilities() {
        assert!(inverse_normal_cdf(0.0).is_finite());
        assert!(inverse_normal_cdf(1.0).is_finite());
        assert!(inverse_normal_cdf(-5.0).is_finite());
        assert_relative_eq!(
            inverse_normal_cdf(0.0),
            inverse_normal_cdf(0.0001),
            epsilon = 1e-12
        );
    }

    #[test]
    fn stratified_uniforms_cover_every_stratum_once() {
        let n = 128;
        let mut source = XorShiftSource::seeded(9);
        let values = stratified_uniforms(n, &mut source);
        assert_eq!(values.len(), n);

        let mut seen = vec![false; n];
        for v in values {
            assert!((0.0..1.0).contains(&v));
            let stratum = (v * n as f64).floor() as usize;
            assert!(!seen[stratum], "stratum {stratum} drawn twice");
            seen[stratum] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn stratified_normals_are_standardized() {
        let n = 2000;
        let mut source = XorShiftSource::seeded(17);
        let rows = stratified_normal_matrix(n, 2, &mut source);
        assert_eq!(rows.len(), n);

        for dim in 0..2 {
            let mean = rows.iter().map(|r| r[dim]).sum::<f64>() / n as f64;
            let var = rows.iter().map(|r| (r[dim] - mean).powi(2)).sum::<f64>() / n as f64;
            assert!(mean.abs() < 0.05, "dim {dim} mean {mean}");
            assert!((var.sqrt() - 1.0).abs() < 0.1, "dim {dim} std {}", var.sqrt());
        }
    }

    #[test]
    fn stratified_matrix_dimensions_are_independent_permutations() {
        let n = 64;
        let mut source = XorShiftSource::seeded(3);
        let rows = stratified_normal_matrix(n, 3, &mut source);
        let same_order = rows.iter().all(|r| (r[0] - r[1]).abs() < 1e-12);
        assert!(!same_order);
    }
}
