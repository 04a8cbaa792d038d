use super::random::RandomSource;
use super::types::{RateAssumptions, RateBounds};

pub(crate) const FACTOR_COUNT: usize = 4;

const STOCKS: usize = 0;
const BONDS: usize = 1;
const CASH: usize = 2;
const INFLATION: usize = 3;

#[derive(Copy, Clone, Debug)]
struct FactorParams {
    mean: f64,
    std: f64,
}

// Long-run annual parameters. Inflation is modeled as a fourth factor so the
// sampler produces it inside the same correlated draw as the asset classes.
static HISTORICAL: [FactorParams; FACTOR_COUNT] = [
    FactorParams {
        mean: 0.100,
        std: 0.160,
    },
    FactorParams {
        mean: 0.045,
        std: 0.055,
    },
    FactorParams {
        mean: 0.025,
        std: 0.010,
    },
    FactorParams {
        mean: 0.025,
        std: 0.015,
    },
];

// Strictly diagonally dominant, hence positive definite.
static CORRELATION: [[f64; FACTOR_COUNT]; FACTOR_COUNT] = [
    [1.00, -0.10, 0.00, -0.10],
    [-0.10, 1.00, 0.30, -0.20],
    [0.00, 0.30, 1.00, 0.50],
    [-0.10, -0.20, 0.50, 1.00],
];

/// Lower-triangular Cholesky factor. The diagonal is floored at zero and a
/// zero pivot divides as one, so a semi-definite input degrades instead of
/// producing NaN.
pub(crate) fn cholesky_factor(
    matrix: &[[f64; FACTOR_COUNT]; FACTOR_COUNT],
) -> [[f64; FACTOR_COUNT]; FACTOR_COUNT] {
    let mut factor = [[0.0; FACTOR_COUNT]; FACTOR_COUNT];
    for i in 0..FACTOR_COUNT {
        for j in 0..=i {
            let dot: f64 = (0..j).map(|k| factor[i][k] * factor[j][k]).sum();
            if i == j {
                factor[i][j] = (matrix[i][i] - dot).max(0.0).sqrt();
            } else {
                let pivot = if factor[j][j] == 0.0 {
                    1.0
                } else {
                    factor[j][j]
                };
                factor[i][j] = (matrix[i][j] - dot) / pivot;
            }
        }
    }
    factor
}

#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct YearRates {
    pub stocks: f64,
    pub bonds: f64,
    pub cash: f64,
    pub inflation: f64,
}

pub(crate) struct MarketModel {
    factor: [[f64; FACTOR_COUNT]; FACTOR_COUNT],
    assumptions: RateAssumptions,
}

impl MarketModel {
    pub fn new(assumptions: Option<RateAssumptions>) -> Self {
        Self {
            factor: cholesky_factor(&CORRELATION),
            assumptions: assumptions.unwrap_or_default(),
        }
    }

    fn correlate(&self, deviates: &[f64]) -> [f64; FACTOR_COUNT] {
        let mut out = [0.0; FACTOR_COUNT];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = (0..=i).map(|j| self.factor[i][j] * deviates[j]).sum();
        }
        out
    }

    /// One year of factor rates for one trial. `deviates` is that trial's row
    /// of the stratified sample matrix; `source` supplies the dedicated
    /// uniform values for bound-based assumptions, which intentionally bypass
    /// the correlation structure.
    pub fn rates_for(&self, deviates: &[f64], source: &mut dyn RandomSource) -> YearRates {
        let z = self.correlate(deviates);

        let stocks = match self.assumptions.stocks {
            Some(bounds) => draw_uniform(bounds, source),
            None => HISTORICAL[STOCKS].mean + HISTORICAL[STOCKS].std * z[STOCKS],
        };
        let bonds = match self.assumptions.bonds {
            Some(bounds) => draw_uniform(bounds, source),
            None => HISTORICAL[BONDS].mean + HISTORICAL[BONDS].std * z[BONDS],
        };
        // Cash never takes a bound override.
        let cash = HISTORICAL[CASH].mean + HISTORICAL[CASH].std * z[CASH];
        let inflation = match self.assumptions.inflation {
            Some(bounds) if bounds.sentiment.is_some() => draw_triangular(bounds, source),
            Some(bounds) => draw_uniform(bounds, source),
            None => HISTORICAL[INFLATION].mean + HISTORICAL[INFLATION].std * z[INFLATION],
        };

        YearRates {
            stocks,
            bonds,
            cash,
            inflation,
        }
    }
}

fn span(bounds: RateBounds) -> (f64, f64) {
    let lo = bounds.optimistic.min(bounds.pessimistic);
    let hi = bounds.optimistic.max(bounds.pessimistic);
    (lo, hi)
}

fn draw_uniform(bounds: RateBounds, source: &mut dyn RandomSource) -> f64 {
    let (lo, hi) = span(bounds);
    lo + source.next_f64() * (hi - lo)
}

/// Triangular draw over the bound range with the sentiment anchor as mode,
/// via the two-branch inverse CDF.
fn draw_triangular(bounds: RateBounds, source: &mut dyn RandomSource) -> f64 {
    let (lo, hi) = span(bounds);
    let width = hi - lo;
    if width <= 0.0 {
        return lo;
    }
    let mode = bounds.sentiment.unwrap_or((lo + hi) * 0.5).clamp(lo, hi);

    let u = source.next_f64();
    let cut = (mode - lo) / width;
    if u < cut {
        lo + (u * width * (mode - lo)).sqrt()
    } else {
        hi - ((1.0 - u) * width * (hi - mode)).sqrt()
    }
}
