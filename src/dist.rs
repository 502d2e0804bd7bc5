//! Count distributions for per-side event rates.
//!
//! [Distribution] is a tagged variant over Poisson and Negative-Binomial, sharing one contract:
//! point and cumulative probabilities, quantiles, sampling and summary statistics. Which variant
//! applies to a market is decided by [MarketModel], a pure function of the observed mean and
//! variance.

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tinyrand::Rand;

/// Smallest admissible rate. Non-positive or non-finite rates are clamped to this value.
pub const MIN_RATE: f64 = 0.01;

/// Largest admissible rate.
pub const MAX_RATE: f64 = 100.0;

/// Floor applied to the dispersion derived from sample moments.
pub const MIN_ALPHA: f64 = 0.1;

/// Default interval levels reported by [Distribution::summary].
pub const DEFAULT_LEVELS: [f64; 3] = [0.5, 0.8, 0.95];

const TAIL_EPSILON: f64 = 1e-12;
const MAX_SUPPORT: usize = 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Poisson,
    NegativeBinomial,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Distribution {
    Poisson { lambda: f64 },
    /// Parametrised by mean μ and dispersion α, so that the variance is μ + αμ².
    NegativeBinomial { mean: f64, alpha: f64 },
}

#[inline]
fn sanitise_rate(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.clamp(MIN_RATE, MAX_RATE)
    } else if rate == f64::INFINITY {
        MAX_RATE
    } else {
        MIN_RATE
    }
}

impl Distribution {
    pub fn poisson(lambda: f64) -> Self {
        Self::Poisson {
            lambda: sanitise_rate(lambda),
        }
    }

    pub fn negative_binomial(mean: f64, alpha: f64) -> Self {
        Self::NegativeBinomial {
            mean: sanitise_rate(mean),
            alpha: sanitise_rate(alpha),
        }
    }

    pub fn family(&self) -> Family {
        match self {
            Distribution::Poisson { .. } => Family::Poisson,
            Distribution::NegativeBinomial { .. } => Family::NegativeBinomial,
        }
    }

    pub fn mean(&self) -> f64 {
        match *self {
            Distribution::Poisson { lambda } => lambda,
            Distribution::NegativeBinomial { mean, .. } => mean,
        }
    }

    pub fn variance(&self) -> f64 {
        match *self {
            Distribution::Poisson { lambda } => lambda,
            Distribution::NegativeBinomial { mean, alpha } => mean + alpha * mean * mean,
        }
    }

    /// Iterates over successive point probabilities `P(X = 0), P(X = 1), ...`.
    pub fn pmf_iter(&self) -> PmfIter {
        match *self {
            Distribution::Poisson { lambda } => PmfIter {
                k: 0,
                prob: f64::exp(-lambda),
                step: Step::Poisson { lambda },
            },
            Distribution::NegativeBinomial { mean, alpha } => {
                let n = 1.0 / alpha;
                let p = 1.0 / (1.0 + alpha * mean);
                PmfIter {
                    k: 0,
                    prob: p.powf(n),
                    step: Step::NegativeBinomial { n, q: 1.0 - p },
                }
            }
        }
    }

    pub fn pmf(&self, k: u32) -> f64 {
        self.pmf_iter().nth(k as usize).unwrap_or(0.0)
    }

    pub fn cdf(&self, k: u32) -> f64 {
        f64::min(1.0, self.pmf_iter().take(k as usize + 1).sum())
    }

    /// Point probabilities over the support, truncated once the remaining tail mass is
    /// negligible.
    pub fn support(&self) -> Vec<f64> {
        let mut probs = Vec::with_capacity(16);
        let mut cumulative = 0.0;
        let mean = self.mean();
        for prob in self.pmf_iter().take(MAX_SUPPORT) {
            probs.push(prob);
            cumulative += prob;
            if cumulative >= 1.0 - TAIL_EPSILON && probs.len() as f64 > mean {
                break;
            }
        }
        probs
    }

    /// Smallest `k` such that `P(X <= k) >= q`.
    pub fn quantile(&self, q: f64) -> u32 {
        let q = q.clamp(0.0, 1.0);
        let mut cumulative = 0.0;
        let mut last = 0;
        for (k, prob) in self.pmf_iter().take(MAX_SUPPORT).enumerate() {
            cumulative += prob;
            last = k;
            if cumulative >= q {
                break;
            }
        }
        last as u32
    }

    pub fn mode(&self) -> u32 {
        let mut mode = 0;
        let mut max = f64::MIN;
        for (k, prob) in self.support().into_iter().enumerate() {
            if prob > max {
                max = prob;
                mode = k;
            }
        }
        mode as u32
    }

    pub fn median(&self) -> u32 {
        self.quantile(0.5)
    }

    /// Central interval containing at least `level` of the probability mass.
    pub fn interval(&self, level: f64) -> Interval {
        let tail = (1.0 - level.clamp(0.0, 1.0)) / 2.0;
        Interval {
            level,
            lower: self.quantile(tail),
            upper: self.quantile(1.0 - tail),
        }
    }

    /// Probability of strictly exceeding `line`, e.g. `prob_over(2.5) = P(X >= 3)`.
    pub fn prob_over(&self, line: f64) -> f64 {
        if line < 0.0 {
            return 1.0;
        }
        f64::max(0.0, 1.0 - self.cdf(line.floor() as u32))
    }

    /// Probability of falling strictly below `line`, e.g. `prob_under(2.5) = P(X <= 2)`.
    pub fn prob_under(&self, line: f64) -> f64 {
        if line <= 0.0 {
            return 0.0;
        }
        self.cdf(line.ceil() as u32 - 1)
    }

    pub fn prob_exact(&self, k: u32) -> f64 {
        self.pmf(k)
    }

    /// Probability of `lower <= X <= upper`.
    pub fn prob_range(&self, lower: u32, upper: u32) -> f64 {
        if lower > upper {
            return 0.0;
        }
        self.pmf_iter()
            .take(upper as usize + 1)
            .skip(lower as usize)
            .sum()
    }

    /// Draws one value by inversion of the cumulative distribution.
    pub fn sample(&self, rand: &mut impl Rand) -> u32 {
        let random = random_f64(rand);
        let mut cumulative = 0.0;
        let mut last = 0;
        for (k, prob) in self.pmf_iter().take(MAX_SUPPORT).enumerate() {
            cumulative += prob;
            last = k;
            if cumulative >= random {
                break;
            }
        }
        last as u32
    }

    pub fn summary(&self, levels: &[f64]) -> Summary {
        Summary {
            family: self.family(),
            mean: self.mean(),
            variance: self.variance(),
            median: self.median(),
            mode: self.mode(),
            intervals: levels.iter().map(|&level| self.interval(level)).collect(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Step {
    Poisson { lambda: f64 },
    NegativeBinomial { n: f64, q: f64 },
}

/// Point probabilities computed by recurrence from `P(X = 0)`.
#[derive(Clone, Debug)]
pub struct PmfIter {
    k: u32,
    prob: f64,
    step: Step,
}

impl Iterator for PmfIter {
    type Item = f64;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let current = self.prob;
        self.k += 1;
        let k = self.k as f64;
        self.prob = match self.step {
            Step::Poisson { lambda } => current * lambda / k,
            Step::NegativeBinomial { n, q } => current * (k - 1.0 + n) / k * q,
        };
        Some(current)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub level: f64,
    pub lower: u32,
    pub upper: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub family: Family,
    pub mean: f64,
    pub variance: f64,
    pub median: u32,
    pub mode: u32,
    pub intervals: Vec<Interval>,
}

/// Precomputed cumulative table for repeated sampling from one distribution.
#[derive(Clone, Debug)]
pub struct Sampler {
    cumulative: Vec<f64>,
}
impl Sampler {
    #[inline]
    pub fn sample(&self, rand: &mut impl Rand) -> u32 {
        let random = random_f64(rand);
        self.cumulative.partition_point(|&cumulative| cumulative < random) as u32
    }
}

impl From<&Distribution> for Sampler {
    fn from(distribution: &Distribution) -> Self {
        let mut sum = 0.0;
        let cumulative = distribution
            .support()
            .into_iter()
            .map(|prob| {
                sum += prob;
                sum
            })
            .collect();
        Self { cumulative }
    }
}

/// Per-market choice of family, with the dispersion applied to every side's rate when the
/// family is Negative-Binomial.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketModel {
    pub family: Family,
    pub alpha: f64,
}
impl MarketModel {
    pub fn poisson() -> Self {
        Self {
            family: Family::Poisson,
            alpha: 0.0,
        }
    }

    pub fn negative_binomial(alpha: f64) -> Self {
        Self {
            family: Family::NegativeBinomial,
            alpha,
        }
    }

    /// Negative-Binomial when the dispersion index `variance / mean` exceeds `threshold`,
    /// otherwise Poisson.
    pub fn from_moments(mean: f64, variance: f64, threshold: f64) -> Self {
        if mean > 0.0 && variance / mean > threshold {
            Self::negative_binomial(alpha_from_moments(mean, variance))
        } else {
            Self::poisson()
        }
    }

    pub fn distribution(&self, rate: f64) -> Distribution {
        match self.family {
            Family::Poisson => Distribution::poisson(rate),
            Family::NegativeBinomial => Distribution::negative_binomial(rate, self.alpha),
        }
    }
}

impl Default for MarketModel {
    fn default() -> Self {
        Self::poisson()
    }
}

/// Method-of-moments dispersion `(variance - mean) / mean²`, floored at [MIN_ALPHA].
pub fn alpha_from_moments(mean: f64, variance: f64) -> f64 {
    if mean <= 0.0 {
        return MIN_ALPHA;
    }
    f64::max(MIN_ALPHA, (variance - mean) / (mean * mean))
}

/// Selects the distribution for a rate with the given observed moments.
pub fn select(mean: f64, variance: f64, threshold: f64) -> Distribution {
    MarketModel::from_moments(mean, variance, threshold).distribution(mean)
}

#[inline]
pub fn random_f64(rand: &mut impl Rand) -> f64 {
    rand.next_u64() as f64 / u64::MAX as f64
}
