//! Post-hoc probability calibration per market.
//!
//! Small samples are fitted with a two-parameter logistic map on the log-odds of the predicted
//! probability; large samples with an isotonic (pool-adjacent-violators) step curve. A fit that
//! would worsen the training Brier score is discarded in favour of the identity.
//!
//! The trained set is held as an immutable snapshot behind a lock. Training builds a new set
//! and swaps it in whole under the write lock, so concurrent readers see either the old or the
//! new set, and concurrent trainers never overwrite each other's markets.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumCount, EnumIter};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::data::FinishedMatch;
use crate::file::write_json;
use crate::mc::{MarketResult, SimulationResult};
use crate::opt::{hypergrid_search, HypergridSearchConfig};

pub const MIN_SAMPLES: usize = 10;
pub const ISOTONIC_THRESHOLD: usize = 500;
pub const ECE_BINS: usize = 10;

const LOGIT_EPSILON: f64 = 1e-6;

#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter, EnumCount,
)]
pub enum Market {
    #[serde(rename = "over_15_goals")]
    #[strum(serialize = "over_15_goals")]
    Over15Goals,
    #[serde(rename = "over_25_goals")]
    #[strum(serialize = "over_25_goals")]
    Over25Goals,
    #[serde(rename = "over_35_goals")]
    #[strum(serialize = "over_35_goals")]
    Over35Goals,
    #[serde(rename = "btts")]
    #[strum(serialize = "btts")]
    Btts,
    #[serde(rename = "over_95_corners")]
    #[strum(serialize = "over_95_corners")]
    Over95Corners,
    #[serde(rename = "over_105_corners")]
    #[strum(serialize = "over_105_corners")]
    Over105Corners,
    #[serde(rename = "home_win")]
    #[strum(serialize = "home_win")]
    HomeWin,
    #[serde(rename = "draw")]
    #[strum(serialize = "draw")]
    Draw,
    #[serde(rename = "away_win")]
    #[strum(serialize = "away_win")]
    AwayWin,
}
impl Market {
    /// The simulated probability of this market.
    pub fn probability(&self, result: &SimulationResult) -> f64 {
        let over = |market: &MarketResult, line| market.over(line).unwrap_or_default();
        match self {
            Market::Over15Goals => over(&result.goals, 1.5),
            Market::Over25Goals => over(&result.goals, 2.5),
            Market::Over35Goals => over(&result.goals, 3.5),
            Market::Btts => result.btts,
            Market::Over95Corners => over(&result.corners, 9.5),
            Market::Over105Corners => over(&result.corners, 10.5),
            Market::HomeWin => result.home_win,
            Market::Draw => result.draw,
            Market::AwayWin => result.away_win,
        }
    }

    /// Whether the market settled as a win, or `None` if the match lacks the statistic.
    pub fn outcome(&self, fixture: &FinishedMatch) -> Option<bool> {
        let goals = fixture.home_goals as u16 + fixture.away_goals as u16;
        match self {
            Market::Over15Goals => Some(goals > 1),
            Market::Over25Goals => Some(goals > 2),
            Market::Over35Goals => Some(goals > 3),
            Market::Btts => Some(fixture.home_goals > 0 && fixture.away_goals > 0),
            Market::Over95Corners => fixture.total_corners().map(|corners| corners > 9),
            Market::Over105Corners => fixture.total_corners().map(|corners| corners > 10),
            Market::HomeWin => Some(fixture.home_goals > fixture.away_goals),
            Market::Draw => Some(fixture.home_goals == fixture.away_goals),
            Market::AwayWin => Some(fixture.home_goals < fixture.away_goals),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Method {
    Logistic,
    Isotonic,
}

/// A monotone map from predicted to calibrated probability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mapping {
    /// `sigmoid(coef * logit(p) + intercept)`; the identity at `coef = 1, intercept = 0`.
    Logistic { coef: f64, intercept: f64 },
    /// Step curve through `(x, y)` thresholds, interpolated linearly and clipped at the ends.
    Isotonic { x: Vec<f64>, y: Vec<f64> },
}
impl Mapping {
    pub fn method(&self) -> Method {
        match self {
            Mapping::Logistic { .. } => Method::Logistic,
            Mapping::Isotonic { .. } => Method::Isotonic,
        }
    }

    /// Checks that a mapping read from outside the calibrator is well-formed.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Mapping::Logistic { coef, intercept } => {
                if !coef.is_finite() || !intercept.is_finite() {
                    return Err(format!("non-finite logistic parameters ({coef}, {intercept})"));
                }
            }
            Mapping::Isotonic { x, y } => {
                if x.is_empty() {
                    return Err("no isotonic thresholds".into());
                }
                if x.len() != y.len() {
                    return Err(format!("{} thresholds but {} values", x.len(), y.len()));
                }
                if let Some(value) = x.iter().chain(y).find(|value| !(0.0..=1.0).contains(*value)) {
                    return Err(format!("{value} lies outside [0, 1]"));
                }
                if x.windows(2).any(|pair| pair[1] < pair[0]) {
                    return Err("thresholds are not sorted".into());
                }
            }
        }
        Ok(())
    }

    pub fn apply(&self, p: f64) -> f64 {
        match self {
            Mapping::Logistic { coef, intercept } => sigmoid(coef * logit(p) + intercept),
            Mapping::Isotonic { x, y } => interpolate(x, y, p),
        }
    }
}

#[inline]
fn logit(p: f64) -> f64 {
    let p = p.clamp(LOGIT_EPSILON, 1.0 - LOGIT_EPSILON);
    f64::ln(p / (1.0 - p))
}

#[inline]
fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + f64::exp(-z))
}

fn interpolate(x: &[f64], y: &[f64], p: f64) -> f64 {
    let len = x.len().min(y.len());
    let (x, y) = (&x[..len], &y[..len]);
    let (Some(&first), Some(&last)) = (x.first(), x.last()) else {
        return p;
    };
    let value = if p <= first {
        y[0]
    } else if p >= last {
        y[len - 1]
    } else {
        let upper = x.partition_point(|&threshold| threshold <= p).clamp(1, len - 1);
        let (x0, x1, y0, y1) = (x[upper - 1], x[upper], y[upper - 1], y[upper]);
        if x1 == x0 {
            y1
        } else {
            y0 + (y1 - y0) * (p - x0) / (x1 - x0)
        }
    };
    value.clamp(0.0, 1.0)
}

/// Mean squared difference between predicted probabilities and binary outcomes.
pub fn brier_score(predicted: &[f64], actual: &[bool]) -> f64 {
    if predicted.is_empty() {
        return 0.0;
    }
    predicted
        .iter()
        .zip(actual)
        .map(|(&p, &outcome)| (p - outcome as u8 as f64).powi(2))
        .sum::<f64>()
        / predicted.len() as f64
}

/// Bin-weighted mean absolute gap between predicted and observed frequencies over equal-width
/// bins of the predicted probability. The last bin is closed on the right.
pub fn expected_calibration_error(predicted: &[f64], actual: &[bool], bins: usize) -> f64 {
    reliability_curve(predicted, actual, bins)
        .iter()
        .map(|bin| bin.samples as f64 * (bin.mean_predicted - bin.observed).abs())
        .sum::<f64>()
        / usize::max(predicted.len(), 1) as f64
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityBin {
    pub lower: f64,
    pub upper: f64,
    pub samples: usize,
    pub mean_predicted: f64,
    pub observed: f64,
}

/// Predicted versus observed frequency in each non-empty equal-width bin.
pub fn reliability_curve(predicted: &[f64], actual: &[bool], bins: usize) -> Vec<ReliabilityBin> {
    let mut sums = vec![(0usize, 0.0, 0usize); bins];
    for (&p, &outcome) in predicted.iter().zip(actual) {
        let bin = usize::min((p.clamp(0.0, 1.0) * bins as f64) as usize, bins - 1);
        let (samples, sum, hits) = &mut sums[bin];
        *samples += 1;
        *sum += p;
        *hits += outcome as usize;
    }
    sums.into_iter()
        .enumerate()
        .filter(|(_, (samples, _, _))| *samples > 0)
        .map(|(bin, (samples, sum, hits))| ReliabilityBin {
            lower: bin as f64 / bins as f64,
            upper: (bin + 1) as f64 / bins as f64,
            samples,
            mean_predicted: sum / samples as f64,
            observed: hits as f64 / samples as f64,
        })
        .collect()
}

/// Fits `sigmoid(coef * logit(p) + intercept)` by minimising log loss over a bounded grid.
pub fn fit_logistic(predicted: &[f64], actual: &[bool]) -> Result<Mapping, anyhow::Error> {
    let logits: Vec<_> = predicted.iter().map(|&p| logit(p)).collect();
    let config = HypergridSearchConfig {
        max_steps: 30,
        acceptable_residual: 0.0,
        bounds: vec![0.05..=5.0, -5.0..=5.0],
        resolution: 11,
    };
    let outcome = hypergrid_search(
        &config,
        |_| true,
        |values| {
            let (coef, intercept) = (values[0], values[1]);
            logits
                .iter()
                .zip(actual)
                .map(|(&z, &outcome)| {
                    let q = sigmoid(coef * z + intercept).clamp(LOGIT_EPSILON, 1.0 - LOGIT_EPSILON);
                    if outcome {
                        -q.ln()
                    } else {
                        -(1.0 - q).ln()
                    }
                })
                .sum::<f64>()
        },
    )?;
    debug!(
        "logistic fit after {} steps: coef {:.4}, intercept {:.4}, log loss {:.5}",
        outcome.steps,
        outcome.optimal_values[0],
        outcome.optimal_values[1],
        outcome.optimal_residual / predicted.len() as f64
    );
    Ok(Mapping::Logistic {
        coef: outcome.optimal_values[0],
        intercept: outcome.optimal_values[1],
    })
}

#[derive(Debug)]
struct Block {
    x_min: f64,
    x_max: f64,
    sum: f64,
    weight: f64,
}
impl Block {
    fn value(&self) -> f64 {
        self.sum / self.weight
    }
}

/// Least-squares non-decreasing fit by pool-adjacent-violators.
pub fn fit_isotonic(predicted: &[f64], actual: &[bool]) -> Mapping {
    let mut points: Vec<_> = predicted
        .iter()
        .zip(actual)
        .map(|(&p, &outcome)| (p, outcome as u8 as f64))
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut blocks: Vec<Block> = Vec::with_capacity(points.len());
    for (p, outcome) in points {
        match blocks.last_mut() {
            Some(last) if last.x_max == p => {
                last.sum += outcome;
                last.weight += 1.0;
            }
            _ => blocks.push(Block {
                x_min: p,
                x_max: p,
                sum: outcome,
                weight: 1.0,
            }),
        }
        while blocks.len() > 1 && blocks[blocks.len() - 2].value() >= blocks[blocks.len() - 1].value() {
            if let Some(merged) = blocks.pop() {
                if let Some(previous) = blocks.last_mut() {
                    previous.x_max = merged.x_max;
                    previous.sum += merged.sum;
                    previous.weight += merged.weight;
                }
            }
        }
    }

    let mut x = Vec::with_capacity(blocks.len() * 2);
    let mut y = Vec::with_capacity(blocks.len() * 2);
    for block in &blocks {
        let value = block.value().clamp(0.0, 1.0);
        x.push(block.x_min);
        y.push(value);
        if block.x_max > block.x_min {
            x.push(block.x_max);
            y.push(value);
        }
    }
    Mapping::Isotonic { x, y }
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("{market} has {samples} samples; at least {required} are required")]
    InsufficientData {
        market: Market,
        samples: usize,
        required: usize,
    },

    #[error("{predicted} predictions but {actual} outcomes")]
    LengthMismatch { predicted: usize, actual: usize },

    #[error("fitting failed: {0}")]
    Fit(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed calibration file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {market} mapping: {reason}")]
    InvalidMapping { market: Market, reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub market: Market,
    pub samples: usize,
    pub method: Method,
    pub brier_before: f64,
    pub brier_after: f64,
    pub ece_before: f64,
    pub ece_after: f64,
    pub improvement_pct: f64,
    /// False when the fit would have worsened the Brier score and the identity was kept.
    pub applied: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketStatus {
    pub market: Market,
    pub method: Method,
}

pub type CalibrationSet = BTreeMap<Market, Mapping>;

#[derive(Debug, Default)]
pub struct Calibrator {
    snapshot: RwLock<Arc<CalibrationSet>>,
}
impl Calibrator {
    pub fn new(set: CalibrationSet) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(set)),
        }
    }

    pub fn snapshot(&self) -> Arc<CalibrationSet> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Derives a new set from the current one and swaps it in under a single write lock.
    fn update(&self, update_f: impl FnOnce(&mut CalibrationSet)) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let mut set = (**snapshot).clone();
        update_f(&mut set);
        *snapshot = Arc::new(set);
    }

    /// Applies the trained mapping for `market`, or returns `p` unchanged if there is none.
    pub fn calibrate(&self, market: Market, p: f64) -> f64 {
        match self.snapshot().get(&market) {
            Some(mapping) => mapping.apply(p),
            None => p,
        }
    }

    pub fn status(&self) -> Vec<MarketStatus> {
        self.snapshot()
            .iter()
            .map(|(&market, mapping)| MarketStatus {
                market,
                method: mapping.method(),
            })
            .collect()
    }

    pub fn train(&self, market: Market, predicted: &[f64], actual: &[bool]) -> Result<CalibrationReport, CalibrationError> {
        if predicted.len() != actual.len() {
            return Err(CalibrationError::LengthMismatch {
                predicted: predicted.len(),
                actual: actual.len(),
            });
        }
        if predicted.len() < MIN_SAMPLES {
            return Err(CalibrationError::InsufficientData {
                market,
                samples: predicted.len(),
                required: MIN_SAMPLES,
            });
        }

        let mapping = if predicted.len() < ISOTONIC_THRESHOLD {
            fit_logistic(predicted, actual)?
        } else {
            fit_isotonic(predicted, actual)
        };
        let calibrated: Vec<_> = predicted.iter().map(|&p| mapping.apply(p)).collect();
        let (brier_before, ece_before) = (
            brier_score(predicted, actual),
            expected_calibration_error(predicted, actual, ECE_BINS),
        );
        let (mut brier_after, mut ece_after) = (
            brier_score(&calibrated, actual),
            expected_calibration_error(&calibrated, actual, ECE_BINS),
        );
        let method = mapping.method();

        let applied = brier_after <= brier_before;
        if applied {
            self.update(|set| {
                set.insert(market, mapping);
            });
        } else {
            warn!(
                "{method} calibration of {market} would raise the Brier score from {brier_before:.5} to {brier_after:.5}; keeping the identity"
            );
            self.update(|set| {
                set.remove(&market);
            });
            (brier_after, ece_after) = (brier_before, ece_before);
        }

        let improvement_pct = if brier_before > 0.0 {
            (brier_before - brier_after) / brier_before * 100.0
        } else {
            0.0
        };
        info!(
            "calibrated {market} with {method} over {} samples: Brier {brier_before:.5} ⇒ {brier_after:.5} ({improvement_pct:.2}%), ECE {ece_before:.4} ⇒ {ece_after:.4}",
            predicted.len()
        );
        Ok(CalibrationReport {
            market,
            samples: predicted.len(),
            method,
            brier_before,
            brier_after,
            ece_before,
            ece_after,
            improvement_pct,
            applied,
        })
    }

    /// Writes the current set as JSON, atomically replacing any existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        write_json(path, &*self.snapshot())?;
        Ok(())
    }

    /// Reads a set written by [Self::save]. A missing file yields an empty calibrator; a
    /// malformed mapping is rejected.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no calibration file at {}; calibration is the identity", path.display());
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        let set: CalibrationSet = serde_json::from_str(&json)?;
        for (&market, mapping) in &set {
            mapping
                .validate()
                .map_err(|reason| CalibrationError::InvalidMapping { market, reason })?;
        }
        debug!("loaded calibration for {} markets from {}", set.len(), path.display());
        Ok(Self::new(set))
    }
}

#[cfg(test)]
mod tests;
