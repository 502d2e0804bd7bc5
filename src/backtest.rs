//! Replays finished matches through the prediction pipeline and scores the raw probabilities.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use crate::calibration::{brier_score, CalibrationError, CalibrationReport, Calibrator, Market};
use crate::data::FinishedMatch;
use crate::mc::stream_seed;
use crate::predictor::{PredictionError, PredictionRequest, Predictor};
use crate::probs::SliceExt;

/// Markets with fewer pairs than this are not used for calibration training.
pub const MIN_TRAINING_SAMPLES: usize = 20;

/// Edges of the probability bins; the last bin is closed on the right.
const BIN_EDGES: [f64; 6] = [0.0, 0.2, 0.4, 0.6, 0.8, 1.0];

/// A predicted probability and whether the market settled as a win.
pub type Pair = (f64, bool);

/// Tailors the request built for each replayed match, e.g. to attach a known context.
pub trait Adjustments: Sync {
    fn adjust(&self, fixture: &FinishedMatch, request: &mut PredictionRequest);
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinAnalysis {
    pub lower: f64,
    pub upper: f64,
    pub n: usize,
    pub expected: f64,
    pub actual: f64,
    /// `actual - expected`.
    pub diff: f64,
}
impl BinAnalysis {
    pub fn label(&self) -> String {
        format!("{:.0}-{:.0}%", self.lower * 100.0, self.upper * 100.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketBacktest {
    pub market: Market,
    pub samples: usize,
    pub brier: f64,
    /// Share of pairs where `p > 0.5` agrees with the outcome.
    pub accuracy: f64,
    pub bins: Vec<BinAnalysis>,
    pub pairs: Vec<Pair>,
}
impl MarketBacktest {
    pub fn predicted(&self) -> Vec<f64> {
        self.pairs.iter().map(|&(predicted, _)| predicted).collect()
    }

    pub fn actual(&self) -> Vec<bool> {
        self.pairs.iter().map(|&(_, actual)| actual).collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    /// Matches replayed; those with a team lacking statistics are skipped.
    pub matches: usize,
    pub skipped: usize,
    pub markets: Vec<MarketBacktest>,
    /// Brier score over the pairs of every market together.
    pub overall_brier: f64,
}
impl BacktestReport {
    pub fn market(&self, market: Market) -> Option<&MarketBacktest> {
        self.markets.iter().find(|backtest| backtest.market == market)
    }
}

fn analyse_bins(pairs: &[Pair]) -> Vec<BinAnalysis> {
    BIN_EDGES
        .windows(2)
        .enumerate()
        .filter_map(|(index, edges)| {
            let (lower, upper) = (edges[0], edges[1]);
            let last = index == BIN_EDGES.len() - 2;
            let (predicted, actual): (Vec<_>, Vec<_>) = pairs
                .iter()
                .filter(|(p, _)| *p >= lower && (*p < upper || (last && *p <= upper)))
                .map(|&(p, outcome)| (p, outcome as u8 as f64))
                .unzip();
            if predicted.is_empty() {
                return None;
            }
            let (expected, actual) = (predicted.mean(), actual.mean());
            Some(BinAnalysis {
                lower,
                upper,
                n: predicted.len(),
                expected,
                actual,
                diff: actual - expected,
            })
        })
        .collect()
}

fn score_market(market: Market, pairs: Vec<Pair>) -> MarketBacktest {
    let (predicted, actual): (Vec<_>, Vec<_>) = pairs.iter().copied().unzip();
    let brier = brier_score(&predicted, &actual);
    let accuracy = pairs
        .iter()
        .filter(|&&(p, outcome)| (p > 0.5) == outcome)
        .count() as f64
        / pairs.len() as f64;
    let bins = analyse_bins(&pairs);
    info!(
        "{market}: Brier {brier:.4}, accuracy {:.1}%, n = {}",
        accuracy * 100.0,
        pairs.len()
    );
    MarketBacktest {
        market,
        samples: pairs.len(),
        brier,
        accuracy,
        bins,
        pairs,
    }
}

/// Scores pre-computed (probability, outcome) pairs per market. Markets without pairs are
/// omitted.
pub fn evaluate(pairs: BTreeMap<Market, Vec<Pair>>) -> BacktestReport {
    let (all_predicted, all_actual): (Vec<_>, Vec<_>) = pairs.values().flatten().copied().unzip();
    let markets = pairs
        .into_iter()
        .filter(|(_, pairs)| !pairs.is_empty())
        .map(|(market, pairs)| score_market(market, pairs))
        .collect();
    BacktestReport {
        matches: 0,
        skipped: 0,
        markets,
        overall_brier: brier_score(&all_predicted, &all_actual),
    }
}

pub struct BacktestEngine<'a> {
    predictor: &'a Predictor,
    adjustments: Option<&'a dyn Adjustments>,
}
impl<'a> BacktestEngine<'a> {
    pub fn new(predictor: &'a Predictor) -> Self {
        Self {
            predictor,
            adjustments: None,
        }
    }

    pub fn with_adjustments(mut self, adjustments: &'a dyn Adjustments) -> Self {
        self.adjustments = Some(adjustments);
        self
    }

    /// A context-free request for the fixture, unless the adjustments hook supplies one.
    fn request(&self, fixture: &FinishedMatch) -> PredictionRequest {
        let mut request = PredictionRequest::new(fixture.home_team, fixture.away_team, fixture.league_season());
        if let Some(adjustments) = self.adjustments {
            adjustments.adjust(fixture, &mut request);
        }
        request
    }

    /// With a configured seed, each fixture draws from its own stream derived from it, so
    /// replayed matches do not share random numbers yet the run stays reproducible.
    fn seeded_request(&self, index: usize, fixture: &FinishedMatch) -> PredictionRequest {
        let mut request = self.request(fixture);
        if let Some(seed) = self.predictor.config().simulation.seed {
            request.seed.get_or_insert(stream_seed(seed, index as u64));
        }
        request
    }

    /// Predicts each match in turn from the season statistics and records the raw probability
    /// and outcome of every market the match can settle.
    pub fn run<'m>(&self, matches: impl IntoIterator<Item = &'m FinishedMatch>) -> Result<BacktestReport, PredictionError> {
        let (known, unknown): (Vec<_>, Vec<_>) = matches.into_iter().partition(|fixture| {
            let league_season = fixture.league_season();
            self.predictor.has_team(fixture.home_team, league_season)
                && self.predictor.has_team(fixture.away_team, league_season)
        });
        if !unknown.is_empty() {
            warn!("skipping {} matches with teams lacking statistics", unknown.len());
        }

        let predictions = known
            .par_iter()
            .enumerate()
            .map(|(index, &fixture)| {
                let report = self.predictor.predict(&self.seeded_request(index, fixture))?;
                Ok((fixture, report))
            })
            .collect::<Result<Vec<_>, PredictionError>>()?;

        let mut pairs: BTreeMap<Market, Vec<Pair>> = BTreeMap::new();
        for (fixture, report) in &predictions {
            for market in Market::iter() {
                if let Some(outcome) = market.outcome(fixture) {
                    pairs.entry(market).or_default().push((report.raw(market), outcome));
                }
            }
        }
        debug!("collected pairs from {} matches", predictions.len());

        Ok(BacktestReport {
            matches: known.len(),
            skipped: unknown.len(),
            ..evaluate(pairs)
        })
    }
}

/// Trains `calibrator` on every market of the report with enough pairs.
pub fn train_calibrator(report: &BacktestReport, calibrator: &Calibrator) -> Result<Vec<CalibrationReport>, CalibrationError> {
    let mut reports = vec![];
    for backtest in &report.markets {
        if backtest.samples < MIN_TRAINING_SAMPLES {
            warn!(
                "{}: only {} samples; not calibrated",
                backtest.market, backtest.samples
            );
            continue;
        }
        reports.push(calibrator.train(backtest.market, &backtest.predicted(), &backtest.actual())?);
    }
    Ok(reports)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub matches: usize,
    pub first: Option<NaiveDate>,
    pub last: Option<NaiveDate>,
    pub mean_goals: f64,
    /// Mean over matches that report corners; `None` if none do.
    pub mean_corners: Option<f64>,
    pub over_25_rate: f64,
    pub btts_rate: f64,
}

/// Descriptive statistics of a set of finished matches.
pub fn summarise<'m>(matches: impl IntoIterator<Item = &'m FinishedMatch>) -> MatchSummary {
    let matches: Vec<_> = matches.into_iter().collect();
    if matches.is_empty() {
        return MatchSummary::default();
    }
    let goals: Vec<_> = matches.iter().map(|fixture| fixture.score().total() as f64).collect();
    let corners: Vec<_> = matches
        .iter()
        .filter_map(|fixture| fixture.total_corners())
        .map(|corners| corners as f64)
        .collect();
    let rate = |market: Market| {
        matches
            .iter()
            .filter(|fixture| market.outcome(fixture) == Some(true))
            .count() as f64
            / matches.len() as f64
    };
    MatchSummary {
        matches: matches.len(),
        first: matches.iter().map(|fixture| fixture.date).min(),
        last: matches.iter().map(|fixture| fixture.date).max(),
        mean_goals: goals.mean(),
        mean_corners: (!corners.is_empty()).then(|| corners.mean()),
        over_25_rate: rate(Market::Over25Goals),
        btts_rate: rate(Market::Btts),
    }
}

#[cfg(test)]
mod tests;
