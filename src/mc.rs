//! Monte Carlo simulation of a match over per-side count distributions.
//!
//! Iterations are split into fixed-size chunks that run on the rayon pool. Each chunk owns a
//! generator seeded from `seed + chunk_index` and produces plain counts, so the merged result
//! for a fixed seed does not depend on how chunks are scheduled.

use std::ops::RangeInclusive;
use std::time::{SystemTime, UNIX_EPOCH};

use ordinalizer::Ordinal;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use strum::EnumCount;
use thiserror::Error;
use tinyrand::{Rand, Seeded, Wyrand};
use tracing::debug;

use crate::anchors::OverdispersionReport;
use crate::data::{EventKind, Score, Side};
use crate::dist::{Distribution, Interval, MarketModel, Sampler};
use crate::params::MatchParameters;

pub const GOAL_LINES: [f64; 4] = [0.5, 1.5, 2.5, 3.5];
pub const CARD_LINES: [f64; 4] = [2.5, 3.5, 4.5, 5.5];
pub const CORNER_LINES: [f64; 5] = [7.5, 8.5, 9.5, 10.5, 11.5];

pub const DEFAULT_ITERATIONS: u64 = 100_000;
pub const VALID_ITERATIONS: RangeInclusive<u64> = 1_000..=1_000_000;

/// Every market, in ordinal order.
const KINDS: [EventKind; EventKind::COUNT] = [EventKind::Goals, EventKind::Cards, EventKind::Corners];

/// A seed for unseeded runs, taken from the wall clock.
pub fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default()
}

/// Derives the seed of an independent stream (a chunk, a replayed fixture) from a base seed.
/// Stream 0 is the base seed itself.
pub fn stream_seed(seed: u64, stream: u64) -> u64 {
    seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

pub fn lines(kind: EventKind) -> &'static [f64] {
    match kind {
        EventKind::Goals => &GOAL_LINES,
        EventKind::Cards => &CARD_LINES,
        EventKind::Corners => &CORNER_LINES,
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SimulationConfigError {
    #[error("iterations must be in the range {VALID_ITERATIONS:?}, got {0}")]
    Iterations(u64),

    #[error("confidence level must be strictly between 0.5 and 0.999, got {0}")]
    ConfidenceLevel(f64),

    #[error("chunk size must be positive")]
    ChunkSize,

    #[error("at least one scoreline must be reported")]
    TopScorelines,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub iterations: u64,
    /// Fixed seed for reproducible runs; drawn from the clock when absent.
    pub seed: Option<u64>,
    pub confidence_level: f64,
    pub top_scorelines: usize,
    pub chunk_size: u64,
}
impl Config {
    pub fn validate(&self) -> Result<(), SimulationConfigError> {
        if !VALID_ITERATIONS.contains(&self.iterations) {
            return Err(SimulationConfigError::Iterations(self.iterations));
        }
        if !(self.confidence_level > 0.5 && self.confidence_level < 0.999) {
            return Err(SimulationConfigError::ConfidenceLevel(self.confidence_level));
        }
        if self.chunk_size == 0 {
            return Err(SimulationConfigError::ChunkSize);
        }
        if self.top_scorelines == 0 {
            return Err(SimulationConfigError::TopScorelines);
        }
        Ok(())
    }

    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            seed: None,
            confidence_level: 0.90,
            top_scorelines: 10,
            chunk_size: 10_000,
        }
    }
}

/// The count distribution family chosen for each market.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketModels {
    pub goals: MarketModel,
    pub cards: MarketModel,
    pub corners: MarketModel,
}
impl MarketModels {
    pub fn get(&self, kind: EventKind) -> &MarketModel {
        match kind {
            EventKind::Goals => &self.goals,
            EventKind::Cards => &self.cards,
            EventKind::Corners => &self.corners,
        }
    }

    pub fn distribution(&self, params: &MatchParameters, side: Side, kind: EventKind) -> Distribution {
        self.get(kind).distribution(params.rate(side, kind))
    }
}

impl From<&OverdispersionReport> for MarketModels {
    fn from(report: &OverdispersionReport) -> Self {
        Self {
            goals: report.goals.model,
            cards: report.cards.model,
            corners: report.corners.model,
        }
    }
}

/// Precomputed samplers for every market and side.
#[derive(Clone, Debug)]
pub struct Samplers {
    home: [Sampler; EventKind::COUNT],
    away: [Sampler; EventKind::COUNT],
}
impl Samplers {
    pub fn new(params: &MatchParameters, models: &MarketModels) -> Self {
        let side = |side| KINDS.map(|kind| Sampler::from(&models.distribution(params, side, kind)));
        Self {
            home: side(Side::Home),
            away: side(Side::Away),
        }
    }
}

/// Home and away counts for every market in one simulated match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Draw {
    pub home: [u32; EventKind::COUNT],
    pub away: [u32; EventKind::COUNT],
}
impl Draw {
    pub fn score(&self) -> Score {
        let goals = EventKind::Goals.ordinal();
        Score::new(saturate(self.home[goals]), saturate(self.away[goals]))
    }

    pub fn total(&self, kind: EventKind) -> u32 {
        self.home[kind.ordinal()] + self.away[kind.ordinal()]
    }
}

#[inline]
fn saturate(count: u32) -> u8 {
    u8::try_from(count).unwrap_or(u8::MAX)
}

#[inline]
pub fn run_once(samplers: &Samplers, draw: &mut Draw, rand: &mut impl Rand) {
    for kind in 0..EventKind::COUNT {
        draw.home[kind] = samplers.home[kind].sample(rand);
        draw.away[kind] = samplers.away[kind].sample(rand);
    }
}

#[derive(Debug, Default)]
struct Tally {
    iterations: u64,
    /// Home wins, draws and away wins.
    outcomes: [u64; 3],
    btts: u64,
    side_sums: [[u64; 2]; EventKind::COUNT],
    /// Frequency of each match total, per market.
    histograms: [Vec<u64>; EventKind::COUNT],
    scorelines: FxHashMap<Score, u64>,
}
impl Tally {
    fn record(&mut self, draw: &Draw) {
        self.iterations += 1;
        let score = draw.score();
        let outcome = match score.home.cmp(&score.away) {
            std::cmp::Ordering::Greater => 0,
            std::cmp::Ordering::Equal => 1,
            std::cmp::Ordering::Less => 2,
        };
        self.outcomes[outcome] += 1;
        if score.home > 0 && score.away > 0 {
            self.btts += 1;
        }
        *self.scorelines.entry(score).or_default() += 1;
        for kind in 0..EventKind::COUNT {
            let (home, away) = (draw.home[kind], draw.away[kind]);
            self.side_sums[kind][0] += home as u64;
            self.side_sums[kind][1] += away as u64;
            let total = (home + away) as usize;
            let histogram = &mut self.histograms[kind];
            if histogram.len() <= total {
                histogram.resize(total + 1, 0);
            }
            histogram[total] += 1;
        }
    }

    fn merge(mut self, other: Tally) -> Tally {
        self.iterations += other.iterations;
        for (outcome, count) in self.outcomes.iter_mut().zip(other.outcomes) {
            *outcome += count;
        }
        self.btts += other.btts;
        for kind in 0..EventKind::COUNT {
            self.side_sums[kind][0] += other.side_sums[kind][0];
            self.side_sums[kind][1] += other.side_sums[kind][1];
            let (histogram, other_histogram) = (&mut self.histograms[kind], &other.histograms[kind]);
            if histogram.len() < other_histogram.len() {
                histogram.resize(other_histogram.len(), 0);
            }
            for (total, count) in other_histogram.iter().enumerate() {
                histogram[total] += count;
            }
        }
        for (score, count) in other.scorelines {
            *self.scorelines.entry(score).or_default() += count;
        }
        self
    }
}

/// Smallest total whose cumulative frequency reaches `q` of the iterations.
fn percentile(histogram: &[u64], iterations: u64, q: f64) -> u32 {
    let threshold = q * iterations as f64;
    let mut cumulative = 0;
    for (total, &count) in histogram.iter().enumerate() {
        cumulative += count;
        if cumulative as f64 >= threshold {
            return total as u32;
        }
    }
    histogram.len().saturating_sub(1) as u32
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverUnder {
    pub line: f64,
    pub over: f64,
    pub under: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketResult {
    pub market: EventKind,
    pub home: Distribution,
    pub away: Distribution,
    pub mean_home: f64,
    pub mean_away: f64,
    pub mean_total: f64,
    pub lines: Vec<OverUnder>,
    /// Central percentile interval of the match total.
    pub interval: Interval,
}
impl MarketResult {
    pub fn over(&self, line: f64) -> Option<f64> {
        self.lines
            .iter()
            .find(|over_under| over_under.line == line)
            .map(|over_under| over_under.over)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScorelineProb {
    pub score: Score,
    pub probability: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub iterations: u64,
    pub seed: u64,
    pub home_win: f64,
    pub draw: f64,
    pub away_win: f64,
    pub btts: f64,
    pub goals: MarketResult,
    pub cards: MarketResult,
    pub corners: MarketResult,
    /// Most frequent scorelines, most likely first.
    pub scorelines: Vec<ScorelineProb>,
}
impl SimulationResult {
    pub fn market(&self, kind: EventKind) -> &MarketResult {
        match kind {
            EventKind::Goals => &self.goals,
            EventKind::Cards => &self.cards,
            EventKind::Corners => &self.corners,
        }
    }
}

#[derive(Debug, Default)]
pub struct MonteCarloSimulator {
    config: Config,
}
impl MonteCarloSimulator {
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn seed(&self) -> u64 {
        self.config.seed.unwrap_or_else(clock_seed)
    }

    pub fn simulate(&self, params: &MatchParameters, models: &MarketModels) -> SimulationResult {
        let seed = self.seed();
        let samplers = Samplers::new(params, models);
        let (iterations, chunk_size) = (self.config.iterations, self.config.chunk_size);
        let chunks = iterations.div_ceil(chunk_size);

        let tally = (0..chunks)
            .into_par_iter()
            .map(|chunk| {
                let mut rand = Wyrand::seed(stream_seed(seed, chunk));
                let trials = u64::min(chunk_size, iterations - chunk * chunk_size);
                let mut tally = Tally::default();
                let mut draw = Draw::default();
                for _ in 0..trials {
                    run_once(&samplers, &mut draw, &mut rand);
                    tally.record(&draw);
                }
                tally
            })
            .reduce(Tally::default, Tally::merge);

        let result = self.summarise(params, models, seed, tally);
        debug!(
            "simulated {} iterations (seed {seed}): home {:.3}, draw {:.3}, away {:.3}, btts {:.3}",
            result.iterations, result.home_win, result.draw, result.away_win, result.btts
        );
        result
    }

    fn summarise(&self, params: &MatchParameters, models: &MarketModels, seed: u64, tally: Tally) -> SimulationResult {
        let n = tally.iterations as f64;
        let tail = (1.0 - self.config.confidence_level) / 2.0;
        let market = |kind: EventKind| {
            let index = kind.ordinal();
            let histogram = &tally.histograms[index];
            let lines = lines(kind)
                .iter()
                .map(|&line| {
                    let over: u64 = histogram.iter().skip(line.ceil() as usize).sum();
                    let over = over as f64 / n;
                    OverUnder {
                        line,
                        over,
                        under: 1.0 - over,
                    }
                })
                .collect();
            let (mean_home, mean_away) = (
                tally.side_sums[index][0] as f64 / n,
                tally.side_sums[index][1] as f64 / n,
            );
            MarketResult {
                market: kind,
                home: models.distribution(params, Side::Home, kind),
                away: models.distribution(params, Side::Away, kind),
                mean_home,
                mean_away,
                mean_total: mean_home + mean_away,
                lines,
                interval: Interval {
                    level: self.config.confidence_level,
                    lower: percentile(histogram, tally.iterations, tail),
                    upper: percentile(histogram, tally.iterations, 1.0 - tail),
                },
            }
        };

        let mut scorelines: Vec<_> = tally.scorelines.iter().map(|(&score, &count)| (score, count)).collect();
        scorelines.sort_by(|(a_score, a_count), (b_score, b_count)| b_count.cmp(a_count).then(a_score.cmp(b_score)));
        scorelines.truncate(self.config.top_scorelines);

        SimulationResult {
            iterations: tally.iterations,
            seed,
            home_win: tally.outcomes[0] as f64 / n,
            draw: tally.outcomes[1] as f64 / n,
            away_win: tally.outcomes[2] as f64 / n,
            btts: tally.btts as f64 / n,
            goals: market(EventKind::Goals),
            cards: market(EventKind::Cards),
            corners: market(EventKind::Corners),
            scorelines: scorelines
                .into_iter()
                .map(|(score, count)| ScorelineProb {
                    score,
                    probability: count as f64 / n,
                })
                .collect(),
        }
    }
}

impl TryFrom<Config> for MonteCarloSimulator {
    type Error = SimulationConfigError;

    fn try_from(config: Config) -> Result<Self, Self::Error> {
        config.validate()?;
        Ok(Self { config })
    }
}
