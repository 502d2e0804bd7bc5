//! The end-to-end prediction pipeline over a loaded dataset.
//!
//! A [Predictor] owns the per-league caches (anchors, dispersion diagnostics, team strengths),
//! the player rating model and the calibrator. Each prediction runs: anchors ⇒ strengths ⇒
//! parameters ⇒ context ⇒ lineups ⇒ distribution selection ⇒ simulation ⇒ calibration.

use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use thiserror::Error;
use tracing::{debug, info};

use crate::anchors::{
    calculate_averages, get_overdispersion_by_market, LeagueAnchors, OverdispersionReport,
    OverdispersionThresholds, DEFAULT_WINDOW,
};
use crate::cache::{CacheStats, KeyedCache};
use crate::calibration::{CalibrationError, Calibrator, Market};
use crate::context::{ContextAdjuster, MatchContext, RefereeId};
use crate::data::{Dataset, DatasetError, EventKind, FinishedMatch, LeagueSeason, PlayerId, Side, TeamId, TeamStats};
use crate::lineup::{LineupAdjuster, LineupAdjustment, LineupError, Objective, SuggestedLineup};
use crate::mc::{clock_seed, MarketModels, MonteCarloSimulator, SimulationConfigError, SimulationResult};
use crate::params::{MatchParameters, ParameterCalculator};
use crate::player::{KeyPlayersImpact, LikelyPlayer, PlayerRatingModel};
use crate::strength::TeamStrength;
use crate::warning::Warning;
use crate::{context, lineup, mc, params, strength};

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("invalid configuration: {0}")]
    Config(#[from] anyhow::Error),

    #[error("invalid simulation settings: {0}")]
    Simulation(#[from] SimulationConfigError),

    #[error("invalid lineup: {0}")]
    Lineup(#[from] LineupError),

    #[error("calibration: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("dataset: {0}")]
    Dataset(#[from] DatasetError),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub params: params::Config,
    pub context: context::Config,
    pub lineup: lineup::Config,
    pub simulation: mc::Config,
    pub overdispersion: OverdispersionThresholds,
    /// Most recent matches examined when choosing between Poisson and Negative-Binomial.
    pub overdispersion_window: Option<usize>,
    /// Number of likely scorers and card recipients listed per side.
    pub likely_players: Option<usize>,
}
impl Config {
    pub fn validate(&self) -> Result<(), PredictionError> {
        self.params.validate()?;
        self.context.validate()?;
        self.lineup.validate()?;
        self.simulation.validate()?;
        self.overdispersion.validate()?;
        Ok(())
    }
}

const DEFAULT_LIKELY_PLAYERS: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub home: TeamId,
    pub away: TeamId,
    pub league_season: LeagueSeason,
    #[serde(default)]
    pub context: MatchContext,
    /// Overrides the configured iteration count.
    #[serde(default)]
    pub iterations: Option<u64>,
    /// Overrides the configured seed.
    #[serde(default)]
    pub seed: Option<u64>,
}
impl PredictionRequest {
    pub fn new(home: TeamId, away: TeamId, league_season: LeagueSeason) -> Self {
        Self {
            home,
            away,
            league_season,
            context: MatchContext::default(),
            iterations: None,
            seed: None,
        }
    }

    pub fn with_context(mut self, context: MatchContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = Some(iterations);
        self
    }
}

/// Simulated and calibrated probability of a binary market.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketProbability {
    pub market: Market,
    pub raw: f64,
    pub calibrated: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LikelyPlayers {
    pub scorers: Vec<LikelyPlayer>,
    pub card_recipients: Vec<LikelyPlayer>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionReport {
    pub home: TeamId,
    pub away: TeamId,
    pub home_name: Option<String>,
    pub away_name: Option<String>,
    pub league_season: LeagueSeason,
    pub context: MatchContext,
    /// Rates before context and lineup adjustments.
    pub base_params: MatchParameters,
    pub params: MatchParameters,
    pub models: MarketModels,
    pub lineups: Option<LineupAdjustment>,
    pub simulation: SimulationResult,
    pub markets: Vec<MarketProbability>,
    pub home_players: LikelyPlayers,
    pub away_players: LikelyPlayers,
    pub referee: Option<RefereeId>,
    pub confidence: f64,
    pub warnings: Vec<Warning>,
}
impl PredictionReport {
    pub fn market(&self, market: Market) -> Option<&MarketProbability> {
        self.markets.iter().find(|probability| probability.market == market)
    }

    pub fn raw(&self, market: Market) -> f64 {
        self.market(market).map(|probability| probability.raw).unwrap_or_default()
    }

    pub fn calibrated(&self, market: Market) -> f64 {
        self.market(market)
            .map(|probability| probability.calibrated)
            .unwrap_or_default()
    }
}

/// A named variation of a base request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub context: MatchContext,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub report: PredictionReport,
    /// Calibrated probability minus the base scenario's, per market.
    pub deltas: Vec<(Market, f64)>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioComparison {
    pub base: PredictionReport,
    pub scenarios: Vec<ScenarioOutcome>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictorCacheStats {
    pub anchors: CacheStats,
    pub dispersion: CacheStats,
    pub strengths: CacheStats,
    pub players: CacheStats,
}

pub struct Predictor {
    config: Config,
    teams: FxHashMap<(TeamId, LeagueSeason), TeamStats>,
    matches: Vec<FinishedMatch>,
    players: PlayerRatingModel,
    anchors: KeyedCache<LeagueSeason, LeagueAnchors>,
    dispersion: KeyedCache<LeagueSeason, OverdispersionReport>,
    strengths: KeyedCache<(TeamId, LeagueSeason), TeamStrength>,
    calibrator: Calibrator,
    calculator: ParameterCalculator,
    context: ContextAdjuster,
    lineup: LineupAdjuster,
    simulator: MonteCarloSimulator,
}
impl Predictor {
    pub fn new(config: Config, dataset: Dataset) -> Result<Self, PredictionError> {
        config.validate()?;
        dataset.validate()?;
        let Dataset {
            teams,
            players,
            matches,
            ..
        } = dataset;
        debug!(
            "loaded {} teams, {} players, {} matches",
            teams.len(),
            players.len(),
            matches.len()
        );
        Ok(Self {
            teams: teams
                .into_iter()
                .map(|stats| ((stats.team_id, stats.league_season()), stats))
                .collect(),
            matches,
            players: PlayerRatingModel::new(players),
            anchors: KeyedCache::default(),
            dispersion: KeyedCache::default(),
            strengths: KeyedCache::default(),
            calibrator: Calibrator::default(),
            calculator: ParameterCalculator::try_from(config.params.clone())?,
            context: ContextAdjuster::try_from(config.context.clone())?,
            lineup: LineupAdjuster::try_from(config.lineup.clone())?,
            simulator: MonteCarloSimulator::try_from(config.simulation.clone())?,
            config,
        })
    }

    pub fn with_calibrator(mut self, calibrator: Calibrator) -> Self {
        self.calibrator = calibrator;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    pub fn players(&self) -> &PlayerRatingModel {
        &self.players
    }

    pub fn matches(&self) -> &[FinishedMatch] {
        &self.matches
    }

    pub fn has_team(&self, team_id: TeamId, league_season: LeagueSeason) -> bool {
        self.teams.contains_key(&(team_id, league_season))
    }

    pub fn team_name(&self, team_id: TeamId, league_season: LeagueSeason) -> Option<&str> {
        self.teams
            .get(&(team_id, league_season))
            .map(|stats| stats.name.as_str())
    }

    pub fn anchors(&self, league_season: LeagueSeason) -> Arc<LeagueAnchors> {
        self.anchors
            .get_or_insert_with(league_season, || calculate_averages(league_season, &self.matches))
    }

    pub fn overdispersion(&self, league_season: LeagueSeason) -> Arc<OverdispersionReport> {
        self.dispersion.get_or_insert_with(league_season, || {
            get_overdispersion_by_market(
                league_season,
                &self.matches,
                self.config.overdispersion_window.unwrap_or(DEFAULT_WINDOW),
                &self.config.overdispersion,
            )
        })
    }

    /// The team's shrunk strength, or the neutral strength with a warning if the team has no
    /// statistics in the league and season.
    pub fn strength(&self, team_id: TeamId, league_season: LeagueSeason, warnings: &mut Vec<Warning>) -> Arc<TeamStrength> {
        let strength = match self.teams.get(&(team_id, league_season)) {
            Some(stats) => self.strengths.get_or_insert_with((team_id, league_season), || {
                strength::calculate(stats, &self.anchors(league_season))
            }),
            None => Arc::new(TeamStrength::neutral(team_id, league_season)),
        };
        warnings.extend(strength.warnings.iter().cloned());
        strength
    }

    fn simulator_for(&self, request: &PredictionRequest) -> Result<Option<MonteCarloSimulator>, PredictionError> {
        if request.iterations.is_none() && request.seed.is_none() {
            return Ok(None);
        }
        let mut config = self.config.simulation.clone();
        if let Some(iterations) = request.iterations {
            config.iterations = iterations;
        }
        if request.seed.is_some() {
            config.seed = request.seed;
        }
        Ok(Some(MonteCarloSimulator::try_from(config)?))
    }

    pub fn predict(&self, request: &PredictionRequest) -> Result<PredictionReport, PredictionError> {
        let league_season = request.league_season;
        let anchors = self.anchors(league_season);
        let mut warnings = anchors.warnings();
        let home = self.strength(request.home, league_season, &mut warnings);
        let away = self.strength(request.away, league_season, &mut warnings);

        let base_params = self.calculator.calculate(&anchors, &home, &away);
        let mut params = self.context.adjust(&base_params, &request.context, &self.calculator);

        let context = &request.context;
        let lineups = if context.home_lineup.is_some() || context.away_lineup.is_some() {
            let adjustment = self.lineup.adjust(
                &params,
                context.home_lineup.as_ref(),
                context.away_lineup.as_ref(),
                &self.players,
                &self.calculator,
                &mut warnings,
            )?;
            params = adjustment.params.clone();
            Some(adjustment)
        } else {
            None
        };

        let models = MarketModels::from(&*self.overdispersion(league_season));
        let simulator = self.simulator_for(request)?;
        let simulation = simulator.as_ref().unwrap_or(&self.simulator).simulate(&params, &models);

        let calibration = self.calibrator.snapshot();
        let markets = Market::iter()
            .map(|market| {
                let raw = market.probability(&simulation);
                let calibrated = calibration
                    .get(&market)
                    .map(|mapping| mapping.apply(raw))
                    .unwrap_or(raw);
                MarketProbability { market, raw, calibrated }
            })
            .collect();

        let top = self.config.likely_players.unwrap_or(DEFAULT_LIKELY_PLAYERS);
        let likely_players = |side: Side| match context.lineup(side) {
            Some(lineup) => LikelyPlayers {
                scorers: self
                    .players
                    .likely_scorers(&lineup.players, params.rate(side, EventKind::Goals), top),
                card_recipients: self.players.likely_card_recipients(
                    &lineup.players,
                    params.rate(side, EventKind::Cards),
                    top,
                ),
            },
            None => LikelyPlayers::default(),
        };
        let (home_players, away_players) = (likely_players(Side::Home), likely_players(Side::Away));

        info!(
            "{} v {} in {league_season}: λ {:.3}/{:.3}, P(home/draw/away) {:.3}/{:.3}/{:.3}, {} warnings",
            request.home,
            request.away,
            params.home.goals,
            params.away.goals,
            simulation.home_win,
            simulation.draw,
            simulation.away_win,
            warnings.len()
        );
        Ok(PredictionReport {
            home: request.home,
            away: request.away,
            home_name: self.team_name(request.home, league_season).map(String::from),
            away_name: self.team_name(request.away, league_season).map(String::from),
            league_season,
            context: context.clone(),
            confidence: params.confidence,
            referee: context.referee,
            base_params,
            params,
            models,
            lineups,
            simulation,
            markets,
            home_players,
            away_players,
            warnings,
        })
    }

    /// Predicts every fixture of a round in parallel.
    pub fn predict_round(&self, requests: &[PredictionRequest]) -> Result<Vec<PredictionReport>, PredictionError> {
        requests.par_iter().map(|request| self.predict(request)).collect()
    }

    /// Predicts the base request and each scenario with a common seed, so that differences
    /// between reports arise from the parameters rather than sampling noise.
    pub fn compare_scenarios(
        &self,
        base: &PredictionRequest,
        scenarios: &[Scenario],
    ) -> Result<ScenarioComparison, PredictionError> {
        let seed = base
            .seed
            .or(self.config.simulation.seed)
            .unwrap_or_else(clock_seed);
        let base = self.predict(&base.clone().with_seed(seed))?;
        let scenarios = scenarios
            .iter()
            .map(|scenario| {
                let request = PredictionRequest::new(base.home, base.away, base.league_season)
                    .with_context(scenario.context.clone())
                    .with_iterations(base.simulation.iterations)
                    .with_seed(seed);
                let report = self.predict(&request)?;
                let deltas = report
                    .markets
                    .iter()
                    .map(|probability| {
                        (
                            probability.market,
                            probability.calibrated - base.calibrated(probability.market),
                        )
                    })
                    .collect();
                Ok(ScenarioOutcome {
                    name: scenario.name.clone(),
                    report,
                    deltas,
                })
            })
            .collect::<Result<_, PredictionError>>()?;
        Ok(ScenarioComparison { base, scenarios })
    }

    pub fn suggest_lineup(&self, team_id: TeamId, objective: Objective) -> SuggestedLineup {
        lineup::suggest_lineup(&self.players, team_id, objective)
    }

    pub fn key_players_impact(&self, team_id: TeamId, missing: &[PlayerId]) -> KeyPlayersImpact {
        self.players.key_players_impact(team_id, missing)
    }

    /// Drops cached anchors, dispersion diagnostics and strengths of a league and season,
    /// returning the number of entries removed.
    pub fn invalidate(&self, league_season: LeagueSeason) -> usize {
        let removed = self.anchors.invalidate(|&key| key == league_season)
            + self.dispersion.invalidate(|&key| key == league_season)
            + self.strengths.invalidate(|&(_, key)| key == league_season);
        debug!("invalidated {removed} cached entries for {league_season}");
        removed
    }

    pub fn cache_stats(&self) -> PredictorCacheStats {
        PredictorCacheStats {
            anchors: self.anchors.stats(),
            dispersion: self.dispersion.stats(),
            strengths: self.strengths.stats(),
            players: self.players.cache_stats(),
        }
    }
}
