//! Match-context adjustments: competition format, importance and relative ranking.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use tracing::debug;

use crate::data::{CompetitionType, EventKind, Side};
use crate::lineup::Lineup;
use crate::params::{MatchParameters, ParameterCalculator};

pub type RefereeId = u64;

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Importance {
    /// Nothing at stake for either side.
    Low,
    #[default]
    Normal,
    /// Derbies and title races.
    High,
    /// Decides a title, promotion or relegation.
    Decisive,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchContext {
    pub competition: CompetitionType,
    pub importance: Importance,
    /// Positive when the home side is ranked higher.
    pub ranking_gap: f64,
    pub home_lineup: Option<Lineup>,
    pub away_lineup: Option<Lineup>,
    /// Recorded on the report; no referee-specific adjustment is applied.
    pub referee: Option<RefereeId>,
}
impl MatchContext {
    pub fn lineup(&self, side: Side) -> Option<&Lineup> {
        match side {
            Side::Home => self.home_lineup.as_ref(),
            Side::Away => self.away_lineup.as_ref(),
        }
    }

    pub fn has_lineups(&self) -> bool {
        self.home_lineup.is_some() && self.away_lineup.is_some()
    }
}

/// Multipliers on goals, cards and corners.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketFactors {
    pub goals: f64,
    pub cards: f64,
    pub corners: f64,
}
impl MarketFactors {
    pub const NEUTRAL: MarketFactors = MarketFactors::new(1.0, 1.0, 1.0);

    pub const fn new(goals: f64, cards: f64, corners: f64) -> Self {
        Self { goals, cards, corners }
    }

    pub fn get(&self, kind: EventKind) -> f64 {
        match kind {
            EventKind::Goals => self.goals,
            EventKind::Cards => self.cards,
            EventKind::Corners => self.corners,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub league: MarketFactors,
    pub knockout: MarketFactors,
    pub group: MarketFactors,
    pub friendly: MarketFactors,
    pub low_importance: f64,
    pub high_importance: f64,
    pub decisive_importance: f64,
    /// Largest relative shift of either side's goal rate due to the ranking gap.
    pub ranking_sensitivity: f64,
    /// Gap at which the shift reaches `tanh(1)` of its maximum.
    pub ranking_scale: f64,
}
impl Config {
    pub fn competition(&self, competition: CompetitionType) -> &MarketFactors {
        match competition {
            CompetitionType::League => &self.league,
            CompetitionType::Knockout => &self.knockout,
            CompetitionType::Group => &self.group,
            CompetitionType::Friendly => &self.friendly,
        }
    }

    pub fn importance(&self, importance: Importance) -> f64 {
        match importance {
            Importance::Low => self.low_importance,
            Importance::Normal => 1.0,
            Importance::High => self.high_importance,
            Importance::Decisive => self.decisive_importance,
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for competition in CompetitionType::iter() {
            let factors = self.competition(competition);
            for kind in EventKind::iter() {
                let factor = factors.get(kind);
                if !factor.is_finite() || factor <= 0.0 {
                    bail!("{kind} factor for {competition} competitions must be positive");
                }
            }
        }
        for importance in Importance::iter() {
            let factor = self.importance(importance);
            if !factor.is_finite() || factor <= 0.0 {
                bail!("{importance} importance factor must be positive");
            }
        }
        if !(0.0..1.0).contains(&self.ranking_sensitivity) {
            bail!("ranking sensitivity must be in [0, 1)");
        }
        if !self.ranking_scale.is_finite() || self.ranking_scale <= 0.0 {
            bail!("ranking scale must be positive");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            league: MarketFactors::NEUTRAL,
            knockout: MarketFactors::new(0.90, 1.15, 1.05),
            group: MarketFactors::new(0.95, 1.05, 1.0),
            friendly: MarketFactors::new(1.10, 0.80, 1.0),
            low_importance: 0.9,
            high_importance: 1.1,
            decisive_importance: 1.2,
            ranking_sensitivity: 0.1,
            ranking_scale: 10.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct ContextAdjuster {
    config: Config,
}
impl ContextAdjuster {
    /// Goal multipliers for the home and away sides arising from the ranking gap.
    pub fn ranking_factors(&self, ranking_gap: f64) -> (f64, f64) {
        if !ranking_gap.is_finite() {
            return (1.0, 1.0);
        }
        let shift = self.config.ranking_sensitivity * f64::tanh(ranking_gap / self.config.ranking_scale);
        (1.0 + shift, 1.0 - shift)
    }

    pub fn adjust(
        &self,
        params: &MatchParameters,
        context: &MatchContext,
        calculator: &ParameterCalculator,
    ) -> MatchParameters {
        let competition = self.config.competition(context.competition);
        let importance = self.config.importance(context.importance);
        let (home_ranking, away_ranking) = self.ranking_factors(context.ranking_gap);

        let mut adjusted = params.clone();
        for (side, ranking) in [(Side::Home, home_ranking), (Side::Away, away_ranking)] {
            let rates = adjusted.side_mut(side);
            rates.goals *= competition.goals * ranking;
            rates.cards *= competition.cards * importance;
            rates.corners *= competition.corners;
        }
        calculator.clamp(&mut adjusted);
        debug!(
            "{} competition, {} importance, ranking gap {:.1}: λ {:.3}/{:.3} ⇒ {:.3}/{:.3}",
            context.competition,
            context.importance,
            context.ranking_gap,
            params.home.goals,
            params.away.goals,
            adjusted.home.goals,
            adjusted.away.goals
        );
        adjusted
    }
}

impl TryFrom<Config> for ContextAdjuster {
    type Error = anyhow::Error;

    fn try_from(config: Config) -> Result<Self, Self::Error> {
        config.validate()?;
        Ok(Self { config })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SideRates;
    use assert_float_eq::*;

    fn params() -> MatchParameters {
        MatchParameters {
            home: SideRates {
                goals: 1.6,
                cards: 2.0,
                corners: 5.5,
            },
            away: SideRates {
                goals: 1.1,
                cards: 2.6,
                corners: 4.2,
            },
            confidence: 0.7,
        }
    }

    #[test]
    fn league_normal_is_identity() {
        let adjusted = ContextAdjuster::default().adjust(
            &params(),
            &MatchContext::default(),
            &ParameterCalculator::default(),
        );
        assert_eq!(params(), adjusted);
    }

    #[test]
    fn knockout_decisive() {
        let context = MatchContext {
            competition: CompetitionType::Knockout,
            importance: Importance::Decisive,
            ..MatchContext::default()
        };
        let adjusted = ContextAdjuster::default().adjust(&params(), &context, &ParameterCalculator::default());
        assert_float_relative_eq!(1.6 * 0.9, adjusted.home.goals);
        assert_float_relative_eq!(2.0 * 1.15 * 1.2, adjusted.home.cards);
        assert_float_relative_eq!(2.6 * 1.15 * 1.2, adjusted.away.cards);
        assert_float_relative_eq!(4.2 * 1.05, adjusted.away.corners);
        assert_eq!(0.7, adjusted.confidence);
    }

    #[test]
    fn friendly_lowers_cards() {
        let context = MatchContext {
            competition: CompetitionType::Friendly,
            importance: Importance::Low,
            ..MatchContext::default()
        };
        let adjusted = ContextAdjuster::default().adjust(&params(), &context, &ParameterCalculator::default());
        assert_float_relative_eq!(1.1 * 1.1, adjusted.away.goals);
        assert_float_relative_eq!(2.0 * 0.8 * 0.9, adjusted.home.cards);
        assert_float_relative_eq!(5.5, adjusted.home.corners);
    }

    #[test]
    fn ranking_gap() {
        let adjuster = ContextAdjuster::default();
        assert_eq!((1.0, 1.0), adjuster.ranking_factors(0.0));
        let (home, away) = adjuster.ranking_factors(10.0);
        assert_float_relative_eq!(1.0 + 0.1 * f64::tanh(1.0), home);
        assert_float_relative_eq!(1.0 - 0.1 * f64::tanh(1.0), away);
        let (home, away) = adjuster.ranking_factors(-1_000.0);
        assert_float_absolute_eq!(0.9, home);
        assert_float_absolute_eq!(1.1, away);

        let context = MatchContext {
            ranking_gap: 10.0,
            ..MatchContext::default()
        };
        let adjusted = adjuster.adjust(&params(), &context, &ParameterCalculator::default());
        assert!(adjusted.home.goals > 1.6);
        assert!(adjusted.away.goals < 1.1);
        assert_eq!(params().home.cards, adjusted.home.cards);
    }

    #[test]
    fn reclamped() {
        let mut extreme = params();
        extreme.home.goals = 4.9;
        let context = MatchContext {
            competition: CompetitionType::Friendly,
            ranking_gap: 50.0,
            ..MatchContext::default()
        };
        let adjusted = ContextAdjuster::default().adjust(&extreme, &context, &ParameterCalculator::default());
        assert_eq!(5.0, adjusted.home.goals);
    }

    #[test]
    fn config_validation() {
        assert!(Config::default().validate().is_ok());
        let config = Config {
            ranking_sensitivity: 1.5,
            ..Config::default()
        };
        assert!(ContextAdjuster::try_from(config).is_err());
        let config = Config {
            group: MarketFactors::new(1.0, 0.0, 1.0),
            ..Config::default()
        };
        assert_eq!(
            "cards factor for group competitions must be positive",
            config.validate().unwrap_err().to_string()
        );
    }
}
