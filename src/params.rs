//! Expected per-side event rates from league anchors and team strengths.
//!
//! Every rate is the product of the league anchor for the side, the side's own favour ratio,
//! the opponent's opposing ratio and a fixed side multiplier (home advantage for goals and
//! corners, home leniency for cards). Rates are then clamped to plausible ranges.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::debug;

use crate::anchors::LeagueAnchors;
use crate::data::{EventKind, Side};
use crate::strength::{SplitRatio, TeamStrength};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}
impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.min.is_finite() || !self.max.is_finite() {
            bail!("bounds must be finite");
        }
        if self.min <= 0.0 {
            bail!("lower bound must be positive");
        }
        if self.min > self.max {
            bail!("lower bound {} exceeds upper bound {}", self.min, self.max);
        }
        Ok(())
    }
}

/// Side multipliers and admissible ranges for one market.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub home_multiplier: f64,
    pub away_multiplier: f64,
    pub home_bounds: Bounds,
    pub away_bounds: Bounds,
}
impl MarketConfig {
    pub fn multiplier(&self, side: Side) -> f64 {
        match side {
            Side::Home => self.home_multiplier,
            Side::Away => self.away_multiplier,
        }
    }

    pub fn bounds(&self, side: Side) -> &Bounds {
        match side {
            Side::Home => &self.home_bounds,
            Side::Away => &self.away_bounds,
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for multiplier in [self.home_multiplier, self.away_multiplier] {
            if !multiplier.is_finite() || multiplier <= 0.0 {
                bail!("side multipliers must be positive");
            }
        }
        self.home_bounds.validate()?;
        self.away_bounds.validate()?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub goals: MarketConfig,
    pub cards: MarketConfig,
    pub corners: MarketConfig,
}
impl Config {
    pub fn market(&self, kind: EventKind) -> &MarketConfig {
        match kind {
            EventKind::Goals => &self.goals,
            EventKind::Cards => &self.cards,
            EventKind::Corners => &self.corners,
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for kind in EventKind::iter() {
            if let Err(err) = self.market(kind).validate() {
                bail!("invalid {kind} parameters: {err}");
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            goals: MarketConfig {
                home_multiplier: 1.15,
                away_multiplier: 0.90,
                home_bounds: Bounds::new(0.2, 5.0),
                away_bounds: Bounds::new(0.2, 4.0),
            },
            cards: MarketConfig {
                home_multiplier: 0.90,
                away_multiplier: 1.15,
                home_bounds: Bounds::new(1.0, 6.0),
                away_bounds: Bounds::new(1.0, 6.0),
            },
            corners: MarketConfig {
                home_multiplier: 1.10,
                away_multiplier: 0.95,
                home_bounds: Bounds::new(2.0, 12.0),
                away_bounds: Bounds::new(2.0, 12.0),
            },
        }
    }
}

/// Expected goals (λ), cards (μ) and corners (κ) for one side.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SideRates {
    pub goals: f64,
    pub cards: f64,
    pub corners: f64,
}
impl SideRates {
    pub fn get(&self, kind: EventKind) -> f64 {
        match kind {
            EventKind::Goals => self.goals,
            EventKind::Cards => self.cards,
            EventKind::Corners => self.corners,
        }
    }

    pub fn get_mut(&mut self, kind: EventKind) -> &mut f64 {
        match kind {
            EventKind::Goals => &mut self.goals,
            EventKind::Cards => &mut self.cards,
            EventKind::Corners => &mut self.corners,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchParameters {
    pub home: SideRates,
    pub away: SideRates,
    /// The lesser of the two teams' strength confidences.
    pub confidence: f64,
}
impl MatchParameters {
    pub fn side(&self, side: Side) -> &SideRates {
        match side {
            Side::Home => &self.home,
            Side::Away => &self.away,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideRates {
        match side {
            Side::Home => &mut self.home,
            Side::Away => &mut self.away,
        }
    }

    pub fn rate(&self, side: Side, kind: EventKind) -> f64 {
        self.side(side).get(kind)
    }

    pub fn total(&self, kind: EventKind) -> f64 {
        self.home.get(kind) + self.away.get(kind)
    }
}

/// The own-side ratio and the opponent-side ratio that drive `kind`.
fn driving_ratios(strength: &TeamStrength, kind: EventKind) -> (&SplitRatio, &SplitRatio) {
    let ratios = &strength.ratios;
    match kind {
        EventKind::Goals => (&ratios.attack, &ratios.defense),
        EventKind::Cards => (&ratios.card_favor, &ratios.card_provoked),
        EventKind::Corners => (&ratios.corner_favor, &ratios.corner_conceded),
    }
}

#[inline]
fn split(ratio: &SplitRatio, side: Side) -> f64 {
    match side {
        Side::Home => ratio.home,
        Side::Away => ratio.away,
    }
}

#[derive(Debug)]
pub struct ParameterCalculator {
    config: Config,
}
impl ParameterCalculator {
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The unclamped factors whose product is the rate for `side` and `kind`.
    fn factors(
        &self,
        anchors: &LeagueAnchors,
        home: &TeamStrength,
        away: &TeamStrength,
        side: Side,
        kind: EventKind,
    ) -> [f64; 4] {
        let anchor = anchors.market(kind);
        let anchor = match side {
            Side::Home => anchor.home,
            Side::Away => anchor.away,
        };
        let (own, opponent) = match side {
            Side::Home => (home, away),
            Side::Away => (away, home),
        };
        let (favor, _) = driving_ratios(own, kind);
        let (_, opposing) = driving_ratios(opponent, kind);
        [
            anchor,
            split(favor, side),
            split(opposing, side.opponent()),
            self.config.market(kind).multiplier(side),
        ]
    }

    fn build(&self, home: &TeamStrength, away: &TeamStrength, mut rate_f: impl FnMut(Side, EventKind) -> f64) -> MatchParameters {
        let mut rates = |side| {
            let mut rates = SideRates {
                goals: 0.0,
                cards: 0.0,
                corners: 0.0,
            };
            for kind in EventKind::iter() {
                *rates.get_mut(kind) = rate_f(side, kind);
            }
            rates
        };
        let mut params = MatchParameters {
            home: rates(Side::Home),
            away: rates(Side::Away),
            confidence: f64::min(home.confidence, away.confidence),
        };
        self.clamp(&mut params);
        params
    }

    /// Multiplicative rates with bidirectional team effects.
    pub fn calculate(&self, anchors: &LeagueAnchors, home: &TeamStrength, away: &TeamStrength) -> MatchParameters {
        let params = self.build(home, away, |side, kind| {
            self.factors(anchors, home, away, side, kind).iter().product()
        });
        debug!(
            "parameters for {} v {}: λ {:.3}/{:.3}, μ {:.3}/{:.3}, κ {:.3}/{:.3}, confidence {:.2}",
            home.team_id,
            away.team_id,
            params.home.goals,
            params.away.goals,
            params.home.cards,
            params.away.cards,
            params.home.corners,
            params.away.corners,
            params.confidence
        );
        params
    }

    /// Equivalent to [Self::calculate], computed as the exponent of a sum of log-factors.
    pub fn calculate_log_linear(
        &self,
        anchors: &LeagueAnchors,
        home: &TeamStrength,
        away: &TeamStrength,
    ) -> MatchParameters {
        self.build(home, away, |side, kind| {
            let factors = self.factors(anchors, home, away, side, kind);
            if factors.iter().any(|&factor| factor <= 0.0) {
                return 0.0;
            }
            factors.iter().map(|factor| factor.ln()).sum::<f64>().exp()
        })
    }

    /// Restores every rate to its admissible range.
    pub fn clamp(&self, params: &mut MatchParameters) {
        for side in [Side::Home, Side::Away] {
            for kind in EventKind::iter() {
                let bounds = self.config.market(kind).bounds(side);
                let rate = params.side_mut(side).get_mut(kind);
                *rate = if rate.is_nan() { bounds.min } else { bounds.clamp(*rate) };
            }
        }
    }
}

impl Default for ParameterCalculator {
    fn default() -> Self {
        Self {
            config: Config::default(),
        }
    }
}

impl TryFrom<Config> for ParameterCalculator {
    type Error = anyhow::Error;

    fn try_from(config: Config) -> Result<Self, Self::Error> {
        config.validate()?;
        Ok(Self { config })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LeagueSeason;
    use crate::strength::StrengthRatios;
    use assert_float_eq::*;

    const LS: LeagueSeason = LeagueSeason {
        league: 39,
        season: 2024,
    };

    fn strength(team_id: u64, confidence: f64, ratios: StrengthRatios) -> TeamStrength {
        TeamStrength {
            team_id,
            league_season: LS,
            games_played: 20,
            confidence,
            raw: ratios.clone(),
            ratios,
            warnings: vec![],
        }
    }

    fn split(home: f64, away: f64) -> SplitRatio {
        SplitRatio { home, away }
    }

    #[test]
    fn home_goals_scenario() {
        let anchors = LeagueAnchors::defaults(LS);
        let home = strength(
            1,
            1.0,
            StrengthRatios {
                attack: split(1.2, 1.0),
                ..StrengthRatios::default()
            },
        );
        let away = strength(
            2,
            0.6,
            StrengthRatios {
                defense: split(1.0, 0.9),
                ..StrengthRatios::default()
            },
        );
        let params = ParameterCalculator::default().calculate(&anchors, &home, &away);
        assert_float_relative_eq!(1.45 * 1.2 * 0.9 * 1.15, params.home.goals, 1e-12);
        assert_float_absolute_eq!(1.80, params.home.goals, 0.018);
        assert_float_relative_eq!(1.05 * 0.90, params.away.goals, 1e-12);
        assert_eq!(0.6, params.confidence);
    }

    #[test]
    fn bidirectional_cards_and_corners() {
        let anchors = LeagueAnchors::defaults(LS);
        let home = strength(
            1,
            1.0,
            StrengthRatios {
                card_favor: split(1.1, 1.0),
                card_provoked: split(1.2, 1.0),
                corner_favor: split(1.3, 1.0),
                corner_conceded: split(0.8, 1.0),
                ..StrengthRatios::default()
            },
        );
        let away = strength(
            2,
            1.0,
            StrengthRatios {
                card_favor: split(1.0, 0.9),
                card_provoked: split(1.0, 1.25),
                corner_favor: split(1.0, 1.1),
                corner_conceded: split(1.0, 0.7),
                ..StrengthRatios::default()
            },
        );
        let params = ParameterCalculator::default().calculate(&anchors, &home, &away);
        assert_float_relative_eq!(2.1 * 1.1 * 1.25 * 0.90, params.home.cards, 1e-12);
        assert_float_relative_eq!(2.4 * 0.9 * 1.2 * 1.15, params.away.cards, 1e-12);
        assert_float_relative_eq!(5.2 * 1.3 * 0.7 * 1.10, params.home.corners, 1e-12);
        assert_float_relative_eq!(4.3 * 1.1 * 0.8 * 0.95, params.away.corners, 1e-12);
    }

    #[test]
    fn clamped() {
        let anchors = LeagueAnchors::defaults(LS);
        let dominant = strength(
            1,
            1.0,
            StrengthRatios {
                attack: split(5.0, 5.0),
                defense: split(0.01, 0.01),
                card_favor: split(0.1, 0.1),
                corner_favor: split(4.0, 4.0),
                ..StrengthRatios::default()
            },
        );
        let neutral = strength(2, 1.0, StrengthRatios::default());
        let params = ParameterCalculator::default().calculate(&anchors, &dominant, &neutral);
        assert_eq!(5.0, params.home.goals);
        assert_eq!(0.2, params.away.goals);
        assert_eq!(1.0, params.home.cards);
        assert_eq!(12.0, params.home.corners);
    }

    #[test]
    fn log_linear_agrees() {
        let anchors = LeagueAnchors::defaults(LS);
        let home = strength(
            1,
            0.8,
            StrengthRatios {
                attack: split(1.15, 0.95),
                defense: split(0.85, 1.1),
                card_favor: split(1.05, 0.97),
                card_provoked: split(1.12, 0.9),
                corner_favor: split(1.2, 1.05),
                corner_conceded: split(0.9, 1.02),
            },
        );
        let away = strength(
            2,
            0.9,
            StrengthRatios {
                attack: split(0.9, 1.3),
                defense: split(1.2, 0.8),
                card_favor: split(1.1, 1.3),
                card_provoked: split(0.95, 1.05),
                corner_favor: split(0.8, 0.85),
                corner_conceded: split(1.1, 1.25),
            },
        );
        let calculator = ParameterCalculator::default();
        let multiplicative = calculator.calculate(&anchors, &home, &away);
        let log_linear = calculator.calculate_log_linear(&anchors, &home, &away);
        for side in [Side::Home, Side::Away] {
            for kind in EventKind::iter() {
                assert_float_relative_eq!(
                    multiplicative.rate(side, kind),
                    log_linear.rate(side, kind),
                    1e-12
                );
            }
        }
        assert_eq!(multiplicative.confidence, log_linear.confidence);
    }

    #[test]
    fn config_validation() {
        assert!(Config::default().validate().is_ok());
        let mut config = Config::default();
        config.cards.home_bounds = Bounds::new(3.0, 2.0);
        assert_eq!(
            "invalid cards parameters: lower bound 3 exceeds upper bound 2",
            ParameterCalculator::try_from(config).unwrap_err().to_string()
        );
        let mut config = Config::default();
        config.goals.away_multiplier = 0.0;
        assert!(config.validate().is_err());
    }
}
