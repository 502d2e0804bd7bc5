//! Lineup-driven adjustments to expected rates, blended by a per-side confidence weight.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};
use thiserror::Error;
use tracing::debug;

use crate::data::{PlayerId, Position, Side, TeamId};
use crate::params::{Bounds, MatchParameters, ParameterCalculator};
use crate::player::{LineupRatios, LineupStrength, PlayerRating, PlayerRatingModel, LINEUP_SIZE};
use crate::warning::Warning;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lineup {
    pub players: Vec<PlayerId>,
    /// Confidence in the lineup, from 0 (ignored) to 1 (full effect).
    #[serde(default = "full_weight")]
    pub weight: f64,
}

fn full_weight() -> f64 {
    1.0
}

impl Lineup {
    pub fn new(players: Vec<PlayerId>) -> Self {
        Self {
            players,
            weight: full_weight(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn validate(&self) -> Result<(), LineupError> {
        if !(0.0..=1.0).contains(&self.weight) {
            return Err(LineupError::InvalidWeight(self.weight));
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LineupError {
    #[error("lineup weight {0} is outside [0, 1]")]
    InvalidWeight(f64),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Range of the inverse opponent-attack factor applied to each side's goals.
    pub opponent_bounds: Bounds,
}
impl Config {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.opponent_bounds.validate()?;
        if !(self.opponent_bounds.min..=self.opponent_bounds.max).contains(&1.0) {
            bail!("opponent bounds must contain 1.0");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            opponent_bounds: Bounds::new(0.8, 1.2),
        }
    }
}

/// `1 + (ratio - 1) * weight`.
#[inline]
pub fn effective(ratio: f64, weight: f64) -> f64 {
    1.0 + (ratio - 1.0) * weight
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SideLineup {
    pub strength: LineupStrength,
    pub ratios: LineupRatios,
    pub weight: f64,
    /// Ratios after blending by `weight`.
    pub effective: LineupRatios,
}
impl SideLineup {
    fn absent() -> Self {
        Self {
            strength: LineupStrength::default(),
            ratios: LineupRatios::NEUTRAL,
            weight: 0.0,
            effective: LineupRatios::NEUTRAL,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineupAdjustment {
    pub home: SideLineup,
    pub away: SideLineup,
    pub params: MatchParameters,
}

#[derive(Debug, Default)]
pub struct LineupAdjuster {
    config: Config,
}
impl LineupAdjuster {
    fn evaluate(
        side: Side,
        lineup: Option<&Lineup>,
        model: &PlayerRatingModel,
        warnings: &mut Vec<Warning>,
    ) -> Result<SideLineup, LineupError> {
        let Some(lineup) = lineup else {
            return Ok(SideLineup::absent());
        };
        lineup.validate()?;
        if lineup.players.len() < LINEUP_SIZE {
            warnings.push(Warning::ShortLineup {
                side,
                players: lineup.players.len(),
            });
        }
        let strength = model.calculate_lineup_strength(&lineup.players, warnings);
        let ratios = LineupRatios::from(&strength);
        let effective = LineupRatios {
            off: effective(ratios.off, lineup.weight),
            cross: effective(ratios.cross, lineup.weight),
            foul: effective(ratios.foul, lineup.weight),
        };
        Ok(SideLineup {
            strength,
            ratios,
            weight: lineup.weight,
            effective,
        })
    }

    pub fn adjust(
        &self,
        params: &MatchParameters,
        home: Option<&Lineup>,
        away: Option<&Lineup>,
        model: &PlayerRatingModel,
        calculator: &ParameterCalculator,
        warnings: &mut Vec<Warning>,
    ) -> Result<LineupAdjustment, LineupError> {
        let home = Self::evaluate(Side::Home, home, model, warnings)?;
        let away = Self::evaluate(Side::Away, away, model, warnings)?;

        let mut adjusted = params.clone();
        for (side, own, opponent) in [(Side::Home, &home, &away), (Side::Away, &away, &home)] {
            let opponent_factor = self.config.opponent_bounds.clamp(1.0 / opponent.effective.off);
            let rates = adjusted.side_mut(side);
            rates.goals *= own.effective.off * opponent_factor;
            rates.cards *= own.effective.foul;
            rates.corners *= own.effective.cross;
        }
        calculator.clamp(&mut adjusted);
        debug!(
            "lineup ratios off {:.3}/{:.3}, foul {:.3}/{:.3}, cross {:.3}/{:.3}",
            home.effective.off,
            away.effective.off,
            home.effective.foul,
            away.effective.foul,
            home.effective.cross,
            away.effective.cross
        );
        Ok(LineupAdjustment {
            home,
            away,
            params: adjusted,
        })
    }
}

impl TryFrom<Config> for LineupAdjuster {
    type Error = anyhow::Error;

    fn try_from(config: Config) -> Result<Self, Self::Error> {
        config.validate()?;
        Ok(Self { config })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Objective {
    Attack,
    Defense,
    #[default]
    Balanced,
}
impl Objective {
    fn score(&self, rating: &PlayerRating) -> f64 {
        match self {
            Objective::Attack => rating.attack,
            Objective::Defense => rating.defense,
            Objective::Balanced => (rating.attack + rating.defense + rating.discipline + rating.set_piece) / 4.0,
        }
    }
}

/// Slots of a 4-3-3, filled in order before topping up from the best of the remainder.
const FORMATION: [(Position, usize); 6] = [
    (Position::Goalkeeper, 1),
    (Position::CentreBack, 2),
    (Position::FullBack, 2),
    (Position::DefensiveMidfielder, 1),
    (Position::Midfielder, 2),
    (Position::Forward, 3),
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuggestedLineup {
    pub team_id: TeamId,
    pub objective: Objective,
    pub players: Vec<PlayerId>,
    pub strength: LineupStrength,
}

/// Picks the best eleven of a squad for `objective`, or fewer if the squad is smaller.
pub fn suggest_lineup(model: &PlayerRatingModel, team_id: TeamId, objective: Objective) -> SuggestedLineup {
    let mut squad: Vec<Arc<PlayerRating>> = model
        .team_ratings(team_id)
        .into_iter()
        .filter(|rating| rating.rated)
        .collect();
    squad.sort_by(|a, b| {
        objective
            .score(b)
            .partial_cmp(&objective.score(a))
            .unwrap_or(Ordering::Equal)
            .then(a.player_id.cmp(&b.player_id))
    });

    let mut picked: Vec<Arc<PlayerRating>> = Vec::with_capacity(LINEUP_SIZE);
    for (position, slots) in FORMATION {
        picked.extend(
            squad
                .iter()
                .filter(|rating| rating.position == Some(position))
                .take(slots)
                .cloned(),
        );
    }
    for rating in &squad {
        if picked.len() >= LINEUP_SIZE {
            break;
        }
        if !picked.iter().any(|other| other.player_id == rating.player_id) {
            picked.push(rating.clone());
        }
    }

    SuggestedLineup {
        team_id,
        objective,
        players: picked.iter().map(|rating| rating.player_id).collect(),
        strength: LineupStrength::from_ratings(picked.iter().map(|rating| rating.as_ref())),
    }
}
