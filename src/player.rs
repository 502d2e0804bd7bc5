//! Player indices on a 0–100 scale and their aggregation over a lineup.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{CacheStats, KeyedCache};
use crate::data::{PlayerId, PlayerStats, Position, TeamId};
use crate::warning::Warning;

pub const BASELINE_ATTACK: f64 = 50.0;
pub const BASELINE_DEFENSE: f64 = 50.0;
pub const BASELINE_DISCIPLINE: f64 = 70.0;
pub const BASELINE_SET_PIECE: f64 = 50.0;

pub const LINEUP_SIZE: usize = 11;

/// Contribution of each index to a position class.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionWeights {
    pub attack: f64,
    pub defense: f64,
    pub discipline: f64,
    pub set_piece: f64,
}

pub fn position_weights(position: Position) -> PositionWeights {
    let (attack, defense, discipline, set_piece) = match position {
        Position::Goalkeeper => (0.0, 1.0, 0.8, 0.0),
        Position::CentreBack => (0.2, 1.0, 0.9, 0.4),
        Position::FullBack => (0.5, 0.7, 0.8, 0.6),
        Position::DefensiveMidfielder => (0.3, 0.8, 1.0, 0.4),
        Position::Midfielder => (0.7, 0.4, 0.7, 0.6),
        Position::Forward => (1.0, 0.1, 0.6, 0.4),
    };
    PositionWeights {
        attack,
        defense,
        discipline,
        set_piece,
    }
}

/// Box-score aggregates normalised to 90 minutes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Per90 {
    pub goals: f64,
    pub xg: f64,
    pub shots: f64,
    pub key_passes: f64,
    pub set_piece_deliveries: f64,
    pub tackles: f64,
    pub interceptions: f64,
    pub fouls: f64,
    /// Yellow cards plus three per red.
    pub cards: f64,
}
impl Per90 {
    pub fn from_stats(stats: &PlayerStats) -> Option<Self> {
        if stats.minutes == 0 {
            return None;
        }
        let factor = 90.0 / stats.minutes as f64;
        let rate = |total: f64| total * factor;
        Some(Self {
            goals: rate(stats.goals as f64),
            xg: rate(stats.xg),
            shots: rate(stats.shots as f64),
            key_passes: rate(stats.key_passes as f64),
            set_piece_deliveries: rate(stats.set_piece_deliveries as f64),
            tackles: rate(stats.tackles as f64),
            interceptions: rate(stats.interceptions as f64),
            fouls: rate(stats.fouls as f64),
            cards: rate(stats.yellow_cards as f64 + 3.0 * stats.red_cards as f64),
        })
    }

    /// Share of a side's goal threat attributable to this player.
    pub fn offensive_index(&self) -> f64 {
        0.5 * self.goals + 0.3 * self.xg + 0.2 * self.shots / 10.0
    }

    /// Share of a side's bookings attributable to this player.
    pub fn booking_index(&self) -> f64 {
        self.cards + 0.1 * self.fouls
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerRating {
    pub player_id: PlayerId,
    pub team_id: Option<TeamId>,
    pub name: String,
    pub position: Option<Position>,
    pub attack: f64,
    pub defense: f64,
    pub discipline: f64,
    pub set_piece: f64,
    pub per90: Per90,
    pub minutes: u32,
    /// False when the rating is the default for a player without usable statistics.
    pub rated: bool,
}
impl PlayerRating {
    pub fn default_for(player_id: PlayerId) -> Self {
        Self {
            player_id,
            team_id: None,
            name: format!("player {player_id}"),
            position: None,
            attack: BASELINE_ATTACK,
            defense: BASELINE_DEFENSE,
            discipline: BASELINE_DISCIPLINE,
            set_piece: BASELINE_SET_PIECE,
            per90: Per90::default(),
            minutes: 0,
            rated: false,
        }
    }
}

#[inline]
fn index(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

fn attack_index(per90: &Per90, weight: f64) -> f64 {
    if weight == 0.0 {
        return BASELINE_ATTACK;
    }
    // elite references: 0.7 goals, 0.6 xG, 3 shots, 2.5 key passes per 90
    let score = 0.35 * per90.goals / 0.7
        + 0.25 * per90.xg / 0.6
        + 0.20 * per90.shots / 3.0
        + 0.20 * per90.key_passes / 2.5;
    index(weight * score * 100.0)
}

fn defense_index(per90: &Per90, weight: f64) -> f64 {
    if weight == 0.0 {
        return BASELINE_DEFENSE;
    }
    index(weight * (per90.tackles / 3.0 * 50.0 + per90.interceptions / 2.0 * 50.0))
}

fn discipline_index(per90: &Per90, weight: f64) -> f64 {
    index(100.0 - weight * 100.0 * (0.6 * per90.cards + 0.4 * per90.fouls / 3.0))
}

fn set_piece_index(per90: &Per90, weight: f64) -> f64 {
    if weight == 0.0 {
        return BASELINE_SET_PIECE;
    }
    index(weight * (per90.set_piece_deliveries / 2.5 * 70.0 + per90.shots / 3.0 * 30.0))
}

/// Rates a single player from season totals. Players without minutes get the default rating.
pub fn rate(stats: &PlayerStats) -> PlayerRating {
    let Some(per90) = Per90::from_stats(stats) else {
        return PlayerRating {
            team_id: Some(stats.team_id),
            name: stats.name.clone(),
            position: Some(stats.position),
            ..PlayerRating::default_for(stats.player_id)
        };
    };
    let weights = position_weights(stats.position);
    PlayerRating {
        player_id: stats.player_id,
        team_id: Some(stats.team_id),
        name: stats.name.clone(),
        position: Some(stats.position),
        attack: attack_index(&per90, weights.attack),
        defense: defense_index(&per90, weights.defense),
        discipline: discipline_index(&per90, weights.discipline),
        set_piece: set_piece_index(&per90, weights.set_piece),
        per90,
        minutes: stats.minutes,
        rated: true,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineupStrength {
    pub attack: f64,
    pub defense: f64,
    pub discipline: f64,
    pub set_piece: f64,
    pub players: usize,
}
impl Default for LineupStrength {
    fn default() -> Self {
        Self {
            attack: BASELINE_ATTACK,
            defense: BASELINE_DEFENSE,
            discipline: BASELINE_DISCIPLINE,
            set_piece: BASELINE_SET_PIECE,
            players: 0,
        }
    }
}

impl LineupStrength {
    pub fn from_ratings<'a>(ratings: impl IntoIterator<Item = &'a PlayerRating>) -> Self {
        let mut sum = LineupStrength {
            attack: 0.0,
            defense: 0.0,
            discipline: 0.0,
            set_piece: 0.0,
            players: 0,
        };
        for rating in ratings {
            sum.attack += rating.attack;
            sum.defense += rating.defense;
            sum.discipline += rating.discipline;
            sum.set_piece += rating.set_piece;
            sum.players += 1;
        }
        if sum.players == 0 {
            return Self::default();
        }
        let n = sum.players as f64;
        Self {
            attack: sum.attack / n,
            defense: sum.defense / n,
            discipline: sum.discipline / n,
            set_piece: sum.set_piece / n,
            players: sum.players,
        }
    }
}

/// Multiplicative lineup effects on goals (off), corners (cross) and cards (foul).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineupRatios {
    pub off: f64,
    pub cross: f64,
    pub foul: f64,
}
impl LineupRatios {
    pub const NEUTRAL: LineupRatios = LineupRatios {
        off: 1.0,
        cross: 1.0,
        foul: 1.0,
    };
}

impl Default for LineupRatios {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl From<&LineupStrength> for LineupRatios {
    fn from(strength: &LineupStrength) -> Self {
        let indiscipline = f64::max(0.0, BASELINE_DISCIPLINE - strength.discipline);
        Self {
            off: ratio(strength.attack, BASELINE_ATTACK, 0.8, 0.7, 1.35),
            cross: ratio(strength.set_piece, BASELINE_SET_PIECE, 0.6, 0.7, 1.35),
            foul: ratio(indiscipline, 0.0, 0.8, 0.85, 1.6),
        }
    }
}

/// `1 + (value - base) / 100 * sensitivity`, clamped to `[low, high]`.
#[inline]
pub fn ratio(value: f64, base: f64, sensitivity: f64, low: f64, high: f64) -> f64 {
    (1.0 + (value - base) / 100.0 * sensitivity).clamp(low, high)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LikelyPlayer {
    pub player_id: PlayerId,
    pub name: String,
    pub probability: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyPlayersImpact {
    /// Squad-average minus missing-average attack index; positive when stronger players are out.
    pub attack: f64,
    pub defense: f64,
    pub missing: Vec<String>,
}

/// Rates players lazily from a fixed set of statistics, caching each rating.
#[derive(Debug, Default)]
pub struct PlayerRatingModel {
    stats: FxHashMap<PlayerId, PlayerStats>,
    cache: KeyedCache<PlayerId, PlayerRating>,
}
impl PlayerRatingModel {
    pub fn new(players: impl IntoIterator<Item = PlayerStats>) -> Self {
        Self {
            stats: players
                .into_iter()
                .map(|stats| (stats.player_id, stats))
                .collect(),
            cache: KeyedCache::default(),
        }
    }

    /// The player's rating, or `None` if the player is unknown.
    pub fn rating(&self, player_id: PlayerId) -> Option<Arc<PlayerRating>> {
        let stats = self.stats.get(&player_id)?;
        Some(self.cache.get_or_insert_with(player_id, || rate(stats)))
    }

    fn ratings_of(&self, player_ids: &[PlayerId], warnings: &mut Vec<Warning>) -> Vec<Arc<PlayerRating>> {
        player_ids
            .iter()
            .map(|&player_id| match self.rating(player_id) {
                Some(rating) => {
                    if !rating.rated {
                        warnings.push(Warning::PlayerWithoutMinutes { player: player_id });
                    }
                    rating
                }
                None => {
                    warnings.push(Warning::UnknownPlayer { player: player_id });
                    Arc::new(PlayerRating::default_for(player_id))
                }
            })
            .collect()
    }

    pub fn calculate_lineup_strength(&self, player_ids: &[PlayerId], warnings: &mut Vec<Warning>) -> LineupStrength {
        let ratings = self.ratings_of(player_ids, warnings);
        let strength = LineupStrength::from_ratings(ratings.iter().map(|rating| rating.as_ref()));
        debug!(
            "lineup of {} players: attack {:.1}, defense {:.1}, discipline {:.1}, set piece {:.1}",
            strength.players, strength.attack, strength.defense, strength.discipline, strength.set_piece
        );
        strength
    }

    pub fn calculate_lineup_ratios(&self, player_ids: &[PlayerId], warnings: &mut Vec<Warning>) -> LineupRatios {
        LineupRatios::from(&self.calculate_lineup_strength(player_ids, warnings))
    }

    pub fn team_ratings(&self, team_id: TeamId) -> Vec<Arc<PlayerRating>> {
        let mut player_ids: Vec<_> = self
            .stats
            .values()
            .filter(|stats| stats.team_id == team_id)
            .map(|stats| stats.player_id)
            .collect();
        player_ids.sort_unstable();
        player_ids
            .into_iter()
            .filter_map(|player_id| self.rating(player_id))
            .collect()
    }

    /// How much the squad's average attack and defense indices exceed those of the missing
    /// players.
    pub fn key_players_impact(&self, team_id: TeamId, missing: &[PlayerId]) -> KeyPlayersImpact {
        let squad = self.team_ratings(team_id);
        let absent: Vec<_> = squad
            .iter()
            .filter(|rating| missing.contains(&rating.player_id))
            .collect();
        if absent.is_empty() {
            return KeyPlayersImpact::default();
        }
        let squad_strength = LineupStrength::from_ratings(squad.iter().map(|rating| rating.as_ref()));
        let absent_strength = LineupStrength::from_ratings(absent.iter().map(|rating| rating.as_ref()));
        KeyPlayersImpact {
            attack: squad_strength.attack - absent_strength.attack,
            defense: squad_strength.defense - absent_strength.defense,
            missing: absent.iter().map(|rating| rating.name.clone()).collect(),
        }
    }

    /// Anytime-scorer probabilities for a lineup whose side is expected to score `lambda` goals.
    pub fn likely_scorers(&self, player_ids: &[PlayerId], lambda: f64, top: usize) -> Vec<LikelyPlayer> {
        self.likely(player_ids, lambda, 0.6, top, |per90| per90.offensive_index())
    }

    /// Booking probabilities for a lineup whose side is expected to receive `mu` cards.
    pub fn likely_card_recipients(&self, player_ids: &[PlayerId], mu: f64, top: usize) -> Vec<LikelyPlayer> {
        self.likely(player_ids, mu, 0.5, top, |per90| per90.booking_index())
    }

    fn likely(
        &self,
        player_ids: &[PlayerId],
        rate: f64,
        cap: f64,
        top: usize,
        weight_f: impl Fn(&Per90) -> f64,
    ) -> Vec<LikelyPlayer> {
        let weighted: Vec<_> = player_ids
            .iter()
            .filter_map(|&player_id| self.rating(player_id))
            .map(|rating| {
                let weight = weight_f(&rating.per90);
                (rating, weight)
            })
            .collect();
        let total: f64 = weighted.iter().map(|(_, weight)| weight).sum();
        if total <= 0.0 {
            return vec![];
        }
        let mut likely: Vec<_> = weighted
            .into_iter()
            .filter(|(_, weight)| *weight > 0.0)
            .map(|(rating, weight)| LikelyPlayer {
                player_id: rating.player_id,
                name: rating.name.clone(),
                probability: f64::min(1.0 - f64::exp(-rate * weight / total), cap),
            })
            .collect();
        likely.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        likely.truncate(top);
        likely
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
