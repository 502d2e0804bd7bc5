//! Team strength ratios relative to league anchors, shrunk toward the league mean for teams
//! with few games.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::anchors::LeagueAnchors;
use crate::data::{EventKind, LeagueSeason, TeamId, TeamStats};
use crate::warning::{Warning, FEW_GAMES_THRESHOLD};

/// Games after which a team's raw ratios are taken at face value.
pub const FULL_CONFIDENCE_GAMES: f64 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitRatio {
    pub home: f64,
    pub away: f64,
}
impl SplitRatio {
    pub const NEUTRAL: SplitRatio = SplitRatio {
        home: 1.0,
        away: 1.0,
    };

    fn shrink(&self, confidence: f64) -> Self {
        Self {
            home: shrink(self.home, confidence),
            away: shrink(self.away, confidence),
        }
    }
}

impl Default for SplitRatio {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StrengthRatios {
    /// Goals scored relative to the anchor for the same side.
    pub attack: SplitRatio,
    /// Goals conceded relative to the anchor for the opposite side.
    pub defense: SplitRatio,
    /// Cards received relative to the anchor for the same side.
    pub card_favor: SplitRatio,
    /// Cards shown to opponents relative to the anchor for the opposite side.
    pub card_provoked: SplitRatio,
    /// Corners won relative to the anchor for the same side.
    pub corner_favor: SplitRatio,
    /// Corners conceded relative to the anchor for the opposite side.
    pub corner_conceded: SplitRatio,
}
impl StrengthRatios {
    fn shrink(&self, confidence: f64) -> Self {
        Self {
            attack: self.attack.shrink(confidence),
            defense: self.defense.shrink(confidence),
            card_favor: self.card_favor.shrink(confidence),
            card_provoked: self.card_provoked.shrink(confidence),
            corner_favor: self.corner_favor.shrink(confidence),
            corner_conceded: self.corner_conceded.shrink(confidence),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeamStrength {
    pub team_id: TeamId,
    pub league_season: LeagueSeason,
    pub games_played: u32,
    pub confidence: f64,
    pub raw: StrengthRatios,
    pub ratios: StrengthRatios,
    pub warnings: Vec<Warning>,
}
impl TeamStrength {
    /// A league-average team, used when no statistics exist.
    pub fn neutral(team_id: TeamId, league_season: LeagueSeason) -> Self {
        Self {
            team_id,
            league_season,
            games_played: 0,
            confidence: 0.0,
            raw: StrengthRatios::default(),
            ratios: StrengthRatios::default(),
            warnings: vec![Warning::UnknownTeam {
                team: team_id,
                league_season,
            }],
        }
    }
}

/// `min(games / 10, 1)`.
pub fn confidence(games_played: u32) -> f64 {
    f64::min(games_played as f64 / FULL_CONFIDENCE_GAMES, 1.0)
}

/// Blends a raw ratio toward the neutral 1.0 in proportion to `1 - confidence`.
#[inline]
pub fn shrink(raw: f64, confidence: f64) -> f64 {
    confidence * raw + (1.0 - confidence) * 1.0
}

/// Ratio of `numerator` to `denominator`, or the neutral 1.0 when either is unavailable or the
/// denominator is not positive.
#[inline]
pub fn safe_div(numerator: Option<f64>, denominator: f64) -> f64 {
    match numerator {
        Some(numerator) if denominator > 0.0 && denominator.is_finite() && numerator.is_finite() => {
            numerator / denominator
        }
        _ => 1.0,
    }
}

#[inline]
fn per_game(total: Option<u32>, games: u32) -> Option<f64> {
    if games == 0 {
        None
    } else {
        total.map(|total| total as f64 / games as f64)
    }
}

fn split(
    total_home: Option<u32>,
    total_away: Option<u32>,
    stats: &TeamStats,
    anchor_home: f64,
    anchor_away: f64,
) -> SplitRatio {
    SplitRatio {
        home: safe_div(per_game(total_home, stats.games_home), anchor_home),
        away: safe_div(per_game(total_away, stats.games_away), anchor_away),
    }
}

pub fn calculate(stats: &TeamStats, anchors: &LeagueAnchors) -> TeamStrength {
    let (goals, cards, corners) = (&anchors.goals, &anchors.cards, &anchors.corners);
    let raw = StrengthRatios {
        attack: split(
            Some(stats.goals_scored_home),
            Some(stats.goals_scored_away),
            stats,
            goals.home,
            goals.away,
        ),
        defense: split(
            Some(stats.goals_conceded_home),
            Some(stats.goals_conceded_away),
            stats,
            goals.away,
            goals.home,
        ),
        card_favor: split(stats.cards_home, stats.cards_away, stats, cards.home, cards.away),
        card_provoked: split(
            stats.cards_provoked_home,
            stats.cards_provoked_away,
            stats,
            cards.away,
            cards.home,
        ),
        corner_favor: split(
            stats.corners_home,
            stats.corners_away,
            stats,
            corners.home,
            corners.away,
        ),
        corner_conceded: split(
            stats.corners_conceded_home,
            stats.corners_conceded_away,
            stats,
            corners.away,
            corners.home,
        ),
    };

    let games_played = stats.games_played();
    let confidence = confidence(games_played);
    let ratios = raw.shrink(confidence);

    let mut warnings = vec![];
    if games_played < FEW_GAMES_THRESHOLD {
        warnings.push(Warning::FewGames {
            team: stats.team_id,
            games: games_played,
        });
    }
    let cards = [stats.cards_home, stats.cards_away, stats.cards_provoked_home, stats.cards_provoked_away];
    if cards.iter().any(Option::is_none) {
        warnings.push(Warning::MissingTeamStat {
            team: stats.team_id,
            market: EventKind::Cards,
        });
    }
    let corners = [
        stats.corners_home,
        stats.corners_away,
        stats.corners_conceded_home,
        stats.corners_conceded_away,
    ];
    if corners.iter().any(Option::is_none) {
        warnings.push(Warning::MissingTeamStat {
            team: stats.team_id,
            market: EventKind::Corners,
        });
    }

    debug!(
        "team {} strength: games {games_played}, confidence {confidence:.2}, attack {:.3}/{:.3}, defense {:.3}/{:.3}",
        stats.team_id,
        ratios.attack.home,
        ratios.attack.away,
        ratios.defense.home,
        ratios.defense.away
    );
    TeamStrength {
        team_id: stats.team_id,
        league_season: stats.league_season(),
        games_played,
        confidence,
        raw,
        ratios,
        warnings,
    }
}
