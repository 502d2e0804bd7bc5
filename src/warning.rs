//! Non-fatal data-sufficiency findings attached to results.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::data::{EventKind, LeagueSeason, PlayerId, Side, TeamId};

/// Games below which shrinkage toward the league mean is considered strong.
pub const FEW_GAMES_THRESHOLD: u32 = 8;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    DefaultAnchors {
        league_season: LeagueSeason,
        market: EventKind,
    },
    FewGames {
        team: TeamId,
        games: u32,
    },
    UnknownTeam {
        team: TeamId,
        league_season: LeagueSeason,
    },
    MissingTeamStat {
        team: TeamId,
        market: EventKind,
    },
    UnknownPlayer {
        player: PlayerId,
    },
    PlayerWithoutMinutes {
        player: PlayerId,
    },
    ShortLineup {
        side: Side,
        players: usize,
    },
}

impl Display for Warning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::DefaultAnchors { league_season, market } => write!(
                f,
                "no finished matches with {market} data in {league_season}; using historical defaults"
            ),
            Warning::FewGames { team, games } => write!(
                f,
                "team {team} played fewer than {FEW_GAMES_THRESHOLD} games ({games}); shrinkage to league mean is strong"
            ),
            Warning::UnknownTeam { team, league_season } => {
                write!(f, "no statistics for team {team} in {league_season}; treated as league average")
            }
            Warning::MissingTeamStat { team, market } => {
                write!(f, "team {team} has no {market} statistics; {market} ratios are neutral")
            }
            Warning::UnknownPlayer { player } => {
                write!(f, "no statistics for player {player}; default rating used")
            }
            Warning::PlayerWithoutMinutes { player } => {
                write!(f, "player {player} has no recorded minutes; default rating used")
            }
            Warning::ShortLineup { side, players } => {
                write!(f, "{side} lineup has {players} players (expected 11)")
            }
        }
    }
}
