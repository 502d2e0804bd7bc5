//! Input schema for normalised team, player and match statistics.
//!
//! Normalisation of provider data into this schema happens upstream; the crate only validates
//! what it is given.

use std::fmt::{Display, Formatter};
use std::path::Path;

use chrono::NaiveDate;
use ordinalizer::Ordinal;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumCount, EnumIter};
use thiserror::Error;

use crate::file::ReadJsonFile;

pub const SCHEMA_VERSION: u32 = 1;

pub type TeamId = u64;
pub type PlayerId = u64;
pub type LeagueId = u32;
pub type Season = u16;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeagueSeason {
    pub league: LeagueId,
    pub season: Season,
}
impl LeagueSeason {
    pub fn new(league: LeagueId, season: Season) -> Self {
        Self { league, season }
    }
}

impl Display for LeagueSeason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.league, self.season)
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum Side {
    Home,
    Away,
}
impl Side {
    pub fn opponent(&self) -> Side {
        match self {
            Side::Home => Side::Away,
            Side::Away => Side::Home,
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Score {
    pub home: u8,
    pub away: u8,
}
impl Score {
    pub fn new(home: u8, away: u8) -> Self {
        Self { home, away }
    }

    pub fn total(&self) -> u16 {
        self.home as u16 + self.away as u16
    }
}

impl Display for Score {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.home, self.away)
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize, Display, EnumCount, EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Goalkeeper,
    CentreBack,
    FullBack,
    DefensiveMidfielder,
    Midfielder,
    Forward,
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CompetitionType {
    #[default]
    League,
    Knockout,
    Group,
    Friendly,
}

/// The countable events modelled per side.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize, Display, Ordinal, EnumCount, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Goals,
    Cards,
    Corners,
}

/// Season totals for one team in one league/season.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamStats {
    pub team_id: TeamId,
    pub name: String,
    pub league: LeagueId,
    pub season: Season,
    pub games_home: u32,
    pub games_away: u32,
    pub goals_scored_home: u32,
    pub goals_scored_away: u32,
    pub goals_conceded_home: u32,
    pub goals_conceded_away: u32,
    #[serde(default)]
    pub cards_home: Option<u32>,
    #[serde(default)]
    pub cards_away: Option<u32>,
    #[serde(default)]
    pub cards_provoked_home: Option<u32>,
    #[serde(default)]
    pub cards_provoked_away: Option<u32>,
    #[serde(default)]
    pub corners_home: Option<u32>,
    #[serde(default)]
    pub corners_away: Option<u32>,
    #[serde(default)]
    pub corners_conceded_home: Option<u32>,
    #[serde(default)]
    pub corners_conceded_away: Option<u32>,
}
impl TeamStats {
    pub fn games_played(&self) -> u32 {
        self.games_home + self.games_away
    }

    pub fn league_season(&self) -> LeagueSeason {
        LeagueSeason::new(self.league, self.season)
    }
}

/// Season totals for one player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub player_id: PlayerId,
    pub team_id: TeamId,
    pub name: String,
    pub position: Position,
    pub minutes: u32,
    pub appearances: u32,
    #[serde(default)]
    pub goals: u32,
    #[serde(default)]
    pub xg: f64,
    #[serde(default)]
    pub shots: u32,
    #[serde(default)]
    pub key_passes: u32,
    #[serde(default)]
    pub set_piece_deliveries: u32,
    #[serde(default)]
    pub tackles: u32,
    #[serde(default)]
    pub interceptions: u32,
    #[serde(default)]
    pub fouls: u32,
    #[serde(default)]
    pub yellow_cards: u32,
    #[serde(default)]
    pub red_cards: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinishedMatch {
    pub date: NaiveDate,
    pub league: LeagueId,
    pub season: Season,
    #[serde(default)]
    pub competition: CompetitionType,
    pub home_team: TeamId,
    pub away_team: TeamId,
    pub home_goals: u8,
    pub away_goals: u8,
    #[serde(default)]
    pub home_cards: Option<u8>,
    #[serde(default)]
    pub away_cards: Option<u8>,
    #[serde(default)]
    pub home_corners: Option<u8>,
    #[serde(default)]
    pub away_corners: Option<u8>,
}
impl FinishedMatch {
    pub fn score(&self) -> Score {
        Score::new(self.home_goals, self.away_goals)
    }

    pub fn total_cards(&self) -> Option<u16> {
        Some(self.home_cards? as u16 + self.away_cards? as u16)
    }

    pub fn total_corners(&self) -> Option<u16> {
        Some(self.home_corners? as u16 + self.away_corners? as u16)
    }

    pub fn league_season(&self) -> LeagueSeason {
        LeagueSeason::new(self.league, self.season)
    }
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("unsupported schema version {0} (expected {SCHEMA_VERSION})")]
    UnsupportedVersion(u32),

    #[error("duplicate team {team_id} in {league_season}")]
    DuplicateTeam {
        team_id: TeamId,
        league_season: LeagueSeason,
    },

    #[error("duplicate player {0}")]
    DuplicatePlayer(PlayerId),

    #[error("match on {date} has the same team {team_id} on both sides")]
    SelfMatch { date: NaiveDate, team_id: TeamId },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub version: u32,
    #[serde(default)]
    pub teams: Vec<TeamStats>,
    #[serde(default)]
    pub players: Vec<PlayerStats>,
    #[serde(default)]
    pub matches: Vec<FinishedMatch>,
}
impl Dataset {
    pub fn validate(&self) -> Result<(), DatasetError> {
        if self.version != SCHEMA_VERSION {
            return Err(DatasetError::UnsupportedVersion(self.version));
        }
        let mut teams = FxHashSet::default();
        for team in &self.teams {
            if !teams.insert((team.team_id, team.league_season())) {
                return Err(DatasetError::DuplicateTeam {
                    team_id: team.team_id,
                    league_season: team.league_season(),
                });
            }
        }
        let mut players = FxHashSet::default();
        for player in &self.players {
            if !players.insert(player.player_id) {
                return Err(DatasetError::DuplicatePlayer(player.player_id));
            }
        }
        for fixture in &self.matches {
            if fixture.home_team == fixture.away_team {
                return Err(DatasetError::SelfMatch {
                    date: fixture.date,
                    team_id: fixture.home_team,
                });
            }
        }
        Ok(())
    }

    pub fn matches_in(&self, league_season: LeagueSeason) -> impl Iterator<Item = &FinishedMatch> {
        self.matches
            .iter()
            .filter(move |fixture| fixture.league_season() == league_season)
    }
}

/// Reads and validates a dataset from a JSON file.
pub fn read_dataset(path: impl AsRef<Path>) -> Result<Dataset, DatasetError> {
    let dataset = Dataset::read_json_file(path)?;
    dataset.validate()?;
    Ok(dataset)
}
