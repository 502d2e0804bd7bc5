//! Testing helpers.

use chrono::NaiveDate;

use crate::data::{
    CompetitionType, Dataset, FinishedMatch, LeagueSeason, PlayerId, PlayerStats, Position, TeamId, TeamStats,
    SCHEMA_VERSION,
};

/// Asserts that `actual` lies within `tolerance` of `expected`, reporting `what` on failure.
pub fn assert_within(expected: f64, actual: f64, tolerance: f64, what: &str) {
    assert!(
        (expected - actual).abs() <= tolerance,
        "{what}: expected {expected} ± {tolerance}, got {actual}"
    );
}

pub const SAMPLE_LEAGUE: LeagueSeason = LeagueSeason {
    league: 71,
    season: 2024,
};

fn team(team_id: TeamId, name: &str, games: u32, goals: (u32, u32), conceded: (u32, u32), corners: Option<(u32, u32)>) -> TeamStats {
    TeamStats {
        team_id,
        name: name.into(),
        league: SAMPLE_LEAGUE.league,
        season: SAMPLE_LEAGUE.season,
        games_home: games,
        games_away: games,
        goals_scored_home: goals.0,
        goals_scored_away: goals.1,
        goals_conceded_home: conceded.0,
        goals_conceded_away: conceded.1,
        cards_home: Some(games * 2),
        cards_away: Some(games * 2 + games / 2),
        cards_provoked_home: Some(games * 2 + games / 2),
        cards_provoked_away: Some(games * 2),
        corners_home: corners.map(|corners| corners.0),
        corners_away: corners.map(|corners| corners.1),
        corners_conceded_home: corners.map(|corners| corners.1),
        corners_conceded_away: corners.map(|corners| corners.0),
    }
}

pub fn sample_player(player_id: PlayerId, team_id: TeamId, position: Position) -> PlayerStats {
    let attacking = matches!(position, Position::Forward | Position::Midfielder);
    PlayerStats {
        player_id,
        team_id,
        name: format!("Player {player_id}"),
        position,
        minutes: 1_800,
        appearances: 20,
        goals: if attacking { (player_id % 7) as u32 + 2 } else { 0 },
        xg: if attacking { (player_id % 5) as f64 + 1.5 } else { 0.3 },
        shots: if attacking { 30 } else { 5 },
        key_passes: if attacking { 20 } else { 8 },
        set_piece_deliveries: (player_id % 4) as u32 * 10,
        tackles: if attacking { 10 } else { 40 },
        interceptions: if attacking { 5 } else { 30 },
        fouls: 15 + (player_id % 3) as u32 * 5,
        yellow_cards: (player_id % 4) as u32,
        red_cards: 0,
    }
}

const FORMATION: [Position; 11] = [
    Position::Goalkeeper,
    Position::CentreBack,
    Position::CentreBack,
    Position::FullBack,
    Position::FullBack,
    Position::DefensiveMidfielder,
    Position::Midfielder,
    Position::Midfielder,
    Position::Forward,
    Position::Forward,
    Position::Forward,
];

/// Player identifiers of a team's eleven in the sample dataset.
pub fn sample_eleven(team_id: TeamId) -> Vec<PlayerId> {
    (1..=11).map(|slot| team_id * 100 + slot).collect()
}

#[allow(clippy::type_complexity)]
const SAMPLE_MATCHES: [(u32, TeamId, TeamId, u8, u8, Option<(u8, u8)>); 12] = [
    (3, 1, 2, 2, 1, Some((6, 4))),
    (3, 3, 4, 0, 0, Some((5, 5))),
    (10, 2, 3, 1, 1, Some((7, 3))),
    (10, 4, 1, 0, 3, None),
    (17, 1, 3, 4, 0, Some((8, 2))),
    (17, 2, 4, 2, 2, Some((6, 6))),
    (24, 3, 1, 1, 2, Some((3, 7))),
    (24, 4, 2, 1, 0, Some((4, 5))),
    (31, 1, 4, 3, 1, Some((9, 3))),
    (31, 3, 2, 0, 1, Some((4, 6))),
    (38, 2, 1, 1, 1, Some((5, 5))),
    (38, 4, 3, 2, 2, None),
];

/// A small, internally consistent league of four teams, two of which have a full squad.
pub fn sample_dataset() -> Dataset {
    let teams = vec![
        team(1, "Leaders", 6, (16, 11), (4, 6), Some((42, 33))),
        team(2, "Midtable", 6, (9, 7), (7, 9), Some((34, 28))),
        team(3, "Strugglers", 6, (4, 3), (12, 14), Some((26, 22))),
        team(4, "Promoted", 3, (4, 2), (5, 6), None),
    ];
    let players = [1, 2]
        .into_iter()
        .flat_map(|team_id| {
            FORMATION
                .iter()
                .zip(sample_eleven(team_id))
                .map(move |(&position, player_id)| sample_player(player_id, team_id, position))
        })
        .collect();
    let matches = SAMPLE_MATCHES
        .iter()
        .map(|&(day, home_team, away_team, home_goals, away_goals, corners)| FinishedMatch {
            date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap() + chrono::Days::new(day as u64),
            league: SAMPLE_LEAGUE.league,
            season: SAMPLE_LEAGUE.season,
            competition: CompetitionType::League,
            home_team,
            away_team,
            home_goals,
            away_goals,
            home_cards: Some(2 + day as u8 % 3),
            away_cards: Some(2 + (day as u8 + 1) % 3),
            home_corners: corners.map(|corners| corners.0),
            away_corners: corners.map(|corners| corners.1),
        })
        .collect();
    Dataset {
        version: SCHEMA_VERSION,
        teams,
        players,
        matches,
    }
}
