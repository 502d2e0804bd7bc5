//! League-level baseline rates and overdispersion diagnostics.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::debug;

use crate::data::{EventKind, FinishedMatch, LeagueSeason};
use crate::dist::{Family, MarketModel};
use crate::probs::SliceExt;
use crate::warning::Warning;

pub const DEFAULT_GOALS_HOME: f64 = 1.45;
pub const DEFAULT_GOALS_AWAY: f64 = 1.05;
pub const DEFAULT_CARDS_HOME: f64 = 2.1;
pub const DEFAULT_CARDS_AWAY: f64 = 2.4;
pub const DEFAULT_CORNERS_HOME: f64 = 5.2;
pub const DEFAULT_CORNERS_AWAY: f64 = 4.3;

/// Default number of most recent matches used for dispersion diagnostics.
pub const DEFAULT_WINDOW: usize = 100;

/// Baseline for one market: per-side means and the variance of the match total.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketAnchor {
    pub home: f64,
    pub away: f64,
    pub total_variance: f64,
    pub samples: usize,
}
impl MarketAnchor {
    fn fallback(home: f64, away: f64) -> Self {
        Self {
            home,
            away,
            total_variance: home + away,
            samples: 0,
        }
    }

    fn from_observations(home: &[f64], away: &[f64], totals: &[f64]) -> Self {
        Self {
            home: home.mean(),
            away: away.mean(),
            total_variance: totals.variance(),
            samples: totals.len(),
        }
    }

    pub fn total(&self) -> f64 {
        self.home + self.away
    }

    pub fn is_default(&self) -> bool {
        self.samples == 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeagueAnchors {
    pub league_season: LeagueSeason,
    pub goals: MarketAnchor,
    pub cards: MarketAnchor,
    pub corners: MarketAnchor,
    /// Number of finished matches aggregated; zero when the historical defaults are in use.
    pub sample_size: usize,
}
impl LeagueAnchors {
    pub fn defaults(league_season: LeagueSeason) -> Self {
        Self {
            league_season,
            goals: MarketAnchor::fallback(DEFAULT_GOALS_HOME, DEFAULT_GOALS_AWAY),
            cards: MarketAnchor::fallback(DEFAULT_CARDS_HOME, DEFAULT_CARDS_AWAY),
            corners: MarketAnchor::fallback(DEFAULT_CORNERS_HOME, DEFAULT_CORNERS_AWAY),
            sample_size: 0,
        }
    }

    pub fn market(&self, kind: EventKind) -> &MarketAnchor {
        match kind {
            EventKind::Goals => &self.goals,
            EventKind::Cards => &self.cards,
            EventKind::Corners => &self.corners,
        }
    }

    pub fn warnings(&self) -> Vec<Warning> {
        EventKind::iter()
            .filter(|&kind| self.market(kind).is_default())
            .map(|market| Warning::DefaultAnchors {
                league_season: self.league_season,
                market,
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct Observations {
    home: Vec<f64>,
    away: Vec<f64>,
    totals: Vec<f64>,
}
impl Observations {
    fn push(&mut self, home: Option<u8>, away: Option<u8>) {
        if let (Some(home), Some(away)) = (home, away) {
            self.home.push(home as f64);
            self.away.push(away as f64);
            self.totals.push(home as f64 + away as f64);
        }
    }

    fn totals(&self) -> &[f64] {
        &self.totals
    }
}

fn observe<'a>(
    kind: EventKind,
    matches: impl IntoIterator<Item = &'a FinishedMatch>,
) -> Observations {
    let mut observations = Observations::default();
    for fixture in matches {
        match kind {
            EventKind::Goals => {
                observations.push(Some(fixture.home_goals), Some(fixture.away_goals))
            }
            EventKind::Cards => observations.push(fixture.home_cards, fixture.away_cards),
            EventKind::Corners => observations.push(fixture.home_corners, fixture.away_corners),
        }
    }
    observations
}

/// Aggregates finished matches of the given league and season into baseline rates. Markets
/// without any reporting match keep their historical defaults.
pub fn calculate_averages<'a>(
    league_season: LeagueSeason,
    matches: impl IntoIterator<Item = &'a FinishedMatch>,
) -> LeagueAnchors {
    let matches: Vec<_> = matches
        .into_iter()
        .filter(|fixture| fixture.league_season() == league_season)
        .collect();

    let mut anchors = LeagueAnchors::defaults(league_season);
    if matches.is_empty() {
        debug!("no finished matches in {league_season}; using default anchors");
        return anchors;
    }

    for kind in EventKind::iter() {
        let observations = observe(kind, matches.iter().copied());
        if observations.totals.is_empty() {
            continue;
        }
        let anchor = MarketAnchor::from_observations(
            &observations.home,
            &observations.away,
            observations.totals(),
        );
        match kind {
            EventKind::Goals => anchors.goals = anchor,
            EventKind::Cards => anchors.cards = anchor,
            EventKind::Corners => anchors.corners = anchor,
        }
    }
    anchors.sample_size = matches.len();
    debug!(
        "anchors for {league_season} from {} matches: goals {:.3}/{:.3}, cards {:.3}/{:.3}, corners {:.3}/{:.3}",
        anchors.sample_size,
        anchors.goals.home,
        anchors.goals.away,
        anchors.cards.home,
        anchors.cards.away,
        anchors.corners.home,
        anchors.corners.away
    );
    anchors
}

/// Dispersion index above which a market is modelled as Negative-Binomial.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverdispersionThresholds {
    pub goals: f64,
    pub cards: f64,
    pub corners: f64,
}
impl OverdispersionThresholds {
    pub fn get(&self, kind: EventKind) -> f64 {
        match kind {
            EventKind::Goals => self.goals,
            EventKind::Cards => self.cards,
            EventKind::Corners => self.corners,
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for kind in EventKind::iter() {
            let threshold = self.get(kind);
            if !threshold.is_finite() || threshold < 1.0 {
                bail!("{kind} overdispersion threshold must be at least 1.0");
            }
        }
        Ok(())
    }
}

impl Default for OverdispersionThresholds {
    fn default() -> Self {
        Self {
            goals: 1.4,
            cards: 1.2,
            corners: 1.3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dispersion {
    pub market: EventKind,
    pub samples: usize,
    pub mean: f64,
    pub variance: f64,
    /// `variance / mean`; 1.0 when fewer than two observations exist.
    pub index: f64,
    pub threshold: f64,
    pub model: MarketModel,
}
impl Dispersion {
    pub fn recommended(&self) -> Family {
        self.model.family
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverdispersionReport {
    pub league_season: LeagueSeason,
    pub window: usize,
    pub goals: Dispersion,
    pub cards: Dispersion,
    pub corners: Dispersion,
}
impl OverdispersionReport {
    pub fn market(&self, kind: EventKind) -> &Dispersion {
        match kind {
            EventKind::Goals => &self.goals,
            EventKind::Cards => &self.cards,
            EventKind::Corners => &self.corners,
        }
    }
}

fn diagnose(kind: EventKind, totals: &[f64], threshold: f64) -> Dispersion {
    if totals.len() < 2 {
        return Dispersion {
            market: kind,
            samples: totals.len(),
            mean: totals.mean(),
            variance: totals.mean(),
            index: 1.0,
            threshold,
            model: MarketModel::poisson(),
        };
    }
    let (mean, variance) = (totals.mean(), totals.variance());
    let index = if mean > 0.0 { variance / mean } else { 1.0 };
    Dispersion {
        market: kind,
        samples: totals.len(),
        mean,
        variance,
        index,
        threshold,
        model: MarketModel::from_moments(mean, variance, threshold),
    }
}

/// Computes the dispersion index of each market's match total over the `window` most recent
/// matches of the league and season, and recommends a count distribution per market.
pub fn get_overdispersion_by_market<'a>(
    league_season: LeagueSeason,
    matches: impl IntoIterator<Item = &'a FinishedMatch>,
    window: usize,
    thresholds: &OverdispersionThresholds,
) -> OverdispersionReport {
    let mut recent: Vec<_> = matches
        .into_iter()
        .filter(|fixture| fixture.league_season() == league_season)
        .collect();
    recent.sort_by(|a, b| b.date.cmp(&a.date));
    recent.truncate(window);

    let diagnose_market = |kind: EventKind| {
        let observations = observe(kind, recent.iter().copied());
        let dispersion = diagnose(kind, observations.totals(), thresholds.get(kind));
        debug!(
            "{kind} dispersion in {league_season}: index {:.3} over {} matches, threshold {:.2} ⇒ {}",
            dispersion.index,
            dispersion.samples,
            dispersion.threshold,
            dispersion.recommended()
        );
        dispersion
    };
    OverdispersionReport {
        league_season,
        window,
        goals: diagnose_market(EventKind::Goals),
        cards: diagnose_market(EventKind::Cards),
        corners: diagnose_market(EventKind::Corners),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CompetitionType;
    use assert_float_eq::*;
    use chrono::NaiveDate;

    const LS: LeagueSeason = LeagueSeason {
        league: 71,
        season: 2024,
    };

    fn fixture(day: u32, goals: (u8, u8), cards: Option<(u8, u8)>, corners: Option<(u8, u8)>) -> FinishedMatch {
        FinishedMatch {
            date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            league: LS.league,
            season: LS.season,
            competition: CompetitionType::League,
            home_team: 1,
            away_team: 2,
            home_goals: goals.0,
            away_goals: goals.1,
            home_cards: cards.map(|cards| cards.0),
            away_cards: cards.map(|cards| cards.1),
            home_corners: corners.map(|corners| corners.0),
            away_corners: corners.map(|corners| corners.1),
        }
    }

    #[test]
    fn defaults_on_empty() {
        let anchors = calculate_averages(LS, std::iter::empty::<&FinishedMatch>());
        assert_eq!(0, anchors.sample_size);
        assert_eq!(DEFAULT_GOALS_HOME, anchors.goals.home);
        assert_eq!(DEFAULT_GOALS_AWAY, anchors.goals.away);
        assert_eq!(DEFAULT_CARDS_HOME, anchors.cards.home);
        assert_eq!(DEFAULT_CORNERS_AWAY, anchors.corners.away);
        assert_eq!(3, anchors.warnings().len());
    }

    #[test]
    fn averages() {
        let matches = [
            fixture(1, (2, 1), Some((2, 3)), Some((6, 4))),
            fixture(2, (1, 1), None, Some((4, 2))),
            fixture(3, (0, 2), Some((1, 3)), None),
            fixture(4, (3, 0), None, None),
        ];
        let anchors = calculate_averages(LS, &matches);
        assert_eq!(4, anchors.sample_size);
        assert_float_absolute_eq!(1.5, anchors.goals.home);
        assert_float_absolute_eq!(1.0, anchors.goals.away);
        assert_float_absolute_eq!(1.5, anchors.cards.home);
        assert_float_absolute_eq!(3.0, anchors.cards.away);
        assert_eq!(2, anchors.cards.samples);
        assert_float_absolute_eq!(5.0, anchors.corners.home);
        assert_float_absolute_eq!(3.0, anchors.corners.away);
        assert!(anchors.warnings().is_empty());
    }

    #[test]
    fn markets_without_data_keep_defaults() {
        let matches = [fixture(1, (2, 1), None, None)];
        let anchors = calculate_averages(LS, &matches);
        assert_eq!(1, anchors.sample_size);
        assert_eq!(DEFAULT_CARDS_HOME, anchors.cards.home);
        assert_eq!(
            vec![
                Warning::DefaultAnchors { league_season: LS, market: EventKind::Cards },
                Warning::DefaultAnchors { league_season: LS, market: EventKind::Corners }
            ],
            anchors.warnings()
        );
    }

    #[test]
    fn other_leagues_are_ignored() {
        let mut other = fixture(1, (5, 5), None, None);
        other.league = 39;
        let anchors = calculate_averages(LS, &[other]);
        assert_eq!(0, anchors.sample_size);
    }

    #[test]
    fn overdispersion_recommendation() {
        // goal totals 0, 6, 0, 6: mean 3, variance 12 ⇒ index 4
        // card totals 4, 4, 4, 4: index 0
        let matches = [
            fixture(1, (0, 0), Some((2, 2)), Some((5, 4))),
            fixture(2, (3, 3), Some((2, 2)), Some((5, 4))),
            fixture(3, (0, 0), Some((2, 2)), Some((5, 4))),
            fixture(4, (3, 3), Some((2, 2)), Some((5, 4))),
        ];
        let report = get_overdispersion_by_market(LS, &matches, 10, &OverdispersionThresholds::default());
        assert_float_absolute_eq!(4.0, report.goals.index);
        assert_eq!(Family::NegativeBinomial, report.goals.recommended());
        assert_float_absolute_eq!((12.0 - 3.0) / 9.0, report.goals.model.alpha);
        assert_eq!(Family::Poisson, report.cards.recommended());
        assert_eq!(Family::Poisson, report.corners.recommended());
    }

    #[test]
    fn overdispersion_window_takes_most_recent() {
        let matches = [
            fixture(1, (0, 0), None, None),
            fixture(2, (6, 6), None, None),
            fixture(20, (1, 1), None, None),
            fixture(21, (1, 2), None, None),
            fixture(22, (2, 1), None, None),
        ];
        let report = get_overdispersion_by_market(LS, &matches, 3, &OverdispersionThresholds::default());
        assert_eq!(3, report.goals.samples);
        assert_float_absolute_eq!(8.0 / 3.0, report.goals.mean);
        assert_eq!(Family::Poisson, report.goals.recommended());
    }

    #[test]
    fn overdispersion_without_observations() {
        let report = get_overdispersion_by_market(LS, std::iter::empty::<&FinishedMatch>(), DEFAULT_WINDOW, &OverdispersionThresholds::default());
        assert_eq!(1.0, report.corners.index);
        assert_eq!(Family::Poisson, report.corners.recommended());
    }

    #[test]
    fn thresholds_validation() {
        assert!(OverdispersionThresholds::default().validate().is_ok());
        let thresholds = OverdispersionThresholds {
            cards: 0.5,
            ..Default::default()
        };
        assert!(thresholds.validate().is_err());
    }
}
