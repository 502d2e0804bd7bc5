use super::*;
use crate::context::{Importance, MatchContext};
use crate::data::CompetitionType;
use crate::mc;
use crate::predictor;
use crate::testing::{sample_dataset, SAMPLE_LEAGUE};
use assert_float_eq::*;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Ten matches at each of five probabilities, with outcomes in exact proportion.
fn well_calibrated() -> Vec<Pair> {
    [0.1, 0.3, 0.5, 0.7, 0.9]
        .into_iter()
        .flat_map(|p| (0..10).map(move |i| (p, (i as f64) < p * 10.0)))
        .collect()
}

fn predictor() -> Predictor {
    let config = predictor::Config {
        simulation: mc::Config::default().with_iterations(2_000).with_seed(3),
        ..predictor::Config::default()
    };
    Predictor::new(config, sample_dataset()).unwrap()
}

#[test]
fn well_calibrated_brier_matches_expectation() {
    let pairs = well_calibrated();
    assert_eq!(50, pairs.len());
    let expected = pairs.iter().map(|(p, _)| p * (1.0 - p)).sum::<f64>() / pairs.len() as f64;
    let report = evaluate(BTreeMap::from([(Market::Over25Goals, pairs)]));

    let backtest = report.market(Market::Over25Goals).unwrap();
    assert_eq!(50, backtest.samples);
    assert_float_absolute_eq!(expected, backtest.brier);
    assert_float_absolute_eq!(0.17, backtest.brier);
    assert_float_absolute_eq!(0.74, backtest.accuracy);
    assert_eq!(report.overall_brier, backtest.brier);

    assert_eq!(5, backtest.bins.len());
    for bin in &backtest.bins {
        assert_eq!(10, bin.n);
        assert_float_absolute_eq!(0.0, bin.diff);
    }
    assert_eq!("40-60%", backtest.bins[2].label());
}

#[test]
fn bins_and_markets() {
    let pairs = BTreeMap::from([
        (Market::HomeWin, vec![(1.0, true), (0.85, false), (0.05, false)]),
        (Market::Draw, vec![]),
    ]);
    let report = evaluate(pairs);
    assert_eq!(1, report.markets.len());
    let backtest = &report.markets[0];
    assert_eq!(2, backtest.bins.len());
    let top = &backtest.bins[1];
    assert_eq!((0.8, 1.0, 2), (top.lower, top.upper, top.n));
    assert_float_absolute_eq!(0.925, top.expected);
    assert_float_absolute_eq!(0.5, top.actual);
    assert_float_absolute_eq!(-0.425, top.diff);
    assert_float_absolute_eq!((0.85 * 0.85 + 0.05 * 0.05) / 3.0, report.overall_brier);
}

#[test]
fn replays_the_season() {
    let predictor = predictor();
    let mut matches = predictor.matches().to_vec();
    let mut stranger = matches[0].clone();
    stranger.away_team = 99;
    matches.push(stranger);

    let report = BacktestEngine::new(&predictor).run(&matches).unwrap();
    assert_eq!(12, report.matches);
    assert_eq!(1, report.skipped);
    assert_eq!(Market::iter().count(), report.markets.len());
    assert_eq!(12, report.market(Market::Btts).unwrap().samples);
    assert_eq!(10, report.market(Market::Over95Corners).unwrap().samples);
    for backtest in &report.markets {
        assert!((0.0..=1.0).contains(&backtest.brier));
        assert_eq!(backtest.samples, backtest.bins.iter().map(|bin| bin.n).sum::<usize>());
    }
}

#[test]
fn replays_without_context() {
    let predictor = predictor();
    let mut fixture = predictor.matches()[0].clone();
    fixture.competition = CompetitionType::Knockout;

    let request = BacktestEngine::new(&predictor).request(&fixture);
    assert_eq!(MatchContext::default(), request.context);
    let report = predictor.predict(&request).unwrap();
    assert_eq!(report.base_params, report.params);
}

#[test]
fn fixtures_draw_from_distinct_streams() {
    let predictor = predictor();
    let engine = BacktestEngine::new(&predictor);
    let seeds: BTreeSet<_> = predictor
        .matches()
        .iter()
        .enumerate()
        .map(|(index, fixture)| engine.seeded_request(index, fixture).seed.unwrap())
        .collect();
    assert_eq!(predictor.matches().len(), seeds.len());
    assert!(seeds.contains(&3));

    let first = engine.run(predictor.matches()).unwrap();
    assert_eq!(first, engine.run(predictor.matches()).unwrap());
}

struct CupTies {
    calls: AtomicUsize,
}
impl Adjustments for CupTies {
    fn adjust(&self, _: &FinishedMatch, request: &mut PredictionRequest) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        request.context.competition = CompetitionType::Knockout;
        request.context.importance = Importance::Decisive;
    }
}

#[test]
fn adjustments_hook() {
    let predictor = predictor();
    let cup_ties = CupTies {
        calls: AtomicUsize::new(0),
    };
    let engine = BacktestEngine::new(&predictor).with_adjustments(&cup_ties);
    let fixture = &predictor.matches()[0];
    assert_eq!(CompetitionType::Knockout, engine.request(fixture).context.competition);

    engine.run(predictor.matches()).unwrap();
    assert_eq!(13, cup_ties.calls.load(Ordering::Relaxed));
}

#[test]
fn trains_markets_with_enough_samples() {
    let predicted: Vec<_> = (0..30).map(|i| 0.1 + 0.8 * ((i * 7) % 30) as f64 / 29.0).collect();
    let btts = predicted.iter().enumerate().map(|(i, &p)| (p, i % 2 == 0)).collect();
    let report = evaluate(BTreeMap::from([
        (Market::Btts, btts),
        (Market::Draw, well_calibrated().into_iter().take(19).collect()),
    ]));
    let calibrator = Calibrator::default();
    let trained = train_calibrator(&report, &calibrator).unwrap();
    assert_eq!(1, trained.len());
    assert_eq!(Market::Btts, trained[0].market);
    assert_eq!(30, trained[0].samples);
    let status: Vec<_> = calibrator.status().iter().map(|status| status.market).collect();
    assert_eq!(vec![Market::Btts], status);
}

#[test]
fn summary() {
    let dataset = sample_dataset();
    let summary = summarise(dataset.matches_in(SAMPLE_LEAGUE));
    assert_eq!(12, summary.matches);
    assert_eq!(NaiveDate::from_ymd_opt(2024, 4, 4), summary.first);
    assert_eq!(NaiveDate::from_ymd_opt(2024, 5, 9), summary.last);
    assert_float_absolute_eq!(31.0 / 12.0, summary.mean_goals);
    assert_float_absolute_eq!(10.3, summary.mean_corners.unwrap());
    assert_float_absolute_eq!(7.0 / 12.0, summary.over_25_rate);
    assert_float_absolute_eq!(7.0 / 12.0, summary.btts_rate);

    assert_eq!(MatchSummary::default(), summarise(&[]));
}
