use super::*;
use crate::data::CompetitionType;
use crate::mc::{Config, MarketModels, MonteCarloSimulator};
use crate::params::{MatchParameters, SideRates};
use assert_float_eq::*;
use chrono::NaiveDate;
use std::env;
use strum::{EnumCount, IntoEnumIterator};

/// Predictions spread over [0.1, 0.9] against outcomes that are a coin toss.
fn overconfident(n: usize) -> (Vec<f64>, Vec<bool>) {
    let predicted = (0..n)
        .map(|i| 0.1 + 0.8 * ((i * 37) % n) as f64 / (n - 1) as f64)
        .collect();
    let actual = (0..n).map(|i| i % 2 == 0).collect();
    (predicted, actual)
}

fn fixture(home_goals: u8, away_goals: u8, corners: Option<(u8, u8)>) -> FinishedMatch {
    FinishedMatch {
        date: NaiveDate::from_ymd_opt(2024, 4, 13).unwrap(),
        league: 39,
        season: 2024,
        competition: CompetitionType::League,
        home_team: 1,
        away_team: 2,
        home_goals,
        away_goals,
        home_cards: None,
        away_cards: None,
        home_corners: corners.map(|corners| corners.0),
        away_corners: corners.map(|corners| corners.1),
    }
}

#[test]
fn market_names() {
    assert_eq!("over_25_goals", Market::Over25Goals.to_string());
    assert_eq!("over_105_corners", Market::Over105Corners.to_string());
    assert_eq!("\"home_win\"", serde_json::to_string(&Market::HomeWin).unwrap());
    assert_eq!(Market::Btts, serde_json::from_str("\"btts\"").unwrap());
}

#[test]
fn market_outcomes() {
    let fixture = fixture(2, 1, Some((6, 4)));
    let settled: Vec<_> = Market::iter().map(|market| market.outcome(&fixture)).collect();
    assert_eq!(
        vec![
            Some(true),
            Some(true),
            Some(false),
            Some(true),
            Some(true),
            Some(false),
            Some(true),
            Some(false),
            Some(false)
        ],
        settled
    );
    let goalless = self::fixture(0, 0, None);
    assert_eq!(Some(false), Market::Btts.outcome(&goalless));
    assert_eq!(Some(true), Market::Draw.outcome(&goalless));
    assert_eq!(None, Market::Over95Corners.outcome(&goalless));
}

#[test]
fn market_probabilities() {
    let params = MatchParameters {
        home: SideRates {
            goals: 1.5,
            cards: 2.0,
            corners: 5.0,
        },
        away: SideRates {
            goals: 1.1,
            cards: 2.2,
            corners: 4.5,
        },
        confidence: 1.0,
    };
    let simulator = MonteCarloSimulator::try_from(Config::default().with_iterations(5_000).with_seed(1)).unwrap();
    let result = simulator.simulate(&params, &MarketModels::default());
    assert_eq!(result.goals.over(2.5).unwrap(), Market::Over25Goals.probability(&result));
    assert_eq!(result.corners.over(10.5).unwrap(), Market::Over105Corners.probability(&result));
    assert_eq!(result.btts, Market::Btts.probability(&result));
    assert_float_absolute_eq!(
        1.0,
        [Market::HomeWin, Market::Draw, Market::AwayWin]
            .iter()
            .map(|market| market.probability(&result))
            .sum::<f64>(),
        1e-9
    );
}

#[test]
fn brier() {
    assert_float_absolute_eq!(0.065, brier_score(&[0.8, 0.3], &[true, false]));
    assert_eq!(0.0, brier_score(&[1.0, 0.0], &[true, false]));
    assert_eq!(0.0, brier_score(&[], &[]));
}

#[test]
fn ece_and_reliability_curve() {
    let predicted = [0.05, 0.15, 0.95, 1.0];
    let actual = [false, false, true, true];
    let curve = reliability_curve(&predicted, &actual, ECE_BINS);
    assert_eq!(3, curve.len());
    assert_eq!(2, curve[2].samples);
    assert_float_absolute_eq!(0.9, curve[2].lower);
    assert_float_absolute_eq!(0.975, curve[2].mean_predicted);
    assert_eq!(1.0, curve[2].observed);
    assert_float_absolute_eq!(0.0625, expected_calibration_error(&predicted, &actual, ECE_BINS));
}

#[test]
fn logistic_mapping() {
    let identity = Mapping::Logistic {
        coef: 1.0,
        intercept: 0.0,
    };
    for p in [0.01, 0.3, 0.5, 0.77, 0.99] {
        assert_float_relative_eq!(p, identity.apply(p));
    }
    let shrink = Mapping::Logistic {
        coef: 0.5,
        intercept: 0.0,
    };
    assert_float_relative_eq!(0.5, shrink.apply(0.5));
    assert!(shrink.apply(0.9) < 0.9);
    assert!(shrink.apply(0.1) > 0.1);
    assert!(shrink.apply(1.0) < 1.0);
}

#[test]
fn isotonic_pools_violators() {
    let mapping = fit_isotonic(&[0.3, 0.1, 0.4, 0.2], &[false, false, true, true]);
    assert_eq!(
        Mapping::Isotonic {
            x: vec![0.1, 0.2, 0.3, 0.4],
            y: vec![0.0, 0.5, 0.5, 1.0],
        },
        mapping
    );
    assert_eq!(0.0, mapping.apply(0.05));
    assert_float_absolute_eq!(0.25, mapping.apply(0.15));
    assert_float_absolute_eq!(0.5, mapping.apply(0.25));
    assert_float_absolute_eq!(0.75, mapping.apply(0.35));
    assert_eq!(1.0, mapping.apply(0.9));
}

#[test]
fn isotonic_is_monotone() {
    let n = 600;
    let predicted: Vec<_> = (0..n)
        .map(|i| 0.05 + 0.9 * ((i * 37) % n) as f64 / (n - 1) as f64)
        .collect();
    let actual: Vec<_> = (0..n)
        .map(|i| ((i * 7919) % 1000) as f64 / 1000.0 < predicted[i].powi(2))
        .collect();
    let mapping = fit_isotonic(&predicted, &actual);
    let mut previous = 0.0;
    for step in 0..=100 {
        let calibrated = mapping.apply(step as f64 / 100.0);
        assert!((0.0..=1.0).contains(&calibrated));
        assert!(calibrated >= previous, "{calibrated} < {previous} at {step}");
        previous = calibrated;
    }
}

#[test]
fn train_logistic_on_small_sample() {
    let (predicted, actual) = overconfident(300);
    let calibrator = Calibrator::default();
    let report = calibrator.train(Market::Btts, &predicted, &actual).unwrap();
    assert_eq!(Method::Logistic, report.method);
    assert_eq!(300, report.samples);
    assert!(report.applied);
    assert!(report.brier_after < report.brier_before);
    assert!(report.improvement_pct > 10.0, "{report:?}");
    assert_float_relative_eq!(
        (report.brier_before - report.brier_after) / report.brier_before * 100.0,
        report.improvement_pct
    );

    // overconfident predictions are pulled towards the base rate
    assert!(calibrator.calibrate(Market::Btts, 0.9) < 0.6);
    assert!(calibrator.calibrate(Market::Btts, 0.1) > 0.4);
    assert_eq!(0.9, calibrator.calibrate(Market::Draw, 0.9));
    assert_eq!(
        vec![MarketStatus {
            market: Market::Btts,
            method: Method::Logistic
        }],
        calibrator.status()
    );
}

#[test]
fn train_isotonic_on_large_sample() {
    let (predicted, actual) = overconfident(800);
    let calibrator = Calibrator::default();
    let report = calibrator.train(Market::Over25Goals, &predicted, &actual).unwrap();
    assert_eq!(Method::Isotonic, report.method);
    assert!(report.applied);
    assert!(report.brier_after < report.brier_before);
    assert!(report.ece_after < report.ece_before);
}

#[test]
fn fit_that_worsens_brier_is_discarded() {
    let predicted = [0.2, 0.8, 0.99, 0.8, 0.01, 0.05, 0.2, 0.2, 0.05, 0.05];
    let actual = [false, true, true, true, false, false, false, false, false, true];
    let calibrator = Calibrator::default();
    let report = calibrator.train(Market::Over15Goals, &predicted, &actual).unwrap();
    assert!(!report.applied);
    assert_eq!(report.brier_before, report.brier_after);
    assert_eq!(0.0, report.improvement_pct);
    assert!(calibrator.status().is_empty());
    assert_eq!(0.8, calibrator.calibrate(Market::Over15Goals, 0.8));
}

#[test]
fn training_errors() {
    let calibrator = Calibrator::default();
    assert!(matches!(
        calibrator.train(Market::Draw, &[0.5; 9], &[true; 9]),
        Err(CalibrationError::InsufficientData {
            market: Market::Draw,
            samples: 9,
            required: MIN_SAMPLES
        })
    ));
    assert!(matches!(
        calibrator.train(Market::Draw, &[0.5; 12], &[true; 11]),
        Err(CalibrationError::LengthMismatch {
            predicted: 12,
            actual: 11
        })
    ));
}

#[test]
fn snapshots_are_immutable() {
    let (predicted, actual) = overconfident(100);
    let calibrator = Calibrator::default();
    let before = calibrator.snapshot();
    calibrator.train(Market::HomeWin, &predicted, &actual).unwrap();
    assert!(before.is_empty());
    assert_eq!(1, calibrator.snapshot().len());
}

#[test]
fn save_and_load() {
    let dir = env::temp_dir().join(format!("scorecast-calibration-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("calibration.json");

    let missing = Calibrator::load(dir.join("missing.json")).unwrap();
    assert!(missing.status().is_empty());

    let (predicted, actual) = overconfident(200);
    let calibrator = Calibrator::default();
    calibrator.train(Market::AwayWin, &predicted, &actual).unwrap();
    calibrator.save(&path).unwrap();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!("logistic", json["away_win"]["type"]);

    let loaded = Calibrator::load(&path).unwrap();
    assert_eq!(calibrator.snapshot(), loaded.snapshot());
    assert_eq!(
        calibrator.calibrate(Market::AwayWin, 0.7),
        loaded.calibrate(Market::AwayWin, 0.7)
    );

    fs::write(&path, "{ not json").unwrap();
    assert!(matches!(Calibrator::load(&path), Err(CalibrationError::Json(_))));
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn concurrent_training_keeps_every_market() {
    let (predicted, actual) = overconfident(300);
    for _ in 0..10 {
        let calibrator = Calibrator::default();
        let barrier = std::sync::Barrier::new(Market::COUNT);
        std::thread::scope(|scope| {
            for market in Market::iter() {
                let (calibrator, barrier) = (&calibrator, &barrier);
                let (predicted, actual) = (&predicted, &actual);
                scope.spawn(move || {
                    barrier.wait();
                    assert!(calibrator.train(market, predicted, actual).unwrap().applied);
                });
            }
        });
        assert_eq!(Market::COUNT, calibrator.status().len());
    }
}

#[test]
fn malformed_mappings_are_rejected_on_load() {
    let dir = env::temp_dir().join(format!("scorecast-malformed-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("calibration.json");

    for json in [
        r#"{"btts":{"type":"isotonic","x":[0.1,0.5,0.9],"y":[0.2]}}"#,
        r#"{"btts":{"type":"isotonic","x":[],"y":[]}}"#,
        r#"{"btts":{"type":"isotonic","x":[0.5,0.1],"y":[0.2,0.4]}}"#,
        r#"{"btts":{"type":"isotonic","x":[0.1,0.5],"y":[0.2,1.4]}}"#,
    ] {
        fs::write(&path, json).unwrap();
        assert!(
            matches!(
                Calibrator::load(&path),
                Err(CalibrationError::InvalidMapping { market: Market::Btts, .. })
            ),
            "{json}"
        );
    }

    fs::write(&path, r#"{"btts":{"type":"isotonic","x":[0.1,0.5],"y":[0.2,0.4]}}"#).unwrap();
    let loaded = Calibrator::load(&path).unwrap();
    assert_float_absolute_eq!(0.3, loaded.calibrate(Market::Btts, 0.3));
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn ragged_mapping_does_not_panic() {
    let mapping = Mapping::Isotonic {
        x: vec![0.1, 0.5, 0.9],
        y: vec![0.2],
    };
    assert!(mapping.validate().is_err());
    assert_eq!(0.2, mapping.apply(0.3));
}
