//! Console tables for prediction and backtest reports.

use stanza::style::{HAlign, Header, MinWidth, Separator, Styles};
use stanza::table::{Cell, Col, Row, Table};
use strum::IntoEnumIterator;

use crate::backtest::{BacktestReport, MarketBacktest};
use crate::calibration::CalibrationReport;
use crate::data::{EventKind, Side};
use crate::mc::{MarketResult, ScorelineProb};
use crate::player::LikelyPlayer;
use crate::predictor::PredictionReport;

fn header(cells: &[&str]) -> Row {
    Row::new(
        Styles::default().with(Header(true)),
        cells.iter().map(|&cell| cell.into()).collect(),
    )
}

fn right(text: String) -> Cell {
    Cell::new(Styles::default().with(HAlign::Right), text.into())
}

pub fn tabulate_parameters(report: &PredictionReport) -> Table {
    let mut table = Table::default()
        .with_cols(vec![
            Col::new(Styles::default().with(MinWidth(10))),
            Col::new(Styles::default().with(MinWidth(10)).with(Separator(true))),
            Col::new(Styles::default().with(MinWidth(10))),
            Col::new(Styles::default().with(MinWidth(10))),
            Col::new(Styles::default().with(MinWidth(10))),
        ])
        .with_row(header(&["Side", "Stage", "Goals", "Cards", "Corners"]));
    for side in [Side::Home, Side::Away] {
        for (stage, params) in [("base", &report.base_params), ("adjusted", &report.params)] {
            let rates = params.side(side);
            table.push_row(Row::new(
                Styles::default(),
                vec![
                    format!("{side}").into(),
                    stage.into(),
                    right(format!("{:.3}", rates.goals)),
                    right(format!("{:.3}", rates.cards)),
                    right(format!("{:.3}", rates.corners)),
                ],
            ));
        }
    }
    table
}

pub fn tabulate_probabilities(report: &PredictionReport) -> Table {
    let mut table = Table::default()
        .with_cols(vec![
            Col::new(Styles::default().with(MinWidth(18))),
            Col::new(Styles::default().with(MinWidth(10)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(12)).with(HAlign::Right)),
        ])
        .with_row(header(&["Market", "Simulated", "Calibrated"]));
    table.push_rows(report.markets.iter().map(|probability| {
        Row::new(
            Styles::default(),
            vec![
                format!("{}", probability.market).into(),
                format!("{:.4}", probability.raw).into(),
                format!("{:.4}", probability.calibrated).into(),
            ],
        )
    }));
    table
}

pub fn tabulate_market(market: &MarketResult) -> Table {
    let mut table = Table::default()
        .with_cols(vec![
            Col::new(Styles::default().with(MinWidth(8)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(10)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(10)).with(HAlign::Right)),
        ])
        .with_row(header(&["Line", "Over", "Under"]));
    table.push_rows(market.lines.iter().map(|over_under| {
        Row::new(
            Styles::default(),
            vec![
                format!("{:.1}", over_under.line).into(),
                format!("{:.4}", over_under.over).into(),
                format!("{:.4}", over_under.under).into(),
            ],
        )
    }));
    table
}

pub fn tabulate_means(report: &PredictionReport) -> Table {
    let mut table = Table::default()
        .with_cols(vec![
            Col::new(Styles::default().with(MinWidth(10))),
            Col::new(Styles::default().with(MinWidth(8)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(8)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(8)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(12)).with(HAlign::Right)),
        ])
        .with_row(header(&["Event", "Home", "Away", "Total", "Interval"]));
    for kind in EventKind::iter() {
        let market = report.simulation.market(kind);
        table.push_row(Row::new(
            Styles::default(),
            vec![
                format!("{kind}").into(),
                format!("{:.2}", market.mean_home).into(),
                format!("{:.2}", market.mean_away).into(),
                format!("{:.2}", market.mean_total).into(),
                format!(
                    "{}-{} @ {:.0}%",
                    market.interval.lower,
                    market.interval.upper,
                    market.interval.level * 100.0
                )
                .into(),
            ],
        ));
    }
    table
}

pub fn tabulate_scorelines(scorelines: &[ScorelineProb]) -> Table {
    let mut table = Table::default()
        .with_cols(vec![
            Col::new(Styles::default().with(MinWidth(8)).with(HAlign::Centred)),
            Col::new(Styles::default().with(MinWidth(12)).with(HAlign::Right)),
        ])
        .with_row(header(&["Score", "Probability"]));
    table.push_rows(scorelines.iter().map(|scoreline| {
        Row::new(
            Styles::default(),
            vec![
                format!("{}", scoreline.score).into(),
                format!("{:.4}", scoreline.probability).into(),
            ],
        )
    }));
    table
}

pub fn tabulate_players(players: &[LikelyPlayer]) -> Table {
    let mut table = Table::default()
        .with_cols(vec![
            Col::new(Styles::default().with(MinWidth(24))),
            Col::new(Styles::default().with(MinWidth(12)).with(HAlign::Right)),
        ])
        .with_row(header(&["Player", "Probability"]));
    table.push_rows(players.iter().map(|player| {
        Row::new(
            Styles::default(),
            vec![
                player.name.clone().into(),
                format!("{:.3}", player.probability).into(),
            ],
        )
    }));
    table
}

pub fn tabulate_backtest(report: &BacktestReport) -> Table {
    let mut table = Table::default()
        .with_cols(vec![
            Col::new(Styles::default().with(MinWidth(18))),
            Col::new(Styles::default().with(MinWidth(8)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(10)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(10)).with(HAlign::Right)),
        ])
        .with_row(header(&["Market", "Samples", "Brier", "Accuracy"]));
    table.push_rows(report.markets.iter().map(|backtest| {
        Row::new(
            Styles::default(),
            vec![
                format!("{}", backtest.market).into(),
                format!("{}", backtest.samples).into(),
                format!("{:.4}", backtest.brier).into(),
                format!("{:.1}%", backtest.accuracy * 100.0).into(),
            ],
        )
    }));
    table.push_row(Row::new(
        Styles::default().with(Header(true)),
        vec![
            "overall".into(),
            "".into(),
            format!("{:.4}", report.overall_brier).into(),
            "".into(),
        ],
    ));
    table
}

pub fn tabulate_bins(backtest: &MarketBacktest) -> Table {
    let mut table = Table::default()
        .with_cols(vec![
            Col::new(Styles::default().with(MinWidth(10))),
            Col::new(Styles::default().with(MinWidth(6)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(10)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(10)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(10)).with(HAlign::Right)),
        ])
        .with_row(header(&["Bin", "N", "Expected", "Actual", "Diff"]));
    table.push_rows(backtest.bins.iter().map(|bin| {
        Row::new(
            Styles::default(),
            vec![
                bin.label().into(),
                format!("{}", bin.n).into(),
                format!("{:.3}", bin.expected).into(),
                format!("{:.3}", bin.actual).into(),
                format!("{:+.3}", bin.diff).into(),
            ],
        )
    }));
    table
}

pub fn tabulate_calibration(reports: &[CalibrationReport]) -> Table {
    let mut table = Table::default()
        .with_cols(vec![
            Col::new(Styles::default().with(MinWidth(18))),
            Col::new(Styles::default().with(MinWidth(10))),
            Col::new(Styles::default().with(MinWidth(8)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(14)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(14)).with(HAlign::Right)),
            Col::new(Styles::default().with(MinWidth(8)).with(HAlign::Right)),
        ])
        .with_row(header(&["Market", "Method", "Samples", "Brier", "ECE", "Gain"]));
    table.push_rows(reports.iter().map(|report| {
        let method = if report.applied {
            format!("{}", report.method)
        } else {
            "identity".into()
        };
        Row::new(
            Styles::default(),
            vec![
                format!("{}", report.market).into(),
                method.into(),
                format!("{}", report.samples).into(),
                format!("{:.4} ⇒ {:.4}", report.brier_before, report.brier_after).into(),
                format!("{:.4} ⇒ {:.4}", report.ece_before, report.ece_after).into(),
                format!("{:+.1}%", report.improvement_pct).into(),
            ],
        )
    }));
    table
}
