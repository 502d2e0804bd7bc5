use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::anyhow;
use clap::Parser;
use stanza::renderer::console::Console;
use stanza::renderer::Renderer;
use tracing::{debug, info};

use scorecast::backtest::{summarise, train_calibrator, BacktestEngine};
use scorecast::calibration::Calibrator;
use scorecast::data::read_dataset;
use scorecast::file::ReadJsonFile;
use scorecast::mc::DEFAULT_ITERATIONS;
use scorecast::predictor::{Config, Predictor};
use scorecast::print;

#[derive(Debug, clap::Parser, Clone)]
struct Args {
    /// dataset JSON file
    dataset: PathBuf,

    /// only replay matches of this league
    #[clap(short = 'l', long)]
    league: Option<u32>,

    /// only replay matches of this season (requires --league)
    #[clap(short = 's', long)]
    season: Option<u16>,

    /// number of simulation iterations per match
    #[clap(short = 'i', long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: u64,

    /// seed for reproducible runs
    #[clap(long)]
    seed: Option<u64>,

    /// predictor configuration JSON file
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,

    /// train the calibrator on the replayed pairs and save it to this file
    #[clap(long)]
    train: Option<PathBuf>,

    /// print a probability-bin breakdown per market
    #[clap(long)]
    bins: bool,
}
impl Args {
    fn validate(&self) -> anyhow::Result<()> {
        if self.season.is_some() && self.league.is_none() {
            return Err(anyhow!("a season filter requires a league"));
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    if env::var("RUST_BACKTRACE").is_err() {
        env::set_var("RUST_BACKTRACE", "full")
    }
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info")
    }
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    args.validate()?;
    debug!("args: {args:?}");

    let mut config = match &args.config {
        Some(path) => Config::read_json_file(path)?,
        None => Config::default(),
    };
    config.simulation.iterations = args.iterations;
    if args.seed.is_some() {
        config.simulation.seed = args.seed;
    }
    let predictor = Predictor::new(config, read_dataset(&args.dataset)?)?;

    let matches: Vec<_> = predictor
        .matches()
        .iter()
        .filter(|fixture| {
            args.league.map_or(true, |league| fixture.league == league)
                && args.season.map_or(true, |season| fixture.season == season)
        })
        .collect();
    let summary = summarise(matches.iter().copied());
    info!(
        "replaying {} matches from {} to {}: {:.2} goals, over 2.5 {:.1}%, BTTS {:.1}%",
        summary.matches,
        summary.first.map(|date| date.to_string()).unwrap_or_default(),
        summary.last.map(|date| date.to_string()).unwrap_or_default(),
        summary.mean_goals,
        summary.over_25_rate * 100.0,
        summary.btts_rate * 100.0
    );

    let start_time = Instant::now();
    let report = BacktestEngine::new(&predictor).run(matches.iter().copied())?;
    let elapsed = start_time.elapsed();
    info!(
        "replayed {} matches ({} skipped) in {}s",
        report.matches,
        report.skipped,
        elapsed.as_millis() as f64 / 1_000.
    );
    info!("backtest:\n{}", Console::default().render(&print::tabulate_backtest(&report)));
    if args.bins {
        for backtest in &report.markets {
            info!(
                "{} bins:\n{}",
                backtest.market,
                Console::default().render(&print::tabulate_bins(backtest))
            );
        }
    }

    if let Some(path) = &args.train {
        let calibrator = Calibrator::default();
        let trained = train_calibrator(&report, &calibrator)?;
        info!("calibration:\n{}", Console::default().render(&print::tabulate_calibration(&trained)));
        calibrator.save(path)?;
        info!("saved calibration for {} markets to {}", calibrator.status().len(), path.display());
    }
    Ok(())
}
