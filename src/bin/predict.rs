use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::anyhow;
use clap::Parser;
use stanza::renderer::console::Console;
use stanza::renderer::Renderer;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use scorecast::calibration::Calibrator;
use scorecast::context::{Importance, MatchContext, RefereeId};
use scorecast::data::{read_dataset, CompetitionType, LeagueSeason, PlayerId, TeamId};
use scorecast::file::ReadJsonFile;
use scorecast::lineup::Lineup;
use scorecast::mc::DEFAULT_ITERATIONS;
use scorecast::predictor::{Config, PredictionRequest, Predictor};
use scorecast::print;

#[derive(Debug, clap::Parser, Clone)]
struct Args {
    /// dataset JSON file
    dataset: PathBuf,

    /// home team id
    #[clap(long)]
    home: TeamId,

    /// away team id
    #[clap(long)]
    away: TeamId,

    /// league id
    #[clap(short = 'l', long)]
    league: u32,

    /// season
    #[clap(short = 's', long)]
    season: u16,

    /// competition format (league, knockout, group, friendly)
    #[clap(long, value_parser = parse_competition, default_value = "league")]
    competition: CompetitionType,

    /// match importance (low, normal, high, decisive)
    #[clap(long, value_parser = parse_importance, default_value = "normal")]
    importance: Importance,

    /// ranking gap; positive when the home side is ranked higher
    #[clap(long, default_value_t = 0.0, allow_negative_numbers = true)]
    ranking_gap: f64,

    /// comma-separated player ids of the home lineup
    #[clap(long, value_delimiter = ',')]
    home_lineup: Option<Vec<PlayerId>>,

    /// comma-separated player ids of the away lineup
    #[clap(long, value_delimiter = ',')]
    away_lineup: Option<Vec<PlayerId>>,

    /// confidence in the announced lineups, in [0, 1]
    #[clap(long, default_value_t = 1.0)]
    lineup_weight: f64,

    /// referee id
    #[clap(long)]
    referee: Option<RefereeId>,

    /// number of simulation iterations
    #[clap(short = 'i', long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: u64,

    /// seed for reproducible runs
    #[clap(long)]
    seed: Option<u64>,

    /// predictor configuration JSON file
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,

    /// calibration JSON file
    #[clap(long)]
    calibration: Option<PathBuf>,

    /// print the report as JSON
    #[clap(long)]
    json: bool,
}
impl Args {
    fn validate(&self) -> anyhow::Result<()> {
        if self.home == self.away {
            return Err(anyhow!("home and away teams must differ"));
        }
        if !(0.0..=1.0).contains(&self.lineup_weight) {
            return Err(anyhow!("lineup weight must be in [0, 1]"));
        }
        Ok(())
    }

    fn lineup(&self, players: &Option<Vec<PlayerId>>) -> Option<Lineup> {
        players
            .as_ref()
            .map(|players| Lineup::new(players.clone()).with_weight(self.lineup_weight))
    }
}

fn parse_competition(s: &str) -> anyhow::Result<CompetitionType> {
    let s = s.to_lowercase();
    CompetitionType::iter()
        .find(|competition| competition.to_string() == s)
        .ok_or(anyhow!("unsupported competition {s}"))
}

fn parse_importance(s: &str) -> anyhow::Result<Importance> {
    let s = s.to_lowercase();
    Importance::iter()
        .find(|importance| importance.to_string() == s)
        .ok_or(anyhow!("unsupported importance {s}"))
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

    let config = match &args.config {
        Some(path) => Config::read_json_file(path)?,
        None => Config::default(),
    };
    let dataset = read_dataset(&args.dataset)?;
    let mut predictor = Predictor::new(config, dataset)?;
    if let Some(path) = &args.calibration {
        predictor = predictor.with_calibrator(Calibrator::load(path)?);
    }

    let request = PredictionRequest {
        home: args.home,
        away: args.away,
        league_season: LeagueSeason::new(args.league, args.season),
        context: MatchContext {
            competition: args.competition,
            importance: args.importance,
            ranking_gap: args.ranking_gap,
            home_lineup: args.lineup(&args.home_lineup),
            away_lineup: args.lineup(&args.away_lineup),
            referee: args.referee,
        },
        iterations: Some(args.iterations),
        seed: args.seed,
    };

    let start_time = Instant::now();
    let report = predictor.predict(&request)?;
    let elapsed = start_time.elapsed();
    debug!("predicted in {}s", elapsed.as_millis() as f64 / 1_000.);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for warning in &report.warnings {
        warn!("{warning}");
    }
    info!(
        "{} v {} ({}), confidence {:.2}",
        report.home_name.as_deref().unwrap_or("home"),
        report.away_name.as_deref().unwrap_or("away"),
        report.league_season,
        report.confidence
    );
    info!("parameters:\n{}", Console::default().render(&print::tabulate_parameters(&report)));
    info!("probabilities:\n{}", Console::default().render(&print::tabulate_probabilities(&report)));
    info!("expected events:\n{}", Console::default().render(&print::tabulate_means(&report)));
    info!("goals:\n{}", Console::default().render(&print::tabulate_market(&report.simulation.goals)));
    info!("cards:\n{}", Console::default().render(&print::tabulate_market(&report.simulation.cards)));
    info!("corners:\n{}", Console::default().render(&print::tabulate_market(&report.simulation.corners)));
    info!(
        "scorelines:\n{}",
        Console::default().render(&print::tabulate_scorelines(&report.simulation.scorelines))
    );
    for (side, players) in [("home", &report.home_players), ("away", &report.away_players)] {
        if !players.scorers.is_empty() {
            info!("{side} scorers:\n{}", Console::default().render(&print::tabulate_players(&players.scorers)));
        }
        if !players.card_recipients.is_empty() {
            info!(
                "{side} bookings:\n{}",
                Console::default().render(&print::tabulate_players(&players.card_recipients))
            );
        }
    }
    Ok(())
}
