use clap::{Parser, Subcommand};
use item_calibration::evaluate::evaluate;
use item_calibration::loader::load_corpus;
use item_calibration::{
    CalibrationConfig, CalibrationEngine, CalibrationError, ItemQuery, RidgeTrainer, Sample, StaticDemandIndex,
};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Price rare items from a corpus of observed sales
#[derive(Parser, Debug)]
#[command(name = "item-calibration")]
#[command(version)]
struct Args {
    /// JSON-lines sale corpus
    #[arg(long, env = "CALIBRATION_CORPUS", default_value = "calibration.jsonl")]
    corpus: PathBuf,

    /// TOML engine configuration; defaults apply when absent
    #[arg(long, env = "CALIBRATION_CONFIG")]
    config: Option<PathBuf>,

    /// JSON mod-group demand scores per item class
    #[arg(long, env = "CALIBRATION_DEMAND")]
    demand: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Answer JSON queries on stdin with JSON estimates on stdout
    Serve,

    /// Hold out part of the corpus and print an accuracy report
    Evaluate {
        /// Every n-th sample is held out
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(2..))]
        holdout_stride: u64,
    },
}

fn build_engine(
    config: &CalibrationConfig,
    demand: Option<&PathBuf>,
    samples: Vec<Sample>,
) -> item_calibration::Result<CalibrationEngine> {
    let mut builder = CalibrationEngine::builder(config.clone());
    if let Some(path) = demand {
        let index = StaticDemandIndex::from_json_file(path)?;
        if index.is_empty() {
            warn!(path = %path.display(), "demand file has no entries");
        }
        builder = builder.with_demand(Arc::new(index));
    }
    builder.extend(samples)?;
    if let Err(err) = builder.train_regression(&RidgeTrainer::new(config.regression.clone())) {
        warn!(error = %err, "regression training failed, continuing without models");
    }
    Ok(builder.build())
}

fn serve(engine: &CalibrationEngine) -> item_calibration::Result<()> {
    info!(samples = engine.store().len(), "ready for queries on stdin");
    let stdin = io::stdin();
    let mut out = BufWriter::new(io::stdout().lock());
    for (idx, line) in stdin.lock().lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ItemQuery>(&line) {
            Ok(query) => {
                let json = serde_json::to_string(&engine.estimate(&query))
                    .map_err(|source| CalibrationError::Json { line: idx + 1, source })?;
                writeln!(out, "{json}")?;
            }
            Err(err) => {
                warn!(line = idx + 1, error = %err, "skipping malformed query");
                writeln!(out, "null")?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn run(args: Args) -> item_calibration::Result<()> {
    let config = match &args.config {
        Some(path) => CalibrationConfig::from_file(path)?,
        None => CalibrationConfig::default(),
    };
    let corpus = load_corpus(&args.corpus)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let engine = build_engine(&config, args.demand.as_ref(), corpus.samples)?;
            serve(&engine)
        }
        Command::Evaluate { holdout_stride } => {
            let stride = holdout_stride as usize;
            let (holdout, train): (Vec<_>, Vec<_>) = corpus
                .samples
                .into_iter()
                .enumerate()
                .partition(|(i, _)| i % stride == 0);
            let engine = build_engine(
                &config,
                args.demand.as_ref(),
                train.into_iter().map(|(_, s)| s).collect(),
            )?;
            let holdout: Vec<Sample> = holdout.into_iter().map(|(_, s)| s).collect();
            let report = evaluate(&engine, &holdout);
            let json = serde_json::to_string_pretty(&report)
                .map_err(|source| CalibrationError::Json { line: 0, source })?;
            println!("{json}");
            Ok(())
        }
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "item_calibration=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();
    if let Err(err) = run(args) {
        error!(error = %err, "item-calibration failed");
        std::process::exit(1);
    }
}
