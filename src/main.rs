//! Footy LM command line
//!
//! Usage:
//!   footy-lm backfill                 # one season of the historical backfill
//!   footy-lm collect --year 2016      # collect a season without training
//!   footy-lm train [--experimental]   # retrain from data/processed
//!   footy-lm evaluate                 # exit 1 when any market declined
//!   footy-lm predict --date 2024-05-04
//!   footy-lm bet-builder

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use footy_lm::backfill::{BackfillController, BackfillOutcome};
use footy_lm::bet_builder::{assumed_prices, ConvergenceDetector};
use footy_lm::config::{AppConfig, LoggingConfig};
use footy_lm::error::BackfillError;
use footy_lm::ml_engine::predictor::{predict_date, prepare};
use footy_lm::ml_engine::{
    ApiFootballClient, ArtifactStore, DatasetStore, EvaluationTracker, ModelTrainer,
    MultiTargetTrainer,
};
use footy_lm::types::Market;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "footy-lm")]
#[command(about = "Football market models: backfill, training, evaluation and bet builders")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process the next season of the historical backfill
    Backfill,

    /// Collect and persist one season without training or checkpointing
    Collect {
        #[arg(long)]
        year: i32,
    },

    /// Train every market from data/processed/training_data.csv
    Train {
        /// Train the experimental markets into models/experimental
        #[arg(long)]
        experimental: bool,
    },

    /// Score production models on the validation split and update trends
    Evaluate,

    /// Score the fixtures scheduled on a day (default: today, UTC)
    Predict {
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Detect multi-market bet builders from a predictions file
    BetBuilder {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn api_client(config: &AppConfig) -> Result<ApiFootballClient> {
    let key = config
        .api_key()
        .ok_or_else(|| anyhow!("{} is not set", config.source.api_key_env))?;
    Ok(ApiFootballClient::new(&config.source, key)?)
}

fn trainer(config: &AppConfig) -> MultiTargetTrainer {
    MultiTargetTrainer::new(
        config.training.clone(),
        config.features.window,
        ArtifactStore::new(config.pipeline.models_path()),
    )
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_logging(&config.logging);
    info!(config = %config.digest(), "⚙️ Footy LM starting");

    match args.command {
        Commands::Backfill => backfill(&config).await,
        Commands::Collect { year } => collect(&config, year).await,
        Commands::Train { experimental } => train(&config, experimental),
        Commands::Evaluate => evaluate(&config),
        Commands::Predict { date } => predict(&config, date).await,
        Commands::BetBuilder { input, output } => bet_builder(&config, input, output),
    }
}

async fn backfill(config: &AppConfig) -> Result<ExitCode> {
    let mut controller = BackfillController::new(api_client(config)?, trainer(config), config);
    match controller.run_once().await {
        Ok(BackfillOutcome::Advanced { progress, report }) => {
            report.print();
            info!(next_year = progress.current_year, "✅ Backfill step finished");
            Ok(ExitCode::SUCCESS)
        }
        Ok(BackfillOutcome::Complete { current_year }) => {
            info!(current_year, "✅ Historical backfill already complete");
            Ok(ExitCode::SUCCESS)
        }
        Err(BackfillError::Training { year, failures }) => {
            for failure in &failures {
                error!(year, error = %failure, "market failed");
            }
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

async fn collect(config: &AppConfig, year: i32) -> Result<ExitCode> {
    let mut controller = BackfillController::new(api_client(config)?, trainer(config), config);
    let stats = controller.collect_only(year).await?;
    println!("\n📊 Season {} collected", stats.year);
    println!("   Fixtures:          {}", stats.total_fixtures);
    println!("   Leagues covered:   {}", stats.leagues_covered);
    println!("   Dropped:           {}", stats.dropped_incomplete);
    println!("   Failed leagues:    {}", stats.failed_leagues);
    println!("   File:              {}", stats.file);
    Ok(ExitCode::SUCCESS)
}

fn train(config: &AppConfig, experimental: bool) -> Result<ExitCode> {
    if experimental && !config.training.experimental_enabled {
        bail!("experimental training is disabled (training.experimental_enabled)");
    }
    let datasets = DatasetStore::new(config.pipeline.data_path());
    let table = datasets.load_processed(DatasetStore::TRAINING_DATA)?;
    table.summary().log();

    let mut trainer = trainer(config);
    if experimental {
        trainer = trainer.with_markets(Market::EXPERIMENTAL.to_vec());
    }
    let report = trainer.train_all(&table);
    report.print();
    Ok(if report.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn evaluate(config: &AppConfig) -> Result<ExitCode> {
    let tracker = EvaluationTracker::new(
        DatasetStore::new(config.pipeline.data_path()),
        ArtifactStore::new(config.pipeline.models_path()),
        config.pipeline.logs_path(),
        config.pipeline.outputs_path().join("analytics"),
    );
    let report = tracker.evaluate_all(Utc::now())?;
    report.print();
    if report.all_improved() {
        info!("✅ All models improved or held their first evaluation");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("⚠️ Some models declined in performance");
        Ok(ExitCode::FAILURE)
    }
}

async fn predict(config: &AppConfig, date: Option<NaiveDate>) -> Result<ExitCode> {
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let predictor = prepare(
        config.features.clone(),
        &DatasetStore::new(config.pipeline.data_path()),
        &ArtifactStore::new(config.pipeline.models_path()),
        assumed_prices(&config.bet_builder)?,
    )?;
    let client = api_client(config)?;
    let output = config.pipeline.outputs_path().join("predictions.json");
    predict_date(
        &predictor,
        &client,
        date,
        config.source.request_timeout_secs,
        &output,
        Utc::now(),
    )
    .await?;
    Ok(ExitCode::SUCCESS)
}

fn bet_builder(
    config: &AppConfig,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    let outputs = config.pipeline.outputs_path();
    let input = input.unwrap_or_else(|| outputs.join("predictions.json"));
    let output = output.unwrap_or_else(|| outputs.join("bet_builders.json"));

    let detector = ConvergenceDetector::new(config.bet_builder.clone())?;
    let result = detector.run(&input, &output, Utc::now())?;
    result.print();
    Ok(ExitCode::SUCCESS)
}
