use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use crypto_metrics::{
    commands::{
        features::{self, FeaturesArgs, NullSentinel},
        fetch,
        predict::{self, PredictInput},
    },
    config::{resolve_symbols, PipelineSettings},
    context::AppContext,
    logging::Logger,
    pipeline::BatchOptions,
    predictor::{FeatureVector, FEATURE_COUNT},
};
use std::path::PathBuf;

const DEFAULT_BAR_SNAPSHOT_FILE: &str = "data/bars.bin";
const DEFAULT_FEATURES_FILE: &str = "data/features.csv";

#[derive(Parser)]
#[command(name = "crypto-metrics")]
#[command(about = "Daily kline retrieval and lookback/lookahead feature export")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve daily bars and write a bar snapshot
    Fetch {
        /// Trading pairs to fetch (defaults to the built-in universe)
        symbols: Vec<String>,
        /// First day to retrieve (YYYY-MM-DD)
        #[arg(long = "start-date", value_name = "DATE")]
        start_date: Option<NaiveDate>,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// Fetch symbols concurrently
        #[arg(long)]
        parallel: bool,
    },
    /// Compute lookback/lookahead features and export them as CSV
    Features {
        /// Trading pairs to process (defaults to the built-in universe)
        symbols: Vec<String>,
        /// First day to include (YYYY-MM-DD)
        #[arg(long = "start-date", value_name = "DATE")]
        start_date: Option<NaiveDate>,
        /// Lookback window in days
        #[arg(long)]
        lookback: Option<usize>,
        /// Lookahead window in days
        #[arg(long)]
        lookahead: Option<usize>,
        /// Compute from a bar snapshot instead of fetching
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Destination CSV file
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// How undefined values are written
        #[arg(long = "null-sentinel", value_enum, default_value_t = NullSentinel::Zero)]
        null_sentinel: NullSentinel,
        /// Process symbols concurrently
        #[arg(long)]
        parallel: bool,
    },
    /// Predict next-window % differences from the two regression models
    Predict {
        /// Model artifact for the next-high target
        #[arg(long = "model-high", value_name = "PATH")]
        model_high: PathBuf,
        /// Model artifact for the next-low target
        #[arg(long = "model-low", value_name = "PATH")]
        model_low: PathBuf,
        /// Use the latest complete feature row of this symbol
        #[arg(long, conflicts_with = "features", required_unless_present = "features")]
        symbol: Option<String>,
        /// Explicit inputs: days since high, % diff from high, days since low, % diff from low
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        features: Option<Vec<f64>>,
        /// Lookback window in days (symbol mode)
        #[arg(long)]
        lookback: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    let logger = Logger::from_env("crypto_metrics");
    logger.info(format_args!(
        "Starting crypto-metrics. Not financial advice. Use at your own risk."
    ));
    let settings = PipelineSettings::from_env()?;

    let outcome = run(cli.command, settings, &logger);
    logger.flush();
    outcome
}

fn run(command: Commands, settings: PipelineSettings, logger: &Logger) -> Result<()> {
    match command {
        Commands::Fetch {
            symbols,
            start_date,
            output,
            parallel,
        } => {
            let settings = settings.with_overrides(start_date, None, None)?;
            let app = AppContext::initialize(settings, logger.clone());
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_BAR_SNAPSHOT_FILE));
            fetch::run(
                &app,
                &resolve_symbols(&symbols),
                batch_options(parallel),
                &output_path,
            )?;
        }
        Commands::Features {
            symbols,
            start_date,
            lookback,
            lookahead,
            data_file,
            output,
            null_sentinel,
            parallel,
        } => {
            let settings = settings.with_overrides(start_date, lookback, lookahead)?;
            let app = AppContext::initialize(settings, logger.clone());
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_FEATURES_FILE));
            let symbols = resolve_symbols(&symbols);
            features::run(
                &app,
                FeaturesArgs {
                    symbols: &symbols,
                    data_file,
                    output: &output_path,
                    sentinel: null_sentinel,
                    options: batch_options(parallel),
                },
            )?;
        }
        Commands::Predict {
            model_high,
            model_low,
            symbol,
            features,
            lookback,
        } => {
            let settings = settings.with_overrides(None, lookback, None)?;
            let app = AppContext::initialize(settings, logger.clone());
            let input = predict_input(symbol, features)?;
            let prediction = predict::run(&app, &model_high, &model_low, input)?;
            println!(
                "pct_diff_from_high_next={:.6} pct_diff_from_low_next={:.6}",
                prediction.pct_diff_from_high_next, prediction.pct_diff_from_low_next
            );
        }
    }

    Ok(())
}

fn batch_options(parallel: bool) -> BatchOptions {
    BatchOptions {
        parallel,
        show_progress: true,
    }
}

fn predict_input(symbol: Option<String>, features: Option<Vec<f64>>) -> Result<PredictInput> {
    match (symbol, features) {
        (Some(symbol), None) => {
            let normalized = crypto_metrics::config::normalize_symbol(&symbol)
                .ok_or_else(|| anyhow!("Invalid symbol '{}'", symbol))?;
            Ok(PredictInput::Symbol(normalized))
        }
        (None, Some(values)) => {
            let values: [f64; FEATURE_COUNT] = values.try_into().map_err(|values: Vec<f64>| {
                anyhow!(
                    "Expected {} feature values, got {}",
                    FEATURE_COUNT,
                    values.len()
                )
            })?;
            Ok(PredictInput::Features(FeatureVector::from_values(values)))
        }
        _ => Err(anyhow!("Pass exactly one of --symbol or --features")),
    }
}
