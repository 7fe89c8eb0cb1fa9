//! Sensor Forecast CLI
//!
//! Inspects persisted per-sensor models and runs forecasts against them
//! locally, without touching the registry, the database or the sink.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{forecast, models};
use forecast_lib::{
    predictor::{parse_utc_offset, ScaledLinearRegression, DEFAULT_HORIZON_DAYS},
    storage::FileModelStore,
    SensorKey,
};
use std::path::PathBuf;

/// Sensor Forecast CLI
#[derive(Parser)]
#[command(name = "sfp")]
#[command(author, version, about = "CLI for the Sensor Forecast engine", long_about = None)]
pub struct Cli {
    /// Model directory (can also be set via SFP_MODEL_DIR env var)
    #[arg(long, env = "SFP_MODEL_DIR", default_value = "./models")]
    pub model_dir: PathBuf,

    /// UTC offset for calendar features and printed times
    #[arg(long, default_value = "+09:00", allow_hyphen_values = true)]
    pub utc_offset: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect persisted models
    #[command(subcommand)]
    Models(ModelsCommands),

    /// Forecast a sensor from its persisted model
    Forecast {
        #[command(flatten)]
        sensor: SensorArgs,

        /// Horizon in days (24 hourly points per day)
        #[arg(long, default_value_t = DEFAULT_HORIZON_DAYS)]
        days: u32,

        /// First forecast instant (RFC 3339, or local time without offset);
        /// defaults to the next whole hour
        #[arg(long)]
        start: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ModelsCommands {
    /// List every persisted model
    List,

    /// Show metadata and the last feature vector of one model
    Show {
        #[command(flatten)]
        sensor: SensorArgs,
    },
}

#[derive(clap::Args)]
pub struct SensorArgs {
    /// Gateway ID
    pub gateway: String,
    /// Sensor ID
    pub sensor: String,
    /// Sensor type (measurement field)
    pub sensor_type: String,
}

impl SensorArgs {
    fn key(&self) -> SensorKey {
        SensorKey::new(&self.gateway, &self.sensor, &self.sensor_type)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let zone = parse_utc_offset(&cli.utc_offset)?;
    let store = FileModelStore::<ScaledLinearRegression>::open(&cli.model_dir)?;

    match cli.command {
        Commands::Models(models_cmd) => match models_cmd {
            ModelsCommands::List => {
                models::list_models(&store, zone, cli.format)?;
            }
            ModelsCommands::Show { sensor } => {
                models::show_model(&store, &sensor.key(), zone, cli.format)?;
            }
        },
        Commands::Forecast {
            sensor,
            days,
            start,
        } => {
            forecast::run_forecast(
                &store,
                &sensor.key(),
                zone,
                days,
                start.as_deref(),
                cli.format,
            )?;
        }
    }

    Ok(())
}
