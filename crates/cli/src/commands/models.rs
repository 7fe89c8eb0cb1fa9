//! Model inspection commands

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use forecast_lib::{
    predictor::{Regressor, ScaledLinearRegression},
    storage::{FileModelStore, ModelMetadata, ModelStore},
    Features, SensorKey,
};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{
    format_instant, print_info, print_json, print_table, print_warning, short_checksum,
    OutputFormat,
};

/// Row for models table
#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Gateway")]
    gateway: String,
    #[tabled(rename = "Sensor")]
    sensor: String,
    #[tabled(rename = "Type")]
    sensor_type: String,
    #[tabled(rename = "Last Trained")]
    last_trained: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Checksum")]
    checksum: String,
}

/// Row for the feature vector table
#[derive(Tabled)]
struct FeatureRow {
    #[tabled(rename = "Feature")]
    name: String,
    #[tabled(rename = "Value")]
    value: f64,
}

#[derive(Serialize)]
struct ModelDetails<'a> {
    metadata: &'a ModelMetadata,
    model: String,
    last_trained_at: Option<DateTime<Utc>>,
    last_target: Option<f64>,
    last_feature_vector: &'a Features,
}

/// List every persisted model
pub fn list_models(
    store: &FileModelStore<ScaledLinearRegression>,
    zone: FixedOffset,
    format: OutputFormat,
) -> Result<()> {
    let models = store.list()?;

    match format {
        OutputFormat::Json => print_json(&models)?,
        OutputFormat::Table => {
            if models.is_empty() {
                print_warning(&format!("No models found in {}", store.root().display()));
                return Ok(());
            }

            let rows: Vec<ModelRow> = models
                .iter()
                .map(|m| ModelRow {
                    gateway: m.gateway_id.clone(),
                    sensor: m.sensor_id.clone(),
                    sensor_type: m.sensor_type.clone(),
                    last_trained: format_instant(m.last_trained_at, zone),
                    model: m.model_name.clone(),
                    checksum: short_checksum(&m.checksum),
                })
                .collect();

            print_table(rows);
            println!("\nTotal: {} models", models.len());
        }
    }

    Ok(())
}

/// Show metadata and the last feature vector of one model
pub fn show_model(
    store: &FileModelStore<ScaledLinearRegression>,
    key: &SensorKey,
    zone: FixedOffset,
    format: OutputFormat,
) -> Result<()> {
    let Some(metadata) = store.metadata(key)? else {
        anyhow::bail!("No model stored for {}", key);
    };
    let (state, last_trained_at) = store.load(key)?;
    let Some(state) = state else {
        anyhow::bail!("No model stored for {}", key);
    };

    match format {
        OutputFormat::Json => print_json(&ModelDetails {
            metadata: &metadata,
            model: state.regressor.name(),
            last_trained_at,
            last_target: state.last_target,
            last_feature_vector: &state.last_feature_vector,
        })?,
        OutputFormat::Table => {
            print_info(&format!("Sensor:       {}", key));
            print_info(&format!("Model:        {}", metadata.model_name));
            print_info(&format!("Last trained: {}", format_instant(last_trained_at, zone)));
            print_info(&format!("Checksum:     {}", metadata.checksum));
            print_info(&format!("Format:       v{}", metadata.format_version));
            if let Some(target) = state.last_target {
                print_info(&format!("Last target:  {}", target));
            }

            if state.last_feature_vector.is_empty() {
                print_warning("Model has no feature vector yet");
                return Ok(());
            }

            let rows: Vec<FeatureRow> = state
                .last_feature_vector
                .iter()
                .map(|(name, value)| FeatureRow {
                    name: name.clone(),
                    value: *value,
                })
                .collect();
            println!();
            print_table(rows);
        }
    }

    Ok(())
}
