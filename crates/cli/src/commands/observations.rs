//! Signal observation CLI command

use anyhow::Result;
use tabled::Tabled;

use crate::client::{AgentClient, ObservationRecord};
use crate::output::{format_timestamp, print_table, print_warning, OutputFormat};

/// Row for the observations table
#[derive(Tabled, serde::Serialize)]
struct ObservationRow {
    #[tabled(rename = "Signal")]
    signal: String,
    #[tabled(rename = "Available")]
    available: String,
    #[tabled(rename = "Capacity")]
    capacity: String,
    #[tabled(rename = "Observed At")]
    observed_at: String,
}

/// Show the last synchronized signal observations
pub async fn show_observations(client: &AgentClient, format: OutputFormat) -> Result<()> {
    let observations: Vec<ObservationRecord> = client.get("/observations").await?;

    if observations.is_empty() {
        print_warning("No observations yet; the agent may not have completed a sync");
        return Ok(());
    }

    let rows: Vec<ObservationRow> = observations
        .iter()
        .map(|o| ObservationRow {
            signal: o.signal.clone(),
            available: o.available.clone(),
            capacity: o.capacity.clone().unwrap_or_else(|| "-".to_string()),
            observed_at: o
                .time
                .as_deref()
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    print_table(&rows, format);
    Ok(())
}
