//! Agent health CLI command

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{AgentClient, HealthResponse};
use crate::output::{color_status, print_table, OutputFormat};

/// Row for the probe health table
#[derive(Tabled, serde::Serialize)]
struct ProbeRow {
    #[tabled(rename = "Probe")]
    probe: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Failures")]
    failures: String,
    #[tabled(rename = "Last Error")]
    last_error: String,
}

/// Show the agent's probe health
pub async fn show_health(client: &AgentClient, format: OutputFormat) -> Result<()> {
    let (status_code, health): (u16, HealthResponse) =
        client.get_with_status("/healthz").await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&health)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{}", "Agent Health".bold());
            println!("{}", "=".repeat(40));
            println!("Overall:  {} (HTTP {})", color_status(&health.status), status_code);
            println!();

            let mut rows: Vec<ProbeRow> = health
                .probes
                .iter()
                .map(|(name, probe)| ProbeRow {
                    probe: name.clone(),
                    status: color_status(&probe.status),
                    failures: format!(
                        "{} ({} total)",
                        probe.consecutive_failures, probe.total_failures
                    ),
                    last_error: probe.last_error.clone().unwrap_or_default(),
                })
                .collect();
            rows.sort_by(|a, b| a.probe.cmp(&b.probe));
            print_table(&rows, OutputFormat::Table);
        }
    }

    Ok(())
}
