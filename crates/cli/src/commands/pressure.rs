//! Pressure state CLI command

use anyhow::Result;
use colored::Colorize;

use crate::client::{AgentClient, PressureStatus};
use crate::output::{color_pressure, print_success, print_warning, OutputFormat};

/// Show the node's current pressure conditions
pub async fn show_pressure(client: &AgentClient, format: OutputFormat) -> Result<()> {
    let status: PressureStatus = client.get("/pressure").await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&status)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{}", "Node Pressure".bold());
            println!("{}", "=".repeat(40));
            println!("Memory pressure:  {}", color_pressure(status.memory_pressure));
            println!("Disk pressure:    {}", color_pressure(status.disk_pressure));
            println!("PID pressure:     {}", color_pressure(status.pid_pressure));
            println!();

            if status.conditions.is_empty() {
                print_success("No pressure conditions active");
            } else {
                print_warning(&format!(
                    "Active conditions: {}",
                    status.conditions.join(", ")
                ));
            }
        }
    }

    Ok(())
}
