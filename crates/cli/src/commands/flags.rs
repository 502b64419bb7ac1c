//! Flag ledger CLI commands

use anyhow::Result;
use colored::Colorize;
use protect_lib::FlagRecord;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_timestamp, print_info, print_json, print_success, print_table, truncate, OutputFormat,
};

/// Row for the flag records table
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Server")]
    server: String,
    #[tabled(rename = "Flags")]
    flags: usize,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "First Detected")]
    first_detected: String,
    #[tabled(rename = "Last Action")]
    last_action: String,
}

/// Row for one flag of a record
#[derive(Tabled)]
struct FlagRow {
    #[tabled(rename = "Detected")]
    detected: String,
    #[tabled(rename = "Strategy")]
    strategy: String,
    #[tabled(rename = "Check")]
    check: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Evidence")]
    evidence: String,
}

fn state_of(record: &FlagRecord) -> String {
    if record.suspended {
        color_status("suspended")
    } else {
        color_status("flagged")
    }
}

/// List flag records
pub async fn list_flags(client: &ApiClient, suspended_only: bool, format: OutputFormat) -> Result<()> {
    let mut list = client.list_flags().await?;
    if suspended_only {
        list.records.retain(|r| r.suspended);
        list.total = list.records.len();
    }

    match format {
        OutputFormat::Json => print_json(&list)?,
        OutputFormat::Table => {
            let rows: Vec<RecordRow> = list
                .records
                .iter()
                .map(|r| RecordRow {
                    container: r.container_uuid.clone(),
                    server: r.server_id.clone().unwrap_or_else(|| "-".to_string()),
                    flags: r.flags.len(),
                    state: state_of(r),
                    first_detected: format_timestamp(&r.first_detected_at),
                    last_action: format_timestamp(&r.last_action_at),
                })
                .collect();
            print_table(rows, "No flagged containers");
            if list.total > 0 {
                println!("\nTotal: {} containers", list.total);
            }
        }
    }

    Ok(())
}

/// Show one container's flag history
pub async fn show_flag(client: &ApiClient, uuid: &str, format: OutputFormat) -> Result<()> {
    let record = client.get_flag(uuid).await?;

    match format {
        OutputFormat::Json => print_json(&record)?,
        OutputFormat::Table => {
            println!("{}", "Flag Record".bold());
            println!("{}", "=".repeat(60));
            println!("Container:       {}", record.container_uuid.cyan());
            println!(
                "Server:          {}",
                record.server_id.as_deref().unwrap_or("unknown")
            );
            println!("State:           {}", state_of(&record));
            println!("First Detected:  {}", format_timestamp(&record.first_detected_at));
            if let Some(at) = &record.suspended_at {
                println!("Suspended At:    {}", format_timestamp(at));
            }
            println!();

            let rows: Vec<FlagRow> = record
                .flags
                .iter()
                .map(|f| FlagRow {
                    detected: format_timestamp(&f.detected_at),
                    strategy: f.strategy_name.clone(),
                    check: f.check_type.to_string(),
                    message: truncate(&f.message, 60),
                    evidence: truncate(&f.evidence.to_string(), 80),
                })
                .collect();
            print_table(rows, "No flags recorded");
        }
    }

    Ok(())
}

/// Clear a container's suspension after remediation
pub async fn release_flag(client: &ApiClient, uuid: &str, format: OutputFormat) -> Result<()> {
    let record = client.release_flag(uuid).await?;

    match format {
        OutputFormat::Json => print_json(&record)?,
        OutputFormat::Table => {
            print_success(&format!("Released container {}", uuid));
            print_info(&format!(
                "{} flags kept in history; the server must be unsuspended in the panel",
                record.flags.len()
            ));
        }
    }

    Ok(())
}
