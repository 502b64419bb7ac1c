//! Strategy CLI commands

use anyhow::{bail, Context, Result};
use colored::Colorize;
use protect_lib::strategy::load;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use crate::client::{ApiClient, StrategySummary};
use crate::output::{print_error, print_json, print_success, print_table, print_warning, OutputFormat};

#[derive(Tabled)]
struct StrategyRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    category: String,
    #[tabled(rename = "Checks")]
    checks: usize,
}

impl From<&StrategySummary> for StrategyRow {
    fn from(s: &StrategySummary) -> Self {
        Self {
            name: s.name.clone(),
            category: s.category.clone(),
            checks: s.checks,
        }
    }
}

/// Result of validating a strategy directory locally
#[derive(Debug, Serialize)]
struct ValidationReport {
    strategies: Vec<StrategySummary>,
    errors: Vec<String>,
}

/// List the agent's active strategies
pub async fn list_strategies(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let list = client.list_strategies().await?;

    match format {
        OutputFormat::Json => print_json(&list)?,
        OutputFormat::Table => {
            let rows: Vec<StrategyRow> = list.strategies.iter().map(StrategyRow::from).collect();
            print_table(rows, "No strategies loaded");
        }
    }

    Ok(())
}

/// Ask the agent to re-read its strategy directory
pub async fn reload_strategies(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let result = client.reload_strategies().await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            print_success(&format!("Loaded {} strategies", result.loaded));
            for error in &result.errors {
                print_warning(error);
            }
        }
    }

    Ok(())
}

/// Validate strategy files without contacting the agent
///
/// Fails when the directory is unreadable or any file is rejected.
pub fn validate_strategies(dir: &Path, format: OutputFormat) -> Result<()> {
    let report = load(dir).with_context(|| format!("Cannot validate {}", dir.display()))?;

    let validation = ValidationReport {
        strategies: report
            .strategies
            .iter()
            .map(|s| StrategySummary {
                name: s.name.clone(),
                category: s.category.clone(),
                checks: s.checks.len(),
            })
            .collect(),
        errors: report.errors.iter().map(|e| e.to_string()).collect(),
    };

    match format {
        OutputFormat::Json => print_json(&validation)?,
        OutputFormat::Table => {
            let rows: Vec<StrategyRow> = validation.strategies.iter().map(StrategyRow::from).collect();
            print_table(rows, "No valid strategies found");
            for error in &validation.errors {
                print_error(error);
            }
            if validation.errors.is_empty() {
                println!("{}", "All strategy files are valid".green());
            }
        }
    }

    if !validation.errors.is_empty() {
        bail!("{} strategy files rejected", validation.errors.len());
    }
    Ok(())
}
