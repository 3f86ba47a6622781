//! Aegis migration control binary.

#![forbid(unsafe_code)]

mod migrator_command;
mod migrator_config;
mod migrator_services;

use std::env;

use aegis_core::{AppError, AppResult};
use tracing::{info, warn};

use crate::migrator_command::{CommandOutput, MigratorCommand};
use crate::migrator_config::{MigratorConfig, init_tracing};
use crate::migrator_services::MigratorServices;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let arguments: Vec<String> = env::args().skip(1).collect();
    let commands = MigratorCommand::parse_all(&arguments)?;
    let config = MigratorConfig::load()?;
    let services = MigratorServices::from_config(&config)?;

    let strategy = services.migration.restore_routing().await?;
    info!(?strategy, commands = commands.len(), "aegis-migrator started");

    for command in &commands {
        let output = match command.execute(&services).await {
            Ok(output) => output,
            Err(error) => {
                warn!(
                    command = command.as_str(),
                    category = error.category(),
                    error = %error,
                    "command failed"
                );
                return Err(error);
            }
        };
        print_output(&output)?;
    }

    Ok(())
}

fn print_output(output: &CommandOutput) -> AppResult<()> {
    let rendered = serde_json::to_string_pretty(output)
        .map_err(|error| AppError::Internal(format!("failed to render report: {error}")))?;
    println!("{rendered}");
    Ok(())
}
