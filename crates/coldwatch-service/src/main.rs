//! coldwatch - health monitoring and control for refrigeration units.
//!
//! Run with: `cargo run -p coldwatch-service -- run`

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use coldwatch_core::{DeviceClient, FileRegistry, NewUnit, UnitRegistry};
use coldwatch_service::cli::{Cli, Commands, OutputFormat, Toggle, UnitsAction};
use coldwatch_service::{Config, Runtime, format};
use coldwatch_types::UnitRecord;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if let Some(path) = cli.registry {
        config.registry.path = path;
    }
    config.validate()?;

    let registry = FileRegistry::new(config.registry.path.clone());

    match cli.command {
        Commands::Run { mode } => {
            if let Some(mode) = mode {
                config.monitor.mode = mode.into();
            }
            run(config, registry).await
        }
        Commands::Sweep { output } => {
            let units = registry.list()?;
            let runtime = Runtime::from_config(config)?;
            let report = runtime.sweep_once(&units).await;
            match output.format {
                OutputFormat::Text => print!("{}", format::format_sweep_text(&report)),
                OutputFormat::Json => println!("{}", format::format_sweep_json(&report)?),
            }
            Ok(())
        }
        Commands::Probe { unit, output } => {
            let unit = registry.find(&unit.unit)?;
            let runtime = Runtime::from_config(config)?;
            let outcome = runtime.probe(&unit).await;
            match output.format {
                OutputFormat::Text => print!("{}", format::format_outcome_text(&unit, &outcome)),
                OutputFormat::Json => println!("{}", format::to_json(&outcome)?),
            }
            Ok(())
        }
        Commands::Units { action } => handle_units(&registry, action),
        Commands::Status { unit, output } => {
            let unit = registry.find(&unit.unit)?;
            let status = client(&config, &unit)?.status().await?;
            match output.format {
                OutputFormat::Text => print!("{}", format::format_status_text(&unit, &status)),
                OutputFormat::Json => println!("{}", format::format_status_json(&status)?),
            }
            Ok(())
        }
        Commands::Info { unit, output } => {
            let unit = registry.find(&unit.unit)?;
            let info = client(&config, &unit)?.system_info().await?;
            match output.format {
                OutputFormat::Text => print!("{}", format::format_system_info_text(&info)),
                OutputFormat::Json => println!("{}", format::to_json(&info.entries)?),
            }
            Ok(())
        }
        Commands::Setpoint { unit, value } => {
            let unit = registry.find(&unit.unit)?;
            let response = client(&config, &unit)?.set_setpoint(value).await?;
            println!(
                "Setpoint for {} is now {:.1}",
                unit.display_id,
                response.setpoint.unwrap_or(value)
            );
            Ok(())
        }
        Commands::ResetAlarms { unit } => {
            let unit = registry.find(&unit.unit)?;
            let response = client(&config, &unit)?.reset_alarms().await?;
            println!(
                "{}: {}",
                unit.display_id,
                response.message.as_deref().unwrap_or("Alarms reset")
            );
            Ok(())
        }
        Commands::Defrost { unit } => {
            let unit = registry.find(&unit.unit)?;
            let response = client(&config, &unit)?.trigger_defrost().await?;
            println!(
                "{}: {}",
                unit.display_id,
                response.message.as_deref().unwrap_or("Defrost started")
            );
            Ok(())
        }
        Commands::Demo { unit, state } => {
            let unit = registry.find(&unit.unit)?;
            let client = client(&config, &unit)?;
            let enabled = match state {
                None => client.demo_mode().await?,
                Some(toggle) => client.set_demo_mode(toggle == Toggle::On).await?.demo_mode,
            };
            println!(
                "Demo mode on {} is {}",
                unit.display_id,
                if enabled { "on" } else { "off" }
            );
            Ok(())
        }
        Commands::Config { unit, assignments } => {
            let unit = registry.find(&unit.unit)?;
            let changes: BTreeMap<_, _> = assignments.into_iter().collect();
            let response = client(&config, &unit)?.update_config(&changes).await?;
            print!("{}", format::format_config_update(&response));
            if !response.errors.is_empty() {
                bail!("{} configuration key(s) rejected", response.errors.len());
            }
            Ok(())
        }
        Commands::Logs {
            unit,
            date,
            conditions,
        } => {
            let unit = registry.find(&unit.unit)?;
            let date = date.unwrap_or_else(|| OffsetDateTime::now_utc().date());
            let client = client(&config, &unit)?;
            let log = if conditions {
                client.conditions_log(date).await?
            } else {
                client.events_log(date).await?
            };
            print!("{}", log);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("coldwatch_service={}", level).parse()?)
                .add_directive(format!("coldwatch_core={}", level).parse()?),
        )
        .init();
    Ok(())
}

fn client(config: &Config, unit: &UnitRecord) -> Result<DeviceClient> {
    Ok(DeviceClient::for_unit(
        unit,
        config.monitor.scheme,
        config.monitor.request_timeout(),
    )?)
}

async fn run(config: Config, registry: FileRegistry) -> Result<()> {
    info!(
        "Using registry {} ({} units)",
        registry.path().display(),
        registry.list_registered_units()?.len()
    );
    let runtime = Runtime::from_config(config)?;
    let token = CancellationToken::new();

    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
        }
        shutdown.cancel();
    });

    runtime.run(Arc::new(registry), token).await;
    Ok(())
}

fn handle_units(registry: &FileRegistry, action: UnitsAction) -> Result<()> {
    match action {
        UnitsAction::List { output } => {
            let units = registry.list()?;
            match output.format {
                OutputFormat::Text => print!("{}", format::format_units_text(&units)),
                OutputFormat::Json => println!("{}", format::format_units_json(&units)?),
            }
        }
        UnitsAction::Add {
            name,
            address,
            key,
            port,
        } => {
            let mut new = NewUnit::new(name, address, key);
            if let Some(port) = port {
                new = new.with_port(port);
            }
            let unit = registry.add(new)?;
            println!("Added {} with id {}", unit.display_id, unit.id);
        }
        UnitsAction::Edit {
            unit,
            name,
            address,
            key,
            port,
        } => {
            let mut unit = registry.find(&unit.unit)?;
            if let Some(name) = name {
                unit.display_id = name;
            }
            if let Some(address) = address {
                unit.address = address;
            }
            if let Some(key) = key {
                unit.api_key = key;
            }
            if let Some(port) = port {
                unit.port = port;
            }
            let unit = registry.update(unit)?;
            println!("Updated {} ({})", unit.display_id, unit.id);
        }
        UnitsAction::Remove { unit } => {
            let unit = registry.find(&unit.unit)?;
            let removed = registry.remove(unit.id)?;
            println!("Removed {} ({})", removed.display_id, removed.id);
        }
        UnitsAction::Move { unit, index } => {
            let unit = registry.find(&unit.unit)?;
            let units = registry.move_to(unit.id, index)?;
            print!("{}", format::format_units_text(&units));
        }
    }
    Ok(())
}
