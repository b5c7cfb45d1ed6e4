pub mod cli;
mod console;
pub mod db;
pub mod images;
pub mod settings;
pub mod traits;
mod utils;
pub mod vision;
pub mod workflow;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use log::info;

use cli::{Cli, Command, MetersCommand};
use db::{Database, MeterInput, MeterSummary};
use settings::SettingsStore;
use vision::HttpVisionClient;
use workflow::InspectionController;

pub struct AppState {
    pub db: Database,
    pub workflow: InspectionController,
    pub settings: SettingsStore,
}

pub async fn run(cli: Cli) -> Result<()> {
    let settings = SettingsStore::new(cli.config.clone())?;
    settings.override_with(|s| {
        s.apply_env_overrides(|key| std::env::var(key).ok());
        if let Some(url) = &cli.vision_url {
            s.vision.base_url = url.clone();
        }
        if let Some(path) = &cli.db {
            s.database_path = path.clone();
        }
        if let Some(level) = &cli.log_level {
            s.log_level = level.clone();
        }
    });

    let current = settings.settings();
    utils::logging::init(&current.log_level);
    info!("meter-inspect {} starting up", env!("CARGO_PKG_VERSION"));

    let command = cli.command.unwrap_or(Command::Console);
    if let Command::InitConfig { force } = command {
        settings.save(force)?;
        println!("Wrote {}", settings.path().display());
        return Ok(());
    }

    let database = Database::new(current.database_path.clone())?;

    match command {
        Command::Meters {
            action: MetersCommand::List,
        } => {
            for meter in database.get_meters().await? {
                let summary = MeterSummary::from(&meter);
                println!("{:<12} {:<16} {}", summary.id, summary.model, summary.image);
            }
        }
        Command::Meters {
            action: MetersCommand::Import { file },
        } => {
            let imported = import_catalog(&database, &file).await?;
            println!("Imported {imported} meters from {}", file.display());
        }
        Command::History { limit } => {
            for record in database.list_inspections(limit).await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Command::Stats => {
            let stats = database.get_inspection_stats(Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Console => {
            let vision = HttpVisionClient::new(&current.vision)?;
            info!("Using vision service at {}", vision.base_url());

            let workflow = InspectionController::new(
                Arc::new(database.clone()),
                Arc::new(vision),
                Arc::new(database.clone()),
            );
            let state = Arc::new(AppState {
                db: database,
                workflow,
                settings,
            });
            console::run(state).await?;
        }
        Command::InitConfig { .. } => {}
    }

    Ok(())
}

async fn import_catalog(database: &Database, file: &Path) -> Result<usize> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let inputs: Vec<MeterInput> = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse meter catalog {}", file.display()))?;

    let base_dir = file.parent().unwrap_or_else(|| Path::new("."));
    let entries = inputs
        .iter()
        .map(|input| -> Result<_> {
            let image = input.resolve_image(base_dir)?;
            Ok((input.id.trim().to_string(), input.model.trim().to_string(), image))
        })
        .collect::<Result<Vec<_>>>()?;

    database.import_meters(entries).await
}
