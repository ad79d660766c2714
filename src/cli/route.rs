//! CLI route: single route table and run context. Dispatches to the client,
//! the migration engine and presentation.

use crate::cli::parse::{parse_filter, Cli, Commands, StrategyArg};
use crate::cli::presentation::{
    format_records_json, format_records_text, format_status_json, format_status_text,
};
use crate::client::Client;
use crate::config::{ConfigLoader, StoreConfig};
use crate::fetch::{RawFetch, SortDescriptor};
use crate::migration::{
    self, MigrationDelegate, MigrationProgress, MigrationState, MigrationStrategy,
    ProgressiveMigration,
};
use crate::model::ResourceBundle;
use anyhow::{anyhow, bail, Context as _};
use owo_colors::OwoColorize;
use std::sync::Arc;
use tracing::info;

/// Prints progressive migration steps to stderr
struct ConsoleProgress;

impl MigrationDelegate for ConsoleProgress {
    fn on_start(&self, from_version: u32, to_version: u32) {
        eprintln!(
            "{} v{} -> v{}",
            "Migrating".cyan().bold(),
            from_version,
            to_version
        );
    }

    fn on_progress(&self, progress: &MigrationProgress) {
        eprintln!(
            "  [{}/{}] v{} -> v{}: {} record(s)",
            progress.step,
            progress.total_steps,
            progress.from_version,
            progress.to_version,
            progress.records_migrated
        );
    }

    fn on_finish(&self, to_version: u32) {
        eprintln!("{} at v{}", "Done".green().bold(), to_version);
    }
}

/// Runtime context for CLI execution: resolved configuration and model bundle.
pub struct RunContext {
    config: StoreConfig,
}

impl RunContext {
    /// Load configuration and apply command-line overrides.
    pub fn new(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = ConfigLoader::load(cli.config.as_deref())
            .context("Failed to load configuration")?;
        if let Some(models) = &cli.models {
            config.resource_dir = models.clone();
        }
        if let Some(data_dir) = &cli.data_dir {
            config.data_dir = Some(data_dir.clone());
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn bundle(&self) -> ResourceBundle {
        ResourceBundle::directory(&self.config.resource_dir)
    }

    fn open_client(&self, model: &str, strategy: MigrationStrategy) -> anyhow::Result<Client> {
        Client::builder(model)
            .bundle(self.bundle())
            .config(self.config.clone())
            .strategy(strategy)
            .open()
            .with_context(|| format!("Failed to open store for model '{}'", model))
    }

    pub fn execute(&self, command: &Commands) -> anyhow::Result<String> {
        match command {
            Commands::Status { model, format } => self.status(model, format),
            Commands::Query {
                model,
                entity,
                filters,
                sort,
                desc,
                limit,
                offset,
                format,
            } => {
                let predicate = parse_filter(filters).map_err(|e| anyhow!(e))?;
                let fetch = RawFetch {
                    entity: entity.clone(),
                    predicate,
                    sort: sort.as_ref().map(|field| {
                        if *desc {
                            SortDescriptor::descending(field.as_str())
                        } else {
                            SortDescriptor::ascending(field.as_str())
                        }
                    }),
                    limit: *limit,
                    offset: *offset,
                };
                self.query(model, entity, fetch, format)
            }
            Commands::Migrate { model, strategy } => self.migrate(model, *strategy),
        }
    }

    fn status(&self, model: &str, format: &str) -> anyhow::Result<String> {
        let history = self.bundle().load(model)?;
        let path = self.config.store_path(model)?;
        let status = migration::inspect(&path, &history)?;
        match format {
            "json" => Ok(format_status_json(model, &status)?),
            "text" => Ok(format_status_text(model, &status)),
            other => bail!("Unknown format '{}' (expected text or json)", other),
        }
    }

    fn query(&self, model: &str, entity: &str, fetch: RawFetch, format: &str) -> anyhow::Result<String> {
        let history = self.bundle().load(model)?;
        let status = migration::inspect(&self.config.store_path(model)?, &history)?;
        if status.state == MigrationState::NeedsMigration {
            bail!(
                "Store for '{}' needs migration to v{}; run `tierstore migrate {}` first",
                model,
                status.target_version,
                model
            );
        }

        let client = self.open_client(model, MigrationStrategy::Lightweight)?;
        let records = client.query_records(entity, fetch).wait()?;
        info!(model, entity, count = records.len(), "Query complete");
        match format {
            "json" => Ok(format_records_json(&records)?),
            "text" => Ok(format_records_text(&records)),
            other => bail!("Unknown format '{}' (expected text or json)", other),
        }
    }

    fn migrate(&self, model: &str, strategy: StrategyArg) -> anyhow::Result<String> {
        let strategy = match strategy {
            StrategyArg::Lightweight => MigrationStrategy::Lightweight,
            StrategyArg::RemoveOnFailure => MigrationStrategy::RemoveOnFailure,
            StrategyArg::Progressive => MigrationStrategy::Progressive(
                ProgressiveMigration::new().with_delegate(Arc::new(ConsoleProgress)),
            ),
        };
        let client = self.open_client(model, strategy)?;
        Ok(format!(
            "{} store {} is {} at model v{}",
            model,
            client.store_path().display(),
            client.migration_state(),
            client.model().version
        ))
    }
}
