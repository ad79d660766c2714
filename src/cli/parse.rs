//! CLI parse: clap types for tierstore, plus argument value parsing.

use crate::fetch::Predicate;
use crate::types::Value;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Tierstore CLI - inspect, query and migrate local object stores
#[derive(Parser)]
#[command(name = "tierstore")]
#[command(about = "Inspect, query and migrate tierstore object stores")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over the global config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory of <model>.toml model histories
    #[arg(long, global = true)]
    pub models: Option<PathBuf>,

    /// Directory holding the stores
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show a store's model version and migration state
    Status {
        /// Model name
        model: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Query records of one entity
    Query {
        /// Model name
        model: String,
        /// Entity name
        entity: String,
        /// Equality filter, repeatable: --eq field=value
        #[arg(long = "eq", value_name = "FIELD=VALUE")]
        filters: Vec<String>,
        /// Sort field
        #[arg(long)]
        sort: Option<String>,
        /// Sort descending
        #[arg(long)]
        desc: bool,
        /// Maximum number of records (0 = all)
        #[arg(long, default_value = "0")]
        limit: usize,
        /// Records to skip
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Migrate a store to the current model version
    Migrate {
        /// Model name
        model: String,
        /// Recovery strategy for an incompatible store
        #[arg(long, value_enum, default_value = "lightweight")]
        strategy: StrategyArg,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Lightweight,
    RemoveOnFailure,
    Progressive,
}

/// Parse a command-line value: integer, float, boolean, `null`, else text.
pub fn parse_value(raw: &str) -> Value {
    if raw == "null" {
        return Value::Null;
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Integer(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Float(f);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Text(raw.to_string()),
    }
}

/// Combine `field=value` filters into one conjunction.
pub fn parse_filter(filters: &[String]) -> Result<Predicate, String> {
    filters.iter().try_fold(Predicate::All, |predicate, filter| {
        let (field, value) = filter
            .split_once('=')
            .ok_or_else(|| format!("filter '{}' must look like field=value", filter))?;
        if field.trim().is_empty() {
            return Err(format!("filter '{}' has an empty field name", filter));
        }
        Ok(predicate.and(Predicate::eq(field.trim(), parse_value(value))))
    })
}
