//! Merge rules: defaults first, later sources override earlier ones.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with every default set.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("application.qualifier", "org")?
        .set_default("application.organization", "tierstore")?
        .set_default("application.name", "tierstore")?
        .set_default("resource_dir", "models")?
        .set_default("journal", "durable")?
        .set_default("flush_every_ms", 500)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")
}
