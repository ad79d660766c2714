//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::{InitError, MigrationError};

/// Render an error chain for the terminal, with a hint for migration failures.
pub fn map_error(e: &anyhow::Error) -> String {
    let mut message = format!("{:#}", e);
    let needs_migration = e.downcast_ref::<InitError>().map_or(false, |err| {
        matches!(
            err,
            InitError::Migration(MigrationError::Incompatible { .. })
                | InitError::Migration(MigrationError::CannotInferMapping { .. })
        )
    });
    if needs_migration {
        message.push_str("\nhint: try `tierstore migrate --strategy progressive` or `--strategy remove-on-failure`");
    }
    message
}
