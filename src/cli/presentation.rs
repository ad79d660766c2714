//! CLI presentation: text and json formatters per command.

use crate::migration::{MigrationState, StoreStatus};
use crate::types::{Record, Value};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::json;
use std::collections::BTreeSet;

fn state_label(state: MigrationState) -> String {
    match state {
        MigrationState::Compatible | MigrationState::Migrated => state.to_string().green().to_string(),
        MigrationState::NeedsMigration => state.to_string().yellow().to_string(),
        MigrationState::Failed => state.to_string().red().to_string(),
        MigrationState::Unchecked => state.to_string(),
    }
}

pub fn format_status_text(model: &str, status: &StoreStatus) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Property", "Value"]);
    table.add_row(vec!["Model".to_string(), model.to_string()]);
    table.add_row(vec!["Store".to_string(), status.path.display().to_string()]);
    table.add_row(vec!["Exists".to_string(), status.exists.to_string()]);
    table.add_row(vec![
        "Stored version".to_string(),
        match (&status.metadata, status.stored_version) {
            (_, Some(version)) => format!("v{}", version),
            (Some(metadata), None) => format!("unknown (hash {})", &metadata.version_hash[..12.min(metadata.version_hash.len())]),
            (None, None) => "-".to_string(),
        },
    ]);
    table.add_row(vec!["Target version".to_string(), format!("v{}", status.target_version)]);
    table.add_row(vec!["State".to_string(), state_label(status.state)]);
    table.add_row(vec!["Records".to_string(), status.record_count.to_string()]);
    if let Some(stamped_at) = status.metadata.as_ref().and_then(|m| m.stamped_at.as_ref()) {
        table.add_row(vec!["Stamped at".to_string(), stamped_at.clone()]);
    }
    table.to_string()
}

pub fn format_status_json(model: &str, status: &StoreStatus) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&json!({
        "model": model,
        "path": status.path,
        "exists": status.exists,
        "stored_version": status.stored_version,
        "target_version": status.target_version,
        "state": status.state.to_string(),
        "records": status.record_count,
        "metadata": status.metadata,
    }))
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::Binary(bytes) => hex::encode(bytes),
        other => other.to_string(),
    }
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Integer(n) => json!(n),
        Value::Float(f) => json!(f),
        Value::Text(s) => json!(s),
        Value::Binary(bytes) => json!(hex::encode(bytes)),
    }
}

pub fn format_records_text(records: &[Record]) -> String {
    if records.is_empty() {
        return "No records.".dimmed().to_string();
    }
    let columns: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.fields.keys().map(String::as_str))
        .collect();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    let mut header = vec!["object".to_string()];
    header.extend(columns.iter().map(|c| c.to_string()));
    table.set_header(header);
    for record in records {
        let mut row = vec![record
            .object_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string())];
        row.extend(columns.iter().map(|c| cell(record.get(c))));
        table.add_row(row);
    }
    format!("{}\n{} record(s)", table, records.len())
}

pub fn format_records_json(records: &[Record]) -> Result<String, serde_json::Error> {
    let rows: Vec<serde_json::Value> = records
        .iter()
        .map(|record| {
            let fields: serde_json::Map<String, serde_json::Value> = record
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), json_value(v)))
                .collect();
            json!({
                "object_id": record.object_id.map(|id| id.as_u64()),
                "entity": record.entity,
                "fields": fields,
            })
        })
        .collect();
    serde_json::to_string_pretty(&rows)
}
