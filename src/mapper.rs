// =====================================================
// SCHEMA-DRIVEN PAYLOAD MAPPING
// =====================================================
//
// Maps an arbitrary key/value payload onto a table's live column set.
// Strict by design: a key that matches no column is an error, not a skip;
// silently dropping a typo'd field loses data.

use crate::catalog::TableMetadata;
use crate::coerce::{coerce, SqlValue};
use crate::error::{SyncError, SyncResult};
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct MapOptions<'a> {
    /// Names the payload in error messages ("project", "primary address", ...).
    pub label: &'a str,
    /// Payload keys that are workflow directives rather than columns.
    pub allowed_extra_keys: &'a [&'a str],
    /// Columns the workflow fills in after mapping (generated keys,
    /// timestamps); exempt from the required-column check.
    pub deferred_columns: &'a [&'a str],
}

/// Maps a payload onto a table. Pure: no I/O, safe to call repeatedly with
/// the same inputs. Returns (canonical column name, coerced value) pairs in
/// the table's column order.
pub fn map_payload(
    payload: &Map<String, Value>,
    table: &TableMetadata,
    opts: &MapOptions<'_>,
) -> SyncResult<Vec<(String, SqlValue)>> {
    let mut mapped: HashMap<String, (String, SqlValue)> = HashMap::new();

    for (key, raw) in payload {
        if contains_ci(opts.allowed_extra_keys, key) {
            continue;
        }

        let column = table.find(key).ok_or_else(|| SyncError::UnknownField {
            label: opts.label.to_string(),
            key: key.clone(),
        })?;

        if !column.is_insertable() {
            return Err(SyncError::NotInsertable {
                label: opts.label.to_string(),
                column: column.name.clone(),
            });
        }

        let value = coerce(key, raw, column)?;
        mapped.insert(
            column.name.to_ascii_lowercase(),
            (column.name.clone(), value),
        );
    }

    for column in table.required_columns() {
        let lower = column.name.to_ascii_lowercase();
        let satisfied = mapped
            .get(&lower)
            .map(|(_, value)| !value.is_null())
            .unwrap_or(false);

        if !satisfied && !contains_ci(opts.deferred_columns, &column.name) {
            return Err(SyncError::MissingRequiredField {
                label: opts.label.to_string(),
                field: column.name.clone(),
            });
        }
    }

    Ok(table
        .columns
        .iter()
        .filter_map(|c| mapped.remove(&c.name.to_ascii_lowercase()))
        .collect())
}

fn contains_ci(haystack: &[&str], needle: &str) -> bool {
    haystack
        .iter()
        .any(|item| item.eq_ignore_ascii_case(needle.trim()))
}

/// Parameterized INSERT for a mapped column set, placeholders in map order.
pub fn build_insert_sql(qualified_table: &str, mapped: &[(String, SqlValue)]) -> String {
    let columns = mapped
        .iter()
        .map(|(name, _)| crate::db_types::quote_identifier(name))
        .collect::<Vec<String>>()
        .join(", ");
    let placeholders = (1..=mapped.len())
        .map(|i| format!("@P{}", i))
        .collect::<Vec<String>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified_table, columns, placeholders
    )
}

#[cfg(test)]
mod tests;
