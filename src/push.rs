// =====================================================
// ERP -> SUPABASE PROJECT PUSH
// =====================================================
//
// The reverse direction: project rows read from the ERP land in the cloud
// mirror table as JSONB documents keyed by project number. The HTTP-facing
// pull/push endpoints reuse this merge path; the transport itself lives
// elsewhere.

use crate::db_types::{quote_identifier, ErpTables, QueryResult};
use crate::error::{SyncError, SyncResult};
use crate::mssql;
use crate::supabase::{self, MirrorRow};
use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Pool, Postgres};

const PROJECT_NUMBER_COLUMN: &str = "ProjNr";
const EDITED_COLUMN: &str = "GeaendertAm";

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    pub read_rows: usize,
    pub upserted_rows: u64,
}

/// Reads project rows (optionally only those edited since the given
/// timestamp) and bulk-merges them into the mirror table.
pub async fn push_projects(
    erp: &mssql::Pool,
    supabase_pool: &Pool<Postgres>,
    tables: &ErpTables,
    mirror_table: &str,
    since: Option<NaiveDateTime>,
) -> SyncResult<PushReport> {
    let qualified = tables.qualified_project();
    let query = match since {
        Some(ts) => format!(
            "SELECT * FROM {} WHERE {} >= '{}'",
            qualified,
            quote_identifier(EDITED_COLUMN),
            ts.format("%Y-%m-%dT%H:%M:%S%.3f")
        ),
        None => format!("SELECT * FROM {}", qualified),
    };

    let results = mssql::execute_query(erp, query).await?;
    let rows = mirror_rows_from_result(&results)?;
    let upserted = supabase::upsert_projects(supabase_pool, mirror_table, &rows).await?;

    tracing::info!(read = rows.len(), upserted = upserted, "project push finished");
    Ok(PushReport {
        read_rows: rows.len(),
        upserted_rows: upserted,
    })
}

/// Converts an ERP result set into mirror rows: the full row as a JSON
/// object plus the extracted key and edit timestamp. Rows without a project
/// number are dropped.
pub fn mirror_rows_from_result(results: &[QueryResult]) -> SyncResult<Vec<MirrorRow>> {
    let first = results
        .first()
        .ok_or_else(|| SyncError::Db("project query returned no result set".to_string()))?;

    let projnr_index = first
        .columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(PROJECT_NUMBER_COLUMN))
        .ok_or_else(|| {
            SyncError::Db(format!(
                "project table has no {} column",
                PROJECT_NUMBER_COLUMN
            ))
        })?;
    let edited_index = first
        .columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(EDITED_COLUMN));

    let mut rows = Vec::with_capacity(first.rows.len());
    for row in &first.rows {
        let projnr = match row.get(projnr_index) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => continue,
        };

        let mut payload = serde_json::Map::with_capacity(first.columns.len());
        for (index, column) in first.columns.iter().enumerate() {
            payload.insert(
                column.clone(),
                row.get(index).cloned().unwrap_or(Value::Null),
            );
        }

        let erp_edited_at = edited_index
            .and_then(|index| row.get(index))
            .and_then(|value| value.as_str())
            .and_then(parse_erp_timestamp);

        rows.push(MirrorRow {
            projnr,
            payload: Value::Object(payload),
            erp_edited_at,
        });
    }

    Ok(rows)
}

fn parse_erp_timestamp(raw: &str) -> Option<chrono::DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests;
