// =====================================================
// LIVE TABLE METADATA (sys.* CATALOG INTROSPECTION)
// =====================================================
//
// Everything the mapping and copy paths know about a table comes from here:
// there is no compiled schema. Column metadata is read once per table name
// per catalog instance and cached for the rest of the run; schema changes
// during a run are out of scope.

use crate::db_types::{qualified_table_name, QueryResult};
use crate::error::{SyncError, SyncResult};
use crate::mssql::{self, Pool};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// --- Column Metadata ---

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMeta {
    pub name: String,
    pub native_type: String,
    /// Declared byte length; -1 means (MAX). None for non-sized types.
    pub max_length: Option<i32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub is_nullable: bool,
    pub is_identity: bool,
    pub is_computed: bool,
    pub default_expression: Option<String>,
    pub computed_definition: Option<String>,
    pub identity_seed: Option<i64>,
    pub identity_increment: Option<i64>,
}

impl ColumnMeta {
    pub fn type_lower(&self) -> String {
        self.native_type.trim().to_ascii_lowercase()
    }

    /// Opaque concurrency token columns are regenerated by the server and
    /// never carry client values.
    pub fn is_rowversion(&self) -> bool {
        matches!(self.type_lower().as_str(), "timestamp" | "rowversion")
    }

    pub fn is_insertable(&self) -> bool {
        !self.is_identity && !self.is_computed && !self.is_rowversion()
    }

    pub fn has_default(&self) -> bool {
        self.default_expression.is_some()
    }

    /// Character capacity for string columns. The catalog reports byte
    /// lengths, so UTF-16 types halve; -1 (MAX) and non-string types have
    /// no bound.
    pub fn char_capacity(&self) -> Option<usize> {
        let max = self.max_length?;
        if max < 0 {
            return None;
        }
        match self.type_lower().as_str() {
            "nchar" | "nvarchar" => Some((max / 2) as usize),
            "char" | "varchar" => Some(max as usize),
            _ => None,
        }
    }
}

// --- Table Metadata ---

/// Ordered, immutable column snapshot for one table.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    pub table: String,
    pub columns: Vec<ColumnMeta>,
}

impl TableMetadata {
    pub fn find(&self, name: &str) -> Option<&ColumnMeta> {
        let needle = name.trim().to_ascii_lowercase();
        self.columns
            .iter()
            .find(|c| c.name.to_ascii_lowercase() == needle)
    }

    pub fn insertable_columns(&self) -> Vec<&ColumnMeta> {
        self.columns.iter().filter(|c| c.is_insertable()).collect()
    }

    /// NOT NULL columns without a server default; a payload (or the
    /// workflow around it) must supply these.
    pub fn required_columns(&self) -> Vec<&ColumnMeta> {
        self.columns
            .iter()
            .filter(|c| c.is_insertable() && !c.is_nullable && !c.has_default())
            .collect()
    }

    pub fn has_identity(&self) -> bool {
        self.columns.iter().any(|c| c.is_identity)
    }
}

// --- Catalog ---

/// Introspects and caches table metadata for one database. The cache is
/// owned by the instance (not a process global) so independent runs and
/// tests cannot contaminate each other; it is never invalidated.
pub struct MetadataCatalog {
    pool: Pool,
    default_schema: String,
    cache: Mutex<HashMap<String, Arc<TableMetadata>>>,
}

impl MetadataCatalog {
    pub fn new(pool: Pool, default_schema: &str) -> Self {
        Self {
            pool,
            default_schema: default_schema.to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn cache_key(&self, table: &str) -> String {
        qualified_table_name(&self.default_schema, table.trim()).to_ascii_lowercase()
    }

    fn cached(&self, key: &str) -> SyncResult<Option<Arc<TableMetadata>>> {
        let cache = self
            .cache
            .lock()
            .map_err(|_| SyncError::Catalog("metadata cache mutex poisoned".to_string()))?;
        Ok(cache.get(key).cloned())
    }

    fn store(&self, key: String, meta: Arc<TableMetadata>) -> SyncResult<()> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| SyncError::Catalog("metadata cache mutex poisoned".to_string()))?;
        cache.entry(key).or_insert(meta);
        Ok(())
    }

    /// Returns the column snapshot for a table, querying the live catalog
    /// on first use and the cache afterwards.
    pub async fn get_columns(&self, table: &str) -> SyncResult<Arc<TableMetadata>> {
        let key = self.cache_key(table);
        if let Some(meta) = self.cached(&key)? {
            return Ok(meta);
        }

        let qualified = qualified_table_name(&self.default_schema, table.trim());
        let query = column_metadata_query(&qualified);
        let results = mssql::execute_query(&self.pool, query).await?;
        let meta = Arc::new(parse_table_metadata(table, &results)?);

        tracing::debug!(
            table = table,
            columns = meta.columns.len(),
            "table metadata loaded"
        );

        self.store(key, Arc::clone(&meta))?;
        Ok(meta)
    }

    /// Lists user tables ("schema.table") for clone enumeration.
    pub async fn table_names(&self) -> SyncResult<Vec<String>> {
        mssql::get_user_tables(&self.pool).await
    }
}

#[cfg(test)]
impl MetadataCatalog {
    pub(crate) fn seed(&self, table: &str, meta: TableMetadata) {
        let key = self.cache_key(table);
        self.cache
            .lock()
            .expect("cache mutex")
            .insert(key, Arc::new(meta));
    }
}

fn column_metadata_query(qualified_table: &str) -> String {
    format!(
        "SELECT c.name, t.name AS native_type, c.max_length, c.precision, c.scale, \
         c.is_nullable, c.is_identity, c.is_computed, \
         dc.definition AS default_expression, \
         cc.definition AS computed_definition, \
         CAST(ic.seed_value AS BIGINT) AS identity_seed, \
         CAST(ic.increment_value AS BIGINT) AS identity_increment \
         FROM sys.columns c \
         INNER JOIN sys.types t ON c.user_type_id = t.user_type_id \
         LEFT JOIN sys.default_constraints dc ON dc.object_id = c.default_object_id \
         LEFT JOIN sys.computed_columns cc ON cc.object_id = c.object_id AND cc.column_id = c.column_id \
         LEFT JOIN sys.identity_columns ic ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
         WHERE c.object_id = OBJECT_ID('{}') \
         ORDER BY c.column_id",
        crate::db_types::escape_sql_string(qualified_table)
    )
}

/// Builds the snapshot from catalog query rows. Pure so it can be exercised
/// without a live server.
pub fn parse_table_metadata(table: &str, results: &[QueryResult]) -> SyncResult<TableMetadata> {
    let first = results
        .first()
        .ok_or_else(|| SyncError::Catalog(format!("no catalog result for table '{}'", table)))?;

    if first.rows.is_empty() {
        return Err(SyncError::Catalog(format!(
            "table '{}' does not exist",
            table
        )));
    }

    let mut columns = Vec::with_capacity(first.rows.len());
    for row in &first.rows {
        let name = row
            .first()
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                SyncError::Catalog(format!("catalog row for '{}' has no column name", table))
            })?;

        columns.push(ColumnMeta {
            name,
            native_type: row
                .get(1)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            max_length: row.get(2).and_then(|v| v.as_i64()).map(|v| v as i32),
            precision: row.get(3).and_then(|v| v.as_i64()).map(|v| v as u8),
            scale: row.get(4).and_then(|v| v.as_i64()).map(|v| v as u8),
            is_nullable: json_bool(row.get(5)),
            is_identity: json_bool(row.get(6)),
            is_computed: json_bool(row.get(7)),
            default_expression: row.get(8).and_then(|v| v.as_str()).map(str::to_string),
            computed_definition: row.get(9).and_then(|v| v.as_str()).map(str::to_string),
            identity_seed: row.get(10).and_then(|v| v.as_i64()),
            identity_increment: row.get(11).and_then(|v| v.as_i64()),
        });
    }

    Ok(TableMetadata {
        table: table.to_string(),
        columns,
    })
}

fn json_bool(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

#[cfg(test)]
mod tests;
