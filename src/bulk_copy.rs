// =====================================================
// STREAMING TABLE COPY (DATABASE CLONING)
// =====================================================
//
// Clones tables between two MSSQL instances for dev/test use. Rows stream
// off a forward-only cursor into fixed-size batches; each batch is flushed
// as one multi-row INSERT. The producer waits for the consumer's ack after
// every handover, so no more than one batch is ever unflushed.

use crate::catalog::{ColumnMeta, MetadataCatalog, TableMetadata};
use crate::coerce::{render_literal, SqlValue};
use crate::db_types::{escape_sql_string, qualified_table_name, quote_identifier, QueryResult};
use crate::error::{SyncError, SyncResult};
use crate::mssql::{self, Pool};
use futures::TryStreamExt;
use serde::Serialize;
use tiberius::QueryItem;
use tokio::sync::mpsc;

/// MSSQL accepts at most 1000 row value expressions per INSERT; one batch
/// is always exactly one statement.
pub const MAX_BATCH_SIZE: usize = 1_000;
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub batch_size: usize,
    /// Skip tables whose source and target row counts already match.
    pub compare_row_counts: bool,
    /// Keep cloning remaining tables after one table fails.
    pub continue_on_error: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            compare_row_counts: true,
            continue_on_error: true,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TableCopyReport {
    pub table: String,
    pub skipped: bool,
    pub copied_rows: u64,
    pub batches: u64,
    pub error: Option<String>,
}

pub struct BulkTableCopier {
    source: Pool,
    target: Pool,
    catalog: MetadataCatalog,
    options: CopyOptions,
}

impl BulkTableCopier {
    pub fn new(source: Pool, target: Pool, options: CopyOptions) -> Self {
        let catalog = MetadataCatalog::new(source.clone(), "dbo");
        Self {
            source,
            target,
            catalog,
            options,
        }
    }

    /// Clones every user table. A failing table aborts only itself when
    /// `continue_on_error` is set; its report carries the error text.
    pub async fn copy_database(&self) -> SyncResult<Vec<TableCopyReport>> {
        let tables = self.catalog.table_names().await?;
        self.copy_tables(&tables).await
    }

    pub async fn copy_tables(&self, tables: &[String]) -> SyncResult<Vec<TableCopyReport>> {
        let run_id = uuid::Uuid::new_v4();
        tracing::info!(run = %run_id, tables = tables.len(), "database clone started");

        let mut reports = Vec::with_capacity(tables.len());
        for table in tables {
            match self.copy_table(table).await {
                Ok(report) => reports.push(report),
                Err(err) if self.options.continue_on_error => {
                    tracing::error!(table = %table, error = %err, "table copy failed");
                    reports.push(TableCopyReport {
                        table: table.clone(),
                        skipped: false,
                        copied_rows: 0,
                        batches: 0,
                        error: Some(err.to_string()),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(run = %run_id, "database clone finished");
        Ok(reports)
    }

    pub async fn copy_table(&self, table: &str) -> SyncResult<TableCopyReport> {
        let meta = self.catalog.get_columns(table).await?;
        let (schema, bare) = split_table_name(table);
        let qualified = qualified_table_name(schema, bare);

        self.ensure_target_table(schema, bare, &meta).await?;

        if self.options.compare_row_counts {
            let source_rows = row_count(&self.source, &qualified).await?;
            let target_rows = row_count(&self.target, &qualified).await?;
            if should_skip_copy(source_rows, target_rows) {
                tracing::info!(table = %table, rows = source_rows, "row counts match, skipping");
                return Ok(TableCopyReport {
                    table: table.to_string(),
                    skipped: true,
                    copied_rows: 0,
                    batches: 0,
                    error: None,
                });
            }
        }

        let (copied_rows, batches) = self.stream_rows(&qualified, &meta).await?;

        tracing::info!(table = %table, rows = copied_rows, batches = batches, "table copied");
        Ok(TableCopyReport {
            table: table.to_string(),
            skipped: false,
            copied_rows,
            batches,
            error: None,
        })
    }

    async fn ensure_target_table(
        &self,
        schema: &str,
        table: &str,
        meta: &TableMetadata,
    ) -> SyncResult<()> {
        let probe = format!(
            "SELECT CASE WHEN OBJECT_ID('{}') IS NULL THEN 0 ELSE 1 END",
            escape_sql_string(&qualified_table_name(schema, table))
        );
        let results = mssql::execute_query(&self.target, probe).await?;
        let exists = count_from_result(&results)? > 0;
        if exists {
            return Ok(());
        }

        let create_schema = format!(
            "IF SCHEMA_ID(N'{}') IS NULL EXEC(N'CREATE SCHEMA {}')",
            escape_sql_string(schema),
            escape_sql_string(&quote_identifier(schema))
        );
        mssql::execute_query(&self.target, create_schema).await?;

        let ddl = render_create_table(schema, table, meta);
        mssql::execute_query(&self.target, ddl).await?;
        tracing::info!(schema = schema, table = table, "target table created");
        Ok(())
    }

    /// The streaming pipeline: a producer task reads the source cursor and
    /// hands over one batch at a time; this side flushes each batch on a
    /// pinned connection (IDENTITY_INSERT is session state) and
    /// acknowledges. Any flush error drops the channel, which cancels the
    /// producer's stream.
    async fn stream_rows(
        &self,
        qualified: &str,
        meta: &TableMetadata,
    ) -> SyncResult<(u64, u64)> {
        let copy_columns: Vec<&ColumnMeta> = meta
            .columns
            .iter()
            .filter(|c| !c.is_computed && !c.is_rowversion())
            .collect();
        if copy_columns.is_empty() {
            return Ok((0, 0));
        }

        let column_list = copy_columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect::<Vec<String>>()
            .join(", ");
        let select_sql = format!("SELECT {} FROM {}", column_list, qualified);
        let insert_prefix = format!("INSERT INTO {} ({}) VALUES ", qualified, column_list);

        let batch_size = self.options.batch_size.clamp(1, MAX_BATCH_SIZE);

        let (batch_tx, mut batch_rx) = mpsc::channel::<Vec<Vec<SqlValue>>>(1);
        let (ack_tx, mut ack_rx) = mpsc::channel::<()>(1);

        let source_pool = self.source.clone();
        let producer = tokio::spawn(async move {
            let mut conn = source_pool
                .get()
                .await
                .map_err(|e| SyncError::Pool(e.to_string()))?;
            let mut stream = conn.query(select_sql, &[]).await?;
            let mut batcher = Batcher::new(batch_size);
            let mut read = 0u64;

            while let Some(item) = stream.try_next().await? {
                if let QueryItem::Row(row) = item {
                    read += 1;
                    let values: Vec<SqlValue> =
                        row.into_iter().map(SqlValue::from_column_data).collect();
                    if let Some(batch) = batcher.push(values) {
                        if batch_tx.send(batch).await.is_err() {
                            // Consumer gave up; dropping the stream cancels
                            // the cursor.
                            return Ok(read);
                        }
                        if ack_rx.recv().await.is_none() {
                            return Ok(read);
                        }
                    }
                }
            }

            if let Some(batch) = batcher.take_remainder() {
                let _ = batch_tx.send(batch).await;
            }
            Ok::<u64, SyncError>(read)
        });

        let mut target_conn = self
            .target
            .get()
            .await
            .map_err(|e| SyncError::Pool(e.to_string()))?;

        let toggle_identity = meta.has_identity();
        if toggle_identity {
            mssql::exec_batch(
                &mut target_conn,
                &format!("SET IDENTITY_INSERT {} ON", qualified),
            )
            .await?;
        }

        let mut copied = 0u64;
        let mut batches = 0u64;
        let mut flush_error: Option<SyncError> = None;

        while let Some(batch) = batch_rx.recv().await {
            let statement = build_batch_insert(&insert_prefix, &batch);
            match mssql::exec_batch(&mut target_conn, &statement).await {
                Ok(()) => {
                    copied += batch.len() as u64;
                    batches += 1;
                    let _ = ack_tx.send(()).await;
                }
                Err(err) => {
                    flush_error = Some(err);
                    break;
                }
            }
        }

        // Unblock and retire the producer before touching session state.
        drop(batch_rx);
        drop(ack_tx);
        let produced = producer
            .await
            .map_err(|e| SyncError::Db(format!("source stream task failed: {}", e)));

        if toggle_identity {
            // Always restore the session default, error or not.
            if let Err(off_err) = mssql::exec_batch(
                &mut target_conn,
                &format!("SET IDENTITY_INSERT {} OFF", qualified),
            )
            .await
            {
                tracing::warn!(error = %off_err, "failed to disable IDENTITY_INSERT");
            }
        }

        if let Some(err) = flush_error {
            return Err(err);
        }
        produced??;

        Ok((copied, batches))
    }
}

// --- Pure Helpers ---

/// Accumulates rows and emits a full batch once capacity is reached.
pub(crate) struct Batcher<T> {
    capacity: usize,
    rows: Vec<T>,
}

impl<T> Batcher<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rows: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, row: T) -> Option<Vec<T>> {
        self.rows.push(row);
        if self.rows.len() >= self.capacity {
            Some(std::mem::take(&mut self.rows))
        } else {
            None
        }
    }

    pub(crate) fn take_remainder(&mut self) -> Option<Vec<T>> {
        if self.rows.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.rows))
        }
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.rows.len()
    }
}

pub fn should_skip_copy(source_rows: i64, target_rows: i64) -> bool {
    source_rows == target_rows
}

pub fn split_table_name(table: &str) -> (&str, &str) {
    match table.find('.') {
        Some(pos) => (&table[..pos], &table[pos + 1..]),
        None => ("dbo", table),
    }
}

pub fn count_from_result(results: &[QueryResult]) -> SyncResult<i64> {
    results
        .first()
        .and_then(|set| set.rows.first())
        .and_then(|row| row.first())
        .and_then(|value| value.as_i64())
        .ok_or_else(|| SyncError::Db("count query returned no value".to_string()))
}

pub async fn row_count(pool: &Pool, qualified_table: &str) -> SyncResult<i64> {
    let query = format!("SELECT COUNT_BIG(*) AS cnt FROM {}", qualified_table);
    let results = mssql::execute_query(pool, query).await?;
    count_from_result(&results)
}

/// One multi-row INSERT statement for a flushed batch.
pub fn build_batch_insert(insert_prefix: &str, batch: &[Vec<SqlValue>]) -> String {
    let rows = batch
        .iter()
        .map(|row| {
            let values = row
                .iter()
                .map(render_literal)
                .collect::<Vec<String>>()
                .join(", ");
            format!("({})", values)
        })
        .collect::<Vec<String>>()
        .join(",\n");

    format!("{}{}", insert_prefix, rows)
}

// --- DDL Rendering ---

/// Rebuilds the source table definition: sized types keep their character
/// counts, identity specs and computed expressions are reproduced verbatim.
pub fn render_create_table(schema: &str, table: &str, meta: &TableMetadata) -> String {
    let mut defs = Vec::with_capacity(meta.columns.len());

    for column in &meta.columns {
        if column.is_computed {
            if let Some(expr) = &column.computed_definition {
                defs.push(format!("    {} AS {}", quote_identifier(&column.name), expr));
                continue;
            }
        }

        let mut def = format!(
            "    {} {}",
            quote_identifier(&column.name),
            render_type(column)
        );

        if column.is_identity {
            def.push_str(&format!(
                " IDENTITY({},{})",
                column.identity_seed.unwrap_or(1),
                column.identity_increment.unwrap_or(1)
            ));
        }

        if !column.is_nullable {
            def.push_str(" NOT NULL");
        }

        if let Some(default) = &column.default_expression {
            def.push_str(&format!(" DEFAULT {}", default));
        }

        defs.push(def);
    }

    format!(
        "CREATE TABLE {} (\n{}\n)",
        qualified_table_name(schema, table),
        defs.join(",\n")
    )
}

pub fn render_type(column: &ColumnMeta) -> String {
    let name = column.type_lower();
    match name.as_str() {
        "varchar" | "char" | "varbinary" | "binary" => match column.max_length {
            Some(-1) => format!("{}(MAX)", name),
            Some(n) => format!("{}({})", name, n),
            None => name,
        },
        // UTF-16 types declare character counts, not the byte length the
        // catalog reports.
        "nvarchar" | "nchar" => match column.max_length {
            Some(-1) => format!("{}(MAX)", name),
            Some(n) => format!("{}({})", name, n / 2),
            None => name,
        },
        "decimal" | "numeric" => format!(
            "{}({},{})",
            name,
            column.precision.unwrap_or(18),
            column.scale.unwrap_or(0)
        ),
        "datetime2" | "time" | "datetimeoffset" => match column.scale {
            Some(s) => format!("{}({})", name, s),
            None => name,
        },
        "timestamp" => "rowversion".to_string(),
        _ => name,
    }
}
