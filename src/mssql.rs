// =====================================================
// MSSQL SPECIFIC DATABASE OPERATIONS (via Tiberius)
// =====================================================

use crate::db_types::{ConnectionConfig, QueryResult};
use crate::error::{SyncError, SyncResult};
use deadpool_tiberius::Manager;
use futures::TryStreamExt;
use serde_json::Value;
use tiberius::{AuthMethod, Client, Config, QueryItem, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

pub type Pool = deadpool_tiberius::Pool;
pub type MssqlClient = Client<Compat<TcpStream>>;

const POOL_MAX_SIZE: usize = 10;

// --- Connection ---

pub async fn test_connection(config: &ConnectionConfig) -> SyncResult<String> {
    let mut tiberius_config = Config::new();
    tiberius_config.host(&config.host);
    tiberius_config.port(config.port);
    tiberius_config.authentication(AuthMethod::sql_server(
        &config.username,
        config.password.as_deref().unwrap_or(""),
    ));
    if config.trust_cert {
        tiberius_config.trust_cert();
    }

    if let Some(db) = &config.database {
        if !db.is_empty() {
            tiberius_config.database(db);
        }
    }

    let tcp = TcpStream::connect(tiberius_config.get_addr())
        .await
        .map_err(|e| SyncError::Db(e.to_string()))?;
    tcp.set_nodelay(true)
        .map_err(|e| SyncError::Db(e.to_string()))?;

    let mut client = Client::connect(tiberius_config, tcp.compat_write())
        .await
        .map_err(|e| SyncError::Db(e.to_string()))?;

    let _ = client.query("SELECT 1", &[]).await?;

    Ok("MSSQL connection successful! (Tiberius)".to_string())
}

pub fn create_pool(config: &ConnectionConfig) -> SyncResult<Pool> {
    let initial_db = config.database.as_deref().unwrap_or("master");

    let mut manager = Manager::new()
        .host(&config.host)
        .port(config.port)
        .authentication(AuthMethod::sql_server(
            &config.username,
            config.password.as_deref().unwrap_or(""),
        ))
        .database(initial_db)
        .max_size(POOL_MAX_SIZE);

    if config.trust_cert {
        manager = manager.trust_cert();
    }

    manager
        .create_pool()
        .map_err(|e| SyncError::Pool(e.to_string()))
}

// --- Query Execution (untyped JSON rows) ---

pub async fn execute_query(pool: &Pool, query: String) -> SyncResult<Vec<QueryResult>> {
    let mut conn = pool.get().await.map_err(|e| SyncError::Pool(e.to_string()))?;

    let mut results = Vec::new();
    let mut stream = conn.query(query, &[]).await?;

    let mut current_rows = Vec::new();
    let mut current_columns = Vec::new();

    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Row(row) => {
                if current_columns.is_empty() {
                    current_columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                }

                let mut row_data = Vec::with_capacity(row.len());
                for i in 0..row.len() {
                    row_data.push(cell_to_json(&row, i));
                }
                current_rows.push(row_data);
            }
            QueryItem::Metadata(meta) => {
                if !current_rows.is_empty() || !current_columns.is_empty() {
                    results.push(QueryResult {
                        columns: current_columns.clone(),
                        rows: current_rows.clone(),
                    });
                    current_rows.clear();
                    current_columns.clear();
                }
                current_columns = meta.columns().iter().map(|c| c.name().to_string()).collect();
            }
        }
    }

    if !current_rows.is_empty() || !current_columns.is_empty() {
        results.push(QueryResult {
            columns: current_columns,
            rows: current_rows,
        });
    }

    if results.is_empty() {
        return Ok(vec![QueryResult {
            columns: vec![],
            rows: vec![],
        }]);
    }

    Ok(results)
}

fn cell_to_json(row: &tiberius::Row, i: usize) -> Value {
    if let Ok(Some(v)) = row.try_get::<i64, _>(i) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<i32, _>(i) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<i16, _>(i) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<u8, _>(i) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<f64, _>(i) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<f32, _>(i) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<bool, _>(i) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<&str, _>(i) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<tiberius::numeric::Numeric, _>(i) {
        match v.to_string().parse::<f64>() {
            Ok(n) => serde_json::json!(n),
            Err(_) => serde_json::json!(v.to_string()),
        }
    } else if let Ok(Some(v)) = row.try_get::<chrono::NaiveDateTime, _>(i) {
        serde_json::json!(v.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
    } else if let Ok(Some(v)) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(i) {
        serde_json::json!(v.to_rfc3339())
    } else if let Ok(Some(v)) = row.try_get::<chrono::NaiveDate, _>(i) {
        serde_json::json!(v.format("%Y-%m-%d").to_string())
    } else if let Ok(Some(v)) = row.try_get::<chrono::NaiveTime, _>(i) {
        serde_json::json!(v.format("%H:%M:%S%.3f").to_string())
    } else if let Ok(Some(v)) = row.try_get::<uuid::Uuid, _>(i) {
        serde_json::json!(v.to_string())
    } else if let Ok(Some(v)) = row.try_get::<&[u8], _>(i) {
        serde_json::json!(format!("0x{}", hex::encode(v)))
    } else {
        Value::Null
    }
}

// --- Parameterized Execution ---

pub async fn query_with(
    conn: &mut MssqlClient,
    sql: &str,
    params: &[&dyn ToSql],
) -> SyncResult<Vec<tiberius::Row>> {
    let stream = conn.query(sql, params).await?;
    Ok(stream.into_first_result().await?)
}

pub async fn execute_with(
    conn: &mut MssqlClient,
    sql: &str,
    params: &[&dyn ToSql],
) -> SyncResult<u64> {
    let result = conn.execute(sql, params).await?;
    Ok(result.rows_affected().iter().sum())
}

/// Runs a raw batch (DDL, SET options, transaction control) to completion.
pub async fn exec_batch(conn: &mut MssqlClient, sql: &str) -> SyncResult<()> {
    conn.simple_query(sql).await?.into_results().await?;
    Ok(())
}

// --- Transactions ---

pub async fn begin_tran(conn: &mut MssqlClient) -> SyncResult<()> {
    exec_batch(conn, "BEGIN TRANSACTION").await
}

pub async fn commit_tran(conn: &mut MssqlClient) -> SyncResult<()> {
    exec_batch(conn, "COMMIT TRANSACTION").await
}

pub async fn rollback_tran(conn: &mut MssqlClient) -> SyncResult<()> {
    exec_batch(conn, "ROLLBACK TRANSACTION").await
}

// --- Scalar Helpers ---

pub fn row_scalar_i64(row: &tiberius::Row) -> Option<i64> {
    if let Ok(Some(v)) = row.try_get::<i64, _>(0) {
        Some(v)
    } else if let Ok(Some(v)) = row.try_get::<i32, _>(0) {
        Some(v as i64)
    } else if let Ok(Some(v)) = row.try_get::<i16, _>(0) {
        Some(v as i64)
    } else {
        None
    }
}

pub async fn query_scalar_i64(
    conn: &mut MssqlClient,
    sql: &str,
    params: &[&dyn ToSql],
) -> SyncResult<Option<i64>> {
    let rows = query_with(conn, sql, params).await?;
    Ok(rows.first().and_then(row_scalar_i64))
}

pub async fn query_scalar_string(
    conn: &mut MssqlClient,
    sql: &str,
    params: &[&dyn ToSql],
) -> SyncResult<Option<String>> {
    let rows = query_with(conn, sql, params).await?;
    Ok(rows.first().and_then(|row| {
        row.try_get::<&str, _>(0)
            .ok()
            .flatten()
            .map(|s| s.to_string())
    }))
}

// --- Metadata Helpers ---

/// Lists user tables as "schema.table", mirroring the catalog views the
/// clone job enumerates.
pub async fn get_user_tables(pool: &Pool) -> SyncResult<Vec<String>> {
    let query = "SELECT s.name + '.' + t.name FROM sys.tables t \
                 INNER JOIN sys.schemas s ON t.schema_id = s.schema_id \
                 WHERE t.is_ms_shipped = 0 \
                 ORDER BY s.name, t.name";

    let res = execute_query(pool, query.to_string()).await?;
    if let Some(first) = res.first() {
        Ok(first
            .rows
            .iter()
            .filter_map(|r| r.first())
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect())
    } else {
        Ok(vec![])
    }
}
