// =====================================================
// SUPABASE (POSTGRESQL) OPERATIONS
// =====================================================
//
// The cloud side of the sync: the project request queue this service
// consumes, and the mirror table it pushes ERP project rows into. Supabase
// is reached over its Postgres interface; the realtime/HTTP layers live in
// external collaborators.

use crate::db_types::ConnectionConfig;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, Pool, Postgres, Row};

const UPSERT_CHUNK_SIZE: usize = 500;

// --- Connection ---

fn connect_options(config: &ConnectionConfig) -> PgConnectOptions {
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.username);

    if let Some(pwd) = &config.password {
        options = options.password(pwd);
    }

    if let Some(db) = &config.database {
        if !db.is_empty() {
            options = options.database(db);
        }
    }

    if let Some(ssl) = &config.ssl_mode {
        options = match ssl.as_str() {
            "disable" => options.ssl_mode(sqlx::postgres::PgSslMode::Disable),
            "prefer" => options.ssl_mode(sqlx::postgres::PgSslMode::Prefer),
            "require" => options.ssl_mode(sqlx::postgres::PgSslMode::Require),
            _ => options,
        };
    }

    options.log_statements(log::LevelFilter::Debug)
}

pub async fn test_connection(config: &ConnectionConfig) -> SyncResult<String> {
    let mut conn = connect_options(config).connect().await.map_err(|e| {
        let err_msg = e.to_string();
        if err_msg.contains("connection refused") {
            return SyncError::Db(format!(
                "Connection refused: check if PostgreSQL is reachable on {}:{}",
                config.host, config.port
            ));
        }
        SyncError::Db(format!("Connection failed: {}", e))
    })?;

    let _ = sqlx::query("SELECT 1")
        .fetch_one(&mut conn)
        .await
        .map_err(|e| SyncError::Db(format!("Query failed: {}", e)))?;

    Ok("PostgreSQL connection successful! Handshake verified.".to_string())
}

pub async fn create_pool(config: &ConnectionConfig) -> SyncResult<Pool<Postgres>> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .idle_timeout(std::time::Duration::from_secs(300))
        .max_lifetime(std::time::Duration::from_secs(1800))
        .connect_with(connect_options(config))
        .await
        .map_err(|e| SyncError::Pool(format!("Failed to create pool: {}", e)))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// --- Queue Items ---

/// One row of the cloud-resident request queue. The queue collaborator owns
/// the table; this service only reads pending rows and writes status
/// transitions back.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: i64,
    pub payload: Value,
    pub attempt_count: i32,
}

pub async fn fetch_pending(
    pool: &Pool<Postgres>,
    table: &str,
    limit: i64,
) -> SyncResult<Vec<QueueItem>> {
    let sql = format!(
        "SELECT id, payload, attempt_count FROM {} \
         WHERE status = 'pending' ORDER BY created_at ASC LIMIT $1",
        quote_identifier(table)
    );

    let rows = sqlx::query(&sql)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(|e| SyncError::Queue(format!("failed to fetch pending items: {}", e)))?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(QueueItem {
            id: row
                .try_get::<i64, _>("id")
                .map_err(|e| SyncError::Queue(e.to_string()))?,
            payload: row
                .try_get::<Value, _>("payload")
                .map_err(|e| SyncError::Queue(e.to_string()))?,
            attempt_count: row.try_get::<i32, _>("attempt_count").unwrap_or(0),
        });
    }

    Ok(items)
}

/// Claims a pending item. Returns false when another consumer already took
/// it (two pollers can interleave; the status guard keeps them from
/// processing the same item twice).
pub async fn mark_processing(pool: &Pool<Postgres>, table: &str, id: i64) -> SyncResult<bool> {
    let sql = format!(
        "UPDATE {} SET status = 'processing', attempt_count = attempt_count + 1 \
         WHERE id = $1 AND status = 'pending'",
        quote_identifier(table)
    );

    let result = sqlx::query(&sql)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| SyncError::Queue(e.to_string()))?;

    Ok(result.rows_affected() > 0)
}

pub async fn mark_done(pool: &Pool<Postgres>, table: &str, id: i64) -> SyncResult<()> {
    let sql = format!(
        "UPDATE {} SET status = 'done', processed_at = now(), error = NULL WHERE id = $1",
        quote_identifier(table)
    );

    sqlx::query(&sql)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| SyncError::Queue(e.to_string()))?;
    Ok(())
}

pub async fn mark_error(
    pool: &Pool<Postgres>,
    table: &str,
    id: i64,
    message: &str,
) -> SyncResult<()> {
    let sql = format!(
        "UPDATE {} SET status = 'error', processed_at = now(), error = $2 WHERE id = $1",
        quote_identifier(table)
    );

    sqlx::query(&sql)
        .bind(id)
        .bind(message)
        .execute(pool)
        .await
        .map_err(|e| SyncError::Queue(e.to_string()))?;
    Ok(())
}

// --- Project Mirror Upsert ---

/// One ERP project row headed for the cloud mirror table.
#[derive(Debug, Clone)]
pub struct MirrorRow {
    pub projnr: String,
    pub payload: Value,
    pub erp_edited_at: Option<DateTime<Utc>>,
}

/// Bulk-merges project rows into the mirror table. Existing rows are
/// overwritten; the project number is the conflict key.
pub async fn upsert_projects(
    pool: &Pool<Postgres>,
    table: &str,
    rows: &[MirrorRow],
) -> SyncResult<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut written = 0u64;

    for chunk in rows.chunks(UPSERT_CHUNK_SIZE) {
        let mut builder = sqlx::QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {} (projnr, payload, erp_edited_at) ",
            quote_identifier(table)
        ));

        builder.push_values(chunk, |mut b, row| {
            b.push_bind(&row.projnr)
                .push_bind(&row.payload)
                .push_bind(row.erp_edited_at);
        });

        builder.push(
            " ON CONFLICT (projnr) DO UPDATE SET \
             payload = EXCLUDED.payload, \
             erp_edited_at = EXCLUDED.erp_edited_at, \
             synced_at = now()",
        );

        let result = builder
            .build()
            .execute(pool)
            .await
            .map_err(|e| SyncError::Db(format!("mirror upsert failed: {}", e)))?;
        written += result.rows_affected();
    }

    Ok(written)
}
