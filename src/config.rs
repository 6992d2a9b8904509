// =====================================================
// ENVIRONMENT CONFIGURATION
// =====================================================

use crate::bulk_copy::{CopyOptions, DEFAULT_BATCH_SIZE};
use crate::db_types::{ConnectionConfig, ErpTables};
use crate::error::{SyncError, SyncResult};
use crate::project::InsertStrategy;
use std::env;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub table: String,
    pub page_size: i64,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub mirror_table: String,
}

/// Runtime configuration, built from environment variables so operators can
/// tune deployments without rebuilding.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub erp: ConnectionConfig,
    pub supabase: ConnectionConfig,
    pub tables: ErpTables,
    pub queue: QueueConfig,
    pub push: PushConfig,
    pub strategy: InsertStrategy,
    pub copy: CopyOptions,
    /// Target instance for the clone command; optional because the sync
    /// commands never touch it.
    pub clone_target: Option<ConnectionConfig>,
}

impl SyncConfig {
    pub fn from_env() -> SyncResult<Self> {
        let erp = ConnectionConfig {
            host: required("HIVESYNC_ERP_HOST")?,
            port: parse_u16("HIVESYNC_ERP_PORT", 1433)?,
            username: required("HIVESYNC_ERP_USER")?,
            password: optional("HIVESYNC_ERP_PASSWORD"),
            database: Some(required("HIVESYNC_ERP_DATABASE")?),
            ssl_mode: None,
            schema: optional("HIVESYNC_ERP_SCHEMA"),
            trust_cert: parse_bool("HIVESYNC_ERP_TRUST_CERT", true)?,
        };

        let supabase = ConnectionConfig {
            host: required("HIVESYNC_SUPABASE_HOST")?,
            port: parse_u16("HIVESYNC_SUPABASE_PORT", 5432)?,
            username: required("HIVESYNC_SUPABASE_USER")?,
            password: optional("HIVESYNC_SUPABASE_PASSWORD"),
            database: Some(
                optional("HIVESYNC_SUPABASE_DATABASE").unwrap_or_else(|| "postgres".to_string()),
            ),
            ssl_mode: Some(optional("HIVESYNC_SUPABASE_SSL_MODE").unwrap_or_else(|| "require".to_string())),
            schema: None,
            trust_cert: false,
        };

        let tables = ErpTables {
            schema: optional("HIVESYNC_ERP_SCHEMA").unwrap_or_else(|| "dbo".to_string()),
            project: optional("HIVESYNC_PROJECT_TABLE").unwrap_or_else(|| "Projekt".to_string()),
            address: optional("HIVESYNC_ADDRESS_TABLE").unwrap_or_else(|| "Adresse".to_string()),
            location: optional("HIVESYNC_LOCATION_TABLE").unwrap_or_else(|| "Ort".to_string()),
        };

        let queue = QueueConfig {
            table: optional("HIVESYNC_QUEUE_TABLE").unwrap_or_else(|| "project_queue".to_string()),
            page_size: parse_i64("HIVESYNC_QUEUE_PAGE_SIZE", 25)?,
            poll_interval_secs: parse_u64("HIVESYNC_POLL_INTERVAL_SECS", 30)?,
        };

        let push = PushConfig {
            mirror_table: optional("HIVESYNC_MIRROR_TABLE")
                .unwrap_or_else(|| "erp_projects".to_string()),
        };

        let strategy = parse_strategy()?;

        let copy = CopyOptions {
            batch_size: parse_u64("HIVESYNC_COPY_BATCH_SIZE", DEFAULT_BATCH_SIZE as u64)? as usize,
            compare_row_counts: parse_bool("HIVESYNC_COPY_COMPARE_ROWCOUNTS", true)?,
            continue_on_error: parse_bool("HIVESYNC_COPY_CONTINUE_ON_ERROR", true)?,
        };

        let clone_target = match optional("HIVESYNC_CLONE_HOST") {
            Some(host) => Some(ConnectionConfig {
                host,
                port: parse_u16("HIVESYNC_CLONE_PORT", 1433)?,
                username: required("HIVESYNC_CLONE_USER")?,
                password: optional("HIVESYNC_CLONE_PASSWORD"),
                database: Some(required("HIVESYNC_CLONE_DATABASE")?),
                ssl_mode: None,
                schema: None,
                trust_cert: parse_bool("HIVESYNC_CLONE_TRUST_CERT", true)?,
            }),
            None => None,
        };

        Ok(Self {
            erp,
            supabase,
            tables,
            queue,
            push,
            strategy,
            copy,
            clone_target,
        })
    }
}

fn parse_strategy() -> SyncResult<InsertStrategy> {
    let raw = optional("HIVESYNC_PROJECT_STRATEGY").unwrap_or_else(|| "direct".to_string());
    match raw.trim().to_ascii_lowercase().as_str() {
        "direct" => Ok(InsertStrategy::Direct),
        "template" | "clone" => Ok(InsertStrategy::CloneFromTemplate {
            template: optional("HIVESYNC_TEMPLATE_PROJNR"),
        }),
        other => Err(SyncError::Config(format!(
            "HIVESYNC_PROJECT_STRATEGY must be 'direct' or 'template', got '{}'",
            other
        ))),
    }
}

fn required(name: &str) -> SyncResult<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SyncError::Config(format!("{} is not set", name)))
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_u16(name: &str, default: u16) -> SyncResult<u16> {
    parse_with(name, default, |raw| raw.parse::<u16>().ok())
}

fn parse_u64(name: &str, default: u64) -> SyncResult<u64> {
    parse_with(name, default, |raw| raw.parse::<u64>().ok())
}

fn parse_i64(name: &str, default: i64) -> SyncResult<i64> {
    parse_with(name, default, |raw| raw.parse::<i64>().ok())
}

fn parse_bool(name: &str, default: bool) -> SyncResult<bool> {
    parse_with(name, default, |raw| match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

fn parse_with<T>(name: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> SyncResult<T> {
    match optional(name) {
        None => Ok(default),
        Some(raw) => parse(&raw)
            .ok_or_else(|| SyncError::Config(format!("{} has an invalid value '{}'", name, raw))),
    }
}
