use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hivesync::bulk_copy::BulkTableCopier;
use hivesync::catalog::MetadataCatalog;
use hivesync::config::SyncConfig;
use hivesync::error::SyncError;
use hivesync::project::ProjectInserter;
use hivesync::queue::QueueConsumer;
use hivesync::{mssql, push, supabase};

#[derive(Parser)]
#[command(name = "hivesync", version, about = "ERP <-> Supabase project sync and database cloning")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume pending project requests from the cloud queue
    Consume {
        /// Drain one page and exit instead of polling
        #[arg(long)]
        once: bool,
    },
    /// Push ERP project rows into the cloud mirror table
    Push {
        /// Only rows edited at or after this timestamp (YYYY-MM-DD or ISO)
        #[arg(long)]
        since: Option<String>,
    },
    /// Clone the ERP database into the configured clone target
    Clone {
        /// Restrict the clone to specific tables (schema.table)
        #[arg(long = "table")]
        tables: Vec<String>,
    },
    /// Print a table's resolved column metadata as JSON
    Inspect { table: String },
    /// Smoke-test both database connections
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hivesync=info,warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;

    match cli.command {
        Commands::Consume { once } => consume(&config, once).await?,
        Commands::Push { since } => run_push(&config, since.as_deref()).await?,
        Commands::Clone { tables } => run_clone(&config, &tables).await?,
        Commands::Inspect { table } => inspect(&config, &table).await?,
        Commands::Check => check(&config).await?,
    }

    Ok(())
}

async fn consume(config: &SyncConfig, once: bool) -> Result<()> {
    let erp_pool = mssql::create_pool(&config.erp)?;
    let supabase_pool = supabase::create_pool(&config.supabase).await?;
    let catalog = MetadataCatalog::new(erp_pool, &config.tables.schema);

    let consumer = QueueConsumer {
        supabase: &supabase_pool,
        inserter: ProjectInserter {
            catalog: &catalog,
            tables: &config.tables,
            strategy: &config.strategy,
        },
        queue_table: &config.queue.table,
        page_size: config.queue.page_size,
        poll_interval: std::time::Duration::from_secs(config.queue.poll_interval_secs),
    };

    consumer.run(once).await?;
    Ok(())
}

async fn run_push(config: &SyncConfig, since: Option<&str>) -> Result<()> {
    let since = since.map(parse_since).transpose()?;
    let erp_pool = mssql::create_pool(&config.erp)?;
    let supabase_pool = supabase::create_pool(&config.supabase).await?;

    let report = push::push_projects(
        &erp_pool,
        &supabase_pool,
        &config.tables,
        &config.push.mirror_table,
        since,
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_clone(config: &SyncConfig, tables: &[String]) -> Result<()> {
    let target = config.clone_target.as_ref().ok_or_else(|| {
        SyncError::Config("HIVESYNC_CLONE_HOST is not set; clone needs a target instance".to_string())
    })?;

    let source_pool = mssql::create_pool(&config.erp)?;
    let target_pool = mssql::create_pool(target)?;
    let copier = BulkTableCopier::new(source_pool, target_pool, config.copy.clone());

    let reports = if tables.is_empty() {
        copier.copy_database().await?
    } else {
        copier.copy_tables(tables).await?
    };

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

async fn inspect(config: &SyncConfig, table: &str) -> Result<()> {
    let erp_pool = mssql::create_pool(&config.erp)?;
    let catalog = MetadataCatalog::new(erp_pool, &config.tables.schema);
    let meta = catalog.get_columns(table).await?;

    println!("{}", serde_json::to_string_pretty(&meta.columns)?);
    Ok(())
}

async fn check(config: &SyncConfig) -> Result<()> {
    println!("{}", mssql::test_connection(&config.erp).await?);
    println!("{}", supabase::test_connection(&config.supabase).await?);
    Ok(())
}

fn parse_since(raw: &str) -> Result<chrono::NaiveDateTime> {
    let trimmed = raw.trim();
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN));
    }
    anyhow::bail!("'{}' is not a date (expected YYYY-MM-DD or ISO timestamp)", raw)
}
