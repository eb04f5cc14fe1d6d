//! dbkit command line entry point.
//!
//! Registers the `--database` connections, runs one parameterized statement
//! and prints the result as JSON rows or an affected-row count.

use clap::Parser;
use dbkit::config::Config;
use dbkit::{Connection, ConnectionRegistry, ConnectionTarget, Record};
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Leading keywords of statements that return rows.
const ROW_STATEMENTS: &[&str] = &[
    "SELECT", "WITH", "PRAGMA", "SHOW", "EXPLAIN", "DESCRIBE", "DESC", "VALUES",
];

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn returns_rows(sql: &str) -> bool {
    let keyword = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    ROW_STATEMENTS.contains(&keyword.as_str())
}

async fn run(config: &Config, conn: &Connection) -> Result<(), Box<dyn std::error::Error>> {
    let bindings = config.parse_params()?;

    if returns_rows(&config.sql) {
        let rows: Vec<Record> = conn.all(&config.sql, &bindings).await?;
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        let affected = conn.execute(&config.sql, &bindings).await?;
        println!("{}", affected);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    if config.databases.is_empty() {
        eprintln!("Error: At least one database must be configured.");
        eprintln!();
        eprintln!("Usage: dbkit --database <url> [--param key=value]... <sql>");
        eprintln!("       dbkit --database <name>=<url> --connection <name> <sql>");
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  dbkit -d sqlite:blog.db 'SELECT * FROM posts'");
        eprintln!("  dbkit -d 'mysql://root@localhost/blog?prefix=wp_' -p id=1 'SELECT * FROM @posts WHERE id = :id'");
        eprintln!("  dbkit -d stats=postgres://app@localhost/stats -c stats 'DELETE FROM events'");
        return Err("no database configured".into());
    }

    let registry = Arc::new(ConnectionRegistry::new());
    for db in config.parse_databases()? {
        registry.add_connection(db.config, db.name.as_deref())?;
    }
    dbkit::set_connection_resolver(registry.clone());
    debug!(configured = ?registry.configured(), "Registered connections");

    let mut target = ConnectionTarget::new();
    target.set_name(config.connection.clone());
    let conn = target.connection().await?;
    info!(connection = %conn.name(), db_type = %conn.database_type(), "Running statement");

    if config.log_queries {
        conn.enable_query_log();
    }

    let result = run(&config, &conn).await;

    if config.log_queries {
        for entry in conn.query_log() {
            eprintln!(
                "[{}] {:.2}ms {} {}",
                entry.executed_at.to_rfc3339(),
                entry.elapsed_ms,
                entry.sql,
                entry.bindings
            );
        }
    }

    registry.close_all().await;
    dbkit::unset_connection_resolver();

    if let Err(e) = &result {
        error!(error = %e, "Statement failed");
    }
    result
}
