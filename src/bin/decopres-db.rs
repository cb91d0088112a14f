use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde_json::Value as JsonValue;
use tracing_subscriber::EnvFilter;

use decopres_db::sqlite::config::JournalMode;
use decopres_db::{BackupOptions, Connection, DbError, OpenOptions, Params, Row, Target};

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect, query and back up a decopres database")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct DbArgs {
    /// Database file, or :memory:
    database: String,
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
    #[arg(long, value_enum)]
    journal_mode: Option<JournalMode>,
}

impl DbArgs {
    fn open(&self, readonly: bool) -> Result<Connection, DbError> {
        let mut builder = OpenOptions::builder()
            .readonly(readonly)
            .file_must_exist(true)
            .timeout_ms(self.timeout_ms);
        if let Some(mode) = self.journal_mode {
            builder = builder.journal_mode(mode);
        }
        Connection::open(Target::parse(&self.database), builder.finish())
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy the database to a file with the stepped online backup
    Backup {
        #[command(flatten)]
        db: DbArgs,
        destination: PathBuf,
        #[arg(long, default_value = "main")]
        attachment: String,
        #[arg(long)]
        step_pages: Option<u32>,
    },
    /// Write a serialized snapshot of the database to a file
    Serialize {
        #[command(flatten)]
        db: DbArgs,
        output: PathBuf,
        #[arg(long, default_value = "main")]
        attachment: String,
    },
    /// Replace the database with a backup file
    Restore {
        #[command(flatten)]
        db: DbArgs,
        source: PathBuf,
    },
    /// Run SQL statements that return no rows
    Exec {
        #[command(flatten)]
        db: DbArgs,
        sql: String,
    },
    /// Run one query and print its rows as JSON
    Query {
        #[command(flatten)]
        db: DbArgs,
        sql: String,
        /// Positional parameter; parsed as JSON, otherwise taken as text
        #[arg(long = "param")]
        params: Vec<String>,
        #[arg(long)]
        safe_integers: bool,
    },
    /// Run PRAGMA integrity_check and foreign_key_check
    Check {
        #[command(flatten)]
        db: DbArgs,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), DbError> {
    match cli.command {
        Command::Backup {
            db,
            destination,
            attachment,
            step_pages,
        } => {
            let conn = db.open(true)?;
            let mut options = BackupOptions::new().attachment(attachment);
            if let Some(pages) = step_pages {
                options = options.step_pages(pages);
            }
            let options = options.on_progress(|progress| {
                tracing::info!(
                    copied = progress.copied_pages(),
                    total = progress.total_pages,
                    "backup progress"
                );
                None
            });
            let done = conn.backup_to(&destination, options).await?;
            println!("{}", serde_json::to_string(&done)?);
        }
        Command::Serialize {
            db,
            output,
            attachment,
        } => {
            let conn = db.open(true)?;
            let bytes = conn.serialize(&attachment)?;
            tokio::fs::write(&output, &bytes).await?;
            println!("{} bytes written to {}", bytes.len(), output.display());
        }
        Command::Restore { db, source } => {
            let mut conn = db.open(false)?;
            conn.restore_from(&source)?;
            println!("restored {} from {}", db.database, source.display());
        }
        Command::Exec { db, sql } => {
            let conn = db.open(false)?;
            conn.execute(&sql)?;
        }
        Command::Query {
            db,
            sql,
            params,
            safe_integers,
        } => {
            let conn = db.open(false)?;
            let args: Vec<JsonValue> = params
                .iter()
                .map(|raw| {
                    serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.clone()))
                })
                .collect();
            let mut stmt = conn.prepare(&sql)?;
            stmt.safe_integers(safe_integers);
            let params = Params::from_json(&args)?;
            let output = if stmt.is_reader() {
                let rows = stmt.all(params)?;
                JsonValue::Array(rows.iter().map(Row::to_json).collect())
            } else {
                serde_json::to_value(stmt.run(params)?)?
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Check { db } => {
            let conn = db.open(true)?;
            let integrity = conn.pragma("integrity_check")?;
            let foreign_keys = conn.pragma("foreign_key_check")?;
            let report = serde_json::json!({
                "integrity": integrity.iter().map(Row::to_json).collect::<Vec<_>>(),
                "foreignKeyViolations": foreign_keys.iter().map(Row::to_json).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
