use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use bulkmodel::bulk::chunker;
use bulkmodel::bulk::runner::{Job, JobRunner};
use bulkmodel::{BulkConfig, ColumnKind, FieldValue, Persistence, PgStore, StoreConfig, TableSchema};

#[derive(Parser, Debug)]
#[command(
    name = "bulkctl",
    about = "Bulk load and unload PostgreSQL tables with COPY"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the database in DATABASE_URL is reachable.
    Ping,

    /// Write the given columns of every row as tab-separated text.
    Export {
        #[arg(long)]
        table: String,

        /// Comma-separated column list, in output order.
        #[arg(long, value_delimiter = ',', required = true)]
        columns: Vec<String>,

        /// Destination file; stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Load tab-separated text (one row per line, `\N` for null).
    Import {
        #[arg(long)]
        table: String,

        /// Comma-separated column list matching the input fields.
        #[arg(long, value_delimiter = ',', required = true)]
        columns: Vec<String>,

        /// Source file; stdin when omitted.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Lines per COPY statement; the whole input in one statement when omitted.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Load chunks on parallel connections.
        #[arg(long)]
        concurrent: bool,
    },
}

fn schema_for(table: &str, columns: &[String]) -> TableSchema {
    columns.iter().fold(TableSchema::new(table), |schema, column| {
        schema.column(column.clone(), ColumnKind::Text, FieldValue::Null)
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    bulkmodel::init_logger();

    let args = Args::parse();
    let store = PgStore::connect(&StoreConfig::from_env())?;

    match args.command {
        Command::Ping => {
            store.ping()?;
            println!("ok");
        }
        Command::Export {
            table,
            columns,
            output,
        } => {
            let payload = store.copy_out(&schema_for(&table, &columns), &columns)?;
            match output {
                Some(path) => fs::write(&path, payload)?,
                None => io::stdout().write_all(payload.as_bytes())?,
            }
        }
        Command::Import {
            table,
            columns,
            file,
            batch_size,
            concurrent,
        } => {
            let input = match file {
                Some(path) => fs::read_to_string(path)?,
                None => {
                    let mut buffer = String::new();
                    io::stdin().read_to_string(&mut buffer)?;
                    buffer
                }
            };

            let schema = schema_for(&table, &columns);
            let lines: Vec<&str> = input.lines().filter(|line| !line.is_empty()).collect();
            let config = BulkConfig::from_env();
            let setting = config.worker_setting(None);
            let chunks = chunker::chunk(&lines, batch_size, Some(setting))?;

            let jobs: Vec<Job<'_, u64>> = chunks
                .into_iter()
                .filter(|chunk| !chunk.is_empty())
                .enumerate()
                .map(|(index, chunk)| {
                    let (store, schema, columns) = (&store, &schema, &columns);
                    Job::new(index, move || {
                        let mut payload = chunk.join("\n");
                        payload.push('\n');
                        store.copy_in(schema, columns, &payload)
                    })
                })
                .collect();

            let runner = if config.concurrent(concurrent) {
                JobRunner::concurrent(config.workers_for(jobs.len(), None))
            } else {
                JobRunner::sequential()
            };
            let loaded: u64 = runner
                .run(jobs)?
                .into_outputs(|rows| *rows)?
                .iter()
                .map(|output| output.value)
                .sum();

            log::info!("imported {} rows into {}", loaded, table);
            println!("{loaded}");
        }
    }

    Ok(())
}
