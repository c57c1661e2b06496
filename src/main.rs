use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use cte_lineage::commands::config::read_config;
use cte_lineage::commands::extract::{batch_command, extract_command, ExtractRequest, QuerySource};

/// cte-lineage - table-level lineage for SQL queries with CTEs
#[derive(Parser)]
#[clap(name = "cte-lineage", about = "Table-level lineage for SQL queries with CTEs", version)]
struct Cli {
    /// Path to the configuration file (defaults to ./lineage.yaml when present)
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract the lineage tree of a single query
    Extract {
        /// SQL text to analyse
        #[clap(short, long, conflicts_with_all = ["query_file", "task_id"])]
        query: Option<String>,

        /// File containing the SQL to analyse
        #[clap(long, conflicts_with = "task_id")]
        query_file: Option<PathBuf>,

        /// Look the query and final table up in the rules file
        #[clap(short, long)]
        task_id: Option<String>,

        /// Rules file for --task-id (overrides rules_path from the config)
        #[clap(short, long)]
        rules: Option<PathBuf>,

        /// Label of the table the query produces
        #[clap(short = 'n', long)]
        final_table: Option<String>,

        /// Output format (json, text, dot)
        #[clap(short, long, default_value = "json")]
        format: String,

        /// Write the result to a file instead of stdout
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract lineage for every .sql file in a directory
    Batch {
        /// Directory containing SQL files; each file stem is the final table
        #[clap(short, long)]
        model_path: PathBuf,

        /// Output format (json, text, dot)
        #[clap(short, long, default_value = "json")]
        format: String,

        /// Write the result to a file instead of stdout
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let mut config = match read_config(cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Extract {
            query,
            query_file,
            task_id,
            rules,
            final_table,
            format,
            output,
        } => {
            let source = match (query, query_file, task_id) {
                (Some(query), _, _) => QuerySource::Text(query),
                (None, Some(path), _) => QuerySource::File(path),
                (None, None, Some(task_id)) => QuerySource::Task(task_id),
                (None, None, None) => {
                    eprintln!("Error: one of --query, --query-file or --task-id is required");
                    process::exit(2);
                }
            };

            if rules.is_some() {
                config.rules_path = rules;
            }

            let request = ExtractRequest {
                source,
                final_table,
                format,
                output,
            };
            extract_command(&request, &config)
        }
        Command::Batch {
            model_path,
            format,
            output,
        } => batch_command(&model_path, &format, output.as_deref(), &config),
        Command::Version => {
            println!("cte-lineage version {}", env!("CARGO_PKG_VERSION"));
            println!("Table-level lineage for SQL queries with CTEs");
            println!("Repository: {}", env!("CARGO_PKG_REPOSITORY"));
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("Error: {:#}", err);
        process::exit(1);
    }
}
