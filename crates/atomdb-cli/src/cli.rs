use atomdb::db::BackendType;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "adb - query, inspect and annotate a database of atomic structures.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Read defaults from a TOML configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the records matching a selection.
    Query(QueryArgs),
    /// Print a single record in full.
    Show(ShowArgs),
    /// Add keywords and key-value pairs to every record matching a selection.
    Update(UpdateArgs),
}

/// Where the database lives and how to open it.
#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// Database name: a `.json` or `.db` file
    #[arg(value_name = "DB")]
    pub name: String,

    /// Backend to use instead of inferring it from the name
    #[arg(long, value_name = "TYPE", value_parser = parse_backend)]
    pub backend: Option<BackendType>,

    /// Serialize writes through a `<DB>.lock` file
    #[arg(long)]
    pub use_lock_file: bool,

    /// Do not create the search indices when a new SQLite database is made
    #[arg(long)]
    pub no_indices: bool,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[command(flatten)]
    pub database: DatabaseArgs,

    /// Selection, e.g. 'relaxed,H>1,age<2d' (omit to list everything)
    #[arg(value_name = "SELECTION")]
    pub selection: Option<String>,

    /// Print at most this many records
    #[arg(short = 'n', long, value_name = "NUM")]
    pub limit: Option<usize>,

    /// Log how the backend plans the search
    #[arg(long)]
    pub explain: bool,

    /// Also print keywords and key-value pairs
    #[arg(short, long)]
    pub long: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[command(flatten)]
    pub database: DatabaseArgs,

    /// Selection matching exactly one record (an id works)
    #[arg(value_name = "SELECTION")]
    pub selection: String,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub database: DatabaseArgs,

    /// Selection of the records to update
    #[arg(value_name = "SELECTION")]
    pub selection: String,

    /// Keyword to add (repeatable)
    #[arg(short = 'k', long = "add-keyword", value_name = "KEYWORD")]
    pub add_keywords: Vec<String>,

    /// Key-value pair to add or overwrite (repeatable)
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,
}

fn parse_backend(s: &str) -> Result<BackendType, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}
