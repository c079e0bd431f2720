//! Strata command-line interface.
//!
//! Inspects and maintains Strata stores.
//!
//! # Usage
//!
//! ```bash
//! # List collections
//! strata -d corpus.db collections
//!
//! # Show the layers of a collection
//! strata -d corpus.db info news
//!
//! # Print matching documents as JSON lines
//! strata -d corpus.db -o json select news --where words.normal=dog --limit 10
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod formatter;

use commands::{ExportArgs, SelectArgs};
use config::CliConfig;
use formatter::{format_rows, OutputFormat};
use strata_store::Storage;

/// Strata command-line interface
#[derive(Parser, Debug)]
#[command(
    name = "strata",
    author = "Strata Team",
    version,
    about = "Inspect and maintain Strata document stores"
)]
struct Args {
    /// Database file
    #[arg(short = 'd', long, env = "STRATA_DATABASE", value_name = "FILE")]
    database: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long, value_enum)]
    output: Option<OutputFormatArg>,

    /// Enable verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Configuration file path
    #[arg(long, value_name = "FILE", env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List collections
    Collections,

    /// Create a collection
    Create {
        /// Collection name
        name: String,
        /// Meta column as name:type, repeatable
        #[arg(long = "meta", value_name = "NAME:TYPE")]
        meta: Vec<String>,
        /// Storage version, e.g. 4.0
        #[arg(long = "collection-version")]
        version: Option<String>,
        /// Description
        #[arg(long)]
        description: Option<String>,
    },

    /// Drop a collection with all its layers
    Drop {
        /// Collection name
        name: String,
    },

    /// Show the layer structure of a collection
    Info {
        /// Collection name
        collection: String,
    },

    /// Count documents
    Count {
        /// Collection name
        collection: String,
        /// Filter as layer.attribute=value, repeatable
        #[arg(long = "where", value_name = "FILTER")]
        filters: Vec<String>,
    },

    /// Print documents with their layers
    Select {
        /// Collection name
        collection: String,
        /// Detached layer to attach, repeatable
        #[arg(short = 'l', long = "layer")]
        layers: Vec<String>,
        /// Comma-separated document ids
        #[arg(long)]
        ids: Option<String>,
        /// Filter as layer.attribute=value, repeatable
        #[arg(long = "where", value_name = "FILTER")]
        filters: Vec<String>,
        /// Maximal number of documents
        #[arg(long)]
        limit: Option<u64>,
        /// Skip documents lacking a requested sparse layer
        #[arg(long)]
        only_annotated: bool,
    },

    /// Delete a detached or fragmented layer
    DeleteLayer {
        /// Collection name
        collection: String,
        /// Layer name
        layer: String,
        /// Also delete layers depending on it
        #[arg(long)]
        cascade: bool,
    },

    /// Export a layer into a flat table
    ExportLayer {
        /// Collection name
        collection: String,
        /// Layer name
        layer: String,
        /// Target table
        #[arg(long)]
        table: Option<String>,
        /// Attribute to export, repeatable; all by default
        #[arg(long = "attribute")]
        attributes: Vec<String>,
        /// Collection meta column to copy, repeatable
        #[arg(long = "meta")]
        meta: Vec<String>,
        /// Filter as layer.attribute=value, repeatable
        #[arg(long = "where", value_name = "FILTER")]
        filters: Vec<String>,
        /// Append to an existing table
        #[arg(long)]
        append: bool,
    },
}

/// Output format argument
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormatArg {
    /// Display results in a formatted table
    Table,
    /// Display results as JSON lines
    Json,
    /// Display results as CSV
    Csv,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Table => OutputFormat::Table,
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::Csv => OutputFormat::Csv,
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(&args)?;
    let format = match args.output {
        Some(arg) => arg.into(),
        None => config.output_format.parse()?,
    };
    let path = args
        .database
        .clone()
        .or_else(|| config.database.clone())
        .context("no database given, use --database or set `database` in the config file")?;

    debug!(path = %path.display(), "opening store");
    let storage = Storage::open(&path, config.store.clone())
        .with_context(|| format!("cannot open {}", path.display()))?;

    let rows = execute(&storage, args.command)?;
    print!("{}", format_rows(&rows, format));
    if format == OutputFormat::Table {
        println!();
    }
    Ok(())
}

fn execute(storage: &Storage, command: Command) -> Result<formatter::Rows> {
    match command {
        Command::Collections => commands::collections(storage),
        Command::Create {
            name,
            meta,
            version,
            description,
        } => {
            info!(collection = %name, "creating collection");
            commands::create(storage, &name, &meta, version.as_deref(), description.as_deref())
        }
        Command::Drop { name } => {
            info!(collection = %name, "dropping collection");
            commands::drop_collection(storage, &name)
        }
        Command::Info { collection } => commands::info(storage, &collection),
        Command::Count { collection, filters } => commands::count(storage, &collection, &filters),
        Command::Select {
            collection,
            layers,
            ids,
            filters,
            limit,
            only_annotated,
        } => {
            let args = SelectArgs {
                layers,
                ids: ids.as_deref().map(commands::parse_ids).transpose()?.unwrap_or_default(),
                filters,
                limit,
                only_annotated,
            };
            commands::select(storage, &collection, &args)
        }
        Command::DeleteLayer {
            collection,
            layer,
            cascade,
        } => commands::delete_layer(storage, &collection, &layer, cascade),
        Command::ExportLayer {
            collection,
            layer,
            table,
            attributes,
            meta,
            filters,
            append,
        } => {
            let args = ExportArgs {
                table,
                attributes,
                meta,
                filters,
                append,
            };
            commands::export_layer(storage, &collection, &layer, &args)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("strata_cli=debug,strata_store=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strata_cli=warn,strata_store=warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn load_config(args: &Args) -> Result<CliConfig> {
    match &args.config {
        Some(path) => CliConfig::from_file(path),
        None => CliConfig::load_default(),
    }
}
