use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;
use crate::context::Context;
use crate::formatters::OutputFormat;
use crate::repl::Repl;

#[derive(Parser)]
#[command(name = "qodata-cli")]
#[command(about = "Parse OData request URLs and compile them into query plans", long_about = None)]
pub struct Cli {
    /// Verbosity (-v debug, -vv trace); RUST_LOG overrides it
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Service description: engine settings and entity types (JSON)
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Rows for the in-memory executor (JSON, keyed by entity type)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the request descriptor of a URL
    Parse {
        url: String,
    },

    /// Print the query plan compiled for a URL
    Plan {
        url: String,
    },

    /// Compile a URL and run it against the loaded data
    Run {
        url: String,
    },

    /// List the entity sets of the loaded schema
    List,

    /// Interactive mode
    Repl,
}

pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

pub fn run(cli: Cli) -> Result<()> {
    let context = Context::load(cli.schema.as_deref(), cli.data.as_deref(), cli.format, !cli.no_color)?;

    match cli.command {
        Some(Commands::Parse { url }) => commands::parse::execute(&context, &url),
        Some(Commands::Plan { url }) => commands::plan::execute(&context, &url),
        Some(Commands::Run { url }) => commands::run::execute(&context, &url),
        Some(Commands::List) => commands::list::execute(&context),
        Some(Commands::Repl) | None => Repl::new(context)?.run(),
    }
}
