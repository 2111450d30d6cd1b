mod app;
mod commands;
mod context;
mod utils;
mod formatters;
mod repl;

use anyhow::Result;
use clap::Parser;
use log::info;

fn main() -> Result<()> {
    let cli = app::Cli::parse();
    app::init_logging(cli.verbose);

    info!("qodata-cli starting");
    let result = app::run(cli);
    info!("qodata-cli done");

    result
}
