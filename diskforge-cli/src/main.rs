//! Entry point for the diskforge command-line front-end.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    diskforge::util::init_logging(&cli.global.log_level);

    match cli.command {
        Commands::Build(args) => commands::build::execute(args, &cli.global),
        Commands::Teardown(args) => commands::teardown::execute(args, &cli.global),
        Commands::Partuuid(args) => commands::partuuid::execute(args, &cli.global),
    }
}
