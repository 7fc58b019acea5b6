use clap::Parser;

use c3c::cli::{Cli, Commands};
use c3c::driver;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    simple_logger::SimpleLogger::new()
        .with_level(cli.verbosity.into())
        .init()
        .expect("failed to install logger");

    match cli.command {
        Commands::Build(args) => driver::run(args.into()),
    }
}
