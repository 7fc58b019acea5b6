use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::driver::BuildOptions;

#[derive(Parser)]
#[command(name = "c3c", version, about = "C3 front-end compiler")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, value_enum, default_value = "info")]
    pub verbosity: LogLevel,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a single C3 source file.
    Build(BuildArgs),
}

#[derive(clap::Args)]
pub struct BuildArgs {
    /// Input source file.
    pub input: PathBuf,

    /// Output executable path. Without it, the compiler only parses, lowers,
    /// verifies, and prints the IR to stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub dump_tokens: bool,

    #[arg(long)]
    pub dump_ast: bool,

    #[arg(long)]
    pub dump_ir: bool,
}

impl From<BuildArgs> for BuildOptions {
    fn from(args: BuildArgs) -> Self {
        BuildOptions {
            input: args.input,
            output: args.output,
            dump_tokens: args.dump_tokens,
            dump_ast: args.dump_ast,
            dump_ir: args.dump_ir,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevel {
    #[value(alias("0"))]
    Error,
    #[value(alias("1"))]
    Warn,
    #[value(alias("2"))]
    Info,
    #[value(alias("3"))]
    Debug,
    #[value(alias("4"))]
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}
