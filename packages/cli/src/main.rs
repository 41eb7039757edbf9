mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{check, compact, expand, format, CheckArgs, CompactArgs, ExpandArgs, FormatArgs};

/// Folio CLI - report definition tooling
#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Strip default values from a report
    Compact(CompactArgs),

    /// Restore default values stripped by compact
    Expand(ExpandArgs),

    /// Reformat every expression in a report
    Format(FormatArgs),

    /// Report expressions that do not parse
    Check(CheckArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir.display().to_string(),
        Err(err) => {
            eprintln!("{} Cannot get current directory: {}", "Error:".red().bold(), err);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Compact(args) => compact(args, &cwd),
        Command::Expand(args) => expand(args, &cwd),
        Command::Format(args) => format(args, &cwd),
        Command::Check(args) => check(args, &cwd),
    };

    if let Err(err) = result {
        eprintln!();
        eprintln!("{} {:#}", "Error:".red().bold(), err);
        eprintln!();
        std::process::exit(1);
    }
}
