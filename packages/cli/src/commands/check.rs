use super::read_report;
use anyhow::{anyhow, Result};
use clap::Args;
use colored::Colorize;
use folio_editor::{parse_source, serializer, Path};
use folio_expr::ParseError;
use serde_json::json;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Report file (JSON or expression literal)
    pub input: PathBuf,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

/// Expressions in `report` that do not parse
pub fn invalid_expressions(report: &serde_json::Value) -> Vec<(Path, ParseError)> {
    serializer::expressions(report)
        .into_iter()
        .filter_map(|(path, source, mode)| parse_source(&source, mode).err().map(|error| (path, error)))
        .collect()
}

pub fn check(args: CheckArgs, _cwd: &str) -> Result<()> {
    let report = read_report(&args.input)?;
    let total = serializer::expressions(&report).len();
    let failures = invalid_expressions(&report);

    match args.format.as_str() {
        "json" => {
            let entries: Vec<_> = failures
                .iter()
                .map(|(path, error)| json!({ "path": path, "error": error }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        "text" => {
            println!("🔍 {} {}", "Checking".green().bold(), args.input.display());
            for (path, error) in &failures {
                print_failure(path, error);
            }
            println!();
            println!("   {} expressions, {} invalid", total, failures.len());
        }
        other => return Err(anyhow!("Unknown output format: {}. Use: text or json", other)),
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} invalid expression(s) in {}", failures.len(), args.input.display()))
    }
}

fn print_failure(path: &Path, error: &ParseError) {
    println!();
    println!("  {} {}", "✗".red(), path.to_string().bold());
    println!("    {}", error);
    for line in error.context.lines() {
        println!("    {}", line);
    }
    let mut cause = error.latest.as_deref();
    while let Some(inner) = cause {
        println!("    {} {}", "caused by:".yellow(), inner);
        cause = inner.latest.as_deref();
    }
}
