use super::{emit, load_config, read_report};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use folio_editor::serializer;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct FormatArgs {
    /// Report file (JSON or expression literal)
    pub input: PathBuf,

    /// Rewrite the input file in place
    #[arg(short, long)]
    pub write: bool,

    /// Wrap width for long expressions (0 disables wrapping; overrides config)
    #[arg(long)]
    pub wrap: Option<usize>,
}

pub fn format(args: FormatArgs, cwd: &str) -> Result<()> {
    let config = load_config(cwd)?;
    let mut options = config.format_options();
    if let Some(wrap) = args.wrap {
        options.wrap = wrap;
    }

    let mut report = read_report(&args.input)?;
    serializer::reformat_expressions(&mut report, options);
    let text = serializer::full(&report);

    if args.write {
        emit(&text, Some(&args.input))?;
        eprintln!("{} {}", "✓".green(), args.input.display());
        Ok(())
    } else {
        emit(&text, None)
    }
}
