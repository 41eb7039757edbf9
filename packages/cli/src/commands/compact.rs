use super::{emit, read_report};
use anyhow::Result;
use clap::Args;
use folio_editor::serializer;
use folio_editor::CompactOptions;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct CompactArgs {
    /// Report file (JSON or expression literal)
    pub input: PathBuf,

    /// Emit object-literal source instead of JSON
    #[arg(long)]
    pub source: bool,

    /// With --source, write strings as template literals
    #[arg(long, requires = "source")]
    pub template_strings: bool,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ExpandArgs {
    /// Compacted report file
    pub input: PathBuf,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

pub fn compact(args: CompactArgs, _cwd: &str) -> Result<()> {
    let report = read_report(&args.input)?;
    let options = CompactOptions {
        source: args.source,
        template_strings: args.template_strings,
    };
    let text = serializer::compact(&report, options);
    tracing::debug!(input = %args.input.display(), bytes = text.len(), "report compacted");
    emit(&text, args.out.as_ref())
}

pub fn expand(args: ExpandArgs, _cwd: &str) -> Result<()> {
    let report = read_report(&args.input)?;
    let text = serializer::full(&serializer::expand(&report));
    emit(&text, args.out.as_ref())
}
