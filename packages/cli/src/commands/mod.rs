pub mod check;
pub mod compact;
pub mod format;

pub use check::{check, CheckArgs};
pub use compact::{compact, expand, CompactArgs, ExpandArgs};
pub use format::{format, FormatArgs};

use anyhow::{Context, Result};
use folio_editor::{loader, EditorConfig};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Read a report file, JSON or expression literal
pub fn read_report(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    loader::load_report(&text).with_context(|| format!("Cannot load {}", path.display()))
}

/// Write to `out`, or stdout without one
pub fn emit(text: &str, out: Option<&PathBuf>) -> Result<()> {
    match out {
        Some(path) => fs::write(path, text).with_context(|| format!("Cannot write {}", path.display())),
        None => {
            println!("{}", text);
            Ok(())
        }
    }
}

pub fn load_config(cwd: &str) -> Result<EditorConfig> {
    Ok(EditorConfig::load(Path::new(cwd))?)
}
