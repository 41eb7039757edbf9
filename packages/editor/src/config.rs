use crate::errors::EditorError;
use folio_expr::StringifyOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_NAME: &str = "folio.config.json";

/// Editor configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EditorConfig {
    /// Expression re-parse delay for the inline editor (ms)
    pub inline_latency_ms: u64,

    /// Expression re-parse delay for the read-only viewer (ms)
    pub viewer_latency_ms: u64,

    /// Schema rebuild delay (ms)
    pub schema_delay_ms: u64,

    /// Quiet time before a history snapshot (ms)
    pub history_delay_ms: u64,

    pub history_cap: usize,

    pub format: FormatConfig,

    pub mode: PipelineMode,

    /// Directory for the file-backed key-value store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatConfig {
    /// 0 disables wrapping
    pub wrap: usize,
    pub indent: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineMode {
    #[default]
    Inline,
    Viewer,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            inline_latency_ms: 150,
            viewer_latency_ms: 350,
            schema_delay_ms: 1000,
            history_delay_ms: 2000,
            history_cap: 40,
            format: FormatConfig::default(),
            mode: PipelineMode::Inline,
            persist_dir: None,
        }
    }
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self { wrap: 40, indent: true }
    }
}

impl From<FormatConfig> for StringifyOptions {
    fn from(config: FormatConfig) -> Self {
        StringifyOptions {
            wrap: config.wrap,
            indent: config.indent,
        }
    }
}

impl EditorConfig {
    /// Load config from a directory; a missing file gives the defaults
    pub fn load(dir: &Path) -> Result<Self, EditorError> {
        let config_path = dir.join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_json::from_str(&content)
                .map_err(|e| EditorError::Config(format!("{}: {}", config_path.display(), e)))
        } else {
            Ok(Self::default())
        }
    }

    pub fn expr_latency(&self) -> Duration {
        match self.mode {
            PipelineMode::Inline => Duration::from_millis(self.inline_latency_ms),
            PipelineMode::Viewer => Duration::from_millis(self.viewer_latency_ms),
        }
    }

    pub fn schema_delay(&self) -> Duration {
        Duration::from_millis(self.schema_delay_ms)
    }

    pub fn history_delay(&self) -> Duration {
        Duration::from_millis(self.history_delay_ms)
    }

    pub fn format_options(&self) -> StringifyOptions {
        self.format.into()
    }
}
