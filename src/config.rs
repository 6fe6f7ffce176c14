//! Pipeline configuration.
//!
//! Read from a JSON file; every field has a default so an empty object `{}` is
//! a valid configuration. Command-line flags override file values.
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::ScreenMode;
use crate::query::TableName;
use crate::store::OutputPredicate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root table of the merged long-format relation.
    #[serde(default = "default_insights_table")]
    pub insights_table: String,

    /// Root table of the merged summary-statistics relation.
    #[serde(default = "default_summary_table")]
    pub summary_table: String,

    /// File-name marker of long-format outputs.
    #[serde(default = "default_long_format_marker")]
    pub long_format_marker: String,

    /// File-name marker of summary-statistics outputs.
    #[serde(default = "default_summary_marker")]
    pub summary_marker: String,

    /// Location of the pathogen taxonomy feed.
    #[serde(default)]
    pub pathogen_feed: Option<String>,

    /// Location of the panel feed.
    #[serde(default)]
    pub panel_feed: Option<String>,

    #[serde(default)]
    pub default_mode: ScreenMode,

    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

fn default_insights_table() -> String {
    "insights_root".to_string()
}

fn default_summary_table() -> String {
    "summary_root".to_string()
}

fn default_long_format_marker() -> String {
    OutputPredicate::long_format().marker().to_string()
}

fn default_summary_marker() -> String {
    OutputPredicate::summary_stats().marker().to_string()
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            insights_table: default_insights_table(),
            summary_table: default_summary_table(),
            long_format_marker: default_long_format_marker(),
            summary_marker: default_summary_marker(),
            pathogen_feed: None,
            panel_feed: None,
            default_mode: ScreenMode::default(),
            export_dir: default_export_dir(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let insights = self.insights_table()?;
        let summary = self.summary_table()?;
        if insights == summary {
            bail!("insights_table and summary_table must differ (both are '{}')", insights);
        }
        if self.long_format_marker.trim().is_empty() || self.summary_marker.trim().is_empty() {
            bail!("output markers must not be empty");
        }
        Ok(())
    }

    pub fn insights_table(&self) -> Result<TableName> {
        TableName::new(&self.insights_table).with_context(|| "invalid insights_table")
    }

    pub fn summary_table(&self) -> Result<TableName> {
        TableName::new(&self.summary_table).with_context(|| "invalid summary_table")
    }

    pub fn long_format_predicate(&self) -> OutputPredicate {
        OutputPredicate::new(self.long_format_marker.clone())
    }

    pub fn summary_predicate(&self) -> OutputPredicate {
        OutputPredicate::new(self.summary_marker.clone())
    }
}
