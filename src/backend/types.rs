use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Cli,
    Library,
    Licensed,
}

/// A normalized output tree. Paths are relative to `output_dir` and sorted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionResult {
    pub output_dir: PathBuf,
    pub markdown_files: Vec<PathBuf>,
    pub asset_files: Vec<PathBuf>,
}

impl ConversionResult {
    pub fn has_markdown(&self) -> bool {
        !self.markdown_files.is_empty()
    }
}

/// Request sent to `convert_runner.py` on stdin.
#[derive(Debug, Clone, Serialize)]
pub struct RunnerRequest {
    pub cmd: String,
    pub backend: String,
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_path: Option<String>,
}

/// Verdict printed by `convert_runner.py` on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerVerdict {
    pub ok: bool,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}
