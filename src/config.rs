use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub workspace: Workspace,
    #[serde(default)]
    pub python: Python,
    #[serde(default)]
    pub backends: Backends,
    #[serde(default)]
    pub license: License,
    #[serde(default)]
    pub archive: Archive,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// Loads `path` when given, else `./slidedown.toml` when present, else defaults.
    pub fn resolve(user: Option<&Path>) -> Result<Self> {
        if let Some(p) = user {
            return Self::load(p);
        }
        let default = PathBuf::from("slidedown.toml");
        if default.exists() {
            Self::load(&default)
        } else {
            Ok(Self::default())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub bind: String,
    pub default_backend: String,
    pub max_upload_bytes: usize,
    pub max_concurrent_conversions: usize,
}
impl Default for Server {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".into(),
            default_backend: "pptx2md".into(),
            max_upload_bytes: 200 * 1024 * 1024,
            max_concurrent_conversions: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Workspace {
    /// Empty means the OS temp dir.
    pub root: String,
    pub prefix: String,
}
impl Default for Workspace {
    fn default() -> Self {
        Self {
            root: "".into(),
            prefix: "slidedown-".into(),
        }
    }
}

impl Workspace {
    pub fn root_dir(&self) -> PathBuf {
        if self.root.is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(&self.root)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Python {
    pub python_exe: String,
    pub scripts_dir: String,
}
impl Default for Python {
    fn default() -> Self {
        Self {
            python_exe: "python3".into(),
            scripts_dir: "scripts".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Backends {
    pub pptx2md: Backend,
    pub markitdown: Backend,
    pub docling: Backend,
    pub marker: Backend,
    pub aspose: Backend,
}

/// Per-backend settings. An empty `program` means the tool's usual executable
/// name looked up on `PATH`; the Python-bridged backends ignore it. A missing
/// `timeout_seconds` falls back to the backend's own default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backend {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub program: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "".into(),
            timeout_seconds: None,
            env: Default::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct License {
    pub aspose_path: String,
    pub aspose_env: String,
}
impl Default for License {
    fn default() -> Self {
        Self {
            aspose_path: "".into(),
            aspose_env: "ASPOSE_SLIDES_LICENSE".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Archive {
    pub filename_prefix: String,
}
impl Default for Archive {
    fn default() -> Self {
        Self {
            filename_prefix: "conversion_".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_backend_section_keeps_defaults() {
        let raw = r#"
            [backends.docling]
            timeout_seconds = 30
        "#;
        let cfg: Config = toml::from_str(raw).expect("parse TOML");
        assert_eq!(cfg.backends.docling.timeout_seconds, Some(30));
        assert_eq!(cfg.backends.docling.program, "");
        assert!(cfg.backends.docling.enabled);
        assert_eq!(cfg.backends.marker.timeout_seconds, None);
        assert_eq!(cfg.server.default_backend, "pptx2md");
    }
}
