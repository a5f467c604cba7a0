use super::python::{BridgeError, PythonBridge};
use super::types::{ConversionResult, RunnerRequest, RunnerVerdict};
use super::{Adapter, BackendId, layout};
use crate::error::ConvertError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// A conversion library called in-process by the Python runner.
#[derive(Debug, Clone)]
pub struct LibraryAdapter {
    id: BackendId,
    bridge: PythonBridge,
    timeout: Duration,
}

impl LibraryAdapter {
    pub fn new(id: BackendId, bridge: PythonBridge, timeout: Duration) -> Self {
        Self {
            id,
            bridge,
            timeout,
        }
    }

    fn request(&self, cmd: &str) -> RunnerRequest {
        RunnerRequest {
            cmd: cmd.to_string(),
            backend: self.id.as_str().to_string(),
            module: self.id.module().unwrap_or_default().to_string(),
            input: None,
            out_dir: None,
            license_path: None,
        }
    }

    /// Imports the module and returns its version.
    pub fn module_version(&self) -> Result<String, ConvertError> {
        let verdict = self
            .bridge
            .call(&self.request("doctor"), Some(self.timeout))
            .map_err(|e| self.bridge_error(e))?;
        self.check_verdict(&verdict)?;
        Ok(verdict.version.unwrap_or_else(|| "unknown".to_string()))
    }

    fn run_convert(
        &self,
        input: &Path,
        out_dir: &Path,
        license: Option<&Path>,
    ) -> Result<ConversionResult, ConvertError> {
        let mut req = self.request("convert");
        req.input = Some(input.display().to_string());
        req.out_dir = Some(out_dir.display().to_string());
        req.license_path = license.map(|p| p.display().to_string());

        let verdict = self
            .bridge
            .call(&req, Some(self.timeout))
            .map_err(|e| self.bridge_error(e))?;
        self.check_verdict(&verdict)?;
        for w in &verdict.warnings {
            warn!(backend = %self.id, "{w}");
        }
        layout::normalize(out_dir)
    }

    fn check_verdict(&self, verdict: &RunnerVerdict) -> Result<(), ConvertError> {
        if verdict.ok {
            return Ok(());
        }
        let backend = self.id.as_str().to_string();
        let detail = verdict
            .error
            .clone()
            .unwrap_or_else(|| "runner reported failure".to_string());
        Err(match verdict.error_kind.as_deref() {
            Some("missing_module") => ConvertError::ToolNotAvailable { backend, detail },
            Some("invalid_input") => ConvertError::InvalidInput(detail),
            Some("license") => ConvertError::LicenseMissing { backend, detail },
            _ => ConvertError::ConversionFailed {
                backend,
                exit_code: None,
                detail,
            },
        })
    }

    fn bridge_error(&self, err: BridgeError) -> ConvertError {
        let backend = self.id.as_str().to_string();
        match err {
            BridgeError::NoInterpreter(_) | BridgeError::MissingScript(_) => {
                ConvertError::ToolNotAvailable {
                    backend,
                    detail: err.to_string(),
                }
            }
            BridgeError::Run(run) if run.is_not_found() => ConvertError::ToolNotAvailable {
                backend,
                detail: run.to_string(),
            },
            BridgeError::Run(super::process::RunError::Timeout { timeout, .. }) => {
                ConvertError::Timeout { backend, timeout }
            }
            BridgeError::Failed { exit_code, stderr } => ConvertError::ConversionFailed {
                backend,
                exit_code,
                detail: stderr,
            },
            other => ConvertError::ConversionFailed {
                backend,
                exit_code: None,
                detail: other.to_string(),
            },
        }
    }
}

impl Adapter for LibraryAdapter {
    fn id(&self) -> BackendId {
        self.id
    }

    fn probe(&self) -> Result<(), ConvertError> {
        self.bridge.probe().map(|_| ()).map_err(|e| self.bridge_error(e))
    }

    fn convert(&self, input: &Path, out_dir: &Path) -> Result<ConversionResult, ConvertError> {
        self.run_convert(input, out_dir, None)
    }
}

/// Where the SDK license comes from: an explicit path, else an env var
/// holding a path.
#[derive(Debug, Clone)]
pub struct LicenseSource {
    pub path: String,
    pub env_var: String,
}

impl LicenseSource {
    pub fn locate(&self) -> Result<PathBuf, String> {
        let raw = if !self.path.trim().is_empty() {
            self.path.trim().to_string()
        } else if self.env_var.is_empty() {
            return Err("no license path configured".to_string());
        } else {
            match std::env::var(&self.env_var) {
                Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
                _ => {
                    return Err(format!(
                        "no license path configured and ${} is unset",
                        self.env_var
                    ));
                }
            }
        };
        let path = crate::util::expand_tilde(&raw);
        if path.is_file() {
            Ok(path)
        } else {
            Err(format!("license file not found: {}", path.display()))
        }
    }
}

/// A library backend that refuses to run without a license file.
#[derive(Debug, Clone)]
pub struct LicensedAdapter {
    library: LibraryAdapter,
    license: LicenseSource,
}

impl LicensedAdapter {
    pub fn new(library: LibraryAdapter, license: LicenseSource) -> Self {
        Self { library, license }
    }

    pub fn library(&self) -> &LibraryAdapter {
        &self.library
    }

    fn license_path(&self) -> Result<PathBuf, ConvertError> {
        self.license
            .locate()
            .map_err(|detail| ConvertError::LicenseMissing {
                backend: self.library.id.as_str().to_string(),
                detail,
            })
    }
}

impl Adapter for LicensedAdapter {
    fn id(&self) -> BackendId {
        self.library.id
    }

    fn probe(&self) -> Result<(), ConvertError> {
        self.license_path()?;
        self.library.probe()
    }

    fn convert(&self, input: &Path, out_dir: &Path) -> Result<ConversionResult, ConvertError> {
        let license = self.license_path()?;
        self.library.run_convert(input, out_dir, Some(&license))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn adapter() -> LibraryAdapter {
        LibraryAdapter::new(
            BackendId::Markitdown,
            PythonBridge::new("python3", "scripts", Default::default()),
            Duration::from_secs(5),
        )
    }

    fn verdict(kind: &str) -> RunnerVerdict {
        RunnerVerdict {
            ok: false,
            error_kind: Some(kind.to_string()),
            error: Some("boom".to_string()),
            version: None,
            warnings: vec![],
        }
    }

    #[test]
    fn runner_error_kinds_map_to_taxonomy() {
        let a = adapter();
        let kind = |k: &str| a.check_verdict(&verdict(k)).unwrap_err().kind();
        assert_eq!(kind("missing_module"), ErrorKind::ToolNotAvailable);
        assert_eq!(kind("invalid_input"), ErrorKind::InvalidInput);
        assert_eq!(kind("license"), ErrorKind::LicenseMissing);
        assert_eq!(kind("conversion"), ErrorKind::ConversionFailed);
    }

    #[test]
    fn missing_license_is_distinct_from_tool_failure() {
        let licensed = LicensedAdapter::new(
            adapter(),
            LicenseSource {
                path: "/nonexistent/Aspose.Slides.lic".into(),
                env_var: "".into(),
            },
        );
        let err = licensed.probe().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LicenseMissing);
    }

    #[test]
    fn explicit_license_path_must_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let lic = tmp.path().join("slides.lic");
        std::fs::write(&lic, "<License/>").unwrap();
        let source = LicenseSource {
            path: lic.display().to_string(),
            env_var: "".into(),
        };
        assert_eq!(source.locate().unwrap(), lic);
    }

    #[test]
    fn missing_script_is_tool_not_available() {
        let a = LibraryAdapter::new(
            BackendId::Markitdown,
            PythonBridge::new("sh", "/nonexistent/scripts", Default::default()),
            Duration::from_secs(5),
        );
        assert_eq!(a.probe().unwrap_err().kind(), ErrorKind::ToolNotAvailable);
    }
}
