//! Backend registry and dispatch.
//!
//! Built once from [`Config`] at startup and shared read-only; resolving a
//! backend runs its cheap precondition probe so that requests for missing
//! tools fail before any workspace exists.

use crate::backend::library::LicenseSource;
use crate::backend::python::PythonBridge;
use crate::backend::{
    Adapter, Backend, BackendId, BackendKind, CliAdapter, LibraryAdapter, LicensedAdapter,
};
use crate::config::{self, Config};
use crate::error::ConvertError;
use crate::inspect::InputFormat;
use anyhow::{anyhow, bail};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct BackendDescriptor {
    pub id: &'static str,
    pub role: &'static str,
    pub kind: BackendKind,
    pub accepts: &'static [InputFormat],
    pub program: String,
    pub timeout_seconds: u64,
    pub native_layout: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    #[serde(flatten)]
    pub descriptor: BackendDescriptor,
    pub default: bool,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug)]
struct Entry {
    descriptor: BackendDescriptor,
    backend: Backend,
}

#[derive(Debug)]
pub struct Registry {
    default: BackendId,
    entries: Vec<Entry>,
}

impl Registry {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let default: BackendId = cfg.server.default_backend.parse().map_err(|_| {
            anyhow!(
                "server.default_backend `{}` is not a known backend",
                cfg.server.default_backend
            )
        })?;

        let entries: Vec<Entry> = BackendId::ALL
            .into_iter()
            .filter_map(|id| {
                let bc = backend_config(cfg, id);
                bc.enabled.then(|| build_entry(cfg, id, bc))
            })
            .collect();

        if !entries.iter().any(|e| e.backend.id() == default) {
            bail!("server.default_backend `{default}` is disabled in [backends.{default}]");
        }

        debug!(
            default = %default,
            backends = ?entries.iter().map(|e| e.descriptor.id).collect::<Vec<_>>(),
            "backend registry built"
        );
        Ok(Self { default, entries })
    }

    pub fn default_backend(&self) -> BackendId {
        self.default
    }

    fn lookup(&self, requested: Option<&str>) -> Result<&Entry, ConvertError> {
        let id = match requested {
            Some(raw) => raw.parse::<BackendId>()?,
            None => self.default,
        };
        self.entries
            .iter()
            .find(|e| e.backend.id() == id)
            .ok_or_else(|| ConvertError::UnknownBackend(id.as_str().to_string()))
    }

    /// Maps a requested id (or the default when `None`) to a ready backend.
    pub fn resolve(&self, requested: Option<&str>) -> Result<&Backend, ConvertError> {
        let entry = self.lookup(requested)?;
        entry.backend.probe()?;
        Ok(&entry.backend)
    }

    pub fn descriptor(&self, id: BackendId) -> Option<&BackendDescriptor> {
        self.entries
            .iter()
            .find(|e| e.backend.id() == id)
            .map(|e| &e.descriptor)
    }

    /// Every enabled backend with its probe outcome. With `deep`, Python
    /// backends also import their module.
    pub fn describe(&self, deep: bool) -> Vec<BackendStatus> {
        self.entries
            .iter()
            .map(|e| {
                let check = e.backend.probe().and_then(|()| {
                    if deep {
                        e.backend.diagnose()
                    } else {
                        Ok(None)
                    }
                });
                let (available, detail) = match check {
                    Ok(version) => (true, version),
                    Err(err) => (false, Some(err.to_string())),
                };
                BackendStatus {
                    descriptor: e.descriptor.clone(),
                    default: e.backend.id() == self.default,
                    available,
                    detail,
                }
            })
            .collect()
    }
}

fn backend_config(cfg: &Config, id: BackendId) -> &config::Backend {
    match id {
        BackendId::Pptx2md => &cfg.backends.pptx2md,
        BackendId::Markitdown => &cfg.backends.markitdown,
        BackendId::Docling => &cfg.backends.docling,
        BackendId::Marker => &cfg.backends.marker,
        BackendId::Aspose => &cfg.backends.aspose,
    }
}

fn build_entry(cfg: &Config, id: BackendId, bc: &config::Backend) -> Entry {
    let secs = bc.timeout_seconds.unwrap_or_else(|| id.default_timeout_seconds());
    let timeout = Duration::from_secs(secs.max(1));
    let bridge = || PythonBridge::new(&cfg.python.python_exe, &cfg.python.scripts_dir, bc.env.clone());

    let backend = match id.kind() {
        BackendKind::Cli => Backend::Cli(CliAdapter::new(
            id,
            &bc.program,
            &cfg.python.python_exe,
            timeout,
            bc.env.clone(),
        )),
        BackendKind::Library => Backend::Library(LibraryAdapter::new(id, bridge(), timeout)),
        BackendKind::Licensed => Backend::Licensed(LicensedAdapter::new(
            LibraryAdapter::new(id, bridge(), timeout),
            LicenseSource {
                path: cfg.license.aspose_path.clone(),
                env_var: cfg.license.aspose_env.clone(),
            },
        )),
    };

    let program = match id.kind() {
        BackendKind::Cli if bc.program.trim().is_empty() => id.default_program().to_string(),
        BackendKind::Cli => bc.program.trim().to_string(),
        _ => format!("{} (python module {})", cfg.python.python_exe, id.module().unwrap_or("?")),
    };

    Entry {
        descriptor: BackendDescriptor {
            id: id.as_str(),
            role: id.role(),
            kind: id.kind(),
            accepts: id.accepts(),
            program,
            timeout_seconds: timeout.as_secs(),
            native_layout: id.native_layout(),
        },
        backend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn unknown_backend_is_rejected() {
        let reg = Registry::from_config(&Config::default()).unwrap();
        let err = reg.resolve(Some("unregistered-backend")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownBackend);
    }

    #[test]
    fn disabled_backend_is_unknown() {
        let mut cfg = Config::default();
        cfg.backends.marker.enabled = false;
        let reg = Registry::from_config(&cfg).unwrap();
        assert_eq!(
            reg.resolve(Some("marker")).unwrap_err().kind(),
            ErrorKind::UnknownBackend
        );
        assert!(reg.descriptor(BackendId::Marker).is_none());
    }

    #[test]
    fn bad_default_backend_fails_startup() {
        let mut cfg = Config::default();
        cfg.server.default_backend = "nope".into();
        let err = Registry::from_config(&cfg).unwrap_err().to_string();
        assert!(err.contains("server.default_backend `nope` is not a known backend"), "{err}");

        let mut cfg = Config::default();
        cfg.backends.pptx2md.enabled = false;
        let err = Registry::from_config(&cfg).unwrap_err().to_string();
        assert!(err.contains("is disabled in [backends.pptx2md]"), "{err}");
    }

    #[test]
    fn missing_tool_fails_resolve() {
        let mut cfg = Config::default();
        cfg.backends.docling.program = "/nonexistent/docling".into();
        let reg = Registry::from_config(&cfg).unwrap();
        assert_eq!(
            reg.resolve(Some("document-converter-cli")).unwrap_err().kind(),
            ErrorKind::ToolNotAvailable
        );
    }

    #[test]
    fn describe_lists_every_enabled_backend() {
        let mut cfg = Config::default();
        cfg.backends.docling.program = "/nonexistent/docling".into();
        let reg = Registry::from_config(&cfg).unwrap();
        let statuses = reg.describe(false);
        assert_eq!(statuses.len(), BackendId::ALL.len());
        let docling = statuses.iter().find(|s| s.descriptor.id == "docling").unwrap();
        assert!(!docling.available);
        assert!(docling.detail.is_some());
        assert!(statuses.iter().any(|s| s.default && s.descriptor.id == "pptx2md"));
    }
}
