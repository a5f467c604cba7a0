//! Per-request conversion pipeline.
//!
//! `Received → WorkspaceAcquired → Converted → Packaged`, with any step able
//! to end in failure. The backend is resolved and the upload checked before a
//! workspace exists; once acquired, the workspace is released on every path
//! out of [`Orchestrator::run`].

use crate::archive::{self, Archive};
use crate::backend::{Adapter, BackendId};
use crate::config::Config;
use crate::error::ConvertError;
use crate::inspect::{self, InputFormat};
use crate::registry::Registry;
use crate::workspace::WorkspaceManager;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub filename: String,
    pub content: Vec<u8>,
    /// `None` selects the registry's default backend.
    pub backend: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub request_id: Uuid,
    pub backend: BackendId,
    /// Suggested download name, e.g. `conversion_deck.zip`.
    pub filename: String,
    pub archive: Archive,
    pub markdown_files: Vec<PathBuf>,
    pub asset_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    WorkspaceAcquired,
    Converted,
    Packaged,
    Responded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Received => "received",
            Stage::WorkspaceAcquired => "workspace_acquired",
            Stage::Converted => "converted",
            Stage::Packaged => "packaged",
            Stage::Responded => "responded",
        })
    }
}

#[derive(Debug)]
pub struct Orchestrator {
    registry: Arc<Registry>,
    workspaces: WorkspaceManager,
    archive_prefix: String,
    max_upload_bytes: usize,
}

impl Orchestrator {
    pub fn new(cfg: &Config, registry: Arc<Registry>) -> Self {
        Self {
            registry,
            workspaces: WorkspaceManager::new(cfg.workspace.root_dir(), cfg.workspace.prefix.clone()),
            archive_prefix: cfg.archive.filename_prefix.clone(),
            max_upload_bytes: cfg.server.max_upload_bytes,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Runs one conversion end to end. Blocks on the backend; call it from a
    /// blocking-capable thread.
    pub fn run(&self, req: ConversionRequest) -> Result<ConversionOutcome, ConvertError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let mut stage = Stage::Received;

        let result = self.run_stages(request_id, &req, &mut stage);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => info!(
                request_id = %request_id,
                backend = %outcome.backend,
                markdown = outcome.markdown_files.len(),
                assets = outcome.asset_files.len(),
                archive_bytes = outcome.archive.bytes.len(),
                elapsed_ms,
                "conversion finished"
            ),
            Err(err) => warn!(
                request_id = %request_id,
                requested = req.backend.as_deref().unwrap_or("<default>"),
                stage = %stage,
                kind = err.kind().code(),
                elapsed_ms,
                error = %err,
                "conversion failed"
            ),
        }
        result
    }

    fn run_stages(
        &self,
        request_id: Uuid,
        req: &ConversionRequest,
        stage: &mut Stage,
    ) -> Result<ConversionOutcome, ConvertError> {
        // Everything before the workspace is a cheap precondition.
        let backend = self.registry.resolve(req.backend.as_deref())?;
        let backend_id = backend.id();
        let format = self.validate_upload(backend_id, req)?;

        let mut workspace = self.workspaces.acquire()?;
        debug!(request_id = %request_id, workspace = %workspace.dir().display(), "workspace ready");
        let stored_name = stored_filename(&req.filename, format);
        let input_path = workspace.input_dir().join(&stored_name);
        std::fs::write(&input_path, &req.content).map_err(|e| {
            ConvertError::internal(format!("persist upload {}", input_path.display()), e)
        })?;
        advance(stage, Stage::WorkspaceAcquired, request_id);

        let converted = backend.convert(&input_path, workspace.output_dir())?;
        advance(stage, Stage::Converted, request_id);

        if !converted.has_markdown() {
            return Err(ConvertError::NoOutputProduced(backend_id.as_str().to_string()));
        }
        let archive = archive::pack(&converted.output_dir)?;
        advance(stage, Stage::Packaged, request_id);

        // The archive is in memory; nothing on disk is needed any more.
        workspace.release();

        Ok(ConversionOutcome {
            request_id,
            backend: backend_id,
            filename: format!("{}{}.zip", self.archive_prefix, inspect::file_stem(&stored_name)),
            archive,
            markdown_files: converted.markdown_files,
            asset_files: converted.asset_files,
        })
    }

    fn validate_upload(
        &self,
        backend: BackendId,
        req: &ConversionRequest,
    ) -> Result<InputFormat, ConvertError> {
        if req.content.is_empty() {
            return Err(ConvertError::InvalidInput("uploaded file is empty".to_string()));
        }
        if req.content.len() > self.max_upload_bytes {
            return Err(ConvertError::InvalidInput(format!(
                "uploaded file exceeds {} bytes",
                self.max_upload_bytes
            )));
        }
        let format = InputFormat::from_filename(&req.filename)?;
        if !backend.accepts().contains(&format) {
            return Err(ConvertError::InvalidInput(format!(
                "backend `{backend}` does not accept .{} files",
                format.extension()
            )));
        }
        format.check_signature(&req.content)?;
        Ok(format)
    }
}

fn advance(stage: &mut Stage, next: Stage, request_id: Uuid) {
    debug!(request_id = %request_id, from = %stage, to = %next, "stage");
    *stage = next;
}

/// Sanitized upload name that still ends in the detected extension, since
/// several tools pick their reader by extension.
fn stored_filename(original: &str, format: InputFormat) -> String {
    let name = inspect::sanitize_filename(original);
    let has_ext = std::path::Path::new(&name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(format.extension()));
    if has_ext {
        name
    } else {
        format!("{name}.{}", format.extension())
    }
}
