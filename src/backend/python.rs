use super::process::{self, RunError};
use super::types::{RunnerRequest, RunnerVerdict};
use crate::util::{expand_tilde, find_program};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const RUNNER_SCRIPT: &str = "convert_runner.py";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("python interpreter not found: {0}")]
    NoInterpreter(String),
    #[error("missing script: {}", .0.display())]
    MissingScript(PathBuf),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("runner exited with {exit_code:?}: {stderr}")]
    Failed { exit_code: Option<i32>, stderr: String },
    #[error("parsing runner JSON output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Talks to `scripts/convert_runner.py`: one JSON request on stdin, one JSON
/// verdict on stdout.
#[derive(Debug, Clone)]
pub struct PythonBridge {
    python_exe: String,
    script: PathBuf,
    env: BTreeMap<String, String>,
}

impl PythonBridge {
    pub fn new(python_exe: &str, scripts_dir: &str, env: BTreeMap<String, String>) -> Self {
        Self {
            python_exe: python_exe.trim().to_string(),
            script: expand_tilde(scripts_dir).join(RUNNER_SCRIPT),
            env,
        }
    }

    pub fn probe(&self) -> Result<PathBuf, BridgeError> {
        let exe = find_program(&self.python_exe)
            .ok_or_else(|| BridgeError::NoInterpreter(self.python_exe.clone()))?;
        if !self.script.is_file() {
            return Err(BridgeError::MissingScript(self.script.clone()));
        }
        Ok(exe)
    }

    pub fn call(
        &self,
        req: &RunnerRequest,
        timeout: Option<Duration>,
    ) -> Result<RunnerVerdict, BridgeError> {
        let exe = self.probe()?;
        debug!(
            "python run {} cmd={} backend={} timeout={:?}",
            self.script.display(),
            req.cmd,
            req.backend,
            timeout
        );

        let mut cmd = Command::new(exe);
        cmd.arg(&self.script);
        cmd.env("PYTHONIOENCODING", "utf-8");
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        let payload = serde_json::to_vec(req)?;
        let output = process::run(&mut cmd, Some(&payload), timeout)?;

        // The runner reports handled failures as JSON with exit 0; anything
        // else means the interpreter itself fell over.
        if !output.status.success() {
            return Err(BridgeError::Failed {
                exit_code: output.status.code(),
                stderr: output.diagnostic(),
            });
        }

        let stderr = output.stderr_tail();
        if !stderr.is_empty() {
            debug!("python stderr {}: {}", self.script.display(), stderr);
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}
