use super::process::{self, ProcessOutput, RunError};
use super::types::ConversionResult;
use super::{Adapter, BackendId, layout};
use crate::error::ConvertError;
use crate::util::find_program;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

/// stderr fragments that mean the tool could not open the file as a
/// presentation at all.
const INVALID_INPUT_MARKERS: &[&str] = &[
    "not a zip file",
    "badzipfile",
    "packagenotfounderror",
    "package not found",
    "file format is not supported",
    "unsupported file format",
    "invalid file format",
];
const MISSING_MODULE_MARKERS: &[&str] = &["no module named", "modulenotfounderror"];

/// pptx2md's fixed output names inside the output dir.
const PPTX2MD_MARKDOWN: &str = "slides.md";
const PPTX2MD_IMAGES: &str = "img";

/// A converter run as a separate process.
#[derive(Debug, Clone)]
pub struct CliAdapter {
    id: BackendId,
    /// Empty means `id.default_program()`.
    program: String,
    python_exe: String,
    timeout: Duration,
    env: BTreeMap<String, String>,
}

impl CliAdapter {
    pub fn new(
        id: BackendId,
        program: &str,
        python_exe: &str,
        timeout: Duration,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id,
            program: program.trim().to_string(),
            python_exe: python_exe.trim().to_string(),
            timeout,
            env,
        }
    }

    fn program(&self) -> &str {
        if self.program.is_empty() {
            self.id.default_program()
        } else {
            &self.program
        }
    }

    /// `python -m pptx2md` is only tried when no explicit program was configured.
    fn python_fallback(&self) -> bool {
        self.id == BackendId::Pptx2md && self.program.is_empty()
    }

    /// Argument vectors to try in order; the first that exits cleanly wins.
    fn invocations(&self, input: &Path, out_dir: &Path) -> Vec<Vec<OsString>> {
        let program = OsString::from(self.program());
        let input = input.as_os_str().to_owned();
        let out = out_dir.as_os_str().to_owned();
        let os = |s: &str| OsString::from(s);

        match self.id {
            BackendId::Pptx2md => {
                // pptx2md wants a Markdown file path for -o, not a directory.
                let md = out_dir.join(PPTX2MD_MARKDOWN).into_os_string();
                let img = out_dir.join(PPTX2MD_IMAGES).into_os_string();
                let mut v = vec![
                    vec![program.clone(), input.clone(), os("-o"), md.clone(), os("-i"), img.clone()],
                    vec![program.clone(), input.clone(), os("-o"), md.clone()],
                    vec![program.clone(), os("-f"), input.clone(), os("-o"), md.clone()],
                    vec![program, os("--input"), input.clone(), os("--output"), md.clone()],
                ];
                if self.python_fallback() {
                    v.push(vec![
                        os(&self.python_exe),
                        os("-m"),
                        os("pptx2md"),
                        input,
                        os("-o"),
                        md,
                        os("-i"),
                        img,
                    ]);
                }
                v
            }
            BackendId::Docling => vec![vec![
                program,
                os("--from"),
                os("pptx"),
                os("--to"),
                os("md"),
                os("--image-export-mode"),
                os("referenced"),
                os("--output"),
                out,
                input,
            ]],
            BackendId::Marker => vec![vec![
                program,
                input,
                os("--output_dir"),
                out,
                os("--output_format"),
                os("markdown"),
            ]],
            BackendId::Markitdown | BackendId::Aspose => Vec::new(),
        }
    }

    fn run_once(&self, argv: &[OsString]) -> Result<ProcessOutput, RunError> {
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        process::run(&mut cmd, None, Some(self.timeout))
    }

    fn not_available(&self, detail: impl Into<String>) -> ConvertError {
        ConvertError::ToolNotAvailable {
            backend: self.id.as_str().to_string(),
            detail: detail.into(),
        }
    }

    fn classify_exit(&self, output: &ProcessOutput) -> ConvertError {
        let detail = output.diagnostic();
        let lower = detail.to_ascii_lowercase();
        if MISSING_MODULE_MARKERS.iter().any(|m| lower.contains(m)) {
            return self.not_available(detail);
        }
        if INVALID_INPUT_MARKERS.iter().any(|m| lower.contains(m)) {
            return ConvertError::InvalidInput(format!("{} rejected the file: {detail}", self.id));
        }
        ConvertError::ConversionFailed {
            backend: self.id.as_str().to_string(),
            exit_code: output.status.code(),
            detail,
        }
    }
}

impl Adapter for CliAdapter {
    fn id(&self) -> BackendId {
        self.id
    }

    fn probe(&self) -> Result<(), ConvertError> {
        if find_program(self.program()).is_some() {
            return Ok(());
        }
        if self.python_fallback() && find_program(&self.python_exe).is_some() {
            return Ok(());
        }
        Err(self.not_available(format!("`{}` not found on PATH", self.program())))
    }

    fn convert(&self, input: &Path, out_dir: &Path) -> Result<ConversionResult, ConvertError> {
        let invocations = self.invocations(input, out_dir);
        let mut last_err = None;

        for argv in &invocations {
            reset_dir(out_dir)?;
            match self.run_once(argv) {
                Ok(output) if output.status.success() => {
                    debug!(backend = %self.id, ?argv, "tool finished");
                    return layout::normalize(out_dir);
                }
                Ok(output) => {
                    let err = self.classify_exit(&output);
                    debug!(backend = %self.id, ?argv, error = %err, "invocation failed");
                    // The tool parsed its arguments and refused the file itself.
                    if matches!(err, ConvertError::InvalidInput(_)) {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
                Err(RunError::Timeout { timeout, stderr }) => {
                    warn!(backend = %self.id, stderr, "tool timed out");
                    // A hung tool is not retried with other argument forms.
                    return Err(ConvertError::Timeout {
                        backend: self.id.as_str().to_string(),
                        timeout,
                    });
                }
                Err(err) if err.is_not_found() => {
                    debug!(backend = %self.id, ?argv, "program not found");
                    // Keep an earlier failure from a program that did start.
                    last_err.get_or_insert_with(|| {
                        self.not_available(format!(
                            "`{}` could not be started: {err}",
                            argv[0].to_string_lossy()
                        ))
                    });
                }
                Err(err) => {
                    last_err = Some(ConvertError::ConversionFailed {
                        backend: self.id.as_str().to_string(),
                        exit_code: None,
                        detail: err.to_string(),
                    });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| self.not_available("no invocation defined")))
    }
}

/// Clears what an earlier, failed invocation may have left behind.
fn reset_dir(dir: &Path) -> Result<(), ConvertError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| ConvertError::internal(format!("read {}", dir.display()), e))?;
    for entry in entries {
        let path: PathBuf = entry
            .map_err(|e| ConvertError::internal(format!("read {}", dir.display()), e))?
            .path();
        let res = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        res.map_err(|e| ConvertError::internal(format!("remove {}", path.display()), e))?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::os::unix::fs::PermissionsExt;

    fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn adapter(id: BackendId, program: &Path, timeout: Duration) -> CliAdapter {
        CliAdapter::new(
            id,
            &program.display().to_string(),
            "python3",
            timeout,
            Default::default(),
        )
    }

    #[test]
    fn pptx2md_writes_slides_and_images() {
        let tmp = tempfile::tempdir().unwrap();
        // $3 is the -o markdown path, $5 the -i image dir.
        let tool = fake_tool(
            tmp.path(),
            "pptx2md",
            r#"mkdir -p "$5" && printf 'png' > "$5/s1.png" && printf '# Deck\n![s1](img/s1.png)\n' > "$3""#,
        );
        let out = tmp.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let input = tmp.path().join("deck.pptx");
        std::fs::write(&input, b"PK\x03\x04").unwrap();

        let res = adapter(BackendId::Pptx2md, &tool, Duration::from_secs(10))
            .convert(&input, &out)
            .unwrap();
        assert_eq!(res.markdown_files, vec![PathBuf::from("slides.md")]);
        assert_eq!(res.asset_files, vec![PathBuf::from("img/s1.png")]);
    }

    #[test]
    fn falls_back_to_next_argument_form() {
        let tmp = tempfile::tempdir().unwrap();
        // Only accepts the `-f <in> -o <md>` form.
        let tool = fake_tool(
            tmp.path(),
            "pptx2md",
            r#"[ "$1" = "-f" ] || { echo "usage: pptx2md -f FILE" >&2; exit 2; }
printf '# ok\n' > "$4""#,
        );
        let out = tmp.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let input = tmp.path().join("deck.pptx");
        std::fs::write(&input, b"PK\x03\x04").unwrap();

        let res = adapter(BackendId::Pptx2md, &tool, Duration::from_secs(10))
            .convert(&input, &out)
            .unwrap();
        assert_eq!(res.markdown_files, vec![PathBuf::from("slides.md")]);
    }

    #[test]
    fn non_zero_exit_reports_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "marker_single", "echo 'CUDA exploded' >&2; exit 7");
        let out = tmp.path().join("out");
        std::fs::create_dir(&out).unwrap();

        let err = adapter(BackendId::Marker, &tool, Duration::from_secs(10))
            .convert(&tmp.path().join("deck.pptx"), &out)
            .unwrap_err();
        match err {
            ConvertError::ConversionFailed {
                exit_code, detail, ..
            } => {
                assert_eq!(exit_code, Some(7));
                assert!(detail.contains("CUDA exploded"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_zip_is_invalid_input() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            tmp.path(),
            "docling",
            "echo 'zipfile.BadZipFile: File is not a zip file' >&2; exit 1",
        );
        let out = tmp.path().join("out");
        std::fs::create_dir(&out).unwrap();

        let err = adapter(BackendId::Docling, &tool, Duration::from_secs(10))
            .convert(&tmp.path().join("deck.pptx"), &out)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn hung_tool_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "docling", "exec sleep 30");
        let out = tmp.path().join("out");
        std::fs::create_dir(&out).unwrap();

        let err = adapter(BackendId::Docling, &tool, Duration::from_millis(300))
            .convert(&tmp.path().join("deck.pptx"), &out)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn missing_program_fails_probe_and_convert() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("not-installed");
        let a = adapter(BackendId::Docling, &missing, Duration::from_secs(1));
        assert_eq!(a.probe().unwrap_err().kind(), ErrorKind::ToolNotAvailable);

        let out = tmp.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let err = a.convert(&tmp.path().join("deck.pptx"), &out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolNotAvailable);
    }
}
