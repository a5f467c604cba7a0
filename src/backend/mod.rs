pub mod cli;
pub mod layout;
pub mod library;
pub mod process;
pub mod python;
pub mod types;

use crate::error::ConvertError;
use crate::inspect::InputFormat;
use std::path::Path;
use std::str::FromStr;

pub use cli::CliAdapter;
pub use library::{LibraryAdapter, LicensedAdapter};
pub use types::{BackendKind, ConversionResult};

/// Uniform contract over every converter, whether it is a spawned process or
/// a library routine reached through the Python bridge.
pub trait Adapter: Send + Sync {
    fn id(&self) -> BackendId;

    /// Cheap precondition check; must not touch a workspace.
    fn probe(&self) -> Result<(), ConvertError>;

    /// Converts `input` into Markdown plus assets under `out_dir`, then
    /// normalizes the tool's layout.
    fn convert(&self, input: &Path, out_dir: &Path) -> Result<ConversionResult, ConvertError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendId {
    Pptx2md,
    Markitdown,
    Docling,
    Marker,
    Aspose,
}

impl BackendId {
    pub const ALL: [BackendId; 5] = [
        BackendId::Pptx2md,
        BackendId::Markitdown,
        BackendId::Docling,
        BackendId::Marker,
        BackendId::Aspose,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendId::Pptx2md => "pptx2md",
            BackendId::Markitdown => "markitdown",
            BackendId::Docling => "docling",
            BackendId::Marker => "marker",
            BackendId::Aspose => "aspose",
        }
    }

    /// Generic role name, accepted as an alias of the concrete id.
    pub fn role(self) -> &'static str {
        match self {
            BackendId::Pptx2md => "primary-cli-tool",
            BackendId::Markitdown => "library-based-tool",
            BackendId::Docling => "document-converter-cli",
            BackendId::Marker => "alternate-tool",
            BackendId::Aspose => "licensed-sdk-tool",
        }
    }

    pub fn kind(self) -> BackendKind {
        match self {
            BackendId::Pptx2md | BackendId::Docling | BackendId::Marker => BackendKind::Cli,
            BackendId::Markitdown => BackendKind::Library,
            BackendId::Aspose => BackendKind::Licensed,
        }
    }

    /// Executable looked up on `PATH` when the config leaves `program` empty.
    pub fn default_program(self) -> &'static str {
        match self {
            BackendId::Pptx2md => "pptx2md",
            BackendId::Docling => "docling",
            BackendId::Marker => "marker_single",
            BackendId::Markitdown | BackendId::Aspose => "",
        }
    }

    /// Timeout used when the config table leaves `timeout_seconds` out.
    pub fn default_timeout_seconds(self) -> u64 {
        match self {
            BackendId::Docling => 600,
            BackendId::Marker => 900,
            BackendId::Pptx2md | BackendId::Markitdown | BackendId::Aspose => 300,
        }
    }

    /// Python module the bridged backends import.
    pub fn module(self) -> Option<&'static str> {
        match self {
            BackendId::Markitdown => Some("markitdown"),
            BackendId::Aspose => Some("aspose.slides"),
            _ => None,
        }
    }

    pub fn accepts(self) -> &'static [InputFormat] {
        match self {
            BackendId::Aspose => &[InputFormat::Pptx, InputFormat::Ppt],
            _ => &[InputFormat::Pptx],
        }
    }

    /// The tool's native output shape, before normalization.
    pub fn native_layout(self) -> &'static str {
        match self {
            BackendId::Pptx2md => "slides.md with images under img/",
            BackendId::Markitdown => "single <stem>.md, no assets",
            BackendId::Docling => "<stem>.md with images under <stem>_artifacts/",
            BackendId::Marker => "<stem>/<stem>.md with images and <stem>_meta.json beside it",
            BackendId::Aspose => "<stem>.md with images under images/",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|id| raw.eq_ignore_ascii_case(id.as_str()) || raw.eq_ignore_ascii_case(id.role()))
    }
}

impl FromStr for BackendId {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ConvertError::UnknownBackend(s.to_string()))
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured backend. The set is closed, so dispatch is a plain match.
#[derive(Debug, Clone)]
pub enum Backend {
    Cli(CliAdapter),
    Library(LibraryAdapter),
    Licensed(LicensedAdapter),
}

impl Backend {
    fn adapter(&self) -> &dyn Adapter {
        match self {
            Backend::Cli(a) => a,
            Backend::Library(a) => a,
            Backend::Licensed(a) => a,
        }
    }

    /// Slower check than `probe`: asks the Python bridge to import the module.
    /// CLI backends have nothing further to verify and return `None`.
    pub fn diagnose(&self) -> Result<Option<String>, ConvertError> {
        match self {
            Backend::Cli(_) => Ok(None),
            Backend::Library(a) => a.module_version().map(Some),
            Backend::Licensed(a) => a.library().module_version().map(Some),
        }
    }
}

impl Adapter for Backend {
    fn id(&self) -> BackendId {
        self.adapter().id()
    }

    fn probe(&self) -> Result<(), ConvertError> {
        self.adapter().probe()
    }

    fn convert(&self, input: &Path, out_dir: &Path) -> Result<ConversionResult, ConvertError> {
        self.adapter().convert(input, out_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ids_and_role_aliases() {
        assert_eq!(BackendId::parse("pptx2md"), Some(BackendId::Pptx2md));
        assert_eq!(BackendId::parse("DOCLING"), Some(BackendId::Docling));
        assert_eq!(BackendId::parse("licensed-sdk-tool"), Some(BackendId::Aspose));
        assert_eq!(BackendId::parse("alternate-tool"), Some(BackendId::Marker));
        assert_eq!(BackendId::parse("unregistered-backend"), None);
    }

    #[test]
    fn from_str_reports_unknown_backend() {
        let err = "nope".parse::<BackendId>().unwrap_err();
        assert!(matches!(err, ConvertError::UnknownBackend(ref s) if s == "nope"));
    }

    #[test]
    fn only_the_sdk_reads_legacy_ppt() {
        for id in BackendId::ALL {
            let legacy = id.accepts().contains(&InputFormat::Ppt);
            assert_eq!(legacy, id == BackendId::Aspose, "{id}");
            assert!(id.accepts().contains(&InputFormat::Pptx));
        }
    }
}
