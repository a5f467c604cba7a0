//! Cheap checks on an upload before any tool sees it.

use crate::error::ConvertError;
use serde::Serialize;
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const CFB_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const FALLBACK_NAME: &str = "upload.pptx";
const MAX_NAME_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Pptx,
    Ppt,
}

impl InputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            InputFormat::Pptx => "pptx",
            InputFormat::Ppt => "ppt",
        }
    }

    pub fn from_filename(name: &str) -> Result<Self, ConvertError> {
        let ext = Path::new(name)
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pptx") => Ok(InputFormat::Pptx),
            Some("ppt") => Ok(InputFormat::Ppt),
            _ => Err(ConvertError::InvalidInput(format!(
                "only .ppt or .pptx files are supported: {name}"
            ))),
        }
    }

    /// PPTX is an OOXML zip package, PPT an OLE compound file.
    pub fn check_signature(self, content: &[u8]) -> Result<(), ConvertError> {
        let (magic, container) = match self {
            InputFormat::Pptx => (ZIP_MAGIC, "zip package"),
            InputFormat::Ppt => (CFB_MAGIC, "OLE compound file"),
        };
        if content.starts_with(magic) {
            Ok(())
        } else {
            Err(ConvertError::InvalidInput(format!(
                "content is not a .{} presentation ({container} signature missing)",
                self.extension()
            )))
        }
    }
}

/// Reduces an uploaded filename to a single safe path component: NFC
/// normalized, no directories, no control or shell-hostile characters.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .nfc()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() || Path::new(&cleaned).file_stem().is_none() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

pub fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("upload")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension_is_case_insensitive() {
        assert_eq!(InputFormat::from_filename("Deck.PPTX").unwrap(), InputFormat::Pptx);
        assert_eq!(InputFormat::from_filename("old.ppt").unwrap(), InputFormat::Ppt);
        assert!(InputFormat::from_filename("notes.txt").is_err());
        assert!(InputFormat::from_filename("pptx").is_err());
    }

    #[test]
    fn text_renamed_to_pptx_is_rejected() {
        let err = InputFormat::Pptx
            .check_signature(b"just some notes, not slides")
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidInput(_)));
        assert!(InputFormat::Pptx.check_signature(b"PK\x03\x04rest").is_ok());
        assert!(InputFormat::Ppt.check_signature(CFB_MAGIC).is_ok());
        assert!(InputFormat::Ppt.check_signature(b"PK\x03\x04").is_err());
    }

    #[test]
    fn sanitize_strips_directories_and_odd_chars() {
        assert_eq!(sanitize_filename("../../etc/passwd.pptx"), "passwd.pptx");
        assert_eq!(sanitize_filename("C:\\decks\\q3 plan.pptx"), "q3 plan.pptx");
        assert_eq!(sanitize_filename("a;b|c.pptx"), "a_b_c.pptx");
        assert_eq!(sanitize_filename(""), "upload.pptx");
        assert_eq!(sanitize_filename(".."), "upload.pptx");
    }

    #[test]
    fn sanitize_normalizes_to_nfc() {
        let decomposed = "Cafe\u{301}.pptx";
        assert_eq!(sanitize_filename(decomposed), "Caf\u{e9}.pptx");
    }

    #[test]
    fn stem_of_name() {
        assert_eq!(file_stem("deck.pptx"), "deck");
        assert_eq!(file_stem(""), "upload");
    }
}
