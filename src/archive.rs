//! Deterministic zip packaging of a conversion output tree.

use crate::error::ConvertError;
use crate::util::sha256_hex;
use std::fs::File;
use std::io::{self, Cursor};
use std::path::Path;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Entry mode for every file; the source permissions would leak host umask.
const ENTRY_MODE: u32 = 0o644;

#[derive(Debug, Clone)]
pub struct Archive {
    pub bytes: Vec<u8>,
    pub sha256: String,
    pub entries: usize,
}

/// Zips every regular file under `dir`, keyed by its `/`-separated relative
/// path. Walk order, timestamps and modes are fixed, so the same tree always
/// yields the same bytes. Directories themselves are not recorded.
pub fn pack(dir: &Path) -> Result<Archive, ConvertError> {
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(ENTRY_MODE);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut entries = 0usize;

    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| ConvertError::internal("walk output", e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| ConvertError::internal("strip output prefix", io::Error::other(e)))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        zip.start_file(name, options).map_err(zip_err)?;
        let mut file = File::open(entry.path()).map_err(|e| {
            ConvertError::internal(format!("open {}", entry.path().display()), e)
        })?;
        io::copy(&mut file, &mut zip).map_err(|e| {
            ConvertError::internal(format!("archive {}", entry.path().display()), e)
        })?;
        entries += 1;
    }

    let bytes = zip.finish().map_err(zip_err)?.into_inner();
    Ok(Archive {
        sha256: sha256_hex(&bytes),
        bytes,
        entries,
    })
}

fn zip_err(e: zip::result::ZipError) -> ConvertError {
    ConvertError::internal("write zip", io::Error::other(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn sample_tree(root: &Path) {
        std::fs::create_dir_all(root.join("img/nested")).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::write(root.join("slides.md"), "# Deck\n![a](img/a.png)\n").unwrap();
        std::fs::write(root.join("img/a.png"), b"\x89PNG fake").unwrap();
        std::fs::write(root.join("img/nested/b.png"), b"\x89PNG other").unwrap();
    }

    #[test]
    fn includes_files_with_relative_paths_and_skips_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        sample_tree(tmp.path());

        let archive = pack(tmp.path()).unwrap();
        assert_eq!(archive.entries, 3);

        let mut zip = ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
        let mut names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["img/a.png", "img/nested/b.png", "slides.md"]);

        let mut md = String::new();
        zip.by_name("slides.md").unwrap().read_to_string(&mut md).unwrap();
        assert!(md.starts_with("# Deck"));
    }

    #[test]
    fn packing_is_deterministic() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        sample_tree(a.path());
        sample_tree(b.path());

        let first = pack(a.path()).unwrap();
        let again = pack(a.path()).unwrap();
        let other_dir = pack(b.path()).unwrap();
        assert_eq!(first.bytes, again.bytes);
        assert_eq!(first.bytes, other_dir.bytes);
        assert_eq!(first.sha256, other_dir.sha256);
    }

    #[test]
    fn empty_tree_packs_to_an_empty_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = pack(tmp.path()).unwrap();
        assert_eq!(archive.entries, 0);
        let zip = ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
        assert_eq!(zip.len(), 0);
    }
}
