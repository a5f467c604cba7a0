#![allow(dead_code)]

use slidedown::config::Config;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// pptx2md stand-in. Called as `pptx2md <in> -o <md> -i <img>`: writes one
/// Markdown file referencing two images and copies the input beside them so
/// archives can be told apart.
pub const PPTX2MD_OK: &str = r#"in="$1"; md="$3"; img="$5"
mkdir -p "$img"
printf 'PNG-A' > "$img/a.png"
printf 'PNG-B' > "$img/b.png"
cp "$in" "$img/source.bin"
printf '# Slide 1\n\n![a](img/a.png)\n\n# Slide 2\n\n# Slide 3\n\n![b](img/b.png)\n' > "$md""#;

pub struct Fixture {
    pub tmp: TempDir,
    pub cfg: Config,
}

impl Fixture {
    /// Config with every tool pointing at scripts inside a fresh temp dir.
    pub fn new(pptx2md_body: &str) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut cfg = Config::default();
        cfg.workspace.root = tmp.path().join("ws").display().to_string();
        cfg.python.scripts_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/scripts").to_string();
        cfg.backends.pptx2md.program = fake_tool(tmp.path(), "pptx2md", pptx2md_body)
            .display()
            .to_string();
        cfg.backends.pptx2md.timeout_seconds = Some(10);
        Self { tmp, cfg }
    }

    pub fn tool(&self, name: &str, body: &str) -> String {
        fake_tool(self.tmp.path(), name, body).display().to_string()
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.cfg.workspace.root_dir()
    }

    /// Workspace directories still on disk.
    pub fn leftover_workspaces(&self) -> usize {
        match std::fs::read_dir(self.workspace_root()) {
            Ok(rd) => rd.count(),
            Err(_) => 0,
        }
    }
}

pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write tool");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

/// Bytes that pass the PPTX container sniff.
pub fn pptx_bytes(tag: &str) -> Vec<u8> {
    let mut v = b"PK\x03\x04".to_vec();
    v.extend_from_slice(tag.as_bytes());
    v
}

pub fn zip_names(bytes: &[u8]) -> Vec<String> {
    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(bytes)).expect("valid zip");
    let mut names: Vec<String> = (0..zip.len())
        .map(|i| zip.by_index(i).expect("entry").name().to_string())
        .collect();
    names.sort();
    names
}

pub fn zip_entry(bytes: &[u8], name: &str) -> Vec<u8> {
    use std::io::Read;
    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(bytes)).expect("valid zip");
    let mut out = Vec::new();
    zip.by_name(name)
        .expect("entry present")
        .read_to_end(&mut out)
        .expect("read entry");
    out
}
