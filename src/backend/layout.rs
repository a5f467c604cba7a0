//! Output layout normalization.
//!
//! Converters disagree about where things go: one writes `slides.md` next to
//! an `img/` folder, another nests everything under `<stem>/`, a third adds
//! JSON sidecars. After a tool runs, [`normalize`] reshapes its output
//! directory so that Markdown and assets sit directly under it, with image
//! links relative to the Markdown file that uses them.

use super::types::ConversionResult;
use crate::error::ConvertError;
use regex::{Captures, Regex};
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];
const SIDECAR_SUFFIXES: &[&str] = &["_meta.json"];

fn image_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"!\[(?P<alt>[^\]]*)\]\((?P<target><[^>]+>|[^)\s]+)(?P<title>\s+"[^"]*")?\)"#)
            .unwrap()
    })
}

pub fn normalize(out_dir: &Path) -> Result<ConversionResult, ConvertError> {
    remove_sidecars(out_dir)?;
    // Absolute links only match the disk before anything is moved.
    let (native_markdown, _) = scan(out_dir)?;
    for md in &native_markdown {
        rewrite_image_links(out_dir, md)?;
    }
    hoist_wrapper_dirs(out_dir)?;

    let (markdown_files, asset_files) = scan(out_dir)?;

    debug!(
        out = %out_dir.display(),
        markdown = markdown_files.len(),
        assets = asset_files.len(),
        "output normalized"
    );
    Ok(ConversionResult {
        output_dir: out_dir.to_path_buf(),
        markdown_files,
        asset_files,
    })
}

pub fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            MARKDOWN_EXTENSIONS
                .iter()
                .any(|m| e.eq_ignore_ascii_case(m))
        })
        .unwrap_or(false)
}

fn io_err(context: String) -> impl FnOnce(std::io::Error) -> ConvertError {
    move |e| ConvertError::internal(context, e)
}

fn remove_sidecars(out_dir: &Path) -> Result<(), ConvertError> {
    for entry in WalkDir::new(out_dir).min_depth(1) {
        let entry = entry.map_err(|e| ConvertError::internal("walk output", e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if SIDECAR_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            std::fs::remove_file(entry.path())
                .map_err(io_err(format!("remove sidecar {}", entry.path().display())))?;
        }
    }
    Ok(())
}

/// While the output root holds nothing but one directory, move that
/// directory's children up a level.
fn hoist_wrapper_dirs(out_dir: &Path) -> Result<(), ConvertError> {
    loop {
        let entries: Vec<_> = std::fs::read_dir(out_dir)
            .map_err(io_err(format!("read {}", out_dir.display())))?
            .collect::<Result<_, _>>()
            .map_err(io_err(format!("read {}", out_dir.display())))?;
        let [only] = entries.as_slice() else {
            return Ok(());
        };
        let is_dir = only
            .file_type()
            .map_err(io_err(format!("stat {}", only.path().display())))?
            .is_dir();
        if !is_dir {
            return Ok(());
        }

        // Rename first: the wrapper may contain a child with its own name.
        let staging = out_dir.join(format!(".hoist-{}", uuid::Uuid::new_v4().simple()));
        std::fs::rename(only.path(), &staging)
            .map_err(io_err(format!("rename {}", only.path().display())))?;
        for child in std::fs::read_dir(&staging).map_err(io_err(format!("read {}", staging.display())))? {
            let child = child.map_err(io_err(format!("read {}", staging.display())))?;
            let dest = out_dir.join(child.file_name());
            std::fs::rename(child.path(), &dest)
                .map_err(io_err(format!("move {}", child.path().display())))?;
        }
        std::fs::remove_dir(&staging).map_err(io_err(format!("remove {}", staging.display())))?;
        debug!(wrapper = ?only.file_name(), "hoisted wrapper directory");
    }
}

fn scan(out_dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>), ConvertError> {
    let mut markdown = Vec::new();
    let mut assets = Vec::new();
    for entry in WalkDir::new(out_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| ConvertError::internal("walk output", e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(out_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| entry.path().to_path_buf());
        if is_markdown(&rel) {
            markdown.push(rel);
        } else {
            assets.push(rel);
        }
    }
    markdown.sort();
    assets.sort();
    Ok((markdown, assets))
}

/// Absolute links into the output tree become relative to the Markdown file;
/// links to files that don't exist are only logged.
fn rewrite_image_links(out_dir: &Path, md_rel: &Path) -> Result<(), ConvertError> {
    let md_path = out_dir.join(md_rel);
    let text = std::fs::read_to_string(&md_path)
        .map_err(io_err(format!("read {}", md_path.display())))?;
    let md_parent = md_rel.parent().unwrap_or_else(|| Path::new(""));

    // Tools may have been handed a symlinked temp path (e.g. /tmp vs /private/tmp).
    let roots: Vec<PathBuf> = std::iter::once(out_dir.to_path_buf())
        .chain(out_dir.canonicalize().ok())
        .collect();

    let mut changed = false;
    let rewritten = image_link_re().replace_all(&text, |caps: &Captures| {
        let raw = &caps["target"];
        let link = raw.trim_start_matches('<').trim_end_matches('>');
        let full = caps[0].to_string();
        if is_external(link) {
            return full;
        }
        let path = Path::new(link);
        if path.is_absolute() {
            let Some(inside) = roots.iter().find_map(|r| path.strip_prefix(r).ok()) else {
                warn!(markdown = %md_rel.display(), link, "image link points outside the output");
                return full;
            };
            let rel = relative_path(md_parent, inside);
            changed = true;
            let title = caps.name("title").map(|m| m.as_str()).unwrap_or("");
            return format!("![{}]({}{})", &caps["alt"], to_link(&rel), title);
        }
        if !out_dir.join(md_parent).join(path).exists() {
            warn!(markdown = %md_rel.display(), link, "image link has no matching asset");
        }
        full
    });

    if changed {
        std::fs::write(&md_path, rewritten.as_bytes())
            .map_err(io_err(format!("write {}", md_path.display())))?;
    }
    Ok(())
}

fn is_external(target: &str) -> bool {
    let lower = target.to_ascii_lowercase();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("data:")
        || lower.starts_with("file:")
}

/// Path from directory `from` to `to`, both relative to the same root.
fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component> = from.components().collect();
    let to_parts: Vec<Component> = to.components().collect();
    let common = from
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();
    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for c in &to_parts[common..] {
        out.push(c.as_os_str());
    }
    out
}

fn to_link(path: &Path) -> String {
    let joined = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    if joined.contains(' ') {
        format!("<{joined}>")
    } else {
        joined
    }
}
