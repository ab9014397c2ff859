//! Discovery of saved extraction payload files for batch ingestion.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{KgraphError, Result};

/// Extensions accepted as extraction payloads (case-insensitive)
pub const PAYLOAD_EXTENSIONS: &[&str] = &["json", "txt", "md"];

/// A payload file and the `source_doc` it will be ingested under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFile {
    /// Path relative to the ingestion root, `/`-separated; used as `source_doc`
    pub relative_path: String,
    pub absolute_path: PathBuf,
}

/// Collect payload files under `root`, sorted by relative path.
///
/// `root` may be a single file, in which case its file name becomes the
/// relative path. Files with other extensions are skipped.
pub fn discover_payload_files(root: &Path) -> Result<Vec<PayloadFile>> {
    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| KgraphError::InvalidInput(format!("Not a file: {}", root.display())))?;
        return Ok(vec![PayloadFile {
            relative_path: name,
            absolute_path: root.to_path_buf(),
        }]);
    }

    if !root.is_dir() {
        return Err(KgraphError::InvalidInput(format!(
            "Payload path does not exist: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || !has_payload_extension(path) {
            continue;
        }

        let relative_path = path
            .strip_prefix(root)
            .map_err(|_| {
                KgraphError::InvalidInput(format!("Failed to compute relative path for: {}", path.display()))
            })?
            .to_string_lossy()
            .replace('\\', "/");

        files.push(PayloadFile {
            relative_path,
            absolute_path: path.to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    log::info!("Discovered {} payload file(s) in {}", files.len(), root.display());
    Ok(files)
}

fn has_payload_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| PAYLOAD_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
