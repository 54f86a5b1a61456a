//! Backup tree layout
//!
//! `<root>/<bucket>/<project>` where the bucket is a group path (possibly
//! nested, e.g. `parent/child`) or the ungrouped bucket name.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Make a single path component safe to use on disk
pub fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" => "_".to_string(),
        "." => "_.".to_string(),
        ".." => "_..".to_string(),
        _ => cleaned,
    }
}

/// Destination of a project without touching the filesystem
pub fn destination(root: &Path, bucket: &str, project_path: &str) -> PathBuf {
    bucket_dir(root, bucket).join(sanitize_segment(project_path))
}

fn bucket_dir(root: &Path, bucket: &str) -> PathBuf {
    bucket
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |dir, segment| dir.join(sanitize_segment(segment)))
}

/// Resolve a project's destination and make sure its bucket directory exists
pub fn resolve(root: &Path, bucket: &str, project_path: &str) -> Result<PathBuf> {
    let dir = bucket_dir(root, bucket);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create bucket directory: {}", dir.display()))?;
    Ok(dir.join(sanitize_segment(project_path)))
}
