use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use super::types::DiscoveredFile;

/// Normalises a storage path: backslashes become slashes, repeated slashes collapse,
/// and leading/trailing slashes are dropped.
pub fn sanitize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// 0 for the root, otherwise the number of segments.
pub fn path_depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split('/').count()
    }
}

pub fn join_path(dir: &str, name: &str) -> String {
    sanitize_path(&format!("{}/{}", dir, name))
}

/// Whether `path` is `prefix` itself or lies below it. The root contains everything.
pub fn is_within(path: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Lists everything under `root`.
///
/// Directories are reported at every depth but only entered while `max_depth` exceeds
/// their parent's depth. The root itself is not reported. Entry order is not significant.
pub async fn walk(root: &Path, max_depth: usize) -> io::Result<Vec<DiscoveredFile>> {
    let mut found = Vec::new();
    let mut pending = vec![String::new()];

    while let Some(dir) = pending.pop() {
        let depth = path_depth(&dir);
        let mut entries = match tokio::fs::read_dir(root.join(&dir)).await {
            Ok(entries) => entries,
            Err(e) if !dir.is_empty() => {
                tracing::warn!("Skipping unreadable directory '{}': {}", dir, e);
                continue;
            }
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = join_path(&dir, &name);
            let is_directory = entry.file_type().await?.is_dir();

            if is_directory && max_depth > depth {
                pending.push(path.clone());
            }

            found.push(DiscoveredFile {
                file_name: name,
                depth: path_depth(&path),
                file_path: path,
                is_directory,
            });
        }
    }

    Ok(found)
}

/// Every ancestor directory of `files`, the root sentinel included.
pub fn extract_directories(files: &[DiscoveredFile]) -> Vec<DiscoveredFile> {
    let mut directories = BTreeSet::new();
    directories.insert(String::new());

    for file in files {
        let mut ancestor = String::new();
        let segments: Vec<&str> = file.file_path.split('/').collect();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            ancestor = join_path(&ancestor, segment);
            directories.insert(ancestor.clone());
        }
    }

    directories
        .into_iter()
        .map(|path| {
            if path.is_empty() {
                DiscoveredFile::root()
            } else {
                DiscoveredFile::directory(&path)
            }
        })
        .collect()
}
