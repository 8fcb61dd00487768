use serde::{Deserialize, Serialize};

use super::paths::{path_depth, sanitize_path};

pub const INDEX_ADDED_EVENT: &str = "index:added";
pub const INDEX_DELETED_EVENT: &str = "index:deleted";
pub const INDEX_UPDATED_EVENT: &str = "index:updated";

/// One file or directory under the storage root.
///
/// `file_path` is relative to the root, slash separated, without leading or trailing slash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredFile {
    pub file_name: String,
    pub file_path: String,
    pub is_directory: bool,
    pub depth: usize,
}

impl DiscoveredFile {
    /// The root sentinel.
    pub fn root() -> Self {
        Self {
            file_name: String::new(),
            file_path: String::new(),
            is_directory: true,
            depth: 0,
        }
    }

    pub fn file(path: &str) -> Self {
        Self::at(path, false)
    }

    pub fn directory(path: &str) -> Self {
        Self::at(path, true)
    }

    fn at(path: &str, is_directory: bool) -> Self {
        let file_path = sanitize_path(path);
        let file_name = file_path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            depth: path_depth(&file_path),
            file_name,
            file_path,
            is_directory,
        }
    }

    pub fn is_root(&self) -> bool {
        self.file_path.is_empty()
    }
}
