//! Search Filters
//!
//! Filter strings look like `type:image|type:data`. A file passes when any filter
//! accepts it; an empty filter list accepts everything.

use std::str::FromStr;

use super::types::DiscoveredFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFilter {
    Image,
    Data,
    Pdf,
    Video,
    Audio,
    Text,
    /// Names without any extension.
    Unknown,
    Folder,
}

impl FromStr for FileFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (group, name) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Filter '{}' is not of the form group:name", s))?;
        if group != "type" {
            anyhow::bail!("Unknown filter group '{}'", group);
        }

        match name {
            "image" => Ok(Self::Image),
            "data" => Ok(Self::Data),
            "pdf" => Ok(Self::Pdf),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "text" => Ok(Self::Text),
            "unknown" => Ok(Self::Unknown),
            "folder" => Ok(Self::Folder),
            other => anyhow::bail!("Unknown file type filter '{}'", other),
        }
    }
}

impl FileFilter {
    pub fn matches(&self, file: &DiscoveredFile) -> bool {
        let extension = file
            .file_name
            .rsplit_once('.')
            .map_or(file.file_name.as_str(), |(_, extension)| extension);

        match self {
            Self::Image => ["jpg", "jpeg", "png", "gif", "svg"].contains(&extension),
            Self::Data => ["csv", "xls", "xlsx", "json"].contains(&extension),
            Self::Pdf => extension == "pdf",
            Self::Video => ["mp4", "mov", "avi"].contains(&extension),
            Self::Audio => ["mp3", "wav"].contains(&extension),
            Self::Text => extension == "txt",
            Self::Unknown => !file.file_name.contains('.'),
            Self::Folder => file.is_directory,
        }
    }
}

/// Parses a `|`-separated filter string. Quotes are ignored, bad filters are logged and skipped.
pub fn parse_filters(filters: &str) -> Vec<FileFilter> {
    filters
        .replace(['\'', '"'], "")
        .split('|')
        .map(str::trim)
        .filter(|filter| !filter.is_empty())
        .filter_map(|filter| match filter.parse() {
            Ok(filter) => Some(filter),
            Err(e) => {
                tracing::warn!("Ignoring filter: {}", e);
                None
            }
        })
        .collect()
}

pub fn apply_filters<'a>(
    files: &'a [DiscoveredFile],
    filters: &[FileFilter],
) -> Vec<&'a DiscoveredFile> {
    files
        .iter()
        .filter(|file| filters.is_empty() || filters.iter().any(|filter| filter.matches(file)))
        .collect()
}
