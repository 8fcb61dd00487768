//! File Index Service
//!
//! ## Replication
//! Local mutations are applied first and then emitted on the bus:
//! - `index:added [origin, files]`
//! - `index:deleted [origin, file]`
//! - `index:updated [origin, previousPath, file]`
//!
//! Listeners are installed once the initial walk is done, so broadcasts that arrive during
//! the walk are lost. Every process walks the same storage root, which covers them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;

use anyhow::Result;
use serde_json::Value;

use super::filters::{apply_filters, parse_filters};
use super::paths::{extract_directories, is_within, sanitize_path, walk};
use super::search::{FuzzySearchOptions, Scored, fuzzy_search};
use super::types::{
    DiscoveredFile, INDEX_ADDED_EVENT, INDEX_DELETED_EVENT, INDEX_UPDATED_EVENT,
};
use crate::events::EventBus;
use crate::transport::types::ProcessId;

const LISTENER_KEY: &str = "file-index";

/// Options used by `FileIndex::search`.
pub const INDEX_SEARCH_OPTIONS: FuzzySearchOptions = FuzzySearchOptions {
    gram_size: 2,
    threshold: 0.0,
    take: 10,
};

pub struct FileIndex {
    root: PathBuf,
    max_depth: usize,
    bus: Arc<EventBus>,
    origin: ProcessId,
    generating: AtomicBool,
    files: RwLock<Vec<DiscoveredFile>>,
}

impl FileIndex {
    pub fn new(
        root: PathBuf,
        max_depth: usize,
        bus: Arc<EventBus>,
        origin: ProcessId,
    ) -> Arc<Self> {
        Arc::new(Self {
            root,
            max_depth,
            bus,
            origin,
            generating: AtomicBool::new(false),
            files: RwLock::new(Vec::new()),
        })
    }

    /// Walks the storage root, replaces the index with the result and starts listening
    /// for remote changes. Returns the number of entries.
    pub async fn init(self: &Arc<Self>) -> Result<usize> {
        tracing::info!("Initializing index of {}", self.root.display());
        let started = Instant::now();
        self.generating.store(true, Ordering::SeqCst);

        let walked = walk(&self.root, self.max_depth).await;
        let mut files = match walked {
            Ok(files) => files,
            Err(e) => {
                self.generating.store(false, Ordering::SeqCst);
                return Err(anyhow::anyhow!(
                    "Failed to walk {}: {}",
                    self.root.display(),
                    e
                ));
            }
        };
        files.push(DiscoveredFile::root());
        let count = files.len();

        *self.files.write().unwrap_or_else(|p| p.into_inner()) = files;
        self.generating.store(false, Ordering::SeqCst);
        self.listen();

        tracing::info!(
            "Index initialized in {}ms with {} files",
            started.elapsed().as_millis(),
            count
        );
        Ok(count)
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<DiscoveredFile>> {
        self.files.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<DiscoveredFile>> {
        self.files.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Best matches of `term` against file paths, restricted by a `type:` filter string.
    /// The root sentinel is never returned.
    pub fn search(&self, term: &str, filters: &str) -> Vec<Scored<DiscoveredFile>> {
        if self.is_generating() {
            return Vec::new();
        }

        let filters = parse_filters(filters);
        let files = self.read();
        let candidates: Vec<&DiscoveredFile> = apply_filters(&files, &filters)
            .into_iter()
            .filter(|file| !file.file_name.is_empty())
            .collect();

        fuzzy_search(
            term,
            &candidates,
            |file: &&DiscoveredFile| file.file_path.as_str(),
            INDEX_SEARCH_OPTIONS,
        )
        .into_iter()
        .map(|result| Scored {
            item: result.item.clone(),
            score: result.score,
        })
        .collect()
    }

    pub fn get(&self, path: &str) -> Option<DiscoveredFile> {
        if self.is_generating() {
            return None;
        }
        let path = sanitize_path(path);
        self.read().iter().find(|file| file.file_path == path).cloned()
    }

    /// Entries below `path` at most `depth` levels deeper than it.
    ///
    /// Empty when `path` is not indexed.
    pub fn get_files(&self, path: &str, depth: usize) -> Vec<DiscoveredFile> {
        if self.is_generating() {
            return Vec::new();
        }

        let path = sanitize_path(path);
        let files = self.read();
        let Some(base) = files.iter().find(|file| file.file_path == path) else {
            return Vec::new();
        };

        files
            .iter()
            .filter(|file| {
                is_within(&file.file_path, &base.file_path)
                    && file.depth > base.depth
                    && file.depth <= base.depth + depth
            })
            .cloned()
            .collect()
    }

    /// Inserts or replaces entries by path, then broadcasts them.
    pub fn add(&self, files: Vec<DiscoveredFile>) {
        if self.is_generating() || files.is_empty() {
            return;
        }

        upsert(&mut self.write(), &files);
        self.broadcast(INDEX_ADDED_EVENT, vec![serde_json::to_value(&files)]);
    }

    /// Like `add`, also inserting every ancestor directory not yet indexed.
    pub fn add_with_parents(&self, files: Vec<DiscoveredFile>) {
        if self.is_generating() {
            return;
        }

        let mut combined: Vec<DiscoveredFile> = {
            let existing = self.read();
            extract_directories(&files)
                .into_iter()
                .filter(|directory| {
                    !existing
                        .iter()
                        .any(|file| file.file_path == directory.file_path)
                })
                .collect()
        };
        combined.extend(files);
        self.add(combined);
    }

    pub fn delete(&self, file: &DiscoveredFile) {
        if self.is_generating() {
            return;
        }

        remove(&mut self.write(), &file.file_path);
        self.broadcast(INDEX_DELETED_EVENT, vec![serde_json::to_value(file)]);
    }

    /// Replaces the entry at `path` with `file`, e.g. after a rename.
    pub fn update(&self, path: &str, file: DiscoveredFile) {
        if self.is_generating() {
            return;
        }

        replace(&mut self.write(), path, &file);
        self.broadcast(
            INDEX_UPDATED_EVENT,
            vec![Ok(Value::from(path)), serde_json::to_value(&file)],
        );
    }

    fn broadcast(&self, event: &str, payload: Vec<serde_json::Result<Value>>) {
        let mut args = vec![Value::from(self.origin.0)];
        for value in payload {
            match value {
                Ok(value) => args.push(value),
                Err(e) => {
                    tracing::error!("Failed to encode {} payload: {}", event, e);
                    return;
                }
            }
        }
        self.bus.emit(event, args);
    }

    fn listen(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        for event in [INDEX_ADDED_EVENT, INDEX_DELETED_EVENT, INDEX_UPDATED_EVENT] {
            let weak = weak.clone();
            self.bus.on_keyed(
                event,
                Arc::new(move |args: &[Value]| {
                    if let Some(index) = weak.upgrade() {
                        index.apply_remote(event, args);
                    }
                }),
                LISTENER_KEY,
                true,
            );
        }
    }

    fn apply_remote(&self, event: &str, args: &[Value]) {
        let Some(origin) = args.first().and_then(|value| value.as_u64()) else {
            tracing::warn!("Dropping {} without origin", event);
            return;
        };
        if origin == u64::from(self.origin.0) {
            return;
        }

        let applied = match event {
            INDEX_ADDED_EVENT => decode::<Vec<DiscoveredFile>>(args.get(1))
                .map(|files| upsert(&mut self.write(), &files)),
            INDEX_DELETED_EVENT => decode::<DiscoveredFile>(args.get(1))
                .map(|file| remove(&mut self.write(), &file.file_path)),
            INDEX_UPDATED_EVENT => {
                let path = args.get(1).and_then(Value::as_str);
                let file = decode::<DiscoveredFile>(args.get(2));
                path.zip(file)
                    .map(|(path, file)| replace(&mut self.write(), path, &file))
            }
            _ => None,
        };

        match applied {
            Some(()) => tracing::debug!("Applied {} from process {}", event, origin),
            None => tracing::warn!("Malformed {} from process {}", event, origin),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Option<&Value>) -> Option<T> {
    value.and_then(|value| serde_json::from_value(value.clone()).ok())
}

fn upsert(index: &mut Vec<DiscoveredFile>, files: &[DiscoveredFile]) {
    for file in files {
        match index.iter_mut().find(|f| f.file_path == file.file_path) {
            Some(existing) => *existing = file.clone(),
            None => index.push(file.clone()),
        }
    }
}

fn remove(index: &mut Vec<DiscoveredFile>, path: &str) {
    if let Some(position) = index.iter().position(|f| f.file_path == path) {
        index.remove(position);
    }
}

fn replace(index: &mut Vec<DiscoveredFile>, path: &str, file: &DiscoveredFile) {
    match index.iter_mut().find(|f| f.file_path == path) {
        Some(existing) => *existing = file.clone(),
        None => tracing::debug!("Update of unknown path '{}'", path),
    }
}
