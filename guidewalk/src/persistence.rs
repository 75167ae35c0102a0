use crate::errors::GuideError;
use crate::step::StepId;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Stores which steps of a section the user completed.
///
/// Keys are `(content_key, section_id)`; values are sets of step ids.
pub trait CompletionStore: Send + Sync {
    fn get_completed(&self, content_key: &str, section_id: &str) -> Result<BTreeSet<StepId>, GuideError>;

    fn set_completed(
        &self,
        content_key: &str,
        section_id: &str,
        steps: &BTreeSet<StepId>,
    ) -> Result<(), GuideError>;

    fn clear(&self, content_key: &str, section_id: &str) -> Result<(), GuideError>;
}

/// Completed steps grouped by content key, then by section id.
type Progress = BTreeMap<String, BTreeMap<String, BTreeSet<StepId>>>;

fn lookup(progress: &Progress, content_key: &str, section_id: &str) -> BTreeSet<StepId> {
    progress
        .get(content_key)
        .and_then(|sections| sections.get(section_id))
        .cloned()
        .unwrap_or_default()
}

fn remove(progress: &mut Progress, content_key: &str, section_id: &str) -> bool {
    let Some(sections) = progress.get_mut(content_key) else {
        return false;
    };
    let removed = sections.remove(section_id).is_some();
    if sections.is_empty() {
        progress.remove(content_key);
    }
    removed
}

#[derive(Debug, Default)]
pub struct MemoryCompletionStore {
    entries: Mutex<Progress>,
}

impl MemoryCompletionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CompletionStore for MemoryCompletionStore {
    fn get_completed(&self, content_key: &str, section_id: &str) -> Result<BTreeSet<StepId>, GuideError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(lookup(&entries, content_key, section_id))
    }

    fn set_completed(
        &self,
        content_key: &str,
        section_id: &str,
        steps: &BTreeSet<StepId>,
    ) -> Result<(), GuideError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(content_key.to_string())
            .or_default()
            .insert(section_id.to_string(), steps.clone());
        Ok(())
    }

    fn clear(&self, content_key: &str, section_id: &str) -> Result<(), GuideError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        remove(&mut entries, content_key, section_id);
        Ok(())
    }
}

/// Keeps every section's completed set in one JSON document on disk.
///
/// The document nests section ids under their content key:
/// `{"<content_key>": {"<section_id>": ["<step_id>", ...]}}`.
#[derive(Debug)]
pub struct JsonFileCompletionStore {
    path: PathBuf,
    cache: Mutex<Progress>,
}

impl JsonFileCompletionStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GuideError> {
        let path = path.as_ref().to_path_buf();
        let cache: Progress = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| GuideError::Persistence(format!("read {}: {e}", path.display())))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| {
                    GuideError::Persistence(format!("parse {}: {e}", path.display()))
                })?
            }
        } else {
            BTreeMap::new()
        };
        debug!("Opened completion store at {} ({} content keys)", path.display(), cache.len());
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, cache: &Progress) -> Result<(), GuideError> {
        let json = serde_json::to_string_pretty(cache)
            .map_err(|e| GuideError::Persistence(format!("serialize: {e}")))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| GuideError::Persistence(format!("create {}: {e}", parent.display())))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| GuideError::Persistence(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            warn!("Failed to replace {}: {e}", self.path.display());
            GuideError::Persistence(format!("rename {}: {e}", self.path.display()))
        })
    }
}

impl CompletionStore for JsonFileCompletionStore {
    fn get_completed(&self, content_key: &str, section_id: &str) -> Result<BTreeSet<StepId>, GuideError> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(lookup(&cache, content_key, section_id))
    }

    fn set_completed(
        &self,
        content_key: &str,
        section_id: &str,
        steps: &BTreeSet<StepId>,
    ) -> Result<(), GuideError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .entry(content_key.to_string())
            .or_default()
            .insert(section_id.to_string(), steps.clone());
        self.flush(&cache)
    }

    fn clear(&self, content_key: &str, section_id: &str) -> Result<(), GuideError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if remove(&mut cache, content_key, section_id) {
            self.flush(&cache)?;
        }
        Ok(())
    }
}
