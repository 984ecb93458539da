use crate::models::{Chapter, ChapterEntry, LoadedChapter, Page, join_pages};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const RECORD_PREFIX: &str = "chapter_";
const RECORD_EXTENSION: &str = "json";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("chapter not found: {0}")]
    MissingChapter(String),
    #[error("invalid chapter key: {0:?}")]
    InvalidKey(String),
}

/// Directory of `chapter_{n}.json` records written by the last segmentation run.
pub struct ChapterStore {
    root: PathBuf,
}

/// Chapter record as read back from disk, tolerant of hand-edited files.
#[derive(Deserialize)]
struct StoredChapter {
    chapter_name: Option<String>,
    #[serde(default)]
    pages: Vec<Page>,
}

impl ChapterStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record keys in chapter order: `chapter_2` sorts before `chapter_10`.
    /// Keys that do not follow the `chapter_{n}` pattern come last.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("failed to read {}", self.root.display()))?
        {
            let path = entry?.path();
            if !path.is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION)
            {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort_by(|a, b| record_ordinal(a).cmp(&record_ordinal(b)).then_with(|| a.cmp(b)));
        Ok(keys)
    }

    pub fn entries(&self) -> Result<Vec<ChapterEntry>> {
        self.list()?
            .into_iter()
            .map(|key| {
                let record = self.read_record(&key)?;
                Ok(ChapterEntry {
                    name: record.chapter_name.unwrap_or_else(|| key.clone()),
                    key,
                })
            })
            .collect()
    }

    pub fn load(&self, keys: &[String]) -> Result<Vec<LoadedChapter>> {
        keys.iter()
            .map(|key| {
                let record = self.read_record(key)?;
                Ok(LoadedChapter {
                    key: key.clone(),
                    content: join_pages(&record.pages),
                    name: record.chapter_name.unwrap_or_else(|| key.clone()),
                })
            })
            .collect()
    }

    /// Deletes every file in the store, then writes the new chapters as
    /// `chapter_1` … `chapter_n`. Not transactional: a failure part way leaves
    /// a partial store.
    pub fn replace_all(&self, chapters: &[Chapter]) -> Result<usize> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;

        let mut removed = 0usize;
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("failed to read {}", self.root.display()))?
        {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
        debug!(removed, store = %self.root.display(), "cleared chapter store");

        for (index, chapter) in chapters.iter().enumerate() {
            let path = self.record_path(&format!("{RECORD_PREFIX}{}", index + 1))?;
            let json = serde_json::to_string_pretty(chapter)?;
            fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        info!(
            chapters = chapters.len(),
            store = %self.root.display(),
            "chapter records written"
        );
        Ok(chapters.len())
    }

    fn read_record(&self, key: &str) -> Result<StoredChapter> {
        let path = self.record_path(key)?;
        if !path.is_file() {
            return Err(StoreError::MissingChapter(key.to_string()).into());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read chapter {key} at {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid chapter record {key}"))
    }

    fn record_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
            return Err(StoreError::InvalidKey(key.to_string()).into());
        }
        Ok(self.root.join(format!("{key}.{RECORD_EXTENSION}")))
    }
}

fn record_ordinal(key: &str) -> u64 {
    key.strip_prefix(RECORD_PREFIX)
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(u64::MAX)
}

pub fn write_pagewise(path: &Path, pages: &[Page]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(pages)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    info!(pages = pages.len(), path = %path.display(), "pagewise content saved");
    Ok(())
}

pub fn read_pagewise(path: &Path) -> Result<Vec<Page>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid pagewise JSON in {}", path.display()))
}

/// `uploaded_data/book_pagewise_content.json` for `book.pdf`.
pub fn pagewise_path(dir: &Path, pdf_path: &Path) -> PathBuf {
    let stem = pdf_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("document");
    dir.join(format!("{stem}_pagewise_content.json"))
}
