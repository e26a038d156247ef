use crate::locator::Locator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmark {
    pub locator: Locator,
    pub page_label: String,
    pub text: String,
    pub book_title: String,
    pub created_at: DateTime<Utc>,
}

/// Per-book bookmark buckets, keyed by book id. A bucket outlives the
/// book being open; it is reloaded whenever the book reopens.
#[derive(Debug, Serialize, Deserialize)]
pub struct BookmarkStore {
    buckets: HashMap<String, Vec<Bookmark>>,
    #[serde(skip)]
    file_path: Option<PathBuf>,
}

impl BookmarkStore {
    pub fn ephemeral() -> Self {
        Self {
            buckets: HashMap::new(),
            file_path: None,
        }
    }

    pub fn with_file(file_path: &Path) -> Self {
        Self {
            buckets: HashMap::new(),
            file_path: Some(file_path.to_path_buf()),
        }
    }

    pub fn load_or_ephemeral(file_path: Option<&Path>) -> Self {
        match file_path {
            Some(path) => Self::load_from_file(path).unwrap_or_else(|e| {
                log::error!("Failed to load bookmarks from {}: {e}", path.display());
                Self::with_file(path)
            }),
            None => Self::ephemeral(),
        }
    }

    pub fn load_from_file(file_path: &Path) -> anyhow::Result<Self> {
        if file_path.exists() {
            let content = fs::read_to_string(file_path)?;
            let mut store: Self = serde_json::from_str(&content)?;
            store.file_path = Some(file_path.to_path_buf());
            Ok(store)
        } else {
            Ok(Self::with_file(file_path))
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        match &self.file_path {
            Some(path) => {
                let content = serde_json::to_string_pretty(self)?;
                fs::write(path, content)?;
                Ok(())
            }
            // Ephemeral stores don't touch disk.
            None => Ok(()),
        }
    }

    pub fn bookmarks(&self, book_id: &str) -> &[Bookmark] {
        self.buckets.get(book_id).map_or(&[], Vec::as_slice)
    }

    /// Insert a bookmark, de-duplicating on locator: at most one bookmark
    /// per distinct locator per book. Returns whether the bookmark was new.
    pub fn add(&mut self, book_id: &str, bookmark: Bookmark) -> bool {
        let bucket = self.buckets.entry(book_id.to_string()).or_default();
        if bucket.iter().any(|b| b.locator == bookmark.locator) {
            return false;
        }
        bucket.push(bookmark);
        self.persist();
        true
    }

    /// Remove the bookmark at `locator`, if present.
    pub fn remove(&mut self, book_id: &str, locator: &Locator) -> bool {
        let Some(bucket) = self.buckets.get_mut(book_id) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|b| &b.locator != locator);
        let removed = bucket.len() != before;
        if removed {
            self.persist();
        }
        removed
    }

    /// Drop a book's whole bucket; part of the removal cascade when a book
    /// leaves the library.
    pub fn delete_bucket(&mut self, book_id: &str) {
        if self.buckets.remove(book_id).is_some() {
            self.persist();
        }
    }

    /// Plain-text report of a book's bookmarks, one block per bookmark.
    pub fn export_text(&self, book_id: &str) -> String {
        self.bookmarks(book_id)
            .iter()
            .enumerate()
            .map(|(i, b)| {
                format!(
                    "Bookmark {}:\nBook: {}\nPage: {}\nText: {}\n\n",
                    i + 1,
                    if b.book_title.is_empty() {
                        "Untitled"
                    } else {
                        &b.book_title
                    },
                    b.page_label,
                    if b.text.is_empty() { "No text" } else { &b.text },
                )
            })
            .collect()
    }

    fn persist(&self) {
        if self.file_path.is_some() {
            if let Err(e) = self.save() {
                log::error!("Failed to save bookmarks: {e}");
            }
        }
    }
}
