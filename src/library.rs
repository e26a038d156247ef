use crate::locator::Locator;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "folio";

/// One catalog record per imported book. Created on first import, updated
/// on every relocation, removed (with its bookmark bucket and stored
/// binary) on explicit removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mime: String,
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub last_visited: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_locator: Option<Locator>,
}

/// Ordered library catalog. Most recently imported books come first.
#[derive(Debug, Serialize, Deserialize)]
pub struct Library {
    entries: Vec<LibraryEntry>,
    #[serde(skip)]
    file_path: Option<PathBuf>,
}

impl Library {
    pub fn ephemeral() -> Self {
        Self {
            entries: Vec::new(),
            file_path: None,
        }
    }

    pub fn with_file(file_path: &Path) -> Self {
        Self {
            entries: Vec::new(),
            file_path: Some(file_path.to_path_buf()),
        }
    }

    pub fn load_or_ephemeral(file_path: Option<&Path>) -> Self {
        match file_path {
            Some(path) => Self::load_from_file(path).unwrap_or_else(|e| {
                log::error!("Failed to load library from {}: {e}", path.display());
                Self::with_file(path)
            }),
            None => Self::ephemeral(),
        }
    }

    pub fn load_from_file(file_path: &Path) -> Result<Self> {
        if file_path.exists() {
            let content = fs::read_to_string(file_path)?;
            let mut library: Self = serde_json::from_str(&content)?;
            library.file_path = Some(file_path.to_path_buf());
            Ok(library)
        } else {
            Ok(Self::with_file(file_path))
        }
    }

    pub fn save(&self) -> Result<()> {
        match &self.file_path {
            Some(path) => {
                let content = serde_json::to_string_pretty(self)?;
                fs::write(path, content)
                    .with_context(|| format!("Failed to write library to {}", path.display()))?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&LibraryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Insert or update an entry. Existing entries keep their position;
    /// new entries go to the front of the catalog.
    pub fn upsert(&mut self, entry: LibraryEntry) {
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.entries.insert(0, entry),
        }
        self.persist();
    }

    /// Record the last viewed location for a book, with a fresh
    /// last-visited timestamp. Called on every relocation.
    pub fn record_position(&mut self, id: &str, locator: &Locator) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.last_locator = Some(locator.clone());
            entry.last_visited = Some(Utc::now());
            self.persist();
        }
    }

    /// Saved reading position for a book, if any.
    pub fn saved_position(&self, id: &str) -> Option<Locator> {
        self.get(id).and_then(|e| e.last_locator.clone())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        let removed = self.entries.len() != before;
        if removed {
            self.persist();
        }
        removed
    }

    fn persist(&self) {
        if self.file_path.is_some() {
            if let Err(e) = self.save() {
                log::error!("Failed to save library: {e}");
            }
        }
    }
}

/// Where the persisted state lives: catalog and bookmark JSON files plus
/// the binary blob directory.
pub struct DataPaths {
    pub catalog_file: PathBuf,
    pub bookmarks_file: PathBuf,
    pub books_dir: PathBuf,
}

/// Compute XDG-compliant data paths, creating directories as needed.
pub fn resolve_data_paths() -> Result<DataPaths> {
    let data_dir = dirs::data_dir()
        .context("Could not determine data directory")?
        .join(APP_NAME);
    let books_dir = data_dir.join("books");

    fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {data_dir:?}"))?;
    fs::create_dir_all(&books_dir)
        .with_context(|| format!("Failed to create books directory: {books_dir:?}"))?;

    Ok(DataPaths {
        catalog_file: data_dir.join("library.json"),
        bookmarks_file: data_dir.join("bookmarks.json"),
        books_dir,
    })
}

/// Log file path under the XDG state dir, falling back to the cache dir.
pub fn resolve_log_path() -> Result<PathBuf> {
    let base = dirs::state_dir()
        .or_else(dirs::cache_dir)
        .context("Could not determine state or cache directory")?;

    let log_dir = base.join(APP_NAME);
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {log_dir:?}"))?;

    Ok(log_dir.join(format!("{APP_NAME}.log")))
}
