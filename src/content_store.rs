use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

/// Content-derived book identifier: `bk_` plus the first 12 hex digits of
/// the binary's md5. Stable across re-imports of the same file.
pub fn book_id(bytes: &[u8]) -> String {
    let digest = md5::compute(bytes);
    format!("bk_{}", &format!("{digest:x}")[..12])
}

/// Binary blob store, one file per book id. The catalog and bookmark
/// stores reference blobs by id; removal cascades through here.
pub struct ContentStore {
    dir: PathBuf,
}

impl ContentStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.epub"))
    }

    pub fn put(&self, id: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create blob directory: {:?}", self.dir))?;
        let path = self.blob_path(id);
        fs::write(&path, bytes)
            .with_context(|| format!("Failed to store book binary at {}", path.display()))?;
        info!("Stored {} bytes for {id}", bytes.len());
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.blob_path(id).exists()
    }

    /// Load a book's binary. Missing blobs are an error the caller
    /// surfaces; a catalog entry may outlive its data.
    pub fn get(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(id);
        fs::read(&path).with_context(|| format!("Book data is missing for {id}"))
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.blob_path(id);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete book binary {}", path.display()))?;
        }
        Ok(())
    }
}
