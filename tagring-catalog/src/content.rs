use std::io;
use std::path::{Path, PathBuf};

/// Content blobs are keyed by `<name>.<file_type>` under a node-local
/// directory (spec.md §4.8). Writes are idempotent: write to a temp file,
/// then rename over the final path, so a retried write or a concurrent
/// identical write never leaves a partial blob visible.
#[derive(Clone, Debug)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<ContentStore> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(ContentStore { root })
    }

    pub fn blob_path(&self, name: &str, file_type: &str) -> PathBuf {
        self.root.join(format!("{name}.{file_type}"))
    }

    pub fn write(&self, name: &str, file_type: &str, content: &[u8]) -> io::Result<PathBuf> {
        let final_path = self.blob_path(name, file_type);
        let tmp_path = self.root.join(format!(".{name}.{file_type}.tmp"));
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(final_path)
    }

    pub fn read(&self, name: &str, file_type: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.blob_path(name, file_type))
    }
}
