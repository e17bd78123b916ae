use std::path::{Path, PathBuf};

use log::debug;

use crate::error::StorageError;
use crate::jobs::record::DocumentId;

/// Paths of the two text files written for a finished inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPaths {
    pub ocr: PathBuf,
    pub summary: PathBuf,
}

/// Flat directory of per-document result files:
/// `{id}_ocr.txt`, `{id}_summary.txt` and, in debug mode, `{id}.pdf`.
///
/// Blocking I/O; async callers go through `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct ResultStore {
    data_dir: PathBuf,
    keep_raw: bool,
}

/// Writes through a temp file and rename so readers never see half a file.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content).map_err(|e| StorageError::WriteFile {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::RemoveFile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

impl ResultStore {
    pub fn new<P: AsRef<Path>>(data_dir: P, keep_raw: bool) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            keep_raw,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn keeps_raw(&self) -> bool {
        self.keep_raw
    }

    pub fn ocr_path(&self, document_id: DocumentId) -> PathBuf {
        self.data_dir.join(format!("{}_ocr.txt", document_id))
    }

    pub fn summary_path(&self, document_id: DocumentId) -> PathBuf {
        self.data_dir.join(format!("{}_summary.txt", document_id))
    }

    pub fn raw_path(&self, document_id: DocumentId) -> PathBuf {
        self.data_dir.join(format!("{}.pdf", document_id))
    }

    pub fn ensure_directory(&self) -> Result<(), StorageError> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir).map_err(|e| {
                StorageError::CreateDirectory {
                    path: self.data_dir.clone(),
                    source: e,
                }
            })?;
        }
        Ok(())
    }

    /// Writes both result files, replacing any from an earlier attempt.
    pub fn write_results(
        &self,
        document_id: DocumentId,
        ocr_text: &str,
        summary_text: &str,
    ) -> Result<ResultPaths, StorageError> {
        self.ensure_directory()?;
        let paths = ResultPaths {
            ocr: self.ocr_path(document_id),
            summary: self.summary_path(document_id),
        };
        write_atomic(&paths.ocr, ocr_text.as_bytes())?;
        write_atomic(&paths.summary, summary_text.as_bytes())?;
        debug!(
            "Wrote results for document {} to {}",
            document_id,
            self.data_dir.display()
        );
        Ok(paths)
    }

    /// Keeps the downloaded bytes when debugging. Returns `None` otherwise.
    pub fn write_raw(
        &self,
        document_id: DocumentId,
        content: &[u8],
    ) -> Result<Option<PathBuf>, StorageError> {
        if !self.keep_raw {
            return Ok(None);
        }
        self.ensure_directory()?;
        let path = self.raw_path(document_id);
        write_atomic(&path, content)?;
        Ok(Some(path))
    }

    /// Documents that have a summary on disk, in id order.
    pub fn stored_documents(&self) -> Result<Vec<DocumentId>, StorageError> {
        let entries = match std::fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::ReadDirectory {
                    path: self.data_dir.clone(),
                    source: e,
                })
            }
        };

        let mut ids: Vec<DocumentId> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                name.to_str()?
                    .strip_suffix("_summary.txt")?
                    .parse::<u64>()
                    .ok()
                    .map(DocumentId)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Deletes every file belonging to the document. Missing files are fine.
    /// Returns how many files were removed.
    pub fn remove(&self, document_id: DocumentId) -> Result<usize, StorageError> {
        let mut removed = 0;
        for path in [
            self.ocr_path(document_id),
            self.summary_path(document_id),
            self.raw_path(document_id),
        ] {
            if remove_if_exists(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_results() {
        let temp_dir = TempDir::new().unwrap();
        let store = ResultStore::new(temp_dir.path(), false);

        let paths = store
            .write_results(DocumentId(42), "hello world", "a greeting")
            .unwrap();

        assert_eq!(paths.ocr, temp_dir.path().join("42_ocr.txt"));
        assert_eq!(paths.summary, temp_dir.path().join("42_summary.txt"));
        assert_eq!(std::fs::read_to_string(&paths.ocr).unwrap(), "hello world");
        assert_eq!(std::fs::read_to_string(&paths.summary).unwrap(), "a greeting");
        assert!(!temp_dir.path().join("42_ocr.tmp").exists());
    }

    #[test]
    fn test_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        let store = ResultStore::new(&nested, false);

        store.write_results(DocumentId(1), "x", "y").unwrap();
        assert!(nested.join("1_ocr.txt").exists());
    }

    #[test]
    fn test_overwrites_previous_attempt() {
        let temp_dir = TempDir::new().unwrap();
        let store = ResultStore::new(temp_dir.path(), false);

        store.write_results(DocumentId(3), "old", "old").unwrap();
        let paths = store.write_results(DocumentId(3), "new", "new").unwrap();
        assert_eq!(std::fs::read_to_string(paths.ocr).unwrap(), "new");
    }

    #[test]
    fn test_raw_only_in_debug() {
        let temp_dir = TempDir::new().unwrap();

        let store = ResultStore::new(temp_dir.path(), false);
        assert!(store.write_raw(DocumentId(5), b"%PDF").unwrap().is_none());
        assert!(!temp_dir.path().join("5.pdf").exists());

        let store = ResultStore::new(temp_dir.path(), true);
        let path = store.write_raw(DocumentId(5), b"%PDF").unwrap().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"%PDF");
    }

    #[test]
    fn test_remove_all_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = ResultStore::new(temp_dir.path(), true);
        store.write_results(DocumentId(8), "o", "s").unwrap();
        store.write_raw(DocumentId(8), b"raw").unwrap();

        assert_eq!(store.remove(DocumentId(8)).unwrap(), 3);
        assert!(!store.ocr_path(DocumentId(8)).exists());
        assert!(!store.summary_path(DocumentId(8)).exists());
        assert!(!store.raw_path(DocumentId(8)).exists());
    }

    #[test]
    fn test_stored_documents() {
        let temp_dir = TempDir::new().unwrap();
        let store = ResultStore::new(temp_dir.path(), false);
        assert!(store.stored_documents().unwrap().is_empty());

        store.write_results(DocumentId(12), "o", "s").unwrap();
        store.write_results(DocumentId(3), "o", "s").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(
            store.stored_documents().unwrap(),
            vec![DocumentId(3), DocumentId(12)]
        );
    }

    #[test]
    fn test_stored_documents_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let store = ResultStore::new(temp_dir.path().join("absent"), false);
        assert!(store.stored_documents().unwrap().is_empty());
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let store = ResultStore::new(temp_dir.path(), false);
        assert_eq!(store.remove(DocumentId(99)).unwrap(), 0);
    }
}
