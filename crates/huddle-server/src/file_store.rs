//! On-disk file storage and the in-memory registry that mirrors it.
//!
//! Uploads are written to `<base>/.incoming/` and renamed into place only
//! when they complete, so a half-written file is never visible in storage
//! or in the registry.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use huddle_shared::FileRecord;

use crate::error::ServerError;

const INCOMING_DIR: &str = ".incoming";

/// Reduce a client-supplied name to a bare filename inside storage.
pub fn sanitize_filename(raw: &str) -> Result<String, ServerError> {
    let name = raw.trim().rsplit(['/', '\\']).next().unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." || name == INCOMING_DIR || name.contains('\0')
    {
        return Err(ServerError::InvalidFilename(raw.to_string()));
    }
    Ok(name.to_string())
}

/// A half-open upload. Dropping it without [`FileStore::finish_upload`] or
/// [`FileStore::abort_upload`] leaves a stray part file that the next
/// startup clears.
#[derive(Debug)]
pub struct UploadSink {
    filename: String,
    declared_size: u64,
    written: u64,
    part_path: PathBuf,
    file: fs::File,
}

impl UploadSink {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }
}

#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
    max_upload_size: u64,
    registry: Arc<Mutex<Vec<FileRecord>>>,
    next_part: Arc<AtomicU64>,
}

impl FileStore {
    /// Open (creating if needed) the storage directory and register every
    /// regular file already in it as a cached entry.
    pub async fn open(base_path: PathBuf, max_upload_size: u64) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Storage(format!(
                "Failed to create storage directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        let incoming = base_path.join(INCOMING_DIR);
        if fs::metadata(&incoming).await.is_ok() {
            fs::remove_dir_all(&incoming).await?;
        }
        fs::create_dir_all(&incoming).await?;

        let store = Self {
            base_path,
            max_upload_size,
            registry: Arc::new(Mutex::new(Vec::new())),
            next_part: Arc::new(AtomicU64::new(0)),
        };

        let count = store.load_existing().await?;
        info!(
            path = %store.base_path.display(),
            files = count,
            "File store initialized"
        );
        Ok(store)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    async fn load_existing(&self) -> Result<usize, ServerError> {
        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| ServerError::Storage(format!("Failed to list storage: {}", e)))?;

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                warn!(name = ?entry.file_name(), "Skipping non UTF-8 filename");
                continue;
            };
            match entry.metadata().await {
                Ok(meta) if meta.is_file() => found.push(FileRecord::cached(name, meta.len())),
                Ok(_) => {}
                Err(e) => warn!(file = %name, error = %e, "Error loading existing file"),
            }
        }
        found.sort_by(|a, b| a.filename.cmp(&b.filename));

        let count = found.len();
        *self.registry.lock().await = found;
        Ok(count)
    }

    /// Snapshot of the registry, oldest entry first.
    pub async fn list(&self) -> Vec<FileRecord> {
        self.registry.lock().await.clone()
    }

    pub async fn get(&self, filename: &str) -> Option<FileRecord> {
        self.registry
            .lock()
            .await
            .iter()
            .find(|r| r.filename == filename)
            .cloned()
    }

    /// Open a fresh sink for `filename`.
    pub async fn begin_upload(&self, filename: &str, size: u64) -> Result<UploadSink, ServerError> {
        let filename = sanitize_filename(filename)?;
        if size > self.max_upload_size {
            return Err(ServerError::UploadTooLarge {
                size,
                max: self.max_upload_size,
            });
        }

        let part = self.next_part.fetch_add(1, Ordering::Relaxed);
        let part_path = self
            .base_path
            .join(INCOMING_DIR)
            .join(format!("upload-{part}.part"));
        let file = fs::File::create(&part_path).await?;

        debug!(file = %filename, part = %part_path.display(), "Opened upload sink");
        Ok(UploadSink {
            filename,
            declared_size: size,
            written: 0,
            part_path,
            file,
        })
    }

    /// Append bytes to a sink, enforcing the upload size limit.
    pub async fn write_chunk(&self, sink: &mut UploadSink, data: &[u8]) -> Result<(), ServerError> {
        let total = sink.written + data.len() as u64;
        if total > self.max_upload_size {
            return Err(ServerError::UploadTooLarge {
                size: total,
                max: self.max_upload_size,
            });
        }
        sink.file.write_all(data).await?;
        sink.written = total;
        Ok(())
    }

    /// Close the sink, move it into place and replace any registry entry
    /// with the same name. The recorded size is read back from disk.
    pub async fn finish_upload(
        &self,
        mut sink: UploadSink,
        uploader: &str,
    ) -> Result<FileRecord, ServerError> {
        sink.file.flush().await?;
        sink.file.sync_all().await?;
        let UploadSink {
            filename,
            declared_size,
            part_path,
            file,
            ..
        } = sink;
        drop(file);

        let final_path = self.path_for(&filename)?;

        // Rename, stat and upsert under the registry lock so that two
        // same-named uploads finishing together leave disk and registry
        // agreeing on the winner.
        let mut registry = self.registry.lock().await;
        fs::rename(&part_path, &final_path).await?;
        let size = fs::metadata(&final_path).await?.len();
        if size != declared_size {
            warn!(
                file = %filename,
                declared = declared_size,
                actual = size,
                "Upload size differs from announced size"
            );
        }

        let record = FileRecord::new(filename, size, uploader);
        registry.retain(|r| r.filename != record.filename);
        registry.push(record.clone());

        info!(file = %record.filename, size, from = %uploader, "Upload stored");
        Ok(record)
    }

    /// Discard a half-open sink.
    pub async fn abort_upload(&self, sink: UploadSink) {
        let UploadSink {
            filename,
            part_path,
            file,
            written,
            ..
        } = sink;
        drop(file);
        if let Err(e) = fs::remove_file(&part_path).await {
            warn!(file = %filename, error = %e, "Failed to remove partial upload");
        }
        debug!(file = %filename, written, "Upload abandoned");
    }

    /// Open a stored file for streaming back to a client.
    pub async fn open_download(&self, filename: &str) -> Result<(String, fs::File), ServerError> {
        let filename = sanitize_filename(filename)?;
        let path = self.path_for(&filename)?;

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(ServerError::FileNotFound(filename)),
        }

        let file = fs::File::open(&path).await?;
        Ok((filename, file))
    }

    fn path_for(&self, filename: &str) -> Result<PathBuf, ServerError> {
        let path = self.base_path.join(filename);
        if path.parent() != Some(self.base_path.as_path()) {
            return Err(ServerError::InvalidFilename(filename.to_string()));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().to_path_buf(), 1024).await.unwrap();
        (store, dir)
    }

    async fn upload(store: &FileStore, name: &str, data: &[u8], from: &str) -> FileRecord {
        let mut sink = store.begin_upload(name, data.len() as u64).await.unwrap();
        store.write_chunk(&mut sink, data).await.unwrap();
        store.finish_upload(sink, from).await.unwrap()
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a.txt").unwrap(), "a.txt");
        assert_eq!(sanitize_filename("dir/sub/a.txt").unwrap(), "a.txt");
        assert_eq!(sanitize_filename("C:\\docs\\b.pdf").unwrap(), "b.pdf");
        assert_eq!(sanitize_filename(".bashrc").unwrap(), ".bashrc");
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename(".").is_err());
        assert!(sanitize_filename("dir/").is_err());
        assert!(sanitize_filename(".incoming").is_err());
    }

    #[tokio::test]
    async fn test_upload_registers_file() {
        let (store, dir) = test_store().await;
        let record = upload(&store, "a.txt", b"0123456789", "alice").await;

        assert_eq!(record, FileRecord::new("a.txt", 10, "alice"));
        assert_eq!(store.list().await, vec![record]);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_reupload_replaces_entry() {
        let (store, dir) = test_store().await;
        upload(&store, "a.txt", b"first", "alice").await;
        upload(&store, "b.txt", b"other", "alice").await;
        upload(&store, "a.txt", b"second version", "bob").await;

        let files = store.list().await;
        let a: Vec<_> = files.iter().filter(|f| f.filename == "a.txt").collect();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].size, 14);
        assert_eq!(a[0].from, "bob");
        assert_eq!(files.len(), 2);
        assert_eq!(
            std::fs::read(dir.path().join("a.txt")).unwrap(),
            b"second version"
        );
    }

    #[tokio::test]
    async fn test_partial_upload_is_invisible() {
        let (store, dir) = test_store().await;
        let mut sink = store.begin_upload("half.bin", 100).await.unwrap();
        store.write_chunk(&mut sink, &[1; 50]).await.unwrap();

        assert!(store.list().await.is_empty());
        assert!(!dir.path().join("half.bin").exists());
        assert!(store.open_download("half.bin").await.is_err());

        store.abort_upload(sink).await;
        let leftovers = std::fs::read_dir(dir.path().join(INCOMING_DIR)).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_upload_limit() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.begin_upload("big.bin", 4096).await,
            Err(ServerError::UploadTooLarge { .. })
        ));

        let mut sink = store.begin_upload("sneaky.bin", 10).await.unwrap();
        store.write_chunk(&mut sink, &[0; 1000]).await.unwrap();
        assert!(matches!(
            store.write_chunk(&mut sink, &[0; 100]).await,
            Err(ServerError::UploadTooLarge { .. })
        ));
        store.abort_upload(sink).await;
    }

    #[tokio::test]
    async fn test_bootstrap_registers_cached_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("old.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        std::fs::create_dir(dir.path().join(INCOMING_DIR)).unwrap();
        std::fs::write(dir.path().join(INCOMING_DIR).join("upload-0.part"), b"junk").unwrap();

        let store = FileStore::open(dir.path().to_path_buf(), 1024).await.unwrap();
        let files = store.list().await;
        assert_eq!(files, vec![FileRecord::cached("old.txt", 5)]);
        assert!(files[0].is_cached());
        assert!(!dir.path().join(INCOMING_DIR).join("upload-0.part").exists());
    }

    #[tokio::test]
    async fn test_download_missing() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.open_download("nope.txt").await,
            Err(ServerError::FileNotFound(_))
        ));
    }
}
