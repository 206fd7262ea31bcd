//! Content-addressed local staging directory.
//!
//! Incoming bodies are written to a unique temp file while being hashed,
//! then renamed to their checksum once verified. Chunk files live next to
//! the finished files under session-recorded names.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use stowage_core::archive::SNIFF_LEN;
use stowage_core::hash::{ContentHash, ContentHasher};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};

const COPY_BUF: usize = 64 * 1024;

/// Failure while streaming a body into staging.
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("body exceeds the declared size of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A received body staged under a temporary name, not yet verified.
#[derive(Debug)]
pub struct IncomingFile {
    pub temp: PathBuf,
    pub size: u64,
    pub hash: ContentHash,
    /// First bytes of the body, for archive sniffing.
    pub leading: Vec<u8>,
}

pub struct StagingArea {
    root: PathBuf,
    temp_seq: AtomicU64,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Arc<Self>> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Arc::new(Self {
            root,
            temp_seq: AtomicU64::new(0),
        }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a staged file or chunk by its staging name.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Staging name for one chunk of a session.
    pub fn chunk_name(checksum: &str, index: u32) -> String {
        format!("{checksum}.c{index}")
    }

    fn temp_path(&self) -> PathBuf {
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".incoming-{}-{seq}", std::process::id()))
    }

    /// Stream a request body into a temp file, hashing as it goes. The
    /// stream is abandoned the moment it runs past `max` bytes, before the
    /// excess touches disk.
    pub async fn receive<S, E>(&self, mut body: S, max: u64) -> Result<IncomingFile, ReceiveError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let temp = self.temp_path();
        let file = fs::File::create(&temp).await.map_err(ReceiveError::Io)?;
        let mut writer = BufWriter::new(file);
        let mut hasher = ContentHasher::new();
        let mut leading: Vec<u8> = Vec::with_capacity(SNIFF_LEN);

        let result: Result<(), ReceiveError> = async {
            let mut received: u64 = 0;
            while let Some(frame) = body.next().await {
                let chunk = frame.map_err(|e| {
                    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e.to_string())
                })?;
                received += chunk.len() as u64;
                if received > max {
                    return Err(ReceiveError::TooLarge { limit: max });
                }
                if leading.len() < SNIFF_LEN {
                    let want = SNIFF_LEN - leading.len();
                    leading.extend_from_slice(&chunk[..want.min(chunk.len())]);
                }
                hasher.update(&chunk);
                writer.write_all(&chunk).await?;
            }
            writer.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            self.discard(&temp).await;
            return Err(e);
        }
        Ok(IncomingFile {
            temp,
            size: hasher.bytes_hashed(),
            hash: hasher.finalize(),
            leading,
        })
    }

    /// Atomically move a verified temp file to its staging name.
    pub async fn promote(&self, temp: &Path, name: &str) -> std::io::Result<()> {
        fs::rename(temp, self.path_of(name)).await
    }

    /// Best-effort removal of a temp file.
    pub async fn discard(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to discard temp file");
            }
        }
    }

    /// Remove a staged file by name; absent is not an error.
    pub async fn remove(&self, name: &str) -> std::io::Result<()> {
        match fs::remove_file(self.path_of(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn file_size(&self, name: &str) -> std::io::Result<Option<u64>> {
        match fs::metadata(self.path_of(name)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn read_all(&self, name: &str) -> std::io::Result<Bytes> {
        Ok(Bytes::from(fs::read(self.path_of(name)).await?))
    }

    /// Read `len` bytes starting at `offset`; short at end of file.
    pub async fn read_range(&self, name: &str, offset: u64, len: u64) -> std::io::Result<Bytes> {
        let mut file = fs::File::open(self.path_of(name)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }

    /// Concatenate chunk files in order into a temp file, hashing the whole.
    pub async fn assemble(&self, chunk_names: &[String]) -> std::io::Result<(PathBuf, ContentHash)> {
        let temp = self.temp_path();
        let mut writer = BufWriter::new(fs::File::create(&temp).await?);
        let mut hasher = ContentHasher::new();

        let result: std::io::Result<()> = async {
            let mut buf = vec![0u8; COPY_BUF];
            for name in chunk_names {
                let mut chunk = fs::File::open(self.path_of(name)).await?;
                loop {
                    let n = chunk.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                    writer.write_all(&buf[..n]).await?;
                }
            }
            writer.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            self.discard(&temp).await;
            return Err(e);
        }
        Ok((temp, hasher.finalize()))
    }

    /// Recompute the content hash of a staged file, streaming.
    pub async fn rehash(&self, name: &str) -> std::io::Result<Option<ContentHash>> {
        let mut file = match fs::File::open(self.path_of(name)).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut hasher = ContentHasher::new();
        let mut buf = vec![0u8; COPY_BUF];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Some(hasher.finalize()))
    }

    /// All regular files in the staging root with their modification time.
    pub async fn scan(&self) -> std::io::Result<Vec<(String, SystemTime)>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            files.push((name, meta.modified()?));
        }
        Ok(files)
    }
}
