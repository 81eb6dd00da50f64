//! Storage backend façade: one `StorageBackend` trait over
//! local filesystem, FTP, SCP/SFTP, WebDAV and optical-media/device
//! transports, plus the connection-allocation and bandwidth-limiting glue
//! shared by all of them.

pub mod bandwidth;
pub mod ftp;
pub mod local;
pub mod optical;
pub mod sftp;
pub mod uri;
pub mod webdav;

pub use bandwidth::{BandwidthLimiter, Priority, ServerAllocator, WriteBuffer};
pub use uri::{StorageSpecifier, UriError};

use std::io::{self, Read, Seek, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] crate::credential::AuthenticationError),
    #[error("{0}")]
    Uri(#[from] UriError),
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// What a backend can and cannot do — the engine consults this to choose
/// between `ChunkWriter`'s `Seekable` and `Streaming` strategies and to
/// decide whether an atomic commit-by-rename is available.
#[derive(Debug, Clone, Copy)]
pub struct StorageCapabilities {
    pub random_access_read: bool,
    pub random_access_write: bool,
    pub rename_atomic: bool,
    pub directory_list: bool,
    /// Whether the backend can allocate a temporary name alongside the
    /// final one for write-then-rename. Optical/device backends cannot.
    pub tmp_name: bool,
}

/// A handle the archive engine reads from or writes to. Seekable backends
/// (local, sftp with range support) implement `Read + Write + Seek`
/// directly; others wrap a forward-only stream and panic-free reject seeks
/// via `io::Error` instead — callers must consult [`StorageCapabilities`]
/// before relying on seeking.
pub trait StorageHandle: Read + Write + Send + std::any::Any {
    fn stream_position(&mut self) -> io::Result<u64>;
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Backend façade implemented once per transport: open/create/read/write/
/// rename/remove/list/stat.
pub trait StorageBackend: Send + Sync {
    fn capabilities(&self) -> StorageCapabilities;

    /// A human-readable identifier for this backend instance (host, device
    /// path, or `"local"`), used in listing output and log lines.
    fn printable_name(&self) -> String;

    /// For backends without random-access write (FTP/WebDAV), takes the
    /// fully-buffered bytes written to `handle` and transmits them to
    /// `path`. Seekable backends write incrementally through the handle
    /// itself and leave this as a no-op.
    fn finalize_write(&self, _path: &str, _handle: Box<dyn StorageHandle>) -> StorageResult<()> {
        Ok(())
    }

    /// Open `path` for reading.
    fn open_read(&self, path: &str) -> StorageResult<Box<dyn StorageHandle>>;

    /// Create (or truncate) `path` for writing. When `tmp_name` capability
    /// is set, the engine passes a temporary path here and calls
    /// [`StorageBackend::rename`] on successful close.
    fn create_write(&self, path: &str) -> StorageResult<Box<dyn StorageHandle>>;

    fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    fn remove(&self, path: &str) -> StorageResult<()>;

    /// List entries directly under `path`. Err(Unsupported) when
    /// `directory_list` capability is false.
    fn list(&self, path: &str) -> StorageResult<Vec<String>>;

    /// Like [`StorageBackend::list`] but with per-entry size/mtime/kind,
    /// where the underlying protocol exposes them cheaply. Default
    /// implementation falls back to `list` with zeroed metadata.
    fn list_detailed(&self, path: &str) -> StorageResult<Vec<DirEntryInfo>> {
        Ok(self
            .list(path)?
            .into_iter()
            .map(|name| DirEntryInfo { name, size: 0, mtime_unix: 0, is_dir: false })
            .collect())
    }

    fn stat(&self, path: &str) -> StorageResult<EntryStat>;

    /// Whether `path` exists at all, distinguishing "not found" from other
    /// I/O failures. Default implementation probes via `stat`.
    fn exists(&self, path: &str) -> StorageResult<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Generate a temporary sibling name for `path`, used by the
    /// write-then-rename commit protocol when `tmp_name` capability is set.
    fn tmp_name(&self, path: &str) -> String {
        format!("{path}.tmp-{}", std::process::id())
    }

    /// Whether a higher-priority caller is currently waiting for this
    /// backend's connection allocator, signaling a cooperative writer to
    /// release at its next fragment boundary. Backends with no allocator
    /// (local filesystem) are never preempted.
    fn is_server_allocation_pending(&self) -> bool {
        false
    }

    /// Begin a directory iteration over `path`.
    fn open_dir_list(&self, path: &str) -> StorageResult<DirListHandle> {
        Ok(DirListHandle { entries: self.list_detailed(path)?.into_iter() })
    }

    /// Advance a directory iteration; `None` once exhausted.
    fn read_dir_entry(&self, handle: &mut DirListHandle) -> StorageResult<Option<DirEntryInfo>> {
        Ok(handle.entries.next())
    }

    /// Release resources held by a directory iteration.
    fn close_dir_list(&self, _handle: DirListHandle) -> StorageResult<()> {
        Ok(())
    }
}

/// Whether two specifiers name the same storage target, ignoring
/// credentials — used to recognize that two jobs are writing to the same
/// host so their connection allocators should be shared.
pub fn equal_specifiers(a: &StorageSpecifier, b: &StorageSpecifier) -> bool {
    use StorageSpecifier::*;
    match (a, b) {
        (Local { path: p1 }, Local { path: p2 }) => p1 == p2,
        (Ftp { host: h1, port: pt1, path: p1, .. }, Ftp { host: h2, port: pt2, path: p2, .. }) => {
            h1 == h2 && pt1 == pt2 && p1 == p2
        }
        (Sftp { host: h1, port: pt1, path: p1, .. }, Sftp { host: h2, port: pt2, path: p2, .. })
        | (Scp { host: h1, port: pt1, path: p1, .. }, Scp { host: h2, port: pt2, path: p2, .. }) => {
            h1 == h2 && pt1 == pt2 && p1 == p2
        }
        (WebDav { base_url: u1, .. }, WebDav { base_url: u2, .. }) => u1 == u2,
        (Optical { device: d1, path: p1, .. }, Optical { device: d2, path: p2, .. }) => d1 == d2 && p1 == p2,
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct EntryStat {
    pub size: u64,
    pub is_dir: bool,
}

/// One row of a directory listing, as returned by
/// [`StorageBackend::list_detailed`]/[`StorageBackend::read_dir_entry`].
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub size: u64,
    pub mtime_unix: i64,
    pub is_dir: bool,
}

/// Opaque iteration state for `open_dir_list`/`read_dir_entry`/`close_dir_list`.
pub struct DirListHandle {
    entries: std::vec::IntoIter<DirEntryInfo>,
}

/// A `Read + Write + Seek` local file wrapped to satisfy [`StorageHandle`]
/// plus full `Seek`, used by backends that are genuinely random-access.
pub struct SeekableHandle<F> {
    pub(crate) inner: F,
}

impl<F: Read> Read for SeekableHandle<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<F: Write> Write for SeekableHandle<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<F: Seek> SeekableHandle<F> {
    pub fn stream_position_inner(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }
}

impl<F: Read + Write + Seek + Send + 'static> StorageHandle for SeekableHandle<F> {
    fn stream_position(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// A forward-only handle over an in-memory buffer, used by streaming-mode
/// backends (FTP upload, WebDAV PUT) that buffer the whole archive before
/// transmitting it in one request.
pub struct BufferedHandle {
    pub(crate) buf: Vec<u8>,
    pub(crate) read_pos: usize,
}

impl BufferedHandle {
    pub fn new() -> Self {
        Self { buf: Vec::new(), read_pos: 0 }
    }

    pub fn from_bytes(buf: Vec<u8>) -> Self {
        Self { buf, read_pos: 0 }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for BufferedHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for BufferedHandle {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = (self.buf.len() - self.read_pos).min(out.len());
        out[..n].copy_from_slice(&self.buf[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        Ok(n)
    }
}

impl Write for BufferedHandle {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StorageHandle for BufferedHandle {
    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.buf.len() as u64)
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Resolve a `StorageSpecifier` to the backend implementing its scheme.
pub fn open_backend(spec: &StorageSpecifier) -> StorageResult<Box<dyn StorageBackend>> {
    match spec {
        StorageSpecifier::Local { .. } => Ok(Box::new(local::LocalBackend)),
        StorageSpecifier::Ftp { host, port, user, password, .. } => {
            let backend = ftp::FtpBackend::new(host.clone(), *port, user.clone());
            Ok(match password {
                Some(p) => Box::new(backend.with_password(crate::credential::Secret::new(p.clone()))),
                None => Box::new(backend),
            })
        }
        StorageSpecifier::Sftp { host, port, user, password, .. } | StorageSpecifier::Scp { host, port, user, password, .. } => {
            let backend = sftp::SftpBackend::new(host.clone(), *port, user.clone());
            Ok(match password {
                Some(p) => Box::new(backend.with_password(crate::credential::Secret::new(p.clone()))),
                None => Box::new(backend),
            })
        }
        StorageSpecifier::WebDav { base_url, user, password, .. } => {
            let backend = webdav::WebDavBackend::new(base_url.clone(), user.clone());
            Ok(match password {
                Some(p) => Box::new(backend.with_password(crate::credential::Secret::new(p.clone()))),
                None => Box::new(backend),
            })
        }
        StorageSpecifier::Optical { device, kind, .. } => {
            Ok(Box::new(optical::OpticalBackend::new(device.clone(), *kind)))
        }
    }
}
