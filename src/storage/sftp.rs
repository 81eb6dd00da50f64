//! SFTP/SCP backend (`ssh2`). `scp://` is treated as legacy syntax for the
//! same login+transport as `sftp://`; this implementation always speaks
//! SFTP once connected.

use super::bandwidth::{Priority, ServerAllocator, ServerLease};
use super::{DirEntryInfo, EntryStat, StorageBackend, StorageCapabilities, StorageHandle, StorageError, StorageResult};
use crate::credential::Secret;
use ssh2::{Session, Sftp};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

const DEFAULT_CONNECTION_LIMIT: usize = 4;

pub struct SftpBackend {
    host: String,
    port: u16,
    user: Option<String>,
    password: Mutex<Option<Secret>>,
    allocator: Arc<ServerAllocator>,
}

impl SftpBackend {
    pub fn new(host: String, port: u16, user: Option<String>) -> Self {
        Self {
            host,
            port,
            user,
            password: Mutex::new(None),
            allocator: Arc::new(ServerAllocator::new(DEFAULT_CONNECTION_LIMIT)),
        }
    }

    pub fn with_password(self, password: Secret) -> Self {
        *self.password.lock().unwrap() = Some(password);
        self
    }

    fn acquire(&self) -> ServerLease {
        self.allocator.acquire(Priority::Normal)
    }

    fn connect(&self) -> StorageResult<Sftp> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))?;
        let mut session = Session::new().map_err(|e| StorageError::Protocol(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| StorageError::Protocol(e.to_string()))?;

        let user = self.user.as_deref().unwrap_or("root");
        let password = self.password.lock().unwrap();
        if let Some(pass) = password.as_ref() {
            session
                .userauth_password(user, pass.as_str())
                .map_err(|e| StorageError::Protocol(e.to_string()))?;
        } else {
            session
                .userauth_agent(user)
                .map_err(|e| StorageError::Protocol(e.to_string()))?;
        }
        if !session.authenticated() {
            return Err(StorageError::Authentication(
                crate::credential::AuthenticationError::PromptRefused(crate::credential::CredentialKey::new(
                    crate::credential::CredentialKind::Ssh,
                    self.host.clone(),
                )),
            ));
        }
        session.sftp().map_err(|e| StorageError::Protocol(e.to_string()))
    }
}

/// Wraps an `ssh2::File`. The underlying session is only ever touched from
/// the single thread that owns an `ArchiveWriter`/`ArchiveReader`, so a
/// `Send` bound here just lets the handle cross into the engine's generic
/// `Box<dyn StorageHandle>` storage, not genuine concurrent use.
struct SftpFileHandle(ssh2::File);

unsafe impl Send for SftpFileHandle {}

impl Read for SftpFileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for SftpFileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Seek for SftpFileHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

impl StorageHandle for SftpFileHandle {
    fn stream_position(&mut self) -> io::Result<u64> {
        self.0.seek(SeekFrom::Current(0))
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl StorageBackend for SftpBackend {
    fn capabilities(&self) -> StorageCapabilities {
        StorageCapabilities {
            random_access_read: true,
            random_access_write: true,
            rename_atomic: true,
            directory_list: true,
            tmp_name: true,
        }
    }

    fn printable_name(&self) -> String {
        format!("sftp://{}:{}", self.host, self.port)
    }

    fn is_server_allocation_pending(&self) -> bool {
        self.allocator.has_waiters()
    }

    fn open_read(&self, path: &str) -> StorageResult<Box<dyn StorageHandle>> {
        let _lease = self.acquire();
        let sftp = self.connect()?;
        let file = sftp
            .open(std::path::Path::new(path))
            .map_err(|e| StorageError::NotFound(format!("{path}: {e}")))?;
        Ok(Box::new(SftpFileHandle(file)))
    }

    fn create_write(&self, path: &str) -> StorageResult<Box<dyn StorageHandle>> {
        let _lease = self.acquire();
        let sftp = self.connect()?;
        let file = sftp
            .create(std::path::Path::new(path))
            .map_err(|e| StorageError::Protocol(e.to_string()))?;
        Ok(Box::new(SftpFileHandle(file)))
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let _lease = self.acquire();
        let sftp = self.connect()?;
        sftp.rename(std::path::Path::new(from), std::path::Path::new(to), None)
            .map_err(|e| StorageError::Protocol(e.to_string()))?;
        Ok(())
    }

    fn remove(&self, path: &str) -> StorageResult<()> {
        let _lease = self.acquire();
        let sftp = self.connect()?;
        sftp.unlink(std::path::Path::new(path)).map_err(|e| StorageError::Protocol(e.to_string()))?;
        Ok(())
    }

    fn list(&self, path: &str) -> StorageResult<Vec<String>> {
        Ok(self.list_detailed(path)?.into_iter().map(|e| e.name).collect())
    }

    fn list_detailed(&self, path: &str) -> StorageResult<Vec<DirEntryInfo>> {
        let _lease = self.acquire();
        let sftp = self.connect()?;
        let entries = sftp
            .readdir(std::path::Path::new(path))
            .map_err(|e| StorageError::Protocol(e.to_string()))?;
        Ok(entries
            .into_iter()
            .filter_map(|(p, stat)| {
                let name = p.file_name()?.to_string_lossy().into_owned();
                Some(DirEntryInfo {
                    name,
                    size: stat.size.unwrap_or(0),
                    mtime_unix: stat.mtime.unwrap_or(0) as i64,
                    is_dir: stat.is_dir(),
                })
            })
            .collect())
    }

    fn stat(&self, path: &str) -> StorageResult<EntryStat> {
        let _lease = self.acquire();
        let sftp = self.connect()?;
        let stat = sftp.stat(std::path::Path::new(path)).map_err(|e| StorageError::Protocol(e.to_string()))?;
        Ok(EntryStat { size: stat.size.unwrap_or(0), is_dir: stat.is_dir() })
    }
}
