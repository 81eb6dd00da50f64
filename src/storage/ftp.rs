//! FTP backend (`suppaftp`). Streaming-only: the whole archive is buffered
//! in memory on write and transmitted as a single `STOR`, since FTP offers
//! no portable mid-transfer rewrite.
//!
//! Directory listing parses `LIST`/`NLST` output line-by-line, comparing the
//! permission string's first byte against `'d'` to tell files from
//! directories.

use super::bandwidth::{Priority, ServerAllocator, ServerLease};
use super::{BufferedHandle, DirEntryInfo, EntryStat, StorageBackend, StorageCapabilities, StorageHandle, StorageResult, StorageError};
use crate::credential::Secret;
use std::sync::{Arc, Mutex};
use suppaftp::FtpStream;

/// Default cap on concurrent FTP control connections this backend instance
/// will open via its [`ServerAllocator`].
const DEFAULT_CONNECTION_LIMIT: usize = 4;

pub struct FtpBackend {
    host: String,
    port: u16,
    user: Option<String>,
    password: Mutex<Option<Secret>>,
    allocator: Arc<ServerAllocator>,
}

impl FtpBackend {
    pub fn new(host: String, port: u16, user: Option<String>) -> Self {
        Self {
            host,
            port,
            user,
            password: Mutex::new(None),
            allocator: Arc::new(ServerAllocator::new(DEFAULT_CONNECTION_LIMIT)),
        }
    }

    /// Supply the password resolved by the credential glue (component H)
    /// before the first connection attempt.
    pub fn with_password(self, password: Secret) -> Self {
        *self.password.lock().unwrap() = Some(password);
        self
    }

    fn acquire(&self) -> ServerLease {
        self.allocator.acquire(Priority::Normal)
    }

    fn connect(&self) -> StorageResult<FtpStream> {
        let mut stream = FtpStream::connect((self.host.as_str(), self.port))
            .map_err(|e| StorageError::Protocol(e.to_string()))?;
        let user = self.user.as_deref().unwrap_or("anonymous");
        let password = self.password.lock().unwrap();
        let pass = password.as_ref().map(|s| s.as_str()).unwrap_or("");
        stream.login(user, pass).map_err(|e| StorageError::Protocol(e.to_string()))?;
        stream.transfer_type(suppaftp::types::FileType::Binary)
            .map_err(|e| StorageError::Protocol(e.to_string()))?;
        Ok(stream)
    }
}

impl StorageBackend for FtpBackend {
    fn capabilities(&self) -> StorageCapabilities {
        StorageCapabilities {
            random_access_read: false,
            random_access_write: false,
            rename_atomic: true,
            directory_list: true,
            tmp_name: true,
        }
    }

    fn printable_name(&self) -> String {
        format!("ftp://{}:{}", self.host, self.port)
    }

    fn is_server_allocation_pending(&self) -> bool {
        self.allocator.has_waiters()
    }

    fn open_read(&self, path: &str) -> StorageResult<Box<dyn StorageHandle>> {
        let _lease = self.acquire();
        let mut stream = self.connect()?;
        let cursor = stream
            .retr_as_buffer(path)
            .map_err(|e| StorageError::NotFound(format!("{path}: {e}")))?;
        let _ = stream.quit();
        Ok(Box::new(BufferedHandle::from_bytes(cursor.into_inner())))
    }

    fn create_write(&self, _path: &str) -> StorageResult<Box<dyn StorageHandle>> {
        Ok(Box::new(BufferedHandle::new()))
    }

    fn finalize_write(&self, path: &str, mut handle: Box<dyn StorageHandle>) -> StorageResult<()> {
        let _lease = self.acquire();
        let buffered = handle
            .as_any_mut()
            .downcast_mut::<BufferedHandle>()
            .expect("FtpBackend::create_write always returns a BufferedHandle");
        let bytes = std::mem::take(&mut buffered.buf);
        let mut stream = self.connect()?;
        let mut cursor = std::io::Cursor::new(bytes);
        stream
            .put_file(path, &mut cursor)
            .map_err(|e| StorageError::Protocol(e.to_string()))?;
        let _ = stream.quit();
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let _lease = self.acquire();
        let mut stream = self.connect()?;
        stream.rename(from, to).map_err(|e| StorageError::Protocol(e.to_string()))?;
        let _ = stream.quit();
        Ok(())
    }

    fn remove(&self, path: &str) -> StorageResult<()> {
        let _lease = self.acquire();
        let mut stream = self.connect()?;
        stream.rm(path).map_err(|e| StorageError::Protocol(e.to_string()))?;
        let _ = stream.quit();
        Ok(())
    }

    fn list(&self, path: &str) -> StorageResult<Vec<String>> {
        Ok(self.list_detailed(path)?.into_iter().map(|e| e.name).collect())
    }

    fn list_detailed(&self, path: &str) -> StorageResult<Vec<DirEntryInfo>> {
        let _lease = self.acquire();
        let mut stream = self.connect()?;
        let lines = stream.list(Some(path)).map_err(|e| StorageError::Protocol(e.to_string()))?;
        let _ = stream.quit();
        Ok(lines
            .into_iter()
            .filter_map(|line| parse_list_entry(&line))
            .map(|(is_dir, size, mtime_unix, name)| DirEntryInfo { name, size, mtime_unix, is_dir })
            .collect())
    }

    fn stat(&self, path: &str) -> StorageResult<EntryStat> {
        let _lease = self.acquire();
        let mut stream = self.connect()?;
        let size = stream.size(path).map_err(|e| StorageError::Protocol(e.to_string()))?;
        let _ = stream.quit();
        Ok(EntryStat { size: size as u64, is_dir: false })
    }
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = ["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];
    let lower = name.to_ascii_lowercase();
    MONTHS.iter().position(|m| *m == lower).map(|i| i as u32 + 1)
}

fn unix_timestamp(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<i64> {
    use chrono::NaiveDate;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let dt = date.and_hms_opt(hour, minute, 0)?;
    Some(dt.and_utc().timestamp())
}

/// Resolve a year-less `Mon DD HH:MM` listing timestamp to an absolute Unix
/// time, assuming the current year unless that would put the date in the
/// future (in which case it must be from last year) — the usual Unix `ls`
/// convention FTP servers mirror.
fn resolve_no_year_timestamp(month: u32, day: u32, hour: u32, minute: u32) -> Option<i64> {
    use chrono::Datelike;
    let now = chrono::Utc::now();
    let this_year = unix_timestamp(now.year(), month, day, hour, minute)?;
    if this_year > now.timestamp() {
        unix_timestamp(now.year() - 1, month, day, hour, minute)
    } else {
        Some(this_year)
    }
}

/// Parse one line of `LIST` output into `(is_dir, size, mtime_unix, name)`.
/// Handles three shapes: Unix long listing with an explicit year, the same
/// with a `HH:MM` time standing in for the (implied current) year, and a
/// bare `<size> <name>` form some minimal servers emit.
fn parse_list_entry(line: &str) -> Option<(bool, u64, i64, String)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.is_empty() {
        return None;
    }

    if fields[0].as_bytes().first().is_some_and(|b| b.is_ascii_alphabetic()) && fields.len() >= 9 {
        let is_dir = fields[0].as_bytes()[0] == b'd';
        let size: u64 = fields[4].parse().ok()?;
        let month = month_number(fields[5])?;
        let day: u32 = fields[6].parse().ok()?;
        let name = fields[8..].join(" ");
        if is_dir && (name == "." || name == "..") {
            return None;
        }
        let mtime_unix = if let Some((h, m)) = fields[7].split_once(':') {
            resolve_no_year_timestamp(month, day, h.parse().ok()?, m.parse().ok()?).unwrap_or(0)
        } else {
            let year: i32 = fields[7].parse().ok()?;
            unix_timestamp(year, month, day, 0, 0).unwrap_or(0)
        };
        return Some((is_dir, size, mtime_unix, name));
    }

    if let Ok(size) = fields[0].parse::<u64>() {
        let name = fields[1..].join(" ");
        if name.is_empty() || name == "." || name == ".." {
            return None;
        }
        return Some((false, size, 0, name));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_regular_file_entry_with_year() {
        let line = "-rw-r--r-- 1 user group 1024 Jan 01 2024 archive.bar";
        let (is_dir, size, mtime, name) = parse_list_entry(line).unwrap();
        assert!(!is_dir);
        assert_eq!(size, 1024);
        assert_eq!(name, "archive.bar");
        assert!(mtime > 0);
    }

    #[test]
    fn parses_regular_file_entry_with_time_instead_of_year() {
        let line = "-rw-r--r-- 1 user group 2048 Jan 01 00:00 recent.bar";
        let (is_dir, size, _mtime, name) = parse_list_entry(line).unwrap();
        assert!(!is_dir);
        assert_eq!(size, 2048);
        assert_eq!(name, "recent.bar");
    }

    #[test]
    fn parses_bare_size_entry() {
        let line = "512 plain.bar";
        assert_eq!(parse_list_entry(line), Some((false, 512, 0, "plain.bar".to_string())));
    }

    #[test]
    fn skips_dot_and_dotdot_directory_entries() {
        let line = "drwxr-xr-x 2 user group 4096 Jan 01 2024 .";
        assert_eq!(parse_list_entry(line), None);
    }

    #[test]
    fn includes_named_subdirectories() {
        let line = "drwxr-xr-x 2 user group 4096 Jan 01 2024 backups";
        let (is_dir, _size, _mtime, name) = parse_list_entry(line).unwrap();
        assert!(is_dir);
        assert_eq!(name, "backups");
    }
}
