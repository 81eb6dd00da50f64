//! Local filesystem backend — the only backend with every capability set.

use super::{EntryStat, SeekableHandle, StorageBackend, StorageCapabilities, StorageHandle, StorageResult};
use std::fs::{self, File, OpenOptions};

pub struct LocalBackend;

impl StorageBackend for LocalBackend {
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
        "local".to_string()
    }

    fn open_read(&self, path: &str) -> StorageResult<Box<dyn StorageHandle>> {
        let file = File::open(path)?;
        Ok(Box::new(SeekableHandle { inner: file }))
    }

    fn create_write(&self, path: &str) -> StorageResult<Box<dyn StorageHandle>> {
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        Ok(Box::new(SeekableHandle { inner: file }))
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        fs::rename(from, to)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> StorageResult<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn list(&self, path: &str) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn stat(&self, path: &str) -> StorageResult<EntryStat> {
        let meta = fs::metadata(path)?;
        Ok(EntryStat { size: meta.len(), is_dir: meta.is_dir() })
    }
}
