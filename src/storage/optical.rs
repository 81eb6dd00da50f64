//! Optical media / raw device backend (`cd://`, `dvd://`, `bd://`, `dev://`).
//!
//! Modeled as a restricted local backend: write-once, streaming-only (no
//! `tmp_name`, since there is no filesystem to hold a sibling temp file —
//! the write either becomes the final track/session or is discarded), with
//! pre/post-process hooks standing in for the external burn/eject tooling
//! this crate does not itself drive.

use super::uri::OpticalKind;
use super::{BufferedHandle, EntryStat, StorageBackend, StorageCapabilities, StorageHandle, StorageResult, StorageError};
use std::process::Command;

pub struct OpticalBackend {
    device: String,
    kind: OpticalKind,
    /// Shell command run before writing (e.g. mount/format the medium).
    pub pre_process: Option<String>,
    /// Shell command run after a successful write (e.g. burn/eject).
    pub post_process: Option<String>,
}

impl OpticalBackend {
    pub fn new(device: String, kind: OpticalKind) -> Self {
        Self { device, kind, pre_process: None, post_process: None }
    }

    fn run_hook(&self, template: &str, path: &str) -> StorageResult<()> {
        let command = template.replace("%device", &self.device).replace("%file", path);
        let status = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .status()
            .map_err(|e| StorageError::Protocol(format!("hook spawn failed: {e}")))?;
        if !status.success() {
            return Err(StorageError::Protocol(format!("hook exited with {status}")));
        }
        Ok(())
    }
}

impl StorageBackend for OpticalBackend {
    fn capabilities(&self) -> StorageCapabilities {
        StorageCapabilities {
            random_access_read: matches!(self.kind, OpticalKind::Device),
            random_access_write: false,
            rename_atomic: false,
            directory_list: false,
            tmp_name: false,
        }
    }

    fn printable_name(&self) -> String {
        self.device.clone()
    }

    fn open_read(&self, path: &str) -> StorageResult<Box<dyn StorageHandle>> {
        let bytes = std::fs::read(path)?;
        Ok(Box::new(BufferedHandle::from_bytes(bytes)))
    }

    fn create_write(&self, path: &str) -> StorageResult<Box<dyn StorageHandle>> {
        if let Some(pre) = &self.pre_process {
            self.run_hook(pre, path)?;
        }
        Ok(Box::new(BufferedHandle::new()))
    }

    fn finalize_write(&self, path: &str, mut handle: Box<dyn StorageHandle>) -> StorageResult<()> {
        let buffered = handle
            .as_any_mut()
            .downcast_mut::<BufferedHandle>()
            .expect("OpticalBackend::create_write always returns a BufferedHandle");
        std::fs::write(path, &buffered.buf)?;
        if let Some(post) = &self.post_process {
            self.run_hook(post, path)?;
        }
        Ok(())
    }

    fn rename(&self, _from: &str, _to: &str) -> StorageResult<()> {
        Err(StorageError::Unsupported("optical media has no rename; write directly to the final name"))
    }

    fn remove(&self, path: &str) -> StorageResult<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn list(&self, _path: &str) -> StorageResult<Vec<String>> {
        Err(StorageError::Unsupported("optical media does not support directory listing"))
    }

    fn stat(&self, path: &str) -> StorageResult<EntryStat> {
        let meta = std::fs::metadata(path)?;
        Ok(EntryStat { size: meta.len(), is_dir: meta.is_dir() })
    }
}
