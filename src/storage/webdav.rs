//! WebDAV backend (`reqwest` blocking client + `quick-xml` PROPFIND parsing).
//! Streaming-only, like FTP: the archive is buffered and sent as one PUT.

use super::bandwidth::{Priority, ServerAllocator, ServerLease};
use super::{BufferedHandle, EntryStat, StorageBackend, StorageCapabilities, StorageHandle, StorageError, StorageResult};
use crate::credential::Secret;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::blocking::Client;
use std::sync::{Arc, Mutex};

const DEFAULT_CONNECTION_LIMIT: usize = 4;

pub struct WebDavBackend {
    base_url: String,
    user: Option<String>,
    password: Mutex<Option<Secret>>,
    client: Client,
    allocator: Arc<ServerAllocator>,
}

impl WebDavBackend {
    pub fn new(base_url: String, user: Option<String>) -> Self {
        Self {
            base_url,
            user,
            password: Mutex::new(None),
            client: Client::new(),
            allocator: Arc::new(ServerAllocator::new(DEFAULT_CONNECTION_LIMIT)),
        }
    }

    fn acquire(&self) -> ServerLease {
        self.allocator.acquire(Priority::Normal)
    }

    pub fn with_password(self, password: Secret) -> Self {
        *self.password.lock().unwrap() = Some(password);
        self
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn basic_auth(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.user {
            Some(user) => {
                let password = self.password.lock().unwrap();
                builder.basic_auth(user, password.as_ref().map(|s| s.as_str().to_string()))
            }
            None => builder,
        }
    }
}

impl StorageBackend for WebDavBackend {
    fn capabilities(&self) -> StorageCapabilities {
        StorageCapabilities {
            random_access_read: false,
            random_access_write: false,
            rename_atomic: false,
            directory_list: true,
            tmp_name: true,
        }
    }

    fn printable_name(&self) -> String {
        self.base_url.clone()
    }

    fn is_server_allocation_pending(&self) -> bool {
        self.allocator.has_waiters()
    }

    fn open_read(&self, path: &str) -> StorageResult<Box<dyn StorageHandle>> {
        let _lease = self.acquire();
        let response = self
            .basic_auth(self.client.get(self.url_for(path)))
            .send()
            .map_err(|e| StorageError::Protocol(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        let bytes = response.bytes().map_err(|e| StorageError::Protocol(e.to_string()))?;
        Ok(Box::new(BufferedHandle::from_bytes(bytes.to_vec())))
    }

    fn create_write(&self, _path: &str) -> StorageResult<Box<dyn StorageHandle>> {
        Ok(Box::new(BufferedHandle::new()))
    }

    fn finalize_write(&self, path: &str, mut handle: Box<dyn StorageHandle>) -> StorageResult<()> {
        let _lease = self.acquire();
        let buffered = handle
            .as_any_mut()
            .downcast_mut::<BufferedHandle>()
            .expect("WebDavBackend::create_write always returns a BufferedHandle");
        let bytes = std::mem::take(&mut buffered.buf);
        let response = self
            .basic_auth(self.client.put(self.url_for(path)))
            .body(bytes)
            .send()
            .map_err(|e| StorageError::Protocol(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::Protocol(format!("PUT {path} returned {}", response.status())));
        }
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let _lease = self.acquire();
        let destination = self.url_for(to);
        let response = self
            .basic_auth(
                self.client
                    .request(reqwest::Method::from_bytes(b"MOVE").unwrap(), self.url_for(from)),
            )
            .header("Destination", destination)
            .header("Overwrite", "T")
            .send()
            .map_err(|e| StorageError::Protocol(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::Protocol(format!("MOVE {from} -> {to} returned {}", response.status())));
        }
        Ok(())
    }

    fn remove(&self, path: &str) -> StorageResult<()> {
        let _lease = self.acquire();
        let response = self
            .basic_auth(self.client.delete(self.url_for(path)))
            .send()
            .map_err(|e| StorageError::Protocol(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::Protocol(format!("DELETE {path} returned {}", response.status())));
        }
        Ok(())
    }

    fn list(&self, path: &str) -> StorageResult<Vec<String>> {
        let _lease = self.acquire();
        let response = self
            .basic_auth(
                self.client
                    .request(reqwest::Method::from_bytes(b"PROPFIND").unwrap(), self.url_for(path)),
            )
            .header("Depth", "1")
            .send()
            .map_err(|e| StorageError::Protocol(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::Protocol(format!("PROPFIND {path} returned {}", response.status())));
        }
        let body = response.text().map_err(|e| StorageError::Protocol(e.to_string()))?;
        Ok(parse_propfind_hrefs(&body))
    }

    fn stat(&self, path: &str) -> StorageResult<EntryStat> {
        let _lease = self.acquire();
        let response = self
            .basic_auth(self.client.head(self.url_for(path)))
            .send()
            .map_err(|e| StorageError::Protocol(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(EntryStat { size, is_dir: false })
    }
}

/// Extract the text of every `<D:href>` element from a multistatus PROPFIND
/// response body, returning just the final path segment of each.
fn parse_propfind_hrefs(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text = true;
    let mut hrefs = Vec::new();
    let mut in_href = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if local_name(&e.name().as_ref().to_vec()) == "href" => in_href = true,
            Ok(Event::End(e)) if local_name(&e.name().as_ref().to_vec()) == "href" => in_href = false,
            Ok(Event::Text(t)) if in_href => {
                if let Ok(text) = t.unescape() {
                    let trimmed = text.trim_end_matches('/');
                    if let Some(last) = trimmed.rsplit('/').next() {
                        if !last.is_empty() {
                            hrefs.push(last.to_string());
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }
    hrefs
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    s.rsplit(':').next().unwrap_or(&s).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hrefs_from_multistatus_body() {
        let xml = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
  <D:response><D:href>/archives/</D:href></D:response>
  <D:response><D:href>/archives/a.bar</D:href></D:response>
  <D:response><D:href>/archives/b.bar</D:href></D:response>
</D:multistatus>"#;
        let names = parse_propfind_hrefs(xml);
        assert_eq!(names, vec!["archives", "a.bar", "b.bar"]);
    }
}
