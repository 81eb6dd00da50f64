//! Listing & aggregation: glob include/exclude filtering, fragment
//! coalescing, and the `%macro` template formatter used for list and
//! report output.
//!
//! The macro table is a small recursive-descent formatter over `%name` and
//! `%name:width` tokens rather than a flat switch over format characters.

use crate::archive::{ArchiveReader, EntryKind, EntryReader};
use crate::chunk;
use crate::compress::ByteAlgorithm;
use crate::crypto::Cipher;
use glob::Pattern;
use std::io::{Read, Seek};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListError {
    #[error(transparent)]
    Chunk(#[from] chunk::ChunkError),
    #[error(transparent)]
    Entry(#[from] crate::archive::EntryError),
    #[error("invalid glob pattern {0:?}: {1}")]
    BadPattern(String, glob::PatternError),
    #[error("unterminated %{{...}} macro in template")]
    UnterminatedMacro,
    #[error("unknown template macro %{0}")]
    UnknownMacro(String),
}

pub type ListResult<T> = Result<T, ListError>;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ListEntry {
    pub kind: EntryKind,
    pub name: String,
    pub size: u64,
    pub mtime_unix: i64,
    pub fragment_count: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub device: u64,
    pub inode: u64,
    pub compressed_size: u64,
    pub byte_algorithm: ByteAlgorithm,
    pub cipher: Cipher,
    pub destination_name: Option<String>,
    pub delta_source_name: Option<String>,
    pub delta_source_size: Option<u64>,
    /// Which storage location this listing came from, when produced by a
    /// caller aggregating several archives with `group_by_storage` set.
    /// `None` for a single-archive listing.
    pub storage_name: Option<String>,
}

/// Walk one archive's top-level entries via [`EntryReader`], decoding each
/// `ENTR` header and its `DEST`/`HNAM`/`DELT`/`XATR` children without
/// materializing fragment payloads (`aggregate = false`).
pub fn list_archive<H: Read + Seek>(reader: &mut ArchiveReader<H>) -> ListResult<Vec<ListEntry>> {
    list_archive_named(reader, None)
}

/// As [`list_archive`], tagging every produced row with `storage_name` —
/// used when listing several archives across storage locations together.
pub fn list_archive_named<H: Read + Seek>(
    reader: &mut ArchiveReader<H>,
    storage_name: Option<&str>,
) -> ListResult<Vec<ListEntry>> {
    let fragment_config = reader.fragment_config(Vec::new());
    let meta_cipher = reader.meta.cipher;
    let meta_byte_algorithm = reader.meta.default_byte_algorithm;
    let mut entries = Vec::new();
    let chunk_reader = reader.chunk_reader_mut();
    let mut entry_reader = EntryReader::new(chunk_reader);
    while entry_reader.next_entry()? {
        let record = entry_reader.read_entry(&fragment_config, false)?;
        let (delta_source_name, delta_source_size) = match record.delta_source {
            Some((name, size)) => (Some(name), Some(size)),
            None => (None, None),
        };
        entries.push(ListEntry {
            kind: record.kind,
            name: record.attrs.name,
            size: record.attrs.size,
            mtime_unix: record.attrs.mtime_unix,
            fragment_count: record.fragment_count as u32,
            mode: record.attrs.mode,
            uid: record.attrs.uid,
            gid: record.attrs.gid,
            device: record.attrs.device,
            inode: record.attrs.inode,
            compressed_size: record.compressed_len,
            byte_algorithm: meta_byte_algorithm,
            cipher: meta_cipher,
            destination_name: record.symlink_target,
            delta_source_name,
            delta_source_size,
            storage_name: storage_name.map(str::to_string),
        });
    }
    Ok(entries)
}

/// Include/exclude glob filter. An entry is kept when it matches at least
/// one include pattern (or includes is empty, meaning "everything") and no
/// exclude pattern.
pub struct GlobFilter {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl GlobFilter {
    pub fn new(includes: &[&str], excludes: &[&str]) -> ListResult<Self> {
        let compile = |patterns: &[&str]| -> ListResult<Vec<Pattern>> {
            patterns
                .iter()
                .map(|p| Pattern::new(p).map_err(|e| ListError::BadPattern(p.to_string(), e)))
                .collect()
        };
        Ok(Self { includes: compile(includes)?, excludes: compile(excludes)? })
    }

    pub fn matches(&self, name: &str) -> bool {
        let included = self.includes.is_empty() || self.includes.iter().any(|p| p.matches(name));
        let excluded = self.excludes.iter().any(|p| p.matches(name));
        included && !excluded
    }
}

/// Coalesce fragment records from possibly-multiple archive listings
/// (e.g. a full backup plus its incrementals) into one row per merge key,
/// sorted by `(name asc, mtime desc, offset asc)`. `offset`
/// here is each source listing's position in `entries`, used as the
/// tiebreak for entries sharing the merge key.
///
/// When `group_by_storage` is `false` the merge key is `(name, mtime,
/// device, inode)` — device/inode distinguish hard-link siblings that
/// happen to share a name and mtime. When `true`, `storage_name` is
/// folded into the key too, so entries from different storage locations
/// never merge even if everything else coincides.
pub fn coalesce(mut entries: Vec<ListEntry>, group_by_storage: bool) -> Vec<ListEntry> {
    let key = |e: &ListEntry| -> (String, i64, u64, u64, Option<String>) {
        (
            e.name.clone(),
            e.mtime_unix,
            e.device,
            e.inode,
            if group_by_storage { e.storage_name.clone() } else { None },
        )
    };

    let mut indexed: Vec<(usize, ListEntry)> = entries.drain(..).enumerate().collect();
    indexed.sort_by(|(ia, a), (ib, b)| {
        a.name.cmp(&b.name).then(b.mtime_unix.cmp(&a.mtime_unix)).then(ia.cmp(ib))
    });

    let mut out: Vec<ListEntry> = Vec::new();
    for (_, entry) in indexed {
        let matches_last = out.last().map(|last| key(last) == key(&entry)).unwrap_or(false);
        if matches_last {
            let last = out.last_mut().unwrap();
            last.fragment_count += entry.fragment_count;
            last.compressed_size += entry.compressed_size;
            last.size = last.size.max(entry.size);
        } else {
            out.push(entry);
        }
    }
    out
}

/// Render a template string against one entry. `number` is the entry's
/// 1-based position in the listing, used by `%number`.
pub fn render_template(template: &str, entry: &ListEntry, number: usize) -> ListResult<String> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some('{') => {
                chars.next();
                let mut spec = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => spec.push(ch),
                        None => return Err(ListError::UnterminatedMacro),
                    }
                }
                let (name, width) = match spec.split_once(':') {
                    Some((n, w)) => (n, w.parse::<usize>().ok()),
                    None => (spec.as_str(), None),
                };
                let expanded = expand_macro(name, entry, number)?;
                out.push_str(&apply_width(&expanded, width));
            }
            _ => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphabetic() {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&expand_macro(&name, entry, number)?);
            }
        }
    }
    Ok(out)
}

fn permission_string(mode: u32) -> String {
    let kind = match mode & 0o170000 {
        0o040000 => 'd',
        0o120000 => 'l',
        _ => '-',
    };
    let bit = |shift: u32, ch: char| if mode & (1 << shift) != 0 { ch } else { '-' };
    format!(
        "{kind}{}{}{}{}{}{}{}{}{}",
        bit(8, 'r'),
        bit(7, 'w'),
        bit(6, 'x'),
        bit(5, 'r'),
        bit(4, 'w'),
        bit(3, 'x'),
        bit(2, 'r'),
        bit(1, 'w'),
        bit(0, 'x'),
    )
}

fn format_unix_time(secs: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn expand_macro(name: &str, entry: &ListEntry, number: usize) -> ListResult<String> {
    Ok(match name {
        "number" => number.to_string(),
        "type" => match entry.kind {
            EntryKind::File => "file",
            EntryKind::Image => "image",
            EntryKind::Dir => "dir",
            EntryKind::Link => "link",
            EntryKind::HardLink => "hardlink",
            EntryKind::Special => "special",
        }
        .to_string(),
        "dateTime" | "mtime" => format_unix_time(entry.mtime_unix),
        "user" => entry.uid.to_string(),
        "group" => entry.gid.to_string(),
        "permission" => permission_string(entry.mode),
        // This archive format has no multi-part split archives yet; %part*
        // macros always resolve to the whole (single) part.
        "part" => "1".to_string(),
        "partFrom" => "0".to_string(),
        "partTo" => entry.size.to_string(),
        "compress" => format!("{:?}", entry.byte_algorithm),
        "ratio" => {
            if entry.size == 0 {
                "0%".to_string()
            } else {
                format!("{:.1}%", 100.0 * (1.0 - entry.compressed_size as f64 / entry.size as f64))
            }
        }
        "crypt" => format!("{:?}", entry.cipher),
        "name" | "file" => entry.name.clone(),
        "destinationName" => entry.destination_name.clone().unwrap_or_default(),
        "major" => (entry.device >> 8).to_string(),
        "minor" => (entry.device & 0xff).to_string(),
        "deltaSourceName" => entry.delta_source_name.clone().unwrap_or_default(),
        "deltaSourceSize" => entry.delta_source_size.map(|s| s.to_string()).unwrap_or_default(),
        "storageName" => entry.storage_name.clone().unwrap_or_default(),
        "size" => entry.size.to_string(),
        "fragments" => entry.fragment_count.to_string(),
        other => return Err(ListError::UnknownMacro(other.to_string())),
    })
}

fn apply_width(s: &str, width: Option<usize>) -> String {
    match width {
        Some(w) if s.len() < w => format!("{s:>w$}", w = w),
        Some(w) if s.len() > w => s[..w].to_string(),
        _ => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, mtime: i64, size: u64) -> ListEntry {
        ListEntry {
            kind: EntryKind::File,
            name: name.to_string(),
            size,
            mtime_unix: mtime,
            fragment_count: 1,
            mode: 0o100644,
            uid: 1000,
            gid: 1000,
            device: 0,
            inode: 0,
            compressed_size: size,
            byte_algorithm: ByteAlgorithm::None,
            cipher: Cipher::None,
            destination_name: None,
            delta_source_name: None,
            delta_source_size: None,
            storage_name: None,
        }
    }

    #[test]
    fn glob_filter_includes_and_excludes() {
        let filter = GlobFilter::new(&["*.txt"], &["secret*"]).unwrap();
        assert!(filter.matches("notes.txt"));
        assert!(!filter.matches("secret.txt"));
        assert!(!filter.matches("notes.bin"));
    }

    #[test]
    fn empty_includes_means_everything() {
        let filter = GlobFilter::new(&[], &["*.tmp"]).unwrap();
        assert!(filter.matches("anything"));
        assert!(!filter.matches("x.tmp"));
    }

    #[test]
    fn coalesce_merges_same_name_and_mtime() {
        let entries = vec![entry("a.txt", 100, 10), entry("a.txt", 100, 10), entry("b.txt", 50, 5)];
        let coalesced = coalesce(entries, false);
        assert_eq!(coalesced.len(), 2);
        let a = coalesced.iter().find(|e| e.name == "a.txt").unwrap();
        assert_eq!(a.fragment_count, 2);
    }

    #[test]
    fn coalesce_keeps_hardlink_siblings_separate_by_device_inode() {
        let mut a = entry("shared", 100, 10);
        a.device = 1;
        a.inode = 11;
        let mut b = entry("shared", 100, 10);
        b.device = 1;
        b.inode = 22;
        let coalesced = coalesce(vec![a, b], false);
        assert_eq!(coalesced.len(), 2);
    }

    #[test]
    fn coalesce_orders_by_name_then_mtime_desc() {
        let entries = vec![entry("a.txt", 50, 1), entry("a.txt", 200, 1), entry("b.txt", 1, 1)];
        let coalesced = coalesce(entries, false);
        assert_eq!(coalesced[0].name, "a.txt");
        assert_eq!(coalesced[0].mtime_unix, 200);
        assert_eq!(coalesced[1].mtime_unix, 50);
        assert_eq!(coalesced[2].name, "b.txt");
    }

    #[test]
    fn coalesce_group_by_storage_keeps_entries_from_different_storage_separate() {
        let mut a = entry("a.txt", 100, 10);
        a.storage_name = Some("disk1".to_string());
        let mut b = entry("a.txt", 100, 10);
        b.storage_name = Some("disk2".to_string());
        assert_eq!(coalesce(vec![a.clone(), b.clone()], false).len(), 1);
        assert_eq!(coalesce(vec![a, b], true).len(), 2);
    }

    #[test]
    fn template_expands_known_macros() {
        let e = entry("report.pdf", 1_700_000_000, 4096);
        let rendered = render_template("%file is %size bytes (%%done)", &e, 1).unwrap();
        assert_eq!(rendered, "report.pdf is 4096 bytes (%done)");
    }

    #[test]
    fn template_width_macro_pads_and_truncates() {
        let e = entry("x", 0, 0);
        assert_eq!(render_template("%{file:5}", &e, 1).unwrap(), "    x");
        let long = entry("abcdefgh", 0, 0);
        assert_eq!(render_template("%{file:3}", &long, 1).unwrap(), "abc");
    }

    #[test]
    fn unterminated_macro_is_an_error() {
        let e = entry("x", 0, 0);
        assert!(matches!(render_template("%{file", &e, 1), Err(ListError::UnterminatedMacro)));
    }

    #[test]
    fn unknown_macro_is_an_error_not_a_passthrough() {
        let e = entry("x", 0, 0);
        assert!(matches!(render_template("%bogus", &e, 1), Err(ListError::UnknownMacro(_))));
    }

    #[test]
    fn number_and_permission_macros() {
        let mut e = entry("x", 0, 0);
        e.mode = 0o100644;
        let rendered = render_template("%number: %permission", &e, 7).unwrap();
        assert_eq!(rendered, "7: -rw-r--r--");
    }
}
