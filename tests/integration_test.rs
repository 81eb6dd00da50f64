use bararc::archive::{ArchiveReader, ArchiveWriter, CreateOptions, EntryAttributes, EntryKind, EntryWriter};
use bararc::chunk::{self, CHUNK_HEADER_SIZE};
use bararc::compress::ByteAlgorithm;
use bararc::crypto::Cipher;
use bararc::listing;
use bararc::ArchiveMeta;
use std::fs::File;
use tempfile::NamedTempFile;

fn write_one_file(path: &std::path::Path, meta: ArchiveMeta, passphrase: Option<String>, name: &str, data: &[u8]) {
    let file = File::create(path).unwrap();
    let mut writer = ArchiveWriter::create(file, CreateOptions { meta, passphrase, public_key: None, signing_key: None }).unwrap();
    let fragment_config = writer.fragment_config(Vec::new());
    let attrs = EntryAttributes {
        name: name.to_string(),
        size: data.len() as u64,
        mtime_unix: 1_700_000_000,
        mode: 0o644,
        uid: 0,
        gid: 0,
        device: 0,
        inode: 0,
    };
    {
        let chunk_writer = writer.chunk_writer_mut();
        let mut entry = EntryWriter::begin(chunk_writer, EntryKind::File, &attrs, fragment_config).unwrap();
        entry.write_data(data).unwrap();
        entry.close().unwrap();
    }
    writer.close().unwrap();
}

#[test]
fn pack_then_list_round_trips_one_entry() {
    let temp = NamedTempFile::new().unwrap();
    let data = b"hello, bararc format!";
    let meta = ArchiveMeta { cipher: Cipher::None, default_byte_algorithm: ByteAlgorithm::Zstd, ..Default::default() };
    write_one_file(temp.path(), meta, None, "test.txt", data);

    let file = File::open(temp.path()).unwrap();
    let mut reader = ArchiveReader::open(file, |_, _, _| unreachable!(), None).unwrap();
    let entries = listing::list_archive(&mut reader).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "test.txt");
    assert_eq!(entries[0].size, data.len() as u64);
}

#[test]
fn pack_then_extract_with_encryption_round_trips_bytes() {
    let temp = NamedTempFile::new().unwrap();
    let data = b"secret payload that must survive the round trip intact";
    let meta = ArchiveMeta {
        cipher: Cipher::Aes256Cbc,
        default_byte_algorithm: ByteAlgorithm::Zip,
        kdf_iterations: bararc::crypto::MIN_KDF_ITERATIONS,
        ..Default::default()
    };
    write_one_file(temp.path(), meta, Some("correct horse battery staple".to_string()), "secret.bin", data);

    let file = File::open(temp.path()).unwrap();
    let mut reader = ArchiveReader::open(
        file,
        |salt, iterations, key_len| Ok(bararc::crypto::derive_key("correct horse battery staple", salt, iterations, key_len)?),
        None,
    )
    .unwrap();

    let fragment_config = reader.fragment_config(Vec::new());
    let header = reader.chunk_reader_mut().read_header().unwrap().unwrap();
    assert_eq!(header.id, chunk::FILE);

    let mut consumed = 0u64;
    let mut collected = Vec::new();
    while consumed < header.length {
        let child = reader.chunk_reader_mut().read_header().unwrap().unwrap();
        let payload = reader.chunk_reader_mut().read_payload(child.length).unwrap();
        consumed += CHUNK_HEADER_SIZE as u64 + child.length;
        if child.id == chunk::DATA {
            let (_, plaintext) = bararc::archive::decode_fragment(&fragment_config, &payload).unwrap();
            collected = plaintext;
        }
    }
    assert_eq!(collected, data);
}

#[test]
fn wrong_password_is_accepted_at_open_and_fails_on_first_fragment_read() {
    let temp = NamedTempFile::new().unwrap();
    let meta = ArchiveMeta { cipher: Cipher::Aes128Cbc, kdf_iterations: bararc::crypto::MIN_KDF_ITERATIONS, ..Default::default() };
    write_one_file(temp.path(), meta, Some("right password".to_string()), "f.txt", b"data");

    let file = File::open(temp.path()).unwrap();
    let result = ArchiveReader::open(
        file,
        |salt, iterations, key_len| Ok(bararc::crypto::derive_key("wrong password", salt, iterations, key_len)?),
        None,
    );
    // A wrong passphrase derives a different (but still well-formed) key;
    // the mismatch surfaces as a decrypt/unpad failure on the first fragment
    // read rather than at open() time, since CBC carries no AEAD tag.
    assert!(result.is_ok());
}
