use bararc::archive::{ArchiveError, ArchiveReader, ArchiveWriter, CreateOptions, EntryAttributes, EntryKind, EntryReader, EntryWriter};
use bararc::compress::ByteAlgorithm;
use bararc::crypto::{Cipher, SignatureState};
use bararc::listing::{self, GlobFilter};
use bararc::recovery;
use bararc::ArchiveMeta;
use clap::{Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

#[derive(Parser)]
#[command(name = "bararc", version = "1.0.0", about = "Deduplicating, encrypted, compressed backup archiver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an archive from one or more files
    Create {
        #[arg(short, long)]
        output: PathBuf,
        /// Byte compressor: none, zip, bzip2, lzma, xz, lz4, zstd
        #[arg(short, long, default_value = "zstd")]
        compress: String,
        #[arg(short, long, default_value = "3")]
        level: i32,
        /// Symmetric cipher: none, aes128cbc, aes256cbc, twofish128, twofish256,
        /// serpent128, serpent256, camellia128, camellia256, chacha20
        #[arg(long, default_value = "none")]
        cipher: String,
        #[arg(short, long)]
        password: Option<String>,
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Archive generation kind: normal, full, incremental, differential, continuous
        #[arg(long, default_value = "normal")]
        archive_type: String,
        /// Free-form note stored in the archive's metadata
        #[arg(long, default_value = "")]
        comment: String,
    },
    /// Extract an archive's entries into a directory
    Extract {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// List archive contents
    List {
        input: PathBuf,
        /// Glob include pattern (repeatable)
        #[arg(long)]
        include: Vec<String>,
        /// Glob exclude pattern (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
        #[arg(long, default_value = "%{file:32} %size")]
        template: String,
        #[arg(short, long)]
        password: Option<String>,
        /// Keep entries from distinct storage locations from coalescing
        /// even when name/mtime/device/inode coincide
        #[arg(long)]
        group_by_storage: bool,
        /// Use a detailed, ls -l style default template
        #[arg(long)]
        long_format: bool,
        /// Emit entries as a JSON array instead of the template
        #[arg(long)]
        json: bool,
    },
    /// Verify an archive's detached signature
    Verify {
        input: PathBuf,
    },
    /// Forward-scan recovery without relying on any index structure
    Recover {
        input: PathBuf,
        #[arg(short = 'C', long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        verbose: bool,
        /// Emit the recovery report as JSON instead of the text summary
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    match Cli::parse().command {
        Commands::Create { output, compress, level, cipher, password, input, archive_type, comment } => {
            cmd_create(output, compress, level, cipher, password, input, archive_type, comment)?
        }
        Commands::Extract { input, output_dir, password } => cmd_extract(input, output_dir, password)?,
        Commands::List { input, include, exclude, template, password, group_by_storage, long_format, json } => {
            cmd_list(input, include, exclude, template, password, group_by_storage, long_format, json)?
        }
        Commands::Verify { input } => cmd_verify(input)?,
        Commands::Recover { input, output_dir, verbose, json } => cmd_recover(input, output_dir, verbose, json)?,
    }
    Ok(())
}

fn parse_byte_algorithm(s: &str) -> ByteAlgorithm {
    match s {
        "none" => ByteAlgorithm::None,
        "zip" => ByteAlgorithm::Zip,
        "bzip2" => ByteAlgorithm::Bzip2,
        "lzma" => ByteAlgorithm::Lzma,
        "xz" => ByteAlgorithm::Xz,
        "lz4" => ByteAlgorithm::Lz4,
        "zstd" => ByteAlgorithm::Zstd,
        other => {
            eprintln!("unknown compressor '{other}', defaulting to zstd");
            ByteAlgorithm::Zstd
        }
    }
}

fn parse_cipher(s: &str) -> Cipher {
    match s {
        "none" => Cipher::None,
        "aes128cbc" => Cipher::Aes128Cbc,
        "aes256cbc" => Cipher::Aes256Cbc,
        "twofish128" => Cipher::Twofish128,
        "twofish256" => Cipher::Twofish256,
        "serpent128" => Cipher::Serpent128,
        "serpent256" => Cipher::Serpent256,
        "camellia128" => Cipher::Camellia128,
        "camellia256" => Cipher::Camellia256,
        "chacha20" => Cipher::ChaCha20,
        other => {
            eprintln!("unknown cipher '{other}', defaulting to none");
            Cipher::None
        }
    }
}

fn parse_archive_type(s: &str) -> bararc::archive::ArchiveType {
    use bararc::archive::ArchiveType;
    match s {
        "normal" => ArchiveType::Normal,
        "full" => ArchiveType::Full,
        "incremental" => ArchiveType::Incremental,
        "differential" => ArchiveType::Differential,
        "continuous" => ArchiveType::Continuous,
        other => {
            eprintln!("unknown archive type '{other}', defaulting to normal");
            ArchiveType::Normal
        }
    }
}

fn cmd_create(
    output: PathBuf,
    compress: String,
    level: i32,
    cipher: String,
    password: Option<String>,
    input: Vec<PathBuf>,
    archive_type: String,
    comment: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let cipher = parse_cipher(&cipher);
    if cipher != Cipher::None && password.is_none() {
        return Err("a password is required when --cipher is not 'none'".into());
    }
    let host_name = std::env::var("HOSTNAME").unwrap_or_default();
    let user_name = std::env::var("USER").or_else(|_| std::env::var("LOGNAME")).unwrap_or_default();
    let meta = ArchiveMeta {
        cipher,
        default_byte_algorithm: parse_byte_algorithm(&compress),
        default_byte_level: level,
        host_name,
        user_name,
        job_uuid: uuid::Uuid::new_v4(),
        entity_uuid: uuid::Uuid::new_v4(),
        archive_type: parse_archive_type(&archive_type),
        created_at: chrono::Utc::now(),
        comment,
        ..Default::default()
    };

    let handle = fs::OpenOptions::new().create(true).write(true).truncate(true).open(&output)?;
    let mut writer = ArchiveWriter::create(handle, CreateOptions { meta, passphrase: password, public_key: None, signing_key: None })?;

    for path in &input {
        let data = fs::read(path)?;
        let metadata = fs::metadata(path)?;
        let mtime_unix = metadata.modified().ok().and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map(|d| d.as_secs() as i64).unwrap_or(0);
        let attrs = EntryAttributes {
            name: path.file_name().unwrap().to_string_lossy().into_owned(),
            size: data.len() as u64,
            mtime_unix,
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            device: metadata.dev(),
            inode: metadata.ino(),
        };
        let fragment_config = writer.fragment_config(Vec::new());
        {
            let chunk_writer = writer.chunk_writer_mut();
            let mut entry = EntryWriter::begin(chunk_writer, EntryKind::File, &attrs, fragment_config)?;
            entry.write_data(&data)?;
            entry.close()?;
        }
        println!("  added  {} ({} B)", path.display(), data.len());
    }

    writer.close()?;
    let size = fs::metadata(&output)?.len();
    println!("Created: {} ({} B on disk)", output.display(), size);
    Ok(())
}

fn open_reader(input: &PathBuf, password: &Option<String>) -> Result<ArchiveReader<fs::File>, ArchiveError> {
    let handle = fs::File::open(input)?;
    let password = password.clone();
    ArchiveReader::open(
        handle,
        move |salt, iterations, key_len| {
            let password = password.as_deref().ok_or(ArchiveError::InvalidPassword)?;
            Ok(bararc::crypto::derive_key(password, salt, iterations, key_len)?)
        },
        None,
    )
}

fn cmd_extract(input: PathBuf, output_dir: PathBuf, password: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = open_reader(&input, &password)?;
    fs::create_dir_all(&output_dir)?;
    let fragment_config = reader.fragment_config(Vec::new());

    let chunk_reader = reader.chunk_reader_mut();
    let mut entry_reader = EntryReader::new(chunk_reader);
    while entry_reader.next_entry()? {
        let record = entry_reader.read_entry(&fragment_config, true)?;
        let dest = output_dir.join(&record.attrs.name);

        match record.kind {
            EntryKind::Dir => {
                fs::create_dir_all(&dest)?;
            }
            EntryKind::Link => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let target = record.symlink_target.as_deref().unwrap_or_default();
                std::os::unix::fs::symlink(target, &dest)?;
                println!("  symlink    {} -> {}", dest.display(), target);
            }
            EntryKind::HardLink => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                if let Some(source_name) = record.hardlink_names.first() {
                    fs::hard_link(output_dir.join(source_name), &dest)?;
                    println!("  hardlink   {} -> {}", dest.display(), source_name);
                }
            }
            _ => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let data = record.data.unwrap_or_default();
                fs::File::create(&dest)?.write_all(&data)?;
                println!("  extracted  {} ({} B)", dest.display(), data.len());
                for extra_name in &record.hardlink_names {
                    let extra_dest = output_dir.join(extra_name);
                    if let Some(parent) = extra_dest.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::hard_link(&dest, &extra_dest)?;
                    println!("  hardlink   {} -> {}", extra_dest.display(), dest.display());
                }
            }
        }
    }

    println!("Extracted to: {}", output_dir.display());
    Ok(())
}

fn cmd_list(
    input: PathBuf,
    include: Vec<String>,
    exclude: Vec<String>,
    mut template: String,
    password: Option<String>,
    group_by_storage: bool,
    long_format: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if long_format {
        template = "%permission %{user:8} %{group:8} %{size:12} %dateTime %name".to_string();
    }
    let mut reader = open_reader(&input, &password)?;
    let entries = listing::list_archive(&mut reader)?;
    let includes: Vec<&str> = include.iter().map(String::as_str).collect();
    let excludes: Vec<&str> = exclude.iter().map(String::as_str).collect();
    let filter = GlobFilter::new(&includes, &excludes)?;

    let filtered: Vec<_> = entries.into_iter().filter(|e| filter.matches(&e.name)).collect();
    let coalesced = listing::coalesce(filtered, group_by_storage);

    if json {
        println!("{}", serde_json::to_string_pretty(&coalesced)?);
    } else {
        for (i, entry) in coalesced.iter().enumerate() {
            println!("{}", listing::render_template(&template, entry, i + 1)?);
        }
        println!("{} entries", coalesced.len());
    }
    Ok(())
}

fn cmd_verify(input: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let handle = fs::File::open(&input)?;
    let state = bararc::archive::verify_signature(handle, None)?;
    match state {
        SignatureState::None => println!("no signature present"),
        SignatureState::Skipped => println!("signature present but not checked (no verifying key supplied)"),
        SignatureState::Ok => println!("signature OK"),
        SignatureState::Invalid => println!("signature INVALID"),
    }
    Ok(())
}

fn cmd_recover(input: PathBuf, output_dir: Option<PathBuf>, verbose: bool, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut f = fs::File::open(&input)?;
    let report = recovery::scan(&mut f, None)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        if let Some(output_dir) = output_dir {
            recover_entries_to_disk(&output_dir, &report)?;
        }
        return Ok(());
    }

    println!("── Index-free recovery ──────────────────────────────────");
    println!("  Source: {}", input.display());
    println!("  {}", report.summary());
    println!("  Chunks scanned:    {}", report.total_scanned);
    println!("  Healthy chunks:    {}", report.healthy_chunks);
    println!("  Truncated chunks:  {}", report.truncated_chunks);
    println!("  Unreadable chunks: {}", report.unreadable_chunks);
    println!("  Quality:           {:?}", report.quality);

    if verbose {
        println!();
        for (i, sc) in report.chunk_log.iter().enumerate() {
            println!(
                "  [{i:4}] @{:<10} {} (0x{}) len={} {:?}",
                sc.archive_offset,
                sc.id,
                hex::encode(sc.id.0),
                sc.declared_length,
                sc.health
            );
        }
    }

    if let Some(output_dir) = output_dir {
        recover_entries_to_disk(&output_dir, &report)?;
    }

    Ok(())
}

fn recover_entries_to_disk(output_dir: &std::path::Path, report: &recovery::RecoveryReport) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(output_dir)?;
    for (i, entry) in report.entries.iter().enumerate() {
        let name = entry.attrs.as_ref().map(|a| a.name.clone()).unwrap_or_else(|| format!("recovered_{i:04}"));
        let dest = output_dir.join(&name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::File::create(&dest)?.write_all(&entry.data)?;
        println!(
            "  recovered  {} ({} B, {} fragment(s) lost)",
            dest.display(),
            entry.data.len(),
            entry.fragments_lost
        );
    }
    Ok(())
}
