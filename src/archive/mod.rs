//! Entry pipeline and archive engine.

pub mod engine;
pub mod entry;
pub mod meta;

pub use engine::{
    commit, verify_signature, ArchiveError, ArchiveReader, ArchiveResult, ArchiveWriter, CreateOptions,
    EngineContext, write_strategy_for,
};
pub use entry::{
    decode_delta_source, decode_fragment, EntryAttributes, EntryError, EntryKind, EntryReader, EntryRecord,
    EntryState, EntryWriter, FragmentPipelineConfig,
};
pub use meta::{ArchiveMeta, ArchiveType, DeltaAlgorithm, MetaError};
