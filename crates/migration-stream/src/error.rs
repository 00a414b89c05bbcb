use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MigrationError>;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("out of memory allocating {len} bytes")]
    OutOfMemory { len: usize },

    #[error("unexpected end of stream at offset {offset:#x} (wanted {wanted} more bytes)")]
    Truncated { offset: u64, wanted: u64 },

    #[error("invalid file magic {0:#x}")]
    BadMagic(u32),

    #[error("unsupported stream version {0}")]
    UnsupportedVersion(u32),

    #[error("unknown section type {marker:#04x} at offset {offset:#x}")]
    UnknownSectionType { marker: u8, offset: u64 },

    #[error("section id {0} continued before it was started")]
    UnknownSection(u32),

    #[error("no decoder for device {name:?} instance {instance_id}")]
    UnknownDevice { name: String, instance_id: u32 },

    #[error("mismatched section footer: expected {expected:#x}, found {found:#x}")]
    FooterMismatch { expected: u32, found: u32 },

    #[error("section footer {0:#x} without a preceding section")]
    UnexpectedFooter(u32),

    #[error("unknown migration command {0:#x}")]
    UnknownCommand(u16),

    #[error("invalid length {len:#x} for migration command {command:#x}")]
    InvalidCommandLength { command: u16, len: u16 },

    #[error("device description not found: {0}")]
    SchemaNotFound(&'static str),

    #[error("malformed device description: {0}")]
    MalformedSchema(String),

    #[error("subsection {name:?} not found at offset {offset:#x}")]
    MissingSubsection { name: String, offset: u64 },

    #[error("field {field:?} is not a null pointer marker: {found:02x?} at offset {offset:#x}")]
    NullPtrMarker {
        field: String,
        found: Vec<u8>,
        offset: u64,
    },

    #[error("unsupported RAM section version {0}")]
    UnsupportedRamVersion(u32),

    #[error("unsupported {name} section version {version}")]
    UnsupportedSectionVersion { name: &'static str, version: u32 },

    #[error("{0} RAM pages are not supported")]
    UnsupportedCompression(&'static str),

    #[error("unknown RAM flags {flags:#x} at offset {offset:#x}")]
    UnknownRamFlags { flags: u64, offset: u64 },

    #[error("RAM page references unknown block {0:?}")]
    UnknownRamBlock(String),

    #[error("RAM block name {0:?} does not map to a file under the output directory")]
    InvalidBlockName(String),

    #[error("error in migration stream at offset {offset:#x}: {what}")]
    StreamError { what: &'static str, offset: u64 },

    #[error("capability count mismatch: caps_count is {declared}, found {found} capabilities")]
    CapabilityCountMismatch { declared: u64, found: usize },

    #[error("invalid json in device description: {0}")]
    Json(#[from] serde_json::Error),

    #[error("utf-8 decoding failed: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
