//! Offline decoder for QEMU live-migration streams (`savevm` file format, version 3).
//!
//! The stream is self-describing only in combination with the JSON device description QEMU
//! appends after the binary sections. [`decode_stream`] locates that description first, then
//! walks the section records and decodes each device with the layout the description gives.

mod error;
mod field;
mod format;
mod io;
mod legacy;
mod ram;
mod schema;
mod section;
mod stream;
mod value;
mod vmsd;

pub use crate::error::{MigrationError, Result};
pub use crate::field::{Field, FieldKind};
pub use crate::format::{
    SectionType, QEMU_MIG_CMD_SWITCHOVER_START, QEMU_VM_FILE_MAGIC, QEMU_VM_FILE_VERSION,
    QEMU_VM_SUBSECTION, QEMU_VM_VMDESCRIPTION,
};
pub use crate::io::StreamReader;
pub use crate::legacy::{HtabSection, StorageAttributes};
pub use crate::ram::{block_file_path, RamFlags, RamOptions, RamSection, RAM_SECTION_VERSION};
pub use crate::schema::{
    find_json_anchor, load_description, locate_description, DescriptionLocation, DeviceDesc,
    FieldSpec, StructDesc, VmDescription, DESCRIPTION_SCAN_LEN,
};
pub use crate::section::{Section, SectionDecoder};
pub use crate::stream::{
    decode_stream, dispatch_table, open, DecodeOptions, MigrationDump, SectionKind,
};
pub use crate::value::{Fields, Integer, Value};
pub use crate::vmsd::{expand_fields, StructDecoder};
