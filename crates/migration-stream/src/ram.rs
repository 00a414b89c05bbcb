use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use bitflags::bitflags;

use crate::error::{MigrationError, Result};
use crate::io::StreamReader;
use crate::value::{hex_pairs, Fields, Value};

pub const RAM_SECTION_VERSION: u32 = 4;

bitflags! {
    /// Flag bits carried in the low (sub-page) bits of every RAM record's address word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RamFlags: u64 {
        /// Page filled with a single byte value (a.k.a. ZERO).
        const COMPRESS = 0x02;
        const MEM_SIZE = 0x04;
        const PAGE = 0x08;
        const EOS = 0x10;
        const CONTINUE = 0x20;
        const XBZRLE = 0x40;
        const HOOK = 0x80;
        const COMPRESS_PAGE = 0x100;
        const MULTIFD_FLUSH = 0x200;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamOptions {
    pub page_size: u64,
    /// Record a per-page annotation (fill byte or hex dump) in the decoded tree.
    pub dump_memory: bool,
    /// Materialize every RAM block as a file under this directory.
    pub write_memory: Option<PathBuf>,
    /// Block size entries carry an extra address word (`x-ignore-shared` capability).
    pub ignore_shared: bool,
}

impl Default for RamOptions {
    fn default() -> Self {
        Self {
            page_size: 4096,
            dump_memory: false,
            write_memory: None,
            ignore_shared: false,
        }
    }
}

/// Decoder for the `ram` section. State survives across the PART/END records the section is
/// split into.
pub struct RamSection {
    opts: RamOptions,
    block: Option<String>,
    sizes: Fields,
    memory: Fields,
    files: HashMap<String, File>,
    high_water: HashMap<String, u64>,
}

impl RamSection {
    pub fn new(version: u32, opts: RamOptions) -> Result<Self> {
        if version != RAM_SECTION_VERSION {
            return Err(MigrationError::UnsupportedRamVersion(version));
        }
        if !opts.page_size.is_power_of_two() || opts.page_size < 512 {
            return Err(MigrationError::MalformedSchema(format!(
                "invalid page size {}",
                opts.page_size
            )));
        }
        Ok(Self {
            opts,
            block: None,
            sizes: Fields::new(),
            memory: Fields::new(),
            files: HashMap::new(),
            high_water: HashMap::new(),
        })
    }

    pub fn read<R: Read + Seek>(&mut self, r: &mut StreamReader<R>) -> Result<()> {
        let mask = self.opts.page_size - 1;
        loop {
            let offset = r.tell();
            let word = r.read_u64()?;
            let addr = word & !mask;
            let mut flags = RamFlags::from_bits_retain(word & mask);

            if flags.contains(RamFlags::MEM_SIZE) {
                self.read_block_sizes(r, addr)?;
                flags.remove(RamFlags::MEM_SIZE);
            }

            if flags.contains(RamFlags::COMPRESS) {
                let name = self.block_name(r, &mut flags)?;
                let fill = r.read_u8()?;
                if self.opts.write_memory.is_some() && fill != 0 {
                    let page = vec![fill; self.opts.page_size as usize];
                    self.write_page(&name, addr, &page)?;
                }
                if self.opts.dump_memory {
                    self.memory.insert(
                        format!("{name} (0x{addr:016x})"),
                        Value::Str(format!("Filled with 0x{fill:02x}")),
                    );
                }
                self.note_page(name, addr);
                flags.remove(RamFlags::COMPRESS);
            } else if flags.contains(RamFlags::PAGE) {
                let name = self.block_name(r, &mut flags)?;
                if self.opts.write_memory.is_some() || self.opts.dump_memory {
                    let data = r.read_bytes(self.opts.page_size as usize)?;
                    if self.opts.write_memory.is_some() {
                        self.write_page(&name, addr, &data)?;
                    }
                    if self.opts.dump_memory {
                        self.memory.insert(
                            format!("{name} (0x{addr:016x})"),
                            Value::Str(hex_pairs(&data)),
                        );
                    }
                } else {
                    r.skip(self.opts.page_size)?;
                }
                self.note_page(name, addr);
                flags.remove(RamFlags::PAGE);
            } else if flags.contains(RamFlags::XBZRLE) {
                return Err(MigrationError::UnsupportedCompression("XBZRLE"));
            } else if flags.contains(RamFlags::HOOK) {
                return Err(MigrationError::UnsupportedCompression("hook"));
            }

            if flags.contains(RamFlags::MULTIFD_FLUSH) {
                continue;
            }

            if flags.contains(RamFlags::EOS) {
                for (block, addr) in &self.high_water {
                    tracing::debug!(block = %block, addr = *addr, "highest page address");
                }
                return Ok(());
            }
            if !flags.is_empty() {
                return Err(MigrationError::UnknownRamFlags {
                    flags: flags.bits(),
                    offset,
                });
            }
        }
    }

    /// Size table of the RAM blocks (`name -> 0x%016x`).
    pub fn block_sizes(&self) -> &Fields {
        &self.sizes
    }

    pub fn to_value(&self) -> Value {
        let mut out = Fields::new();
        out.insert("section sizes", Value::Struct(self.sizes.clone()));
        if self.opts.dump_memory {
            out.insert("memory", Value::Struct(self.memory.clone()));
        }
        Value::Struct(out)
    }

    fn read_block_sizes<R: Read + Seek>(
        &mut self,
        r: &mut StreamReader<R>,
        total_len: u64,
    ) -> Result<()> {
        let mut remaining = total_len;
        while remaining > 0 {
            let name_len = r.read_u8()?;
            let name = r.read_str(Some(usize::from(name_len)))?;
            let len = r.read_u64()?;
            remaining = remaining.saturating_sub(len);
            tracing::debug!(block = %name, len, "ram block");

            self.sizes
                .insert(name.clone(), Value::Str(format!("0x{len:016x}")));
            if let Some(root) = &self.opts.write_memory {
                let file = create_block_file(root, &name, len)?;
                self.files.insert(name.clone(), file);
            }
            if self.opts.ignore_shared {
                let _mr_addr = r.read_u64()?;
            }
            self.block = Some(name);
        }
        Ok(())
    }

    /// Resolves the block a page belongs to, reading a new name unless `CONTINUE` is set.
    fn block_name<R: Read + Seek>(
        &mut self,
        r: &mut StreamReader<R>,
        flags: &mut RamFlags,
    ) -> Result<String> {
        if flags.contains(RamFlags::CONTINUE) {
            flags.remove(RamFlags::CONTINUE);
            return self.block.clone().ok_or(MigrationError::StreamError {
                what: "continued RAM page without a preceding block",
                offset: r.tell(),
            });
        }
        let name = r.read_str(None)?;
        self.block = Some(name.clone());
        Ok(name)
    }

    fn write_page(&mut self, name: &str, addr: u64, data: &[u8]) -> Result<()> {
        let file = self
            .files
            .get_mut(name)
            .ok_or_else(|| MigrationError::UnknownRamBlock(name.to_string()))?;
        file.seek(SeekFrom::Start(addr))?;
        file.write_all(data)?;
        Ok(())
    }

    fn note_page(&mut self, name: String, addr: u64) {
        tracing::trace!(block = %name, addr, "ram page");
        let mark = self.high_water.entry(name).or_insert(addr);
        *mark = (*mark).max(addr);
    }
}

/// Output path of a RAM block. Block names such as `/rom@etc/acpi/tables` stay relative, and
/// names that would leave `root` are rejected.
pub fn block_file_path(root: &Path, name: &str) -> Result<PathBuf> {
    let mut path = root.to_path_buf();
    for component in Path::new(name.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(MigrationError::InvalidBlockName(name.to_string()));
            }
        }
    }
    if path == root {
        return Err(MigrationError::InvalidBlockName(name.to_string()));
    }
    Ok(path)
}

fn create_block_file(root: &Path, name: &str, len: u64) -> Result<File> {
    let path = block_file_path(root, name)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    file.set_len(len)?;
    Ok(file)
}
