//! Hard-coded decoders for the iterative sections that carry no device description.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{MigrationError, Result};
use crate::io::StreamReader;

const HASH_PTE_SIZE_64: u64 = 16;

/// `spapr/htab`: the POWER hashed page table. Chunks are validated and skipped.
#[derive(Debug)]
pub struct HtabSection;

impl HtabSection {
    pub fn new(version: u32) -> Result<Self> {
        if version != 1 {
            return Err(MigrationError::UnsupportedSectionVersion {
                name: "spapr/htab",
                version,
            });
        }
        Ok(Self)
    }

    pub fn read<R: Read + Seek>(&mut self, r: &mut StreamReader<R>) -> Result<()> {
        let header = r.read_i32()?;
        if header == -1 {
            tracing::debug!("no hashed page table");
            return Ok(());
        }
        if header > 0 {
            // First record only carries the table shift.
            tracing::debug!(htab_shift = header, "hashed page table setup");
            return Ok(());
        }

        loop {
            let index = r.read_u32()?;
            let n_valid = r.read_u16()?;
            let n_invalid = r.read_u16()?;
            if index == 0 && n_valid == 0 && n_invalid == 0 {
                return Ok(());
            }
            tracing::trace!(index, n_valid, n_invalid, "htab chunk");
            r.skip(u64::from(n_valid) * HASH_PTE_SIZE_64)?;
        }
    }
}

const STATTR_FLAG_EOS: u64 = 0x01;
const STATTR_FLAG_MORE: u64 = 0x02;
const STATTR_FLAG_ERROR: u64 = 0x04;
const STATTR_FLAG_DONE: u64 = 0x08;
const STATTR_FLAG_MASK: u64 = 0xfff;

/// `s390-storage_attributes`: CMMA storage attribute blocks, skipped.
#[derive(Debug)]
pub struct StorageAttributes;

impl StorageAttributes {
    pub fn new(version: u32) -> Result<Self> {
        if version != 0 {
            return Err(MigrationError::UnsupportedSectionVersion {
                name: "s390-storage_attributes",
                version,
            });
        }
        Ok(Self)
    }

    /// Older producers may omit the `EOS` word after `DONE`. Whatever follows a `DONE` that is
    /// not an `EOS` belongs to the next record, so the reader is put back in front of it.
    pub fn read<R: Read + Seek>(&mut self, r: &mut StreamReader<R>) -> Result<()> {
        let mut after_done = None;
        loop {
            let offset = r.tell();
            let flags = r.read_u64()? & STATTR_FLAG_MASK;

            if flags & STATTR_FLAG_DONE != 0 {
                after_done = Some(r.tell());
                continue;
            }
            if flags & STATTR_FLAG_EOS != 0 {
                return Ok(());
            }
            if let Some(pos) = after_done {
                tracing::warn!(offset = pos, "no EOS after DONE, rewinding");
                r.seek(SeekFrom::Start(pos))?;
                return Ok(());
            }
            if flags & STATTR_FLAG_ERROR != 0 {
                return Err(MigrationError::StreamError {
                    what: "storage attribute error flag",
                    offset,
                });
            }
            if flags & STATTR_FLAG_MORE == 0 {
                return Err(MigrationError::StreamError {
                    what: "unknown storage attribute flags",
                    offset,
                });
            }

            let count = r.read_u64()?;
            r.skip(count)?;
        }
    }
}
