use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{MigrationError, Result};

/// Big-endian cursor over a migration stream.
///
/// The reader tracks its own absolute position so every error can report the offset it failed
/// at. An optional `limit` marks the end of the binary stream (the start of the trailing device
/// description); reads and seeks past it fail with [`MigrationError::Truncated`].
pub struct StreamReader<R> {
    inner: R,
    pos: u64,
    limit: Option<u64>,
}

impl<R: Read + Seek> StreamReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let pos = inner.stream_position()?;
        Ok(Self {
            inner,
            pos,
            limit: None,
        })
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(off) => Some(off),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(_) => None,
        };
        if let (Some(target), Some(limit)) = (target, self.limit) {
            if target > limit {
                return Err(MigrationError::Truncated {
                    offset: self.pos,
                    wanted: target.saturating_sub(self.pos),
                });
            }
        }
        self.pos = self.inner.seek(pos)?;
        Ok(self.pos)
    }

    /// Moves the cursor forward without reading (used to skip page payloads).
    pub fn skip(&mut self, len: u64) -> Result<()> {
        let delta = i64::try_from(len).map_err(|_| MigrationError::Truncated {
            offset: self.pos,
            wanted: len,
        })?;
        self.seek(SeekFrom::Current(delta))?;
        Ok(())
    }

    fn ensure_available(&self, len: u64) -> Result<()> {
        match self.limit {
            Some(limit) if self.pos.saturating_add(len) > limit => Err(MigrationError::Truncated {
                offset: self.pos,
                wanted: len,
            }),
            _ => Ok(()),
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure_available(buf.len() as u64)?;
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.pos += buf.len() as u64;
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Err(MigrationError::Truncated {
                    offset: self.pos,
                    wanted: buf.len() as u64,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.fill(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure_available(len as u64)?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| MigrationError::OutOfMemory { len })?;
        buf.resize(len, 0);
        self.fill(&mut buf)?;
        Ok(buf)
    }

    /// Reads a blob whose length is either given, or taken from a leading length byte.
    pub fn read_var(&mut self, len: Option<usize>) -> Result<Vec<u8>> {
        let len = match len {
            Some(len) => len,
            None => usize::from(self.read_u8()?),
        };
        if len == 0 {
            return Ok(Vec::new());
        }
        self.read_bytes(len)
    }

    pub fn read_str(&mut self, len: Option<usize>) -> Result<String> {
        Ok(String::from_utf8(self.read_var(len)?)?)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
