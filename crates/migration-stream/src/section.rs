use std::io::{Read, Seek};

use crate::error::Result;
use crate::io::StreamReader;
use crate::legacy::{HtabSection, StorageAttributes};
use crate::ram::RamSection;
use crate::value::{Fields, Value};
use crate::vmsd::StructDecoder;

/// The decoder owned by one stream section, resumed by every PART/END record of that section.
pub enum SectionDecoder {
    Device {
        decoder: StructDecoder,
        state: Fields,
    },
    Ram(RamSection),
    Htab(HtabSection),
    StorageAttributes(StorageAttributes),
}

impl SectionDecoder {
    pub fn device(decoder: StructDecoder) -> Self {
        SectionDecoder::Device {
            decoder,
            state: Fields::new(),
        }
    }

    pub fn read<R: Read + Seek>(&mut self, r: &mut StreamReader<R>) -> Result<()> {
        match self {
            SectionDecoder::Device { decoder, state } => decoder.read_into(r, state),
            SectionDecoder::Ram(ram) => ram.read(r),
            SectionDecoder::Htab(htab) => htab.read(r),
            SectionDecoder::StorageAttributes(attrs) => attrs.read(r),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            SectionDecoder::Device { state, .. } => Value::Struct(state.clone()),
            SectionDecoder::Ram(ram) => ram.to_value(),
            SectionDecoder::Htab(_) | SectionDecoder::StorageAttributes(_) => {
                Value::Str(String::new())
            }
        }
    }
}

/// One top-level stream unit, keyed by `section_id`.
pub struct Section {
    pub id: u32,
    pub name: String,
    pub instance_id: u32,
    pub version: u32,
    decoder: SectionDecoder,
}

impl Section {
    pub fn new(
        id: u32,
        name: String,
        instance_id: u32,
        version: u32,
        decoder: SectionDecoder,
    ) -> Self {
        Self {
            id,
            name,
            instance_id,
            version,
            decoder,
        }
    }

    pub fn decoder(&self) -> &SectionDecoder {
        &self.decoder
    }

    pub fn read<R: Read + Seek>(&mut self, r: &mut StreamReader<R>) -> Result<()> {
        self.decoder.read(r)
    }

    pub fn value(&self) -> Value {
        self.decoder.to_value()
    }

    /// Output key, `"<name> (<section id>)"`.
    pub fn key(&self) -> String {
        format!("{} ({})", self.name, self.id)
    }
}
