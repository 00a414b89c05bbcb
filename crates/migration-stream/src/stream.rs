use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value as Json};

use crate::error::{MigrationError, Result};
use crate::format::{
    SectionType, QEMU_MIG_CMD_SWITCHOVER_START, QEMU_VM_FILE_MAGIC, QEMU_VM_FILE_VERSION,
};
use crate::io::StreamReader;
use crate::legacy::{HtabSection, StorageAttributes};
use crate::ram::{RamOptions, RamSection};
use crate::schema::{load_description, VmDescription};
use crate::section::{Section, SectionDecoder};
use crate::value::{Fields, Value};
use crate::vmsd::StructDecoder;

const CAP_IGNORE_SHARED: &str = "x-ignore-shared";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Annotate every RAM page in the decoded tree.
    pub dump_memory: bool,
    /// Write RAM blocks as files under this directory.
    pub write_memory: Option<PathBuf>,
    /// Stop after the header; only the device description is wanted.
    pub desc_only: bool,
}

/// Which decoder a `(name, instance_id)` section key is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Ram,
    Htab,
    StorageAttributes,
    /// Generic VMSD device with an entry in the description.
    Device,
}

/// Built-in iterative sections, overridden by any description entry with the same key.
pub fn dispatch_table(desc: &VmDescription) -> HashMap<(String, u32), SectionKind> {
    let mut table = HashMap::new();
    table.insert(("ram".to_string(), 0), SectionKind::Ram);
    table.insert(("spapr/htab".to_string(), 0), SectionKind::Htab);
    table.insert(
        ("s390-storage_attributes".to_string(), 0),
        SectionKind::StorageAttributes,
    );
    for device in desc.devices() {
        table.insert(
            (device.name.clone(), device.instance_id),
            SectionKind::Device,
        );
    }
    table
}

/// Result of decoding a migration stream.
pub struct MigrationDump {
    description: VmDescription,
    sections: Vec<Section>,
    configuration: Option<Fields>,
    capabilities: Vec<String>,
}

impl MigrationDump {
    pub fn description(&self) -> &VmDescription {
        &self.description
    }

    /// Sections in the order they were first started.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, id: u32) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn configuration(&self) -> Option<&Fields> {
        self.configuration.as_ref()
    }

    /// Migration capabilities announced in the configuration section.
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// `{"<name> (<id>)": <state>}` for every section.
    pub fn to_json(&self) -> Json {
        let mut map = Map::new();
        for section in &self.sections {
            map.insert(section.key(), section.value().to_json());
        }
        Json::Object(map)
    }
}

pub fn open(path: impl AsRef<Path>, options: &DecodeOptions) -> Result<MigrationDump> {
    let file = File::open(path.as_ref())?;
    decode_stream(BufReader::new(file), options)
}

pub fn decode_stream<R: Read + Seek>(
    mut source: R,
    options: &DecodeOptions,
) -> Result<MigrationDump> {
    let description = load_description(&mut source)?;
    source.seek(SeekFrom::Start(0))?;
    let mut r = StreamReader::new(source)?.with_limit(description.stream_end());

    let magic = r.read_u32()?;
    if magic != QEMU_VM_FILE_MAGIC {
        return Err(MigrationError::BadMagic(magic));
    }
    let version = r.read_u32()?;
    if version != QEMU_VM_FILE_VERSION {
        return Err(MigrationError::UnsupportedVersion(version));
    }

    let mut decoder = StreamDecoder::new(&description, options);
    if !options.desc_only {
        decoder.run(&mut r)?;
    }
    let StreamDecoder {
        sections,
        configuration,
        capabilities,
        ..
    } = decoder;

    Ok(MigrationDump {
        description,
        sections,
        configuration,
        capabilities,
    })
}

struct StreamDecoder<'a> {
    desc: &'a VmDescription,
    options: &'a DecodeOptions,
    table: HashMap<(String, u32), SectionKind>,
    sections: Vec<Section>,
    by_id: HashMap<u32, usize>,
    last_section: Option<u32>,
    configuration: Option<Fields>,
    capabilities: Vec<String>,
}

impl<'a> StreamDecoder<'a> {
    fn new(desc: &'a VmDescription, options: &'a DecodeOptions) -> Self {
        Self {
            desc,
            options,
            table: dispatch_table(desc),
            sections: Vec::new(),
            by_id: HashMap::new(),
            last_section: None,
            configuration: None,
            capabilities: Vec::new(),
        }
    }

    fn run<R: Read + Seek>(&mut self, r: &mut StreamReader<R>) -> Result<()> {
        loop {
            let offset = r.tell();
            let marker = SectionType(r.read_u8()?);
            tracing::trace!(%marker, offset);

            match marker {
                SectionType::EOF => return Ok(()),
                SectionType::START | SectionType::FULL => self.start_section(r)?,
                SectionType::PART | SectionType::END => {
                    let id = r.read_u32()?;
                    let idx = *self
                        .by_id
                        .get(&id)
                        .ok_or(MigrationError::UnknownSection(id))?;
                    tracing::debug!(section_id = id, %marker, "section resume");
                    self.last_section = Some(id);
                    self.sections[idx].read(r)?;
                }
                SectionType::FOOTER => {
                    let found = r.read_u32()?;
                    match self.last_section {
                        None => return Err(MigrationError::UnexpectedFooter(found)),
                        Some(expected) if expected != found => {
                            return Err(MigrationError::FooterMismatch { expected, found })
                        }
                        Some(_) => {}
                    }
                }
                SectionType::CONFIGURATION => self.read_configuration(r)?,
                SectionType::COMMAND => {
                    let command = r.read_u16()?;
                    let len = r.read_u16()?;
                    if command != QEMU_MIG_CMD_SWITCHOVER_START {
                        return Err(MigrationError::UnknownCommand(command));
                    }
                    if len != 0 {
                        return Err(MigrationError::InvalidCommandLength { command, len });
                    }
                }
                SectionType(other) => {
                    return Err(MigrationError::UnknownSectionType {
                        marker: other,
                        offset,
                    })
                }
            }
        }
    }

    fn start_section<R: Read + Seek>(&mut self, r: &mut StreamReader<R>) -> Result<()> {
        let id = r.read_u32()?;
        let name = r.read_str(None)?;
        let instance_id = r.read_u32()?;
        let version = r.read_u32()?;
        tracing::debug!(section_id = id, name = %name, instance_id, version, "section start");

        let decoder = self.instantiate(&name, instance_id, version)?;
        let mut section = Section::new(id, name, instance_id, version, decoder);
        self.last_section = Some(id);
        section.read(r)?;

        match self.by_id.get(&id) {
            Some(&idx) => self.sections[idx] = section,
            None => {
                self.by_id.insert(id, self.sections.len());
                self.sections.push(section);
            }
        }
        Ok(())
    }

    fn instantiate(&self, name: &str, instance_id: u32, version: u32) -> Result<SectionDecoder> {
        let kind = self
            .table
            .get(&(name.to_string(), instance_id))
            .copied()
            .ok_or_else(|| MigrationError::UnknownDevice {
                name: name.to_string(),
                instance_id,
            })?;

        Ok(match kind {
            SectionKind::Ram => {
                let page_size = self.desc.page_size().ok_or_else(|| {
                    MigrationError::MalformedSchema("missing page_size".to_string())
                })?;
                SectionDecoder::Ram(RamSection::new(
                    version,
                    RamOptions {
                        page_size,
                        dump_memory: self.options.dump_memory,
                        write_memory: self.options.write_memory.clone(),
                        ignore_shared: self.capabilities.iter().any(|c| c == CAP_IGNORE_SHARED),
                    },
                )?)
            }
            SectionKind::Htab => SectionDecoder::Htab(HtabSection::new(version)?),
            SectionKind::StorageAttributes => {
                SectionDecoder::StorageAttributes(StorageAttributes::new(version)?)
            }
            SectionKind::Device => {
                let device = self.desc.device(name, instance_id).ok_or_else(|| {
                    MigrationError::UnknownDevice {
                        name: name.to_string(),
                        instance_id,
                    }
                })?;
                SectionDecoder::device(StructDecoder::new(&device.body, version)?)
            }
        })
    }

    fn read_configuration<R: Read + Seek>(&mut self, r: &mut StreamReader<R>) -> Result<()> {
        let Some(desc) = self.desc.configuration() else {
            // Descriptions from older producers lack the entry; the body is a length-prefixed
            // machine type name.
            let len = r.read_u32()?;
            let machine = r.read_str(Some(len as usize))?;
            tracing::debug!(machine = %machine, "configuration");
            return Ok(());
        };

        let decoder = StructDecoder::new(desc, desc.version.unwrap_or(0))?;
        let fields = decoder.read(r)?;
        self.capabilities = parse_capabilities(&fields)?;
        tracing::debug!(capabilities = ?self.capabilities, "configuration");
        self.configuration = Some(fields);
        Ok(())
    }
}

fn parse_capabilities(config: &Fields) -> Result<Vec<String>> {
    let Some(caps) = config
        .get("configuration/capabilities")
        .and_then(Value::as_fields)
    else {
        return Ok(Vec::new());
    };

    let declared = caps
        .get("caps_count")
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            MigrationError::MalformedSchema("capabilities without caps_count".to_string())
        })?;
    let names: Vec<String> = match caps.get("capabilities") {
        None => Vec::new(),
        Some(Value::List(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::Str(name)) => vec![name.clone()],
        Some(_) => {
            return Err(MigrationError::MalformedSchema(
                "capabilities are not capability names".to_string(),
            ))
        }
    };

    if names.len() as u64 != declared {
        return Err(MigrationError::CapabilityCountMismatch {
            declared,
            found: names.len(),
        });
    }
    Ok(names)
}
