use std::io::{Read, Seek};

use crate::error::{MigrationError, Result};
use crate::field::Field;
use crate::format::QEMU_VM_SUBSECTION;
use crate::io::StreamReader;
use crate::schema::{FieldSpec, StructDesc};
use crate::value::{Fields, Value};

/// Unfolds `array_len` entries into one spec per element, each with its own `index`.
///
/// The input is left untouched; descriptions are shared by every section of a device type.
pub fn expand_fields(specs: &[FieldSpec]) -> Vec<FieldSpec> {
    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        match spec.array_len {
            None => out.push(spec.clone()),
            Some(len) => {
                for index in 0..len {
                    let mut element = spec.clone();
                    element.array_len = None;
                    element.index = Some(index);
                    out.push(element);
                }
            }
        }
    }
    out
}

/// Decodes the fields of one VMSD struct in declaration order, followed by its subsections.
#[derive(Debug, Clone)]
pub struct StructDecoder {
    name: String,
    version: u32,
    fields: Vec<Field>,
    subsections: Vec<StructDecoder>,
}

impl StructDecoder {
    pub fn new(desc: &StructDesc, version: u32) -> Result<Self> {
        let name = desc.vmsd_name.clone().unwrap_or_default();
        let specs = desc.fields.as_deref().ok_or_else(|| {
            MigrationError::MalformedSchema(format!("no fields in struct {name:?}"))
        })?;

        let fields = expand_fields(specs)
            .iter()
            .map(Field::compile)
            .collect::<Result<Vec<_>>>()?;
        let subsections = desc
            .subsections
            .iter()
            .map(|sub| StructDecoder::new(sub, sub.version.unwrap_or(0)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name,
            version,
            fields,
            subsections,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// The field list after array expansion.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn read<R: Read + Seek>(&self, r: &mut StreamReader<R>) -> Result<Fields> {
        let mut out = Fields::new();
        self.read_into(r, &mut out)?;
        Ok(out)
    }

    /// Decodes into an existing mapping so repeated records of one section accumulate.
    pub fn read_into<R: Read + Seek>(
        &self,
        r: &mut StreamReader<R>,
        out: &mut Fields,
    ) -> Result<()> {
        for field in &self.fields {
            let value = field.read(r)?;
            out.accumulate(field.name(), value);
        }

        for sub in &self.subsections {
            let offset = r.tell();
            if r.read_u8()? != QEMU_VM_SUBSECTION {
                return Err(MigrationError::MissingSubsection {
                    name: sub.name.clone(),
                    offset,
                });
            }
            let name = r.read_str(None)?;
            let version = r.read_u32()?;
            if name != sub.name {
                tracing::warn!(
                    expected = %sub.name,
                    found = %name,
                    offset,
                    "subsection name differs from its description"
                );
            }
            tracing::trace!(subsection = %name, version, offset);
            out.insert(name, Value::Struct(sub.read(r)?));
        }
        Ok(())
    }
}
