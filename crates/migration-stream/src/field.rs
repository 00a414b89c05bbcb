use std::io::{Read, Seek};

use crate::error::{MigrationError, Result};
use crate::format::NULL_PTR_MARKER;
use crate::io::StreamReader;
use crate::schema::FieldSpec;
use crate::value::{Integer, Value};
use crate::vmsd::StructDecoder;

/// Decoding strategy selected by a field's type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    /// Big-endian signed integer.
    Int,
    /// Little-endian signed integer (`"int32 le"`).
    IntLe,
    /// Big-endian unsigned integer.
    UInt,
    Capability,
    NullPtr,
    Struct,
    /// `size` raw bytes. Covers buffers, bitmaps, timers, floats and every unknown tag.
    Raw,
}

impl FieldKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "bool" => FieldKind::Bool,
            "int8" | "int16" | "int32" | "int64" | "int8 equal" | "int16 equal"
            | "int32 equal" | "int64 equal" => FieldKind::Int,
            "int32 le" => FieldKind::IntLe,
            "uint8" | "uint16" | "uint32" | "uint64" | "uint8 equal" | "uint16 equal"
            | "uint32 equal" | "uint64 equal" => FieldKind::UInt,
            "capability" => FieldKind::Capability,
            "nullptr" => FieldKind::NullPtr,
            "struct" => FieldKind::Struct,
            _ => FieldKind::Raw,
        }
    }

    /// Width implied by the tag itself, used when the description omits `size`.
    fn implied_size(tag: &str) -> Option<usize> {
        let digits: String = tag
            .trim_start_matches('u')
            .trim_start_matches("int")
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        match digits.as_str() {
            "8" => Some(1),
            "16" => Some(2),
            "32" => Some(4),
            "64" => Some(8),
            _ => None,
        }
    }
}

/// A field ready for decoding: kind resolved, size checked, nested layout compiled.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    index: Option<u32>,
    kind: FieldKind,
    size: usize,
    nested: Option<Box<StructDecoder>>,
}

impl Field {
    pub(crate) fn compile(spec: &FieldSpec) -> Result<Self> {
        let tag = spec.ty.as_deref().unwrap_or("unknown");
        let kind = FieldKind::from_tag(tag);
        let declared = spec.size.map(usize::try_from).transpose().map_err(|_| {
            MigrationError::MalformedSchema(format!("field {} size out of range", spec.name))
        })?;

        let size = match kind {
            FieldKind::Int | FieldKind::IntLe | FieldKind::UInt => {
                let size = declared.or_else(|| FieldKind::implied_size(tag)).ok_or_else(|| {
                    MigrationError::MalformedSchema(format!("field {} has no size", spec.name))
                })?;
                if size == 0 || size > 8 {
                    return Err(MigrationError::MalformedSchema(format!(
                        "field {} declares a {size}-byte integer",
                        spec.name
                    )));
                }
                size
            }
            FieldKind::Bool | FieldKind::NullPtr => {
                let size = declared.unwrap_or(1);
                if size == 0 {
                    return Err(MigrationError::MalformedSchema(format!(
                        "field {} has zero size",
                        spec.name
                    )));
                }
                size
            }
            FieldKind::Raw => declared.ok_or_else(|| {
                MigrationError::MalformedSchema(format!("field {} has no size", spec.name))
            })?,
            FieldKind::Capability | FieldKind::Struct => declared.unwrap_or(0),
        };

        let nested = match kind {
            FieldKind::Struct => {
                let desc = spec.nested.as_ref().ok_or_else(|| {
                    MigrationError::MalformedSchema(format!(
                        "struct field {} has no struct description",
                        spec.name
                    ))
                })?;
                let version = desc.version.or(spec.version).unwrap_or(0);
                Some(Box::new(StructDecoder::new(desc, version)?))
            }
            _ => None,
        };

        Ok(Self {
            name: spec.name.clone(),
            index: spec.index,
            kind,
            size,
            nested,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub(crate) fn read<R: Read + Seek>(&self, r: &mut StreamReader<R>) -> Result<Value> {
        let offset = r.tell();
        tracing::trace!(field = %self.name, index = ?self.index, kind = ?self.kind, offset);

        match self.kind {
            FieldKind::Bool => {
                let data = r.read_var(Some(self.size))?;
                Ok(Value::Bool(data[0] != 0))
            }
            FieldKind::Int => Ok(Value::Int(self.read_integer(r, Integer::from_be_bytes)?)),
            FieldKind::IntLe => Ok(Value::Int(self.read_integer(r, Integer::from_le_bytes)?)),
            FieldKind::UInt => Ok(Value::UInt(self.read_integer(r, Integer::from_be_bytes)?)),
            FieldKind::Capability => {
                let len = r.read_u8()?;
                Ok(Value::Str(r.read_str(Some(usize::from(len)))?))
            }
            FieldKind::NullPtr => {
                let data = r.read_var(Some(self.size))?;
                if data != NULL_PTR_MARKER {
                    return Err(MigrationError::NullPtrMarker {
                        field: self.name.clone(),
                        found: data,
                        offset,
                    });
                }
                Ok(Value::NullPtr)
            }
            FieldKind::Struct => match &self.nested {
                Some(nested) => Ok(Value::Struct(nested.read(r)?)),
                None => Err(MigrationError::MalformedSchema(format!(
                    "struct field {} was not compiled",
                    self.name
                ))),
            },
            FieldKind::Raw => Ok(Value::Bytes(r.read_var(Some(self.size))?)),
        }
    }

    fn read_integer<R: Read + Seek>(
        &self,
        r: &mut StreamReader<R>,
        convert: fn(&[u8]) -> Option<Integer>,
    ) -> Result<Integer> {
        let data = r.read_bytes(self.size)?;
        convert(&data).ok_or_else(|| {
            MigrationError::MalformedSchema(format!(
                "field {} declares a {}-byte integer",
                self.name, self.size
            ))
        })
    }
}
