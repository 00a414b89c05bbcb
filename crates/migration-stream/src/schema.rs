use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;

use serde::Deserialize;
use serde_json::Value as Json;

use crate::error::{MigrationError, Result};
use crate::format::QEMU_VM_VMDESCRIPTION;

/// How much of the file end is scanned for the device description.
pub const DESCRIPTION_SCAN_LEN: u64 = 10 * 1024 * 1024;

/// One entry of a VMSD `fields` list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Type tag (`"uint32"`, `"struct"`, ...). Absent or unknown tags decode as raw bytes.
    #[serde(rename = "type", default)]
    pub ty: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub array_len: Option<u32>,
    #[serde(rename = "struct", default)]
    pub nested: Option<StructDesc>,
    #[serde(default)]
    pub version: Option<u32>,
}

/// Field layout of a device, nested struct, or subsection.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StructDesc {
    #[serde(default)]
    pub vmsd_name: Option<String>,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub fields: Option<Vec<FieldSpec>>,
    #[serde(default)]
    pub subsections: Vec<StructDesc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceDesc {
    pub name: String,
    #[serde(default)]
    pub instance_id: u32,
    #[serde(flatten)]
    pub body: StructDesc,
}

/// The JSON device description QEMU appends after the end of the binary stream.
#[derive(Debug, Clone)]
pub struct VmDescription {
    json: Json,
    page_size: Option<u64>,
    devices: HashMap<(String, u32), DeviceDesc>,
    configuration: Option<StructDesc>,
    stream_end: u64,
}

impl VmDescription {
    /// Parses the description text. `stream_end` is the absolute offset of the description
    /// marker, i.e. the first byte the binary decoder must not read.
    pub fn parse(text: &str, stream_end: u64) -> Result<Self> {
        let json: Json = serde_json::from_str(text)?;

        let entries = json
            .get("devices")
            .and_then(Json::as_array)
            .ok_or_else(|| MigrationError::MalformedSchema("missing devices list".to_string()))?;

        let mut devices = HashMap::with_capacity(entries.len());
        for entry in entries {
            let device = DeviceDesc::deserialize(entry)?;
            if device.body.fields.as_ref().map_or(true, Vec::is_empty) {
                return Err(MigrationError::MalformedSchema(format!(
                    "vmstate for device {} has no fields",
                    device.name
                )));
            }
            devices.insert((device.name.clone(), device.instance_id), device);
        }

        let configuration = match json.get("configuration") {
            Some(desc) => Some(StructDesc::deserialize(desc)?),
            None => None,
        };
        let page_size = json.get("page_size").and_then(Json::as_u64);

        Ok(Self {
            json,
            page_size,
            devices,
            configuration,
            stream_end,
        })
    }

    /// The description exactly as parsed (key order preserved).
    pub fn json(&self) -> &Json {
        &self.json
    }

    pub fn page_size(&self) -> Option<u64> {
        self.page_size
    }

    pub fn device(&self, name: &str, instance_id: u32) -> Option<&DeviceDesc> {
        self.devices.get(&(name.to_string(), instance_id))
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceDesc> {
        self.devices.values()
    }

    pub fn configuration(&self) -> Option<&StructDesc> {
        self.configuration.as_ref()
    }

    pub fn stream_end(&self) -> u64 {
        self.stream_end
    }
}

/// Position of the description block inside a scanned tail buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionLocation {
    /// Index of the `QEMU_VM_VMDESCRIPTION` marker byte.
    pub marker: usize,
    pub json: Range<usize>,
}

/// Index of the first `{` strictly after the last NUL byte.
pub fn find_json_anchor(tail: &[u8]) -> Option<usize> {
    let nul = tail.iter().rposition(|&b| b == 0)?;
    tail[nul + 1..]
        .iter()
        .position(|&b| b == b'{')
        .map(|off| nul + 1 + off)
}

pub fn locate_description(tail: &[u8]) -> Result<DescriptionLocation> {
    let anchor = find_json_anchor(tail)
        .ok_or(MigrationError::SchemaNotFound("no JSON text after the binary stream"))?;
    let marker = anchor
        .checked_sub(5)
        .ok_or(MigrationError::SchemaNotFound("JSON text too close to the start"))?;
    if tail[marker] != QEMU_VM_VMDESCRIPTION {
        return Err(MigrationError::SchemaNotFound(
            "no description marker in front of the JSON text",
        ));
    }

    let mut len = [0u8; 4];
    len.copy_from_slice(&tail[marker + 1..anchor]);
    let len = u32::from_be_bytes(len) as usize;
    let end = anchor
        .checked_add(len)
        .filter(|&end| end <= tail.len())
        .ok_or(MigrationError::SchemaNotFound("description length exceeds the file"))?;

    Ok(DescriptionLocation {
        marker,
        json: anchor..end,
    })
}

/// Reads the device description from the end of `source`.
///
/// The scan uses its own buffer; callers position their stream reader independently afterwards.
pub fn load_description<R: Read + Seek>(source: &mut R) -> Result<VmDescription> {
    let end = source.seek(SeekFrom::End(0))?;
    let start = end.saturating_sub(DESCRIPTION_SCAN_LEN);
    source.seek(SeekFrom::Start(start))?;

    let mut tail = Vec::new();
    source.by_ref().take(end - start).read_to_end(&mut tail)?;

    let location = locate_description(&tail)?;
    let text = String::from_utf8(tail[location.json.clone()].to_vec())?;
    tracing::debug!(
        offset = start + location.marker as u64,
        len = text.len(),
        "found device description"
    );
    VmDescription::parse(&text, start + location.marker as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn trailer(json: &str) -> Vec<u8> {
        let mut out = vec![QEMU_VM_VMDESCRIPTION];
        out.extend_from_slice(&(json.len() as u32).to_be_bytes());
        out.extend_from_slice(json.as_bytes());
        out
    }

    #[test]
    fn anchor_is_first_brace_after_last_nul() {
        let tail = b"{a\0{b\0c{d{e";
        assert_eq!(find_json_anchor(tail), Some(7));
        assert_eq!(find_json_anchor(b"no nul {"), None);
        assert_eq!(find_json_anchor(b"{{\0 no brace"), None);
    }

    #[test]
    fn locate_skips_braces_inside_the_binary_stream() {
        let json = r#"{"page_size": 4096, "devices": [{"name": "a"}]}"#;
        let mut tail = b"\x01{\0{\x00\x7e".to_vec();
        let marker = tail.len();
        tail.extend(trailer(json));

        let loc = locate_description(&tail).unwrap();
        assert_eq!(loc.marker, marker);
        assert_eq!(&tail[loc.json], json.as_bytes());
    }

    #[test]
    fn wrong_marker_is_rejected() {
        let mut tail = trailer(r#"{"devices": []}"#);
        tail[0] = 0x07;
        let err = locate_description(&tail).unwrap_err();
        assert!(matches!(err, MigrationError::SchemaNotFound(_)));
    }

    #[test]
    fn overlong_length_is_rejected() {
        let mut tail = trailer(r#"{"devices": []}"#);
        tail[4] = 0xff;
        assert!(matches!(
            locate_description(&tail),
            Err(MigrationError::SchemaNotFound(_))
        ));
    }

    #[test]
    fn devices_are_indexed_by_name_and_instance() {
        let json = r#"{
            "page_size": 4096,
            "devices": [
                {"name": "timer", "instance_id": 1, "version": 2,
                 "fields": [{"name": "t", "type": "uint64", "size": 8}]},
                {"name": "apic", "fields": [{"name": "id", "type": "uint8", "size": 1}]}
            ]
        }"#;
        let desc = VmDescription::parse(json, 0).unwrap();

        assert_eq!(desc.page_size(), Some(4096));
        let timer = desc.device("timer", 1).unwrap();
        assert_eq!(timer.body.version, Some(2));
        assert!(desc.device("timer", 0).is_none());
        assert!(desc.device("apic", 0).is_some());
        assert!(desc.configuration().is_none());
    }

    #[test]
    fn device_without_fields_is_malformed() {
        for json in [
            r#"{"devices": [{"name": "bad"}]}"#,
            r#"{"devices": [{"name": "bad", "fields": []}]}"#,
        ] {
            let err = VmDescription::parse(json, 0).unwrap_err();
            assert!(matches!(err, MigrationError::MalformedSchema(msg) if msg.contains("bad")));
        }
    }

    #[test]
    fn load_leaves_description_offset() {
        let mut file = vec![0x51, 0x45, 0x56, 0x4d, 0, 0, 0, 3, 0];
        let marker = file.len() as u64;
        file.extend(trailer(r#"{"devices": [{"name": "d", "fields": [{"name": "x"}]}]}"#));

        let desc = load_description(&mut Cursor::new(file)).unwrap();
        assert_eq!(desc.stream_end(), marker);
        assert!(desc.device("d", 0).is_some());
    }
}
