#![allow(dead_code)]

use migration_stream::{
    SectionType, QEMU_VM_FILE_MAGIC, QEMU_VM_FILE_VERSION, QEMU_VM_SUBSECTION,
    QEMU_VM_VMDESCRIPTION,
};

/// Writes big-endian section framing the way QEMU's `savevm` does.
pub struct StreamBuilder {
    buf: Vec<u8>,
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self::with_header(QEMU_VM_FILE_MAGIC, QEMU_VM_FILE_VERSION)
    }

    pub fn with_header(magic: u32, version: u32) -> Self {
        let mut b = Self { buf: Vec::new() };
        b.u32(magic).u32(version);
        b
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    /// One-byte length prefix followed by the text.
    pub fn str(&mut self, s: &str) -> &mut Self {
        self.u8(s.len() as u8).bytes(s.as_bytes())
    }

    pub fn start(&mut self, id: u32, name: &str, instance_id: u32, version: u32) -> &mut Self {
        self.section_header(SectionType::START, id, name, instance_id, version)
    }

    pub fn full(&mut self, id: u32, name: &str, instance_id: u32, version: u32) -> &mut Self {
        self.section_header(SectionType::FULL, id, name, instance_id, version)
    }

    fn section_header(
        &mut self,
        marker: SectionType,
        id: u32,
        name: &str,
        instance_id: u32,
        version: u32,
    ) -> &mut Self {
        self.u8(marker.0).u32(id).str(name).u32(instance_id).u32(version)
    }

    pub fn part(&mut self, id: u32) -> &mut Self {
        self.u8(SectionType::PART.0).u32(id)
    }

    pub fn end(&mut self, id: u32) -> &mut Self {
        self.u8(SectionType::END.0).u32(id)
    }

    pub fn footer(&mut self, id: u32) -> &mut Self {
        self.u8(SectionType::FOOTER.0).u32(id)
    }

    pub fn subsection(&mut self, name: &str, version: u32) -> &mut Self {
        self.u8(QEMU_VM_SUBSECTION).str(name).u32(version)
    }

    pub fn command(&mut self, command: u16, len: u16) -> &mut Self {
        self.u8(SectionType::COMMAND.0).u16(command).u16(len)
    }

    pub fn eof(&mut self) -> &mut Self {
        self.u8(SectionType::EOF.0)
    }

    /// Appends the description block and returns the complete file image.
    pub fn finish(&self, description: &str) -> Vec<u8> {
        let mut out = self.buf.clone();
        out.push(QEMU_VM_VMDESCRIPTION);
        out.extend_from_slice(&(description.len() as u32).to_be_bytes());
        out.extend_from_slice(description.as_bytes());
        out
    }
}

/// Description with a single `dummy` device holding `uint32 x`.
pub const DUMMY_DESCRIPTION: &str = r#"{
    "page_size": 4096,
    "devices": [
        {
            "name": "dummy",
            "instance_id": 0,
            "vmsd_name": "dummy",
            "version": 1,
            "fields": [{"name": "x", "type": "uint32", "size": 4}]
        }
    ]
}"#;

/// Wraps `devices` (a JSON array body) into a description with a 4 KiB page size.
pub fn description(devices: &str) -> String {
    format!(r#"{{"page_size": 4096, "devices": [{devices}]}}"#)
}
