pub const QEMU_VM_FILE_MAGIC: u32 = 0x5145_564d;
pub const QEMU_VM_FILE_VERSION: u32 = 3;

/// Marker byte opening a subsection inside a device's state.
pub const QEMU_VM_SUBSECTION: u8 = 0x05;
/// Marker byte preceding the trailing JSON device description.
pub const QEMU_VM_VMDESCRIPTION: u8 = 0x06;

pub const QEMU_MIG_CMD_SWITCHOVER_START: u16 = 0x0b;

/// Serialized NULL pointer (distinct from an all-zero value).
pub const NULL_PTR_MARKER: &[u8] = b"0";

/// Top-level marker byte that opens every record of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionType(pub u8);

impl SectionType {
    pub const EOF: SectionType = SectionType(0x00);
    pub const START: SectionType = SectionType(0x01);
    pub const PART: SectionType = SectionType(0x02);
    pub const END: SectionType = SectionType(0x03);
    pub const FULL: SectionType = SectionType(0x04);
    pub const SUBSECTION: SectionType = SectionType(QEMU_VM_SUBSECTION);
    pub const VMDESCRIPTION: SectionType = SectionType(QEMU_VM_VMDESCRIPTION);
    pub const CONFIGURATION: SectionType = SectionType(0x07);
    pub const COMMAND: SectionType = SectionType(0x08);
    pub const FOOTER: SectionType = SectionType(0x7e);

    pub fn name(self) -> Option<&'static str> {
        match self {
            SectionType::EOF => Some("EOF"),
            SectionType::START => Some("SECTION_START"),
            SectionType::PART => Some("SECTION_PART"),
            SectionType::END => Some("SECTION_END"),
            SectionType::FULL => Some("SECTION_FULL"),
            SectionType::SUBSECTION => Some("SUBSECTION"),
            SectionType::VMDESCRIPTION => Some("VMDESCRIPTION"),
            SectionType::CONFIGURATION => Some("CONFIGURATION"),
            SectionType::COMMAND => Some("COMMAND"),
            SectionType::FOOTER => Some("SECTION_FOOTER"),
            _ => None,
        }
    }
}

impl core::fmt::Display for SectionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(name) = self.name() {
            write!(f, "{name}({:#04x})", self.0)
        } else {
            write!(f, "SectionType({:#04x})", self.0)
        }
    }
}
