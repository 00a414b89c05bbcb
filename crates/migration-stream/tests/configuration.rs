mod common;

use std::io::Cursor;

use common::{description, StreamBuilder};
use migration_stream::{
    decode_stream, DecodeOptions, MigrationDump, MigrationError, RamFlags, Result, SectionType,
    Value,
};

fn decode(image: Vec<u8>) -> Result<MigrationDump> {
    decode_stream(Cursor::new(image), &DecodeOptions::default())
}

fn with_configuration(caps_len: u32) -> String {
    format!(
        r#"{{
            "page_size": 4096,
            "devices": [],
            "configuration": {{
                "vmsd_name": "configuration",
                "version": 1,
                "fields": [
                    {{"name": "len", "type": "uint32", "size": 4}},
                    {{"name": "name", "type": "buffer", "size": 3}}
                ],
                "subsections": [{{
                    "vmsd_name": "configuration/capabilities",
                    "version": 1,
                    "fields": [
                        {{"name": "caps_count", "type": "uint32", "size": 4}},
                        {{"name": "capabilities", "type": "capability", "size": 16,
                          "array_len": {caps_len}}}
                    ]
                }}]
            }}
        }}"#
    )
}

fn configuration(b: &mut StreamBuilder, caps_count: u32, caps: &[&str]) {
    b.u8(SectionType::CONFIGURATION.0)
        .u32(3)
        .bytes(b"q35")
        .subsection("configuration/capabilities", 1)
        .u32(caps_count);
    for cap in caps {
        b.str(cap);
    }
}

#[test]
fn capabilities_are_collected() {
    let mut b = StreamBuilder::new();
    configuration(&mut b, 2, &["x-ignore-shared", "validate-uuid"]);
    b.eof();

    let dump = decode(b.finish(&with_configuration(2))).unwrap();
    assert_eq!(dump.capabilities(), ["x-ignore-shared", "validate-uuid"]);
    let config = dump.configuration().unwrap();
    assert_eq!(config.get("len").and_then(Value::as_u64), Some(3));
}

#[test]
fn capability_count_must_match() {
    let mut b = StreamBuilder::new();
    configuration(&mut b, 2, &["x-ignore-shared"]);
    b.eof();

    assert!(matches!(
        decode(b.finish(&with_configuration(1))),
        Err(MigrationError::CapabilityCountMismatch {
            declared: 2,
            found: 1
        })
    ));
}

#[test]
fn ignore_shared_adds_block_address() {
    let mut b = StreamBuilder::new();
    configuration(&mut b, 1, &["x-ignore-shared"]);
    b.full(1, "ram", 0, 4)
        .u64(0x2000 | RamFlags::MEM_SIZE.bits())
        .str("pc.ram")
        .u64(0x2000)
        .u64(0xfee0_0000)
        .u64(RamFlags::EOS.bits())
        .footer(1)
        .eof();

    let dump = decode(b.finish(&with_configuration(1))).unwrap();
    assert_eq!(
        dump.to_json()["ram (1)"]["section sizes"]["pc.ram"],
        "0x0000000000002000"
    );
}

#[test]
fn legacy_configuration_is_skipped() {
    let image = StreamBuilder::new()
        .u8(SectionType::CONFIGURATION.0)
        .u32(9)
        .bytes(b"pc-q35-9.0")
        .eof()
        .finish(&description(""));

    // Length prefix says 9 but the name has 10 bytes; the extra one is read as a marker.
    assert!(matches!(
        decode(image),
        Err(MigrationError::UnknownSectionType { marker: b'0', .. })
    ));

    let image = StreamBuilder::new()
        .u8(SectionType::CONFIGURATION.0)
        .u32(10)
        .bytes(b"pc-q35-9.0")
        .eof()
        .finish(&description(""));
    let dump = decode(image).unwrap();
    assert!(dump.configuration().is_none());
    assert!(dump.capabilities().is_empty());
}
