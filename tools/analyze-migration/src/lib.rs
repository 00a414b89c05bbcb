//! Dump and extract helpers behind the `analyze-migration` binary.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use migration_stream::{block_file_path, DecodeOptions, MigrationDump, SectionDecoder};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value as Json;

/// Writes `value` as JSON indented by four spaces, followed by a newline.
pub fn write_json<W: Write>(mut out: W, value: &Json) -> Result<()> {
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Decoded section state, keyed `"<name> (<section id>)"`.
pub fn dump_state(file: &Path, memory: bool) -> Result<Json> {
    let options = DecodeOptions {
        dump_memory: memory,
        ..DecodeOptions::default()
    };
    let dump = migration_stream::open(file, &options)
        .with_context(|| format!("failed to decode {}", file.display()))?;
    Ok(dump.to_json())
}

/// The device description appended to the stream, as stored.
pub fn dump_desc(file: &Path) -> Result<Json> {
    let options = DecodeOptions {
        desc_only: true,
        ..DecodeOptions::default()
    };
    let dump = migration_stream::open(file, &options)
        .with_context(|| format!("failed to read description of {}", file.display()))?;
    Ok(dump.description().json().clone())
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Every file written, in write order.
    pub written: Vec<PathBuf>,
}

/// Writes `desc.json`, `state.json` and one file per RAM block under `out_dir`.
pub fn extract(file: &Path, out_dir: &Path, memory: bool) -> Result<ExtractReport> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let mut report = ExtractReport::default();

    let desc_path = out_dir.join("desc.json");
    write_json_file(&desc_path, &dump_desc(file)?)?;
    tracing::info!(path = %desc_path.display(), "wrote device description");
    report.written.push(desc_path);

    let options = DecodeOptions {
        dump_memory: memory,
        write_memory: Some(out_dir.to_path_buf()),
        desc_only: false,
    };
    let dump = migration_stream::open(file, &options)
        .with_context(|| format!("failed to decode {}", file.display()))?;
    for path in ram_block_files(&dump, out_dir)? {
        tracing::info!(path = %path.display(), "wrote RAM block");
        report.written.push(path);
    }

    let state_path = out_dir.join("state.json");
    write_json_file(&state_path, &dump.to_json())?;
    tracing::info!(path = %state_path.display(), "wrote device state");
    report.written.push(state_path);

    Ok(report)
}

fn ram_block_files(dump: &MigrationDump, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for section in dump.sections() {
        if let SectionDecoder::Ram(ram) = section.decoder() {
            for (name, _) in ram.block_sizes().iter() {
                out.push(block_file_path(out_dir, name)?);
            }
        }
    }
    Ok(out)
}

fn write_json_file(path: &Path, value: &Json) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_json(&mut out, value).with_context(|| format!("failed to write {}", path.display()))?;
    out.flush()?;
    Ok(())
}
