//! Recognizing managed assemblies among the files of a project's `bin` folder.
//!
//! A managed assembly is a PE image that carries a CLI header. Anything else
//! dropped into `bin` (native DLLs, text files renamed to `.dll`) is reported
//! as [`AssemblyError::BadImageFormat`] and excluded from the reference set.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const IMAGE_FILE_DLL: u16 = 0x2000;
const PE32_MAGIC: u16 = 0x10B;
const PE32_PLUS_MAGIC: u16 = 0x20B;
const CLI_HEADER_DIRECTORY: u32 = 14;
const METADATA_SIGNATURE: u32 = 0x424A_5342;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("bad image format: {0}")]
    BadImageFormat(String),

    #[error("cannot read assembly: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageKind {
    Library,
    Executable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyIdentity {
    pub name: String,
    pub machine: u16,
    pub kind: ImageKind,
    pub runtime_version: Option<String>,
}

/// Reads the identity of an assembly on disk.
pub trait AssemblyNameReader {
    fn get_assembly_name(&self, path: &Path) -> Result<AssemblyIdentity, AssemblyError>;
}

/// What the filter concluded about a candidate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyClass {
    Library,
    NotLibrary,
    /// The identity could not be read for a reason other than a malformed
    /// image. The filter's [`IndeterminatePolicy`] decides these.
    Indeterminate(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndeterminatePolicy {
    #[default]
    Include,
    Exclude,
}

pub struct AssemblyFilter<'a> {
    reader: &'a dyn AssemblyNameReader,
    policy: IndeterminatePolicy,
}

impl<'a> AssemblyFilter<'a> {
    pub fn new(reader: &'a dyn AssemblyNameReader) -> Self {
        Self::with_policy(reader, IndeterminatePolicy::default())
    }

    pub fn with_policy(reader: &'a dyn AssemblyNameReader, policy: IndeterminatePolicy) -> Self {
        Self { reader, policy }
    }

    pub fn classify(&self, path: &Path) -> AssemblyClass {
        match self.reader.get_assembly_name(path) {
            Ok(_) => AssemblyClass::Library,
            Err(AssemblyError::BadImageFormat(_)) => AssemblyClass::NotLibrary,
            Err(err) => AssemblyClass::Indeterminate(err.to_string()),
        }
    }

    pub fn is_library(&self, path: &Path) -> bool {
        match self.classify(path) {
            AssemblyClass::Library => true,
            AssemblyClass::NotLibrary => false,
            AssemblyClass::Indeterminate(reason) => {
                tracing::trace!(path = %path.display(), %reason, "assembly identity indeterminate");
                self.policy == IndeterminatePolicy::Include
            }
        }
    }
}

/// Reads PE/COFF headers straight from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeAssemblyReader;

impl AssemblyNameReader for PeAssemblyReader {
    fn get_assembly_name(&self, path: &Path) -> Result<AssemblyIdentity, AssemblyError> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        parse_image(&bytes, name)
    }
}

struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_pointer: u32,
}

fn bad(reason: &str) -> AssemblyError {
    AssemblyError::BadImageFormat(reason.to_string())
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let slice = bytes.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([slice[0], slice[1]]))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn parse_image(bytes: &[u8], name: String) -> Result<AssemblyIdentity, AssemblyError> {
    if bytes.get(0..2) != Some(b"MZ".as_slice()) {
        return Err(bad("missing MZ signature"));
    }

    let pe_offset = read_u32(bytes, 0x3C).ok_or_else(|| bad("truncated DOS header"))? as usize;
    if bytes.get(pe_offset..pe_offset + 4) != Some(b"PE\0\0".as_slice()) {
        return Err(bad("missing PE signature"));
    }

    let coff = pe_offset + 4;
    let machine = read_u16(bytes, coff).ok_or_else(|| bad("truncated COFF header"))?;
    let section_count = read_u16(bytes, coff + 2).ok_or_else(|| bad("truncated COFF header"))?;
    let optional_size = read_u16(bytes, coff + 16).ok_or_else(|| bad("truncated COFF header"))?;
    let characteristics = read_u16(bytes, coff + 18).ok_or_else(|| bad("truncated COFF header"))?;

    let optional = coff + 20;
    let (count_offset, directories) = match read_u16(bytes, optional) {
        Some(PE32_MAGIC) => (optional + 92, optional + 96),
        Some(PE32_PLUS_MAGIC) => (optional + 108, optional + 112),
        Some(_) => return Err(bad("unknown optional header magic")),
        None => return Err(bad("truncated optional header")),
    };

    let directory_count = read_u32(bytes, count_offset).ok_or_else(|| bad("truncated optional header"))?;
    if directory_count <= CLI_HEADER_DIRECTORY {
        return Err(bad("no CLI header"));
    }

    let cli_entry = directories + CLI_HEADER_DIRECTORY as usize * 8;
    let cli_rva = read_u32(bytes, cli_entry).ok_or_else(|| bad("truncated data directories"))?;
    let cli_size = read_u32(bytes, cli_entry + 4).ok_or_else(|| bad("truncated data directories"))?;
    if cli_rva == 0 || cli_size == 0 {
        return Err(bad("no CLI header"));
    }

    let sections = read_sections(bytes, optional + optional_size as usize, section_count)?;

    let kind = if characteristics & IMAGE_FILE_DLL != 0 {
        ImageKind::Library
    } else {
        ImageKind::Executable
    };

    Ok(AssemblyIdentity {
        name,
        machine,
        kind,
        runtime_version: runtime_version(bytes, &sections, cli_rva),
    })
}

fn read_sections(bytes: &[u8], table: usize, count: u16) -> Result<Vec<Section>, AssemblyError> {
    (0..count as usize)
        .map(|index| -> Result<Section, AssemblyError> {
            let entry = table + index * 40;
            let field = |offset: usize| read_u32(bytes, entry + offset).ok_or_else(|| bad("truncated section table"));
            Ok(Section {
                virtual_size: field(8)?,
                virtual_address: field(12)?,
                raw_size: field(16)?,
                raw_pointer: field(20)?,
            })
        })
        .collect()
}

fn rva_to_offset(sections: &[Section], rva: u32) -> Option<usize> {
    sections.iter().find_map(|section| {
        let extent = section.virtual_size.max(section.raw_size);
        let delta = rva.checked_sub(section.virtual_address)?;
        if delta >= extent {
            return None;
        }
        section.raw_pointer.checked_add(delta).map(|offset| offset as usize)
    })
}

/// Best effort: an unreachable metadata root leaves the version unknown.
fn runtime_version(bytes: &[u8], sections: &[Section], cli_rva: u32) -> Option<String> {
    let cli = rva_to_offset(sections, cli_rva)?;
    let metadata_rva = read_u32(bytes, cli + 8)?;
    let metadata = rva_to_offset(sections, metadata_rva)?;

    if read_u32(bytes, metadata)? != METADATA_SIGNATURE {
        return None;
    }

    let length = read_u32(bytes, metadata + 12)? as usize;
    let raw = bytes.get(metadata + 16..(metadata + 16).checked_add(length)?)?;
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end]).ok().map(str::to_string)
}
