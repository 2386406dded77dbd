//! Header extensions, stored between the end of the header and the end of the first cluster.

use ial::DeviceRo;
use scroll::{Pread, BE};

use crate::header::Header;

pub const END_OF_EXTENSIONS: u32 = 0x0000_0000;
pub const BACKING_FILE_FORMAT: u32 = 0xE279_2ACA;
pub const FEATURE_NAME_TABLE: u32 = 0x6803_F857;
pub const BITMAPS: u32 = 0x2385_2875;
pub const FULL_DISK_ENCRYPTION: u32 = 0x0537_BE77;
pub const EXTERNAL_DATA_FILE: u32 = 0x4441_5441;

const FEATURE_NAME_ENTRY_LEN: usize = 48;

#[derive(Debug, Pread)]
struct ExtensionHeader {
    kind: u32,
    length: u32,
}

#[derive(Pread)]
struct FeatureNameEntry {
    kind: u8,
    bit: u8,
    name: [u8; 46],
}

#[derive(Debug, Pread)]
struct EncryptionHeaderPointer {
    offset: u64,
    length: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Incompatible,
    Compatible,
    Autoclear,
    Other(u8),
}
impl FeatureKind {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => FeatureKind::Incompatible,
            1 => FeatureKind::Compatible,
            2 => FeatureKind::Autoclear,
            other => FeatureKind::Other(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureName {
    pub kind: FeatureKind,
    pub bit: u8,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderExtension {
    BackingFileFormat(String),
    FeatureNameTable(Vec<FeatureName>),
    Bitmaps,
    FullDiskEncryption { offset: u64, length: u64 },
    ExternalDataFile(String),
    Unknown { kind: u32, length: u32 },
}

impl HeaderExtension {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BackingFileFormat(_) => "backing_file_format",
            Self::FeatureNameTable(_) => "feature_name_table",
            Self::Bitmaps => "bitmaps",
            Self::FullDiskEncryption { .. } => "full_disk_encryption",
            Self::ExternalDataFile(_) => "external_data_file",
            Self::Unknown { .. } => "unknown",
        }
    }
}

/// Read every header extension of the image.
///
/// The extension area is optional metadata, so a malformed or unreadable area yields the
/// extensions decoded before the problem, and a warning.
pub fn read_extensions<D: DeviceRo>(device: &D, header: &Header) -> Vec<HeaderExtension> {
    let mut extensions = Vec::new();

    let start = header.extensions_offset();
    let cluster_size = match header.cluster_size() {
        Some(size) => size,
        None => return extensions,
    };
    let device_size = match device.size_blocking() {
        Ok(size) => size,
        Err(err) => {
            log::warn!("skipping header extensions, the image size is unknown: {}", err);
            return extensions;
        }
    };
    let end = std::cmp::min(cluster_size, device_size);
    if start >= end {
        return extensions;
    }

    let mut area = vec![0u8; (end - start) as usize];
    if let Err(err) = device.read_blocking(start, &mut area) {
        log::warn!("skipping unreadable header extensions at {:#x}: {}", start, err);
        return extensions;
    }

    if let Err(err) = parse_extensions(&area, &mut extensions) {
        log::warn!(
            "malformed header extension area at {:#x}, keeping {} extension(s): {}",
            start,
            extensions.len(),
            err
        );
    }
    extensions
}

fn parse_extensions(
    area: &[u8],
    extensions: &mut Vec<HeaderExtension>,
) -> Result<(), scroll::Error> {
    let mut offset = 0;

    while offset < area.len() {
        let ext: ExtensionHeader = area.gread_with(&mut offset, BE)?;
        if ext.kind == END_OF_EXTENSIONS {
            break;
        }

        let length = ext.length as usize;
        let data = area
            .get(offset..offset + length)
            .ok_or(scroll::Error::TooBig {
                size: length,
                len: area.len() - offset,
            })?;
        log::trace!("header extension {:#010x} of {} bytes", ext.kind, length);

        extensions.push(match ext.kind {
            BACKING_FILE_FORMAT => HeaderExtension::BackingFileFormat(lossy_name(data)),
            FEATURE_NAME_TABLE => HeaderExtension::FeatureNameTable(parse_feature_names(data)?),
            BITMAPS => HeaderExtension::Bitmaps,
            FULL_DISK_ENCRYPTION => {
                let pointer: EncryptionHeaderPointer = data.pread_with(0, BE)?;
                HeaderExtension::FullDiskEncryption {
                    offset: pointer.offset,
                    length: pointer.length,
                }
            }
            EXTERNAL_DATA_FILE => HeaderExtension::ExternalDataFile(lossy_name(data)),
            kind => HeaderExtension::Unknown {
                kind,
                length: ext.length,
            },
        });

        // Extension data is padded to the next multiple of 8 bytes.
        offset += (length + 7) & !7;
    }
    Ok(())
}

fn parse_feature_names(data: &[u8]) -> Result<Vec<FeatureName>, scroll::Error> {
    data.chunks_exact(FEATURE_NAME_ENTRY_LEN)
        .map(|chunk| {
            let entry: FeatureNameEntry = chunk.pread_with(0, BE)?;
            Ok(FeatureName {
                kind: FeatureKind::from_raw(entry.kind),
                bit: entry.bit,
                name: lossy_name(&entry.name),
            })
        })
        .collect()
}

/// Names are not NUL terminated when they fill their field.
fn lossy_name(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&byte| byte == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}
