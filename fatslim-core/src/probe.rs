//! Classifies arbitrary files: universal, thin Mach-O, static archive or other.

use crate::arch::ArchitectureId;
use crate::binary::read_descriptors;
use crate::error::FormatError;
use crate::header::{FatOrder, FatVariant, SliceDescriptor, FAT_HEADER_SIZE};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use goblin::mach::header::{MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// What a file turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Universal {
        variant: FatVariant,
        slices: Vec<SliceDescriptor>,
    },
    /// A single-architecture Mach-O image.
    Thin(ArchitectureId),
    /// A static library (`!<arch>`); not a universal binary.
    Archive,
    /// Universal magic, but the structure is invalid.
    Malformed(FormatError),
    /// Anything else.
    Unknown,
}

impl Probe {
    /// Architectures present, in file order.
    pub fn archs(&self) -> Vec<ArchitectureId> {
        match self {
            Probe::Universal { slices, .. } => slices.iter().map(SliceDescriptor::arch).collect(),
            Probe::Thin(id) => vec![*id],
            _ => Vec::new(),
        }
    }
}

/// Reads the `(cputype, cpusubtype)` of a thin Mach-O header at the start of `bytes`.
///
/// Mach-O headers are stored in the target's byte order; the magic tells which.
pub fn macho_arch(bytes: &[u8]) -> Option<ArchitectureId> {
    if bytes.len() < 12 {
        return None;
    }
    let (cputype, cpusubtype) = match LittleEndian::read_u32(&bytes[..4]) {
        MH_MAGIC | MH_MAGIC_64 => (
            LittleEndian::read_u32(&bytes[4..8]),
            LittleEndian::read_u32(&bytes[8..12]),
        ),
        MH_CIGAM | MH_CIGAM_64 => (
            BigEndian::read_u32(&bytes[4..8]),
            BigEndian::read_u32(&bytes[8..12]),
        ),
        _ => return None,
    };
    Some(ArchitectureId::exact(cputype, cpusubtype))
}

pub fn is_archive(bytes: &[u8]) -> bool {
    bytes.starts_with(goblin::archive::MAGIC)
}

/// Classifies an in-memory file.
pub fn probe(bytes: &[u8]) -> Probe {
    probe_prefix(bytes, bytes.len() as u64)
}

/// Classifies a file on disk, reading only its header and descriptor table.
pub fn probe_file(path: impl AsRef<Path>) -> io::Result<Probe> {
    let mut file = File::open(path.as_ref())?;
    let file_len = file.metadata()?.len();

    let mut head = Vec::with_capacity(FAT_HEADER_SIZE as usize);
    (&mut file).take(FAT_HEADER_SIZE.max(12)).read_to_end(&mut head)?;

    if head.len() as u64 >= FAT_HEADER_SIZE {
        if let Some(variant) = FatVariant::from_magic(FatOrder::read_u32(&head[..4])) {
            let table_end = variant.table_end(FatOrder::read_u32(&head[4..8]));
            let want = table_end.min(file_len);
            let have = head.len() as u64;
            if want > have {
                (&mut file).take(want - have).read_to_end(&mut head)?;
            }
        }
    }

    Ok(probe_prefix(&head, file_len))
}

fn probe_prefix(prefix: &[u8], file_len: u64) -> Probe {
    match read_descriptors(prefix, file_len) {
        Ok((header, slices)) => Probe::Universal {
            variant: header.variant,
            slices,
        },
        Err(FormatError::BadMagic { .. }) | Err(FormatError::Truncated { actual: 0..=3, .. }) => {
            if let Some(id) = macho_arch(prefix) {
                Probe::Thin(id)
            } else if is_archive(prefix) {
                Probe::Archive
            } else {
                Probe::Unknown
            }
        }
        Err(err) => Probe::Malformed(err),
    }
}
