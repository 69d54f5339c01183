pub mod fat_arch;

pub use fat_arch::SliceDescriptor;

use byteorder::WriteBytesExt;
use std::io;

/// Byte order of every header and descriptor field.
///
/// Universal binaries are always big-endian on disk, whatever the host is.
pub type FatOrder = byteorder::BigEndian;

/// Magic of the classic descriptor table with 32-bit offsets and sizes.
pub const FAT_MAGIC: u32 = goblin::mach::fat::FAT_MAGIC;

/// Magic of the descriptor table with 64-bit offsets and sizes.
pub const FAT_MAGIC_64: u32 = 0xcafe_babf;

/// Size of the `magic` + `nfat_arch` header preceding the descriptor table.
pub const FAT_HEADER_SIZE: u64 = 8;

/// Largest alignment exponent accepted for a slice (`2^15`, as `lipo` allows).
pub const MAX_ALIGN: u32 = 15;

/// Which descriptor table layout a container uses.
///
/// Chosen once from the magic and carried through reading and writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatVariant {
    /// `fat_arch` records: 20 bytes, 32-bit offset and size.
    Fat32,
    /// `fat_arch_64` records: 32 bytes, 64-bit offset and size plus a reserved word.
    Fat64,
}

impl FatVariant {
    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            FAT_MAGIC => Some(FatVariant::Fat32),
            FAT_MAGIC_64 => Some(FatVariant::Fat64),
            _ => None,
        }
    }

    pub fn magic(self) -> u32 {
        match self {
            FatVariant::Fat32 => FAT_MAGIC,
            FatVariant::Fat64 => FAT_MAGIC_64,
        }
    }

    /// Size in bytes of one descriptor record.
    pub fn record_size(self) -> u64 {
        match self {
            FatVariant::Fat32 => 20,
            FatVariant::Fat64 => 32,
        }
    }

    /// End of the descriptor table for `count` records, i.e. the first byte
    /// that slice data may occupy.
    pub fn table_end(self, count: u32) -> u64 {
        FAT_HEADER_SIZE + u64::from(count) * self.record_size()
    }

    /// Largest end offset a slice may have in this layout.
    pub fn max_addressable(self) -> u64 {
        match self {
            FatVariant::Fat32 => u64::from(u32::MAX),
            FatVariant::Fat64 => u64::MAX,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FatVariant::Fat32 => "fat",
            FatVariant::Fat64 => "fat64",
        }
    }
}

impl std::fmt::Display for FatVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#010x})", self.name(), self.magic())
    }
}

/// The `fat_header` at the start of every universal binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Layout of the descriptor table, derived from the magic.
    pub variant: FatVariant,

    /// Number of descriptor records that follow the header.
    pub nfat_arch: u32,
}

impl ContainerHeader {
    pub fn new(variant: FatVariant, nfat_arch: u32) -> Self {
        Self { variant, nfat_arch }
    }

    pub fn write_to<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u32::<FatOrder>(self.variant.magic())?;
        out.write_u32::<FatOrder>(self.nfat_arch)
    }

    /// End of the descriptor table declared by this header.
    pub fn table_end(&self) -> u64 {
        self.variant.table_end(self.nfat_arch)
    }
}
