use crate::arch::ArchitectureId;
use crate::error::{FormatError, SliceDefect};
use crate::header::{
    ContainerHeader, FatOrder, FatVariant, SliceDescriptor, FAT_HEADER_SIZE, MAX_ALIGN,
};
use byteorder::ByteOrder;
use std::io::Cursor;

/// One architecture's image inside a universal binary.
///
/// Borrows its bytes from the input buffer; they are never interpreted.
#[derive(Debug, Clone, Copy)]
pub struct Slice<'a> {
    index: usize,
    descriptor: SliceDescriptor,
    data: &'a [u8],
}

impl<'a> Slice<'a> {
    /// Position of the descriptor in the source container's table.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn descriptor(&self) -> &SliceDescriptor {
        &self.descriptor
    }

    /// Exactly `descriptor().size` bytes starting at `descriptor().offset`.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn arch(&self) -> ArchitectureId {
        self.descriptor.arch()
    }
}

/// A validated universal binary.
///
/// Only [`UniversalBinary::parse`] constructs this, after checking every
/// structural invariant: known magic, a complete descriptor table, and slices
/// that are non-empty, aligned, in bounds and pairwise disjoint.
#[derive(Debug, Clone)]
pub struct UniversalBinary<'a> {
    header: ContainerHeader,
    slices: Vec<Slice<'a>>,
    len: usize,
}

impl<'a> UniversalBinary<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FormatError> {
        let (header, descriptors) = read_descriptors(bytes, bytes.len() as u64)?;

        let slices = descriptors
            .into_iter()
            .enumerate()
            .map(|(index, descriptor)| {
                // Bounds were validated against bytes.len(), so these fit in usize.
                let start = descriptor.offset as usize;
                let end = start + descriptor.size as usize;
                Slice {
                    index,
                    descriptor,
                    data: &bytes[start..end],
                }
            })
            .collect::<Vec<_>>();

        log::info!(
            "Parsed {} universal binary with {} slices ({} bytes)",
            header.variant.name(),
            slices.len(),
            bytes.len()
        );

        Ok(Self {
            header,
            slices,
            len: bytes.len(),
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn variant(&self) -> FatVariant {
        self.header.variant
    }

    /// Slices in descriptor-table order.
    pub fn slices(&self) -> &[Slice<'a>] {
        &self.slices
    }

    /// Length of the whole input buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn archs(&self) -> Vec<ArchitectureId> {
        self.slices.iter().map(Slice::arch).collect()
    }
}

/// Parses `bytes` into a validated [`UniversalBinary`].
pub fn parse(bytes: &[u8]) -> Result<UniversalBinary<'_>, FormatError> {
    UniversalBinary::parse(bytes)
}

/// Decodes and validates the header and descriptor table.
///
/// `prefix` must start at offset zero of the file and contain at least the
/// whole descriptor table; slice ranges are checked against `file_len`, so
/// callers can validate a large file after reading only its head.
pub fn read_descriptors(
    prefix: &[u8],
    file_len: u64,
) -> Result<(ContainerHeader, Vec<SliceDescriptor>), FormatError> {
    let available = (prefix.len() as u64).min(file_len);

    if available < 4 {
        return Err(FormatError::Truncated {
            needed: FAT_HEADER_SIZE,
            actual: available,
        });
    }

    let magic = FatOrder::read_u32(&prefix[..4]);
    let variant = FatVariant::from_magic(magic).ok_or(FormatError::BadMagic { magic })?;

    if available < FAT_HEADER_SIZE {
        return Err(FormatError::Truncated {
            needed: FAT_HEADER_SIZE,
            actual: available,
        });
    }

    let nfat_arch = FatOrder::read_u32(&prefix[4..8]);
    let header = ContainerHeader::new(variant, nfat_arch);

    if nfat_arch == 0 {
        return Err(FormatError::NoSlices);
    }

    let table_end = header.table_end();
    if table_end > available {
        return Err(FormatError::Truncated {
            needed: table_end,
            actual: available,
        });
    }

    let mut cur = Cursor::new(&prefix[FAT_HEADER_SIZE as usize..table_end as usize]);
    let mut descriptors = Vec::with_capacity(nfat_arch as usize);
    for index in 0..nfat_arch as usize {
        let descriptor = SliceDescriptor::from_reader(variant, &mut cur).map_err(|_| {
            FormatError::Truncated {
                needed: table_end,
                actual: available,
            }
        })?;

        log::debug!(
            "slice {index}: {} offset={:#x} size={:#x} align=2^{}",
            descriptor.arch(),
            descriptor.offset,
            descriptor.size,
            descriptor.align
        );

        check_descriptor(&descriptor, table_end, file_len)
            .map_err(|reason| FormatError::InvalidSlice { index, reason })?;
        descriptors.push(descriptor);
    }

    check_disjoint(&descriptors)?;

    Ok((header, descriptors))
}

fn check_descriptor(d: &SliceDescriptor, table_end: u64, file_len: u64) -> Result<(), SliceDefect> {
    if d.align > MAX_ALIGN {
        return Err(SliceDefect::AlignmentTooLarge { align: d.align });
    }
    if d.size == 0 {
        return Err(SliceDefect::Empty);
    }
    if d.offset < table_end {
        return Err(SliceDefect::OverlapsHeader {
            offset: d.offset,
            table_end,
        });
    }
    if d.offset % d.alignment() != 0 {
        return Err(SliceDefect::Misaligned {
            offset: d.offset,
            align: d.align,
        });
    }
    match d.end() {
        Some(end) if end <= file_len && usize::try_from(end).is_ok() => Ok(()),
        _ => Err(SliceDefect::OutOfBounds {
            offset: d.offset,
            size: d.size,
            file_len,
        }),
    }
}

/// Slices need not be stored in offset order, so compare neighbours after sorting.
fn check_disjoint(descriptors: &[SliceDescriptor]) -> Result<(), FormatError> {
    let mut order: Vec<usize> = (0..descriptors.len()).collect();
    order.sort_by_key(|&i| descriptors[i].offset);

    for pair in order.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        // check_descriptor already rejected overflowing ends
        let a_end = descriptors[a].offset + descriptors[a].size;
        if descriptors[b].offset < a_end {
            return Err(FormatError::OverlappingSlices {
                i: a.min(b),
                j: a.max(b),
            });
        }
    }
    Ok(())
}
