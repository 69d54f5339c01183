//! Re-emits a keep-set as a universal binary or a bare single-architecture image.
//!
//! Removing a slice shifts every later one, so the layout is rebuilt from the
//! end of the descriptor table: each slice goes at the next multiple of its own
//! alignment and the gaps are zero-filled. Architecture, subtype, size,
//! alignment and the fat64 reserved word are carried through unchanged.

use crate::binary::Slice;
use crate::error::WriteError;
use crate::header::{ContainerHeader, FatVariant, SliceDescriptor};
use std::io::Cursor;

/// How to emit a keep-set that holds exactly one slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SingleSlicePolicy {
    /// Emit the slice's bytes on their own, without a universal wrapper.
    #[default]
    Unwrap,
    /// Emit a universal binary with a single descriptor.
    KeepWrapped,
}

/// Layout the writer intended, used by [`crate::verify`] to check the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputKind {
    Universal {
        variant: FatVariant,
        descriptors: Vec<SliceDescriptor>,
    },
    /// The bytes are a single slice; `descriptor.offset` is zero.
    Bare { descriptor: SliceDescriptor },
}

/// Candidate output bytes together with the layout they should have.
#[derive(Debug, Clone)]
pub struct Output {
    bytes: Vec<u8>,
    kind: OutputKind,
}

impl Output {
    #[cfg(test)]
    pub(crate) fn for_test(bytes: Vec<u8>, kind: OutputKind) -> Self {
        Self { bytes, kind }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn kind(&self) -> &OutputKind {
        &self.kind
    }

    /// `true` for a universal container, `false` for a bare binary.
    pub fn is_wrapped(&self) -> bool {
        matches!(self.kind, OutputKind::Universal { .. })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Serializes `keep` using the descriptor layout `variant` of the source container.
pub fn write(
    variant: FatVariant,
    keep: &[Slice<'_>],
    single: SingleSlicePolicy,
) -> Result<Output, WriteError> {
    match (keep, single) {
        ([], _) => Err(WriteError::EmptyKeepSet),
        ([only], SingleSlicePolicy::Unwrap) => Ok(write_bare(only)),
        _ => write_universal(variant, keep),
    }
}

fn write_bare(slice: &Slice<'_>) -> Output {
    log::info!(
        "Unwrapping remaining {} slice into a bare binary ({} bytes)",
        slice.arch(),
        slice.data().len()
    );

    let descriptor = SliceDescriptor {
        offset: 0,
        ..*slice.descriptor()
    };
    Output {
        bytes: slice.data().to_vec(),
        kind: OutputKind::Bare { descriptor },
    }
}

fn write_universal(variant: FatVariant, keep: &[Slice<'_>]) -> Result<Output, WriteError> {
    let count = u32::try_from(keep.len()).map_err(|_| WriteError::OffsetOverflow {
        index: keep.len() - 1,
        offset: u64::MAX,
    })?;
    let header = ContainerHeader::new(variant, count);
    let descriptors = layout(variant, header.table_end(), keep)?;

    let total = descriptors
        .last()
        .and_then(SliceDescriptor::end)
        .unwrap_or_else(|| header.table_end());
    let total = usize::try_from(total).map_err(|_| WriteError::OffsetOverflow {
        index: keep.len() - 1,
        offset: total,
    })?;

    let mut bytes = vec![0u8; total];
    {
        let table_end = header.table_end() as usize;
        let mut cur = Cursor::new(&mut bytes[..table_end]);
        header.write_to(&mut cur)?;
        for descriptor in &descriptors {
            descriptor.write_to(variant, &mut cur)?;
        }
    }

    for (slice, descriptor) in keep.iter().zip(&descriptors) {
        let start = descriptor.offset as usize;
        bytes[start..start + slice.data().len()].copy_from_slice(slice.data());
    }

    log::info!(
        "Wrote {} universal binary with {} slices ({} bytes)",
        variant.name(),
        descriptors.len(),
        bytes.len()
    );

    Ok(Output {
        bytes,
        kind: OutputKind::Universal {
            variant,
            descriptors,
        },
    })
}

/// Assigns each slice the first offset at or after the previous slice's end
/// that satisfies its own alignment.
fn layout(
    variant: FatVariant,
    table_end: u64,
    keep: &[Slice<'_>],
) -> Result<Vec<SliceDescriptor>, WriteError> {
    let mut cursor = table_end;
    let mut descriptors = Vec::with_capacity(keep.len());

    for (index, slice) in keep.iter().enumerate() {
        let source = slice.descriptor();
        let overflow = |offset| WriteError::OffsetOverflow { index, offset };

        let offset = align_up(cursor, source.alignment()).ok_or(overflow(cursor))?;
        let end = offset.checked_add(source.size).ok_or(overflow(offset))?;
        if end > variant.max_addressable() {
            return Err(overflow(offset));
        }

        log::debug!(
            "slice {index} ({}): {:#x} -> {offset:#x}, {} bytes of padding",
            source.arch(),
            source.offset,
            offset - cursor
        );

        descriptors.push(SliceDescriptor { offset, ..*source });
        cursor = end;
    }

    Ok(descriptors)
}

fn align_up(value: u64, alignment: u64) -> Option<u64> {
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask)
}
