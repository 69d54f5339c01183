//! Error types for universal binary trimming.
//!
//! Each stage of the pipeline has its own error enum so callers can tell a
//! malformed input ([`FormatError`]) from a bad request ([`SelectionError`])
//! or an internal defect ([`WriteError`], [`VerificationError`]). The umbrella
//! [`enum@Error`] collects them together with the file I/O failures of
//! [`crate::commit`].

use std::path::PathBuf;

use thiserror::Error;

use crate::arch::ArchitectureId;

/// Why a single descriptor was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceDefect {
    /// The slice has a length of zero.
    Empty,
    /// The alignment exponent exceeds [`crate::header::MAX_ALIGN`].
    AlignmentTooLarge { align: u32 },
    /// `offset` is not a multiple of `2^align`.
    Misaligned { offset: u64, align: u32 },
    /// The slice starts inside the header or descriptor table.
    OverlapsHeader { offset: u64, table_end: u64 },
    /// `offset + size` runs past the end of the file.
    OutOfBounds { offset: u64, size: u64, file_len: u64 },
}

impl std::fmt::Display for SliceDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SliceDefect::Empty => write!(f, "slice is empty"),
            SliceDefect::AlignmentTooLarge { align } => {
                write!(f, "alignment 2^{align} exceeds the maximum of 2^{}", crate::header::MAX_ALIGN)
            }
            SliceDefect::Misaligned { offset, align } => {
                write!(f, "offset {offset:#x} is not aligned to 2^{align} ({} bytes)", 1u64 << align)
            }
            SliceDefect::OverlapsHeader { offset, table_end } => write!(
                f,
                "offset {offset:#x} lies inside the header and descriptor table (ends at {table_end:#x})"
            ),
            SliceDefect::OutOfBounds { offset, size, file_len } => write!(
                f,
                "range {offset:#x}..{:#x} extends beyond end of file ({file_len:#x})",
                offset.saturating_add(size)
            ),
        }
    }
}

/// The input is not a structurally valid universal binary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("not a universal binary: bad magic {magic:#010x}")]
    BadMagic { magic: u32 },

    #[error("file truncated: need {needed} bytes for the header and descriptor table, found {actual}")]
    Truncated { needed: u64, actual: u64 },

    #[error("universal binary declares no slices")]
    NoSlices,

    #[error("invalid slice at index {index}: {reason}")]
    InvalidSlice { index: usize, reason: SliceDefect },

    #[error("slices at index {i} and {j} overlap")]
    OverlappingSlices { i: usize, j: usize },
}

/// The removal request cannot be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("architecture {id} not found in universal binary")]
    ArchitectureNotFound { id: ArchitectureId },

    #[error("refusing to remove every slice; at least one architecture must remain")]
    WouldRemoveLastSlice,
}

/// The writer could not lay out the keep-set.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("no slices to write")]
    EmptyKeepSet,

    #[error("slice {index} would be placed at offset {offset:#x}, beyond what the descriptor table can address")]
    OffsetOverflow { index: usize, offset: u64 },

    #[error("failed to encode descriptor table: {0}")]
    Encode(#[from] std::io::Error),
}

/// Freshly written output failed the structural re-check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("written output is invalid: {reason}")]
    OutputInvalid { reason: String },
}

impl VerificationError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        VerificationError::OutputInvalid {
            reason: reason.into(),
        }
    }
}

/// Placing verified output at its destination failed.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("failed to create temporary file in '{dir}': {source}")]
    TempFile {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write temporary output for '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to copy permissions from '{path}': {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to copy owner and group from '{path}': {source}")]
    Ownership {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move output into place at '{path}': {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Any failure of the trim pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Commit(#[from] CommitError),
}

impl Error {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Format(_) => 2,
            Error::Selection(SelectionError::ArchitectureNotFound { .. }) => 3,
            Error::Selection(SelectionError::WouldRemoveLastSlice) => 4,
            Error::Write(_) | Error::Verification(_) => 5,
            Error::Read { .. } | Error::Commit(_) => 6,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
