//! The removal pipeline: parse, select, write, verify, and optionally commit.
//!
//! Stages run strictly in that order and any error aborts the run; output
//! bytes are only returned, or written to disk, after verification passes.

use crate::arch::ArchitectureId;
use crate::binary::UniversalBinary;
use crate::commit::commit;
use crate::error::{Error, Result};
use crate::selector::{remove, MissingPolicy};
use crate::verify::verify;
use crate::writer::{write, Output, SingleSlicePolicy};
use std::path::Path;

/// Which architectures to remove and how strictly.
#[derive(Debug, Clone, Default)]
pub struct TrimRequest {
    pub targets: Vec<ArchitectureId>,
    pub missing: MissingPolicy,
    pub single: SingleSlicePolicy,
}

impl TrimRequest {
    pub fn new(targets: impl IntoIterator<Item = ArchitectureId>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn lenient(mut self) -> Self {
        self.missing = MissingPolicy::Lenient;
        self
    }

    pub fn keep_wrapped(mut self) -> Self {
        self.single = SingleSlicePolicy::KeepWrapped;
        self
    }
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimReport {
    /// Architectures of the slices that were dropped, in source order.
    pub removed: Vec<ArchitectureId>,
    /// Architectures of the slices that remain, in output order.
    pub kept: Vec<ArchitectureId>,
    /// `false` when the output is a bare single-architecture binary.
    pub wrapped: bool,
    pub input_len: u64,
    pub output_len: u64,
}

impl TrimReport {
    pub fn saved(&self) -> u64 {
        self.input_len.saturating_sub(self.output_len)
    }

    /// Nothing matched; the output is a plain re-emission of the input.
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Verified output of [`trim`].
#[derive(Debug, Clone)]
pub struct Trimmed {
    pub output: Output,
    pub report: TrimReport,
}

/// Removes the requested architectures from the universal binary in `bytes`.
pub fn trim(bytes: &[u8], request: &TrimRequest) -> Result<Trimmed> {
    let binary = UniversalBinary::parse(bytes)?;
    let keep = remove(&binary, &request.targets, request.missing)?;

    // With nothing removed the container keeps its shape, even with one slice.
    let single = if keep.len() == binary.slices().len() {
        SingleSlicePolicy::KeepWrapped
    } else {
        request.single
    };
    let output = write(binary.variant(), &keep, single)?;
    verify(&output)?;

    let removed = binary
        .slices()
        .iter()
        .filter(|s| !keep.iter().any(|k| k.index() == s.index()))
        .map(|s| s.arch())
        .collect();

    let report = TrimReport {
        removed,
        kept: keep.iter().map(|s| s.arch()).collect(),
        wrapped: output.is_wrapped(),
        input_len: bytes.len() as u64,
        output_len: output.len() as u64,
    };
    Ok(Trimmed { output, report })
}

/// Trims the file at `input` and writes the result to `output`, or back over
/// `input` when `output` is `None`.
///
/// With `dry_run` the pipeline still runs and verifies but nothing is written.
/// A run that removes nothing leaves the file alone.
pub fn trim_file(
    input: &Path,
    output: Option<&Path>,
    request: &TrimRequest,
    dry_run: bool,
) -> Result<TrimReport> {
    let bytes = std::fs::read(input).map_err(|source| Error::Read {
        path: input.to_path_buf(),
        source,
    })?;

    let Trimmed { output: out, report } = trim(&bytes, request)?;
    let destination = output.unwrap_or(input);

    if dry_run {
        log::info!("Dry run; not writing {}", destination.display());
    } else if report.is_noop() && destination == input {
        log::info!("Nothing removed from {}; leaving it unchanged", input.display());
    } else {
        commit(out.bytes(), destination, Some(input))?;
    }

    Ok(report)
}
