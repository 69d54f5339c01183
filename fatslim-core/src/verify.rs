//! Re-checks freshly written output before it is handed back to the caller.
//!
//! A failure here means the writer produced something it did not intend; it
//! is never caused by the input.

use crate::binary::UniversalBinary;
use crate::error::VerificationError;
use crate::probe::{is_archive, macho_arch};
use crate::writer::{Output, OutputKind};

pub fn verify(output: &Output) -> Result<(), VerificationError> {
    match output.kind() {
        OutputKind::Universal {
            variant,
            descriptors,
        } => {
            let parsed = UniversalBinary::parse(output.bytes()).map_err(|err| {
                VerificationError::invalid(format!("output does not parse: {err}"))
            })?;

            if parsed.variant() != *variant {
                return Err(VerificationError::invalid(format!(
                    "expected {} descriptor table, found {}",
                    variant.name(),
                    parsed.variant().name()
                )));
            }
            if parsed.slices().len() != descriptors.len() {
                return Err(VerificationError::invalid(format!(
                    "expected {} slices, found {}",
                    descriptors.len(),
                    parsed.slices().len()
                )));
            }

            for (index, (slice, intended)) in parsed.slices().iter().zip(descriptors).enumerate() {
                let actual = slice.descriptor();
                if actual != intended {
                    return Err(VerificationError::invalid(format!(
                        "slice {index}: expected {intended:?}, found {actual:?}"
                    )));
                }
                if actual.offset % actual.alignment() != 0 {
                    return Err(VerificationError::invalid(format!(
                        "slice {index}: offset {:#x} is not aligned to 2^{}",
                        actual.offset, actual.align
                    )));
                }
            }

            let end = descriptors.last().and_then(|d| d.end());
            if end != Some(output.len() as u64) {
                return Err(VerificationError::invalid(format!(
                    "output is {} bytes but the last slice ends at {end:?}",
                    output.len()
                )));
            }
        }

        OutputKind::Bare { descriptor } => {
            if output.len() as u64 != descriptor.size {
                return Err(VerificationError::invalid(format!(
                    "bare binary is {} bytes, expected {}",
                    output.len(),
                    descriptor.size
                )));
            }
            match macho_arch(output.bytes()) {
                Some(id) if id == descriptor.arch() => {}
                Some(id) => {
                    return Err(VerificationError::invalid(format!(
                        "bare binary is {id}, expected {}",
                        descriptor.arch()
                    )))
                }
                // Slices of a universal static library are archives, not Mach-O images.
                None if is_archive(output.bytes()) => {}
                None => {
                    return Err(VerificationError::invalid(
                        "bare binary does not start with a Mach-O magic",
                    ))
                }
            }
        }
    }

    log::debug!("Verified {} byte output", output.len());
    Ok(())
}
