use crate::arch::ArchitectureId;
use crate::binary::{Slice, UniversalBinary};
use crate::error::SelectionError;

/// What to do when a requested architecture is not in the binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Fail the whole request with [`SelectionError::ArchitectureNotFound`].
    #[default]
    Strict,
    /// Log a warning and ignore that target.
    Lenient,
}

/// Computes the keep-set: every slice not matched by any of `targets`, in
/// the binary's original order.
pub fn remove<'a>(
    binary: &UniversalBinary<'a>,
    targets: &[ArchitectureId],
    policy: MissingPolicy,
) -> Result<Vec<Slice<'a>>, SelectionError> {
    for &id in targets {
        if binary.slices().iter().any(|s| id.matches(s.descriptor())) {
            continue;
        }
        match policy {
            MissingPolicy::Strict => return Err(SelectionError::ArchitectureNotFound { id }),
            MissingPolicy::Lenient => {
                log::warn!("Architecture {id} not present; nothing to remove for it")
            }
        }
    }

    let keep: Vec<Slice<'a>> = binary
        .slices()
        .iter()
        .filter(|s| !targets.iter().any(|id| id.matches(s.descriptor())))
        .copied()
        .collect();

    if keep.is_empty() {
        return Err(SelectionError::WouldRemoveLastSlice);
    }

    log::info!(
        "Keeping {} of {} slices",
        keep.len(),
        binary.slices().len()
    );
    Ok(keep)
}
