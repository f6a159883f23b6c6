use crate::error::{DistributionError, Result};

/// Plain data that can travel through a collective call.
#[cfg(feature = "mpi")]
pub trait Element: mpi::traits::Equivalence + Copy + Default + Send + Sync + 'static {}

#[cfg(feature = "mpi")]
impl<T> Element for T where T: mpi::traits::Equivalence + Copy + Default + Send + Sync + 'static {}

/// Plain data that can travel through a collective call.
#[cfg(not(feature = "mpi"))]
pub trait Element: Copy + Default + Send + Sync + 'static {}

#[cfg(not(feature = "mpi"))]
impl<T> Element for T where T: Copy + Default + Send + Sync + 'static {}

/// A fixed group of cooperating participants.
///
/// Rank and size are stable for the lifetime of the group. Collective methods
/// must be called by every participant in the same order; a participant that
/// never arrives leaves the others blocked.
pub trait ProcessGroup {
    /// The 0-based index of this participant.
    fn rank(&self) -> usize;

    /// The number of participants, at least one for any usable group.
    fn size(&self) -> usize;

    /// Broadcasts `data` from `root` to all participants. On receivers the
    /// buffer is replaced by the root's bytes.
    fn broadcast_bytes(&self, data: &mut Vec<u8>, root: usize) -> Result<()>;

    /// Concatenates the `local` buffers of all participants in rank order.
    ///
    /// `counts[i]` is the number of elements contributed by rank `i`, so
    /// `local.len()` must equal `counts[self.rank()]` and the result has
    /// `counts.iter().sum()` elements.
    fn all_gather_varcount<T: Element>(&self, local: &[T], counts: &[usize]) -> Result<Vec<T>>;

    /// Terminates every participant of the group.
    fn abort(&self, code: i32) -> !;

    /// Gathers a fixed number of elements from every participant.
    fn all_gather<T: Element>(&self, local: &[T]) -> Result<Vec<T>> {
        let counts = vec![local.len(); self.size()];
        self.all_gather_varcount(local, &counts)
    }
}

/// Checks that the declared per-rank `counts` are usable by `rank` for a local
/// buffer of `local_len` elements.
pub(crate) fn check_counts(
    counts: &[usize],
    size: usize,
    rank: usize,
    local_len: usize,
) -> Result<()> {
    if counts.len() != size {
        return Err(DistributionError::CollectiveMismatch(format!(
            "got {} element counts for a group of size {size}",
            counts.len()
        )));
    }
    if counts[rank] != local_len {
        return Err(DistributionError::CollectiveMismatch(format!(
            "rank {rank} declared {} elements but contributes {local_len}",
            counts[rank]
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_counts() {
        assert!(check_counts(&[2, 3], 2, 1, 3).is_ok());
        assert!(matches!(
            check_counts(&[2, 3], 3, 1, 3),
            Err(DistributionError::CollectiveMismatch(_))
        ));
        assert!(matches!(
            check_counts(&[2, 3], 2, 0, 3),
            Err(DistributionError::CollectiveMismatch(_))
        ));
    }
}
