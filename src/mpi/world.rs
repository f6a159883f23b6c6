use log::debug;
use mpi::datatype::PartitionMut;
use mpi::topology::Process;
use mpi::traits::{BufferMut, Communicator, CommunicatorCollectives, Root};
use mpi::{Count, Rank};

use crate::error::{DistributionError, Result};
use crate::mpi::group::{check_counts, Element, ProcessGroup};

/// A [`ProcessGroup`] backed by an MPI communicator, e.g., the world
/// communicator of an initialized universe.
#[derive(Debug)]
pub struct MpiGroup<C> {
    comm: C,
}

impl<C> MpiGroup<C>
where
    C: Communicator,
{
    pub fn new(comm: C) -> Self {
        Self { comm }
    }

    /// The wrapped communicator.
    pub fn communicator(&self) -> &C {
        &self.comm
    }

    fn root(&self, root: usize) -> Result<Process<'_>> {
        if root >= self.size() {
            return Err(DistributionError::invalid(
                "root",
                format!("must be below the group size {}, got {root}", self.size()),
            ));
        }
        Ok(self.comm.process_at_rank(root as Rank))
    }
}

/// Broadcasts a vector of `data` from `root` to all processes. For the receivers,
/// `data` can just be an empty vector.
fn broadcast_vec<T>(data: &mut Vec<T>, root: &Process)
where
    T: Clone + Default,
    Vec<T>: BufferMut,
{
    // Broadcast length
    let mut len = if root.is_self() { data.len() } else { 0 };
    root.broadcast_into(&mut len);

    // Broadcast data
    if !root.is_self() {
        data.resize(len, Default::default());
    }
    root.broadcast_into(data);
}

/// Converts element counts into MPI counts and the matching displacements.
fn counts_and_displacements(counts: &[usize]) -> Result<(Vec<Count>, Vec<Count>)> {
    let counts = counts
        .iter()
        .enumerate()
        .map(|(rank, &count)| {
            Count::try_from(count).map_err(|_| DistributionError::CountOverflow {
                rank,
                count: count as u128,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut offset: Count = 0;
    let mut displacements = Vec::with_capacity(counts.len());
    for (rank, &count) in counts.iter().enumerate() {
        displacements.push(offset);
        offset = offset
            .checked_add(count)
            .ok_or(DistributionError::CountOverflow {
                rank,
                count: count as u128,
            })?;
    }
    Ok((counts, displacements))
}

impl<C> ProcessGroup for MpiGroup<C>
where
    C: Communicator,
{
    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn broadcast_bytes(&self, data: &mut Vec<u8>, root: usize) -> Result<()> {
        let root = self.root(root)?;
        broadcast_vec(data, &root);
        Ok(())
    }

    fn all_gather_varcount<T: Element>(&self, local: &[T], counts: &[usize]) -> Result<Vec<T>> {
        check_counts(counts, self.size(), self.rank(), local.len())?;
        let (mpi_counts, displacements) = counts_and_displacements(counts)?;

        let mut gathered = vec![T::default(); counts.iter().sum()];
        debug!(rank = self.rank(), elements = local.len(); "Entering variable all-gather");
        {
            let mut partition =
                PartitionMut::new(&mut gathered[..], &mpi_counts[..], &displacements[..]);
            self.comm.all_gather_varcount_into(local, &mut partition);
        }
        Ok(gathered)
    }

    fn abort(&self, code: i32) -> ! {
        self.comm.abort(code)
    }
}
