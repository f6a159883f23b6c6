//! Balanced partitioning of tasks over the ranks of a process group.

use std::borrow::Cow;
use std::ops::Range;

use itertools::Itertools;
use log::debug;
use ndarray::{Array, ArrayBase, ArrayView, Axis, Data, Dimension, Slice};

use crate::config::GatherConfig;
use crate::error::{DistributionError, Result};
use crate::mpi::{Element, ProcessGroup};

/// Splits `total_tasks` tasks over `size` ranks as evenly as possible.
///
/// Every rank gets `total_tasks / size` tasks, and the last
/// `total_tasks % size` ranks get one more. This is a pure function of its
/// arguments, so every rank can compute the full partition on its own.
///
/// # Examples
/// ```
/// # use taskdist::distribute_tasks;
/// assert_eq!(distribute_tasks(11, 4), vec![2, 3, 3, 3]);
/// assert_eq!(distribute_tasks(3, 5), vec![0, 0, 1, 1, 1]);
/// ```
///
/// # Panics
/// Panics if `size` is zero.
#[must_use]
pub fn distribute_tasks(total_tasks: usize, size: usize) -> Vec<usize> {
    assert!(size > 0, "cannot distribute tasks over an empty group");
    let per_rank = total_tasks / size;
    let excess = total_tasks - per_rank * size;

    let mut sizes = vec![per_rank; size];
    for count in &mut sizes[size - excess..] {
        *count += 1;
    }
    sizes
}

/// Turns per-rank task counts into contiguous half-open task ranges.
#[must_use]
pub fn task_ranges(sizes: &[usize]) -> Vec<Range<usize>> {
    sizes
        .iter()
        .scan(0, |end, &size| {
            *end += size;
            Some(*end - size..*end)
        })
        .collect()
}

/// Distributes a fixed number of tasks over the ranks of a [`ProcessGroup`] and
/// gathers the per-rank results back in global task order.
///
/// The partition is computed once on construction and never changes. The group
/// is borrowed, so any number of distributors can share it.
#[derive(Debug)]
pub struct TaskDistributor<'g, G> {
    group: &'g G,
    total_tasks: usize,
    rank: usize,
    sizes: Vec<usize>,
    ranges: Vec<Range<usize>>,
}

impl<'g, G> TaskDistributor<'g, G>
where
    G: ProcessGroup,
{
    /// Partitions `total_tasks` tasks over the ranks of `group`.
    ///
    /// # Errors
    /// Fails with [`DistributionError::InvalidConfiguration`] if the group is
    /// empty or reports a rank outside of `0..size`.
    pub fn new(total_tasks: usize, group: &'g G) -> Result<Self> {
        let size = group.size();
        let rank = group.rank();
        if size == 0 {
            return Err(DistributionError::invalid(
                "group",
                "must have at least one rank",
            ));
        }
        if rank >= size {
            return Err(DistributionError::invalid(
                "group",
                format!("reports rank {rank} in a group of size {size}"),
            ));
        }

        let sizes = distribute_tasks(total_tasks, size);
        let ranges = task_ranges(&sizes);
        let local_start = ranges[rank].start;
        let local_end = ranges[rank].end;
        debug!(rank, size, total_tasks, local_start, local_end; "Distributed tasks");

        Ok(Self {
            group,
            total_tasks,
            rank,
            sizes,
            ranges,
        })
    }

    /// Like [`TaskDistributor::new`], for task counts coming from signed sources.
    ///
    /// # Errors
    /// Additionally fails with [`DistributionError::InvalidConfiguration`] if
    /// `total_tasks` is negative.
    pub fn from_signed(total_tasks: i64, group: &'g G) -> Result<Self> {
        let total_tasks = usize::try_from(total_tasks).map_err(|_| {
            DistributionError::invalid(
                "total_tasks",
                format!("must not be negative, got {total_tasks}"),
            )
        })?;
        Self::new(total_tasks, group)
    }

    #[inline]
    pub fn total_tasks(&self) -> usize {
        self.total_tasks
    }

    #[inline]
    pub fn group(&self) -> &'g G {
        self.group
    }

    /// The number of tasks assigned to each rank.
    #[inline]
    pub fn per_rank_sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// The task range of each rank.
    #[inline]
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.sizes.len()
    }

    /// The number of tasks this rank owns.
    #[inline]
    pub fn local_size(&self) -> usize {
        self.sizes[self.rank]
    }

    /// The tasks this rank owns.
    #[inline]
    pub fn local_range(&self) -> Range<usize> {
        self.ranges[self.rank].clone()
    }

    /// The number of elements each rank contributes to a gather whose rows
    /// hold `row_len` elements each.
    pub fn gather_counts(&self, row_len: usize) -> Result<Vec<usize>> {
        self.sizes
            .iter()
            .enumerate()
            .map(|(rank, &size)| {
                size.checked_mul(row_len)
                    .ok_or(DistributionError::CountOverflow {
                        rank,
                        count: size as u128 * row_len as u128,
                    })
            })
            .collect()
    }

    /// Selects the rows of `global` this rank owns, for arrays whose leading
    /// axis runs over all tasks.
    pub fn local_rows<'a, S, A, D>(&self, global: &'a ArrayBase<S, D>) -> Result<ArrayView<'a, A, D>>
    where
        S: Data<Elem = A>,
        D: Dimension,
    {
        let rows = leading_len(global)?;
        if rows != self.total_tasks {
            return Err(DistributionError::ShapeMismatch {
                expected: self.total_tasks,
                actual: rows,
            });
        }
        Ok(global.slice_axis(Axis(0), Slice::from(self.local_range())))
    }

    /// Gathers the results of all ranks into one array ordered by task.
    ///
    /// `local` holds one row per local task. The trailing shape and element type
    /// must agree on all ranks. This is a collective call: every rank has to
    /// call it, in the same order relative to other collectives.
    ///
    /// # Errors
    /// Fails with [`DistributionError::ShapeMismatch`] before communicating if
    /// the leading dimension of `local` is not [`local_size`](Self::local_size).
    /// Disagreements between ranks surface as reported by the group.
    pub fn allgather<S, A, D>(&self, local: &ArrayBase<S, D>) -> Result<Array<A, D>>
    where
        S: Data<Elem = A>,
        A: Element,
        D: Dimension,
    {
        let row_len = self.check_local(local)?;
        self.gather_rows(local, row_len)
    }

    /// Like [`allgather`](Self::allgather), but first compares the trailing
    /// shape and element size of all ranks, so that a mismatch fails on every
    /// rank with a descriptive error instead of in the communication layer.
    pub fn allgather_validated<S, A, D>(&self, local: &ArrayBase<S, D>) -> Result<Array<A, D>>
    where
        S: Data<Elem = A>,
        A: Element,
        D: Dimension,
    {
        let row_len = self.check_local(local)?;
        self.check_trailing_shapes::<A>(&local.shape()[1..])?;
        self.gather_rows(local, row_len)
    }

    /// Gathers with or without the shape handshake, as chosen by `config`.
    pub fn allgather_with<S, A, D>(
        &self,
        local: &ArrayBase<S, D>,
        config: &GatherConfig,
    ) -> Result<Array<A, D>>
    where
        S: Data<Elem = A>,
        A: Element,
        D: Dimension,
    {
        if config.validate_shapes {
            self.allgather_validated(local)
        } else {
            self.allgather(local)
        }
    }

    /// Checks the leading dimension of `local` and returns the number of
    /// elements per row.
    fn check_local<S, A, D>(&self, local: &ArrayBase<S, D>) -> Result<usize>
    where
        S: Data<Elem = A>,
        D: Dimension,
    {
        let rows = leading_len(local)?;
        if rows != self.local_size() {
            return Err(DistributionError::ShapeMismatch {
                expected: self.local_size(),
                actual: rows,
            });
        }
        Ok(local.shape()[1..].iter().product())
    }

    /// Compares the number of trailing axes and the element size, then the
    /// trailing axes themselves, with all other ranks.
    fn check_trailing_shapes<A>(&self, trailing: &[usize]) -> Result<()> {
        let header = [trailing.len() as u64, std::mem::size_of::<A>() as u64];
        let headers = self.group.all_gather(&header)?;
        if !headers.chunks(header.len()).all_equal() {
            return Err(DistributionError::CollectiveMismatch(format!(
                "ranks disagree on (trailing axes, element size): {:?}",
                headers.chunks(header.len()).collect_vec()
            )));
        }

        let dims = trailing.iter().map(|&d| d as u64).collect_vec();
        let shapes = self.group.all_gather(&dims)?;
        if !dims.is_empty() && !shapes.chunks(dims.len()).all_equal() {
            return Err(DistributionError::CollectiveMismatch(format!(
                "ranks disagree on the trailing shape: {:?}",
                shapes.chunks(dims.len()).collect_vec()
            )));
        }
        Ok(())
    }

    fn gather_rows<S, A, D>(&self, local: &ArrayBase<S, D>, row_len: usize) -> Result<Array<A, D>>
    where
        S: Data<Elem = A>,
        A: Element,
        D: Dimension,
    {
        let counts = self.gather_counts(row_len)?;
        let flat = match local.as_slice() {
            Some(slice) => Cow::Borrowed(slice),
            None => Cow::Owned(local.iter().copied().collect_vec()),
        };

        debug!(rank = self.rank, rows = self.local_size(), row_len; "Gathering results");
        let gathered = self.group.all_gather_varcount(&flat, &counts)?;

        let mut dim = local.raw_dim();
        dim[0] = self.total_tasks;
        Array::from_shape_vec(dim, gathered).map_err(|e| {
            DistributionError::CollectiveMismatch(format!("gathered buffer does not fit: {e}"))
        })
    }
}

/// The length of the leading axis of `array`.
fn leading_len<S, D>(array: &ArrayBase<S, D>) -> Result<usize>
where
    S: Data,
    D: Dimension,
{
    array
        .shape()
        .first()
        .copied()
        .ok_or(DistributionError::MissingLeadingAxis)
}
