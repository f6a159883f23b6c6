use std::any::{type_name, Any};
use std::sync::{Arc, Barrier, Mutex, PoisonError};
use std::thread;

use log::debug;

use crate::error::{DistributionError, Result};
use crate::mpi::group::{check_counts, Element, ProcessGroup};

/// The trivial group of a single participant.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfGroup;

impl ProcessGroup for SelfGroup {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast_bytes(&self, _data: &mut Vec<u8>, root: usize) -> Result<()> {
        if root != 0 {
            return Err(DistributionError::invalid(
                "root",
                format!("must be 0 in a group of size 1, got {root}"),
            ));
        }
        Ok(())
    }

    fn all_gather_varcount<T: Element>(&self, local: &[T], counts: &[usize]) -> Result<Vec<T>> {
        check_counts(counts, 1, 0, local.len())?;
        Ok(local.to_vec())
    }

    fn abort(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}

/// What a rank deposits at the rendezvous for one collective call.
struct Contribution {
    counts: Vec<usize>,
    element: &'static str,
    data: Box<dyn Any + Send + Sync>,
}

/// State shared by all ranks of a [`ThreadGroup`].
struct Rendezvous {
    barrier: Barrier,
    slots: Mutex<Vec<Option<Contribution>>>,
}

/// A group of `size` participants living as threads of the current process.
///
/// Each participant holds its own handle; collectives rendezvous through
/// shared slots guarded by a barrier, so they block exactly like their MPI
/// counterparts.
pub struct ThreadGroup {
    rank: usize,
    size: usize,
    shared: Arc<Rendezvous>,
}

impl ThreadGroup {
    /// Creates the handles of all `size` participants, indexed by rank.
    pub fn create(size: usize) -> Result<Vec<Self>> {
        if size == 0 {
            return Err(DistributionError::invalid("size", "must be at least 1"));
        }
        let shared = Arc::new(Rendezvous {
            barrier: Barrier::new(size),
            slots: Mutex::new((0..size).map(|_| None).collect()),
        });
        Ok((0..size)
            .map(|rank| Self {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect())
    }

    /// Runs `f` once per participant, each on its own thread, and returns the
    /// results ordered by rank. A panic on any rank is propagated.
    pub fn run<F, R>(size: usize, f: F) -> Result<Vec<R>>
    where
        F: Fn(ThreadGroup) -> R + Sync,
        R: Send,
    {
        let groups = Self::create(size)?;
        let f = &f;
        let results = thread::scope(|scope| {
            let handles = groups
                .into_iter()
                .map(|group| scope.spawn(move || f(group)))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        });
        Ok(results)
    }

    /// Deposits this rank's contribution, waits for all ranks, lets `read`
    /// inspect every contribution and waits again so slots are not overwritten
    /// while a peer is still reading.
    fn exchange<R>(
        &self,
        contribution: Contribution,
        read: impl FnOnce(&[Option<Contribution>]) -> Result<R>,
    ) -> Result<R> {
        self.slots()[self.rank] = Some(contribution);
        self.shared.barrier.wait();
        let result = read(self.slots().as_slice());
        self.shared.barrier.wait();
        result
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Vec<Option<Contribution>>> {
        self.shared
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessGroup for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast_bytes(&self, data: &mut Vec<u8>, root: usize) -> Result<()> {
        if root >= self.size {
            return Err(DistributionError::invalid(
                "root",
                format!("must be below the group size {}, got {root}", self.size),
            ));
        }
        let contribution = Contribution {
            counts: Vec::new(),
            element: type_name::<u8>(),
            data: Box::new(if self.rank == root {
                data.clone()
            } else {
                Vec::<u8>::new()
            }),
        };
        let received = self.exchange(contribution, |slots| {
            slots[root]
                .as_ref()
                .and_then(|c| c.data.downcast_ref::<Vec<u8>>())
                .cloned()
                .ok_or_else(|| {
                    DistributionError::CollectiveMismatch(format!(
                        "rank {root} did not take part in the broadcast"
                    ))
                })
        })?;
        if self.rank != root {
            *data = received;
        }
        Ok(())
    }

    fn all_gather_varcount<T: Element>(&self, local: &[T], counts: &[usize]) -> Result<Vec<T>> {
        // A local error must not skip the rendezvous, peers would block forever.
        let local_check = check_counts(counts, self.size, self.rank, local.len());
        let contribution = Contribution {
            counts: counts.to_vec(),
            element: type_name::<T>(),
            data: Box::new(local.to_vec()),
        };
        debug!(rank = self.rank, elements = local.len(); "Entering variable all-gather");
        let gathered = self.exchange(contribution, |slots| {
            if counts.len() != slots.len() {
                return Err(DistributionError::CollectiveMismatch(format!(
                    "got {} element counts for a group of size {}",
                    counts.len(),
                    slots.len()
                )));
            }
            let mut gathered = Vec::with_capacity(counts.iter().sum());
            for (peer, slot) in slots.iter().enumerate() {
                let Some(contribution) = slot else {
                    return Err(DistributionError::CollectiveMismatch(format!(
                        "rank {peer} did not take part in the gather"
                    )));
                };
                if contribution.counts != counts {
                    return Err(DistributionError::CollectiveMismatch(format!(
                        "rank {peer} declared counts {:?}, rank {} declared {counts:?}",
                        contribution.counts, self.rank
                    )));
                }
                let Some(data) = contribution.data.downcast_ref::<Vec<T>>() else {
                    return Err(DistributionError::CollectiveMismatch(format!(
                        "rank {peer} contributed elements of type {}, expected {}",
                        contribution.element,
                        type_name::<T>()
                    )));
                };
                if data.len() != counts[peer] {
                    return Err(DistributionError::CollectiveMismatch(format!(
                        "rank {peer} contributed {} elements, expected {}",
                        data.len(),
                        counts[peer]
                    )));
                }
                gathered.extend_from_slice(data);
            }
            Ok(gathered)
        });
        local_check?;
        gathered
    }

    fn abort(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_group_gather_returns_local() {
        let gathered = SelfGroup.all_gather_varcount(&[1.0, 2.0], &[2]).unwrap();
        assert_eq!(gathered, vec![1.0, 2.0]);
    }

    #[test]
    fn test_self_group_rejects_foreign_root() {
        let mut data = vec![1u8];
        assert!(SelfGroup.broadcast_bytes(&mut data, 1).is_err());
    }

    #[test]
    fn test_thread_group_rejects_empty() {
        assert!(ThreadGroup::create(0).is_err());
    }

    #[test]
    fn test_thread_group_gather_varcount() {
        let results = ThreadGroup::run(3, |group| {
            let counts = [1, 0, 2];
            let local: Vec<i32> = match group.rank() {
                0 => vec![10],
                1 => vec![],
                _ => vec![20, 30],
            };
            group.all_gather_varcount(&local, &counts).unwrap()
        })
        .unwrap();
        for gathered in results {
            assert_eq!(gathered, vec![10, 20, 30]);
        }
    }

    #[test]
    fn test_thread_group_broadcast() {
        let results = ThreadGroup::run(4, |group| {
            let mut data = if group.rank() == 2 {
                b"hello".to_vec()
            } else {
                Vec::new()
            };
            group.broadcast_bytes(&mut data, 2).unwrap();
            data
        })
        .unwrap();
        assert!(results.iter().all(|data| data == b"hello"));
    }

    #[test]
    fn test_thread_group_detects_type_mismatch() {
        let results = ThreadGroup::run(2, |group| {
            if group.rank() == 0 {
                group.all_gather(&[1.0f64]).map(|_| ())
            } else {
                group.all_gather(&[1i64]).map(|_| ())
            }
        })
        .unwrap();
        for result in results {
            assert!(matches!(
                result,
                Err(DistributionError::CollectiveMismatch(_))
            ));
        }
    }

    #[test]
    fn test_thread_group_detects_count_disagreement() {
        let results = ThreadGroup::run(2, |group| {
            let counts = if group.rank() == 0 { [1, 1] } else { [1, 2] };
            let local = vec![0u32; counts[group.rank()]];
            group.all_gather_varcount(&local, &counts)
        })
        .unwrap();
        assert!(results.iter().all(Result::is_err));
    }

    #[test]
    fn test_thread_group_repeated_collectives() {
        let results = ThreadGroup::run(3, |group| {
            (0..10)
                .map(|round| {
                    let value = (round * 10 + group.rank()) as u64;
                    group.all_gather(&[value]).unwrap()
                })
                .collect::<Vec<_>>()
        })
        .unwrap();
        for rounds in results {
            for (round, gathered) in rounds.into_iter().enumerate() {
                let round = round as u64;
                assert_eq!(gathered, vec![round * 10, round * 10 + 1, round * 10 + 2]);
            }
        }
    }
}
