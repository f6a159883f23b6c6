use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{DistributionError, Result};
use crate::mpi::group::ProcessGroup;

/// Serializes data to a byte array.
pub(crate) fn serialize<S>(value: &S) -> Result<Vec<u8>>
where
    S: Serialize,
{
    Ok(bincode::serialize(value)?)
}

/// Deserializes data from a byte array.
pub(crate) fn deserialize<D>(data: &[u8]) -> Result<D>
where
    D: DeserializeOwned,
{
    Ok(bincode::deserialize(data)?)
}

/// Broadcasts a value from `root` by serializing it and sending it as byte array.
/// For the receivers, `data` is ignored and can just be a default value.
///
/// Typical use is handing a configuration parsed on the root to every rank
/// before constructing a [`TaskDistributor`](crate::TaskDistributor).
pub fn broadcast_serializing<T, G>(data: T, group: &G, root: usize) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    G: ProcessGroup,
{
    let is_root = group.rank() == root;
    let mut raw_value = if is_root {
        serialize(&data)?
    } else {
        Vec::new()
    };

    group.broadcast_bytes(&mut raw_value, root)?;
    debug!(root, bytes = raw_value.len(); "Received broadcasted value");

    if is_root {
        Ok(data)
    } else {
        deserialize(&raw_value)
    }
}

/// Runs `produce` on `root` and broadcasts its outcome to every rank.
///
/// Unlike [`broadcast_serializing`], a failure on the root is broadcast as
/// well, so the receivers return a [`DistributionError::CollectiveMismatch`]
/// instead of waiting for a value that never comes. The root returns the
/// error of `produce` itself. `produce` is only called on the root.
pub fn broadcast_root_result<T, G, F>(group: &G, root: usize, produce: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    G: ProcessGroup,
    F: FnOnce() -> Result<T>,
{
    if group.rank() == root {
        // Every outcome is broadcast, receivers must not be left waiting
        let (mut raw_value, produced) =
            match produce().and_then(|value| Ok((serialize(&Some(&value))?, value))) {
                Ok((raw_value, value)) => (raw_value, Ok(value)),
                Err(e) => {
                    error!("Rank {root} failed before broadcasting: {e}");
                    (serialize(&None::<&T>)?, Err(e))
                }
            };
        group.broadcast_bytes(&mut raw_value, root)?;
        produced
    } else {
        let mut raw_value = Vec::new();
        group.broadcast_bytes(&mut raw_value, root)?;
        debug!(root, bytes = raw_value.len(); "Received broadcasted result");
        deserialize::<Option<T>>(&raw_value)?.ok_or_else(|| {
            DistributionError::CollectiveMismatch(format!(
                "rank {root} failed before broadcasting"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::mpi::{SelfGroup, ThreadGroup};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Grid {
        name: String,
        points: Vec<(i64, f64)>,
    }

    #[test]
    fn test_broadcast_serializing_self() {
        let grid = Grid {
            name: "iw".into(),
            points: vec![(-1, 0.5), (0, 1.5)],
        };
        let received = broadcast_serializing(grid.clone(), &SelfGroup, 0).unwrap();
        assert_eq!(received, grid);
    }

    #[test]
    fn test_broadcast_serializing_threads() {
        let reference = Grid {
            name: "k-mesh".into(),
            points: (0..8).map(|i| (i, i as f64 * 0.25)).collect(),
        };
        let results = ThreadGroup::run(3, |group| {
            let data = if group.rank() == 1 {
                reference.clone()
            } else {
                Grid::default()
            };
            broadcast_serializing(data, &group, 1).unwrap()
        })
        .unwrap();
        assert!(results.iter().all(|grid| *grid == reference));
    }

    #[test]
    fn test_broadcast_root_result_success() {
        let results = ThreadGroup::run(3, |group| {
            broadcast_root_result(&group, 0, || Ok((String::from("iw"), 11i64))).unwrap()
        })
        .unwrap();
        assert!(results
            .iter()
            .all(|(name, niw)| name == "iw" && *niw == 11));
    }

    #[test]
    fn test_broadcast_root_result_failure_reaches_all_ranks() {
        let results = ThreadGroup::run(4, |group| {
            broadcast_root_result::<i64, _, _>(&group, 2, || {
                Err(DistributionError::invalid("niw", "must be an integer"))
            })
        })
        .unwrap();
        for (rank, result) in results.into_iter().enumerate() {
            if rank == 2 {
                assert!(matches!(
                    result,
                    Err(DistributionError::InvalidConfiguration { ref parameter, .. })
                        if parameter == "niw"
                ));
            } else {
                assert!(matches!(
                    result,
                    Err(DistributionError::CollectiveMismatch(_))
                ));
            }
        }
    }

    #[test]
    fn test_broadcast_root_result_only_root_produces() {
        let results = ThreadGroup::run(3, |group| {
            let rank = group.rank();
            broadcast_root_result(&group, 0, move || {
                assert_eq!(rank, 0);
                Ok(vec![1u8, 2, 3])
            })
            .unwrap()
        })
        .unwrap();
        assert!(results.iter().all(|data| *data == [1, 2, 3]));
    }
}
