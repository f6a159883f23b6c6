//! Balanced distribution of independent tasks over the ranks of a process group,
//! and the ordered all-gather that reassembles per-rank partial results.
//!
//! ```
//! # use taskdist::{mpi::SelfGroup, TaskDistributor};
//! # use ndarray::Array1;
//! let group = SelfGroup;
//! let distributor = TaskDistributor::new(5, &group).unwrap();
//! let local = Array1::from_iter(distributor.local_range().map(|i| i as f64));
//! let gathered = distributor.allgather(&local).unwrap();
//! assert_eq!(gathered.len(), 5);
//! ```

pub mod config;
pub mod distributor;
pub mod error;
pub mod logging;
pub mod mpi;

pub use distributor::{distribute_tasks, task_ranges, TaskDistributor};
pub use error::{DistributionError, Result};
