//! Process-group plumbing, i.e., the collective communication the task
//! distributor relies on, with backends for MPI and for in-process ranks.

mod group;
mod local;
pub mod serialization;
#[cfg(feature = "mpi")]
pub mod testing;
#[cfg(feature = "mpi")]
mod world;

pub use group::{Element, ProcessGroup};
pub use local::{SelfGroup, ThreadGroup};
pub use serialization::{broadcast_root_result, broadcast_serializing};
#[cfg(feature = "mpi")]
pub use world::MpiGroup;
