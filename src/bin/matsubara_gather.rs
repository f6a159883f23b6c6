use std::env;

use log::info;
use ndarray::Array1;
use taskdist::config::RunConfig;
use taskdist::logging::setup_logging;
use taskdist::mpi::{broadcast_root_result, MpiGroup, ProcessGroup};
use taskdist::{DistributionError, TaskDistributor};

/// Number of positive bosonic Matsubara frequencies when none is given.
const DEFAULT_NIW: i64 = 11;

/// Reads `[niw] [config.json]` from the command line.
fn parse_arguments() -> taskdist::Result<(RunConfig, i64)> {
    let mut args = env::args().skip(1);
    let niw = match args.next() {
        Some(niw) => niw
            .parse()
            .map_err(|_| DistributionError::InvalidConfiguration {
                parameter: "niw".into(),
                reason: format!("must be an integer, got {niw:?}"),
            })?,
        None => DEFAULT_NIW,
    };
    let config = match args.next() {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };
    Ok((config, niw))
}

fn main() -> taskdist::Result<()> {
    let Some(universe) = mpi::initialize() else {
        eprintln!("MPI was already initialized");
        std::process::exit(1);
    };
    let group = MpiGroup::new(universe.world());
    let rank = group.rank();

    // Root parses the configuration and the frequency cutoff, everyone else receives them.
    // A parse failure on the root is broadcast too, so every rank returns the error.
    let (config, niw) = broadcast_root_result(&group, 0, parse_arguments)?;
    let _logger = setup_logging(&config.logging, rank)?;

    let iw = Array1::from_iter(-niw..=niw);
    let distributor = TaskDistributor::new(iw.len(), &group)?;
    let my_iw = distributor.local_rows(&iw)?;
    info!(
        rank,
        first = my_iw.first().copied().unwrap_or_default(),
        count = my_iw.len();
        "Received frequency slice"
    );

    let gathered = distributor.allgather_with(&my_iw, &config.gather)?;
    if rank == 0 {
        println!("{gathered}");
    }
    Ok(())
}
