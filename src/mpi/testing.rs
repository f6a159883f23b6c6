//! Support for tests that need several MPI processes.
//!
//! A test declared with [`mpi_test!`](crate::mpi_test) is split in two: an
//! ignored test holding the body, and a launcher test that re-runs the current
//! test binary under `mpirun` restricted to exactly that ignored test.

use std::process::Command;

#[doc(hidden)]
pub use paste;

/// Launcher used when `MPIRUN` is not set.
const DEFAULT_LAUNCHER: &str = "mpirun";

/// Given the module path and name of a test function, returns the name as it is
/// used by the test harness.
///
/// # Examples
/// ```ignore
/// assert_eq!(full_test_name("mycrate", "my_test"), "my_test");
/// assert_eq!(full_test_name("mycrate::foo", "my_test"), "foo::my_test");
/// ```
#[doc(hidden)]
pub fn full_test_name(module_path: &str, test_name: &str) -> String {
    match module_path.split_once("::") {
        // Not in the root module, drop the crate name
        Some((_, inner)) => format!("{inner}::{test_name}"),
        None => test_name.to_string(),
    }
}

/// Builds the launcher command running `test_full_name` of the current test
/// binary on `processes` ranks.
fn launcher_command(test_full_name: &str, processes: usize) -> std::io::Result<Command> {
    let launcher = std::env::var("MPIRUN").unwrap_or_else(|_| DEFAULT_LAUNCHER.to_string());
    let binary = std::env::current_exe()?;

    let mut command = Command::new(launcher);
    command
        .arg("-n")
        .arg(processes.to_string())
        .arg("--allow-run-as-root")
        .arg(binary)
        .arg(test_full_name)
        .arg("--ignored")
        .arg("--exact");
    Ok(command)
}

/// Runs the ignored test `test_full_name` on `processes` MPI ranks and panics
/// if any rank fails.
#[doc(hidden)]
pub fn run_mpi_test(test_full_name: &str, processes: usize) {
    let status = launcher_command(test_full_name, processes)
        .and_then(|mut command| command.status())
        .unwrap_or_else(|e| panic!("failed to launch {test_full_name} under MPI: {e}"));
    assert!(
        status.success(),
        "{test_full_name} failed on {processes} ranks: {status}"
    );
}

/// Declares a test whose body runs on `$processes` MPI ranks.
#[macro_export]
macro_rules! mpi_test {
    ($processes:expr, fn $name:ident $_:tt $body:block) => {
        $crate::mpi::testing::paste::paste! {
            #[test]
            fn $name() {
                let test_name = concat!(stringify!($name), "_internal");
                let exact_name = $crate::mpi::testing::full_test_name(module_path!(), test_name);
                $crate::mpi::testing::run_mpi_test(&exact_name, $processes);
            }

            #[test]
            #[ignore]
            fn [<$name _internal>]() $body
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_test_name() {
        assert_eq!(full_test_name("mycrate", "my_test"), "my_test");
        assert_eq!(full_test_name("mycrate::foo", "my_test"), "foo::my_test");
        assert_eq!(
            full_test_name("mylongercrate::foo::bar", "my_test"),
            "foo::bar::my_test"
        );
    }

    #[test]
    fn test_launcher_command() {
        let command = launcher_command("foo::my_test", 4).unwrap();
        let args = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(&args[..2], ["-n", "4"]);
        assert_eq!(&args[4..], ["foo::my_test", "--ignored", "--exact"]);
    }
}
