//! Execution environments for Gantry jobs.
//!
//! Provides host and container implementations of
//! [`EnvironmentProvisioner`](gantry_core::ports::EnvironmentProvisioner) and a
//! router that picks one per job.

pub mod container;
pub mod environments;
pub mod host;
pub mod runner;
pub mod shell;

pub use container::ContainerProvisioner;
pub use environments::{RoutingProvisioner, prepare_workspace, remove_workspace};
pub use host::{HostProvisioner, TOOLCHAIN_ENV};
pub use runner::{
    OutputLine, OutputStream, OutputTail, RunnerConfig, StepRunner, execute_steps,
};
pub use shell::ShellRunner;
