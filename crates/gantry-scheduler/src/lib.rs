//! Job-graph scheduling for Gantry.
//!
//! - [`triggers`] maps an inbound event to per-invocation parameters.
//! - [`dag`] validates the job graph and computes the ready frontier.
//! - [`scheduler`] runs an invocation: one coordinator, a bounded worker pool.
//! - [`release`] decides whether a settled invocation may publish a release.

pub mod config;
pub mod dag;
pub mod release;
pub mod scheduler;
pub mod sinks;
pub mod triggers;

pub use config::{RetryPolicy, SchedulerConfig};
pub use dag::{Frontier, JobGraph, Plan};
pub use release::{GateDecision, ReleaseGate};
pub use scheduler::Scheduler;
pub use sinks::{ChannelEventSink, TracingEventSink};
pub use triggers::TriggerResolver;
