//! Gantry Core
//!
//! Core domain types, ports, and error handling for the Gantry job-graph
//! engine. This crate has minimal dependencies and defines the shared
//! vocabulary used by the scheduler, the environment runners, the artifact
//! stores, and the release publishers.

pub mod artifact;
pub mod condition;
pub mod environment;
pub mod error;
pub mod events;
pub mod ids;
pub mod interpolation;
pub mod pipeline;
pub mod ports;
pub mod run;
pub mod trigger;

pub use error::{Error, GraphError, Result};
pub use ids::*;
