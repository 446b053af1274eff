//! Release gating.

use gantry_core::pipeline::ReleaseConfig;
use gantry_core::run::{InvocationOutcome, JobRunStatus, PipelineInvocation};

/// Outcome of checking whether an invocation may publish a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// The trigger carried no release tag.
    NotRequested,
    Refused(String),
    Publish { tag: String, artifacts: Vec<String> },
}

/// Decides whether the release publisher may run for a settled invocation.
#[derive(Debug, Clone, Default)]
pub struct ReleaseGate {
    config: ReleaseConfig,
    publisher_configured: bool,
}

impl ReleaseGate {
    pub fn new(config: Option<&ReleaseConfig>, publisher_configured: bool) -> Self {
        Self {
            config: config.cloned().unwrap_or_default(),
            publisher_configured,
        }
    }

    pub fn evaluate(&self, invocation: &PipelineInvocation) -> GateDecision {
        let Some(tag) = invocation.parameters.release_tag.clone() else {
            return GateDecision::NotRequested;
        };

        if invocation.graph_outcome() != InvocationOutcome::Success {
            return GateDecision::Refused("pipeline did not succeed".to_string());
        }

        for job in &self.config.prerequisites {
            match invocation.status_of(job) {
                Some(JobRunStatus::Succeeded) => {}
                Some(status) => {
                    return GateDecision::Refused(format!(
                        "prerequisite job {job} is {status}, not succeeded"
                    ));
                }
                None => {
                    return GateDecision::Refused(format!("prerequisite job {job} does not exist"));
                }
            }
        }

        if !self.publisher_configured {
            return GateDecision::Refused("no release publisher configured".to_string());
        }

        GateDecision::Publish {
            tag,
            artifacts: self.config.artifacts.clone(),
        }
    }
}
