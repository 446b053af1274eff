//! Pipeline and job declaration types.
//!
//! These types are what the declarative loader hands to the engine. They are
//! immutable for the lifetime of an invocation.

use crate::condition::ConditionExpression;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Variables exported to every step of every job.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub jobs: Vec<JobDefinition>,
    #[serde(default)]
    pub release: Option<ReleaseConfig>,
}

impl PipelineDefinition {
    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub environment: EnvironmentDescriptor,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub condition: Option<ConditionExpression>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub produces: Vec<ArtifactDeclaration>,
    #[serde(default)]
    pub consumes: Vec<String>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
}

impl JobDefinition {
    /// Minimal job running a single shell command on the host.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            steps: vec![StepDefinition::new(name.clone(), command)],
            name,
            display_name: None,
            environment: EnvironmentDescriptor::default(),
            needs: vec![],
            condition: None,
            env: BTreeMap::new(),
            produces: vec![],
            consumes: vec![],
            timeout_minutes: None,
        }
    }

    pub fn needs<I, S>(mut self, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needs.extend(jobs.into_iter().map(Into::into));
        self
    }

    pub fn when(mut self, condition: ConditionExpression) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn in_environment(mut self, environment: EnvironmentDescriptor) -> Self {
        self.environment = environment;
        self
    }

    pub fn produces(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.produces.push(ArtifactDeclaration {
            name: name.into(),
            path: path.into(),
        });
        self
    }

    pub fn consumes(mut self, name: impl Into<String>) -> Self {
        self.consumes.push(name.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepDefinition {
    pub name: String,
    pub run: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub continue_on_error: bool,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: run.into(),
            env: BTreeMap::new(),
            continue_on_error: false,
        }
    }
}

/// A file the job leaves in its workspace and publishes under `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactDeclaration {
    pub name: String,
    /// Workspace-relative path of the produced file.
    pub path: String,
}

/// Where a job runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvironmentDescriptor {
    /// Bare host using the invocation's toolchain channel.
    #[default]
    Host,
    /// Containerized image, optionally an alternate OS variant.
    Container {
        image: String,
        /// Package-manager setup run before the job's own steps.
        #[serde(default)]
        bootstrap: Vec<String>,
        #[serde(default)]
        variant: Option<String>,
    },
}

impl EnvironmentDescriptor {
    pub fn container(image: impl Into<String>) -> Self {
        EnvironmentDescriptor::Container {
            image: image.into(),
            bootstrap: vec![],
            variant: None,
        }
    }

    /// Name of the alternate environment variant, if this is one.
    pub fn variant(&self) -> Option<&str> {
        match self {
            EnvironmentDescriptor::Container { variant, .. } => variant.as_deref(),
            EnvironmentDescriptor::Host => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            EnvironmentDescriptor::Host => "host".to_string(),
            EnvironmentDescriptor::Container { image, .. } => format!("container:{image}"),
        }
    }
}

/// Which jobs and artifacts gate a published release.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ReleaseConfig {
    /// Jobs that must have succeeded before anything is published.
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// Artifacts attached to the release.
    #[serde(default)]
    pub artifacts: Vec<String>,
}
