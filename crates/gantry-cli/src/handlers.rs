//! Command handlers.

use crate::config::{ArtifactsConfig, EngineConfig};
use anyhow::{Context, Result};
use console::style;
use gantry_artifacts::{FilesystemArtifactStore, InMemoryArtifactStore};
use gantry_core::pipeline::PipelineDefinition;
use gantry_core::ports::{ArtifactStore, EnvironmentProvisioner};
use gantry_core::run::{FailureKind, InvocationOutcome, JobRunStatus, PipelineInvocation, ReleaseStatus};
use gantry_core::trigger::{TriggerEvent, TriggerParameters};
use gantry_release::create_publisher;
use gantry_runner::{ContainerProvisioner, HostProvisioner, RoutingProvisioner};
use gantry_scheduler::{JobGraph, Scheduler, TriggerResolver};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

/// A job failed, or the release could not be published.
pub const EXIT_FAILURE: u8 = 1;
/// The pipeline or configuration could not be read or validated.
pub const EXIT_INVALID: u8 = 2;

const TEMPLATE: &str = r#"name: my-pipeline

jobs:
  - name: build
    steps:
      - name: compile
        run: cargo build --release
    produces:
      - name: binary
        path: target/release/my-app

  - name: test
    needs: [build]
    steps:
      - name: unit
        run: cargo test

  - name: smoke
    needs: [build]
    consumes: [binary]
    steps:
      - name: run
        run: chmod +x $GANTRY_ARTIFACTS_DIR/binary && $GANTRY_ARTIFACTS_DIR/binary --version

  - name: publish
    needs: [test, smoke]
    condition: "${{ trigger.event }} == release"
    steps:
      - name: announce
        run: echo "releasing ${{ trigger.release_tag }}"

release:
  prerequisites: [test, smoke]
  artifacts: [binary]
"#;

/// Write a starter pipeline.
pub async fn init(path: &str) -> Result<ExitCode> {
    let path = Path::new(path);

    if path.exists() {
        println!("{} {} already exists", style("!").yellow(), path.display());
        return Ok(ExitCode::SUCCESS);
    }

    tokio::fs::write(path, TEMPLATE).await?;
    println!("{} Created {}", style("✓").green(), path.display());
    Ok(ExitCode::SUCCESS)
}

/// Read and deserialize a pipeline file.
pub fn load_pipeline(path: &Path) -> Result<PipelineDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read pipeline {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Could not parse pipeline {}", path.display()))
}

/// Load a pipeline and validate its job graph.
pub fn load_graph(path: &Path) -> Result<(PipelineDefinition, JobGraph)> {
    let pipeline = load_pipeline(path)?;
    let graph = JobGraph::build(&pipeline)
        .with_context(|| format!("Pipeline \"{}\" is invalid", pipeline.name))?;
    Ok((pipeline, graph))
}

fn invalid(err: anyhow::Error) -> ExitCode {
    eprintln!("{} {err:#}", style("✗").red());
    ExitCode::from(EXIT_INVALID)
}

/// Validate a pipeline's job graph.
pub fn validate(path: &str) -> Result<ExitCode> {
    let (pipeline, graph) = match load_graph(Path::new(path)) {
        Ok(loaded) => loaded,
        Err(e) => return Ok(invalid(e)),
    };

    println!(
        "{} Pipeline \"{}\" is valid",
        style("✓").green(),
        pipeline.name
    );
    println!("  Jobs: {}", graph.len());

    for (depth, level) in graph.levels().iter().enumerate() {
        println!("    {}: {}", style(format!("level {depth}")).dim(), names(&graph, level));
    }

    if let Some(release) = graph.release() {
        println!(
            "  Release: after {} with {}",
            list_or_none(&release.prerequisites),
            list_or_none(&release.artifacts)
        );
    }

    Ok(ExitCode::SUCCESS)
}

/// Parameters for the event given on the command line. A release event
/// needs a tag.
pub fn resolve_event(
    event: &str,
    tag: Option<String>,
) -> Result<(TriggerEvent, TriggerParameters)> {
    let event = TriggerEvent::from_kind(event, tag);
    if let TriggerEvent::ReleasePublished { tag } = &event
        && tag.trim().is_empty()
    {
        anyhow::bail!("A release event needs --tag");
    }
    let params = TriggerResolver::new().resolve(&event);
    Ok((event, params))
}

/// Show which jobs an event would run.
pub fn plan(path: &str, event: &str, tag: Option<String>) -> Result<ExitCode> {
    let (pipeline, graph) = match load_graph(Path::new(path)) {
        Ok(loaded) => loaded,
        Err(e) => return Ok(invalid(e)),
    };
    let (_, params) = match resolve_event(event, tag) {
        Ok(resolved) => resolved,
        Err(e) => return Ok(invalid(e)),
    };
    let plan = graph.plan(&params);

    println!(
        "{} Plan for {} on {} ({})",
        style("▶").cyan().bold(),
        style(&pipeline.name).bold(),
        params.event,
        params.channel
    );

    for (wave, jobs) in plan.waves.iter().enumerate() {
        println!("  {} {}", style(format!("wave {}", wave + 1)).dim(), names(&graph, jobs));
    }
    for (index, reason) in &plan.skipped {
        println!(
            "  {} {} ({})",
            style("⏭").dim(),
            graph.job(*index).name,
            style(reason).dim()
        );
    }

    match (&params.release_tag, graph.release()) {
        (Some(tag), Some(_)) => println!("  Release {tag} is published if every prerequisite succeeds"),
        (Some(tag), None) => println!("  Release {tag} is refused: the pipeline has no release block"),
        (None, _) => {}
    }

    Ok(ExitCode::SUCCESS)
}

/// Wire provisioners, stores, and the publisher from configuration.
pub async fn build_scheduler(config: &EngineConfig) -> Result<Scheduler> {
    let runner = config.runner_config();
    let mut routing = RoutingProvisioner::new(Arc::new(HostProvisioner::new(runner.clone())));

    if config.container.enabled {
        match ContainerProvisioner::connect(runner) {
            Ok(provisioner) => {
                let provisioner = provisioner.pull_images(config.container.pull);
                match provisioner.ping().await {
                    Ok(()) => {
                        routing = routing.with_container(Arc::new(provisioner));
                    }
                    Err(e) => warn!(error = %e, "Container jobs are unavailable"),
                }
            }
            Err(e) => warn!(error = %e, "Container jobs are unavailable"),
        }
    }

    let artifacts: Arc<dyn ArtifactStore> = match &config.artifacts {
        ArtifactsConfig::Memory => Arc::new(InMemoryArtifactStore::new()),
        ArtifactsConfig::Filesystem { root, compression } => {
            Arc::new(FilesystemArtifactStore::new(root).with_compression(*compression))
        }
    };

    let provisioner: Arc<dyn EnvironmentProvisioner> = Arc::new(routing);
    let mut scheduler = Scheduler::new(config.scheduler.clone(), provisioner, artifacts);
    if let Some(publisher) = create_publisher(&config.release)? {
        info!(publisher = publisher.name(), "Release publishing enabled");
        scheduler = scheduler.with_publisher(publisher);
    }
    Ok(scheduler)
}

/// Run a pipeline locally.
pub async fn run(
    config: &EngineConfig,
    path: &str,
    event: &str,
    tag: Option<String>,
    json: bool,
) -> Result<ExitCode> {
    let (pipeline, graph) = match load_graph(Path::new(path)) {
        Ok(loaded) => loaded,
        Err(e) => return Ok(invalid(e)),
    };
    let (_, params) = match resolve_event(event, tag) {
        Ok(resolved) => resolved,
        Err(e) => return Ok(invalid(e)),
    };

    if !json {
        println!(
            "{} Running {} on {} ({})",
            style("▶").cyan().bold(),
            style(&pipeline.name).bold(),
            params.event,
            params.channel
        );
    }

    let scheduler = build_scheduler(config).await?;
    let invocation = scheduler.execute(Arc::new(graph), params).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&invocation)?);
    } else {
        print_summary(&invocation);
    }

    Ok(exit_code(&invocation))
}

pub fn exit_code(invocation: &PipelineInvocation) -> ExitCode {
    match invocation.outcome {
        Some(InvocationOutcome::Success) => ExitCode::SUCCESS,
        _ => ExitCode::from(EXIT_FAILURE),
    }
}

fn print_summary(invocation: &PipelineInvocation) {
    println!();
    for run in &invocation.runs {
        let duration = run
            .duration_ms()
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_default();
        match run.status {
            JobRunStatus::Succeeded => {
                println!("  {} {} {}", style("✓").green(), run.job, style(duration).dim());
            }
            JobRunStatus::Skipped => {
                let reason = run
                    .skip_reason
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                println!("  {} {} {}", style("⏭").dim(), run.job, style(reason).dim());
            }
            _ => {
                let failure = run.failure.as_ref().map(describe_failure).unwrap_or_default();
                println!(
                    "  {} {} {} {}",
                    style("✗").red(),
                    run.job,
                    failure,
                    style(duration).dim()
                );
                if let Some(message) = &run.message {
                    println!("      {}", style(message).dim());
                }
                for line in run.execution.iter().flat_map(|e| e.diagnostics.iter()) {
                    println!("      {}", style(line).dim());
                }
            }
        }
    }

    println!();
    match &invocation.release {
        ReleaseStatus::NotRequested => {}
        ReleaseStatus::Refused { reason } => {
            println!("{} Release refused: {}", style("!").yellow(), reason);
        }
        ReleaseStatus::Published { reference } => {
            println!("{} Release published: {}", style("✓").green(), reference);
        }
        ReleaseStatus::Failed { error } => {
            println!("{} Release failed: {}", style("✗").red(), error);
        }
    }

    let succeeded = invocation.count(JobRunStatus::Succeeded);
    let failed = invocation.count(JobRunStatus::Failed);
    let skipped = invocation.count(JobRunStatus::Skipped);
    match invocation.outcome {
        Some(InvocationOutcome::Success) => println!(
            "{} Invocation {} succeeded ({} succeeded, {} skipped)",
            style("✓").green().bold(),
            invocation.id,
            succeeded,
            skipped
        ),
        Some(InvocationOutcome::Partial) => println!(
            "{} Invocation {} partially succeeded: jobs passed, release did not",
            style("!").yellow().bold(),
            invocation.id
        ),
        _ => println!(
            "{} Invocation {} failed ({} failed, {} skipped)",
            style("✗").red().bold(),
            invocation.id,
            failed,
            skipped
        ),
    }
}

fn describe_failure(failure: &FailureKind) -> String {
    match failure {
        FailureKind::Step { step, exit_code } => format!("step {step} exited with {exit_code}"),
        FailureKind::Infrastructure => "infrastructure error".to_string(),
        FailureKind::Timeout => "timed out".to_string(),
        FailureKind::MissingOutput { artifact } => format!("did not produce {artifact}"),
        FailureKind::Internal => "worker crashed".to_string(),
    }
}

fn names(graph: &JobGraph, indices: &[usize]) -> String {
    indices
        .iter()
        .map(|&i| graph.job(i).name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "nothing".to_string()
    } else {
        items.join(", ")
    }
}

/// Print the pipeline format as JSON schema.
pub fn schema() -> Result<ExitCode> {
    let schema = schemars::schema_for!(PipelineDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(ExitCode::SUCCESS)
}

/// Show the effective configuration.
pub fn show_config(config: &EngineConfig) -> Result<ExitCode> {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(ExitCode::SUCCESS)
}

/// Print where configuration is read from.
pub fn config_path(explicit: Option<&Path>) -> Result<ExitCode> {
    match explicit.map(Path::to_path_buf).or_else(EngineConfig::config_path) {
        Some(path) => {
            let note = if path.exists() { "" } else { " (not found, using defaults)" };
            println!("{}{}", path.display(), style(note).dim());
        }
        None => println!("{} No config directory on this platform", style("i").blue()),
    }
    Ok(ExitCode::SUCCESS)
}
