mod common;

use common::*;
use gantry_artifacts::{InMemoryArtifactStore, checksum};
use gantry_core::condition::ConditionExpression;
use gantry_core::events::Event;
use gantry_core::pipeline::{EnvironmentDescriptor, JobDefinition, ReleaseConfig, StepDefinition};
use gantry_core::ports::ArtifactStore;
use gantry_core::run::{
    FailureKind, InvocationOutcome, JobRunStatus, PipelineInvocation, ReleaseStatus, SkipReason,
};
use gantry_core::trigger::TriggerEvent;
use gantry_core::{Error, GraphError};
use gantry_scheduler::{ChannelEventSink, RetryPolicy, Scheduler, SchedulerConfig};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const ON_RELEASE: &str = "${{ trigger.event }} == release";

struct Harness {
    provisioner: Arc<FakeProvisioner>,
    store: Arc<InMemoryArtifactStore>,
    publisher: Arc<RecordingPublisher>,
    scheduler: Scheduler,
    events: tokio::sync::mpsc::UnboundedReceiver<Event>,
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        retry: RetryPolicy {
            infrastructure_attempts: 2,
            delay_ms: 0,
        },
        retain_artifacts: true,
        ..Default::default()
    }
}

fn harness_with(config: SchedulerConfig, publisher: RecordingPublisher) -> Harness {
    let provisioner = Arc::new(FakeProvisioner::new());
    let store = Arc::new(InMemoryArtifactStore::new());
    let publisher = Arc::new(publisher);
    let (sink, events) = ChannelEventSink::new();
    let scheduler = Scheduler::new(config, provisioner.clone(), store.clone())
        .with_publisher(publisher.clone())
        .with_event_sink(Arc::new(sink));
    Harness {
        provisioner,
        store,
        publisher,
        scheduler,
        events,
    }
}

fn harness() -> Harness {
    harness_with(fast_config(), RecordingPublisher::default())
}

/// A, then B and C, then the release-gated D.
fn diamond(a_command: &str) -> Vec<JobDefinition> {
    vec![
        JobDefinition::new("a", a_command),
        JobDefinition::new("b", "true").needs(["a"]),
        JobDefinition::new("c", "true").needs(["a"]),
        JobDefinition::new("d", "true")
            .needs(["b", "c"])
            .when(ConditionExpression::when(ON_RELEASE)),
    ]
}

fn release_of(job: &str) -> Option<ReleaseConfig> {
    Some(ReleaseConfig {
        prerequisites: vec![job.to_string()],
        artifacts: vec![],
    })
}

fn status(inv: &PipelineInvocation, job: &str) -> JobRunStatus {
    inv.status_of(job).unwrap()
}

fn skip_reason(inv: &PipelineInvocation, job: &str) -> SkipReason {
    inv.run(job).unwrap().skip_reason.clone().unwrap()
}

#[tokio::test]
async fn test_root_failure_skips_every_dependent() {
    let h = harness();
    let inv = h
        .scheduler
        .run(&pipeline(diamond("exit 1"), release_of("d")), &release("v1.0"))
        .await
        .unwrap();

    assert_eq!(status(&inv, "a"), JobRunStatus::Failed);
    for job in ["b", "c", "d"] {
        assert_eq!(status(&inv, job), JobRunStatus::Skipped, "{job}");
    }
    assert_eq!(
        skip_reason(&inv, "b"),
        SkipReason::DependencyFailed {
            job: "a".to_string()
        }
    );
    assert_eq!(
        skip_reason(&inv, "d"),
        SkipReason::DependencySkipped {
            job: "b".to_string()
        }
    );
    assert_eq!(inv.outcome, Some(InvocationOutcome::Failure));
    assert!(matches!(inv.release, ReleaseStatus::Refused { .. }));
    assert!(h.publisher.requests().is_empty());
    assert_eq!(h.provisioner.provision_attempts("b"), 0);
}

#[tokio::test]
async fn test_push_skips_release_gated_job_only() {
    let h = harness();
    let inv = h
        .scheduler
        .run(&pipeline(diamond("true"), release_of("d")), &push())
        .await
        .unwrap();

    for job in ["a", "b", "c"] {
        assert_eq!(status(&inv, job), JobRunStatus::Succeeded, "{job}");
    }
    assert_eq!(status(&inv, "d"), JobRunStatus::Skipped);
    assert_eq!(skip_reason(&inv, "d"), SkipReason::ConditionFalse);
    assert_eq!(inv.outcome, Some(InvocationOutcome::Success));
    assert_eq!(inv.release, ReleaseStatus::NotRequested);
    assert!(h.publisher.requests().is_empty());
}

#[tokio::test]
async fn test_release_event_runs_gated_job_and_publishes_once() {
    let h = harness();
    let inv = h
        .scheduler
        .run(&pipeline(diamond("true"), release_of("d")), &release("v1.0"))
        .await
        .unwrap();

    assert_eq!(status(&inv, "d"), JobRunStatus::Succeeded);
    assert_eq!(inv.outcome, Some(InvocationOutcome::Success));
    assert_eq!(
        inv.release,
        ReleaseStatus::Published {
            reference: "releases/v1.0".to_string()
        }
    );
    let requests = h.publisher.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].tag, "v1.0");
    assert_eq!(requests[0].invocation, inv.id);
}

#[tokio::test]
async fn test_skip_is_transitive_and_spares_siblings() {
    let h = harness();
    let jobs = vec![
        JobDefinition::new("compile", "exit 2"),
        JobDefinition::new("test", "true").needs(["compile"]),
        JobDefinition::new("package", "true").needs(["test"]),
        JobDefinition::new("publish", "true").needs(["package"]),
        JobDefinition::new("lint", "true"),
    ];
    let inv = h.scheduler.run(&pipeline(jobs, None), &push()).await.unwrap();

    assert_eq!(status(&inv, "publish"), JobRunStatus::Skipped);
    assert_eq!(
        skip_reason(&inv, "publish"),
        SkipReason::DependencySkipped {
            job: "package".to_string()
        }
    );
    assert_eq!(status(&inv, "lint"), JobRunStatus::Succeeded);
    assert_eq!(
        inv.run("compile").unwrap().failure,
        Some(FailureKind::Step {
            step: "compile".to_string(),
            exit_code: 2
        })
    );
    assert_eq!(inv.outcome, Some(InvocationOutcome::Failure));
}

#[tokio::test]
async fn test_condition_false_does_not_affect_siblings() {
    let h = harness();
    let jobs = vec![
        JobDefinition::new("nightly-only", "true")
            .when(ConditionExpression::when("${{ trigger.channel }} == nightly")),
        JobDefinition::new("always", "true"),
        JobDefinition::new("after", "true").needs(["always"]),
    ];
    let inv = h.scheduler.run(&pipeline(jobs, None), &push()).await.unwrap();

    assert_eq!(status(&inv, "nightly-only"), JobRunStatus::Skipped);
    assert_eq!(status(&inv, "always"), JobRunStatus::Succeeded);
    assert_eq!(status(&inv, "after"), JobRunStatus::Succeeded);
    assert_eq!(inv.outcome, Some(InvocationOutcome::Success));
}

#[tokio::test]
async fn test_jobs_never_start_before_needs_succeed() {
    let h = harness();
    let jobs = vec![
        JobDefinition::new("fetch", "nap 20"),
        JobDefinition::new("build", "nap 10").needs(["fetch"]),
        JobDefinition::new("docs", "nap 5").needs(["fetch"]),
        JobDefinition::new("test", "true").needs(["build", "docs"]),
    ];
    let definition = pipeline(jobs.clone(), None);
    h.scheduler.run(&definition, &push()).await.unwrap();

    let calls = h.provisioner.calls();
    let position = |call: Call| calls.iter().position(|c| *c == call).unwrap();
    for job in &jobs {
        let started = position(Call::Provision(job.name.clone()));
        for need in &job.needs {
            assert!(
                position(Call::ExecuteFinished(need.clone())) < started,
                "{} started before {need} finished",
                job.name
            );
        }
    }
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
    let config = SchedulerConfig {
        max_parallel_jobs: 2,
        ..fast_config()
    };
    let h = harness_with(config, RecordingPublisher::default());
    let jobs = (0..6)
        .map(|i| JobDefinition::new(format!("job{i}"), "nap 20"))
        .collect();
    let inv = h.scheduler.run(&pipeline(jobs, None), &push()).await.unwrap();

    assert_eq!(inv.count(JobRunStatus::Succeeded), 6);
    assert_eq!(h.provisioner.max_running(), 2);
}

#[tokio::test]
async fn test_trigger_selects_channel_and_exports_engine_variables() {
    let h = harness();
    let mut scoped = JobDefinition::new("scoped", "true");
    scoped.env.insert("MODE".to_string(), "job".to_string());
    let alt = JobDefinition::new("alt", "true").in_environment(EnvironmentDescriptor::Container {
        image: "fedora:40".to_string(),
        bootstrap: vec![],
        variant: Some("fedora".to_string()),
    });
    let mut definition = pipeline(
        vec![JobDefinition::new("ci", "true"), scoped, alt],
        None,
    );
    definition
        .env
        .insert("MODE".to_string(), "pipeline".to_string());

    let inv = h
        .scheduler
        .run(&definition, &TriggerEvent::Schedule { cron: None })
        .await
        .unwrap();

    let ci = h.provisioner.step_env("ci");
    assert_eq!(ci["GANTRY_EVENT"], "schedule");
    assert_eq!(ci["GANTRY_TOOLCHAIN"], "nightly");
    assert_eq!(ci["RUSTUP_TOOLCHAIN"], "nightly");
    assert_eq!(ci["GANTRY_JOB"], "ci");
    assert_eq!(ci["GANTRY_INVOCATION_ID"], inv.id.to_string());
    assert_eq!(ci["GANTRY_ALTERNATE_ENV"], "false");
    assert_eq!(ci["MODE"], "pipeline");
    assert!(!ci.contains_key("GANTRY_RELEASE_TAG"));
    assert!(!ci.contains_key("GANTRY_ENV_VARIANT"));

    let scoped = h.provisioner.step_env("scoped");
    assert_eq!(scoped["MODE"], "job");

    // One channel per invocation, whatever the environment.
    for job in ["ci", "scoped", "alt"] {
        let env = h.provisioner.step_env(job);
        assert_eq!(env["GANTRY_TOOLCHAIN"], "nightly", "{job}");
        assert_eq!(env["RUSTUP_TOOLCHAIN"], "nightly", "{job}");
    }

    let alt = h.provisioner.step_env("alt");
    assert_eq!(alt["GANTRY_ALTERNATE_ENV"], "true");
    assert_eq!(alt["GANTRY_ENV_VARIANT"], "fedora");
    assert_eq!(alt["GANTRY_ARTIFACTS_DIR"], "/workspace/.gantry/artifacts");
}

#[tokio::test]
async fn test_step_templates_are_interpolated() {
    let h = harness();
    let mut job = JobDefinition::new("tag", "echo ${{ trigger.release_tag }} on ${{ job.name }}");
    let mut step = StepDefinition::new("greet", "echo ${{ env.GREETING }}");
    step.env.insert("GREETING".to_string(), "hi".to_string());
    job.steps.push(step);

    h.scheduler
        .run(&pipeline(vec![job], None), &release("v2.0"))
        .await
        .unwrap();

    let steps = h.provisioner.steps("tag");
    assert_eq!(steps[0].command, "echo v2.0 on tag");
    assert_eq!(steps[1].command, "echo hi");
    assert_eq!(steps[1].env["GANTRY_RELEASE_TAG"], "v2.0");
}

#[tokio::test]
async fn test_artifacts_flow_byte_exact_between_jobs() {
    let h = harness();
    let jobs = vec![
        JobDefinition::new("build", "write target/app gantry-binary v1")
            .produces("app", "target/app"),
        JobDefinition::new("package", "read .gantry/artifacts/app")
            .needs(["build"])
            .consumes("app"),
    ];
    let inv = h.scheduler.run(&pipeline(jobs, None), &push()).await.unwrap();

    assert_eq!(inv.outcome, Some(InvocationOutcome::Success));
    assert_eq!(
        h.provisioner.read_by("package").unwrap(),
        b"gantry-binary v1".to_vec()
    );

    let handles = &inv.run("build").unwrap().artifacts;
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].checksum, checksum(b"gantry-binary v1"));
    assert_eq!(
        h.store.fetch(handles[0].scope, "app").await.unwrap(),
        b"gantry-binary v1".to_vec()
    );
}

#[tokio::test]
async fn test_failed_job_publishes_nothing() {
    let h = harness();
    let mut job = JobDefinition::new("build", "write target/app half-built").produces("app", "target/app");
    job.steps.push(StepDefinition::new("check", "exit 1"));
    let inv = h
        .scheduler
        .run(&pipeline(vec![job], None), &push())
        .await
        .unwrap();

    assert_eq!(status(&inv, "build"), JobRunStatus::Failed);
    assert!(inv.run("build").unwrap().artifacts.is_empty());
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_failed_artifact_publish_withdraws_earlier_outputs() {
    let provisioner = Arc::new(FakeProvisioner::new());
    let store = Arc::new(RefusingStore::refusing("docs"));
    let scheduler = Scheduler::new(fast_config(), provisioner.clone(), store.clone());

    let mut build = JobDefinition::new("build", "write target/app v1")
        .produces("app", "target/app")
        .produces("docs", "target/docs");
    build
        .steps
        .push(StepDefinition::new("docs", "write target/docs manual"));
    let jobs = vec![
        build,
        JobDefinition::new("package", "true")
            .needs(["build"])
            .consumes("app"),
    ];
    let inv = scheduler.run(&pipeline(jobs, None), &push()).await.unwrap();

    let build = inv.run("build").unwrap();
    assert_eq!(build.status, JobRunStatus::Failed);
    assert_eq!(build.failure, Some(FailureKind::Infrastructure));
    assert!(build.artifacts.is_empty());
    assert!(store.inner().is_empty().await);
    let scope = gantry_core::artifact::ArtifactScope {
        invocation: inv.id,
        run: build.id,
    };
    assert!(matches!(
        store.fetch(scope, "app").await,
        Err(Error::ArtifactNotFound { .. })
    ));
    assert_eq!(status(&inv, "package"), JobRunStatus::Skipped);
}

#[tokio::test]
async fn test_nested_artifact_name_is_rejected_before_dispatch() {
    let h = harness();
    let jobs = vec![
        JobDefinition::new("build", "write dist/app v1").produces("dist/app", "dist/app"),
        JobDefinition::new("pkg", "true")
            .needs(["build"])
            .consumes("dist/app"),
    ];
    let err = h
        .scheduler
        .run(&pipeline(jobs, None), &push())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Validation(GraphError::InvalidArtifactName { ref artifact, .. }) if artifact == "dist/app"
    ));
    assert!(h.provisioner.calls().is_empty());
}

#[tokio::test]
async fn test_missing_output_fails_job() {
    let h = harness();
    let jobs = vec![
        JobDefinition::new("build", "true").produces("app", "target/app"),
        JobDefinition::new("package", "true")
            .needs(["build"])
            .consumes("app"),
    ];
    let inv = h.scheduler.run(&pipeline(jobs, None), &push()).await.unwrap();

    assert_eq!(
        inv.run("build").unwrap().failure,
        Some(FailureKind::MissingOutput {
            artifact: "app".to_string()
        })
    );
    assert_eq!(status(&inv, "package"), JobRunStatus::Skipped);
    assert_eq!(h.provisioner.count(&Call::Teardown("build".to_string())), 1);
}

#[tokio::test]
async fn test_teardown_once_per_provision_on_every_path() {
    let h = harness();
    let jobs = vec![
        JobDefinition::new("ok", "true"),
        JobDefinition::new("fails", "exit 1"),
        JobDefinition::new("no-output", "true").produces("x", "missing"),
    ];
    h.scheduler.run(&pipeline(jobs, None), &push()).await.unwrap();

    for job in ["ok", "fails", "no-output"] {
        assert_eq!(h.provisioner.provision_attempts(job), 1, "{job}");
        assert_eq!(
            h.provisioner.count(&Call::Teardown(job.to_string())),
            1,
            "{job}"
        );
    }
}

#[tokio::test]
async fn test_infrastructure_failures_retry_up_to_bound() {
    let mut h = harness();
    h.provisioner.fail_provisioning("flaky", 1);
    h.provisioner.fail_provisioning("broken", 10);
    let jobs = vec![
        JobDefinition::new("flaky", "true"),
        JobDefinition::new("broken", "true"),
        JobDefinition::new("after-broken", "true").needs(["broken"]),
    ];
    let inv = h.scheduler.run(&pipeline(jobs, None), &push()).await.unwrap();

    let flaky = inv.run("flaky").unwrap();
    assert_eq!(flaky.status, JobRunStatus::Succeeded);
    assert_eq!(flaky.attempts, 2);

    let broken = inv.run("broken").unwrap();
    assert_eq!(broken.status, JobRunStatus::Failed);
    assert_eq!(broken.failure, Some(FailureKind::Infrastructure));
    assert_eq!(broken.attempts, 2);
    assert_eq!(h.provisioner.provision_attempts("broken"), 2);
    assert_eq!(h.provisioner.count(&Call::Teardown("broken".to_string())), 0);
    assert_eq!(status(&inv, "after-broken"), JobRunStatus::Skipped);

    let retries = drain(&mut h.events)
        .into_iter()
        .filter(|e| matches!(e, Event::JobRetrying(_)))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_step_failures_run_exactly_once() {
    let config = SchedulerConfig {
        retry: RetryPolicy {
            infrastructure_attempts: 5,
            delay_ms: 0,
        },
        ..fast_config()
    };
    let h = harness_with(config, RecordingPublisher::default());
    let inv = h
        .scheduler
        .run(&pipeline(vec![JobDefinition::new("test", "exit 101")], None), &push())
        .await
        .unwrap();

    assert_eq!(inv.run("test").unwrap().attempts, 1);
    assert_eq!(
        h.provisioner.count(&Call::ExecuteStarted("test".to_string())),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_execution_timeout_fails_job_and_skips_dependents() {
    let h = harness();
    let mut slow = JobDefinition::new("slow", "hang");
    slow.timeout_minutes = Some(1);
    let jobs = vec![slow, JobDefinition::new("after", "true").needs(["slow"])];
    let inv = h.scheduler.run(&pipeline(jobs, None), &push()).await.unwrap();

    let slow = inv.run("slow").unwrap();
    assert_eq!(slow.status, JobRunStatus::Failed);
    assert_eq!(slow.failure, Some(FailureKind::Timeout));
    assert_eq!(slow.attempts, 1);
    assert_eq!(status(&inv, "after"), JobRunStatus::Skipped);
    assert_eq!(h.provisioner.count(&Call::Teardown("slow".to_string())), 1);
}

#[tokio::test(start_paused = true)]
async fn test_provisioning_timeout_releases_environment_and_retries() {
    let config = SchedulerConfig {
        provision_timeout_secs: 30,
        ..fast_config()
    };
    let mut h = harness_with(config, RecordingPublisher::default());
    h.provisioner.hang_provisioning("stuck", 10);
    h.provisioner.hang_provisioning("slow-start", 1);
    let jobs = vec![
        JobDefinition::new("stuck", "true"),
        JobDefinition::new("after-stuck", "true").needs(["stuck"]),
        JobDefinition::new("slow-start", "true"),
    ];
    let inv = h.scheduler.run(&pipeline(jobs, None), &push()).await.unwrap();

    let stuck = inv.run("stuck").unwrap();
    assert_eq!(stuck.status, JobRunStatus::Failed);
    assert_eq!(stuck.failure, Some(FailureKind::Timeout));
    assert_eq!(stuck.attempts, 2);
    assert_eq!(h.provisioner.provision_attempts("stuck"), 2);
    assert_eq!(h.provisioner.count(&Call::Abandon("stuck".to_string())), 2);
    assert_eq!(
        h.provisioner.count(&Call::ExecuteStarted("stuck".to_string())),
        0
    );
    assert_eq!(
        skip_reason(&inv, "after-stuck"),
        SkipReason::DependencyFailed {
            job: "stuck".to_string()
        }
    );

    let slow = inv.run("slow-start").unwrap();
    assert_eq!(slow.status, JobRunStatus::Succeeded);
    assert_eq!(slow.attempts, 2);
    assert_eq!(h.provisioner.count(&Call::Abandon("slow-start".to_string())), 1);
    assert_eq!(h.provisioner.count(&Call::Teardown("slow-start".to_string())), 1);

    assert_eq!(h.provisioner.live_environments(), 0);
    assert_eq!(inv.outcome, Some(InvocationOutcome::Failure));

    let retries = drain(&mut h.events)
        .into_iter()
        .filter(|e| matches!(e, Event::JobRetrying(_)))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_cycle_aborts_before_dispatch() {
    let h = harness();
    let jobs = vec![
        JobDefinition::new("lint", "true"),
        JobDefinition::new("a", "true").needs(["b"]),
        JobDefinition::new("b", "true").needs(["a"]),
    ];
    let err = h
        .scheduler
        .run(&pipeline(jobs, None), &push())
        .await
        .unwrap_err();

    match err {
        Error::Validation(GraphError::CycleDetected { cycle }) => {
            assert!(cycle.contains(&"a".to_string()));
            assert!(cycle.contains(&"b".to_string()));
            assert!(!cycle.contains(&"lint".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.provisioner.calls().is_empty());
}

#[tokio::test]
async fn test_publisher_failure_yields_partial_without_retry() {
    let h = harness_with(fast_config(), RecordingPublisher::failing());
    let inv = h
        .scheduler
        .run(&pipeline(diamond("true"), release_of("d")), &release("v1.0"))
        .await
        .unwrap();

    assert_eq!(inv.outcome, Some(InvocationOutcome::Partial));
    assert!(matches!(inv.release, ReleaseStatus::Failed { .. }));
    assert_eq!(h.publisher.requests().len(), 1);
}

#[tokio::test]
async fn test_release_refused_when_prerequisite_skipped() {
    let h = harness();
    let jobs = vec![
        JobDefinition::new("ci", "true"),
        JobDefinition::new("ci-alt", "true").when(ConditionExpression::Structured {
            if_expr: None,
            unless: Some("${{ trigger.is_release }}".to_string()),
        }),
    ];
    let release_config = Some(ReleaseConfig {
        prerequisites: vec!["ci".to_string(), "ci-alt".to_string()],
        artifacts: vec![],
    });
    let inv = h
        .scheduler
        .run(&pipeline(jobs, release_config), &release("v1.0"))
        .await
        .unwrap();

    assert_eq!(inv.outcome, Some(InvocationOutcome::Success));
    match &inv.release {
        ReleaseStatus::Refused { reason } => assert!(reason.contains("ci-alt")),
        other => panic!("unexpected release status: {other:?}"),
    }
    assert!(h.publisher.requests().is_empty());
}

#[tokio::test]
async fn test_release_carries_artifacts_and_expires_them_afterwards() {
    let config = SchedulerConfig {
        retain_artifacts: false,
        ..fast_config()
    };
    let h = harness_with(config, RecordingPublisher::default());
    let jobs = vec![
        JobDefinition::new("package", "write dist/app.deb debian-package").produces("deb", "dist/app.deb"),
        JobDefinition::new("ship", "true")
            .needs(["package"])
            .when(ConditionExpression::when(ON_RELEASE)),
    ];
    let release_config = Some(ReleaseConfig {
        prerequisites: vec!["ship".to_string()],
        artifacts: vec!["deb".to_string()],
    });
    let inv = h
        .scheduler
        .run(&pipeline(jobs, release_config), &release("v3.1"))
        .await
        .unwrap();

    assert!(matches!(inv.release, ReleaseStatus::Published { .. }));
    let requests = h.publisher.requests();
    let asset = &requests[0].assets[0];
    assert_eq!(asset.name, "deb");
    assert_eq!(asset.data, b"debian-package".to_vec());
    assert_eq!(asset.checksum, checksum(b"debian-package"));

    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_panicking_worker_fails_only_its_job() {
    let h = harness();
    let jobs = vec![
        JobDefinition::new("crash", "panic"),
        JobDefinition::new("after", "true").needs(["crash"]),
        JobDefinition::new("other", "true"),
    ];
    let inv = h.scheduler.run(&pipeline(jobs, None), &push()).await.unwrap();

    assert_eq!(inv.run("crash").unwrap().failure, Some(FailureKind::Internal));
    assert_eq!(status(&inv, "after"), JobRunStatus::Skipped);
    assert_eq!(status(&inv, "other"), JobRunStatus::Succeeded);
}

#[tokio::test]
async fn test_lifecycle_events_are_emitted_in_order() {
    let mut h = harness();
    let inv = h
        .scheduler
        .run(&pipeline(vec![JobDefinition::new("ci", "true")], None), &push())
        .await
        .unwrap();

    let events = drain(&mut h.events);
    assert!(matches!(events.first(), Some(Event::InvocationStarted(_))));
    assert!(matches!(events.last(), Some(Event::InvocationCompleted(_))));

    let transitions: Vec<(JobRunStatus, JobRunStatus)> = events
        .iter()
        .filter_map(|e| match e {
            Event::JobStatusChanged(p) => Some((p.from, p.to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (JobRunStatus::Pending, JobRunStatus::Ready),
            (JobRunStatus::Ready, JobRunStatus::Running),
            (JobRunStatus::Running, JobRunStatus::Succeeded),
        ]
    );
    assert!(events.iter().all(|e| e.invocation_id() == inv.id));
}
