//! Built-in event sinks.

use async_trait::async_trait;
use gantry_core::Result;
use gantry_core::events::Event;
use gantry_core::ports::EventSink;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: Event) -> Result<()> {
        let subject = event.subject();
        match &event {
            Event::InvocationStarted(p) => info!(
                subject = %subject,
                pipeline = %p.pipeline,
                event = %p.event,
                channel = %p.channel,
                jobs = p.jobs,
                "Invocation started"
            ),
            Event::InvocationCompleted(p) => info!(
                subject = %subject,
                outcome = ?p.outcome,
                succeeded = p.succeeded,
                failed = p.failed,
                skipped = p.skipped,
                duration_ms = p.duration_ms,
                "Invocation completed"
            ),
            Event::JobStatusChanged(p) => debug!(
                subject = %subject,
                job = %p.job,
                from = %p.from,
                to = %p.to,
                "Job status changed"
            ),
            Event::JobRetrying(p) => warn!(
                job = %p.job,
                attempt = p.attempt,
                error = %p.error,
                "Retrying job after infrastructure failure"
            ),
            Event::ArtifactPublished(p) => debug!(
                job = %p.job,
                artifact = %p.name,
                size = p.size_bytes,
                "Artifact published"
            ),
            Event::ReleasePublished(p) => {
                info!(tag = %p.tag, reference = %p.reference, "Release published")
            }
            Event::ReleaseRefused(p) => info!(reason = %p.reason, "Release refused"),
            Event::ReleaseFailed(p) => error!(tag = %p.tag, error = %p.error, "Release failed"),
        }
        Ok(())
    }
}

/// Forwards events into an unbounded channel. Dropped receivers are ignored.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: Event) -> Result<()> {
        let _ = self.tx.send(event);
        Ok(())
    }
}
