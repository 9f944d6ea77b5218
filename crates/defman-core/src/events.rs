//! Status events
//!
//! The engine reports phase transitions through an [`EventSink`]. Sinks must
//! be cheap and non-blocking; emitting happens on worker threads mid-deploy.

use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::jobs::{JobId, JobKind};

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Progress => "progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

/// One phase transition, e.g. `deploy.progress`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// `None` for work run outside the job manager.
    pub job_id: Option<JobId>,
    pub kind: JobKind,
    pub phase: String,
    /// Fraction complete in `0.0..=1.0`, when known.
    pub progress: Option<f32>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(job_id: Option<JobId>, kind: JobKind, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            job_id,
            kind,
            phase: format!("{}.{}", kind.as_str(), stage.as_str()),
            progress: None,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn with_progress(mut self, done: usize, total: usize) -> Self {
        self.progress = Some(if total == 0 {
            1.0
        } else {
            done as f32 / total as f32
        });
        self
    }
}

/// Receives status events.
pub trait EventSink: Send + Sync + Debug {
    fn emit(&self, event: StatusEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: StatusEvent) {}
}

/// Mirrors events into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: StatusEvent) {
        let job = event.job_id.map(|id| id.to_string()).unwrap_or_default();
        if event.phase.ends_with(".failed") || event.phase.ends_with(".timed_out") {
            tracing::warn!(job = %job, phase = %event.phase, "{}", event.message);
        } else {
            tracing::info!(job = %job, phase = %event.phase, progress = ?event.progress, "{}", event.message);
        }
    }
}

/// Records events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<StatusEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn phases(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.phase).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: StatusEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Publishes events to any number of subscribers.
///
/// Slow subscribers lose the oldest events instead of blocking the engine.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<StatusEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: StatusEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

/// Forwards every event to several sinks.
#[derive(Debug, Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: StatusEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
