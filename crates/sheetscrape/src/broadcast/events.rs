//! State-change events published by the job manager.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::JobRecord;
use crate::storage::FileInfo;

/// A tagged state-change notification: `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum JobEvent {
    FileUploaded(FileInfo),
    FileDeleted { filename: String },
    OutputDeleted { filename: String },
    JobCreated(JobRecord),
    JobControl(JobRecord),
    JobStatusChanged(JobRecord),
    JobDeleted { job_id: String },
}

impl JobEvent {
    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::FileUploaded(_) => "file_uploaded",
            JobEvent::FileDeleted { .. } => "file_deleted",
            JobEvent::OutputDeleted { .. } => "output_deleted",
            JobEvent::JobCreated(_) => "job_created",
            JobEvent::JobControl(_) => "job_control",
            JobEvent::JobStatusChanged(_) => "job_status_changed",
            JobEvent::JobDeleted { .. } => "job_deleted",
        }
    }

    /// Id of the job the event concerns, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            JobEvent::JobCreated(job) | JobEvent::JobControl(job) | JobEvent::JobStatusChanged(job) => {
                Some(&job.id)
            }
            JobEvent::JobDeleted { job_id } => Some(job_id),
            _ => None,
        }
    }
}

/// Where the manager publishes events. Delivery is best effort.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: JobEvent);
}

/// Broadcasts events to any number of subscribers.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl EventBroadcaster {
    /// Creates a broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for EventBroadcaster {
    fn publish(&self, event: JobEvent) {
        log::debug!("Publishing {} event", event.kind());
        self.send(event);
    }
}

/// Keeps every event in memory. Useful for observers that need the full
/// history rather than a lossy stream.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => {
                log::warn!("Recording sink lock was poisoned, recovering");
                poisoned.into_inner().clone()
            }
        }
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: JobEvent) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => {
                log::warn!("Recording sink lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        events.push(event);
    }
}

/// Fans each event out to several sinks in order.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, event: JobEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone());
        }
    }
}
