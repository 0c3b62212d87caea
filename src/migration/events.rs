use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::models::{JobSnapshot, JobStatus, LogEntry};

const EVENT_BUFFER: usize = 256;

// ── Job event types ──────────────────────────────────────────────────

/// Push notification mirroring what polling clients would observe.
///
/// Events for one job are published in the order the job produced them;
/// the snapshots they carry are the same values `GET /api/migration/{id}`
/// would have returned at that moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum JobEvent {
    JobCreated {
        job: JobSnapshot,
    },
    JobStatusChanged {
        job_id: Uuid,
        status: JobStatus,
        progress: u8,
    },
    JobProgress {
        job_id: Uuid,
        percent: u8,
        step: String,
    },
    JobLog {
        job_id: Uuid,
        entry: LogEntry,
    },
    JobFinished {
        job: JobSnapshot,
    },
}

impl JobEvent {
    /// The job this event describes.
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::JobCreated { job } | Self::JobFinished { job } => job.id,
            Self::JobStatusChanged { job_id, .. }
            | Self::JobProgress { job_id, .. }
            | Self::JobLog { job_id, .. } => *job_id,
        }
    }
}

// ── Broadcast bus ────────────────────────────────────────────────────

/// A serialized event, tagged with its job so subscribers can filter
/// without parsing.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub job_id: Uuid,
    pub json: String,
}

/// Which events a subscriber wants. No job id means every job.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct EventFilter {
    pub job_id: Option<Uuid>,
}

impl EventFilter {
    pub fn admits(&self, event: &PublishedEvent) -> bool {
        self.job_id.is_none_or(|id| id == event.job_id)
    }
}

/// Fan-out of serialized [`JobEvent`]s to WebSocket subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PublishedEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }

    /// Serialize and broadcast. Silently drops the event when nobody listens.
    pub fn publish(&self, event: &JobEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                let _ = self.tx.send(PublishedEvent {
                    job_id: event.job_id(),
                    json,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize job event");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let id = Uuid::new_v4();
        let event = JobEvent::JobProgress {
            job_id: id,
            percent: 40,
            step: "Analyzing".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"JobProgress\""));
        assert!(json.contains("\"data\""));
        assert!(json.contains("\"percent\":40"));
    }

    #[test]
    fn test_status_change_uses_snake_case_status() {
        let event = JobEvent::JobStatusChanged {
            job_id: Uuid::new_v4(),
            status: JobStatus::Migrating,
            progress: 40,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"status\":\"migrating\""));
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.publish(&JobEvent::JobLog {
            job_id: id,
            entry: LogEntry::new("hello"),
        });
        let raw = rx.recv().await.unwrap();
        assert_eq!(raw.job_id, id);
        let event: JobEvent = serde_json::from_str(&raw.json).unwrap();
        match event {
            JobEvent::JobLog { job_id, entry } => {
                assert_eq!(job_id, id);
                assert_eq!(entry.message, "hello");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_filter_admits_only_its_job() {
        let mine = Uuid::new_v4();
        let event = |job_id| PublishedEvent {
            job_id,
            json: String::new(),
        };
        let filter = EventFilter { job_id: Some(mine) };
        assert!(filter.admits(&event(mine)));
        assert!(!filter.admits(&event(Uuid::new_v4())));
        assert!(EventFilter::default().admits(&event(Uuid::new_v4())));
    }

    #[test]
    fn test_publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(&JobEvent::JobLog {
            job_id: Uuid::new_v4(),
            entry: LogEntry::new("nobody listening"),
        });
    }
}
