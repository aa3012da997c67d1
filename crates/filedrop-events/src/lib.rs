#![forbid(unsafe_code)]
#![warn(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Event bus for file ingestion progress and operator alerts.
//!
//! The bus carries a typed event enum with sequential identifiers and keeps a
//! bounded replay ring so late subscribers (the daemon's alert logger, tests)
//! can catch up on recent history. Internally it uses `tokio::broadcast`; when
//! the channel overflows the oldest events are dropped.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};

/// Identifier assigned to each event emitted by the poller.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed domain events surfaced by the poller.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A new file appeared in a watched folder and is being tracked.
    FileDiscovered {
        /// Normalised folder name.
        folder: String,
        /// Absolute path of the file in the input folder.
        path: String,
    },
    /// A stable file was moved into its own processing folder.
    FileClaimed {
        /// Stable file identifier.
        file_id: String,
        /// Normalised folder name.
        folder: String,
        /// Path of the file inside the processing folder.
        processing_path: String,
    },
    /// A leftover processing folder was picked up again after a restart.
    FileResumed {
        /// Stable file identifier.
        file_id: String,
        /// Normalised folder name.
        folder: String,
    },
    /// A file failed transiently and was put on the retry queue.
    FileRetryScheduled {
        /// Stable file identifier.
        file_id: String,
        /// Failure kind label.
        kind: String,
        /// Retry attempt number, starting at one.
        attempt: u32,
        /// Delay before the next attempt.
        delay_ms: u64,
    },
    /// A file reached the finished state and its processing folder was removed.
    FileCompleted {
        /// Stable file identifier.
        file_id: String,
        /// Normalised folder name.
        folder: String,
    },
    /// A file was parked in the error folder. Operators treat this as an alert.
    FileFailed {
        /// Stable file identifier.
        file_id: String,
        /// Normalised folder name.
        folder: String,
        /// Failure detail.
        message: String,
    },
    /// New files from a folder are held back until a blocking file resolves.
    FolderBlocked {
        /// Normalised folder name.
        folder: String,
        /// File that blocks the folder.
        file_id: String,
    },
    /// A previously blocked folder accepts new files again.
    FolderUnblocked {
        /// Normalised folder name.
        folder: String,
    },
    /// Worker pool limits were changed at runtime.
    PoolResized {
        /// New minimum worker count.
        min_workers: usize,
        /// New maximum worker count.
        max_workers: usize,
    },
    /// A configuration reload was applied.
    SettingsChanged {
        /// Human readable summary of the change.
        description: String,
    },
    /// Components entering or leaving a degraded state.
    HealthChanged {
        /// Components currently degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for log and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::FileDiscovered { .. } => "file_discovered",
            Self::FileClaimed { .. } => "file_claimed",
            Self::FileResumed { .. } => "file_resumed",
            Self::FileRetryScheduled { .. } => "file_retry_scheduled",
            Self::FileCompleted { .. } => "file_completed",
            Self::FileFailed { .. } => "file_failed",
            Self::FolderBlocked { .. } => "folder_blocked",
            Self::FolderUnblocked { .. } => "folder_unblocked",
            Self::PoolResized { .. } => "pool_resized",
            Self::SettingsChanged { .. } => "settings_changed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }
}

/// Metadata wrapper around events.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("replay_capacity", &self.replay_capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// A zero capacity is bumped to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            backlog.extend(buffer.iter().filter(|item| item.id > since).cloned());
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Returns the last assigned identifier, if any events have been published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.back().map(|event| event.id)
    }

    /// Snapshot of the buffered events, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<EventEnvelope> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.iter().cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn sample_event(id: usize) -> Event {
        Event::FileDiscovered {
            folder: "INPUT".to_string(),
            path: format!("/data/in/file-{id}.txt"),
        }
    }

    #[test]
    fn debug_output_names_the_bus() {
        let bus = EventBus::with_capacity(4);
        bus.publish(sample_event(0));
        let rendered = format!("{bus:?}");
        assert!(rendered.starts_with("EventBus"));
        assert!(rendered.contains("next_id: 2"));
        assert!(rendered.contains("replay_capacity: 4"));
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(sample_event(i));
        }
        assert_eq!(last_id, 5);

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event);
            }
        }

        assert_eq!(received.len(), 3);
        assert_eq!(received.first().map(|e| e.id), Some(3));
        assert_eq!(received.last().map(|e| e.id), Some(5));
    }

    #[test]
    fn replay_ring_drops_oldest() {
        let bus = EventBus::with_capacity(2);
        for i in 0..3 {
            bus.publish(sample_event(i));
        }
        let ids: Vec<_> = bus.recent().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(bus.last_event_id(), Some(3));
    }

    #[test]
    fn kind_labels_are_snake_case() {
        let event = Event::FileFailed {
            file_id: "INPUT-1".into(),
            folder: "INPUT".into(),
            message: "boom".into(),
        };
        assert_eq!(event.kind(), "file_failed");
        let json = serde_json::to_value(&event).ok();
        assert_eq!(
            json.and_then(|v| v.get("type").and_then(|t| t.as_str().map(str::to_string))),
            Some("file_failed".to_string())
        );
    }

    #[tokio::test]
    async fn backlog_is_followed_by_live_events() -> anyhow::Result<()> {
        let bus = EventBus::new();
        bus.publish(sample_event(1));
        let mut stream = bus.subscribe(Some(0));

        let live = bus.publish(Event::FileCompleted {
            file_id: "INPUT-1".into(),
            folder: "INPUT".into(),
        });

        let first = timeout(Duration::from_secs(2), stream.next()).await?;
        assert!(matches!(first.map(|e| e.event), Some(Event::FileDiscovered { .. })));
        let second = timeout(Duration::from_secs(2), stream.next()).await?;
        assert_eq!(second.map(|e| e.id), Some(live));
        Ok(())
    }
}
