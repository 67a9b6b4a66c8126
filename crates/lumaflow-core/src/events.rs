//! Pipeline event stream
//!
//! Observation-only notifications for UI and telemetry collaborators. Events
//! are fanned out to bounded subscriber channels; a subscriber that falls
//! behind loses events instead of stalling the tick.

use crate::context::{MusicalContext, OperatingMode};
use crate::harmony::KeyChange;
use crate::prediction::Prediction;
use crate::section::SectionType;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Something the pipeline decided during a tick
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A new context snapshot was published
    ContextUpdated(Arc<MusicalContext>),
    /// The section label changed
    SectionChanged {
        /// Previous label
        from: SectionType,
        /// New label
        to: SectionType,
        /// Section confidence at the change
        confidence: f32,
        /// Tick time
        timestamp_ms: u64,
    },
    /// The operating mode changed
    ModeChanged {
        /// Previous mode
        from: OperatingMode,
        /// New mode
        to: OperatingMode,
        /// Combined confidence that caused the change
        confidence: f32,
        /// Tick time
        timestamp_ms: u64,
    },
    /// A structural event was predicted
    Prediction(Prediction),
    /// The harmony detector saw a key change
    KeyChanged {
        /// Old and new key
        change: KeyChange,
        /// Tick time
        timestamp_ms: u64,
    },
}

impl PipelineEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::ContextUpdated(_) => "context_updated",
            PipelineEvent::SectionChanged { .. } => "section_changed",
            PipelineEvent::ModeChanged { .. } => "mode_changed",
            PipelineEvent::Prediction(_) => "prediction",
            PipelineEvent::KeyChanged { .. } => "key_changed",
        }
    }
}

/// Fan-out of pipeline events to any number of subscribers
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<PipelineEvent>>>,
    dropped: AtomicU64,
}

impl EventBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with room for `capacity` pending events
    pub fn subscribe(&self, capacity: usize) -> Receiver<PipelineEvent> {
        let (tx, rx) = bounded(capacity.max(1));
        self.subscribers.lock().push(tx);
        rx
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Events lost to full subscriber queues
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Deliver an event to every subscriber without blocking.
    ///
    /// Disconnected subscribers are removed.
    pub fn publish(&self, event: PipelineEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Subscriber queue full, dropped {} event", event.kind());
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}
