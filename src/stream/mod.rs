//! Push channel: events fanned out to every connected `/stream` client.

mod frames;

pub use frames::{FrameSink, FrameStreamer, frame_buffer};

use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast;
use tracing::trace;

use crate::tally::Counts;

/// One message on the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Annotated frame as base64 JPEG.
    VideoFrame { image: Arc<str> },
    DetectionCounts { infested_count: u64, not_infested_count: u64 },
}

impl PushEvent {
    pub fn counts(counts: Counts) -> Self {
        PushEvent::DetectionCounts {
            infested_count: counts.infested,
            not_infested_count: counts.not_infested,
        }
    }

    /// Event name as seen by clients.
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::VideoFrame { .. } => "video_frame",
            PushEvent::DetectionCounts { .. } => "detection_counts",
        }
    }

    /// JSON payload of the event.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            PushEvent::VideoFrame { image } => json!({ "image": &**image }),
            PushEvent::DetectionCounts { infested_count, not_infested_count } => json!({
                "infested_count": infested_count,
                "not_infested_count": not_infested_count,
            }),
        }
    }
}

/// Fan-out of [`PushEvent`]s. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<PushEvent>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to current subscribers; returns how many received it.
    pub fn publish(&self, event: PushEvent) -> usize {
        let name = event.name();
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                trace!(event = name, "no stream subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_and_payloads() {
        let frame = PushEvent::VideoFrame { image: Arc::from("abc") };
        assert_eq!(frame.name(), "video_frame");
        assert_eq!(frame.payload(), json!({ "image": "abc" }));

        let counts = PushEvent::counts(Counts { infested: 2, not_infested: 5 });
        assert_eq!(counts.name(), "detection_counts");
        assert_eq!(counts.payload(), json!({ "infested_count": 2, "not_infested_count": 5 }));
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let b = Broadcaster::new(8);
        assert_eq!(b.publish(PushEvent::counts(Counts::default())), 0);

        let mut r1 = b.subscribe();
        let mut r2 = b.subscribe();
        assert_eq!(b.subscriber_count(), 2);

        let ev = PushEvent::counts(Counts { infested: 1, not_infested: 0 });
        assert_eq!(b.publish(ev.clone()), 2);
        assert_eq!(r1.recv().await.unwrap(), ev);
        assert_eq!(r2.recv().await.unwrap(), ev);
    }
}
