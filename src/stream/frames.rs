//! Bounded frame buffer and the component that paces it onto the push channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::subsystems::runtime::{Component, ComponentFuture};

use super::{Broadcaster, PushEvent};

/// Create a frame buffer holding at most `capacity` frames.
pub fn frame_buffer(capacity: usize) -> (FrameSink, mpsc::Receiver<Arc<str>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FrameSink { tx }, rx)
}

/// Producer side of the frame buffer. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<Arc<str>>,
}

impl FrameSink {
    /// Queue a frame without waiting. Returns `false` when the buffer is full
    /// (the frame is dropped) or the streamer has stopped.
    pub fn offer(&self, frame: impl Into<Arc<str>>) -> bool {
        match self.tx.try_send(frame.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("frame buffer full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Frames currently waiting.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Publishes at most one buffered frame per tick as [`PushEvent::VideoFrame`].
pub struct FrameStreamer {
    frames: mpsc::Receiver<Arc<str>>,
    events: Broadcaster,
    interval: Duration,
}

impl FrameStreamer {
    pub fn new(frames: mpsc::Receiver<Arc<str>>, events: Broadcaster, interval: Duration) -> Self {
        Self { frames, events, interval }
    }
}

impl Component for FrameStreamer {
    fn id(&self) -> &str {
        "frame-streamer"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        let FrameStreamer { mut frames, events, interval } = *self;
        Box::pin(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis() as u64, "frame streamer started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Ok(image) = frames.try_recv() {
                            events.publish(PushEvent::VideoFrame { image });
                        }
                    }
                }
            }

            info!("frame streamer stopped");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_drops_when_full() {
        let (sink, _rx) = frame_buffer(2);
        assert!(sink.offer("a"));
        assert!(sink.offer("b"));
        assert!(!sink.offer("c"));
        assert_eq!(sink.pending(), 2);
    }

    #[test]
    fn offer_after_streamer_gone_is_rejected() {
        let (sink, rx) = frame_buffer(2);
        drop(rx);
        assert!(!sink.offer("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn streams_one_frame_per_tick_in_order() {
        let (sink, rx) = frame_buffer(10);
        let events = Broadcaster::new(16);
        let mut sub = events.subscribe();

        sink.offer("first");
        sink.offer("second");

        let token = CancellationToken::new();
        let streamer = Box::new(FrameStreamer::new(rx, events, Duration::from_millis(33)));
        let task = tokio::spawn(streamer.run(token.clone()));

        let first = sub.recv().await.unwrap();
        assert_eq!(first, PushEvent::VideoFrame { image: Arc::from("first") });
        let second = sub.recv().await.unwrap();
        assert_eq!(second, PushEvent::VideoFrame { image: Arc::from("second") });
        assert_eq!(sink.pending(), 0);

        token.cancel();
        task.await.unwrap().unwrap();
    }
}
