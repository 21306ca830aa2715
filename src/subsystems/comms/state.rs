//! Shared state handed to every HTTP handler as `Arc<CommsState>`.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use crate::detector::Detector;
use crate::imaging::annotate::Annotator;
use crate::stores::{DetectionStore, PlantStore};
use crate::stream::{Broadcaster, FrameSink};
use crate::tally::SessionTally;

pub struct CommsState {
    pub detector: Arc<Detector>,
    pub annotator: Arc<Annotator>,
    pub tally: SessionTally,
    pub detections: DetectionStore,
    pub plants: PlantStore,
    pub frames: FrameSink,
    pub events: Broadcaster,
    last_batch_id: AtomicI64,
}

impl CommsState {
    pub fn new(
        detector: Detector,
        annotator: Annotator,
        detections: DetectionStore,
        plants: PlantStore,
        frames: FrameSink,
        events: Broadcaster,
    ) -> Self {
        Self {
            detector: Arc::new(detector),
            annotator: Arc::new(annotator),
            tally: SessionTally::new(),
            detections,
            plants,
            frames,
            events,
            last_batch_id: AtomicI64::new(0),
        }
    }

    /// Batch id for a new upload: the current unix time in seconds, bumped
    /// past the previous id when two uploads land in the same second.
    pub fn next_batch_id(&self) -> i64 {
        let now = Utc::now().timestamp();
        let mut last = self.last_batch_id.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self.last_batch_id.compare_exchange_weak(
                last,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}
