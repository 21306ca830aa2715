//! Comms subsystem: the HTTP channel plus the frame streamer feeding its
//! push channel.
//!
//! [`build`] loads the detector, opens both stores and wires the frame
//! buffer; [`start`] spawns the resulting components.

pub mod axum_channel;
mod state;

pub use state::CommsState;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::detector::providers;
use crate::error::AppError;
use crate::imaging::annotate::Annotator;
use crate::stores::{DetectionStore, PlantStore};
use crate::stream::{Broadcaster, FrameStreamer, frame_buffer};
use crate::subsystems::runtime::{Component, SubsystemHandle, spawn_components};

use self::axum_channel::AxumChannel;

/// Build the shared state and the frame streamer that drains its buffer.
pub fn build(config: &Config) -> Result<(Arc<CommsState>, FrameStreamer), AppError> {
    let detector = providers::build(&config.detector)?;
    let annotator = Annotator::from_config(&config.annotate)?;
    let detections = DetectionStore::open(&config.store.detections_db)?;
    let plants = PlantStore::open(&config.store.plants_db)?;
    info!(
        detections_db = %config.store.detections_db.display(),
        plants_db = %config.store.plants_db.display(),
        "stores ready"
    );

    let events = Broadcaster::new(config.stream.channel_capacity);
    let (frames, frame_rx) = frame_buffer(config.stream.buffer_capacity);
    let streamer = FrameStreamer::new(
        frame_rx,
        events.clone(),
        Duration::from_millis(config.stream.frame_interval_ms),
    );

    let state = CommsState::new(detector, annotator, detections, plants, frames, events);
    Ok((Arc::new(state), streamer))
}

/// Build everything and spawn the HTTP channel and the frame streamer.
pub fn start(config: &Config, shutdown: CancellationToken) -> Result<SubsystemHandle, AppError> {
    let (state, streamer) = build(config)?;

    let components: Vec<Box<dyn Component>> = vec![
        Box::new(AxumChannel::new(
            "http",
            config.http.bind.clone(),
            config.http.max_body_bytes,
            state,
        )),
        Box::new(streamer),
    ];
    Ok(spawn_components(components, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn build_opens_stores_under_work_dir() {
        let temp = TempDir::new().unwrap();
        let cfg = Config::test_default(temp.path());
        let (state, _streamer) = build(&cfg).unwrap();
        assert_eq!(state.detector.name(), "fixed");
        assert!(cfg.store.detections_db.exists());
        assert!(cfg.store.plants_db.exists());
    }

    #[test]
    fn batch_ids_strictly_increase() {
        let temp = TempDir::new().unwrap();
        let (state, _streamer) = build(&Config::test_default(temp.path())).unwrap();
        let a = state.next_batch_id();
        let b = state.next_batch_id();
        let c = state.next_batch_id();
        assert!(a > 1_600_000_000);
        assert!(b > a && c > b);
    }

    #[tokio::test]
    async fn start_fails_on_unusable_bind_address() {
        let temp = TempDir::new().unwrap();
        let mut cfg = Config::test_default(temp.path());
        cfg.http.bind = "not-an-address".into();
        let token = CancellationToken::new();
        let handle = start(&cfg, token.clone()).unwrap();
        let err = handle.join().await.unwrap_err();
        assert!(err.to_string().contains("bind"));
        assert!(token.is_cancelled());
    }
}
