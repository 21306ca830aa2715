//! Route handlers.
//!
//! Detection, annotation and SQLite work is synchronous and runs on
//! `spawn_blocking`. Failures become `{"error": "..."}` bodies.

use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::detector::{Detection, Status};
use crate::error::AppError;
use crate::imaging::{self, annotate::status_label, gps};
use crate::stores::{NewObservation, now_timestamp};
use crate::stream::PushEvent;
use crate::subsystems::comms::CommsState;
use crate::tally::Counts;

use super::AxumState;

/// Batch detections below this confidence (in percent) are discarded.
const MIN_BATCH_CONFIDENCE_PERCENT: f64 = 50.0;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "error": msg.to_string() }))).into_response()
}

fn join_error(e: tokio::task::JoinError) -> Response {
    error!("blocking task failed: {e}");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

// ── Live detection session ────────────────────────────────────────────────────

#[derive(Serialize)]
struct FrameResponse {
    infested_count: u64,
    not_infested_count: u64,
    boxes: Vec<[f64; 4]>,
    classes: Vec<f64>,
    confidences: Vec<f64>,
}

enum FrameFailure {
    Decode(AppError),
    Inference(AppError),
}

struct FrameOutcome {
    detections: Vec<(Detection, Status)>,
    totals: Counts,
    size: (u32, u32),
    annotated: Option<String>,
}

/// GET /detect
pub(super) async fn detect_probe() -> Json<serde_json::Value> {
    Json(json!({ "status": "Server running" }))
}

/// POST /detect: one raw image in the request body.
pub(super) async fn detect_frame(State(state): State<AxumState>, body: Bytes) -> Response {
    if body.is_empty() {
        warn!("no image data received");
        return json_error(StatusCode::BAD_REQUEST, "No image data received");
    }

    let comms = state.comms.clone();
    let started = std::time::Instant::now();
    let outcome = tokio::task::spawn_blocking(move || {
        let img = imaging::decode(&body).map_err(FrameFailure::Decode)?;
        let detections = comms
            .detector
            .detect(&img)
            .map_err(|e| FrameFailure::Inference(e.into()))?;
        let detections: Vec<(Detection, Status)> = detections
            .into_iter()
            .map(|d| {
                let status = comms.detector.status(&d);
                (d, status)
            })
            .collect();

        let mut rgb = img.to_rgb8();
        for (det, status) in &detections {
            let label = format!("{} {:.2}", det.class_name, det.confidence);
            comms.annotator.draw(&mut rgb, det, *status, &label);
        }
        let annotated = match comms.annotator.encode_jpeg_base64(&rgb) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!("annotated frame: {e}");
                None
            }
        };

        let infested = detections.iter().filter(|(_, s)| *s == Status::Infested).count() as u64;
        let totals = comms.tally.record(infested, detections.len() as u64 - infested);

        Ok::<_, FrameFailure>(FrameOutcome {
            detections,
            totals,
            size: (rgb.width(), rgb.height()),
            annotated,
        })
    })
    .await;

    let outcome = match outcome {
        Ok(Ok(o)) => o,
        Ok(Err(FrameFailure::Decode(e))) => {
            warn!("invalid image data: {e}");
            return json_error(StatusCode::BAD_REQUEST, "Invalid or empty image data");
        }
        Ok(Err(FrameFailure::Inference(e))) => {
            error!("inference error: {e}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Model inference failed");
        }
        Err(e) => return join_error(e),
    };

    let totals = outcome.totals;

    if !outcome.detections.is_empty() {
        let events: Vec<(Status, f32)> =
            outcome.detections.iter().map(|(d, s)| (*s, d.confidence)).collect();
        let store = state.comms.detections.clone();
        let timestamp = now_timestamp();
        match tokio::task::spawn_blocking(move || store.insert_detections(&timestamp, &events)).await
        {
            Ok(Ok(n)) => debug!(rows = n, "detections stored"),
            Ok(Err(e)) => error!("database error: {e}"),
            Err(e) => error!("database task failed: {e}"),
        }
    }

    if let Some(frame) = outcome.annotated {
        state.comms.frames.offer(frame);
    }
    state.comms.events.publish(PushEvent::counts(totals));

    let (width, height) = outcome.size;
    info!(
        channel_id = %state.channel_id,
        boxes = outcome.detections.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "frame detection completed"
    );

    Json(FrameResponse {
        infested_count: totals.infested,
        not_infested_count: totals.not_infested,
        boxes: outcome.detections.iter().map(|(d, _)| d.xywhn(width, height)).collect(),
        classes: outcome.detections.iter().map(|(d, _)| f64::from(d.class_id)).collect(),
        confidences: outcome.detections.iter().map(|(d, _)| f64::from(d.confidence)).collect(),
    })
    .into_response()
}

/// POST /reset_counts: store a session summary, then zero the tally.
pub(super) async fn reset_counts(State(state): State<AxumState>) -> Response {
    let comms = state.comms.clone();
    let result = tokio::task::spawn_blocking(move || {
        comms.tally.reset_with(|counts| {
            comms.detections.insert_summary(&now_timestamp(), counts).map(|_| ())
        })
    })
    .await;

    let before = match result {
        Ok(Ok(before)) => before,
        Ok(Err(e)) => {
            error!("database error: {e}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save summary");
        }
        Err(e) => return join_error(e),
    };

    info!(infested = before.infested, not_infested = before.not_infested, "session counts reset");
    state.comms.events.publish(PushEvent::counts(Counts::default()));

    let pct = before.percentages();
    Json(json!({
        "message": "Detection counts reset successfully",
        "infested_percentage": pct.infested_percentage,
        "not_infested_percentage": pct.not_infested_percentage,
    }))
    .into_response()
}

/// GET /get_summaries
pub(super) async fn get_summaries(State(state): State<AxumState>) -> Response {
    let store = state.comms.detections.clone();
    match tokio::task::spawn_blocking(move || store.list_summaries()).await {
        Ok(Ok(summaries)) => Json(summaries).into_response(),
        Ok(Err(e)) => {
            error!("error fetching summaries: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch summaries")
        }
        Err(e) => join_error(e),
    }
}

/// GET /get_percentages
pub(super) async fn get_percentages(State(state): State<AxumState>) -> Response {
    let comms = state.comms.clone();
    match tokio::task::spawn_blocking(move || comms.tally.percentages()).await {
        Ok(pct) => Json(pct).into_response(),
        Err(e) => join_error(e),
    }
}

/// DELETE /delete_summary/{id}
pub(super) async fn delete_summary(
    State(state): State<AxumState>,
    Path(id): Path<i64>,
) -> Response {
    let store = state.comms.detections.clone();
    match tokio::task::spawn_blocking(move || store.delete_summary(id)).await {
        Ok(Ok(existed)) => {
            debug!(id, existed, "summary delete");
            Json(json!({ "message": format!("Summary with id {id} deleted successfully") }))
                .into_response()
        }
        Ok(Err(e)) => {
            error!("error deleting summary: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete summary")
        }
        Err(e) => join_error(e),
    }
}

// ── Batch uploads ─────────────────────────────────────────────────────────────

struct Upload {
    name: String,
    bytes: Bytes,
}

#[derive(Serialize)]
struct BatchDetection {
    bounding_box: [f32; 4],
    status: Status,
    confidence: f64,
}

#[derive(Serialize)]
struct BatchImage {
    image: String,
    image_name: String,
    gps: serde_json::Value,
    detections: Vec<BatchDetection>,
}

/// POST /api/detect: every multipart part named `images` is one image.
pub(super) async fn detect_batch(
    State(state): State<AxumState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let Ok(mut multipart) = multipart else {
        return json_error(StatusCode::BAD_REQUEST, "No images uploaded");
    };

    let mut uploads = Vec::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("images") {
                    continue;
                }
                let name = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => uploads.push(Upload { name, bytes }),
                    Err(e) => return json_error(e.status(), e.body_text()),
                }
            }
            Ok(None) => break,
            Err(e) => return json_error(e.status(), e.body_text()),
        }
    }

    if uploads.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "No images uploaded");
    }

    let batch_id = state.comms.next_batch_id();
    let image_count = uploads.len();
    let comms = state.comms.clone();
    let result = tokio::task::spawn_blocking(move || {
        uploads
            .into_iter()
            .map(|upload| process_upload(&comms, batch_id, upload))
            .collect::<Result<Vec<_>, AppError>>()
    })
    .await;

    match result {
        Ok(Ok(images)) => {
            info!(
                channel_id = %state.channel_id,
                batch_id,
                images = image_count,
                "batch processed"
            );
            Json(images).into_response()
        }
        Ok(Err(e)) => {
            error!(batch_id, "batch failed: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
        Err(e) => join_error(e),
    }
}

fn process_upload(
    comms: &CommsState,
    batch_id: i64,
    upload: Upload,
) -> Result<BatchImage, AppError> {
    let fix = gps::extract(&upload.bytes);
    let img = imaging::decode(&upload.bytes)?;
    let detections = comms.detector.detect(&img)?;

    let mut rgb = img.to_rgb8();
    let mut kept = Vec::new();
    let mut observations = Vec::new();
    for det in &detections {
        let confidence = f64::from(det.confidence) * 100.0;
        if confidence < MIN_BATCH_CONFIDENCE_PERCENT {
            continue;
        }
        let status = comms.detector.status(det);
        comms.annotator.draw(&mut rgb, det, status, &status_label(status, confidence));
        observations.push(NewObservation {
            batch_id: Some(batch_id),
            image_name: &upload.name,
            gps: fix,
            status,
        });
        kept.push(BatchDetection { bounding_box: det.xyxy(), status, confidence });
    }

    if !observations.is_empty() {
        comms.plants.insert_observations(&observations)?;
    }

    let gps = match fix {
        Some(g) => json!({ "lat": g.lat, "lon": g.lon }),
        None => json!({}),
    };

    Ok(BatchImage {
        image: comms.annotator.encode_jpeg_base64(&rgb)?,
        image_name: upload.name,
        gps,
        detections: kept,
    })
}

/// GET /api/summary
pub(super) async fn batch_summary(State(state): State<AxumState>) -> Response {
    let store = state.comms.plants.clone();
    match tokio::task::spawn_blocking(move || store.batch_summary()).await {
        Ok(Ok(summary)) => Json(summary).into_response(),
        Ok(Err(e)) => {
            error!("batch summary: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
        Err(e) => join_error(e),
    }
}

/// DELETE /api/delete_batch/{batch_id}: `0` removes rows without a batch id.
pub(super) async fn delete_batch(
    State(state): State<AxumState>,
    Path(batch_id): Path<i64>,
) -> Response {
    let store = state.comms.plants.clone();
    match tokio::task::spawn_blocking(move || store.delete_batch(batch_id)).await {
        Ok(Ok(rows)) => {
            info!(batch_id, rows, "batch deleted");
            Json(json!({ "message": format!("Batch {batch_id} deleted successfully.") }))
                .into_response()
        }
        Ok(Err(e)) => {
            error!("delete batch: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
        Err(e) => join_error(e),
    }
}

// ── Health ────────────────────────────────────────────────────────────────────

/// GET /api/health
pub(super) async fn health(State(state): State<AxumState>) -> Response {
    let comms = state.comms.clone();
    let counts = match tokio::task::spawn_blocking(move || comms.tally.snapshot()).await {
        Ok(counts) => counts,
        Err(e) => return join_error(e),
    };
    Json(json!({
        "status": "ok",
        "detector": state.comms.detector.name(),
        "counts": {
            "infested": counts.infested,
            "not_infested": counts.not_infested,
        },
        "stream_subscribers": state.comms.events.subscriber_count(),
        "pending_frames": state.comms.frames.pending(),
    }))
    .into_response()
}
