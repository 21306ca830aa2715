//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or the path given with `-f`), then applies `FAWSCAN_WORK_DIR`,
//! `FAWSCAN_LOG_LEVEL`, `FAWSCAN_MODEL_PATH` and `FAWSCAN_BIND` overrides.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

/// HTTP channel configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Socket address to bind the HTTP listener to.
    pub bind: String,
    /// Upper bound on request bodies (single frames and batch uploads).
    pub max_body_bytes: usize,
}

/// A canned detection returned by the `fixed` detector provider.
#[derive(Debug, Clone, Deserialize)]
pub struct FixedDetection {
    pub class_id: u32,
    pub confidence: f32,
    /// Box corners as fractions of the image size: `[x1, y1, x2, y2]`.
    pub bbox: [f32; 4],
}

/// Detector configuration (`[detector]`).
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// `"yolo"` (ONNX Runtime) or `"fixed"`.
    pub provider: String,
    /// ONNX model file, already resolved against `work_dir`.
    pub model_path: PathBuf,
    /// Square model input edge in pixels.
    pub input_size: u32,
    /// Minimum class score for a box to be kept (0..1).
    pub confidence: f32,
    /// IoU above which overlapping boxes of one class are suppressed.
    pub iou: f32,
    /// Class id that means "infested"; every other class is "not infested".
    pub infested_class: u32,
    pub class_names: Vec<String>,
    /// ONNX Runtime intra-op threads; `0` lets the runtime decide.
    pub intra_threads: usize,
    pub input_name: String,
    pub output_name: String,
    pub fixed: Vec<FixedDetection>,
}

/// Annotation / encoding configuration (`[annotate]`).
#[derive(Debug, Clone)]
pub struct AnnotateConfig {
    /// TTF/OTF font used for box labels. Labels are skipped when unset.
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
    pub box_thickness: u32,
    pub jpeg_quality: u8,
}

/// Push-channel configuration (`[stream]`).
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Annotated frames waiting to be streamed; newer frames are dropped when full.
    pub buffer_capacity: usize,
    /// Pause between two streamed frames.
    pub frame_interval_ms: u64,
    /// Per-subscriber backlog on the broadcast channel.
    pub channel_capacity: usize,
}

/// SQLite file locations (`[store]`), already resolved against `work_dir`.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub detections_db: PathBuf,
    pub plants_db: PathBuf,
}

/// Fully-resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    /// Working directory for all persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    /// Optional log file; stderr when unset.
    pub log_file: Option<PathBuf>,
    pub http: HttpConfig,
    pub detector: DetectorConfig,
    pub annotate: AnnotateConfig,
    pub stream: StreamConfig,
    pub store: StoreConfig,
}

/// Raw TOML shape: `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    server: RawServer,
    #[serde(default)]
    http: RawHttp,
    #[serde(default)]
    detector: RawDetector,
    #[serde(default)]
    annotate: RawAnnotate,
    #[serde(default)]
    stream: RawStream,
    #[serde(default)]
    store: RawStore,
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default = "default_name")]
    name: String,
    work_dir: String,
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

#[derive(Deserialize)]
struct RawHttp {
    #[serde(default = "default_http_bind")]
    bind: String,
    #[serde(default = "default_max_body_mb")]
    max_body_mb: usize,
}

impl Default for RawHttp {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
            max_body_mb: default_max_body_mb(),
        }
    }
}

#[derive(Deserialize)]
struct RawDetector {
    #[serde(default = "default_provider")]
    provider: String,
    #[serde(default = "default_model_path")]
    model_path: String,
    #[serde(default = "default_input_size")]
    input_size: u32,
    #[serde(default = "default_threshold")]
    confidence: f32,
    #[serde(default = "default_threshold")]
    iou: f32,
    #[serde(default)]
    infested_class: u32,
    #[serde(default = "default_class_names")]
    class_names: Vec<String>,
    #[serde(default)]
    intra_threads: usize,
    #[serde(default = "default_input_name")]
    input_name: String,
    #[serde(default = "default_output_name")]
    output_name: String,
    #[serde(default)]
    fixed: Vec<FixedDetection>,
}

impl Default for RawDetector {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_path: default_model_path(),
            input_size: default_input_size(),
            confidence: default_threshold(),
            iou: default_threshold(),
            infested_class: 0,
            class_names: default_class_names(),
            intra_threads: 0,
            input_name: default_input_name(),
            output_name: default_output_name(),
            fixed: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct RawAnnotate {
    #[serde(default)]
    font_path: Option<String>,
    #[serde(default = "default_font_size")]
    font_size: f32,
    #[serde(default = "default_box_thickness")]
    box_thickness: u32,
    #[serde(default = "default_jpeg_quality")]
    jpeg_quality: u8,
}

impl Default for RawAnnotate {
    fn default() -> Self {
        Self {
            font_path: None,
            font_size: default_font_size(),
            box_thickness: default_box_thickness(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

#[derive(Deserialize)]
struct RawStream {
    #[serde(default = "default_buffer_capacity")]
    buffer_capacity: usize,
    #[serde(default = "default_frame_interval_ms")]
    frame_interval_ms: u64,
    #[serde(default = "default_channel_capacity")]
    channel_capacity: usize,
}

impl Default for RawStream {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            frame_interval_ms: default_frame_interval_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Deserialize)]
struct RawStore {
    #[serde(default = "default_detections_db")]
    detections_db: String,
    #[serde(default = "default_plants_db")]
    plants_db: String,
}

impl Default for RawStore {
    fn default() -> Self {
        Self {
            detections_db: default_detections_db(),
            plants_db: default_plants_db(),
        }
    }
}

fn default_name() -> String { "fawscan".to_string() }
fn default_http_bind() -> String { "0.0.0.0:5000".to_string() }
fn default_max_body_mb() -> usize { 64 }
fn default_provider() -> String { "yolo".to_string() }
fn default_model_path() -> String { "models/best.onnx".to_string() }
fn default_input_size() -> u32 { 640 }
fn default_threshold() -> f32 { 0.5 }
fn default_class_names() -> Vec<String> {
    vec!["infested corn plant".to_string(), "not infested corn plant".to_string()]
}
fn default_input_name() -> String { "images".to_string() }
fn default_output_name() -> String { "output0".to_string() }
fn default_font_size() -> f32 { 50.0 }
fn default_box_thickness() -> u32 { 5 }
fn default_jpeg_quality() -> u8 { 80 }
fn default_buffer_capacity() -> usize { 10 }
fn default_frame_interval_ms() -> u64 { 33 }
fn default_channel_capacity() -> usize { 64 }
fn default_detections_db() -> String { "detections.db".to_string() }
fn default_plants_db() -> String { "corn_plants.db".to_string() }

/// Environment overrides applied on top of the TOML file.
#[derive(Debug, Default, Clone)]
pub struct Overrides<'a> {
    pub work_dir: Option<&'a str>,
    pub log_level: Option<&'a str>,
    pub model_path: Option<&'a str>,
    pub bind: Option<&'a str>,
}

/// Load config from `path` (default `config/default.toml`), then apply
/// env-var overrides.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let work_dir = env::var("FAWSCAN_WORK_DIR").ok();
    let log_level = env::var("FAWSCAN_LOG_LEVEL").ok();
    let model_path = env::var("FAWSCAN_MODEL_PATH").ok();
    let bind = env::var("FAWSCAN_BIND").ok();
    load_from(
        Path::new(path.unwrap_or("config/default.toml")),
        Overrides {
            work_dir: work_dir.as_deref(),
            log_level: log_level.as_deref(),
            model_path: model_path.as_deref(),
            bind: bind.as_deref(),
        },
    )
}

/// Internal loader: accepts an explicit path and overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(path: &Path, overrides: Overrides<'_>) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse(&raw, overrides)
        .map_err(|e| AppError::Config(format!("{} in {}", e, path.display())))
}

fn parse(raw: &str, overrides: Overrides<'_>) -> Result<Config, String> {
    let parsed: RawConfig = toml::from_str(raw).map_err(|e| format!("parse error: {e}"))?;

    let s = parsed.server;
    let work_dir = expand_home(overrides.work_dir.unwrap_or(&s.work_dir));
    let log_level = overrides.log_level.unwrap_or(&s.log_level).to_string();
    crate::logger::validate_level(&log_level).map_err(|e| e.to_string())?;

    let d = parsed.detector;
    if !(0.0..=1.0).contains(&d.confidence) || !(0.0..=1.0).contains(&d.iou) {
        return Err(format!(
            "detector thresholds must lie in 0..=1 (confidence={}, iou={})",
            d.confidence, d.iou
        ));
    }
    if d.input_size == 0 || d.input_size % 32 != 0 {
        return Err(format!(
            "detector.input_size must be a positive multiple of 32, got {}",
            d.input_size
        ));
    }

    let a = parsed.annotate;
    if !(1..=100).contains(&a.jpeg_quality) {
        return Err(format!("annotate.jpeg_quality must lie in 1..=100, got {}", a.jpeg_quality));
    }

    if parsed.stream.buffer_capacity == 0 || parsed.stream.channel_capacity == 0 {
        return Err("stream capacities must be greater than zero".to_string());
    }

    let model_path = overrides.model_path.unwrap_or(&d.model_path);

    Ok(Config {
        name: s.name,
        log_file: s.log_file.map(|p| resolve(&work_dir, &p)),
        log_level,
        http: HttpConfig {
            bind: overrides.bind.unwrap_or(&parsed.http.bind).to_string(),
            max_body_bytes: parsed.http.max_body_mb.saturating_mul(1024 * 1024),
        },
        detector: DetectorConfig {
            provider: d.provider,
            model_path: resolve(&work_dir, model_path),
            input_size: d.input_size,
            confidence: d.confidence,
            iou: d.iou,
            infested_class: d.infested_class,
            class_names: d.class_names,
            intra_threads: d.intra_threads,
            input_name: d.input_name,
            output_name: d.output_name,
            fixed: d.fixed,
        },
        annotate: AnnotateConfig {
            font_path: a.font_path.map(|p| resolve(&work_dir, &p)),
            font_size: a.font_size,
            box_thickness: a.box_thickness.max(1),
            jpeg_quality: a.jpeg_quality,
        },
        stream: StreamConfig {
            buffer_capacity: parsed.stream.buffer_capacity,
            frame_interval_ms: parsed.stream.frame_interval_ms.max(1),
            channel_capacity: parsed.stream.channel_capacity,
        },
        store: StoreConfig {
            detections_db: resolve(&work_dir, &parsed.store.detections_db),
            plants_db: resolve(&work_dir, &parsed.store.plants_db),
        },
        work_dir,
    })
}

/// Resolve `path` against `work_dir` unless it is absolute (after `~` expansion).
fn resolve(work_dir: &Path, path: &str) -> PathBuf {
    let p = expand_home(path);
    if p.is_absolute() { p } else { work_dir.join(p) }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

impl Config {
    /// Safe `Config` for tests: `fixed` detector, stores under `work_dir`,
    /// nothing listening.
    pub fn test_default(work_dir: &Path) -> Self {
        Self {
            name: "test".into(),
            work_dir: work_dir.to_path_buf(),
            log_level: "info".into(),
            log_file: None,
            http: HttpConfig {
                bind: "127.0.0.1:0".into(),
                max_body_bytes: default_max_body_mb() * 1024 * 1024,
            },
            detector: DetectorConfig {
                provider: "fixed".into(),
                model_path: work_dir.join("missing.onnx"),
                input_size: default_input_size(),
                confidence: default_threshold(),
                iou: default_threshold(),
                infested_class: 0,
                class_names: default_class_names(),
                intra_threads: 0,
                input_name: default_input_name(),
                output_name: default_output_name(),
                fixed: Vec::new(),
            },
            annotate: AnnotateConfig {
                font_path: None,
                font_size: default_font_size(),
                box_thickness: 2,
                jpeg_quality: default_jpeg_quality(),
            },
            stream: StreamConfig {
                buffer_capacity: default_buffer_capacity(),
                frame_interval_ms: 5,
                channel_capacity: default_channel_capacity(),
            },
            store: StoreConfig {
                detections_db: work_dir.join(default_detections_db()),
                plants_db: work_dir.join(default_plants_db()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[server]
work_dir = "/var/lib/fawscan"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Overrides::default()).unwrap();
        assert_eq!(cfg.name, "fawscan");
        assert_eq!(cfg.http.bind, "0.0.0.0:5000");
        assert_eq!(cfg.detector.provider, "yolo");
        assert_eq!(cfg.detector.input_size, 640);
        assert_eq!(cfg.detector.confidence, 0.5);
        assert_eq!(cfg.annotate.jpeg_quality, 80);
        assert_eq!(cfg.stream.buffer_capacity, 10);
        assert_eq!(cfg.stream.frame_interval_ms, 33);
    }

    #[test]
    fn relative_paths_resolve_against_work_dir() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Overrides::default()).unwrap();
        assert_eq!(cfg.store.detections_db, PathBuf::from("/var/lib/fawscan/detections.db"));
        assert_eq!(cfg.store.plants_db, PathBuf::from("/var/lib/fawscan/corn_plants.db"));
        assert_eq!(cfg.detector.model_path, PathBuf::from("/var/lib/fawscan/models/best.onnx"));
    }

    #[test]
    fn absolute_paths_kept() {
        let f = write_toml(
            r#"
[server]
work_dir = "/srv"
log_level = "debug"

[store]
plants_db = "/data/plants.db"
"#,
        );
        let cfg = load_from(f.path(), Overrides::default()).unwrap();
        assert_eq!(cfg.store.plants_db, PathBuf::from("/data/plants.db"));
        assert_eq!(cfg.store.detections_db, PathBuf::from("/srv/detections.db"));
    }

    #[test]
    fn fixed_detections_parse() {
        let f = write_toml(
            r#"
[server]
work_dir = "/srv"
log_level = "info"

[detector]
provider = "fixed"

[[detector.fixed]]
class_id = 0
confidence = 0.9
bbox = [0.1, 0.1, 0.4, 0.5]
"#,
        );
        let cfg = load_from(f.path(), Overrides::default()).unwrap();
        assert_eq!(cfg.detector.provider, "fixed");
        assert_eq!(cfg.detector.fixed.len(), 1);
        assert_eq!(cfg.detector.fixed[0].bbox, [0.1, 0.1, 0.4, 0.5]);
    }

    #[test]
    fn overrides_win() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(
            f.path(),
            Overrides {
                work_dir: Some("/tmp/fawscan-test"),
                log_level: Some("debug"),
                model_path: Some("/models/yolo.onnx"),
                bind: Some("127.0.0.1:9000"),
            },
        )
        .unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/fawscan-test"));
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.detector.model_path, PathBuf::from("/models/yolo.onnx"));
        assert_eq!(cfg.http.bind, "127.0.0.1:9000");
        assert_eq!(cfg.store.detections_db, PathBuf::from("/tmp/fawscan-test/detections.db"));
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let f = write_toml(
            r#"
[server]
work_dir = "/srv"
log_level = "info"

[detector]
confidence = 1.5
"#,
        );
        let msg = load_from(f.path(), Overrides::default()).unwrap_err().to_string();
        assert!(msg.contains("config error"));
        assert!(msg.contains("thresholds"));
    }

    #[test]
    fn odd_input_size_rejected() {
        let f = write_toml(
            r#"
[server]
work_dir = "/srv"
log_level = "info"

[detector]
input_size = 500
"#,
        );
        assert!(load_from(f.path(), Overrides::default()).is_err());
    }

    #[test]
    fn unknown_log_level_rejected() {
        let f = write_toml(
            r#"
[server]
work_dir = "/srv"
log_level = "chatty"
"#,
        );
        let msg = load_from(f.path(), Overrides::default()).unwrap_err().to_string();
        assert!(msg.contains("unrecognised log level"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), Overrides::default());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.fawscan");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".fawscan"));
    }

    #[test]
    fn relative_path_unchanged() {
        assert_eq!(expand_home("relative/path"), PathBuf::from("relative/path"));
    }
}
