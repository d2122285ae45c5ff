use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CribwatchConfig {
    pub source: SourceConfig,
    pub object: ObjectStageConfig,
    pub fall: FallStageConfig,
    pub toddler: ToddlerStageConfig,
    pub audio: AudioConfig,
    pub fusion: FusionConfig,
    pub status: StatusConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    /// Intake queue capacity of the shared frame distributor
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Nominal source frame rate (used by the synthetic source)
    #[serde(default = "default_source_fps")]
    pub fps: f64,

    /// Source resolution (width, height)
    #[serde(default = "default_source_resolution")]
    pub resolution: (u32, u32),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ObjectStageConfig {
    #[serde(default = "default_object_fps")]
    pub fps: f64,

    #[serde(default = "default_detector_confidence")]
    pub confidence_threshold: f32,

    /// Labels suppressed before publication (compared case-insensitively)
    #[serde(default = "default_excluded_labels")]
    pub excluded_labels: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FallStageConfig {
    #[serde(default = "default_fall_fps")]
    pub fps: f64,

    #[serde(default = "default_detector_confidence")]
    pub confidence_threshold: f32,

    /// Width/height ratio above which a person box counts as fallen
    #[serde(default = "default_fall_ratio_threshold")]
    pub fall_ratio_threshold: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToddlerStageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_toddler_fps")]
    pub fps: f64,

    /// Remote model reference in `<project>/<version>` form
    #[serde(default = "default_toddler_model_id")]
    pub model_id: String,

    /// API key for the remote classifier; falls back to `ROBOFLOW_API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_toddler_confidence")]
    pub confidence_threshold: f32,

    /// Floor applied to the `toddler` class on top of `confidence_threshold`
    #[serde(default = "default_toddler_min_confidence")]
    pub toddler_min_confidence: f32,

    /// Box overlap percentage forwarded to the remote service
    #[serde(default = "default_toddler_overlap")]
    pub overlap: u32,

    #[serde(default = "default_error_log_throttle_seconds")]
    pub error_log_throttle_seconds: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Rate every chunk is resampled to before inference
    #[serde(default = "default_audio_sample_rate")]
    pub sample_rate: u32,

    /// Length of each non-overlapping inference chunk
    #[serde(default = "default_chunk_seconds")]
    pub chunk_seconds: f64,

    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,

    /// Maximum inference rate
    #[serde(default = "default_infer_hz")]
    pub infer_hz: f64,

    #[serde(default = "default_enter_threshold")]
    pub enter_threshold: f32,

    #[serde(default = "default_exit_threshold")]
    pub exit_threshold: f32,

    #[serde(default = "default_alarm_window")]
    pub alarm_window: usize,

    #[serde(default = "default_alarm_min_positive")]
    pub alarm_min_positive: usize,

    #[serde(default = "default_audio_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_log_interval_seconds")]
    pub log_interval_seconds: f64,

    /// Class-name fragments that count towards the cry score
    #[serde(default = "default_cry_keywords")]
    pub cry_keywords: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FusionConfig {
    #[serde(default = "default_fusion_fps")]
    pub fps: f64,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Nominal resolution advertised by the outbound video track
    #[serde(default = "default_output_resolution")]
    pub output_resolution: (u32, u32),

    /// Frames held by the outbound video sink before the oldest is dropped
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,

    /// TrueType font for overlay labels; boxes are drawn without labels when unset
    #[serde(default)]
    pub font_path: Option<String>,

    #[serde(default = "default_font_size")]
    pub font_size: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StatusConfig {
    /// How long a still-image request waits for the first fused frame
    #[serde(default = "default_first_frame_timeout_seconds")]
    pub first_frame_timeout_seconds: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl ToddlerStageConfig {
    pub fn error_log_throttle(&self) -> Duration {
        Duration::from_secs_f64(self.error_log_throttle_seconds.max(0.0))
    }
}

impl StatusConfig {
    pub fn first_frame_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.first_frame_timeout_seconds.max(0.1))
    }
}

impl CribwatchConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("cribwatch.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// Environment variables use the `CRIBWATCH__` prefix and `__` between
    /// sections, e.g. `CRIBWATCH__AUDIO__ENTER_THRESHOLD=0.4`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("source.buffer_capacity", default_buffer_capacity() as i64)?
            .set_default("source.fps", default_source_fps())?
            .set_default(
                "source.resolution",
                vec![default_source_resolution().0, default_source_resolution().1],
            )?
            .set_default("object.fps", default_object_fps())?
            .set_default(
                "object.confidence_threshold",
                default_detector_confidence() as f64,
            )?
            .set_default("object.excluded_labels", default_excluded_labels())?
            .set_default("fall.fps", default_fall_fps())?
            .set_default(
                "fall.confidence_threshold",
                default_detector_confidence() as f64,
            )?
            .set_default(
                "fall.fall_ratio_threshold",
                default_fall_ratio_threshold() as f64,
            )?
            .set_default("toddler.enabled", default_true())?
            .set_default("toddler.fps", default_toddler_fps())?
            .set_default("toddler.model_id", default_toddler_model_id())?
            .set_default(
                "toddler.confidence_threshold",
                default_toddler_confidence() as f64,
            )?
            .set_default(
                "toddler.toddler_min_confidence",
                default_toddler_min_confidence() as f64,
            )?
            .set_default("toddler.overlap", default_toddler_overlap())?
            .set_default(
                "toddler.error_log_throttle_seconds",
                default_error_log_throttle_seconds(),
            )?
            .set_default("audio.enabled", default_true())?
            .set_default("audio.sample_rate", default_audio_sample_rate())?
            .set_default("audio.chunk_seconds", default_chunk_seconds())?
            .set_default("audio.window_seconds", default_window_seconds())?
            .set_default("audio.infer_hz", default_infer_hz())?
            .set_default("audio.enter_threshold", default_enter_threshold() as f64)?
            .set_default("audio.exit_threshold", default_exit_threshold() as f64)?
            .set_default("audio.alarm_window", default_alarm_window() as i64)?
            .set_default(
                "audio.alarm_min_positive",
                default_alarm_min_positive() as i64,
            )?
            .set_default(
                "audio.queue_capacity",
                default_audio_queue_capacity() as i64,
            )?
            .set_default("audio.log_interval_seconds", default_log_interval_seconds())?
            .set_default("audio.cry_keywords", default_cry_keywords())?
            .set_default("fusion.fps", default_fusion_fps())?
            .set_default("fusion.jpeg_quality", default_jpeg_quality())?
            .set_default(
                "fusion.output_resolution",
                vec![default_output_resolution().0, default_output_resolution().1],
            )?
            .set_default("fusion.sink_capacity", default_sink_capacity() as i64)?
            .set_default("fusion.font_size", default_font_size() as f64)?
            .set_default(
                "status.first_frame_timeout_seconds",
                default_first_frame_timeout_seconds(),
            )?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("CRIBWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: CribwatchConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.buffer_capacity == 0 {
            return Err(ConfigError::Message(
                "Source buffer capacity must be greater than 0".to_string(),
            ));
        }

        if self.source.resolution.0 == 0 || self.source.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Source resolution must be greater than 0".to_string(),
            ));
        }

        for (name, fps) in [
            ("source", self.source.fps),
            ("object", self.object.fps),
            ("fall", self.fall.fps),
            ("toddler", self.toddler.fps),
            ("fusion", self.fusion.fps),
        ] {
            if !(fps > 0.0) {
                return Err(ConfigError::Message(format!(
                    "{} fps must be greater than 0",
                    name
                )));
            }
        }

        for (name, value) in [
            ("object.confidence_threshold", self.object.confidence_threshold),
            ("fall.confidence_threshold", self.fall.confidence_threshold),
            ("toddler.confidence_threshold", self.toddler.confidence_threshold),
            (
                "toddler.toddler_min_confidence",
                self.toddler.toddler_min_confidence,
            ),
            ("audio.enter_threshold", self.audio.enter_threshold),
            ("audio.exit_threshold", self.audio.exit_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Message(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.fall.fall_ratio_threshold <= 0.0 {
            return Err(ConfigError::Message(
                "Fall ratio threshold must be greater than 0".to_string(),
            ));
        }

        if self.toddler.enabled {
            crate::stage::ModelRef::parse(&self.toddler.model_id)
                .map_err(|e| ConfigError::Message(e.to_string()))?;
        }

        if self.audio.exit_threshold > self.audio.enter_threshold {
            return Err(ConfigError::Message(
                "Audio exit threshold must not exceed the enter threshold".to_string(),
            ));
        }

        if self.audio.sample_rate == 0 || self.audio.chunk_seconds <= 0.0 {
            return Err(ConfigError::Message(
                "Audio sample rate and chunk length must be greater than 0".to_string(),
            ));
        }

        if self.audio.alarm_window == 0
            || self.audio.alarm_min_positive == 0
            || self.audio.alarm_min_positive > self.audio.alarm_window
        {
            return Err(ConfigError::Message(
                "Audio alarm needs 0 < alarm_min_positive <= alarm_window".to_string(),
            ));
        }

        if self.audio.queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Audio queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.fusion.jpeg_quality == 0 || self.fusion.jpeg_quality > 100 {
            return Err(ConfigError::Message(
                "Fusion JPEG quality must be within 1..=100".to_string(),
            ));
        }

        if self.fusion.sink_capacity == 0 {
            return Err(ConfigError::Message(
                "Fusion sink capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for CribwatchConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            object: ObjectStageConfig::default(),
            fall: FallStageConfig::default(),
            toddler: ToddlerStageConfig::default(),
            audio: AudioConfig::default(),
            fusion: FusionConfig::default(),
            status: StatusConfig {
                first_frame_timeout_seconds: default_first_frame_timeout_seconds(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            fps: default_source_fps(),
            resolution: default_source_resolution(),
        }
    }
}

impl Default for ObjectStageConfig {
    fn default() -> Self {
        Self {
            fps: default_object_fps(),
            confidence_threshold: default_detector_confidence(),
            excluded_labels: default_excluded_labels(),
        }
    }
}

impl Default for FallStageConfig {
    fn default() -> Self {
        Self {
            fps: default_fall_fps(),
            confidence_threshold: default_detector_confidence(),
            fall_ratio_threshold: default_fall_ratio_threshold(),
        }
    }
}

impl Default for ToddlerStageConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            fps: default_toddler_fps(),
            model_id: default_toddler_model_id(),
            api_key: None,
            confidence_threshold: default_toddler_confidence(),
            toddler_min_confidence: default_toddler_min_confidence(),
            overlap: default_toddler_overlap(),
            error_log_throttle_seconds: default_error_log_throttle_seconds(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            sample_rate: default_audio_sample_rate(),
            chunk_seconds: default_chunk_seconds(),
            window_seconds: default_window_seconds(),
            infer_hz: default_infer_hz(),
            enter_threshold: default_enter_threshold(),
            exit_threshold: default_exit_threshold(),
            alarm_window: default_alarm_window(),
            alarm_min_positive: default_alarm_min_positive(),
            queue_capacity: default_audio_queue_capacity(),
            log_interval_seconds: default_log_interval_seconds(),
            cry_keywords: default_cry_keywords(),
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            fps: default_fusion_fps(),
            jpeg_quality: default_jpeg_quality(),
            output_resolution: default_output_resolution(),
            sink_capacity: default_sink_capacity(),
            font_path: None,
            font_size: default_font_size(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_buffer_capacity() -> usize {
    5
}
fn default_source_fps() -> f64 {
    30.0
}
fn default_source_resolution() -> (u32, u32) {
    (640, 480)
}

fn default_object_fps() -> f64 {
    3.0
}
fn default_detector_confidence() -> f32 {
    0.5
}
fn default_excluded_labels() -> Vec<String> {
    vec!["person".to_string()]
}

fn default_fall_fps() -> f64 {
    2.0
}
fn default_fall_ratio_threshold() -> f32 {
    1.2
}

fn default_toddler_fps() -> f64 {
    1.0
}
fn default_toddler_model_id() -> String {
    "toddler-detection-yxicj-sdfde/2".to_string()
}
fn default_toddler_confidence() -> f32 {
    0.3
}
fn default_toddler_min_confidence() -> f32 {
    0.8
}
fn default_toddler_overlap() -> u32 {
    30
}
fn default_error_log_throttle_seconds() -> f64 {
    10.0
}

fn default_audio_sample_rate() -> u32 {
    16_000
}
fn default_chunk_seconds() -> f64 {
    1.0
}
fn default_window_seconds() -> f64 {
    2.0
}
fn default_infer_hz() -> f64 {
    2.0
}
fn default_enter_threshold() -> f32 {
    0.35
}
fn default_exit_threshold() -> f32 {
    0.20
}
fn default_alarm_window() -> usize {
    5
}
fn default_alarm_min_positive() -> usize {
    3
}
fn default_audio_queue_capacity() -> usize {
    50
}
fn default_log_interval_seconds() -> f64 {
    2.0
}
fn default_cry_keywords() -> Vec<String> {
    ["baby cry", "infant cry", "crying", "sobbing", "wail"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_fusion_fps() -> f64 {
    10.0
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_output_resolution() -> (u32, u32) {
    (1280, 720)
}
fn default_sink_capacity() -> usize {
    10
}
fn default_font_size() -> f32 {
    16.0
}

fn default_first_frame_timeout_seconds() -> f64 {
    5.0
}

fn default_event_bus_capacity() -> usize {
    100
}
