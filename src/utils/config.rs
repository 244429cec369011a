use std::env;
use std::path::PathBuf;

use crate::pipeline::face::DistanceMetric;
use crate::pipeline::matcher::{MatchPolicy, MatcherConfig};
use crate::pipeline::sampler::interval_for_fps;
use crate::pipeline::source::CameraConfig;
use crate::pipeline::PipelineConfig;

#[derive(Clone, Debug)]
pub struct Config {
    pub data: PathBuf,
    pub port: u16,
    pub camera: String,
    pub camera_format: Option<String>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub camera_fps: u32,
    pub sample_interval: u32,
    pub match_tolerance: f32,
    pub match_policy: MatchPolicy,
    pub match_metric: DistanceMetric,
    pub jpeg_quality: u8,
    pub font_path: Option<PathBuf>,
    pub face_auto_download: bool,
    pub face_confidence_threshold: f32,
    pub face_nms_iou_threshold: f32,
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let data = env::var("PRESENCE_DATA").unwrap_or_else(|_| "/presence-data".to_string());
        let port = parsed("PRESENCE_PORT").unwrap_or(9171);
        let camera = env::var("PRESENCE_CAMERA").unwrap_or_else(|_| "/dev/video0".to_string());
        let camera_format = env::var("PRESENCE_CAMERA_FORMAT").ok().filter(|v| !v.is_empty());
        let frame_width = parsed("PRESENCE_FRAME_WIDTH").unwrap_or(640);
        let frame_height = parsed("PRESENCE_FRAME_HEIGHT").unwrap_or(480);
        let camera_fps = parsed("PRESENCE_CAMERA_FPS").unwrap_or(30);
        let sample_interval = parsed("PRESENCE_SAMPLE_INTERVAL").unwrap_or_else(|| interval_for_fps(camera_fps));
        let match_tolerance = parsed("PRESENCE_MATCH_TOLERANCE").unwrap_or(0.55);
        let match_policy = parsed("PRESENCE_MATCH_POLICY").unwrap_or_default();
        let match_metric = parsed("PRESENCE_MATCH_METRIC").unwrap_or_default();
        let jpeg_quality = parsed::<u8>("PRESENCE_JPEG_QUALITY").unwrap_or(80).clamp(1, 100);
        let font_path = env::var("PRESENCE_FONT_PATH").ok().filter(|v| !v.is_empty()).map(PathBuf::from);
        Self {
            data: PathBuf::from(data),
            port,
            camera,
            camera_format,
            frame_width,
            frame_height,
            camera_fps,
            sample_interval,
            match_tolerance,
            match_policy,
            match_metric,
            jpeg_quality,
            font_path,
            face_auto_download: flag("PRESENCE_FACE_AUTO_DOWNLOAD", true),
            face_confidence_threshold: parsed("PRESENCE_FACE_CONFIDENCE_THRESHOLD").unwrap_or(0.5),
            face_nms_iou_threshold: parsed("PRESENCE_FACE_NMS_IOU_THRESHOLD").unwrap_or(0.4),
        }
    }

    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            source: self.camera.clone(),
            format: self.camera_format.clone(),
            width: self.frame_width,
            height: self.frame_height,
            fps: self.camera_fps,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            sampling_interval: self.sample_interval,
            matcher: MatcherConfig {
                tolerance: self.match_tolerance,
                metric: self.match_metric,
                policy: self.match_policy,
            },
        }
    }

    #[cfg(feature = "facial-recognition")]
    pub fn face_engine_options(&self) -> crate::pipeline::face::FaceEngineOptions {
        crate::pipeline::face::FaceEngineOptions {
            models_dir: self.data.join("models"),
            auto_download: self.face_auto_download,
            confidence_threshold: self.face_confidence_threshold,
            nms_iou_threshold: self.face_nms_iou_threshold,
        }
    }
}
