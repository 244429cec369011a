use std::process::Command;
use tracing::debug;

use crate::pipeline::source::CameraConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Local capture device, e.g. `/dev/video0`.
    Device,
    /// Network stream (`rtsp://`, `http://`, ...).
    Stream,
    /// Recorded file, replayed at its native rate.
    File,
}

pub fn classify_source(source: &str) -> SourceKind {
    if source.contains("://") {
        SourceKind::Stream
    } else if source.starts_with("/dev/") {
        SourceKind::Device
    } else {
        SourceKind::File
    }
}

/// ffmpeg arguments that decode `config.source` into raw rgb24 frames of
/// exactly `width`x`height` on stdout.
pub fn build_capture_args(config: &CameraConfig) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into(), "-nostdin".into()];
    let kind = classify_source(&config.source);
    match kind {
        SourceKind::Device => {
            args.push("-f".into());
            args.push(config.format.clone().unwrap_or_else(|| default_device_format().to_string()));
            args.push("-framerate".into());
            args.push(config.fps.to_string());
            args.push("-video_size".into());
            args.push(format!("{}x{}", config.width, config.height));
        }
        SourceKind::Stream => {
            if let Some(fmt) = &config.format {
                args.push("-f".into());
                args.push(fmt.clone());
            }
            if config.source.starts_with("rtsp://") {
                args.push("-rtsp_transport".into());
                args.push("tcp".into());
            }
        }
        SourceKind::File => {
            if let Some(fmt) = &config.format {
                args.push("-f".into());
                args.push(fmt.clone());
            }
            args.push("-re".into());
        }
    }
    args.push("-i".into());
    args.push(config.source.clone());
    args.push("-an".into());
    args.push("-vf".into());
    args.push(format!("scale={}:{}", config.width, config.height));
    args.push("-r".into());
    args.push(config.fps.max(1).to_string());
    args.push("-f".into());
    args.push("rawvideo".into());
    args.push("-pix_fmt".into());
    args.push("rgb24".into());
    args.push("pipe:1".into());
    args
}

fn default_device_format() -> &'static str {
    if cfg!(target_os = "macos") {
        "avfoundation"
    } else {
        "v4l2"
    }
}

/// Version banner of the ffmpeg on PATH, or `None` if it cannot be run.
pub fn probe_ffmpeg() -> Option<String> {
    let output = Command::new("ffmpeg").args(["-hide_banner", "-version"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let banner = String::from_utf8_lossy(&output.stdout).lines().next()?.to_string();
    debug!("ffmpeg found: {}", banner);
    Some(banner)
}
