use image::RgbImage;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::utils::ffmpeg::build_capture_args;

/// A live stream of raw frames. Any error is a source failure and ends the
/// stream; implementations do not reconnect.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> PipelineResult<RgbImage>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    /// ffmpeg input: a v4l2 device, an RTSP URL, or a file.
    pub source: String,
    /// Forced input format (`v4l2`, `rtsp`, ...). ffmpeg probes when unset.
    pub format: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { source: "/dev/video0".to_string(), format: None, width: 640, height: 480, fps: 30 }
    }
}

impl CameraConfig {
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Camera capture through an `ffmpeg` child process emitting raw rgb24.
pub struct FfmpegCamera {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    buf: Vec<u8>,
}

impl FfmpegCamera {
    pub fn open(config: &CameraConfig) -> PipelineResult<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(PipelineError::SourceFailure(format!(
                "invalid frame size {}x{}",
                config.width, config.height
            )));
        }
        let args = build_capture_args(config);
        debug!("Spawning ffmpeg capture: ffmpeg {}", args.join(" "));
        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::SourceFailure(format!("failed to spawn ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::SourceFailure("ffmpeg stdout unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            // Drain stderr so ffmpeg never blocks on a full pipe
            std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    if !line.trim().is_empty() {
                        debug!(target: "ffmpeg", "{}", line);
                    }
                }
            });
        }
        info!("Camera opened: {} ({}x{} @ {} fps)", config.source, config.width, config.height, config.fps);
        Ok(Self { child, stdout, width: config.width, height: config.height, buf: vec![0u8; config.frame_len()] })
    }
}

impl FrameSource for FfmpegCamera {
    fn read_frame(&mut self) -> PipelineResult<RgbImage> {
        if let Err(e) = self.stdout.read_exact(&mut self.buf) {
            let status = self.child.try_wait().ok().flatten();
            return Err(PipelineError::SourceFailure(match status {
                Some(status) => format!("ffmpeg exited ({}): {}", status, e),
                None => format!("short read from camera: {}", e),
            }));
        }
        RgbImage::from_raw(self.width, self.height, self.buf.clone())
            .ok_or_else(|| PipelineError::SourceFailure("frame buffer size mismatch".to_string()))
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            if e.kind() != std::io::ErrorKind::InvalidInput {
                warn!("Failed to stop ffmpeg capture: {}", e);
            }
        }
        let _ = self.child.wait();
    }
}
