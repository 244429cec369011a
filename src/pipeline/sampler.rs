use image::RgbImage;
use tracing::warn;

use crate::error::PipelineError;
use crate::pipeline::source::FrameSource;

#[derive(Debug, Clone)]
pub struct SampledFrame {
    /// Zero-based position in the stream.
    pub index: u64,
    pub image: RgbImage,
    /// Whether this frame gets a full recognition pass.
    pub due: bool,
}

#[derive(Debug)]
pub enum Sample {
    Frame(SampledFrame),
    EndOfStream(PipelineError),
}

/// Recognition interval giving roughly one pass per second at `fps`.
pub fn interval_for_fps(fps: u32) -> u32 {
    fps.max(1)
}

/// Pulls every frame from the source and marks each `interval`-th one due.
pub struct FrameSampler {
    source: Box<dyn FrameSource>,
    interval: u64,
    next_index: u64,
    ended: bool,
}

impl FrameSampler {
    pub fn new(source: Box<dyn FrameSource>, interval: u32) -> Self {
        if interval == 0 {
            warn!("Sampling interval 0 clamped to 1");
        }
        Self { source, interval: u64::from(interval.max(1)), next_index: 0, ended: false }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn frames_read(&self) -> u64 {
        self.next_index
    }

    pub fn is_due(&self, index: u64) -> bool {
        index % self.interval == 0
    }

    pub fn next_frame(&mut self) -> Sample {
        if self.ended {
            return Sample::EndOfStream(PipelineError::SourceFailure("source already closed".to_string()));
        }
        match self.source.read_frame() {
            Ok(image) => {
                let index = self.next_index;
                self.next_index += 1;
                Sample::Frame(SampledFrame { index, image, due: self.is_due(index) })
            }
            Err(e) => {
                self.ended = true;
                Sample::EndOfStream(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineResult;

    struct Countdown(usize);

    impl FrameSource for Countdown {
        fn read_frame(&mut self) -> PipelineResult<RgbImage> {
            if self.0 == 0 {
                return Err(PipelineError::SourceFailure("unplugged".into()));
            }
            self.0 -= 1;
            Ok(RgbImage::new(2, 2))
        }
    }

    fn due_flags(sampler: &mut FrameSampler) -> Vec<bool> {
        let mut flags = Vec::new();
        while let Sample::Frame(f) = sampler.next_frame() {
            flags.push(f.due);
        }
        flags
    }

    #[test]
    fn every_nth_frame_is_due() {
        let mut sampler = FrameSampler::new(Box::new(Countdown(7)), 3);
        assert_eq!(due_flags(&mut sampler), vec![true, false, false, true, false, false, true]);
        assert_eq!(sampler.frames_read(), 7);
    }

    #[test]
    fn zero_interval_marks_every_frame() {
        let mut sampler = FrameSampler::new(Box::new(Countdown(3)), 0);
        assert_eq!(sampler.interval(), 1);
        assert_eq!(due_flags(&mut sampler), vec![true, true, true]);
    }

    #[test]
    fn end_of_stream_is_sticky() {
        let mut sampler = FrameSampler::new(Box::new(Countdown(0)), 1);
        assert!(matches!(sampler.next_frame(), Sample::EndOfStream(PipelineError::SourceFailure(m)) if m == "unplugged"));
        assert!(matches!(sampler.next_frame(), Sample::EndOfStream(_)));
    }

    #[test]
    fn fps_maps_to_one_pass_per_second() {
        assert_eq!(interval_for_fps(30), 30);
        assert_eq!(interval_for_fps(0), 1);
    }
}
