pub mod attendance;
pub mod face;
pub mod matcher;
pub mod registry;
pub mod render;
pub mod sampler;
pub mod source;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Local};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::stats::Stats;
use attendance::{AttendanceDeduplicator, RecordOutcome};
use matcher::{FaceMatcher, Label, MatchResult, MatcherConfig};
use render::FrameRenderer;
use sampler::{FrameSampler, Sample, SampledFrame};

/// Behavior-defining knobs, supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// Frames between recognition passes; 0 behaves as 1.
    pub sampling_interval: u32,
    pub matcher: MatcherConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { sampling_interval: 30, matcher: MatcherConfig::default() }
    }
}

/// The most recent committed recognition output and the frame it came from.
/// Frames between passes are drawn with these results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LastResults {
    pub computed_at: Option<u64>,
    pub results: Vec<MatchResult>,
}

impl LastResults {
    /// Frames elapsed between the committed pass and `index`.
    pub fn staleness(&self, index: u64) -> Option<u64> {
        self.computed_at.map(|at| index.saturating_sub(at))
    }
}

#[derive(Debug)]
pub enum Step {
    Frame { index: u64, recognised: bool, jpeg: Bytes },
    EndOfStream,
}

type Clock = Box<dyn Fn() -> DateTime<FixedOffset> + Send>;

pub struct Pipeline {
    sampler: FrameSampler,
    matcher: FaceMatcher,
    dedup: Arc<AttendanceDeduplicator>,
    renderer: FrameRenderer,
    stats: Arc<Stats>,
    last: LastResults,
    clock: Clock,
}

impl Pipeline {
    pub fn new(
        sampler: FrameSampler,
        matcher: FaceMatcher,
        dedup: Arc<AttendanceDeduplicator>,
        renderer: FrameRenderer,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            sampler,
            matcher,
            dedup,
            renderer,
            stats,
            last: LastResults::default(),
            clock: Box::new(|| Local::now().fixed_offset()),
        }
    }

    /// Replace the wall clock used to stamp attendance events.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<FixedOffset> + Send + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    pub fn last_results(&self) -> &LastResults {
        &self.last
    }

    /// One loop iteration: capture, recognise if due, render.
    pub fn step(&mut self) -> PipelineResult<Step> {
        let frame = match self.sampler.next_frame() {
            Sample::Frame(frame) => frame,
            Sample::EndOfStream(cause) => {
                warn!("Frame source ended: {}", cause);
                return Ok(Step::EndOfStream);
            }
        };
        self.stats.inc_frames_captured();
        if frame.due {
            self.recognise(&frame);
        }
        let jpeg = self.renderer.render(&frame.image, &self.last)?;
        Ok(Step::Frame { index: frame.index, recognised: frame.due, jpeg })
    }

    fn recognise(&mut self, frame: &SampledFrame) {
        let results = match self.matcher.match_frame(&frame.image) {
            Ok(results) => results,
            Err(e) => {
                // Boxes from before this frame are out of date; draw none
                // until the next good pass
                self.stats.inc_inference_failures();
                warn!(frame = frame.index, "Recognition pass failed: {}", e);
                self.last = LastResults { computed_at: Some(frame.index), results: Vec::new() };
                return;
            }
        };
        self.stats.inc_recognition_passes();
        self.stats.inc_faces_detected(results.len() as u64);

        if !results.is_empty() {
            let now = (self.clock)();
            for result in &results {
                if let Label::Known(identity) = &result.label {
                    self.stats.inc_faces_matched();
                    match self.dedup.record(&identity.id, &identity.display_name, &now) {
                        Ok(RecordOutcome::Inserted) => self.stats.inc_events_inserted(),
                        Ok(RecordOutcome::Skipped) => self.stats.inc_events_skipped(),
                        Err(e) => {
                            self.stats.inc_persist_failures();
                            error!(frame = frame.index, student_id = %identity.id, "{}", e);
                        }
                    }
                }
            }
        }

        debug!(frame = frame.index, faces = results.len(), "Recognition pass committed");
        self.last = LastResults { computed_at: Some(frame.index), results };
        self.stats.set_last_committed_frame(frame.index);
    }

    /// Drive the loop until the source ends or `stop` is raised, publishing
    /// each encoded frame. Returns the number of frames emitted.
    pub fn run(mut self, frames: broadcast::Sender<Bytes>, stop: Arc<AtomicBool>) -> u64 {
        let mut emitted = 0u64;
        while !stop.load(Ordering::Relaxed) {
            match self.step() {
                Ok(Step::Frame { jpeg, .. }) => {
                    emitted += 1;
                    // No viewers is fine
                    let _ = frames.send(jpeg);
                }
                Ok(Step::EndOfStream) => break,
                Err(e @ PipelineError::Encode(_)) => error!("Dropping frame: {}", e),
                Err(e) => {
                    error!("Pipeline stopped: {}", e);
                    break;
                }
            }
        }
        info!("Pipeline loop finished after {} frames", emitted);
        emitted
    }

    /// Run the loop on a blocking worker.
    pub fn start(self, frames: broadcast::Sender<Bytes>) -> PipelineHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let join = tokio::task::spawn_blocking(move || self.run(frames, flag));
        PipelineHandle { stop, join }
    }
}

pub struct PipelineHandle {
    stop: Arc<AtomicBool>,
    join: tokio::task::JoinHandle<u64>,
}

impl PipelineHandle {
    /// Ask the loop to exit after the frame in flight.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn join(self) -> anyhow::Result<u64> {
        Ok(self.join.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staleness_counts_frames_since_commit() {
        let last = LastResults { computed_at: Some(30), results: vec![] };
        assert_eq!(last.staleness(45), Some(15));
        assert_eq!(LastResults::default().staleness(3), None);
    }
}
