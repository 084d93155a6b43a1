//! Per-chunk detection path.
//!
//! Each chunk is pushed through the stream's feature extractor; every frame it
//! yields is fed to every detector in pool order. A firing is reported unless
//! the same detector reported less than the refractory window ago.

use crate::engine::FeatureExtractor;
use crate::session::pool::DetectorPool;
use std::time::{Duration, Instant};
use tracing::debug;

/// A reported detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Name the model was selected by.
    pub name: String,
    /// Timestamp of the chunk the detection occurred in, as sent by the client.
    pub timestamp: Option<u64>,
}

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Detected,
    NotDetected,
}

/// Routes audio of one stream through the extractor and the pool.
pub struct StreamingDispatcher {
    extractor: Box<dyn FeatureExtractor>,
    refractory: Duration,
    chunks: u64,
    frames: u64,
}

impl StreamingDispatcher {
    /// `extractor` must be fresh for this stream.
    pub fn new(extractor: Box<dyn FeatureExtractor>, refractory: Duration) -> Self {
        Self {
            extractor,
            refractory,
            chunks: 0,
            frames: 0,
        }
    }

    pub fn refractory(&self) -> Duration {
        self.refractory
    }

    /// Chunks processed so far in this stream.
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Feature frames processed so far in this stream.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Process one normalized chunk.
    ///
    /// `now` is the monotonic reading taken when the chunk was delivered; it
    /// is the only time used for refractory suppression.
    pub fn process_chunk(
        &mut self,
        pool: &mut DetectorPool,
        samples: &[i16],
        timestamp: Option<u64>,
        now: Instant,
    ) -> Vec<Detection> {
        let mut detections = Vec::new();
        self.chunks += 1;

        for features in self.extractor.process_streaming(samples) {
            self.frames += 1;

            for detector in pool.detectors_mut() {
                if !detector.engine_mut().process_streaming(&features) {
                    continue;
                }

                if detector.in_refractory(now, self.refractory) {
                    debug!(
                        "Skipping detection within refractory period for {}",
                        detector.wake_word()
                    );
                    continue;
                }

                debug!("Detected {}", detector.wake_word());
                detector.record_detection(now);
                detections.push(Detection {
                    name: detector.name().to_string(),
                    timestamp,
                });
            }
        }

        detections
    }

    /// End the stream: report the outcome and release the pool.
    pub fn finish(&mut self, pool: &mut DetectorPool) -> StreamOutcome {
        let outcome = if pool.any_detected() {
            StreamOutcome::Detected
        } else {
            StreamOutcome::NotDetected
        };
        debug!(
            "Stream finished after {} chunks / {} frames: {:?}",
            self.chunks, self.frames, outcome
        );
        pool.teardown();
        outcome
    }
}
