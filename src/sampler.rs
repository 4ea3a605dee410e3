//! Fixed-cadence frame sampling.

use log::warn;

use crate::types::Frame;
use crate::video::VideoDecoder;

/// Yields every `interval`-th decoded frame of one video.
///
/// Frame positions are 1-indexed and count every decoded frame, so with an
/// interval of 180 the sampler emits frames 180, 360, 540, ... A decode error
/// ends the sequence early; whatever was sampled up to that point stands.
pub struct FrameSampler<D: VideoDecoder> {
    decoder: D,
    interval: u64,
    video: String,
    timestamp: String,
    position: u64,
    finished: bool,
}

impl<D: VideoDecoder> FrameSampler<D> {
    /// Returns `None` when `interval` is zero.
    pub fn new(decoder: D, interval: u64, video: String, timestamp: String) -> Option<Self> {
        if interval == 0 {
            return None;
        }
        Some(Self {
            decoder,
            interval,
            video,
            timestamp,
            position: 0,
            finished: false,
        })
    }

    /// Number of frames decoded so far, sampled or not.
    pub fn frames_decoded(&self) -> u64 {
        self.position
    }
}

impl<D: VideoDecoder> Iterator for FrameSampler<D> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }
        loop {
            let image = match self.decoder.next_frame() {
                Ok(Some(image)) => image,
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    warn!(
                        "Decoding {} stopped after frame {}: {}",
                        self.video, self.position, e
                    );
                    self.finished = true;
                    return None;
                }
            };

            self.position += 1;
            if self.position % self.interval == 0 {
                return Some(Frame {
                    video: self.video.clone(),
                    index: self.position,
                    timestamp: self.timestamp.clone(),
                    image,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, Result};
    use image::RgbImage;

    struct Synthetic {
        remaining: u64,
        fail_after: Option<u64>,
        produced: u64,
    }

    impl VideoDecoder for Synthetic {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            if self.fail_after == Some(self.produced) {
                return Err(PipelineError::external("decoder", "corrupt packet"));
            }
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            self.produced += 1;
            Ok(Some(RgbImage::new(4, 4)))
        }
    }

    fn sample(n: u64, k: u64, fail_after: Option<u64>) -> Vec<u64> {
        let decoder = Synthetic {
            remaining: n,
            fail_after,
            produced: 0,
        };
        FrameSampler::new(decoder, k, "v".into(), "t".into())
            .unwrap()
            .map(|f| f.index)
            .collect()
    }

    #[test]
    fn emits_floor_n_over_k_frames() {
        for (n, k) in [(10, 1), (10, 3), (9, 3), (5, 7), (0, 4), (1000, 180)] {
            let indices = sample(n, k, None);
            assert_eq!(indices.len() as u64, n / k, "n={} k={}", n, k);
            for (i, idx) in indices.iter().enumerate() {
                assert_eq!(*idx, (i as u64 + 1) * k);
            }
        }
    }

    #[test]
    fn decode_error_ends_stream_early() {
        assert_eq!(sample(100, 10, Some(35)), vec![10, 20, 30]);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let decoder = Synthetic {
            remaining: 3,
            fail_after: None,
            produced: 0,
        };
        assert!(FrameSampler::new(decoder, 0, "v".into(), "t".into()).is_none());
    }

    #[test]
    fn frames_share_the_run_timestamp() {
        let decoder = Synthetic {
            remaining: 6,
            fail_after: None,
            produced: 0,
        };
        let mut sampler = FrameSampler::new(decoder, 2, "clip".into(), "20240101".into()).unwrap();
        let frames: Vec<_> = sampler.by_ref().collect();
        assert!(frames.iter().all(|f| f.timestamp == "20240101" && f.video == "clip"));
        assert_eq!(sampler.frames_decoded(), 6);
        assert!(sampler.next().is_none());
    }
}
