use schlieren_common::frame::{PublishedFrame, TimestampedFrame};
use schlieren_common::settings::{Colormap, CompositorSettings, Settings};
use std::sync::Arc;
use tracing::debug;

use crate::compositor::compose;
use crate::filter::{FilterFault, FilterInput, FilterPipeline};
use crate::reference::{Observation, ReferenceModel, ReferencePhase};

/// One processing cycle's worth of state: the reference model and the
/// filter registry. Owned by the worker; nothing outside mutates it. The
/// registry is shared so a replacement processor keeps the same filters.
pub struct FrameProcessor {
    reference: ReferenceModel,
    pipeline: Arc<FilterPipeline>,
    last_fault: Option<FilterFault>,
}

impl FrameProcessor {
    pub fn new(pipeline: Arc<FilterPipeline>) -> Self {
        Self {
            reference: ReferenceModel::new(),
            pipeline,
            last_fault: None,
        }
    }

    pub fn pipeline(&self) -> &Arc<FilterPipeline> {
        &self.pipeline
    }

    pub fn reference(&self) -> &ReferenceModel {
        &self.reference
    }

    pub fn phase(&self) -> ReferencePhase {
        self.reference.phase()
    }

    /// Drop the background. The next frame seeds a new one.
    pub fn reset(&mut self) {
        self.reference.reset();
        self.last_fault = None;
    }

    /// Fault raised by the filter during the most recent cycle, if any.
    pub fn last_fault(&self) -> Option<&FilterFault> {
        self.last_fault.as_ref()
    }

    /// grayscale → reference update → |current - reference| → filter → compose.
    ///
    /// The frame that seeds the reference is published as a grayscale
    /// passthrough with `differenced == false`.
    pub fn process(&mut self, input: TimestampedFrame, settings: &Settings) -> PublishedFrame {
        let gray = input.frame.to_gray();
        let observation = self.reference.observe(&gray, &settings.reference);
        self.last_fault = None;

        let differenced = match (observation, self.reference.reference()) {
            (Observation::Seeded, _) | (_, None) => None,
            (_, Some(background)) => gray.abs_diff(background).ok().map(|diff| (diff, background)),
        };

        let (processed, differenced) = match differenced {
            None => {
                debug!(seq = input.seq, "reference seeded, passing frame through");
                let passthrough = CompositorSettings {
                    gain: 1.0,
                    colormap: Colormap::None,
                    crop: settings.compositor.crop,
                };
                (compose(&gray, &passthrough), false)
            }
            Some((diff, background)) => {
                let filter_input = FilterInput {
                    diff: &diff,
                    current: &gray,
                    background,
                };
                let outcome = self.pipeline.apply(settings.filter, &filter_input);
                self.last_fault = outcome.fault;
                (compose(&outcome.frame, &settings.compositor), true)
            }
        };

        PublishedFrame {
            seq: input.seq,
            captured_at_ms: input.captured_at_ms,
            raw: input.frame,
            processed,
            differenced,
        }
    }
}

impl Default for FrameProcessor {
    fn default() -> Self {
        Self::new(Arc::new(FilterPipeline::standard()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schlieren_common::frame::{Frame, Layout};
    use schlieren_common::settings::{
        FilterKind, FilterSpec, ReferenceSettings, UpdatePolicy,
    };

    const SIZE: u32 = 16;

    fn frame(seq: u64, spot: bool) -> TimestampedFrame {
        let gray = Frame::from_fn_gray(SIZE, SIZE, |x, y| {
            if spot && (7..10).contains(&x) && (7..10).contains(&y) {
                250
            } else {
                100
            }
        });
        TimestampedFrame::with_timestamp(gray.to_rgb(), seq as i64 * 33, seq)
    }

    fn settings(filter: FilterSpec, gain: f64) -> Settings {
        Settings {
            filter,
            reference: ReferenceSettings {
                update_interval: 1,
                alpha: 0.5,
                policy: UpdatePolicy::Blend,
            },
            compositor: CompositorSettings {
                gain,
                colormap: Colormap::None,
                crop: None,
            },
        }
    }

    fn peak(frame: &Frame) -> u8 {
        frame.data().iter().copied().max().unwrap_or(0)
    }

    fn zero_away_from_spot(frame: &Frame) -> bool {
        let near_spot = |x: u32, y: u32| (5..12).contains(&x) && (5..12).contains(&y);
        (0..SIZE).all(|y| (0..SIZE).all(|x| near_spot(x, y) || frame.sample(x, y, 0) == 0))
    }

    #[test]
    fn ten_frame_sequence_with_one_disturbed_frame() {
        let mut processor = FrameProcessor::default();
        let s = settings(FilterSpec::new(FilterKind::MedianFilter, 3.0), 2.0);
        let outputs: Vec<PublishedFrame> = (1..=10)
            .map(|i| processor.process(frame(i, i == 5), &s))
            .collect();

        // Frame 1 seeds the reference.
        assert!(!outputs[0].differenced);
        assert_eq!(outputs[0].processed.layout(), Layout::Rgb);
        assert!(outputs[0].processed.data().iter().all(|&v| v == 100));

        for out in &outputs[1..4] {
            assert!(out.differenced);
            assert_eq!(peak(&out.processed), 0, "frame {} not flat", out.seq);
        }

        // Reference blends to 175 inside the spot: |250 - 175| * 2.
        let spot = &outputs[4].processed;
        assert_eq!(spot.sample(8, 8, 0), 150);
        assert!(zero_away_from_spot(spot));

        // The blended reference leaves a decaying ghost afterwards.
        let mut previous = 150;
        for out in &outputs[5..] {
            let p = peak(&out.processed);
            assert!(p < previous, "frame {} peak {p} not below {previous}", out.seq);
            assert!(zero_away_from_spot(&out.processed));
            previous = p;
        }
    }

    #[test]
    fn frozen_reference_shows_only_the_disturbed_frame() {
        let mut processor = FrameProcessor::default();
        let mut s = settings(FilterSpec::new(FilterKind::MedianFilter, 3.0), 1.0);
        s.reference.update_interval = 0;
        let outputs: Vec<PublishedFrame> = (1..=6)
            .map(|i| processor.process(frame(i, i == 3), &s))
            .collect();
        assert_eq!(outputs[2].processed.sample(8, 8, 0), 150);
        for i in [1, 3, 4, 5] {
            assert_eq!(peak(&outputs[i].processed), 0);
        }
        assert_eq!(processor.phase(), ReferencePhase::SingleReference);
    }

    #[test]
    fn reset_makes_next_frame_a_passthrough() {
        let mut processor = FrameProcessor::default();
        let s = settings(FilterSpec::default(), 1.0);
        processor.process(frame(0, false), &s);
        assert!(processor.process(frame(1, false), &s).differenced);

        processor.reset();
        assert_eq!(processor.phase(), ReferencePhase::NoReference);
        let out = processor.process(frame(2, true), &s);
        assert!(!out.differenced);
        assert_eq!(out.raw.layout(), Layout::Rgb);
    }

    #[test]
    fn raw_frame_is_published_untouched() {
        let mut processor = FrameProcessor::default();
        let s = settings(FilterSpec::default(), 5.0);
        let input = frame(0, true);
        let raw = input.frame.clone();
        let out = processor.process(input, &s);
        assert_eq!(out.raw, raw);
        assert_eq!(out.captured_at_ms, 0);
    }
}
