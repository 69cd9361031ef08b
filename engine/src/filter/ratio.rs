use schlieren_common::frame::Frame;
use schlieren_common::settings::{FilterKind, FilterSpec};

use super::kernel::{into_frame, to_plane, zip_with, Quantize};
use super::traits::{FilterFault, FilterInput, FrameFilter};

const EPSILON: f64 = 1e-6;

/// Relative change against the background,
/// `|current - background| / (background + ε) * 255 * scale`.
///
/// Unlike the plain difference this weights dark regions of the background
/// pattern as strongly as bright ones. Identical frames give zero,
/// including on black pixels.
pub struct Ratio;

impl FrameFilter for Ratio {
    fn kind(&self) -> FilterKind {
        FilterKind::Ratio
    }

    fn apply(&self, input: &FilterInput<'_>, spec: &FilterSpec) -> Result<Frame, FilterFault> {
        if !input.current.same_dimensions(input.background) {
            return Err(FilterFault::Input {
                filter: self.name(),
                reason: format!(
                    "current {:?} vs background {:?}",
                    input.current.dimensions(),
                    input.background.dimensions()
                ),
            });
        }
        let scale = spec.param();
        let current = to_plane(input.current);
        let background = to_plane(input.background);
        let ratio = zip_with(&current, &background, |c, b| {
            (c - b).abs() / (b + EPSILON) * 255.0 * scale
        });
        into_frame(&ratio, self.name(), Quantize::Truncate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(current: &Frame, background: &Frame, scale: f64) -> Result<Frame, FilterFault> {
        let diff = current.abs_diff(background).unwrap_or_else(|_| current.clone());
        let input = FilterInput {
            diff: &diff,
            current,
            background,
        };
        Ratio.apply(&input, &FilterSpec::new(FilterKind::Ratio, scale))
    }

    #[test]
    fn identical_frames_give_zero_for_any_scale() {
        let frame = Frame::from_fn_gray(16, 16, |x, y| ((x * 16 + y) % 256) as u8);
        for scale in [1.0, 7.5, 100.0, 1e9] {
            let out = apply(&frame, &frame, scale).unwrap();
            assert!(out.data().iter().all(|&v| v == 0));
        }
    }

    #[test]
    fn scales_relative_change() {
        let background = Frame::from_fn_gray(4, 4, |_, _| 100);
        let current = Frame::from_fn_gray(4, 4, |_, _| 101);
        // 1% change * 255 * scale
        let out = apply(&current, &background, 10.0).unwrap();
        assert_eq!(out.sample(0, 0, 0), 25);
        let out = apply(&current, &background, 100.0).unwrap();
        assert_eq!(out.sample(0, 0, 0), 254);
    }

    #[test]
    fn black_background_saturates_on_change() {
        let background = Frame::from_fn_gray(2, 2, |_, _| 0);
        let current = Frame::from_fn_gray(2, 2, |x, _| if x == 0 { 1 } else { 0 });
        let out = apply(&current, &background, 1.0).unwrap();
        assert_eq!(out.data(), &[255, 0, 255, 0]);
    }

    #[test]
    fn mismatched_inputs_fault() {
        let a = Frame::from_fn_gray(2, 2, |_, _| 0);
        let b = Frame::from_fn_gray(3, 2, |_, _| 0);
        assert!(matches!(apply(&a, &b, 1.0), Err(FilterFault::Input { .. })));
    }
}
