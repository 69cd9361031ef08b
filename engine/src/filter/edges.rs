use schlieren_common::frame::Frame;
use schlieren_common::settings::{FilterKind, FilterSpec};

use super::kernel::{
    correlate_separable, deriv_kernel, into_frame, smooth_kernel, to_plane, zip_with, Border,
    Quantize,
};
use super::traits::{FilterFault, FilterInput, FrameFilter};

/// Gradient magnitude `hypot(Gx, Gy)` with Sobel derivatives.
pub struct SobelEdges;

impl FrameFilter for SobelEdges {
    fn kind(&self) -> FilterKind {
        FilterKind::SobelEdges
    }

    fn apply(&self, input: &FilterInput<'_>, spec: &FilterSpec) -> Result<Frame, FilterFault> {
        let k = spec.kernel_size();
        let src = to_plane(input.diff);
        let (d, s) = (deriv_kernel(1, k), smooth_kernel(k));
        let gx = correlate_separable(&src, &d, &s, Border::Reflect101);
        let gy = correlate_separable(&src, &s, &d, Border::Reflect101);
        into_frame(&zip_with(&gx, &gy, f64::hypot), self.name(), Quantize::AbsRound)
    }
}

/// Second-derivative edge emphasis, `d²/dx² + d²/dy²`.
pub struct LaplacianEdges;

impl FrameFilter for LaplacianEdges {
    fn kind(&self) -> FilterKind {
        FilterKind::LaplacianEdges
    }

    fn apply(&self, input: &FilterInput<'_>, spec: &FilterSpec) -> Result<Frame, FilterFault> {
        let k = spec.kernel_size();
        let src = to_plane(input.diff);
        // Aperture 1 is the 4-neighbour kernel: no smoothing across the derivative.
        let (d, s) = (deriv_kernel(2, k), smooth_kernel(k));
        let dxx = correlate_separable(&src, &d, &s, Border::Reflect101);
        let dyy = correlate_separable(&src, &s, &d, Border::Reflect101);
        into_frame(&zip_with(&dxx, &dyy, |a, b| a + b), self.name(), Quantize::AbsRound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(filter: &dyn FrameFilter, diff: &Frame, param: f64) -> Frame {
        let input = FilterInput {
            diff,
            current: diff,
            background: diff,
        };
        filter
            .apply(&input, &FilterSpec::new(filter.kind(), param))
            .unwrap()
    }

    #[test]
    fn flat_input_has_no_edges() {
        let flat = Frame::from_fn_gray(10, 8, |_, _| 77);
        for k in [1.0, 3.0, 5.0, 7.0] {
            assert!(apply(&SobelEdges, &flat, k).data().iter().all(|&v| v == 0));
            assert!(apply(&LaplacianEdges, &flat, k).data().iter().all(|&v| v == 0));
        }
    }

    #[test]
    fn sobel_responds_to_vertical_step() {
        let step = Frame::from_fn_gray(10, 6, |x, _| if x < 5 { 0 } else { 20 });
        let out = apply(&SobelEdges, &step, 3.0);
        // (1 + 2 + 1) * 20 at the step, on both sides.
        assert_eq!(out.sample(4, 3, 0), 80);
        assert_eq!(out.sample(5, 3, 0), 80);
        assert_eq!(out.sample(1, 3, 0), 0);
        assert_eq!(out.sample(8, 3, 0), 0);
    }

    #[test]
    fn sobel_aperture_one_is_central_difference() {
        let ramp = Frame::from_fn_gray(8, 4, |x, _| (x * 10) as u8);
        let out = apply(&SobelEdges, &ramp, 1.0);
        assert_eq!(out.sample(3, 2, 0), 20);
    }

    #[test]
    fn laplacian_of_impulse() {
        let impulse = Frame::from_fn_gray(7, 7, |x, y| if x == 3 && y == 3 { 10 } else { 0 });
        let out = apply(&LaplacianEdges, &impulse, 1.0);
        assert_eq!(out.sample(3, 3, 0), 40);
        assert_eq!(out.sample(2, 3, 0), 10);
        assert_eq!(out.sample(2, 2, 0), 0);
    }

    #[test]
    fn large_responses_saturate() {
        let step = Frame::from_fn_gray(12, 12, |x, _| if x < 6 { 0 } else { 255 });
        let out = apply(&SobelEdges, &step, 7.0);
        assert_eq!(out.sample(6, 6, 0), 255);
    }
}
