use schlieren_common::frame::Frame;
use schlieren_common::settings::{FilterKind, FilterSpec};

use super::kernel::{into_frame, map, to_plane, zip_with, Quantize};
use super::smoothing::gaussian_blur;
use super::traits::{FilterFault, FilterInput, FrameFilter};

const BLUR_SIZE: usize = 5;

/// `diff + amount * (diff - blur(diff))` with `amount = param / 50`.
pub struct UnsharpMask;

impl FrameFilter for UnsharpMask {
    fn kind(&self) -> FilterKind {
        FilterKind::UnsharpMask
    }

    fn apply(&self, input: &FilterInput<'_>, spec: &FilterSpec) -> Result<Frame, FilterFault> {
        let amount = spec.param() / 50.0;
        if amount == 0.0 {
            return Ok(input.diff.clone());
        }
        let diff = to_plane(input.diff);
        // The blurred copy is quantized to 8 bits before the high-pass is taken.
        let blur = map(&gaussian_blur(&diff, BLUR_SIZE), |v| v.round().clamp(0.0, 255.0));
        let sharpened = zip_with(&diff, &blur, |d, b| d + amount * (d - b));
        into_frame(&sharpened, self.name(), Quantize::Truncate)
    }
}
