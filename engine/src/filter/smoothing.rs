use image::Luma;
use schlieren_common::frame::Frame;
use schlieren_common::settings::{FilterKind, FilterSpec};

use super::kernel::{
    at, correlate_separable, gaussian_kernel, into_frame, to_plane, Border, Plane, Quantize,
};
use super::traits::{FilterFault, FilterInput, FrameFilter};

/// Bilateral neighbourhood diameter.
const BILATERAL_DIAMETER: usize = 9;

/// Isotropic blur; smooths sensor noise in the difference signal.
pub struct GaussianBlur;

impl FrameFilter for GaussianBlur {
    fn kind(&self) -> FilterKind {
        FilterKind::GaussianBlur
    }

    fn apply(&self, input: &FilterInput<'_>, spec: &FilterSpec) -> Result<Frame, FilterFault> {
        let k = spec.kernel_size();
        if k == 1 {
            return Ok(input.diff.clone());
        }
        into_frame(&gaussian_blur(&to_plane(input.diff), k), self.name(), Quantize::Round)
    }
}

pub(crate) fn gaussian_blur(src: &Plane, ksize: usize) -> Plane {
    let kernel = gaussian_kernel(ksize);
    correlate_separable(src, &kernel, &kernel, Border::Reflect101)
}

/// Rank-order denoise. Removes isolated speckle while keeping edges.
pub struct MedianFilter;

impl FrameFilter for MedianFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::MedianFilter
    }

    fn apply(&self, input: &FilterInput<'_>, spec: &FilterSpec) -> Result<Frame, FilterFault> {
        let k = spec.kernel_size();
        if k == 1 {
            return Ok(input.diff.clone());
        }
        let src = input.diff.to_luma8();
        let (w, h) = (src.width() as usize, src.height() as usize);
        let r = (k / 2) as isize;
        let mut window = Vec::with_capacity(k * k);

        let out = Frame::from_fn_gray(src.width(), src.height(), |x, y| {
            window.clear();
            for dy in -r..=r {
                let yy = Border::Replicate.index(y as isize + dy, h) as u32;
                for dx in -r..=r {
                    let xx = Border::Replicate.index(x as isize + dx, w) as u32;
                    window.push(src.get_pixel(xx, yy)[0]);
                }
            }
            let mid = window.len() / 2;
            *window.select_nth_unstable(mid).1
        });
        Ok(out)
    }
}

/// Edge-preserving smoothing over a fixed 9-pixel neighbourhood. The
/// parameter is used as both the range and the spatial sigma.
pub struct BilateralFilter;

impl FrameFilter for BilateralFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::BilateralFilter
    }

    fn apply(&self, input: &FilterInput<'_>, spec: &FilterSpec) -> Result<Frame, FilterFault> {
        let sigma = spec.param().trunc().max(1.0);
        let src = to_plane(input.diff);
        let radius = (BILATERAL_DIAMETER / 2) as i64;

        let space_coeff = -0.5 / (sigma * sigma);
        let color_coeff = -0.5 / (sigma * sigma);

        // Circular support, as offsets with their spatial weights.
        let mut taps = Vec::new();
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let r2 = (dx * dx + dy * dy) as f64;
                if r2.sqrt() <= radius as f64 {
                    taps.push((dx, dy, (r2 * space_coeff).exp()));
                }
            }
        }
        let color_weight: Vec<f64> = (0..256)
            .map(|d| ((d * d) as f64 * color_coeff).exp())
            .collect();

        let out = Plane::from_fn(src.width(), src.height(), |x, y| {
            let center = src.get_pixel(x, y)[0];
            let (mut sum, mut wsum) = (0.0, 0.0);
            for &(dx, dy, ws) in &taps {
                let v = at(&src, x as i64 + dx, y as i64 + dy, Border::Reflect101);
                let wc = color_weight[(v - center).abs() as usize];
                sum += v * ws * wc;
                wsum += ws * wc;
            }
            Luma([sum / wsum])
        });
        into_frame(&out, self.name(), Quantize::Round)
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

    fn impulse(size: u32, value: u8) -> Frame {
        let c = size / 2;
        Frame::from_fn_gray(size, size, |x, y| if x == c && y == c { value } else { 0 })
    }

    #[test]
    fn gaussian_preserves_flat_fields() {
        let flat = Frame::from_fn_gray(7, 5, |_, _| 90);
        for k in [1.0, 3.0, 8.0, 21.0] {
            assert_eq!(apply(&GaussianBlur, &flat, k), flat);
        }
    }

    #[test]
    fn gaussian_spreads_an_impulse() {
        let out = apply(&GaussianBlur, &impulse(9, 255), 3.0);
        // 255 * 0.5 * 0.5
        assert_eq!(out.sample(4, 4, 0), 64);
        assert_eq!(out.sample(3, 4, 0), 32);
        assert_eq!(out.sample(0, 0, 0), 0);
    }

    #[test]
    fn median_removes_isolated_pixels() {
        let out = apply(&MedianFilter, &impulse(9, 255), 3.0);
        assert!(out.data().iter().all(|&v| v == 0));
    }

    #[test]
    fn even_median_size_behaves_as_next_odd() {
        let src = Frame::from_fn_gray(11, 11, |x, y| ((x * 31 + y * 17) % 256) as u8);
        assert_eq!(apply(&MedianFilter, &src, 4.0), apply(&MedianFilter, &src, 5.0));
        assert_eq!(apply(&MedianFilter, &src, 0.0), src);
    }

    #[test]
    fn median_keeps_a_block() {
        let block = Frame::from_fn_gray(9, 9, |x, y| {
            if (3..6).contains(&x) && (3..6).contains(&y) { 200 } else { 0 }
        });
        let out = apply(&MedianFilter, &block, 3.0);
        assert_eq!(out.sample(4, 4, 0), 200);
        assert_eq!(out.sample(0, 0, 0), 0);
    }

    #[test]
    fn bilateral_keeps_strong_edges() {
        let step = Frame::from_fn_gray(16, 8, |x, _| if x < 8 { 0 } else { 200 });
        let out = apply(&BilateralFilter, &step, 10.0);
        assert_eq!(out.sample(7, 4, 0), 0);
        assert_eq!(out.sample(8, 4, 0), 200);
    }

    #[test]
    fn bilateral_smooths_small_noise() {
        let noisy = Frame::from_fn_gray(12, 12, |x, y| if (x + y) % 2 == 0 { 100 } else { 104 });
        let out = apply(&BilateralFilter, &noisy, 50.0);
        let v = out.sample(6, 6, 0);
        assert!((101..=103).contains(&v), "got {v}");
    }
}
