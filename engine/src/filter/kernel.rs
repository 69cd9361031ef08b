//! Shared numeric plumbing for the filters: a float working plane, border
//! handling, separable correlation and the standard derivative kernels.

use image::{GrayImage, ImageBuffer, Luma};
use schlieren_common::frame::Frame;

use super::traits::FilterFault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Border {
    /// `gfedcb|abcdefgh|gfedcba`
    Reflect101,
    /// `aaaaaa|abcdefgh|hhhhhhh`
    Replicate,
}

impl Border {
    pub fn index(self, i: isize, n: usize) -> usize {
        let n = n as isize;
        if n <= 1 {
            return 0;
        }
        match self {
            Border::Replicate => i.clamp(0, n - 1) as usize,
            Border::Reflect101 => {
                let mut i = i;
                loop {
                    if i < 0 {
                        i = -i;
                    } else if i >= n {
                        i = 2 * (n - 1) - i;
                    } else {
                        return i as usize;
                    }
                }
            }
        }
    }
}

/// How a float result is brought back to 8 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantize {
    /// Round to nearest, saturate.
    Round,
    /// Absolute value, round, saturate.
    AbsRound,
    /// Saturate, then drop the fraction.
    Truncate,
}

/// Single-channel float image used for intermediate results.
pub type Plane = ImageBuffer<Luma<f64>, Vec<f64>>;

/// Luma of `frame` widened to floats.
pub fn to_plane(frame: &Frame) -> Plane {
    let gray = frame.to_luma8();
    Plane::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([gray.get_pixel(x, y)[0] as f64])
    })
}

/// Sample at a possibly out-of-range position, resolved through `border`.
pub fn at(plane: &Plane, x: i64, y: i64, border: Border) -> f64 {
    let (w, h) = plane.dimensions();
    let xx = border.index(x as isize, w as usize) as u32;
    let yy = border.index(y as isize, h as usize) as u32;
    plane.get_pixel(xx, yy)[0]
}

pub fn zip_with(a: &Plane, b: &Plane, f: impl Fn(f64, f64) -> f64) -> Plane {
    let mut out = a.clone();
    for (o, p) in out.pixels_mut().zip(b.pixels()) {
        o[0] = f(o[0], p[0]);
    }
    out
}

pub fn map(plane: &Plane, f: impl Fn(f64) -> f64) -> Plane {
    let mut out = plane.clone();
    for p in out.pixels_mut() {
        p[0] = f(p[0]);
    }
    out
}

/// Back to an 8-bit gray frame. Any NaN or infinity is a fault.
pub fn into_frame(
    plane: &Plane,
    filter: &'static str,
    quantize: Quantize,
) -> Result<Frame, FilterFault> {
    if plane.pixels().any(|p| !p[0].is_finite()) {
        return Err(FilterFault::NonFinite { filter });
    }
    let gray = GrayImage::from_fn(plane.width(), plane.height(), |x, y| {
        let v = plane.get_pixel(x, y)[0];
        let q = match quantize {
            Quantize::Round => v.round().clamp(0.0, 255.0) as u8,
            Quantize::AbsRound => v.abs().round().min(255.0) as u8,
            Quantize::Truncate => v.clamp(0.0, 255.0) as u8,
        };
        Luma([q])
    });
    Ok(Frame::Gray(gray))
}

/// Correlate with `kx` along rows, then `ky` along columns. Kernels have odd length.
pub fn correlate_separable(src: &Plane, kx: &[f64], ky: &[f64], border: Border) -> Plane {
    let rx = (kx.len() / 2) as i64;
    let ry = (ky.len() / 2) as i64;

    let rows = Plane::from_fn(src.width(), src.height(), |x, y| {
        let mut acc = 0.0;
        for (i, k) in kx.iter().enumerate() {
            acc += k * at(src, x as i64 + i as i64 - rx, y as i64, border);
        }
        Luma([acc])
    });

    Plane::from_fn(src.width(), src.height(), |x, y| {
        let mut acc = 0.0;
        for (i, k) in ky.iter().enumerate() {
            acc += k * at(&rows, x as i64, y as i64 + i as i64 - ry, border);
        }
        Luma([acc])
    })
}

pub fn convolve1d(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Row of Pascal's triangle with `len` entries: `[1]`, `[1, 1]`, `[1, 2, 1]`, ...
pub fn binomial(len: usize) -> Vec<f64> {
    let mut row = vec![1.0];
    for _ in 1..len.max(1) {
        row = convolve1d(&row, &[1.0, 1.0]);
    }
    row
}

/// Smoothing half of a derivative filter of aperture `ksize`.
/// Aperture 1 means no smoothing at all.
pub fn smooth_kernel(ksize: usize) -> Vec<f64> {
    binomial(ksize.max(1))
}

/// First or second derivative kernel of aperture `ksize` (aperture 1 is
/// treated as 3 for the derivative direction).
pub fn deriv_kernel(order: u8, ksize: usize) -> Vec<f64> {
    let ksize = ksize.max(3);
    let base: &[f64] = match order {
        1 => &[-1.0, 0.0, 1.0],
        _ => &[1.0, -2.0, 1.0],
    };
    convolve1d(&binomial(ksize - 2), base)
}

/// Normalised 1-D Gaussian of odd length `ksize` with sigma derived from
/// the size. Small apertures use the fixed binomial-like tables.
pub fn gaussian_kernel(ksize: usize) -> Vec<f64> {
    match ksize {
        0 | 1 => return vec![1.0],
        3 => return vec![0.25, 0.5, 0.25],
        5 => return vec![0.0625, 0.25, 0.375, 0.25, 0.0625],
        7 => {
            return vec![
                0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125,
            ]
        }
        _ => {}
    }
    let sigma = 0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (ksize / 2) as f64;
    let scale = -0.5 / (sigma * sigma);
    let raw: Vec<f64> = (0..ksize)
        .map(|i| {
            let x = i as f64 - center;
            (scale * x * x).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.into_iter().map(|v| v / sum).collect()
}
