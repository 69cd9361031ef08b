use image::{Rgb, RgbImage};
use schlieren_common::frame::Frame;
use schlieren_common::settings::{Colormap, CompositorSettings};

use crate::colormap;

/// Multiply every sample by `gain`, clamp to `[0, 255]` and drop the
/// fraction. `gain == 1.0` returns the input unchanged.
pub fn apply_gain(frame: &Frame, gain: f64) -> Frame {
    if gain == 1.0 {
        return frame.clone();
    }
    let gain = if gain.is_finite() { gain.max(0.0) } else { 1.0 };
    let mut gray = frame.to_luma8();
    for pixel in gray.pixels_mut() {
        pixel[0] = (pixel[0] as f64 * gain).clamp(0.0, 255.0) as u8;
    }
    Frame::Gray(gray)
}

/// Map a single-channel frame to RGB. `Colormap::None` replicates the
/// gray value into all three channels.
pub fn colorize(frame: &Frame, colormap: Colormap) -> Frame {
    let gray = frame.to_luma8();
    match colormap::lut(colormap) {
        None => Frame::Gray(gray).to_rgb(),
        Some(table) => Frame::Rgb(RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
            Rgb(table[gray.get_pixel(x, y)[0] as usize])
        })),
    }
}

/// Final displayable frame: optional centred crop, gain, then colormap.
/// Pure function of its inputs.
pub fn compose(filtered: &Frame, settings: &CompositorSettings) -> Frame {
    let cropped;
    let source = match settings.crop {
        Some(crop) => {
            cropped = filtered.crop_center(crop.width, crop.height);
            &cropped
        }
        None => filtered,
    };
    colorize(&apply_gain(source, settings.gain), settings.colormap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schlieren_common::frame::Layout;
    use schlieren_common::settings::CropRegion;

    fn settings(gain: f64, colormap: Colormap) -> CompositorSettings {
        CompositorSettings {
            gain,
            colormap,
            crop: None,
        }
    }

    fn gradient(w: u32, h: u32) -> Frame {
        Frame::from_fn_gray(w, h, |x, y| ((x * 7 + y * 13) % 256) as u8)
    }

    #[test]
    fn unit_gain_without_colormap_is_identity() {
        for (w, h) in [(1, 1), (3, 2), (64, 48), (17, 31)] {
            let frame = gradient(w, h);
            assert_eq!(apply_gain(&frame, 1.0), frame);

            let out = compose(&frame, &settings(1.0, Colormap::None));
            assert_eq!(out.layout(), Layout::Rgb);
            assert_eq!(out.dimensions(), frame.dimensions());
            for c in 0..3 {
                for y in 0..h {
                    for x in 0..w {
                        assert_eq!(out.sample(x, y, c), frame.sample(x, y, 0));
                    }
                }
            }
        }
    }

    #[test]
    fn gain_clamps_and_truncates() {
        let frame = Frame::gray(4, 1, vec![0, 10, 100, 200]).unwrap();
        assert_eq!(apply_gain(&frame, 2.0).data(), &[0, 20, 200, 255]);
        assert_eq!(apply_gain(&frame, 0.25).data(), &[0, 2, 25, 50]);
    }

    #[test]
    fn colormap_produces_three_channels() {
        let frame = gradient(8, 8);
        for map in Colormap::ALL {
            let out = compose(&frame, &settings(1.0, map));
            assert_eq!(out.layout(), Layout::Rgb);
            assert_eq!(out.data().len(), 8 * 8 * 3);
        }
        let hot = compose(&Frame::filled(2, 2, Layout::Gray, 255), &settings(1.0, Colormap::Hot));
        assert!(hot.data().iter().all(|&v| v == 255));
    }

    #[test]
    fn crop_is_centred_and_clamped() {
        let frame = gradient(10, 8);
        let mut s = settings(1.0, Colormap::None);
        s.crop = Some(CropRegion { width: 4, height: 2 });
        let out = compose(&frame, &s);
        assert_eq!(out.dimensions(), (4, 2));
        assert_eq!(out.sample(0, 0, 0), frame.sample(3, 3, 0));

        s.crop = Some(CropRegion { width: 100, height: 100 });
        assert_eq!(compose(&frame, &s).dimensions(), (10, 8));
    }
}
