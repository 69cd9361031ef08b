use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, GrayImage, ImageBuffer, Luma, Pixel, Rgb, RgbImage};

/// Channel layout of a [`Frame`]. Samples are always 8-bit unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Gray,
    Rgb,
}

impl Layout {
    pub fn channels(self) -> usize {
        match self {
            Layout::Gray => 1,
            Layout::Rgb => 3,
        }
    }
}

/// An owned 8-bit image, either single-channel or RGB.
///
/// Every pipeline stage produces a new `Frame`; nothing mutates a frame
/// after it has been handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl Frame {
    pub fn new(width: u32, height: u32, layout: Layout, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * layout.channels();
        let length = FrameError::Length {
            got: data.len(),
            expected,
            width,
            height,
        };
        let frame = match layout {
            Layout::Gray => GrayImage::from_raw(width, height, data).map(Frame::Gray),
            Layout::Rgb => RgbImage::from_raw(width, height, data).map(Frame::Rgb),
        };
        match frame {
            Some(frame) if frame.data().len() == expected => Ok(frame),
            _ => Err(length),
        }
    }

    pub fn gray(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        Self::new(width, height, Layout::Gray, data)
    }

    pub fn rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        Self::new(width, height, Layout::Rgb, data)
    }

    /// A frame with every sample set to `value`.
    pub fn filled(width: u32, height: u32, layout: Layout, value: u8) -> Self {
        match layout {
            Layout::Gray => Frame::Gray(GrayImage::from_pixel(width, height, Luma([value]))),
            Layout::Rgb => Frame::Rgb(RgbImage::from_pixel(width, height, Rgb([value; 3]))),
        }
    }

    /// Build a single-channel frame by evaluating `f(x, y)` for every pixel.
    pub fn from_fn_gray(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> u8) -> Self {
        Frame::Gray(GrayImage::from_fn(width, height, |x, y| Luma([f(x, y)])))
    }

    // -- Accessors ---------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.dimensions().1
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Frame::Gray(img) => img.dimensions(),
            Frame::Rgb(img) => img.dimensions(),
        }
    }

    pub fn layout(&self) -> Layout {
        match self {
            Frame::Gray(_) => Layout::Gray,
            Frame::Rgb(_) => Layout::Rgb,
        }
    }

    pub fn channels(&self) -> usize {
        self.layout().channels()
    }

    /// Raw samples, row-major, channels interleaved.
    pub fn data(&self) -> &[u8] {
        match self {
            Frame::Gray(img) => img.as_raw(),
            Frame::Rgb(img) => img.as_raw(),
        }
    }

    pub fn into_data(self) -> Vec<u8> {
        match self {
            Frame::Gray(img) => img.into_raw(),
            Frame::Rgb(img) => img.into_raw(),
        }
    }

    pub fn pixel_count(&self) -> usize {
        let (w, h) = self.dimensions();
        w as usize * h as usize
    }

    /// Sample at `(x, y)` in channel `c`. Panics if out of bounds.
    pub fn sample(&self, x: u32, y: u32, c: usize) -> u8 {
        match self {
            Frame::Gray(img) => img.get_pixel(x, y).channels()[c],
            Frame::Rgb(img) => img.get_pixel(x, y).channels()[c],
        }
    }

    pub fn as_gray(&self) -> Option<&GrayImage> {
        match self {
            Frame::Gray(img) => Some(img),
            Frame::Rgb(_) => None,
        }
    }

    pub fn same_dimensions(&self, other: &Frame) -> bool {
        self.dimensions() == other.dimensions()
    }

    // -- Conversions -------------------------------------------------------------

    /// Luma of an RGB frame. Gray frames are returned as a copy.
    pub fn to_luma8(&self) -> GrayImage {
        match self {
            Frame::Gray(img) => img.clone(),
            Frame::Rgb(img) => DynamicImage::ImageRgb8(img.clone()).to_luma8(),
        }
    }

    pub fn to_gray(&self) -> Frame {
        Frame::Gray(self.to_luma8())
    }

    /// Replicate a gray frame into three channels. RGB frames are returned as a copy.
    pub fn to_rgb(&self) -> Frame {
        match self {
            Frame::Rgb(img) => Frame::Rgb(img.clone()),
            Frame::Gray(img) => Frame::Rgb(DynamicImage::ImageLuma8(img.clone()).to_rgb8()),
        }
    }

    /// Per-sample `|self - other|`. Both frames must share dimensions and layout.
    pub fn abs_diff(&self, other: &Frame) -> Result<Frame, FrameError> {
        if !self.same_dimensions(other) {
            return Err(FrameError::DimensionMismatch {
                left: self.dimensions(),
                right: other.dimensions(),
            });
        }
        match (self, other) {
            (Frame::Gray(a), Frame::Gray(b)) => Ok(Frame::Gray(abs_diff(a, b))),
            (Frame::Rgb(a), Frame::Rgb(b)) => Ok(Frame::Rgb(abs_diff(a, b))),
            _ => Err(FrameError::LayoutMismatch),
        }
    }

    /// Centred region of interest. A region larger than the frame is clamped to it.
    pub fn crop_center(&self, width: u32, height: u32) -> Frame {
        let (fw, fh) = self.dimensions();
        let w = width.max(1).min(fw);
        let h = height.max(1).min(fh);
        if w == fw && h == fh {
            return self.clone();
        }
        let (x0, y0) = ((fw - w) / 2, (fh - h) / 2);
        match self {
            Frame::Gray(img) => Frame::Gray(imageops::crop_imm(img, x0, y0, w, h).to_image()),
            Frame::Rgb(img) => Frame::Rgb(imageops::crop_imm(img, x0, y0, w, h).to_image()),
        }
    }

    pub fn from_image(img: DynamicImage) -> Frame {
        Frame::Rgb(img.to_rgb8())
    }

    /// Decode any format the `image` crate recognises (JPEG, PNG, TIFF, BMP).
    pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
        let img = image::load_from_memory(bytes).map_err(|e| FrameError::Decode(e.to_string()))?;
        Ok(Self::from_image(img))
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        let written = match self {
            Frame::Gray(img) => img.write_with_encoder(encoder),
            Frame::Rgb(img) => img.write_with_encoder(encoder),
        };
        written.map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(buf)
    }
}

impl From<GrayImage> for Frame {
    fn from(img: GrayImage) -> Self {
        Frame::Gray(img)
    }
}

impl From<RgbImage> for Frame {
    fn from(img: RgbImage) -> Self {
        Frame::Rgb(img)
    }
}

fn abs_diff<P>(a: &ImageBuffer<P, Vec<u8>>, b: &ImageBuffer<P, Vec<u8>>) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let mut out = a.clone();
    for (o, p) in out.pixels_mut().zip(b.pixels()) {
        o.apply2(p, |x, y| x.abs_diff(y));
    }
    out
}

/// A captured frame with timestamp metadata, as yielded by a frame source.
#[derive(Debug, Clone)]
pub struct TimestampedFrame {
    pub frame: Frame,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl TimestampedFrame {
    /// Stamp a frame with the current wall-clock time.
    pub fn new(frame: Frame, seq: u64) -> Self {
        Self {
            frame,
            captured_at_ms: chrono::Utc::now().timestamp_millis(),
            seq,
        }
    }

    pub fn with_timestamp(frame: Frame, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            frame,
            captured_at_ms,
            seq,
        }
    }
}

/// One finished processing cycle as handed to sinks: the raw capture and the
/// displayable result. Shared behind an `Arc` and never mutated.
#[derive(Debug, Clone)]
pub struct PublishedFrame {
    pub seq: u64,
    pub captured_at_ms: i64,
    pub raw: Frame,
    pub processed: Frame,
    /// False when no reference was available and the gray frame was passed through.
    pub differenced: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("buffer length {got} does not match {width}x{height} frame (expected {expected})")]
    Length {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },
    #[error("frame dimensions differ: {left:?} vs {right:?}")]
    DimensionMismatch { left: (u32, u32), right: (u32, u32) },
    #[error("frame channel layouts differ")]
    LayoutMismatch,
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_buffer_length() {
        let err = Frame::gray(4, 4, vec![0; 15]).unwrap_err();
        assert!(matches!(err, FrameError::Length { expected: 16, .. }));
    }

    #[test]
    fn gray_conversion_uses_rec709_luma() {
        let frame = Frame::rgb(
            5,
            1,
            vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255, 100, 100, 100],
        )
        .unwrap();
        let gray = frame.to_gray();
        assert_eq!(gray.layout(), Layout::Gray);
        assert_eq!(gray.data(), &[54, 182, 18, 255, 100]);
        assert!(gray.as_gray().is_some());
    }

    #[test]
    fn accepts_image_buffers_directly() {
        let img = GrayImage::from_pixel(3, 2, Luma([9]));
        let frame = Frame::from(img.clone());
        assert_eq!(frame.dimensions(), (3, 2));
        assert_eq!(frame.as_gray(), Some(&img));
        assert_eq!(frame.sample(2, 1, 0), 9);
    }

    #[test]
    fn abs_diff_is_symmetric() {
        let a = Frame::gray(2, 1, vec![10, 200]).unwrap();
        let b = Frame::gray(2, 1, vec![30, 50]).unwrap();
        assert_eq!(a.abs_diff(&b).unwrap().data(), &[20, 150]);
        assert_eq!(b.abs_diff(&a).unwrap().data(), &[20, 150]);
    }

    #[test]
    fn abs_diff_rejects_size_mismatch() {
        let a = Frame::filled(2, 2, Layout::Gray, 0);
        let b = Frame::filled(3, 2, Layout::Gray, 0);
        assert!(matches!(
            a.abs_diff(&b),
            Err(FrameError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn crop_center_takes_middle_region() {
        let frame = Frame::from_fn_gray(4, 4, |x, y| (y * 4 + x) as u8);
        let cropped = frame.crop_center(2, 2);
        assert_eq!(cropped.dimensions(), (2, 2));
        assert_eq!(cropped.data(), &[5, 6, 9, 10]);
    }

    #[test]
    fn crop_larger_than_frame_is_clamped() {
        let frame = Frame::filled(3, 2, Layout::Rgb, 7);
        let cropped = frame.crop_center(100, 100);
        assert_eq!(cropped, frame);
    }

    #[test]
    fn to_rgb_replicates_channel() {
        let gray = Frame::gray(2, 1, vec![3, 9]).unwrap();
        assert_eq!(gray.to_rgb().data(), &[3, 3, 3, 9, 9, 9]);
    }

    #[test]
    fn jpeg_encode_then_decode_keeps_dimensions() {
        let frame = Frame::from_fn_gray(16, 8, |x, _| (x * 16) as u8);
        let jpeg = frame.encode_jpeg(90).unwrap();
        let decoded = Frame::decode(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
        assert_eq!(decoded.layout(), Layout::Rgb);
    }
}
