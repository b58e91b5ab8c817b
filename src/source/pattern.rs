//! Solid-colour JPEG test pattern

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::{FixedSequence, FrameSource, FrameStream, SourceError};
use crate::frame::Frame;

/// 24-bit colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const BLUE: Rgb = Rgb([0, 0, 255]);
    pub const RED: Rgb = Rgb([255, 0, 0]);
    pub const GREEN: Rgb = Rgb([0, 255, 0]);
}

impl FromStr for Rgb {
    type Err = SourceError;

    /// Parses `#rrggbb` (the `#` is optional) or one of `blue`, `red`, `green`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "blue" => return Ok(Self::BLUE),
            "red" => return Ok(Self::RED),
            "green" => return Ok(Self::GREEN),
            _ => {}
        }

        let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(SourceError::InvalidColor(s.to_string()));
        }

        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| SourceError::InvalidColor(s.to_string()))
        };
        Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

/// Encodes a `width` x `height` image filled with `color` as JPEG.
///
/// Encoding is deterministic: the same arguments always give the same bytes.
pub fn encode_solid_jpeg(
    color: Rgb,
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Frame, SourceError> {
    if width == 0 || height == 0 {
        return Err(SourceError::Encode(format!(
            "image dimensions must be > 0, got {}x{}",
            width, height
        )));
    }

    let image = RgbImage::from_pixel(width, height, image::Rgb(color.0));
    let mut jpeg = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
        encoder
            .encode_image(&image)
            .map_err(|e| SourceError::Encode(e.to_string()))?;
    }

    Ok(Frame::jpeg(jpeg))
}

/// Cycles through solid-colour frames.
///
/// Frames are encoded once when the pattern is built and shared by every
/// session.
#[derive(Debug, Clone)]
pub struct TestPattern {
    colors: Vec<Rgb>,
    sequence: FixedSequence,
}

impl TestPattern {
    pub fn new(
        colors: Vec<Rgb>,
        width: u32,
        height: u32,
        quality: u8,
        interval: Duration,
    ) -> Result<Self, SourceError> {
        let frames = colors
            .iter()
            .map(|color| encode_solid_jpeg(*color, width, height, quality))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            colors,
            sequence: FixedSequence::new(frames, interval),
        })
    }

    /// Blue, red, green at 200x200 every 500 ms
    pub fn demo() -> Result<Self, SourceError> {
        Self::new(
            vec![Rgb::BLUE, Rgb::RED, Rgb::GREEN],
            200,
            200,
            85,
            Duration::from_millis(500),
        )
    }

    pub fn repeating(mut self, repeat: bool) -> Self {
        self.sequence = self.sequence.repeating(repeat);
        self
    }

    pub fn colors(&self) -> &[Rgb] {
        &self.colors
    }

    pub fn frames(&self) -> &[Frame] {
        self.sequence.frames()
    }
}

impl FrameSource for TestPattern {
    fn open(&self) -> FrameStream {
        self.sequence.open()
    }
}
