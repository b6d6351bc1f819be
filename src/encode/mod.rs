//! # Codec Collaborator Interface
//!
//! The container muxer and codec library are external collaborators; these
//! traits are exactly the surface the core consumes from them. The shapes
//! mirror a send/receive codec API: frames go in (null frame flushes),
//! packets come out, packet timestamps are rescaled from the codec
//! timebase into the stream timebase before the interleaved write.
//!
//! [`CodecProvider`] is the lookup side: encoders by name with their
//! advertised pixel formats, and muxers by output path. A provider backed
//! by GStreamer ships behind the `gst-output` feature; tests install their
//! own.

mod stream;

pub mod audio;
#[cfg(feature = "gst-output")]
pub mod gst;

pub use stream::{spawn_encoder_thread, VideoWriter};

use std::path::Path;

use crate::error::Result;
use crate::graphics::{FrameDesc, PixelFormat};

/// Exact rational timebase, `num / den` seconds per unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// `1 / fps`, the codec timebase used for every stream.
    pub fn per_frame(fps: u32) -> Self {
        Self::new(1, fps as i32)
    }

    pub fn inverse(self) -> Self {
        Self::new(self.den, self.num)
    }
}

/// Rescales a timestamp between timebases with 128-bit intermediates and
/// round-to-nearest, the way packet timestamps are rescaled before muxing.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;

    let half = den.abs() / 2;
    let rounded = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };

    rounded as i64
}

/// One compressed packet leaving an encoder.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pts: i64,
    pub dts: i64,
    pub keyframe: bool,
}

impl Packet {
    pub fn rescale_ts(&mut self, from: Rational, to: Rational) {
        self.pts = rescale(self.pts, from, to);
        self.dts = rescale(self.dts, from, to);
    }
}

/// Everything an encoder needs to be opened for one stream.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub desc: FrameDesc,
    pub framerate: u32,
}

impl EncoderConfig {
    pub fn timebase(&self) -> Rational {
        Rational::per_frame(self.framerate)
    }
}

/// Key/value option dictionary handed to the encoder (`preset`, `crf`,
/// codec-private parameters).
pub type EncoderOptions = Vec<(String, String)>;

/// Borrowed view of one raw frame submitted for encoding. Planes are
/// row-pitch-contiguous per the frame descriptor.
pub struct VideoFrame<'a> {
    pub desc: &'a FrameDesc,
    pub planes: [&'a [u8]; 3],
    pub pts: i64,
}

/// An opened encoder instance. `send_frame(None)` enters flush mode;
/// `receive_packet` then drains until it returns `None`.
pub trait VideoEncoder: Send {
    fn send_frame(&mut self, frame: Option<&VideoFrame<'_>>) -> Result<()>;
    fn receive_packet(&mut self) -> Result<Option<Packet>>;
}

/// An opened container. The muxer owns the output file; `write_trailer`
/// finalizes the index and closes it.
pub trait Muxer: Send {
    fn write_header(&mut self) -> Result<()>;
    fn write_packet(&mut self, packet: Packet) -> Result<()>;
    fn write_trailer(&mut self) -> Result<()>;
}

/// Descriptor for an encoder the provider can open.
#[derive(Debug, Clone)]
pub struct EncoderInfo {
    pub name: String,
    /// H.264 encoders get the x264 option block (preset, crf, keyint).
    pub h264: bool,
    /// Advertised formats, first entry is the fallback.
    pub pixel_formats: Vec<PixelFormat>,
}

/// Lookup and construction side of the codec collaborator.
pub trait CodecProvider: Send + Sync {
    fn find_encoder(&self, name: &str) -> Option<EncoderInfo>;

    /// All encoder names, printed when a lookup misses.
    fn encoder_names(&self) -> Vec<String>;

    fn open_muxer(&self, path: &Path, config: &EncoderConfig) -> Result<Box<dyn Muxer>>;

    fn open_encoder(
        &self,
        info: &EncoderInfo,
        config: &EncoderConfig,
        options: &EncoderOptions,
    ) -> Result<Box<dyn VideoEncoder>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_between_equal_bases_is_identity() {
        let tb = Rational::per_frame(60);
        for value in [0, 1, 59, 1000, -3] {
            assert_eq!(rescale(value, tb, tb), value);
        }
    }

    #[test]
    fn rescale_scales_and_rounds() {
        // 1/60 into 1/90000 (a common mpeg timebase): one frame is 1500 units.
        let from = Rational::new(1, 60);
        let to = Rational::new(1, 90000);
        assert_eq!(rescale(1, from, to), 1500);
        assert_eq!(rescale(4, from, to), 6000);

        // And back down, rounding to nearest.
        assert_eq!(rescale(1500, to, from), 1);
        assert_eq!(rescale(1501, to, from), 1);
    }

    #[test]
    fn inverse_swaps_terms() {
        let tb = Rational::new(1, 60);
        assert_eq!(tb.inverse(), Rational::new(60, 1));
    }
}
