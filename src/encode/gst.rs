//! # GStreamer-backed codec provider
//!
//! Optional implementation of the codec collaborator on top of a
//! GStreamer pipeline:
//!
//! ```text
//! appsrc -> x264enc -> container mux -> filesink
//! ```
//!
//! The muxing happens inside the pipeline, so the [`VideoEncoder`] half
//! pushes raw frames into the appsrc and never surfaces packets; the
//! [`Muxer`] half drives pipeline state: `write_header` brings it to
//! Playing, `write_trailer` sends EOS and waits for the bus to confirm the
//! container index was finalized.
//!
//! Because both halves wrap one pipeline, the provider stages the shared
//! state between `open_muxer` and the `open_encoder` call that follows it.

use std::path::Path;
use std::sync::{Arc, Mutex};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::{
    CodecProvider, EncoderConfig, EncoderInfo, EncoderOptions, Muxer, Packet, VideoEncoder,
    VideoFrame,
};
use crate::error::{Error, Result};
use crate::graphics::PixelFormat;

fn codec_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::codec(format!("{context}: {err}"))
}

fn video_format(format: PixelFormat) -> gst_video::VideoFormat {
    match format {
        PixelFormat::Yuv420 => gst_video::VideoFormat::I420,
        PixelFormat::Yuv444 => gst_video::VideoFormat::Y444,
        PixelFormat::Bgr0 => gst_video::VideoFormat::Bgrx,
    }
}

fn mux_factory(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("mp4") => "mp4mux",
        Some("mov") => "qtmux",
        Some("mkv") => "matroskamux",
        Some("avi") => "avimux",
        _ => "mp4mux",
    }
}

struct Shared {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    config: EncoderConfig,
}

struct Staged {
    path: std::path::PathBuf,
    config: EncoderConfig,
}

pub struct GstProvider {
    staged: Mutex<Option<Staged>>,
}

impl GstProvider {
    pub fn new() -> Result<Self> {
        gst::init().map_err(|err| codec_error("could not initialize gstreamer", err))?;

        // Library chatter is off by default, same toggle the session uses
        // for its codec logging.
        let suppress = crate::console::registry()
            .find("sdr_video_lav_suppresslog")
            .map(|var| var.get_bool())
            .unwrap_or(true);
        gst::log::set_active(!suppress);

        Ok(Self {
            staged: Mutex::new(None),
        })
    }
}

impl CodecProvider for GstProvider {
    fn find_encoder(&self, name: &str) -> Option<EncoderInfo> {
        match name {
            "libx264" => Some(EncoderInfo {
                name: name.into(),
                h264: true,
                pixel_formats: vec![PixelFormat::Yuv420, PixelFormat::Yuv444],
            }),
            "libx264rgb" => Some(EncoderInfo {
                name: name.into(),
                h264: true,
                pixel_formats: vec![PixelFormat::Bgr0],
            }),
            _ => None,
        }
    }

    fn encoder_names(&self) -> Vec<String> {
        vec!["libx264".into(), "libx264rgb".into()]
    }

    fn open_muxer(&self, path: &Path, config: &EncoderConfig) -> Result<Box<dyn Muxer>> {
        *self.staged.lock().unwrap() = Some(Staged {
            path: path.to_path_buf(),
            config: config.clone(),
        });

        Ok(Box::new(GstMuxer))
    }

    fn open_encoder(
        &self,
        _info: &EncoderInfo,
        config: &EncoderConfig,
        options: &EncoderOptions,
    ) -> Result<Box<dyn VideoEncoder>> {
        let staged = self
            .staged
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::codec("encoder opened before its muxer"))?;

        let shared = build_pipeline(&staged.path, config, options)?;
        let shared = Arc::new(shared);

        Ok(Box::new(GstEncoder {
            shared,
            frame_duration: gst::ClockTime::SECOND / config.framerate as u64,
        }))
    }
}

fn build_pipeline(path: &Path, config: &EncoderConfig, options: &EncoderOptions) -> Result<Shared> {
    let desc = &config.desc;
    let format = video_format(desc.format);

    let info = gst_video::VideoInfo::builder(format, desc.width, desc.height)
        .fps(gst::Fraction::new(config.framerate as i32, 1))
        .build()
        .map_err(|err| codec_error("could not describe video format", err))?;

    let caps = info
        .to_caps()
        .map_err(|err| codec_error("could not build caps", err))?;

    let appsrc = gst_app::AppSrc::builder()
        .caps(&caps)
        .format(gst::Format::Time)
        .build();

    let encoder = gst::ElementFactory::make("x264enc")
        .build()
        .map_err(|err| codec_error("could not create x264enc", err))?;

    for (key, value) in options {
        match key.as_str() {
            "preset" => encoder.set_property_from_str("speed-preset", value),
            "crf" => {
                encoder.set_property_from_str("pass", "quant");
                encoder.set_property("quantizer", value.parse::<u32>().unwrap_or(0));
            }
            "x264-params" if value.contains("keyint=1") => {
                encoder.set_property("key-int-max", 1u32)
            }
            _ => encoder.set_property("option-string", format!("{key}={value}")),
        }
    }

    let mux = gst::ElementFactory::make(mux_factory(path))
        .build()
        .map_err(|err| codec_error("could not create container muxer", err))?;

    let sink = gst::ElementFactory::make("filesink")
        .build()
        .map_err(|err| codec_error("could not create filesink", err))?;
    sink.set_property("location", path.to_string_lossy().as_ref());

    let pipeline = gst::Pipeline::new();
    pipeline
        .add_many([appsrc.upcast_ref(), &encoder, &mux, &sink])
        .map_err(|err| codec_error("could not assemble pipeline", err))?;
    gst::Element::link_many([appsrc.upcast_ref(), &encoder, &mux, &sink])
        .map_err(|err| codec_error("could not link pipeline", err))?;

    Ok(Shared {
        pipeline,
        appsrc,
        config: config.clone(),
    })
}

/// The container lives inside the pipeline, so the muxer half has no work
/// of its own: the header is emitted when the pipeline reaches Playing and
/// the trailer when the encoder's flush sends EOS.
pub struct GstMuxer;

impl Muxer for GstMuxer {
    fn write_header(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_packet(&mut self, _packet: Packet) -> Result<()> {
        // Packets never surface; the in-pipeline muxer consumes them.
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct GstEncoder {
    shared: Arc<Shared>,
    frame_duration: gst::ClockTime,
}

impl VideoEncoder for GstEncoder {
    fn send_frame(&mut self, frame: Option<&VideoFrame<'_>>) -> Result<()> {
        let Some(frame) = frame else {
            // Flush: EOS drains the encoder and finalizes the container.
            return finalize(&self.shared);
        };

        if frame.pts == 0 {
            self.shared
                .pipeline
                .set_state(gst::State::Playing)
                .map_err(|err| codec_error("could not start pipeline", err))?;
        }

        let desc = &self.shared.config.desc;
        let total: usize = desc.plane_sizes.iter().sum();

        let mut buffer = gst::Buffer::with_size(total)
            .map_err(|err| codec_error("could not allocate frame buffer", err))?;

        {
            let buffer = buffer.get_mut().expect("freshly allocated buffer");

            let mut offsets = [0usize; 3];
            let mut strides = [0i32; 3];
            let mut cursor = 0usize;

            {
                let mut map = buffer
                    .map_writable()
                    .map_err(|err| codec_error("could not map frame buffer", err))?;

                for (index, plane) in frame.planes[..desc.plane_count()].iter().enumerate() {
                    offsets[index] = cursor;
                    strides[index] = desc.strides[index] as i32;
                    map[cursor..cursor + plane.len()].copy_from_slice(plane);
                    cursor += plane.len();
                }
            }

            gst_video::VideoMeta::add_full(
                buffer,
                gst_video::VideoFrameFlags::empty(),
                video_format(desc.format),
                desc.width,
                desc.height,
                &offsets[..desc.plane_count()],
                &strides[..desc.plane_count()],
            )
            .map_err(|err| codec_error("could not attach video meta", err))?;

            let pts = self.frame_duration * frame.pts as u64;
            buffer.set_pts(pts);
            buffer.set_duration(self.frame_duration);
        }

        self.shared
            .appsrc
            .push_buffer(buffer)
            .map_err(|err| codec_error("could not push frame", err))?;

        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Option<Packet>> {
        // Compressed output flows to the muxer inside the pipeline.
        Ok(None)
    }
}

fn finalize(shared: &Shared) -> Result<()> {
    let _ = shared.appsrc.end_of_stream();

    if let Some(bus) = shared.pipeline.bus() {
        use gst::MessageView;

        let timeout = gst::ClockTime::from_seconds(30);
        if let Some(message) =
            bus.timed_pop_filtered(timeout, &[gst::MessageType::Eos, gst::MessageType::Error])
        {
            if let MessageView::Error(err) = message.view() {
                let _ = shared.pipeline.set_state(gst::State::Null);
                return Err(Error::codec(format!("pipeline error: {}", err.error())));
            }
        }
    }

    shared
        .pipeline
        .set_state(gst::State::Null)
        .map_err(|err| codec_error("could not stop pipeline", err))?;

    Ok(())
}
