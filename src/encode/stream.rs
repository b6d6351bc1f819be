//! # Video Writer & Encoder Thread
//!
//! [`VideoWriter`] drives one stream's encoder and muxer: it attaches
//! downloaded planes to a frame, stamps the strictly increasing
//! presentation index as PTS at submit time, drains every pending packet,
//! rescales packet timestamps into the stream timebase and writes them
//! interleaved. On finish a null frame flushes the encoder and the
//! container trailer is written.
//!
//! The encoder thread owns the writer for the session's lifetime and hands
//! it back through its join handle so the flush runs after the capture
//! side has provably stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::warn;

use super::{Muxer, Rational, VideoEncoder, VideoFrame};
use crate::error::Result;
use crate::graphics::FrameDesc;
use crate::movie::profile::{ProfileScope, Profiler};
use crate::movie::queue::{FrameConsumer, FrameItem};

pub struct VideoWriter {
    muxer: Box<dyn Muxer>,
    encoder: Box<dyn VideoEncoder>,
    desc: FrameDesc,
    codec_timebase: Rational,
    stream_timebase: Rational,
    /// Incremented and written as PTS for every submitted frame.
    presentation_index: i64,
}

impl VideoWriter {
    pub fn new(
        muxer: Box<dyn Muxer>,
        encoder: Box<dyn VideoEncoder>,
        desc: FrameDesc,
        framerate: u32,
    ) -> Self {
        let timebase = Rational::per_frame(framerate);

        Self {
            muxer,
            encoder,
            desc,
            codec_timebase: timebase,
            stream_timebase: timebase,
            presentation_index: 0,
        }
    }

    pub fn write_header(&mut self) -> Result<()> {
        self.muxer.write_header()
    }

    pub fn presentation_index(&self) -> i64 {
        self.presentation_index
    }

    /// Submits one raw frame and drains the packets it produced.
    pub fn send_raw_frame(&mut self, item: &FrameItem) -> Result<()> {
        let mut planes: [&[u8]; 3] = [&[], &[], &[]];
        for (slot, plane) in planes.iter_mut().zip(&item.planes) {
            *slot = plane.as_slice();
        }

        let frame = VideoFrame {
            desc: &self.desc,
            planes,
            pts: self.presentation_index,
        };
        self.presentation_index += 1;

        self.encoder.send_frame(Some(&frame))?;
        self.receive_packets()
    }

    fn receive_packets(&mut self) -> Result<()> {
        while let Some(mut packet) = self.encoder.receive_packet()? {
            packet.rescale_ts(self.codec_timebase, self.stream_timebase);
            self.muxer.write_packet(packet)?;
        }
        Ok(())
    }

    /// Flush frame, remaining packets, container trailer.
    pub fn finish(&mut self) -> Result<()> {
        self.encoder.send_frame(None)?;
        self.receive_packets()?;
        self.muxer.write_trailer()
    }
}

/// Spawns the per-stream encoder thread: drain the queue, feed the codec,
/// exit on the stop flag after a final drain. The writer travels back
/// through the join handle.
pub fn spawn_encoder_thread(
    mut writer: VideoWriter,
    consumer: FrameConsumer,
    stop: Arc<AtomicBool>,
    profiler: Arc<Profiler>,
) -> JoinHandle<VideoWriter> {
    thread::Builder::new()
        .name("sdr-encoder".into())
        .spawn(move || {
            let mut encode = |item: FrameItem| {
                let result = profiler.measure(ProfileScope::Encode, || {
                    writer.send_raw_frame(&item)
                });

                if let Err(err) = result {
                    // Runtime encoder errors drop the frame, not the movie.
                    warn!("dropping frame: {err}");
                }
            };

            loop {
                match consumer.dequeue_timeout(Duration::from_millis(1)) {
                    Some(item) => {
                        encode(item);
                        while let Some(item) = consumer.try_dequeue() {
                            encode(item);
                        }
                    }
                    None => {
                        if stop.load(Ordering::Acquire) {
                            while let Some(item) = consumer.try_dequeue() {
                                encode(item);
                            }
                            break;
                        }
                    }
                }
            }

            writer
        })
        .expect("could not spawn encoder thread")
}
