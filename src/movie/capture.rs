//! # Capture Orchestrator
//!
//! Entry point for the host's view-render tick while a movie is running.
//! Order of business per tick:
//!
//! 1. Memory-pressure guard: if holding one more frame would cross the
//!    byte budget, sleep in 1 ms steps until every queue has drained.
//! 2. First captured tick: publish the backbuffer only and skip encoding.
//!    The host's first post-start frame is black; this applies to the
//!    pass-through path as well.
//! 3. Per stream: publish the backbuffer into the shared surface, run the
//!    sample scheduler (or the pass-through shortcut), and on emit convert,
//!    download and enqueue for the encoder thread.
//!
//! A failed publish or download drops that tick's frame with a log and
//! never tears down the session.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::extensions::ExtensionHost;
use crate::graphics::{ComputeContext, ConversionStage, SamplingAccumulator, SharedSurface};
use crate::movie::profile::{ProfileScope, Profiler};
use crate::movie::queue::{Counters, FrameItem, FrameProducer};
use crate::movie::scheduler::{self, SampleSink, SamplingConfig, SamplingState};

/// Everything one video stream needs on the capture side.
pub(crate) struct StreamPipeline {
    pub surface: SharedSurface,
    pub accumulator: SamplingAccumulator,
    pub conversion: ConversionStage,
    pub state: SamplingState,
    pub producer: FrameProducer,
}

impl StreamPipeline {
    fn frame_bytes(&self) -> usize {
        self.conversion.desc().plane_sizes.iter().sum()
    }
}

/// Stalls the capture thread until the queues are empty when another frame
/// would cross the memory budget.
pub(crate) fn wait_for_buffered_items(counters: &Counters, next_frame_bytes: usize) {
    if !counters.would_overflow(next_frame_bytes) {
        return;
    }

    while counters.buffered_items() > 0 {
        thread::sleep(Duration::from_millis(1));
    }
}

pub(crate) struct TickContext<'a> {
    pub ctx: &'a ComputeContext,
    pub sampling: SamplingConfig,
    pub counters: &'a Arc<Counters>,
    pub profiler: &'a Profiler,
    pub extensions: Option<&'a ExtensionHost>,
}

/// Runs one capture tick over all streams. `first_frame` is flipped on the
/// session's first captured tick, which publishes without encoding.
pub(crate) fn capture_tick(
    tick: &TickContext<'_>,
    pipelines: &mut [StreamPipeline],
    host_rt: &wgpu::Texture,
    first_frame: &mut bool,
) {
    tick.profiler.measure(ProfileScope::Tick, || {
        let next_bytes = pipelines.iter().map(StreamPipeline::frame_bytes).sum();
        wait_for_buffered_items(tick.counters, next_bytes);

        if *first_frame {
            *first_frame = false;
            for pipeline in pipelines.iter() {
                pipeline.surface.blit_from(tick.ctx, host_rt);
            }
            return;
        }

        for pipeline in pipelines.iter_mut() {
            if !pipeline.surface.blit_from(tick.ctx, host_rt) {
                continue;
            }

            if tick.sampling.enabled {
                let mut state = pipeline.state;
                let mut sink = StreamSink {
                    tick,
                    accumulator: &pipeline.accumulator,
                    conversion: &pipeline.conversion,
                    producer: &pipeline.producer,
                };
                scheduler::advance(&mut state, &tick.sampling, &mut sink);
                pipeline.state = state;
            } else {
                pipeline.accumulator.pass(tick.ctx);
                emit_frame(tick, &pipeline.conversion, &pipeline.producer);
            }
        }
    });
}

/// Converts the work buffer, downloads the planes and hands them to the
/// encoder queue. Extensions see the work buffer right before conversion.
fn emit_frame(tick: &TickContext<'_>, conversion: &ConversionStage, producer: &FrameProducer) {
    if let Some(extensions) = tick.extensions {
        extensions.event_new_video_frame(tick.ctx, conversion.work_buffer());
    }

    tick.profiler
        .measure(ProfileScope::Conversion, || conversion.dispatch(tick.ctx));

    let planes = tick
        .profiler
        .measure(ProfileScope::Download, || conversion.download(tick.ctx));

    match planes {
        Some(planes) => producer.enqueue(FrameItem { planes }),
        None => tick.counters.count_dropped(),
    }
}

struct StreamSink<'a, 'b> {
    tick: &'a TickContext<'b>,
    accumulator: &'a SamplingAccumulator,
    conversion: &'a ConversionStage,
    producer: &'a FrameProducer,
}

impl SampleSink for StreamSink<'_, '_> {
    fn weighted_add(&mut self, weight: f32) {
        self.accumulator.weighted_add(self.tick.ctx, weight);
    }

    fn emit(&mut self) {
        emit_frame(self.tick, self.conversion, self.producer);
    }

    fn clear(&mut self) {
        self.accumulator.clear(self.tick.ctx);
    }
}
