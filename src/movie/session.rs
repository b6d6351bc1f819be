//! # Movie Session
//!
//! Top-level start/stop lifecycle. A session value exists only between a
//! successful `start` and the matching `end`; it exclusively owns the
//! compute context, every stream's surface/queue/encoder-thread, and the
//! optional audio writer. Construction order is surface → conversion →
//! muxer → encoder → thread, and teardown runs the reverse after a flush.
//!
//! The session also wires the host's own settings for its duration: the
//! host framerate is forced to `fps x multiplier`, material queueing goes
//! single-threaded, focus sleep is disabled, and (audio-only) mix-ahead is
//! zeroed. All of them are restored on end.
//!
//! States run `Idle -> Starting -> Running -> Ending -> Idle`; `start` is
//! rejected outside Idle (the session slot being occupied), `tick` outside
//! Running is a no-op, and `end` is idempotent because the slot empties on
//! the first call.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{info, warn};

use crate::console::{Registry, Variable};
use crate::encode::{
    spawn_encoder_thread, CodecProvider, EncoderConfig, EncoderOptions, VideoWriter,
};
use crate::encode::audio::AudioStream;
use crate::error::{Error, Result};
use crate::extensions::ExtensionHost;
use crate::graphics::{
    ColorRange, Colorspace, ComputeContext, ConversionStage, FrameDesc, PixelFormat,
    SamplingAccumulator, SharedSurface,
};
use crate::host::HostEngine;
use crate::movie::capture::{self, StreamPipeline, TickContext};
use crate::movie::profile::Profiler;
use crate::movie::queue::{frame_queue, Counters};
use crate::movie::scheduler::{SamplingConfig, SamplingState};
use crate::extensions;

/// All recorder console variables, registered once at library setup.
pub struct MovieVars {
    pub output_directory: Variable,
    pub flash_window: Variable,
    pub exit_on_finish: Variable,

    pub framerate: Variable,
    pub yuv_colorspace: Variable,
    pub encoder: Variable,
    pub pixel_format: Variable,
    pub suppress_log: Variable,

    pub sample_multiply: Variable,
    pub sample_exposure: Variable,

    pub staging: Variable,
    pub debug_device: Variable,

    pub x264_crf: Variable,
    pub x264_preset: Variable,
    pub x264_intra: Variable,

    pub audio_only: Variable,
    pub audio_disable_video: Variable,
}

impl MovieVars {
    pub fn register(registry: &Registry) -> Self {
        Self {
            output_directory: registry.make_string("sdr_outputdir", ""),
            flash_window: registry.make_bool("sdr_endmovieflash", "0"),
            exit_on_finish: registry.make_bool("sdr_endmoviequit", "0"),

            framerate: registry.make_number_min_max("sdr_video_fps", "60", 30.0, 1000.0),
            yuv_colorspace: registry.make_string("sdr_video_yuvspace", "709"),
            encoder: registry.make_string("sdr_video_encoder", "libx264rgb"),
            pixel_format: registry.make_string("sdr_video_pxformat", ""),
            suppress_log: registry.make_bool("sdr_video_lav_suppresslog", "1"),

            sample_multiply: registry.make_number_min("sdr_video_sample_mult", "32", 0.0),
            sample_exposure: registry.make_number_min_max(
                "sdr_video_sample_exposure",
                "0.5",
                0.0,
                1.0,
            ),

            staging: registry.make_bool("sdr_video_d3d11_staging", "1"),
            debug_device: registry.make_bool("sdr_video_debug", "0"),

            x264_crf: registry.make_number_min_max_string("sdr_video_x264_crf", "0", 0.0, 51.0),
            x264_preset: registry.make_string("sdr_video_x264_preset", "ultrafast"),
            x264_intra: registry.make_bool("sdr_video_x264_intra", "1"),

            audio_only: registry.make_bool("sdr_audio_only", "0"),
            audio_disable_video: registry.make_bool("sdr_audio_disable_video", "1"),
        }
    }
}

const CONTAINERS: [&str; 4] = [".avi", ".mp4", ".mov", ".mkv"];

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const ILLEGAL_SYMBOLS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

pub(crate) fn trim_file_name(name: &str) -> String {
    name.trim().to_string()
}

/// Rejects reserved device names and symbols the target filesystem cannot
/// take. Only the part before the first dot is inspected.
pub(crate) fn validate_file_name(name: &str) -> Result<()> {
    let stem = name.split('.').next().unwrap_or("");

    if stem.is_empty() {
        return Err(Error::config("a file name is required"));
    }

    for symbol in ILLEGAL_SYMBOLS {
        if stem.contains(symbol) {
            return Err(Error::config(format!(
                "file name has illegal symbol \"{symbol}\""
            )));
        }
    }

    for reserved in RESERVED_NAMES {
        if stem.eq_ignore_ascii_case(reserved) {
            return Err(Error::config(format!(
                "file name \"{reserved}\" is reserved"
            )));
        }
    }

    Ok(())
}

/// Requires one of the known container extensions, printing the list on a
/// miss.
pub(crate) fn validate_extension(name: &str) -> Result<()> {
    let extension = Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()));

    match extension {
        None => {
            warn!("no file extension; available containers:");
            for container in CONTAINERS {
                info!("{container}");
            }
            Err(Error::config("missing file extension"))
        }
        Some(ext) if !CONTAINERS.contains(&ext.as_str()) => {
            warn!("unknown file extension; available containers:");
            for container in CONTAINERS {
                info!("{container}");
            }
            Err(Error::config("unknown file extension"))
        }
        Some(_) => Ok(()),
    }
}

/// Empty setting means the resource root; anything else must already
/// exist.
pub(crate) fn resolve_output_directory(setting: &str, host: &dyn HostEngine) -> Result<PathBuf> {
    if setting.is_empty() {
        return Ok(host.resource_root().to_path_buf());
    }

    let path = PathBuf::from(setting);
    if !path.is_dir() {
        return Err(Error::config(format!(
            "could not access output directory \"{setting}\""
        )));
    }

    Ok(path)
}

pub(crate) fn audio_file_name(video_path: &Path) -> PathBuf {
    video_path.with_extension("wav")
}

fn colorspace_from_setting(setting: &str) -> Colorspace {
    match setting {
        "601" => Colorspace::Bt601,
        // Unknown values fall back to the default space.
        _ => Colorspace::Bt709,
    }
}

const SLOW_PRESETS: [&str; 4] = ["slow", "slower", "veryslow", "placebo"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Ending,
}

#[derive(Default)]
struct SavedHostVars {
    mat_queue_mode: Option<i32>,
    engine_sleep: Option<i32>,
    mix_ahead: Option<f32>,
}

pub struct MovieSession {
    state: SessionState,

    sampling: SamplingConfig,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
    profiler: Arc<Profiler>,

    /// The first captured tick only publishes the backbuffer; the host's
    /// first post-start frame is black.
    first_frame: bool,

    ctx: Option<ComputeContext>,
    pipelines: Vec<StreamPipeline>,
    encoder_threads: Vec<JoinHandle<VideoWriter>>,

    audio: Option<AudioStream>,

    saved: SavedHostVars,
}

impl MovieSession {
    /// Builds and starts a video session. Any failure unwinds completely:
    /// host settings are only touched once every fallible step has passed.
    pub fn start_video(
        host: &dyn HostEngine,
        provider: &dyn CodecProvider,
        vars: &MovieVars,
        extensions: &ExtensionHost,
        registry: &Registry,
        filename: &str,
    ) -> Result<MovieSession> {
        validate_file_name(filename)?;
        validate_extension(filename)?;

        let encoder_name = vars.encoder.get_string();
        let Some(encoder_info) = provider.find_encoder(&encoder_name) else {
            warn!("encoder \"{encoder_name}\" not found, available encoders:");
            for name in provider.encoder_names() {
                info!("{name}");
            }
            return Err(Error::codec("encoder not found"));
        };

        if encoder_info.h264 {
            let preset = vars.x264_preset.get_string();
            if SLOW_PRESETS.iter().any(|p| preset.eq_ignore_ascii_case(p)) {
                warn!("slow encoder preset chosen, this might not work very well for realtime");
            }
        }

        if encoder_info.pixel_formats.is_empty() {
            return Err(Error::codec(format!(
                "encoder \"{encoder_name}\" advertises no pixel formats"
            )));
        }

        // User format if the encoder supports it, otherwise the encoder's
        // first advertised format.
        let requested = PixelFormat::parse(&vars.pixel_format.get_string());
        let format = requested
            .filter(|f| encoder_info.pixel_formats.contains(f))
            .unwrap_or(encoder_info.pixel_formats[0]);

        let (colorspace, color_range) = if format.is_rgb() {
            (Colorspace::Rgb, ColorRange::Unspecified)
        } else {
            (
                colorspace_from_setting(&vars.yuv_colorspace.get_string()),
                ColorRange::Full,
            )
        };

        let (width, height) = host.backbuffer_size();
        let desc = FrameDesc::new(width, height, format, colorspace, color_range)?;

        let fps = vars.framerate.get_int().max(1) as u32;
        let sampling = SamplingConfig::from_settings(
            fps,
            vars.sample_multiply.get_int().max(0) as u32,
            vars.sample_exposure.get_float(),
        );

        let ctx = ComputeContext::new(
            host.device().clone(),
            host.queue().clone(),
            width,
            height,
            sampling.enabled,
        )?;

        let surface = SharedSurface::create(&ctx, width, height)?;
        let conversion = ConversionStage::create(&ctx, desc.clone(), vars.staging.get_bool())?;
        let accumulator =
            SamplingAccumulator::new(&ctx, &surface, conversion.work_buffer(), sampling.enabled);

        let directory = resolve_output_directory(&vars.output_directory.get_string(), host)?;
        let video_path = directory.join(filename);

        let encoder_config = EncoderConfig {
            desc: desc.clone(),
            framerate: fps,
        };

        let muxer = provider.open_muxer(&video_path, &encoder_config)?;

        let mut options: EncoderOptions = Vec::new();
        if encoder_info.h264 {
            options.push(("preset".into(), vars.x264_preset.get_string()));
            options.push(("crf".into(), vars.x264_crf.get_string()));

            if vars.x264_intra.get_bool() {
                // Every frame a keyframe makes the output seekable from any
                // point in an editor.
                options.push(("x264-params".into(), "keyint=1".into()));
            }
        }

        let encoder = provider.open_encoder(&encoder_info, &encoder_config, &options)?;

        let mut writer = VideoWriter::new(muxer, encoder, desc, fps);
        writer.write_header()?;

        // Everything fallible has passed; side effects begin here.

        let counters = Counters::new();
        let stop = Arc::new(AtomicBool::new(false));
        let profiler = Arc::new(Profiler::new());

        let (producer, consumer) = frame_queue(counters.clone());
        let thread = spawn_encoder_thread(writer, consumer, stop.clone(), profiler.clone());

        let pipelines = vec![StreamPipeline {
            surface,
            accumulator,
            conversion,
            state: SamplingState::default(),
            producer,
        }];

        let mut saved = SavedHostVars::default();

        registry
            .find_or_register("host_framerate", "0")
            .set(sampling.host_framerate());
        saved.mat_queue_mode = Some(
            registry
                .find_or_register("mat_queue_mode", "0")
                .set_get_old_int(0),
        );
        saved.engine_sleep = Some(
            registry
                .find_or_register("engine_no_focus_sleep", "0")
                .set_get_old_int(0),
        );

        extensions::set_recording(true);
        extensions::set_graphics_device(
            ctx.device() as *const wgpu::Device as *const std::os::raw::c_void,
        );

        extensions.event_start_movie(&sdr_extension::StartMovieData {
            device: ctx.device() as *const wgpu::Device as *const std::os::raw::c_void,
            width,
            height,
            frame_rate: fps,
            host_frame_rate: sampling.host_framerate(),
            time_per_frame: sampling.time_per_frame,
            time_per_sample: sampling.time_per_sample,
        });

        info!("started video processing to \"{}\"", video_path.display());

        Ok(MovieSession {
            state: SessionState::Running,
            sampling,
            counters,
            stop,
            profiler,
            first_frame: true,
            ctx: Some(ctx),
            pipelines,
            encoder_threads: vec![thread],
            audio: None,
            saved,
        })
    }

    /// Starts an audio-only session: a WAVE writer and its worker, no
    /// video-path resources at all.
    pub fn start_audio(
        host: &dyn HostEngine,
        vars: &MovieVars,
        registry: &Registry,
        filename: &str,
    ) -> Result<MovieSession> {
        validate_file_name(filename)?;

        let directory = resolve_output_directory(&vars.output_directory.get_string(), host)?;
        let wav_path = audio_file_name(&directory.join(filename));

        let counters = Counters::new();
        let stop = Arc::new(AtomicBool::new(false));

        let audio = AudioStream::open(&wav_path, counters.clone(), stop.clone())?;

        let mut saved = SavedHostVars::default();
        saved.mix_ahead = Some(
            registry
                .find_or_register("snd_mixahead", "0")
                .set_get_old_float(0.0),
        );
        saved.engine_sleep = Some(
            registry
                .find_or_register("engine_no_focus_sleep", "0")
                .set_get_old_int(0),
        );

        extensions::set_recording(true);

        info!("started audio processing to \"{}\"", wav_path.display());

        Ok(MovieSession {
            state: SessionState::Running,
            sampling: SamplingConfig::from_settings(vars.framerate.get_int().max(1) as u32, 0, 0.0),
            counters,
            stop,
            profiler: Arc::new(Profiler::new()),
            first_frame: true,
            ctx: None,
            pipelines: Vec::new(),
            encoder_threads: Vec::new(),
            audio: Some(audio),
            saved,
        })
    }

    pub fn is_audio_only(&self) -> bool {
        self.audio.is_some()
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Whether the video path should run for this tick.
    fn should_record_video(&self, host: &dyn HostEngine) -> bool {
        self.state == SessionState::Running
            && !host.is_drawing_loading()
            && !host.is_console_visible()
            && self.audio.is_none()
    }

    /// Capture tick, called from the host's view-render hook.
    pub fn tick(&mut self, host: &dyn HostEngine, extensions: &ExtensionHost) {
        if !self.should_record_video(host) {
            return;
        }

        let Some(ctx) = self.ctx.as_ref() else {
            return;
        };

        let tick = TickContext {
            ctx,
            sampling: self.sampling,
            counters: &self.counters,
            profiler: &self.profiler,
            extensions: Some(extensions),
        };

        let backbuffer = host.backbuffer();
        capture::capture_tick(&tick, &mut self.pipelines, &backbuffer, &mut self.first_frame);
    }

    /// Audio mix callback. The first call after start is skipped like the
    /// first video frame.
    pub fn audio_tick(&mut self, host: &dyn HostEngine, samples: &[i16]) {
        if self.state != SessionState::Running || self.audio.is_none() {
            return;
        }

        if host.is_drawing_loading() || host.is_console_visible() {
            return;
        }

        if self.first_frame {
            self.first_frame = false;
            return;
        }

        capture::wait_for_buffered_items(&self.counters, samples.len() * 2);

        if let Some(audio) = &self.audio {
            audio.write_samples(samples.to_vec());
        }
    }

    /// Drains queues, flushes encoders, writes trailers, restores host
    /// settings and fires the end events. Consumes the session; the
    /// caller's empty slot is what makes a second `end` a no-op.
    pub fn end(
        mut self,
        host: &dyn HostEngine,
        vars: &MovieVars,
        extensions: &ExtensionHost,
        registry: &Registry,
    ) {
        self.state = SessionState::Ending;

        info!("ending processing");

        if let Some(audio) = self.audio.take() {
            self.stop.store(true, Ordering::Release);

            if let Err(err) = audio.finish() {
                warn!("could not finalize audio file: {err}");
            }

            if let Some(old) = self.saved.mix_ahead {
                registry.find_or_register("snd_mixahead", "0").set(old);
            }
        } else {
            let remaining = self.counters.buffered_items();
            if remaining > 0 {
                info!("{remaining} buffered frames remaining");
            }

            self.stop.store(true, Ordering::Release);

            for thread in self.encoder_threads.drain(..) {
                match thread.join() {
                    Ok(mut writer) => {
                        // Flush frame, delayed packets, container trailer.
                        if let Err(err) = writer.finish() {
                            warn!("could not finalize output: {err}");
                        }
                    }
                    Err(_) => warn!("encoder thread panicked"),
                }
            }

            if let Some(old) = self.saved.mat_queue_mode {
                registry.find_or_register("mat_queue_mode", "0").set(old);
            }

            extensions.event_end_movie();
        }

        registry.find_or_register("host_framerate", "0").set(0);
        if let Some(old) = self.saved.engine_sleep {
            registry
                .find_or_register("engine_no_focus_sleep", "0")
                .set(old);
        }

        extensions::set_recording(false);
        extensions::set_graphics_device(std::ptr::null());

        if vars.exit_on_finish.get_bool() {
            host.client_command("quit\n");
            return;
        }

        if vars.flash_window.get_bool() {
            host.flash_window();
        }

        info!("processing is now complete");
        for line in self.profiler.summary() {
            info!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_reject_reserved_and_illegal() {
        assert!(validate_file_name("movie.mp4").is_ok());
        assert!(validate_file_name("my movie.mkv").is_ok());

        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("con.mp4").is_err());
        assert!(validate_file_name("LPT5.avi").is_err());
        assert!(validate_file_name("a<b.mp4").is_err());
        assert!(validate_file_name("what?.mov").is_err());
        assert!(validate_file_name("dir/movie.mp4").is_err());
    }

    #[test]
    fn extensions_must_be_known_containers() {
        for good in ["a.avi", "a.mp4", "a.mov", "a.mkv", "a.MP4"] {
            assert!(validate_extension(good).is_ok(), "{good}");
        }

        assert!(validate_extension("movie").is_err());
        assert!(validate_extension("movie.webm").is_err());
    }

    #[test]
    fn trim_strips_surrounding_whitespace() {
        assert_eq!(trim_file_name("  movie.mp4  "), "movie.mp4");
        assert_eq!(trim_file_name("movie.mp4"), "movie.mp4");
    }

    #[test]
    fn audio_names_swap_extension() {
        assert_eq!(
            audio_file_name(Path::new("/tmp/out/movie.mp4")),
            Path::new("/tmp/out/movie.wav")
        );
    }

    #[test]
    fn colorspace_setting_defaults_to_709() {
        assert_eq!(colorspace_from_setting("601"), Colorspace::Bt601);
        assert_eq!(colorspace_from_setting("709"), Colorspace::Bt709);
        assert_eq!(colorspace_from_setting("2020"), Colorspace::Bt709);
    }
}
