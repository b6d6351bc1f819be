//! # Real-Time Frame Capture & Encoding Engine
//!
//! A recording core for a host rendering engine: it continuously acquires
//! rendered frames from the host's graphics context, optionally integrates
//! motion blur over sub-frame samples, converts the accumulated color into
//! the encoder's native pixel layout on the GPU, and streams compressed
//! packets into a container file while a parallel writer captures audio
//! PCM. Third-party extension modules can contribute console variables,
//! hook the movie lifecycle, and receive the live GPU frame buffer.
//!
//! ## Architecture
//!
//! Per captured tick, data flows through the pipeline left to right:
//!
//! ```text
//! host render tick
//!   └─ SharedSurface::blit_from      publish backbuffer          (graphics)
//!        └─ SampleScheduler          classify the sample         (movie)
//!             └─ SamplingAccumulator weighted add / pass / clear (graphics)
//!                  └─ ConversionStage YUV/BGR0 kernels + readback(graphics)
//!                       └─ FrameQueue bounded SPSC hand-off      (movie)
//!                            └─ encoder thread → codec → muxer   (encode)
//! ```
//!
//! The audio path runs independently on the host's mix callback. The
//! [`Library`] value wires everything to the console registry and the
//! extension host; one [`movie::MovieSession`] exists per recording.
//!
//! ## Collaborators
//!
//! The host engine ([`host::HostEngine`]) and the codec library
//! ([`encode::CodecProvider`]) are external: the core consumes them
//! through traits and never owns their policy. A GStreamer-backed provider
//! is available behind the `gst-output` feature.
//!
//! ## Threading
//!
//! The capture thread is the host's render thread. Each video stream owns
//! one encoder thread; audio owns one writer thread. Queues are
//! single-producer/single-consumer with atomic counters; the only
//! process-wide state is the console registry.

pub mod console;
pub mod encode;
pub mod error;
pub mod extensions;
pub mod graphics;
pub mod host;
pub mod movie;

use std::sync::{Arc, Mutex, Weak};

use log::{info, warn};

use console::CommandArgs;
use encode::CodecProvider;
use error::Result;
use extensions::ExtensionHost;
use host::HostEngine;
use movie::session::{trim_file_name, MovieSession};
use movie::MovieVars;

pub use error::{Error, ErrorKind};

/// The recorder library: console variables and commands, loaded
/// extensions, and the current movie session (at most one).
pub struct Library {
    host: Arc<dyn HostEngine>,
    provider: Arc<dyn CodecProvider>,
    vars: MovieVars,
    extensions: ExtensionHost,
    session: Mutex<Option<MovieSession>>,
}

impl Library {
    /// Registers every console variable and command, loads the extensions
    /// under the host's resource root, and fires their `ready` event.
    pub fn load(host: Arc<dyn HostEngine>, provider: Arc<dyn CodecProvider>) -> Arc<Library> {
        let vars = MovieVars::register(console::registry());
        let extensions = ExtensionHost::load_all(host.resource_root());

        let library = Arc::new(Library {
            host,
            provider,
            vars,
            extensions,
            session: Mutex::new(None),
        });

        library.register_commands();
        library.extensions.event_ready();

        library
    }

    fn register_commands(self: &Arc<Self>) {
        let registry = console::registry();

        let weak = Arc::downgrade(self);
        registry.make_command_args("startmovie", move |args| {
            if let Some(library) = Weak::upgrade(&weak) {
                library.command_start_movie(args);
            }
        });

        let weak = Arc::downgrade(self);
        registry.make_command_void("endmovie", move || {
            if let Some(library) = Weak::upgrade(&weak) {
                library.end_movie();
            }
        });

        let weak = Arc::downgrade(self);
        registry.make_command_void("sdr_extensions_list", move || {
            if let Some(library) = Weak::upgrade(&weak) {
                if !library.extensions.has_extensions() {
                    info!("no extensions loaded");
                    return;
                }
                for line in library.extensions.list_lines() {
                    info!("{line}");
                }
            }
        });
    }

    fn command_start_movie(&self, args: &CommandArgs) {
        if args.count() < 2 {
            info!("a name is required for \"startmovie\"");
            return;
        }

        if let Err(err) = self.start_movie(args.full_value()) {
            warn!("could not start processing: {err}");
        }
    }

    /// Starts a session for `filename`. No concurrent start: a second call
    /// while one is active only prints a notice.
    pub fn start_movie(&self, filename: &str) -> Result<()> {
        let mut slot = self.session.lock().unwrap();

        if slot.is_some() {
            info!("processing is already started");
            return Ok(());
        }

        let name = trim_file_name(filename);

        let session = if self.vars.audio_only.get_bool() {
            MovieSession::start_audio(&*self.host, &self.vars, console::registry(), &name)?
        } else {
            MovieSession::start_video(
                &*self.host,
                &*self.provider,
                &self.vars,
                &self.extensions,
                console::registry(),
                &name,
            )?
        };

        *slot = Some(session);
        Ok(())
    }

    /// Ends the session. Idempotent; extensions see `end_movie`
    /// synchronously before this returns.
    pub fn end_movie(&self) {
        let session = self.session.lock().unwrap().take();

        match session {
            Some(session) => {
                session.end(&*self.host, &self.vars, &self.extensions, console::registry())
            }
            None => info!("no processing is started"),
        }
    }

    /// Hook for the host's view-render tick.
    pub fn tick_render(&self) {
        if let Some(session) = self.session.lock().unwrap().as_mut() {
            session.tick(&*self.host, &self.extensions);
        }
    }

    /// Hook for the host's audio-mix output.
    pub fn tick_audio(&self, samples: &[i16]) {
        if let Some(session) = self.session.lock().unwrap().as_mut() {
            session.audio_tick(&*self.host, samples);
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    /// Whether the host should skip its own scene rendering: audio-only
    /// sessions suppress video work when so configured.
    pub fn suppresses_host_video(&self) -> bool {
        self.vars.audio_disable_video.get_bool()
            && self
                .session
                .lock()
                .unwrap()
                .as_ref()
                .map(MovieSession::is_audio_only)
                .unwrap_or(false)
    }

    /// Routes a host config entry to extensions by namespace; the first to
    /// handle it wins.
    pub fn dispatch_config(&self, key: &str, value_json: &str) -> bool {
        self.extensions.dispatch_config(key, value_json)
    }

    pub fn extensions(&self) -> &ExtensionHost {
        &self.extensions
    }

    pub fn vars(&self) -> &MovieVars {
        &self.vars
    }
}
