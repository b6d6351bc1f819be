//! The frame pipeline around a recording session: per-tick orchestration,
//! the sample scheduler, the capture/encoder hand-off queue, and the
//! session lifecycle itself.

pub(crate) mod capture;
pub mod profile;
pub mod queue;
pub mod scheduler;
pub mod session;

pub use queue::{Counters, FrameItem, QUEUE_CAPACITY};
pub use scheduler::{SampleSink, SamplingConfig, SamplingState};
pub use session::{MovieSession, MovieVars, SessionState};
