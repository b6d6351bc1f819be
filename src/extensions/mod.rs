//! Third-party extension loading, ordering and event dispatch, plus the
//! host-side implementation of the capability table extensions program
//! against. The ABI itself lives in the `sdr-extension` crate.

mod host;
mod import;

pub use host::{Extension, ExtensionHost, ExtensionInfo};
pub(crate) use import::{set_graphics_device, set_recording};
