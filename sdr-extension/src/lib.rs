// SPDX-License-Identifier: MIT
//! # Movie Recorder Extension ABI
//!
//! This crate defines the C ABI between the recorder core and third-party
//! extension modules. Extensions are dynamic libraries placed in
//! `Extensions/Enabled/`; the core resolves a fixed set of exports from each
//! and calls them at well-defined points of the movie lifecycle.
//!
//! ## Exports
//!
//! | Export | Required | Called |
//! |--------|----------|--------|
//! | `sdr_query` | yes | once at load, fills [`QueryData`] |
//! | `sdr_initialize` | yes | once at load, receives [`InitializeData`] |
//! | `sdr_config_handler` | no | for config keys under the extension namespace |
//! | `sdr_ready` | no | after all extensions loaded, receives [`ImportData`] |
//! | `sdr_start_movie` | no | when a movie starts, receives [`StartMovieData`] |
//! | `sdr_end_movie` | no | when a movie ends |
//! | `sdr_new_video_frame` | no | per emitted video frame, receives [`NewVideoFrameData`] |
//!
//! ## Capability table
//!
//! Rather than linking against the core, extensions receive [`ImportData`]:
//! a table of function values covering console variables, command
//! registration, argument parsing, wall clock, recording state, the host
//! graphics device and enumeration of other extensions. Missing knowledge of
//! newer table members is tolerated by the versioning rule: members are only
//! ever appended.
//!
//! String-returning capabilities copy into a caller buffer and return the
//! full length, so no ownership crosses the boundary.

use std::os::raw::{c_char, c_void};

/// Bumped when the layout of any structure in this crate changes
/// incompatibly. Reported to extensions through [`ImportData`] so they can
/// bail out of a host they do not understand.
pub const API_VERSION: u32 = 1;

/// Filled by the extension's `sdr_query` export. All strings are expected to
/// point at storage with `'static` lifetime inside the extension module.
/// Null entries are presented as absent.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct QueryData {
    pub name: *const c_char,
    /// Prefix owned by this extension. Config keys starting with it are
    /// routed to the extension's `sdr_config_handler`.
    pub namespace_: *const c_char,
    pub author: *const c_char,
    pub contact: *const c_char,
    pub version: u32,
    pub dependencies: *const c_char,
}

impl Default for QueryData {
    fn default() -> Self {
        Self {
            name: std::ptr::null(),
            namespace_: std::ptr::null(),
            author: std::ptr::null(),
            contact: std::ptr::null(),
            version: 0,
            dependencies: std::ptr::null(),
        }
    }
}

/// Log sinks handed to `sdr_initialize`. Messages are single-line,
/// nul-terminated UTF-8.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct InitializeData {
    pub message: unsafe extern "C" fn(text: *const c_char),
    pub message_color: unsafe extern "C" fn(r: u8, g: u8, b: u8, text: *const c_char),
    pub warning: unsafe extern "C" fn(text: *const c_char),
}

/// Console command callback without arguments.
pub type CommandCallbackVoid = unsafe extern "C" fn();

/// Console command callback receiving an opaque argument pack. Use the
/// `get_command_argument_*` capabilities to inspect it.
pub type CommandCallbackArgs = unsafe extern "C" fn(args: *const c_void);

/// The capability table given to `sdr_ready`.
///
/// Console variables created through this table are owned by the core and
/// addressed by the returned opaque key. `extension_key` identifies the
/// receiving extension and increases monotonically in load order.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ImportData {
    pub api_version: u32,
    pub extension_key: u32,

    pub make_bool: unsafe extern "C" fn(name: *const c_char, value: *const c_char) -> u32,
    pub make_number: unsafe extern "C" fn(name: *const c_char, value: *const c_char) -> u32,
    pub make_number_min:
        unsafe extern "C" fn(name: *const c_char, value: *const c_char, min: f32) -> u32,
    pub make_number_min_max:
        unsafe extern "C" fn(name: *const c_char, value: *const c_char, min: f32, max: f32) -> u32,
    pub make_number_min_max_string:
        unsafe extern "C" fn(name: *const c_char, value: *const c_char, min: f32, max: f32) -> u32,
    pub make_string: unsafe extern "C" fn(name: *const c_char, value: *const c_char) -> u32,

    pub get_bool: unsafe extern "C" fn(key: u32) -> bool,
    pub get_int: unsafe extern "C" fn(key: u32) -> i32,
    pub get_float: unsafe extern "C" fn(key: u32) -> f32,
    /// Copies the value into `buf` (up to `cap` bytes, nul-terminated) and
    /// returns the full value length.
    pub get_string: unsafe extern "C" fn(key: u32, buf: *mut c_char, cap: usize) -> usize,

    pub get_external_bool: unsafe extern "C" fn(name: *const c_char) -> bool,
    pub get_external_int: unsafe extern "C" fn(name: *const c_char) -> i32,
    pub get_external_float: unsafe extern "C" fn(name: *const c_char) -> f32,
    pub get_external_string:
        unsafe extern "C" fn(name: *const c_char, buf: *mut c_char, cap: usize) -> usize,

    pub make_command_void: unsafe extern "C" fn(name: *const c_char, func: CommandCallbackVoid),
    pub make_command_args: unsafe extern "C" fn(name: *const c_char, func: CommandCallbackArgs),

    pub get_command_argument_count: unsafe extern "C" fn(args: *const c_void) -> i32,
    pub get_command_argument_at:
        unsafe extern "C" fn(args: *const c_void, index: i32, buf: *mut c_char, cap: usize) -> usize,
    pub get_command_argument_full:
        unsafe extern "C" fn(args: *const c_void, buf: *mut c_char, cap: usize) -> usize,
    pub get_command_argument_full_value:
        unsafe extern "C" fn(args: *const c_void, buf: *mut c_char, cap: usize) -> usize,

    /// Wall clock in seconds, monotonic origin unspecified.
    pub get_time_now: unsafe extern "C" fn() -> f64,
    pub is_recording_video: unsafe extern "C" fn() -> bool,
    /// The host graphics device as an opaque handle. For the reference core
    /// this is a `*const wgpu::Device` valid while the library is loaded.
    pub get_graphics_device: unsafe extern "C" fn() -> *const c_void,

    pub get_extension_count: unsafe extern "C" fn() -> u32,
    pub get_extension_file_name:
        unsafe extern "C" fn(key: u32, buf: *mut c_char, cap: usize) -> usize,
}

/// Movie parameters passed to `sdr_start_movie`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct StartMovieData {
    /// Opaque `*const wgpu::Device` of the session.
    pub device: *const c_void,
    pub width: u32,
    pub height: u32,
    /// Container framerate.
    pub frame_rate: u32,
    /// Rate the host engine runs at while recording (framerate times the
    /// sample multiplier when sampling is on).
    pub host_frame_rate: u32,
    pub time_per_frame: f64,
    pub time_per_sample: f64,
}

/// Live frame state passed to `sdr_new_video_frame` right before the
/// conversion kernel runs. The work buffer holds the accumulated linear
/// color for the frame about to be emitted.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NewVideoFrameData {
    /// Opaque `*const wgpu::Device`.
    pub device: *const c_void,
    /// Opaque `*const wgpu::Queue`.
    pub queue: *const c_void,
    /// Opaque `*const wgpu::Buffer`; one `{vec3 color, pad}` element per pixel.
    pub work_buffer: *const c_void,
    pub thread_groups_x: u32,
    pub thread_groups_y: u32,
}

pub type Query = unsafe extern "C" fn(data: *mut QueryData);
pub type Initialize = unsafe extern "C" fn(data: *const InitializeData);
pub type ConfigHandler =
    unsafe extern "C" fn(name: *const c_char, value_json: *const c_char) -> bool;
pub type Ready = unsafe extern "C" fn(data: *const ImportData);
pub type StartMovie = unsafe extern "C" fn(data: *const StartMovieData);
pub type EndMovie = unsafe extern "C" fn();
pub type NewVideoFrame = unsafe extern "C" fn(data: *const NewVideoFrameData);

/// Export names resolved by the core, as nul-terminated byte strings
/// suitable for symbol lookup.
pub mod exports {
    pub const QUERY: &[u8] = b"sdr_query\0";
    pub const INITIALIZE: &[u8] = b"sdr_initialize\0";
    pub const CONFIG_HANDLER: &[u8] = b"sdr_config_handler\0";
    pub const READY: &[u8] = b"sdr_ready\0";
    pub const START_MOVIE: &[u8] = b"sdr_start_movie\0";
    pub const END_MOVIE: &[u8] = b"sdr_end_movie\0";
    pub const NEW_VIDEO_FRAME: &[u8] = b"sdr_new_video_frame\0";
}
