//! Host engine interface.
//!
//! The rendering engine the recorder is embedded in is an external
//! collaborator; this trait is the full surface the core consumes from it.
//! The host provides its graphics device and the current backbuffer, a few
//! frame-state predicates, and window-level requests issued at end of movie.
//!
//! The backbuffer texture must carry `COPY_SRC` and `TEXTURE_BINDING`
//! usages so it can be published into the shared surface either by copy or
//! by a nearest-neighbor blit.

use std::path::Path;

pub trait HostEngine: Send + Sync {
    /// Device shared between the host renderer and the recorder's compute
    /// pipelines. Cross-API sharing from the original design collapses to
    /// same-device sharing here.
    fn device(&self) -> &wgpu::Device;

    fn queue(&self) -> &wgpu::Queue;

    /// The texture currently bound as the primary render target.
    fn backbuffer(&self) -> wgpu::Texture;

    fn backbuffer_size(&self) -> (u32, u32);

    /// True while the host is presenting a loading screen. Ticks during
    /// loading are skipped.
    fn is_drawing_loading(&self) -> bool {
        false
    }

    /// True while the host's own console UI covers the frame.
    fn is_console_visible(&self) -> bool {
        false
    }

    /// Directory that anchors relative resource lookups (`Extensions/`,
    /// default output location).
    fn resource_root(&self) -> &Path;

    /// Flash the host window to signal completion.
    fn flash_window(&self) {}

    /// Submit a command line to the host's own console (`quit`).
    fn client_command(&self, _command: &str) {}
}
