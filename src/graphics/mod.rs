//! GPU side of the frame pipeline: the shared surface the host publishes
//! into, the accumulation kernels, and the conversion to encoder-native
//! layouts with CPU readback.

mod context;
mod convert;
mod sampling;
mod shared_surface;

pub use context::{request_standalone_device, ComputeContext};
pub use convert::{ColorRange, Colorspace, ConversionStage, FrameDesc, PixelFormat};
pub use sampling::SamplingAccumulator;
pub use shared_surface::SharedSurface;
