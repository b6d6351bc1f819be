//! # Sampling Accumulator
//!
//! The three operations the capture tick performs against a stream's work
//! buffer:
//!
//! - `weighted_add` adds `weight * source` into every work pixel. The sum
//!   of weights since the last clear is the buffer's effective exposure.
//! - `pass` overwrites the buffer pixel-for-pixel (non-sampling path).
//! - `clear` zeroes the buffer after an emit.
//!
//! Each operation submits its dispatch immediately through
//! [`ComputeContext::dispatch`]; see the note there on why accumulations
//! must not be left queued.

use super::context::ComputeContext;
use super::shared_surface::SharedSurface;

pub struct SamplingAccumulator {
    sampling_bind: Option<wgpu::BindGroup>,
    clear_bind: Option<wgpu::BindGroup>,
    pass_bind: Option<wgpu::BindGroup>,
}

impl SamplingAccumulator {
    /// Builds bind groups tying the stream's surface and work buffer to the
    /// context kernels. Only the groups for the active mode are created.
    pub fn new(
        ctx: &ComputeContext,
        surface: &SharedSurface,
        work_buffer: &wgpu::Buffer,
        sampling: bool,
    ) -> Self {
        let device = ctx.device();

        if sampling {
            let sampling_bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("sdr sampling"),
                layout: &ctx.sampling_pipeline().get_bind_group_layout(0),
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(surface.view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: work_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: ctx.shared_constants().as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: ctx.weight_constant().as_entire_binding(),
                    },
                ],
            });

            let clear_bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("sdr clear"),
                layout: &ctx.clear_pipeline().get_bind_group_layout(0),
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: work_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: ctx.shared_constants().as_entire_binding(),
                    },
                ],
            });

            Self {
                sampling_bind: Some(sampling_bind),
                clear_bind: Some(clear_bind),
                pass_bind: None,
            }
        } else {
            let pass_bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("sdr pass"),
                layout: &ctx.pass_pipeline().get_bind_group_layout(0),
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(surface.view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: work_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: ctx.shared_constants().as_entire_binding(),
                    },
                ],
            });

            Self {
                sampling_bind: None,
                clear_bind: None,
                pass_bind: Some(pass_bind),
            }
        }
    }

    pub fn weighted_add(&self, ctx: &ComputeContext, weight: f32) {
        ctx.write_weight(weight);
        ctx.dispatch(
            ctx.sampling_pipeline(),
            self.sampling_bind.as_ref().expect("sampling mode"),
        );
    }

    pub fn pass(&self, ctx: &ComputeContext) {
        ctx.dispatch(
            ctx.pass_pipeline(),
            self.pass_bind.as_ref().expect("pass mode"),
        );
    }

    pub fn clear(&self, ctx: &ComputeContext) {
        ctx.dispatch(
            ctx.clear_pipeline(),
            self.clear_bind.as_ref().expect("sampling mode"),
        );
    }
}
