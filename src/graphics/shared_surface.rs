//! # Shared Surface
//!
//! The hand-off point between the host renderer and the compute pipelines:
//! a BGRA8 texture the host's current render target is published into once
//! per tick. The original design shared this surface across two graphics
//! APIs through a platform handle; here both sides live on one device and
//! the publish is either a plain texture copy (matching dimensions) or a
//! nearest-neighbor stretch through a small render pass.
//!
//! One surface exists per video stream, created at movie start and dropped
//! at movie end. A failed publish drops that tick; it never tears the
//! session down.

use log::warn;

use super::context::ComputeContext;
use crate::error::{Error, Result};

pub struct SharedSurface {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl SharedSurface {
    pub fn create(ctx: &ComputeContext, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::graphics(format!(
                "shared surface dimensions {width}x{height} invalid"
            )));
        }

        let texture = ctx.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("sdr shared surface"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Bgra8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            texture,
            view,
            width,
            height,
        })
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// Read-only view the accumulation kernels sample from.
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Publishes the host render target into the surface. Returns false
    /// when the copy could not be made; the caller must treat the tick as a
    /// no-op.
    pub fn blit_from(&self, ctx: &ComputeContext, host_rt: &wgpu::Texture) -> bool {
        let src_size = host_rt.size();

        let same_shape = src_size.width == self.width
            && src_size.height == self.height
            && host_rt.format() == self.texture.format();

        if same_shape && host_rt.usage().contains(wgpu::TextureUsages::COPY_SRC) {
            self.copy_whole(ctx, host_rt);
            return true;
        }

        if !host_rt
            .usage()
            .contains(wgpu::TextureUsages::TEXTURE_BINDING)
        {
            warn!("could not copy host render target: texture is not bindable");
            return false;
        }

        self.stretch(ctx, host_rt);
        true
    }

    fn copy_whole(&self, ctx: &ComputeContext, host_rt: &wgpu::Texture) {
        let mut encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sdr surface copy"),
            });

        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: host_rt,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );

        ctx.queue().submit(Some(encoder.finish()));
    }

    fn stretch(&self, ctx: &ComputeContext, host_rt: &wgpu::Texture) {
        let source_view = host_rt.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sdr blit"),
            layout: &ctx.blit_pipeline().get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: ctx.shared_constants().as_entire_binding(),
                },
            ],
        });

        let mut encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sdr surface blit"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("sdr surface blit"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_pipeline(ctx.blit_pipeline());
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        ctx.queue().submit(Some(encoder.finish()));
    }
}
