//! # Compute Context
//!
//! One device-level context per movie session, shared by all of the
//! session's streams. Owns the compiled kernels, the immutable
//! `{width, height}` constants at binding slot conventions shared by every
//! kernel, and the dynamic sampling-weight constant that is rewritten once
//! per weighted add.
//!
//! Dispatch dimensions are `ceil(w / 8) x ceil(h / 8) x 1`; every kernel is
//! written for 8x8 thread groups and bounds-checks the top edge.

use std::sync::atomic::{AtomicU32, Ordering};

use wgpu::util::DeviceExt;

use crate::error::{Error, Result};

/// Matches the `Dims` uniform declared by every kernel.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct DimsUniform {
    width: u32,
    height: u32,
    pad: [u32; 2],
}

/// Matches the `Weight` uniform of the sampling kernel.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct WeightUniform {
    value: f32,
    pad: [f32; 3],
}

pub struct ComputeContext {
    device: wgpu::Device,
    queue: wgpu::Queue,

    width: u32,
    height: u32,
    groups_x: u32,
    groups_y: u32,

    shared_constants: wgpu::Buffer,
    weight_constant: wgpu::Buffer,
    // Bit pattern of the last weight written, so unchanged weights skip the
    // upload. Sessions start from a value no real weight takes.
    last_weight: AtomicU32,

    sampling_pipeline: Option<wgpu::ComputePipeline>,
    clear_pipeline: Option<wgpu::ComputePipeline>,
    pass_pipeline: Option<wgpu::ComputePipeline>,
    blit_pipeline: wgpu::RenderPipeline,
}

impl ComputeContext {
    /// Builds the context on the session device. Only the kernels the mode
    /// needs are compiled: sampling and clear when the box integrator is
    /// active, pass-through otherwise.
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        width: u32,
        height: u32,
        sampling: bool,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::graphics(format!(
                "invalid movie dimensions {width}x{height}"
            )));
        }

        let dims = DimsUniform {
            width,
            height,
            pad: [0; 2],
        };

        let shared_constants = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sdr shared constants"),
            contents: bytemuck::bytes_of(&dims),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let weight_constant = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sdr sampling weight"),
            size: std::mem::size_of::<WeightUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let compute = |label: &str, source: &str| -> wgpu::ComputePipeline {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: None,
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        let (sampling_pipeline, clear_pipeline, pass_pipeline) = if sampling {
            (
                Some(compute("sdr sampling", include_str!("shaders/sampling.wgsl"))),
                Some(compute("sdr clear", include_str!("shaders/clear.wgsl"))),
                None,
            )
        } else {
            (
                None,
                None,
                Some(compute("sdr pass", include_str!("shaders/pass.wgsl"))),
            )
        };

        let blit_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sdr blit"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blit.wgsl").into()),
        });

        let blit_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("sdr blit"),
            layout: None,
            vertex: wgpu::VertexState {
                module: &blit_module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &blit_module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Bgra8Unorm,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });

        Ok(Self {
            device,
            queue,
            width,
            height,
            groups_x: width.div_ceil(8),
            groups_y: height.div_ceil(8),
            shared_constants,
            weight_constant,
            last_weight: AtomicU32::new(f32::NAN.to_bits()),
            sampling_pipeline,
            clear_pipeline,
            pass_pipeline,
            blit_pipeline,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn groups_x(&self) -> u32 {
        self.groups_x
    }

    pub fn groups_y(&self) -> u32 {
        self.groups_y
    }

    pub fn shared_constants(&self) -> &wgpu::Buffer {
        &self.shared_constants
    }

    pub fn weight_constant(&self) -> &wgpu::Buffer {
        &self.weight_constant
    }

    pub fn sampling_pipeline(&self) -> &wgpu::ComputePipeline {
        self.sampling_pipeline
            .as_ref()
            .expect("sampling kernels not compiled for this session")
    }

    pub fn clear_pipeline(&self) -> &wgpu::ComputePipeline {
        self.clear_pipeline
            .as_ref()
            .expect("sampling kernels not compiled for this session")
    }

    pub fn pass_pipeline(&self) -> &wgpu::ComputePipeline {
        self.pass_pipeline
            .as_ref()
            .expect("pass kernel not compiled for this session")
    }

    pub fn blit_pipeline(&self) -> &wgpu::RenderPipeline {
        &self.blit_pipeline
    }

    /// Uploads a new sampling weight unless it matches the last one written.
    pub fn write_weight(&self, weight: f32) {
        let bits = weight.to_bits();
        if self.last_weight.swap(bits, Ordering::Relaxed) == bits {
            return;
        }

        let uniform = WeightUniform {
            value: weight,
            pad: [0.0; 3],
        };
        self.queue
            .write_buffer(&self.weight_constant, 0, bytemuck::bytes_of(&uniform));
    }

    /// Records a dispatch of `pipeline` with `bind_group` over the full
    /// frame and submits it immediately.
    ///
    /// The immediate submit is load-bearing for sampling: letting the host
    /// queue coalesce consecutive accumulations collapses the integrator
    /// into pass-through.
    pub fn dispatch(&self, pipeline: &wgpu::ComputePipeline, bind_group: &wgpu::BindGroup) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sdr dispatch"),
            });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(self.groups_x, self.groups_y, 1);
        }

        self.queue.submit(Some(encoder.finish()));
    }
}

/// Requests a standalone device for hosts (and tests) that do not bring
/// their own. Returns `None` when the machine has no usable adapter.
/// Validation layers are opted into with the `sdr_video_debug` variable.
pub fn request_standalone_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    let debug = crate::console::registry()
        .find("sdr_video_debug")
        .map(|var| var.get_bool())
        .unwrap_or(false);

    let flags = if debug {
        wgpu::InstanceFlags::debugging()
    } else {
        wgpu::InstanceFlags::default()
    };

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        flags,
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        force_fallback_adapter: false,
        compatible_surface: None,
    }))
    .ok()?;

    pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("sdr device"),
        ..Default::default()
    }))
    .ok()
}
