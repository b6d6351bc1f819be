//! # Conversion Stage
//!
//! Format-specific kernels turning the accumulated work buffer into the
//! encoder's native pixel layout, plus the GPU-to-CPU readback that feeds
//! the frame queue.
//!
//! Three layouts are supported: planar YUV 4:2:0 and 4:4:4 (BT.601 or
//! BT.709 coefficients chosen from the stream colorspace, full range), and
//! packed BGR0 (colorspace RGB). Plane rows keep the 32-byte alignment the
//! reference frame layout uses, so downloads are row-pitch-contiguous and
//! can be attached to an encoder frame without repacking.
//!
//! ## Readback policy
//!
//! With `staging` on (the recommended default) every plane gets a
//! persistent mappable sibling; after the conversion dispatch the plane is
//! copied into its sibling and only the sibling is mapped, keeping the
//! compute queue unstalled. With `staging` off the copy goes through a
//! transient readback allocation per download instead. A storage buffer is
//! not directly mappable on this API, so "no staging" trades the persistent
//! allocation for a per-frame one rather than removing the copy; the
//! difference is measurable on large frames.

use log::warn;

use super::context::ComputeContext;
use crate::error::{Error, Result};

/// Encoder-native pixel layouts the conversion kernels can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuv420,
    Yuv444,
    Bgr0,
}

impl PixelFormat {
    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Yuv420 => "yuv420",
            PixelFormat::Yuv444 => "yuv444",
            PixelFormat::Bgr0 => "bgr0",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "yuv420" => Some(PixelFormat::Yuv420),
            "yuv444" => Some(PixelFormat::Yuv444),
            "bgr0" => Some(PixelFormat::Bgr0),
            _ => None,
        }
    }

    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Yuv420 | PixelFormat::Yuv444 => 3,
            PixelFormat::Bgr0 => 1,
        }
    }

    pub fn is_rgb(self) -> bool {
        matches!(self, PixelFormat::Bgr0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colorspace {
    Bt601,
    Bt709,
    Rgb,
}

impl Colorspace {
    /// Row coefficients for Y, U and V. Only meaningful for the BT spaces.
    fn coefficients(self) -> Option<[[f32; 3]; 3]> {
        match self {
            Colorspace::Bt601 => Some([
                [0.299_000, 0.587_000, 0.114_000],
                [-0.168_736, -0.331_264, 0.500_000],
                [0.500_000, -0.418_688, -0.081_312],
            ]),
            Colorspace::Bt709 => Some([
                [0.212_600, 0.715_200, 0.072_200],
                [-0.114_572, -0.385_428, 0.500_000],
                [0.500_000, -0.454_153, -0.045_847],
            ]),
            Colorspace::Rgb => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorRange {
    Full,
    Unspecified,
}

/// Reference frame layout shared by the conversion kernels, the download
/// and the encoder configuration.
#[derive(Debug, Clone)]
pub struct FrameDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub colorspace: Colorspace,
    pub color_range: ColorRange,
    /// Bytes per row for each used plane, 32-byte aligned.
    pub strides: [usize; 3],
    /// Full padded plane sizes in bytes.
    pub plane_sizes: [usize; 3],
}

fn align32(value: usize) -> usize {
    (value + 31) & !31
}

impl FrameDesc {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        colorspace: Colorspace,
        color_range: ColorRange,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::config(format!(
                "invalid frame dimensions {width}x{height}"
            )));
        }

        match format {
            PixelFormat::Yuv420 | PixelFormat::Yuv444 => {
                if colorspace.coefficients().is_none() {
                    return Err(Error::config(
                        "no matching YUV color space for coefficients",
                    ));
                }
            }
            PixelFormat::Bgr0 => {
                if colorspace != Colorspace::Rgb {
                    return Err(Error::config("bgr0 output requires the RGB colorspace"));
                }
            }
        }

        let w = width as usize;
        let h = height as usize;

        let (strides, plane_sizes) = match format {
            PixelFormat::Yuv420 => {
                let luma = align32(w);
                let chroma = align32(w.div_ceil(2));
                (
                    [luma, chroma, chroma],
                    [luma * h, chroma * h.div_ceil(2), chroma * h.div_ceil(2)],
                )
            }
            PixelFormat::Yuv444 => {
                let stride = align32(w);
                ([stride; 3], [stride * h; 3])
            }
            PixelFormat::Bgr0 => {
                let stride = align32(w * 4);
                ([stride, 0, 0], [stride * h, 0, 0])
            }
        };

        Ok(Self {
            width,
            height,
            format,
            colorspace,
            color_range,
            strides,
            plane_sizes,
        })
    }

    pub fn plane_count(&self) -> usize {
        self.format.plane_count()
    }
}

/// Matches `YuvData` in the YUV kernels.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct YuvUniform {
    strides: [u32; 4],
    coeff_y: [f32; 4],
    coeff_u: [f32; 4],
    coeff_v: [f32; 4],
}

/// Matches `Packing` in the BGR0 kernel.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct PackingUniform {
    words_per_row: u32,
    pad: [u32; 3],
}

struct PlaneBuffer {
    gpu: wgpu::Buffer,
    staging: Option<wgpu::Buffer>,
    size: usize,
}

pub struct ConversionStage {
    desc: FrameDesc,
    work_buffer: wgpu::Buffer,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    planes: Vec<PlaneBuffer>,
}

impl ConversionStage {
    /// Allocates the work buffer, output planes and conversion pipeline for
    /// one stream.
    pub fn create(ctx: &ComputeContext, desc: FrameDesc, staging: bool) -> Result<Self> {
        let device = ctx.device();

        let pixel_count = desc.width as u64 * desc.height as u64;

        // One {vec3 color, pad} element per pixel.
        let work_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sdr work buffer"),
            size: pixel_count * 16,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let planes: Vec<PlaneBuffer> = desc.plane_sizes[..desc.plane_count()]
            .iter()
            .map(|&size| {
                let gpu = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("sdr plane"),
                    size: size as u64,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                });

                let staging = staging.then(|| {
                    device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("sdr plane staging"),
                        size: size as u64,
                        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    })
                });

                PlaneBuffer { gpu, staging, size }
            })
            .collect();

        let source = match desc.format {
            PixelFormat::Yuv420 => include_str!("shaders/yuv420.wgsl"),
            PixelFormat::Yuv444 => include_str!("shaders/yuv444.wgsl"),
            PixelFormat::Bgr0 => include_str!("shaders/bgr0.wgsl"),
        };

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.format.name()),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(desc.format.name()),
            layout: None,
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let bind_group = match desc.format {
            PixelFormat::Yuv420 | PixelFormat::Yuv444 => {
                let coeffs = desc
                    .colorspace
                    .coefficients()
                    .ok_or_else(|| Error::config("no matching YUV color space"))?;

                let pack3 = |row: [f32; 3]| [row[0], row[1], row[2], 0.0];
                let uniform = YuvUniform {
                    strides: [
                        desc.strides[0] as u32,
                        desc.strides[1] as u32,
                        desc.strides[2] as u32,
                        0,
                    ],
                    coeff_y: pack3(coeffs[0]),
                    coeff_u: pack3(coeffs[1]),
                    coeff_v: pack3(coeffs[2]),
                };

                let constants = create_uniform(device, "sdr yuv constants", &uniform);

                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("sdr conversion"),
                    layout: &pipeline.get_bind_group_layout(0),
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: work_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: ctx.shared_constants().as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: constants.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: planes[0].gpu.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: planes[1].gpu.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 5,
                            resource: planes[2].gpu.as_entire_binding(),
                        },
                    ],
                })
            }
            PixelFormat::Bgr0 => {
                let uniform = PackingUniform {
                    words_per_row: (desc.strides[0] / 4) as u32,
                    pad: [0; 3],
                };

                let constants = create_uniform(device, "sdr packing constants", &uniform);

                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("sdr conversion"),
                    layout: &pipeline.get_bind_group_layout(0),
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: work_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: ctx.shared_constants().as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: constants.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: planes[0].gpu.as_entire_binding(),
                        },
                    ],
                })
            }
        };

        Ok(Self {
            desc,
            work_buffer,
            pipeline,
            bind_group,
            planes,
        })
    }

    pub fn desc(&self) -> &FrameDesc {
        &self.desc
    }

    /// The accumulation target shared with [`super::SamplingAccumulator`].
    pub fn work_buffer(&self) -> &wgpu::Buffer {
        &self.work_buffer
    }

    /// Runs the conversion kernel over the current work buffer contents.
    pub fn dispatch(&self, ctx: &ComputeContext) {
        ctx.dispatch(&self.pipeline, &self.bind_group);
    }

    /// Copies the converted planes back to the CPU. Returns `None` when a
    /// map failed; the caller drops the frame.
    pub fn download(&self, ctx: &ComputeContext) -> Option<Vec<Vec<u8>>> {
        let device = ctx.device();

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sdr download"),
        });

        let targets: Vec<wgpu::Buffer> = self
            .planes
            .iter()
            .map(|plane| {
                let target = match &plane.staging {
                    Some(staging) => staging.clone(),
                    None => device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("sdr readback"),
                        size: plane.size as u64,
                        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    }),
                };

                encoder.copy_buffer_to_buffer(&plane.gpu, 0, &target, 0, plane.size as u64);
                target
            })
            .collect();

        ctx.queue().submit(Some(encoder.finish()));

        let mut output = Vec::with_capacity(self.planes.len());

        for (plane, target) in self.planes.iter().zip(&targets) {
            let slice = target.slice(..);

            let (tx, rx) = crossbeam_channel::bounded(1);
            slice.map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });

            let _ = device.poll(wgpu::PollType::Wait);

            match rx.recv() {
                Ok(Ok(())) => {
                    let data = slice.get_mapped_range();
                    output.push(data[..plane.size].to_vec());
                    drop(data);
                    target.unmap();
                }
                _ => {
                    warn!("could not map conversion output, dropping frame");
                    return None;
                }
            }
        }

        Some(output)
    }
}

fn create_uniform<T: bytemuck::Pod>(device: &wgpu::Device, label: &str, value: &T) -> wgpu::Buffer {
    use wgpu::util::DeviceExt;

    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(value),
        usage: wgpu::BufferUsages::UNIFORM,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuv420_layout_is_row_aligned() {
        let desc = FrameDesc::new(
            100,
            50,
            PixelFormat::Yuv420,
            Colorspace::Bt709,
            ColorRange::Full,
        )
        .unwrap();

        assert_eq!(desc.strides[0], 128);
        assert_eq!(desc.strides[1], 64);
        assert_eq!(desc.plane_sizes[0], 128 * 50);
        assert_eq!(desc.plane_sizes[1], 64 * 25);
        assert_eq!(desc.plane_count(), 3);
    }

    #[test]
    fn bgr0_is_single_plane() {
        let desc = FrameDesc::new(
            64,
            64,
            PixelFormat::Bgr0,
            Colorspace::Rgb,
            ColorRange::Unspecified,
        )
        .unwrap();

        assert_eq!(desc.strides[0], 256);
        assert_eq!(desc.plane_count(), 1);
        assert_eq!(desc.plane_sizes[1], 0);
    }

    #[test]
    fn yuv_requires_a_bt_colorspace() {
        let err = FrameDesc::new(
            64,
            64,
            PixelFormat::Yuv444,
            Colorspace::Rgb,
            ColorRange::Full,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);

        let err = FrameDesc::new(
            64,
            64,
            PixelFormat::Bgr0,
            Colorspace::Bt709,
            ColorRange::Full,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn coefficient_rows_sum_as_expected() {
        // Luma rows sum to one, chroma rows to zero, for both matrices.
        for space in [Colorspace::Bt601, Colorspace::Bt709] {
            let rows = space.coefficients().unwrap();
            let sum = |row: [f32; 3]| row.iter().sum::<f32>();

            assert!((sum(rows[0]) - 1.0).abs() < 1e-5);
            assert!(sum(rows[1]).abs() < 1e-5);
            assert!(sum(rows[2]).abs() < 1e-5);
        }
    }

    #[test]
    fn pixel_format_parsing_round_trips() {
        for format in [PixelFormat::Yuv420, PixelFormat::Yuv444, PixelFormat::Bgr0] {
            assert_eq!(PixelFormat::parse(format.name()), Some(format));
        }
        assert_eq!(PixelFormat::parse("nv12"), None);
    }
}
