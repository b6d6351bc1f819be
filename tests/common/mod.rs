//! Shared test fixtures: a synthetic host engine backed by a standalone
//! device, and a mock codec provider that records everything it is fed.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use sdr_core::encode::{
    CodecProvider, EncoderConfig, EncoderInfo, EncoderOptions, Muxer, Packet, VideoEncoder,
    VideoFrame,
};
use sdr_core::error::{Error, Result};
use sdr_core::graphics::{request_standalone_device, PixelFormat};
use sdr_core::host::HostEngine;

/// The console registry is process-wide, so session-level tests take this
/// lock to keep their variable writes from interleaving.
pub fn session_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Host engine double: owns a standalone device and a backbuffer texture
/// tests can fill with solid colors.
pub struct TestHost {
    device: wgpu::Device,
    queue: wgpu::Queue,
    backbuffer: wgpu::Texture,
    width: u32,
    height: u32,
    root: tempfile::TempDir,
    pub loading: AtomicBool,
    pub console_visible: AtomicBool,
}

impl TestHost {
    /// Returns `None` when the machine has no usable adapter; callers skip
    /// their test in that case.
    pub fn create(width: u32, height: u32) -> Option<Arc<TestHost>> {
        let (device, queue) = request_standalone_device()?;

        let backbuffer = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("test backbuffer"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Bgra8Unorm,
            usage: wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        Some(Arc::new(TestHost {
            device,
            queue,
            backbuffer,
            width,
            height,
            root: tempfile::tempdir().expect("tempdir"),
            loading: AtomicBool::new(false),
            console_visible: AtomicBool::new(false),
        }))
    }

    /// Fills the backbuffer with one BGRA color.
    pub fn fill(&self, b: u8, g: u8, r: u8, a: u8) {
        let row: Vec<u8> = [b, g, r, a]
            .iter()
            .copied()
            .cycle()
            .take(self.width as usize * 4)
            .collect();
        let data: Vec<u8> = row
            .iter()
            .copied()
            .cycle()
            .take(row.len() * self.height as usize)
            .collect();

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.backbuffer,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * 4),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::empty());
    }

    pub fn output_dir(&self) -> &Path {
        self.root.path()
    }
}

impl HostEngine for TestHost {
    fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn backbuffer(&self) -> wgpu::Texture {
        self.backbuffer.clone()
    }

    fn backbuffer_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn is_drawing_loading(&self) -> bool {
        self.loading.load(Ordering::Relaxed)
    }

    fn is_console_visible(&self) -> bool {
        self.console_visible.load(Ordering::Relaxed)
    }

    fn resource_root(&self) -> &Path {
        self.root.path()
    }
}

/// Everything the mock encoder and muxer observed.
#[derive(Default)]
pub struct Recorded {
    /// First plane of every frame submitted to the encoder.
    pub frames: Vec<Vec<u8>>,
    /// PTS values in the order packets reached the muxer.
    pub packet_pts: Vec<i64>,
    pub header_written: bool,
    pub trailer_written: bool,
    pub flushed: bool,
}

pub struct MockProvider {
    pub log: Arc<Mutex<Recorded>>,
    /// Synthetic per-frame encoder stall in milliseconds.
    pub stall_ms: Arc<AtomicU64>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(Recorded::default())),
            stall_ms: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl CodecProvider for MockProvider {
    fn find_encoder(&self, name: &str) -> Option<EncoderInfo> {
        match name {
            "libx264" => Some(EncoderInfo {
                name: name.into(),
                h264: true,
                pixel_formats: vec![PixelFormat::Yuv420, PixelFormat::Yuv444],
            }),
            "libx264rgb" => Some(EncoderInfo {
                name: name.into(),
                h264: true,
                pixel_formats: vec![PixelFormat::Bgr0],
            }),
            _ => None,
        }
    }

    fn encoder_names(&self) -> Vec<String> {
        vec!["libx264".into(), "libx264rgb".into()]
    }

    fn open_muxer(&self, path: &Path, _config: &EncoderConfig) -> Result<Box<dyn Muxer>> {
        if path.to_string_lossy().contains("unwritable") {
            return Err(Error::codec("could not open output file"));
        }

        Ok(Box::new(MockMuxer {
            log: self.log.clone(),
        }))
    }

    fn open_encoder(
        &self,
        _info: &EncoderInfo,
        _config: &EncoderConfig,
        _options: &EncoderOptions,
    ) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(MockEncoder {
            log: self.log.clone(),
            stall_ms: self.stall_ms.clone(),
            pending: Vec::new(),
        }))
    }
}

pub struct MockEncoder {
    log: Arc<Mutex<Recorded>>,
    stall_ms: Arc<AtomicU64>,
    pending: Vec<Packet>,
}

impl VideoEncoder for MockEncoder {
    fn send_frame(&mut self, frame: Option<&VideoFrame<'_>>) -> Result<()> {
        match frame {
            Some(frame) => {
                let stall = self.stall_ms.load(Ordering::Relaxed);
                if stall > 0 {
                    std::thread::sleep(Duration::from_millis(stall));
                }

                self.log.lock().unwrap().frames.push(frame.planes[0].to_vec());
                self.pending.push(Packet {
                    data: Vec::new(),
                    pts: frame.pts,
                    dts: frame.pts,
                    keyframe: true,
                });
            }
            None => self.log.lock().unwrap().flushed = true,
        }
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Option<Packet>> {
        Ok(if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0))
        })
    }
}

pub struct MockMuxer {
    log: Arc<Mutex<Recorded>>,
}

impl Muxer for MockMuxer {
    fn write_header(&mut self) -> Result<()> {
        self.log.lock().unwrap().header_written = true;
        Ok(())
    }

    fn write_packet(&mut self, packet: Packet) -> Result<()> {
        self.log.lock().unwrap().packet_pts.push(packet.pts);
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.log.lock().unwrap().trailer_written = true;
        Ok(())
    }
}
