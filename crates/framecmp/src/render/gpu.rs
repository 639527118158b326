//! wgpu compositor: both frames are uploaded every call and composited by a
//! single compute program (`composite.wgsl`) that branches on the mode.
//!
//! Textures and the readback buffer are reused across calls and only
//! reallocated when the frame size changes.

use image::RgbaImage;
use tracing::{debug, info};

use super::params::RenderParameters;

const WORKGROUP: u32 = 16;
const SHADER: &str = include_str!("composite.wgsl");

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ShaderParams {
    width: u32,
    height: u32,
    mode: u32,
    channel: u32,
    palette: u32,
    tile_size: f32,
    split: f32,
    threshold: f32,
    blend: f32,
    center_x: f32,
    center_y: f32,
    radius: f32,
}

impl ShaderParams {
    fn new(p: &RenderParameters, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            mode: p.mode.code(),
            channel: p.channel.code(),
            palette: p.palette.code(),
            tile_size: p.tile_size.max(1) as f32,
            split: p.split,
            threshold: p.threshold,
            blend: p.blend,
            center_x: p.circle_center.0,
            center_y: p.circle_center.1,
            radius: p.circle_radius,
        }
    }
}

struct Targets {
    size: [u32; 2],
    frame_a: wgpu::Texture,
    frame_b: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    output: wgpu::Texture,
    readback: wgpu::Buffer,
    padded_row: u32,
}

pub struct GpuCompositor {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    targets: Option<Targets>,
}

impl GpuCompositor {
    /// Acquire an adapter and device. `None` when no GPU is usable.
    pub fn acquire() -> Option<Self> {
        futures::executor::block_on(Self::acquire_async())
    }

    async fn acquire_async() -> Option<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok()?;
        info!(adapter = %adapter.get_info().name, "GPU adapter acquired");
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("framecmp.compositor"),
                ..Default::default()
            })
            .await
            .ok()?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("framecmp.composite"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("framecmp.composite.bgl"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("framecmp.composite.layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("framecmp.composite.pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("framecmp.composite.params"),
            size: std::mem::size_of::<ShaderParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Some(Self {
            device,
            queue,
            pipeline,
            layout,
            params,
            targets: None,
        })
    }

    fn ensure_targets(&mut self, width: u32, height: u32) {
        let stale = self
            .targets
            .as_ref()
            .is_none_or(|t| t.size != [width, height]);
        if stale {
            debug!(width, height, "allocating GPU targets");
            self.targets = Some(self.create_targets(width, height));
        }
    }

    fn create_targets(&self, width: u32, height: u32) -> Targets {
        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = |label, usage| {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: extent,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage,
                view_formats: &[],
            })
        };
        let input = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        let frame_a = texture("framecmp.frame_a", input);
        let frame_b = texture("framecmp.frame_b", input);
        let output = texture(
            "framecmp.output",
            wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
        );

        let view = |t: &wgpu::Texture| t.create_view(&wgpu::TextureViewDescriptor::default());
        let (view_a, view_b, view_out) = (view(&frame_a), view(&frame_b), view(&output));
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("framecmp.composite.bg"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view_a),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&view_b),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&view_out),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.params.as_entire_binding(),
                },
            ],
        });

        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = (width * 4).div_ceil(align) * align;
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("framecmp.output.readback"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Targets {
            size: [width, height],
            frame_a,
            frame_b,
            bind_group,
            output,
            readback,
            padded_row,
        }
    }

    /// Composite into `canvas`, which must already match `a` in size.
    pub fn composite(
        &mut self,
        canvas: &mut RgbaImage,
        a: &RgbaImage,
        b: &RgbaImage,
        params: &RenderParameters,
    ) -> Result<(), String> {
        let (width, height) = a.dimensions();
        if width == 0 || height == 0 {
            return Ok(());
        }
        let shader_params = ShaderParams::new(params, width, height);
        self.queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&shader_params));

        self.ensure_targets(width, height);
        let Some(targets) = self.targets.as_ref() else {
            return Err("GPU targets missing".into());
        };
        let queue = &self.queue;
        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        for (texture, frame) in [(&targets.frame_a, a), (&targets.frame_b, b)] {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                frame.as_raw(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * 4),
                    rows_per_image: Some(height),
                },
                extent,
            );
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("framecmp.composite.encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("framecmp.composite.pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &targets.bind_group, &[]);
            pass.dispatch_workgroups(width.div_ceil(WORKGROUP), height.div_ceil(WORKGROUP), 1);
        }
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &targets.output,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &targets.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(targets.padded_row),
                    rows_per_image: Some(height),
                },
            },
            extent,
        );
        queue.submit(Some(encoder.finish()));

        let slice = targets.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::PollType::Wait);
        rx.recv()
            .map_err(|e| format!("readback channel closed: {e}"))?
            .map_err(|e| format!("readback map failed: {e}"))?;

        {
            let mapped = slice.get_mapped_range();
            let row = width as usize * 4;
            let buf: &mut [u8] = canvas;
            for (y, dst) in buf.chunks_exact_mut(row).enumerate() {
                let start = y * targets.padded_row as usize;
                dst.copy_from_slice(&mapped[start..start + row]);
            }
        }
        targets.readback.unmap();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;
    use crate::render::params::ViewMode;
    use crate::render::raster;

    const SIZE: u32 = 64;

    // Red ramps in opposite directions, so per-pixel deltas step in
    // multiples of 8/255 and stay clear of the threshold used below.
    fn frames() -> (RgbaImage, RgbaImage) {
        let a = RgbaImage::from_fn(SIZE, SIZE, |x, y| Rgba([(x * 4) as u8, (y * 4) as u8, 128, 255]));
        let b = RgbaImage::from_fn(SIZE, SIZE, |x, y| Rgba([255 - (x * 4) as u8, (y * 4) as u8, 128, 255]));
        (a, b)
    }

    fn max_channel_error(x: &RgbaImage, y: &RgbaImage) -> u8 {
        x.as_raw()
            .iter()
            .zip(y.as_raw())
            .map(|(p, q)| p.abs_diff(*q))
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn matches_raster_output_in_every_mode() {
        let Some(mut gpu) = GpuCompositor::acquire() else {
            eprintln!("no GPU adapter, skipping");
            return;
        };
        let (a, b) = frames();
        for mode in [
            ViewMode::Split,
            ViewMode::Difference,
            ViewMode::Heatmap,
            ViewMode::CircleReveal,
            ViewMode::Checkerboard,
        ] {
            let params = RenderParameters {
                mode,
                split: 0.5,
                circle_center: (0.5, 0.5),
                circle_radius: 0.25,
                tile_size: 8,
                threshold: 0.1,
                blend: 0.75,
                ..Default::default()
            };
            let mut expected = RgbaImage::new(SIZE, SIZE);
            raster::composite(&mut expected, &a, &b, &params);
            let mut actual = RgbaImage::new(SIZE, SIZE);
            gpu.composite(&mut actual, &a, &b, &params).unwrap();
            let err = max_channel_error(&expected, &actual);
            assert!(err <= 2, "{mode:?}: max channel error {err}");
        }
    }

    #[test]
    fn targets_follow_frame_size() {
        let Some(mut gpu) = GpuCompositor::acquire() else {
            eprintln!("no GPU adapter, skipping");
            return;
        };
        let params = RenderParameters::default();
        for (w, h) in [(18, 9), (6, 40)] {
            let a = RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 255]));
            let b = RgbaImage::from_pixel(w, h, Rgba([200, 100, 50, 255]));
            let mut expected = RgbaImage::new(w, h);
            raster::composite(&mut expected, &a, &b, &params);
            let mut actual = RgbaImage::new(w, h);
            gpu.composite(&mut actual, &a, &b, &params).unwrap();
            assert_eq!(expected, actual, "{w}x{h}");
        }
    }
}
