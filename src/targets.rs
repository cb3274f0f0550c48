//! Offscreen render targets for the simulation fields.

use crate::context::GpuContext;
use crate::material::{Program, SimParams};

/// A GPU texture usable both as a render attachment and a sampling source,
/// with its inverse size cached for shader use.
pub struct RenderTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub texel_size: [f32; 2],
}

impl RenderTarget {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
            format,
            texel_size: [1.0 / width as f32, 1.0 / height as f32],
        }
    }
}

fn bytes_per_pixel(format: wgpu::TextureFormat) -> u32 {
    use wgpu::TextureFormat::*;
    match format {
        Rgba16Float => 8,
        Rg16Float | Rgba8Unorm => 4,
        R16Float => 2,
        other => panic!("unsupported readback format {other:?}"),
    }
}

fn half_to_f32(bits: u16) -> f32 {
    let sign = u32::from(bits >> 15) << 31;
    let exp = u32::from((bits >> 10) & 0x1f);
    let frac = u32::from(bits & 0x3ff);
    let out = match (exp, frac) {
        (0, 0) => sign,
        (0, mut f) => {
            // Subnormal half: renormalize into f32 space.
            let mut e: i32 = 113;
            while f & 0x400 == 0 {
                f <<= 1;
                e -= 1;
            }
            sign | ((e as u32) << 23) | ((f & 0x3ff) << 13)
        }
        (31, 0) => sign | 0x7f80_0000,
        (31, f) => sign | 0x7f80_0000 | (f << 13),
        (e, f) => sign | ((e + 112) << 23) | (f << 13),
    };
    f32::from_bits(out)
}

fn decode_pixel(format: wgpu::TextureFormat, bytes: &[u8]) -> [f32; 4] {
    use wgpu::TextureFormat::*;
    let half = |i: usize| half_to_f32(u16::from_le_bytes([bytes[i], bytes[i + 1]]));
    match format {
        Rgba16Float => [half(0), half(2), half(4), half(6)],
        Rg16Float => [half(0), half(2), 0.0, 0.0],
        R16Float => [half(0), 0.0, 0.0, 0.0],
        Rgba8Unorm => [
            bytes[0] as f32 / 255.0,
            bytes[1] as f32 / 255.0,
            bytes[2] as f32 / 255.0,
            bytes[3] as f32 / 255.0,
        ],
        other => panic!("unsupported readback format {other:?}"),
    }
}

impl RenderTarget {
    /// Blocking readback of the whole target as RGBA f32, row-major from the
    /// top texture row. Unused channels of narrow formats read as zero.
    pub fn read_pixels(&self, ctx: &GpuContext) -> Vec<[f32; 4]> {
        let bpp = bytes_per_pixel(self.format);
        let unpadded = self.width * bpp;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size: u64::from(padded) * u64::from(self.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: None,
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        ctx.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(receiver.receive())
            .expect("map_async callback dropped")
            .expect("readback buffer map failed");

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((self.width * self.height) as usize);
        for row in 0..self.height {
            let start = (row * padded) as usize;
            for col in 0..self.width {
                let offset = start + (col * bpp) as usize;
                pixels.push(decode_pixel(self.format, &data[offset..offset + bpp as usize]));
            }
        }
        drop(data);
        staging.unmap();
        pixels
    }
}

/// Ping-pong pair. Within a pass exactly one side is sampled and the other
/// written; `swap` promotes the freshly written side to `read`.
pub struct DoubleRenderTarget {
    pub read: RenderTarget,
    pub write: RenderTarget,
}

impl DoubleRenderTarget {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        Self {
            read: RenderTarget::new(device, label, width, height, format),
            write: RenderTarget::new(device, label, width, height, format),
        }
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.read, &mut self.write);
    }

    pub fn width(&self) -> u32 {
        self.read.width
    }

    pub fn height(&self) -> u32 {
        self.read.height
    }

    pub fn texel_size(&self) -> [f32; 2] {
        self.read.texel_size
    }
}

/// Derives field dimensions from a base resolution and the drawable's aspect
/// ratio: the smaller dimension is `resolution`, the larger one scales with
/// the aspect ratio.
pub fn derive_resolution(resolution: u32, aspect_ratio: f32) -> (u32, u32) {
    let aspect = if aspect_ratio < 1.0 {
        1.0 / aspect_ratio
    } else {
        aspect_ratio
    };
    let max = (resolution as f32 * aspect).round() as u32;
    let min = resolution;
    if aspect_ratio > 1.0 {
        (max, min)
    } else {
        (min, max)
    }
}

/// All simulation fields. Velocity, dye and pressure evolve from their own
/// previous state and are double buffered; divergence and curl are fully
/// recomputed each step and need no history.
pub struct Framebuffers {
    pub dye: DoubleRenderTarget,
    pub velocity: DoubleRenderTarget,
    pub pressure: DoubleRenderTarget,
    pub divergence: RenderTarget,
    pub curl: RenderTarget,
}

impl Framebuffers {
    pub fn create(
        ctx: &GpuContext,
        sim_resolution: u32,
        dye_resolution: u32,
        aspect_ratio: f32,
    ) -> Self {
        let (sim_w, sim_h) = derive_resolution(sim_resolution, aspect_ratio);
        let (dye_w, dye_h) = derive_resolution(dye_resolution, aspect_ratio);
        let device = &ctx.device;
        let caps = &ctx.caps;
        Self {
            dye: DoubleRenderTarget::new(device, "Dye", dye_w, dye_h, caps.rgba),
            velocity: DoubleRenderTarget::new(device, "Velocity", sim_w, sim_h, caps.rg),
            pressure: DoubleRenderTarget::new(device, "Pressure", sim_w, sim_h, caps.r),
            divergence: RenderTarget::new(device, "Divergence", sim_w, sim_h, caps.r),
            curl: RenderTarget::new(device, "Curl", sim_w, sim_h, caps.r),
        }
    }

    /// Reallocates at the new aspect ratio, resampling dye and velocity
    /// content through the supplied copy programs so the visible fluid
    /// survives the resize. Pressure, divergence and curl restart from zero.
    /// Requiring the copy programs in the signature is what makes "resize
    /// without a blit" unrepresentable.
    pub fn resize(
        &mut self,
        ctx: &GpuContext,
        sim_resolution: u32,
        dye_resolution: u32,
        aspect_ratio: f32,
        copy_dye: &Program,
        copy_velocity: &Program,
    ) {
        let fresh = Framebuffers::create(ctx, sim_resolution, dye_resolution, aspect_ratio);
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Framebuffer Resample"),
            });

        copy_dye.write_params(
            &ctx.queue,
            &SimParams {
                texel_size: self.dye.texel_size(),
                ..Default::default()
            },
        );
        copy_dye.draw(
            &ctx.device,
            &mut encoder,
            &ctx.sampler,
            &[&self.dye.read.view],
            &fresh.dye.read.view,
        );

        copy_velocity.write_params(
            &ctx.queue,
            &SimParams {
                texel_size: self.velocity.texel_size(),
                ..Default::default()
            },
        );
        copy_velocity.draw(
            &ctx.device,
            &mut encoder,
            &ctx.sampler,
            &[&self.velocity.read.view],
            &fresh.velocity.read.view,
        );

        ctx.queue.submit(std::iter::once(encoder.finish()));
        *self = fresh;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_square() {
        assert_eq!(derive_resolution(128, 1.0), (128, 128));
    }

    #[test]
    fn resolution_landscape() {
        let (w, h) = derive_resolution(128, 2.0);
        assert_eq!(h, 128);
        assert_eq!(w, 256);
    }

    #[test]
    fn resolution_portrait() {
        let (w, h) = derive_resolution(128, 0.5);
        assert_eq!(w, 128);
        assert_eq!(h, 256);
    }

    #[test]
    fn half_float_decoding() {
        assert_eq!(half_to_f32(0x0000), 0.0);
        assert_eq!(half_to_f32(0x3C00), 1.0);
        assert_eq!(half_to_f32(0x3800), 0.5);
        assert_eq!(half_to_f32(0xC000), -2.0);
        assert_eq!(half_to_f32(0x7BFF), 65504.0); // largest finite half
        assert!((half_to_f32(0x0001) - 2.0f32.powi(-24)).abs() < 1e-30); // smallest subnormal
    }

    #[test]
    fn pixel_decoding_by_format() {
        let half_one = 0x3C00u16.to_le_bytes();
        let mut rgba = Vec::new();
        for _ in 0..4 {
            rgba.extend_from_slice(&half_one);
        }
        assert_eq!(
            decode_pixel(wgpu::TextureFormat::Rgba16Float, &rgba),
            [1.0, 1.0, 1.0, 1.0]
        );
        assert_eq!(
            decode_pixel(wgpu::TextureFormat::Rg16Float, &rgba[..4]),
            [1.0, 1.0, 0.0, 0.0]
        );
        assert_eq!(
            decode_pixel(wgpu::TextureFormat::Rgba8Unorm, &[255, 0, 127, 255]),
            [1.0, 0.0, 127.0 / 255.0, 1.0]
        );
    }

    #[test]
    fn resolution_ratio_tracks_aspect() {
        for &aspect in &[0.3f32, 0.75, 1.0, 1.333, 1.78, 2.4] {
            let (w, h) = derive_resolution(100, aspect);
            let longer = w.max(h) as f32;
            let shorter = w.min(h) as f32;
            let expected = if aspect < 1.0 { 1.0 / aspect } else { aspect };
            assert_eq!(shorter, 100.0);
            assert!((longer / shorter - expected).abs() < 0.01, "aspect {aspect}");
        }
    }
}
