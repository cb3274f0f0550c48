//! GPU device acquisition and capability negotiation.

use anyhow::Context as _;

/// Negotiated texture capabilities. Formats step down to wider channel
/// counts when a narrow one is not renderable on this adapter, and bottom
/// out at `Rgba8Unorm` when no float target works at all.
#[derive(Debug, Clone, Copy)]
pub struct GpuCaps {
    /// Half-float render targets are available.
    pub float_color_buffers: bool,
    /// The chosen formats can be sampled with linear filtering.
    pub linear_filtering: bool,
    pub rgba: wgpu::TextureFormat,
    pub rg: wgpu::TextureFormat,
    pub r: wgpu::TextureFormat,
}

/// Owns the wgpu device/queue plus the shared field sampler. Every pass
/// rebinds its resources through this context; nothing relies on ambient
/// GPU state.
pub struct GpuContext {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub caps: GpuCaps,
    pub sampler: wgpu::Sampler,
}

impl GpuContext {
    /// Acquires a device, optionally compatible with `surface`. Failing to
    /// obtain any adapter or device is fatal: the effect cannot run and the
    /// embedding application should decline to mount it.
    pub async fn new(
        instance: &wgpu::Instance,
        surface: Option<&wgpu::Surface<'_>>,
    ) -> anyhow::Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                ..Default::default()
            })
            .await
            .context("no compatible GPU adapter found")?;

        // Float32 filtering is optional hardware support; request it when
        // present so the fallback formats stay filterable.
        let mut features = wgpu::Features::empty();
        if adapter.features().contains(wgpu::Features::FLOAT32_FILTERABLE) {
            features |= wgpu::Features::FLOAT32_FILTERABLE;
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Splash Device"),
                    required_features: features,
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .context("GPU device request failed")?;

        let caps = negotiate_caps(&adapter);
        log::info!(
            "gpu formats: rgba={:?} rg={:?} r={:?}, float targets: {}, linear filtering: {}",
            caps.rgba,
            caps.rg,
            caps.r,
            caps.float_color_buffers,
            caps.linear_filtering
        );

        let filter = if caps.linear_filtering {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Field Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            ..Default::default()
        });

        Ok(Self {
            adapter,
            device,
            queue,
            caps,
            sampler,
        })
    }

    /// Device without a presentation surface, for offscreen use and tests.
    pub fn headless() -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        pollster::block_on(Self::new(&instance, None))
    }
}

/// Probes whether `format` can serve as a sampled render target.
fn renderable(adapter: &wgpu::Adapter, format: wgpu::TextureFormat) -> bool {
    let features = adapter.get_texture_format_features(format);
    features
        .allowed_usages
        .contains(wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING)
}

fn filterable(adapter: &wgpu::Adapter, format: wgpu::TextureFormat) -> bool {
    adapter
        .get_texture_format_features(format)
        .flags
        .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE)
}

fn negotiate_caps(adapter: &wgpu::Adapter) -> GpuCaps {
    use wgpu::TextureFormat::{R16Float, Rg16Float, Rgba16Float, Rgba8Unorm};

    // Each scalar field wants the narrowest renderable format; step up in
    // channel count when the narrow probe fails.
    let pick = |candidates: &[wgpu::TextureFormat]| {
        candidates.iter().copied().find(|f| renderable(adapter, *f))
    };

    let rgba = pick(&[Rgba16Float]);
    let rg = pick(&[Rg16Float, Rgba16Float]);
    let r = pick(&[R16Float, Rg16Float, Rgba16Float]);

    match (rgba, rg, r) {
        (Some(rgba), Some(rg), Some(r)) => {
            let linear = filterable(adapter, rgba)
                && filterable(adapter, rg)
                && filterable(adapter, r);
            if !linear {
                log::warn!("half-float targets are not filterable, using manual filtering");
            }
            GpuCaps {
                float_color_buffers: true,
                linear_filtering: linear,
                rgba,
                rg,
                r,
            }
        }
        _ => {
            // Universal fallback; fidelity is reduced but the effect runs.
            log::warn!("no renderable float formats, falling back to rgba8");
            GpuCaps {
                float_color_buffers: false,
                linear_filtering: true,
                rgba: Rgba8Unorm,
                rg: Rgba8Unorm,
                r: Rgba8Unorm,
            }
        }
    }
}
