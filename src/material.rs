//! Shader program compilation and the keyword-permutation material cache.

use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};

use bytemuck::{Pod, Zeroable};

/// Uniform block shared by every pass. Field order and alignment must match
/// `SimParams` in `shaders/base.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct SimParams {
    pub texel_size: [f32; 2],
    pub source_texel_size: [f32; 2],
    pub point: [f32; 2],
    pub radius: f32,
    pub aspect_ratio: f32,
    pub color: [f32; 4],
    pub dt: f32,
    pub dissipation: f32,
    pub curl: f32,
    pub value: f32,
}

impl Default for SimParams {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

pub const BASE_SHADER: &str = include_str!("shaders/base.wgsl");

/// Order-independent hash over a keyword list: the sum of per-string hash
/// codes. Collisions are theoretically possible but the keyword space here
/// is bounded at one or two flags per material.
pub fn keyword_hash(keywords: &[&str]) -> u64 {
    keywords
        .iter()
        .fold(0u64, |acc, kw| {
            let mut hasher = DefaultHasher::new();
            kw.hash(&mut hasher);
            acc.wrapping_add(hasher.finish())
        })
}

fn compose_source(fragment: &str, defines: &[(&str, bool)]) -> String {
    let mut source = String::new();
    for (name, enabled) in defines {
        source.push_str(&format!("const {}: bool = {};\n", name, enabled));
    }
    source.push_str(BASE_SHADER);
    source.push('\n');
    source.push_str(fragment);
    source
}

/// One compiled pipeline: a fragment pass over a full-screen triangle with a
/// uniform block, the shared sampler and a fixed number of source textures,
/// targeting a fixed output format.
pub struct Program {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    uniforms: wgpu::Buffer,
    texture_count: u32,
    label: String,
}

impl Program {
    /// Compiles and links the pass. Validation failures are logged with the
    /// full wgpu diagnostic and returned as errors; there is no retry.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        fragment: &str,
        defines: &[(&str, bool)],
        texture_count: u32,
        format: wgpu::TextureFormat,
        blend: Option<wgpu::BlendState>,
        filterable: bool,
    ) -> anyhow::Result<Program> {
        let source = compose_source(fragment, defines);

        let mut entries = vec![
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(if filterable {
                    wgpu::SamplerBindingType::Filtering
                } else {
                    wgpu::SamplerBindingType::NonFiltering
                }),
                count: None,
            },
        ];
        for i in 0..texture_count {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2 + i,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }

        // Compile under a validation scope so a broken shader degrades to a
        // missing program instead of an uncaptured device error.
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            log::error!("shader {:?} failed validation: {}", label, error);
            anyhow::bail!("shader {:?} failed validation", label);
        }

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of::<SimParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Program {
            pipeline,
            layout,
            uniforms,
            texture_count,
            label: label.to_string(),
        })
    }

    pub fn write_params(&self, queue: &wgpu::Queue, params: &SimParams) {
        queue.write_buffer(&self.uniforms, 0, bytemuck::bytes_of(params));
    }

    /// Records one full-screen pass into `target`. `textures` must match the
    /// program's declared source texture count; none of them may alias the
    /// target (double buffering guarantees this for ping-pong fields).
    pub fn draw(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        sampler: &wgpu::Sampler,
        textures: &[&wgpu::TextureView],
        target: &wgpu::TextureView,
    ) {
        debug_assert_eq!(textures.len() as u32, self.texture_count);

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: self.uniforms.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ];
        for (i, view) in textures.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 2 + i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.label.as_str()),
            layout: &self.layout,
            entries: &entries,
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(self.label.as_str()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

/// Lazily-compiled permutation cache over a small set of boolean shader
/// keywords, additionally keyed by output format. Entries are never evicted;
/// this is only sound because the keyword space is bounded at call sites to
/// at most two flags — do not reuse for open-ended keyword sets without an
/// eviction policy.
pub struct Material {
    label: &'static str,
    fragment: &'static str,
    known_keywords: &'static [&'static str],
    texture_count: u32,
    blend: Option<wgpu::BlendState>,
    programs: HashMap<(u64, wgpu::TextureFormat), Program>,
    failed: HashSet<(u64, wgpu::TextureFormat)>,
    active_keywords: Vec<String>,
    active_hash: u64,
    compile_count: usize,
}

impl Material {
    pub fn new(
        label: &'static str,
        fragment: &'static str,
        known_keywords: &'static [&'static str],
        texture_count: u32,
        blend: Option<wgpu::BlendState>,
    ) -> Self {
        Self {
            label,
            fragment,
            known_keywords,
            texture_count,
            blend,
            programs: HashMap::new(),
            failed: HashSet::new(),
            active_keywords: Vec::new(),
            active_hash: keyword_hash(&[]),
            compile_count: 0,
        }
    }

    /// Selects the active keyword permutation. Compilation is deferred until
    /// the program is first requested for a concrete output format.
    pub fn set_keywords(&mut self, keywords: &[&str]) {
        debug_assert!(keywords.iter().all(|k| self.known_keywords.contains(k)));
        self.active_hash = keyword_hash(keywords);
        self.active_keywords = keywords.iter().map(|s| s.to_string()).collect();
    }

    /// Fetches (compiling at most once) the program for the active keyword
    /// set and `format`. A permutation whose compile failed stays unusable;
    /// callers skip the pass.
    pub fn program(
        &mut self,
        device: &wgpu::Device,
        filterable: bool,
        format: wgpu::TextureFormat,
    ) -> Option<&Program> {
        let key = (self.active_hash, format);
        if self.failed.contains(&key) {
            return None;
        }
        if !self.programs.contains_key(&key) {
            let defines: Vec<(&str, bool)> = self
                .known_keywords
                .iter()
                .map(|kw| (*kw, self.active_keywords.iter().any(|a| a.as_str() == *kw)))
                .collect();
            match Program::new(
                device,
                self.label,
                self.fragment,
                &defines,
                self.texture_count,
                format,
                self.blend,
                filterable,
            ) {
                Ok(program) => {
                    self.compile_count += 1;
                    self.programs.insert(key, program);
                }
                Err(_) => {
                    self.failed.insert(key);
                    return None;
                }
            }
        }
        self.programs.get(&key)
    }

    pub fn compile_count(&self) -> usize {
        self.compile_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_hash_distinguishes_sets() {
        let none = keyword_hash(&[]);
        let shading = keyword_hash(&["SHADING"]);
        let manual = keyword_hash(&["MANUAL_FILTERING"]);
        assert_ne!(none, shading);
        assert_ne!(none, manual);
        assert_ne!(shading, manual);
    }

    #[test]
    fn keyword_hash_is_stable() {
        assert_eq!(keyword_hash(&["SHADING"]), keyword_hash(&["SHADING"]));
        assert_eq!(keyword_hash(&[]), keyword_hash(&[]));
    }

    #[test]
    fn composed_source_defines_all_known_keywords() {
        let src = compose_source("@fragment fn fs_main() {}", &[("SHADING", false)]);
        assert!(src.starts_with("const SHADING: bool = false;\n"));
        assert!(src.contains("fn vs_main"));
        assert!(src.ends_with("@fragment fn fs_main() {}"));
    }

    #[test]
    fn sim_params_matches_wgsl_layout() {
        // The WGSL struct is 64 bytes with color at offset 32.
        assert_eq!(std::mem::size_of::<SimParams>(), 64);
        assert_eq!(std::mem::offset_of!(SimParams, color), 32);
        assert_eq!(std::mem::offset_of!(SimParams, dt), 48);
    }
}
