//! GPU integration tests. Each test acquires a headless device and skips
//! gracefully on machines without a usable adapter (CI software rasterizers
//! included via `Backends::all()`).

use splashcursor::color::Color;
use splashcursor::material::{Material, SimParams};
use splashcursor::targets::RenderTarget;
use splashcursor::{GpuContext, Simulation, SplashConfig};

fn headless_context() -> Option<GpuContext> {
    match GpuContext::headless() {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping GPU test, no adapter: {e}");
            None
        }
    }
}

fn small_sim(ctx: GpuContext) -> Simulation {
    let config = SplashConfig {
        sim_resolution: 32,
        dye_resolution: 64,
        ..Default::default()
    };
    // Square drawable so field coordinates map 1:1 to texture coordinates.
    Simulation::new(ctx, config, wgpu::TextureFormat::Rgba8Unorm, 256, 256)
        .expect("simulation init failed")
}

/// Index of the dye pixel nearest normalized position (x, y). Readback rows
/// start at the top texture row while field coordinates are bottom-left.
fn dye_index(sim: &Simulation, x: f32, y: f32) -> usize {
    let (w, h) = sim.dye_size();
    let col = ((x * w as f32) as u32).min(w - 1);
    let row = (((1.0 - y) * h as f32) as u32).min(h - 1);
    (row * w + col) as usize
}

#[test]
fn idle_steps_leave_dye_black() {
    let Some(ctx) = headless_context() else {
        return;
    };
    let mut sim = small_sim(ctx);
    for _ in 0..10 {
        sim.step(0.016);
    }
    let dye = sim.read_dye();
    for (i, px) in dye.iter().enumerate() {
        for c in &px[..3] {
            assert!(c.abs() < 1e-6, "pixel {i} is non-zero: {px:?}");
        }
    }
}

#[test]
fn splat_deposits_dye_near_center_only() {
    let Some(ctx) = headless_context() else {
        return;
    };
    let mut sim = small_sim(ctx);
    sim.splat(0.5, 0.5, 100.0, 0.0, Color::new(1.0, 0.5, 0.2));
    sim.step(0.016);

    let dye = sim.read_dye();
    let center = dye[dye_index(&sim, 0.5, 0.5)];
    assert!(
        center[0] > 0.01,
        "center pixel should carry dye, got {center:?}"
    );

    let far = dye[dye_index(&sim, 0.05, 0.05)];
    for c in &far[..3] {
        assert!(c.abs() < 1e-3, "far pixel should stay clear, got {far:?}");
    }
}

#[test]
fn double_buffer_swap_is_an_involution() {
    let Some(ctx) = headless_context() else {
        return;
    };
    let mut sim = small_sim(ctx);
    // The splat lands in the freshly swapped read buffer; the other buffer
    // still holds the zero-initialized pre-splat state.
    sim.splat(0.5, 0.5, 100.0, 0.0, Color::new(1.0, 1.0, 1.0));

    let (w, h) = sim.velocity_size();
    let center = ((h / 2) * w + w / 2) as usize;
    let splatted = sim.read_velocity()[center][0];
    assert!(splatted > 1.0, "expected a velocity impulse, got {splatted}");

    sim.swap_velocity();
    let other = sim.read_velocity()[center][0];
    assert!(other.abs() < 1e-6, "stale buffer should be empty, got {other}");

    // Two swaps restore the original read/write assignment.
    sim.swap_velocity();
    let restored = sim.read_velocity()[center][0];
    assert_eq!(restored, splatted);
}

const CACHE_TEST_FRAG: &str = r#"
@group(0) @binding(2) var tex: texture_2d<f32>;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    if (SHADING) {
        return field_sample(tex, in.uv);
    }
    return vec4<f32>(0.0, 0.0, 0.0, 1.0);
}
"#;

#[test]
fn material_cache_compiles_each_permutation_once() {
    let Some(ctx) = headless_context() else {
        return;
    };
    let format = wgpu::TextureFormat::Rgba8Unorm;
    let mut material = Material::new("Cache Test", CACHE_TEST_FRAG, &["SHADING"], 1, None);

    material.set_keywords(&[]);
    assert!(material.program(&ctx.device, true, format).is_some());
    assert_eq!(material.compile_count(), 1);

    // Same keyword set again: cache hit, no recompile.
    material.set_keywords(&[]);
    assert!(material.program(&ctx.device, true, format).is_some());
    assert_eq!(material.compile_count(), 1);

    // A new permutation compiles once more.
    material.set_keywords(&["SHADING"]);
    assert!(material.program(&ctx.device, true, format).is_some());
    assert_eq!(material.compile_count(), 2);

    // Both permutations stay independently retrievable.
    material.set_keywords(&[]);
    assert!(material.program(&ctx.device, true, format).is_some());
    assert_eq!(material.compile_count(), 2);
}

const VALUE_FRAG: &str = r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return vec4<f32>(params.value);
}
"#;

/// Two passes recorded into one encoder and submitted together must each see
/// their own uniforms. Distinct `Material` instances guarantee this even when
/// both resolve to the same output format; the advection step relies on it.
#[test]
fn passes_in_one_submit_keep_independent_uniforms() {
    let Some(ctx) = headless_context() else {
        return;
    };
    let format = wgpu::TextureFormat::Rgba8Unorm;
    let mut first = Material::new("Value First", VALUE_FRAG, &[], 0, None);
    let mut second = Material::new("Value Second", VALUE_FRAG, &[], 0, None);
    let target_a = RenderTarget::new(&ctx.device, "Value A", 4, 4, format);
    let target_b = RenderTarget::new(&ctx.device, "Value B", 4, 4, format);

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Uniform Isolation"),
        });
    let program_a = first.program(&ctx.device, true, format).unwrap();
    program_a.write_params(
        &ctx.queue,
        &SimParams {
            value: 0.25,
            ..Default::default()
        },
    );
    program_a.draw(&ctx.device, &mut encoder, &ctx.sampler, &[], &target_a.view);

    let program_b = second.program(&ctx.device, true, format).unwrap();
    program_b.write_params(
        &ctx.queue,
        &SimParams {
            value: 0.75,
            ..Default::default()
        },
    );
    program_b.draw(&ctx.device, &mut encoder, &ctx.sampler, &[], &target_b.view);
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let a = target_a.read_pixels(&ctx)[0][0];
    let b = target_b.read_pixels(&ctx)[0][0];
    assert!((a - 0.25).abs() < 0.01, "first pass rendered {a}");
    assert!((b - 0.75).abs() < 0.01, "second pass rendered {b}");
}

#[test]
fn caps_flags_reflect_negotiated_formats() {
    let Some(ctx) = headless_context() else {
        return;
    };
    let caps = ctx.caps;
    assert_eq!(
        caps.float_color_buffers,
        caps.rgba != wgpu::TextureFormat::Rgba8Unorm
    );
    // The rgba8 fallback is always filterable.
    if !caps.float_color_buffers {
        assert!(caps.linear_filtering);
    }
}

#[test]
fn palette_override_changes_generated_colors() {
    let Some(ctx) = headless_context() else {
        return;
    };
    let mut sim = small_sim(ctx);
    let palette = vec!["#FF0000".to_string(), "#00FF00".to_string()];
    sim.set_palette(&palette).unwrap();
    assert_eq!(sim.generate_color(), Color::new(1.0, 0.0, 0.0));
    assert_eq!(sim.generate_color(), Color::new(0.0, 1.0, 0.0));
    assert_eq!(sim.generate_color(), Color::new(1.0, 0.0, 0.0));
}

#[test]
fn resize_preserves_injected_dye() {
    let Some(ctx) = headless_context() else {
        return;
    };
    let mut sim = small_sim(ctx);
    sim.splat(0.5, 0.5, 0.0, 0.0, Color::new(1.0, 1.0, 1.0));
    sim.resize(512, 256);

    let dye = sim.read_dye();
    let center = dye[dye_index(&sim, 0.5, 0.5)];
    assert!(
        center[0] > 0.01,
        "dye should survive a resize resample, got {center:?}"
    );
}
