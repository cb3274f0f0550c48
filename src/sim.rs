//! Simulation orchestrator: owns the GPU context, programs and fields, and
//! advances the fluid one timestep per frame.
//!
//! Pass order within a step is fixed: curl, vorticity confinement,
//! divergence, pressure clear, Jacobi pressure iterations, gradient
//! subtraction, velocity self-advection, dye advection. Splats injected by
//! pointer events between frames become visible at the next advection pass.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::color::{random_color, Color, Palette};
use crate::config::SplashConfig;
use crate::context::GpuContext;
use crate::material::{Material, Program, SimParams};
use crate::pointer::Pointer;
use crate::targets::Framebuffers;

// Long frame gaps (tab switches, window drags) would blow up the advection
// step; clamp to one 60 Hz frame.
const MAX_DT: f32 = 0.016_666;

const SPLAT_SRC: &str = include_str!("shaders/splat.wgsl");
const CURL_SRC: &str = include_str!("shaders/curl.wgsl");
const VORTICITY_SRC: &str = include_str!("shaders/vorticity.wgsl");
const DIVERGENCE_SRC: &str = include_str!("shaders/divergence.wgsl");
const CLEAR_SRC: &str = include_str!("shaders/clear.wgsl");
const PRESSURE_SRC: &str = include_str!("shaders/pressure.wgsl");
const GRADIENT_SUBTRACT_SRC: &str = include_str!("shaders/gradient_subtract.wgsl");
const COPY_SRC: &str = include_str!("shaders/copy.wgsl");
const ADVECTION_SRC: &str = include_str!("shaders/advection.wgsl");
const DISPLAY_SRC: &str = include_str!("shaders/display.wgsl");

/// Fixed-permutation programs, one per pass and output format.
struct Programs {
    splat_velocity: Program,
    splat_dye: Program,
    curl: Program,
    vorticity: Program,
    divergence: Program,
    clear: Program,
    pressure: Program,
    gradient_subtract: Program,
    copy_velocity: Program,
    copy_dye: Program,
}

impl Programs {
    fn compile(ctx: &GpuContext) -> anyhow::Result<Self> {
        let device = &ctx.device;
        let caps = &ctx.caps;
        let filterable = caps.linear_filtering;
        let replace = Some(wgpu::BlendState::REPLACE);
        let plain = |label, src, textures, format| {
            Program::new(device, label, src, &[], textures, format, replace, filterable)
        };
        Ok(Self {
            splat_velocity: plain("Splat Velocity", SPLAT_SRC, 1, caps.rg)?,
            splat_dye: plain("Splat Dye", SPLAT_SRC, 1, caps.rgba)?,
            curl: plain("Curl", CURL_SRC, 1, caps.r)?,
            vorticity: plain("Vorticity", VORTICITY_SRC, 2, caps.rg)?,
            divergence: plain("Divergence", DIVERGENCE_SRC, 1, caps.r)?,
            clear: plain("Clear Pressure", CLEAR_SRC, 1, caps.r)?,
            pressure: plain("Jacobi Pressure", PRESSURE_SRC, 2, caps.r)?,
            gradient_subtract: plain("Gradient Subtract", GRADIENT_SUBTRACT_SRC, 2, caps.rg)?,
            copy_velocity: plain("Copy Velocity", COPY_SRC, 1, caps.rg)?,
            copy_dye: plain("Copy Dye", COPY_SRC, 1, caps.rgba)?,
        })
    }
}

pub struct Simulation {
    ctx: GpuContext,
    config: SplashConfig,
    output_format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    fb: Framebuffers,
    programs: Programs,
    advect_velocity: Material,
    advect_dye: Material,
    display: Material,
    palette: Palette,
    rng: StdRng,
    pub pointer: Pointer,
    color_timer: f32,
    pointer_active: bool,
}

impl Simulation {
    /// Compiles every pass and allocates the fields at the current aspect
    /// ratio. Errors here mean the effect cannot run; the embedding
    /// application should decline to mount it.
    pub fn new(
        ctx: GpuContext,
        config: SplashConfig,
        output_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(width > 0 && height > 0, "drawable surface has zero size");
        let palette = Palette::from_hex(&config.colors)?;
        let aspect = width as f32 / height as f32;
        let fb = Framebuffers::create(&ctx, config.sim_resolution, config.dye_resolution, aspect);
        let programs = Programs::compile(&ctx)?;

        // Velocity and dye advection get separate programs so their per-pass
        // uniforms never alias within one submit, even when capability
        // fallback collapses the rg and rgba formats to the same one.
        let mut advect_velocity = Material::new(
            "Advect Velocity",
            ADVECTION_SRC,
            &["MANUAL_FILTERING"],
            2,
            Some(wgpu::BlendState::REPLACE),
        );
        let mut advect_dye = Material::new(
            "Advect Dye",
            ADVECTION_SRC,
            &["MANUAL_FILTERING"],
            2,
            Some(wgpu::BlendState::REPLACE),
        );
        if !ctx.caps.linear_filtering {
            advect_velocity.set_keywords(&["MANUAL_FILTERING"]);
            advect_dye.set_keywords(&["MANUAL_FILTERING"]);
        }
        let mut display = Material::new(
            "Display",
            DISPLAY_SRC,
            &["SHADING"],
            1,
            Some(wgpu::BlendState::ALPHA_BLENDING),
        );
        if config.shading {
            display.set_keywords(&["SHADING"]);
        }

        // Warm the caches so compile failures surface at init time.
        let filterable = ctx.caps.linear_filtering;
        anyhow::ensure!(
            advect_velocity
                .program(&ctx.device, filterable, ctx.caps.rg)
                .is_some(),
            "velocity advection program failed to compile"
        );
        anyhow::ensure!(
            advect_dye
                .program(&ctx.device, filterable, ctx.caps.rgba)
                .is_some(),
            "dye advection program failed to compile"
        );
        anyhow::ensure!(
            display.program(&ctx.device, filterable, output_format).is_some(),
            "display program failed to compile"
        );

        Ok(Self {
            ctx,
            config,
            output_format,
            width,
            height,
            fb,
            programs,
            advect_velocity,
            advect_dye,
            display,
            palette,
            rng: StdRng::from_entropy(),
            pointer: Pointer::default(),
            color_timer: 0.0,
            pointer_active: false,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn config(&self) -> &SplashConfig {
        &self.config
    }

    /// Overrides the color palette at runtime.
    pub fn set_palette(&mut self, hex_colors: &[String]) -> anyhow::Result<()> {
        self.palette = Palette::from_hex(hex_colors)?;
        Ok(())
    }

    fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// Next splat color: round-robin over the palette when one is set,
    /// otherwise a fresh random HSV draw every time.
    pub fn generate_color(&mut self) -> Color {
        self.palette
            .next_color()
            .unwrap_or_else(|| random_color(&mut self.rng))
    }

    fn correct_radius(&self, radius: f32) -> f32 {
        let aspect = self.aspect_ratio();
        if aspect > 1.0 {
            radius * aspect
        } else {
            radius
        }
    }

    /// Injects a velocity impulse (dx, dy) and a dye deposit of `color` at
    /// normalized position (x, y), each into its own double buffer.
    pub fn splat(&mut self, x: f32, y: f32, dx: f32, dy: f32, color: Color) {
        let device = &self.ctx.device;
        let queue = &self.ctx.queue;
        let radius = self.correct_radius(self.config.splat_radius / 100.0);
        let aspect_ratio = self.aspect_ratio();

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Splat"),
        });

        self.programs.splat_velocity.write_params(
            queue,
            &SimParams {
                texel_size: self.fb.velocity.texel_size(),
                point: [x, y],
                radius,
                aspect_ratio,
                color: [dx, dy, 0.0, 1.0],
                ..Default::default()
            },
        );
        self.programs.splat_velocity.draw(
            device,
            &mut encoder,
            &self.ctx.sampler,
            &[&self.fb.velocity.read.view],
            &self.fb.velocity.write.view,
        );
        self.fb.velocity.swap();

        self.programs.splat_dye.write_params(
            queue,
            &SimParams {
                texel_size: self.fb.dye.texel_size(),
                point: [x, y],
                radius,
                aspect_ratio,
                color: [color.r, color.g, color.b, 1.0],
                ..Default::default()
            },
        );
        self.programs.splat_dye.draw(
            device,
            &mut encoder,
            &self.ctx.sampler,
            &[&self.fb.dye.read.view],
            &self.fb.dye.write.view,
        );
        self.fb.dye.swap();

        queue.submit(std::iter::once(encoder.finish()));
    }

    /// Drag splat: impulse proportional to the pointer's aspect-corrected
    /// delta, dyed with the pointer's current color.
    pub fn splat_pointer(&mut self) {
        let dx = self.pointer.delta_x * self.config.splat_force;
        let dy = self.pointer.delta_y * self.config.splat_force;
        let (x, y) = (self.pointer.texcoord_x, self.pointer.texcoord_y);
        let color = self.pointer.color;
        self.splat(x, y, dx, dy, color);
    }

    /// Click splash: amplified color and a randomized impulse independent of
    /// pointer motion, visually distinct from a drag trail.
    pub fn click_splat(&mut self) {
        let color = self.pointer.color.scale(10.0);
        let dx = 10.0 * (self.rng.gen::<f32>() - 0.5);
        let dy = 30.0 * (self.rng.gen::<f32>() - 0.5);
        let (x, y) = (self.pointer.texcoord_x, self.pointer.texcoord_y);
        self.splat(x, y, dx, dy, color);
    }

    /// One randomized splash at screen center, used once on startup so the
    /// effect is visible before any input arrives.
    pub fn splash(&mut self) {
        let color = self.generate_color().scale(10.0);
        let dx = 1000.0 * (self.rng.gen::<f32>() - 0.5);
        let dy = 1000.0 * (self.rng.gen::<f32>() - 0.5);
        self.splat(0.5, 0.5, dx, dy, color);
    }

    /// Pointer press in window pixel coordinates.
    pub fn pointer_down(&mut self, id: i64, x: f32, y: f32) {
        let (w, h) = (self.width as f32, self.height as f32);
        self.pointer.down(id, x, y, w, h);
        self.pointer.color = self.generate_color();
        self.click_splat();
    }

    /// Pointer motion in window pixel coordinates. Splats immediately; the
    /// injected impulse is picked up by the next frame's advection.
    pub fn pointer_move(&mut self, x: f32, y: f32) {
        let (w, h) = (self.width as f32, self.height as f32);
        let color = self.pointer.color;
        self.pointer.move_to(x, y, color, w, h);
        if self.pointer.moved {
            self.pointer.moved = false;
            self.pointer_active = true;
            self.splat_pointer();
        }
    }

    pub fn pointer_up(&mut self) {
        self.pointer.up();
    }

    /// Per-frame tick: clamps `dt`, cycles the drag color while the pointer
    /// is moving, then advances the fluid by one step.
    pub fn update(&mut self, dt: f32) {
        let dt = dt.min(MAX_DT);
        self.update_colors(dt);
        self.step(dt);
    }

    fn update_colors(&mut self, dt: f32) {
        if !self.pointer_active {
            return;
        }
        self.pointer_active = false;
        self.color_timer += dt * self.config.color_update_speed;
        if self.color_timer >= 1.0 {
            self.color_timer -= self.color_timer.floor();
            self.pointer.color = self.generate_color();
        }
    }

    /// Advances all fields by `dt`. See the module docs for the pass order;
    /// it is strictly sequential and every pass overwrites its target.
    pub fn step(&mut self, dt: f32) {
        let device = &self.ctx.device;
        let queue = &self.ctx.queue;
        let sampler = &self.ctx.sampler;
        let filterable = self.ctx.caps.linear_filtering;
        let sim_texel = self.fb.velocity.texel_size();

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Fluid Step"),
        });

        self.programs.curl.write_params(
            queue,
            &SimParams {
                texel_size: sim_texel,
                ..Default::default()
            },
        );
        self.programs.curl.draw(
            device,
            &mut encoder,
            sampler,
            &[&self.fb.velocity.read.view],
            &self.fb.curl.view,
        );

        self.programs.vorticity.write_params(
            queue,
            &SimParams {
                texel_size: sim_texel,
                curl: self.config.curl,
                dt,
                ..Default::default()
            },
        );
        self.programs.vorticity.draw(
            device,
            &mut encoder,
            sampler,
            &[&self.fb.velocity.read.view, &self.fb.curl.view],
            &self.fb.velocity.write.view,
        );
        self.fb.velocity.swap();

        self.programs.divergence.write_params(
            queue,
            &SimParams {
                texel_size: sim_texel,
                ..Default::default()
            },
        );
        self.programs.divergence.draw(
            device,
            &mut encoder,
            sampler,
            &[&self.fb.velocity.read.view],
            &self.fb.divergence.view,
        );

        self.programs.clear.write_params(
            queue,
            &SimParams {
                value: self.config.pressure,
                ..Default::default()
            },
        );
        self.programs.clear.draw(
            device,
            &mut encoder,
            sampler,
            &[&self.fb.pressure.read.view],
            &self.fb.pressure.write.view,
        );
        self.fb.pressure.swap();

        self.programs.pressure.write_params(
            queue,
            &SimParams {
                texel_size: sim_texel,
                ..Default::default()
            },
        );
        for _ in 0..self.config.pressure_iterations {
            self.programs.pressure.draw(
                device,
                &mut encoder,
                sampler,
                &[&self.fb.pressure.read.view, &self.fb.divergence.view],
                &self.fb.pressure.write.view,
            );
            self.fb.pressure.swap();
        }

        self.programs.gradient_subtract.write_params(
            queue,
            &SimParams {
                texel_size: sim_texel,
                ..Default::default()
            },
        );
        self.programs.gradient_subtract.draw(
            device,
            &mut encoder,
            sampler,
            &[&self.fb.pressure.read.view, &self.fb.velocity.read.view],
            &self.fb.velocity.write.view,
        );
        self.fb.velocity.swap();

        if let Some(advect) = self
            .advect_velocity
            .program(device, filterable, self.ctx.caps.rg)
        {
            advect.write_params(
                queue,
                &SimParams {
                    texel_size: sim_texel,
                    source_texel_size: sim_texel,
                    dt,
                    dissipation: self.config.velocity_dissipation,
                    ..Default::default()
                },
            );
            advect.draw(
                device,
                &mut encoder,
                sampler,
                &[&self.fb.velocity.read.view, &self.fb.velocity.read.view],
                &self.fb.velocity.write.view,
            );
            self.fb.velocity.swap();
        }

        if let Some(advect) = self.advect_dye.program(device, filterable, self.ctx.caps.rgba) {
            advect.write_params(
                queue,
                &SimParams {
                    texel_size: sim_texel,
                    source_texel_size: self.fb.dye.texel_size(),
                    dt,
                    dissipation: self.config.density_dissipation,
                    ..Default::default()
                },
            );
            advect.draw(
                device,
                &mut encoder,
                sampler,
                &[&self.fb.velocity.read.view, &self.fb.dye.read.view],
                &self.fb.dye.write.view,
            );
            self.fb.dye.swap();
        }

        queue.submit(std::iter::once(encoder.finish()));
    }

    /// Composites the dye field onto `target` (the surface frame or any
    /// offscreen view of the negotiated output format) with alpha blending.
    pub fn render(&mut self, target: &wgpu::TextureView, width: u32, height: u32) {
        let keywords: &[&str] = if self.config.shading { &["SHADING"] } else { &[] };
        self.display.set_keywords(keywords);
        let filterable = self.ctx.caps.linear_filtering;
        let Some(program) = self
            .display
            .program(&self.ctx.device, filterable, self.output_format)
        else {
            return; // compile failure was already logged; nothing to draw
        };
        program.write_params(
            &self.ctx.queue,
            &SimParams {
                texel_size: [1.0 / width as f32, 1.0 / height as f32],
                ..Default::default()
            },
        );
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Display"),
            });
        program.draw(
            &self.ctx.device,
            &mut encoder,
            &self.ctx.sampler,
            &[&self.fb.dye.read.view],
            target,
        );
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Handles a drawable resize: reallocates the fields at the new aspect
    /// ratio and resamples dye and velocity so the fluid is preserved.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || (width == self.width && height == self.height) {
            return;
        }
        self.width = width;
        self.height = height;
        self.fb.resize(
            &self.ctx,
            self.config.sim_resolution,
            self.config.dye_resolution,
            width as f32 / height as f32,
            &self.programs.copy_dye,
            &self.programs.copy_velocity,
        );
    }

    /// Blocking readback of the dye read-buffer as RGBA f32 rows, top row
    /// first. Diagnostic and test hook; not part of the per-frame path.
    pub fn read_dye(&self) -> Vec<[f32; 4]> {
        self.fb.dye.read.read_pixels(&self.ctx)
    }

    pub fn dye_size(&self) -> (u32, u32) {
        (self.fb.dye.width(), self.fb.dye.height())
    }

    /// Blocking readback of the velocity read-buffer (xy in the first two
    /// channels).
    pub fn read_velocity(&self) -> Vec<[f32; 4]> {
        self.fb.velocity.read.read_pixels(&self.ctx)
    }

    pub fn velocity_size(&self) -> (u32, u32) {
        (self.fb.velocity.width(), self.fb.velocity.height())
    }

    /// Swaps the velocity double buffer directly. Test hook for the swap
    /// involution property; the step path performs its own swaps.
    pub fn swap_velocity(&mut self) {
        self.fb.velocity.swap();
    }
}
