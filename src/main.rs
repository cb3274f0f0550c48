// splashcursor - interactive fluid cursor effect
// Licensed under MIT License

use std::path::Path;
use std::sync::Arc;

use winit::{
    event::{ElementState, Event, KeyEvent, MouseButton, Touch, TouchPhase, WindowEvent},
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
};

use splashcursor::{GpuContext, Simulation, SplashConfig};

const SETTINGS_FILE_NAME: &str = "splashcursor_settings.json";

struct FrameStats {
    frame_count: u32,
    frame_time_sum: f32,
    last_update: std::time::Instant,
}

impl FrameStats {
    fn new() -> Self {
        Self {
            frame_count: 0,
            frame_time_sum: 0.0,
            last_update: std::time::Instant::now(),
        }
    }

    fn record(&mut self, dt: f32) {
        self.frame_count += 1;
        self.frame_time_sum += dt;
    }

    fn sample(&mut self) -> Option<(f32, f32)> {
        let elapsed = self.last_update.elapsed();
        if elapsed.as_secs_f32() >= 0.5 && self.frame_count > 0 {
            let fps = self.frame_count as f32 / elapsed.as_secs_f32();
            let avg_ms = (self.frame_time_sum / self.frame_count as f32) * 1000.0;
            self.frame_count = 0;
            self.frame_time_sum = 0.0;
            self.last_update = std::time::Instant::now();
            return Some((fps, avg_ms));
        }
        None
    }
}

fn main() -> anyhow::Result<()> {
    use env_logger::Env;
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let config = SplashConfig::load_or_default(Path::new(SETTINGS_FILE_NAME))?;

    let event_loop = EventLoop::new()?;
    #[allow(deprecated)]
    let window = Arc::new(event_loop.create_window(
        winit::window::WindowAttributes::default()
            .with_title("splashcursor")
            .with_inner_size(winit::dpi::PhysicalSize::new(1280, 720)),
    )?);

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let surface = instance.create_surface(window.clone())?;
    let ctx = pollster::block_on(GpuContext::new(&instance, Some(&surface)))?;

    let size = window.inner_size();
    let surface_caps = surface.get_capabilities(&ctx.adapter);
    let surface_format = surface_caps
        .formats
        .iter()
        .find(|f| f.is_srgb())
        .copied()
        .unwrap_or(surface_caps.formats[0]);
    let mut surface_config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format: surface_format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode: wgpu::PresentMode::Fifo,
        alpha_mode: surface_caps.alpha_modes[0],
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    surface.configure(&ctx.device, &surface_config);

    let mut sim = Simulation::new(
        ctx,
        config,
        surface_format,
        surface_config.width,
        surface_config.height,
    )?;
    sim.splash();

    let mut stats = FrameStats::new();
    let mut last_frame = std::time::Instant::now();
    let mut cursor_pos: Option<(f32, f32)> = None;

    #[allow(deprecated)]
    event_loop.run(move |event, control_flow| {
        match event {
            Event::WindowEvent {
                ref event,
                window_id,
            } if window_id == window.id() => match event {
                WindowEvent::CloseRequested => control_flow.exit(),
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            physical_key: PhysicalKey::Code(KeyCode::Escape),
                            ..
                        },
                    ..
                } => control_flow.exit(),
                WindowEvent::CursorMoved { position, .. } => {
                    let (x, y) = (position.x as f32, position.y as f32);
                    cursor_pos = Some((x, y));
                    sim.pointer_move(x, y);
                }
                WindowEvent::MouseInput {
                    state,
                    button: MouseButton::Left,
                    ..
                } => match state {
                    ElementState::Pressed => {
                        if let Some((x, y)) = cursor_pos {
                            sim.pointer_down(-1, x, y);
                        }
                    }
                    ElementState::Released => sim.pointer_up(),
                },
                WindowEvent::Touch(Touch {
                    phase,
                    location,
                    id,
                    ..
                }) => {
                    let (x, y) = (location.x as f32, location.y as f32);
                    match phase {
                        TouchPhase::Started => sim.pointer_down(*id as i64, x, y),
                        TouchPhase::Moved => sim.pointer_move(x, y),
                        TouchPhase::Ended | TouchPhase::Cancelled => sim.pointer_up(),
                    }
                }
                WindowEvent::Resized(physical_size) => {
                    if physical_size.width > 0 && physical_size.height > 0 {
                        surface_config.width = physical_size.width;
                        surface_config.height = physical_size.height;
                        surface.configure(&sim.context().device, &surface_config);
                        sim.resize(physical_size.width, physical_size.height);
                    }
                }
                WindowEvent::RedrawRequested => {
                    let now = std::time::Instant::now();
                    let dt = (now - last_frame).as_secs_f32();
                    last_frame = now;
                    stats.record(dt);

                    sim.update(dt);

                    match surface.get_current_texture() {
                        Ok(frame) => {
                            let view = frame
                                .texture
                                .create_view(&wgpu::TextureViewDescriptor::default());
                            sim.render(&view, surface_config.width, surface_config.height);
                            frame.present();
                        }
                        Err(wgpu::SurfaceError::Lost) => {
                            surface.configure(&sim.context().device, &surface_config);
                        }
                        Err(wgpu::SurfaceError::OutOfMemory) => {
                            log::error!("surface out of memory, exiting");
                            control_flow.exit();
                        }
                        Err(e) => log::warn!("dropped frame: {e:?}"),
                    }

                    if let Some((fps, avg_ms)) = stats.sample() {
                        window.set_title(&format!(
                            "splashcursor | {:.0} FPS | {:.2} ms/frame",
                            fps, avg_ms
                        ));
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                window.request_redraw();
            }
            _ => {}
        }
    })?;

    Ok(())
}
