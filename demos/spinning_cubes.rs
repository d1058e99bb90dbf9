//! Spinning cubes example.
//!
//! Three cubes rotating under a fixed camera, drawn through the parallel
//! command recording path. Expects precompiled SPIR-V for the object
//! pipeline; pass the vertex and fragment `.spv` paths as arguments or place
//! them at `demos/shaders/object.vert.spv` / `demos/shaders/object.frag.spv`.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use embervk::{prelude::*, CameraMatrices};
use glam::{Mat4, Vec3};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

const CUBE_COUNT: usize = 3;

struct App {
    vertex_spirv: Vec<u32>,
    fragment_spirv: Vec<u32>,
    window: Option<Arc<Window>>,
    surface_provider: Option<WindowSurfaceProvider<Arc<Window>>>,
    renderer: Option<Renderer>,
    start: Instant,
}

impl App {
    fn new(vertex_spirv: Vec<u32>, fragment_spirv: Vec<u32>) -> Self {
        Self {
            vertex_spirv,
            fragment_spirv,
            window: None,
            surface_provider: None,
            renderer: None,
            start: Instant::now(),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let window_attrs = Window::default_attributes()
            .with_title("embervk - Spinning Cubes")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));

        let window = Arc::new(event_loop.create_window(window_attrs).unwrap());
        let size = window.inner_size();
        let surface_provider =
            WindowSurfaceProvider::new(Arc::clone(&window), size.width, size.height);

        let config = RendererConfig {
            vertex_spirv: self.vertex_spirv.clone(),
            fragment_spirv: self.fragment_spirv.clone(),
            ..RendererConfig::default()
        };

        match Renderer::new(&surface_provider, config) {
            Ok(mut renderer) => {
                for _ in 0..CUBE_COUNT {
                    if let Err(e) = renderer.load_object(&MeshData::cube()) {
                        log::error!("Failed to load cube: {e}");
                        event_loop.exit();
                        return;
                    }
                }
                self.renderer = Some(renderer);
                self.surface_provider = Some(surface_provider);
                self.window = Some(window);
                log::info!("Renderer initialized with {CUBE_COUNT} cubes");
            }
            Err(e) => {
                log::error!("Failed to create renderer: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.shutdown() {
                        log::error!("Shutdown error: {e}");
                    }
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let (Some(renderer), Some(provider), Some(window)) = (
                    &mut self.renderer,
                    &self.surface_provider,
                    &self.window,
                ) {
                    let elapsed = self.start.elapsed().as_secs_f32();
                    for (index, object) in renderer.scene().objects().iter().enumerate() {
                        let angle = elapsed + index as f32 * 2.1;
                        let offset = Vec3::new(index as f32 * 1.8 - 1.8, 0.0, 0.0);
                        object.set_transform(
                            Mat4::from_translation(offset)
                                * Mat4::from_rotation_y(angle)
                                * Mat4::from_rotation_x(angle * 0.6),
                        );
                    }

                    let size = window.inner_size();
                    let aspect = size.width as f32 / size.height.max(1) as f32;
                    let view =
                        Mat4::look_at_rh(Vec3::new(0.0, 1.5, 5.0), Vec3::ZERO, Vec3::Y);
                    let mut projection =
                        Mat4::perspective_rh(45.0_f32.to_radians(), aspect, 0.1, 100.0);
                    projection.y_axis.y *= -1.0; // Vulkan Y-flip

                    renderer.set_camera(CameraMatrices { view, projection });

                    if let Err(e) = renderer.draw_frame(provider) {
                        log::error!("Draw error: {e}");
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(provider) = &mut self.surface_provider {
                    provider.set_extent(size.width, size.height);
                }
                if let Some(renderer) = &mut self.renderer {
                    renderer.notify_resize();
                }
            }
            _ => {}
        }
    }
}

fn load_spirv(path: &str) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .map_err(|e| EmberError::VulkanError(format!("Failed to read {path}: {e}")))?;
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| EmberError::VulkanError(format!("Invalid SPIR-V in {path}: {e}")))
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let vertex_path = args
        .next()
        .unwrap_or_else(|| "demos/shaders/object.vert.spv".into());
    let fragment_path = args
        .next()
        .unwrap_or_else(|| "demos/shaders/object.frag.spv".into());

    let vertex_spirv = load_spirv(&vertex_path)?;
    let fragment_spirv = load_spirv(&fragment_path)?;

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(vertex_spirv, fragment_spirv);
    event_loop.run_app(&mut app).expect("Event loop error");

    Ok(())
}
