use std::sync::Arc;

use anyhow::Context as _;
use ash::vk;
use ray_query_renderer::{
    animation::SpinAnimator,
    camera::{Camera, CameraSettings},
    config::{Config, ConfigFileLoader, TextureMemoryConfig},
    gpu::PresentOutcome,
    scene::{AlphaMode, Instance, Material, PointLight, Scene, SpotLight, Transform, Vertex},
    scheduler::{FrameOutcome, FrameScheduler},
    time::Time,
    vulkan::{BlitPostProcessor, Context, VulkanDevice, VulkanFrameQueue},
};
use ultraviolet::{Mat4, Rotor3, Vec3, Vec4};
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::EventLoop,
    window::{Window, WindowBuilder},
};

// Rust will drop these fields in the order they are declared
struct RayQueryDemo {
    scheduler: FrameScheduler<VulkanDevice, VulkanFrameQueue>,
    scene: Scene,
    time: Time,
    should_recreate_swapchain: bool,

    _device: VulkanDevice,
    _context: Arc<Context>,

    /// Application window
    window: Window,
}

impl RayQueryDemo {
    fn new(window: Window, config: &Config) -> anyhow::Result<Self> {
        let context = Arc::new(Context::new(&window).context("Could not set up Vulkan")?);
        let device = VulkanDevice::new(context.clone())?;
        let texture_limits = TextureMemoryConfig::for_vram_bytes(context.device_local_memory());

        let window_size = window.inner_size();
        let mut scene = demo_scene();
        scene
            .camera
            .set_aspect_ratio(window_size.width, window_size.height);

        let queue = VulkanFrameQueue::new(
            context.clone(),
            config,
            extent(window_size),
            Box::new(BlitPostProcessor),
        )
        .context("Could not create the swapchain and pipelines")?;

        let animator = SpinAnimator::new(&scene, 0.8).with_light_orbit_radius(3.0);
        let scheduler = FrameScheduler::new(
            &device,
            queue,
            &scene,
            config,
            texture_limits,
            (window_size.width, window_size.height),
        )
        .context("Could not upload the scene")?
        .with_animator(Box::new(animator));

        Ok(Self {
            scheduler,
            scene,
            time: Time::new(),
            should_recreate_swapchain: false,
            _device: device,
            _context: context,
            window,
        })
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        self.scene.camera.set_aspect_ratio(size.width, size.height);
        self.scheduler.set_extent((size.width, size.height));
        self.should_recreate_swapchain = true;
    }

    fn draw_frame(&mut self) -> anyhow::Result<()> {
        let window_size = self.window.inner_size();
        if window_size.width == 0 || window_size.height == 0 {
            return Ok(());
        }

        if self.should_recreate_swapchain {
            self.scheduler
                .queue_mut()
                .recreate_swapchain(extent(window_size))?;
            self.should_recreate_swapchain = false;
        }

        self.time.update();
        match self
            .scheduler
            .draw_frame(&mut self.scene, self.time.elapsed_seconds())?
        {
            FrameOutcome::Skipped => self.should_recreate_swapchain = true,
            FrameOutcome::Rendered(frame) => {
                log::trace!(
                    "Rendered {} with {} draws in {:.2} ms",
                    frame.slot,
                    frame.draws.total(),
                    self.time.delta_seconds() * 1000.0
                );
                if frame.present != PresentOutcome::Presented {
                    self.should_recreate_swapchain = true;
                }
            }
        }
        Ok(())
    }

    fn main_loop(self, event_loop: EventLoop<()>) -> ! {
        let mut demo = Some(self);
        event_loop.run(move |event, _, control_flow| {
            control_flow.set_poll();
            let Some(app) = demo.as_mut() else {
                return;
            };

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => control_flow.set_exit(),
                    WindowEvent::Resized(size) => app.resize(size),
                    WindowEvent::KeyboardInput {
                        input:
                            KeyboardInput {
                                virtual_keycode: Some(VirtualKeyCode::Escape),
                                state: ElementState::Pressed,
                                ..
                            },
                        ..
                    } => control_flow.set_exit(),
                    WindowEvent::KeyboardInput {
                        input:
                            KeyboardInput {
                                virtual_keycode: Some(VirtualKeyCode::R),
                                state: ElementState::Pressed,
                                ..
                            },
                        ..
                    } => app.scheduler.request_full_refresh(),
                    _ => {}
                },
                Event::MainEventsCleared => app.window.request_redraw(),
                Event::RedrawRequested(_window_id) => {
                    if let Err(error) = app.draw_frame() {
                        log::error!("{:#}", error);
                        control_flow.set_exit_with_code(1);
                    }
                }
                Event::LoopDestroyed => {
                    // The GPU has to be idle before the scene buffers go away
                    demo.take();
                }
                _ => {}
            }
        })
    }
}

fn extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

/// A ring of spinning cubes around a glass cube, on top of a floor.
fn demo_scene() -> Scene {
    let mut camera = Camera::new(CameraSettings::default());
    camera.position = Vec3::new(0.0, 3.0, 12.0);
    let mut scene = Scene::new(camera);

    let mut floor_material = Material::default();
    floor_material.base_color_factor = Vec4::new(0.6, 0.6, 0.6, 1.0);
    floor_material.reflective = 1;
    let floor_material = scene.add_material(floor_material);

    let mut cube_material = Material::default();
    cube_material.base_color_factor = Vec4::new(0.9, 0.3, 0.2, 1.0);
    cube_material.metallic_factor = 0.2;
    cube_material.roughness_factor = 0.4;
    let cube_material = scene.add_material(cube_material);

    let mut glass_material = Material::default().with_alpha_mode(AlphaMode::Blend);
    glass_material.base_color_factor = Vec4::new(0.4, 0.7, 1.0, 0.3);
    glass_material.casts_shadows = 0;
    let glass_material = scene.add_material(glass_material);

    let (vertices, indices) = cube();
    let floor = scene.add_mesh(&vertices, &indices, Some(floor_material));
    let cube = scene.add_mesh(&vertices, &indices, Some(cube_material));
    let glass = scene.add_mesh(&vertices, &indices, Some(glass_material));

    let floor_transform = Transform::from_position(Vec3::new(0.0, -1.0, 0.0))
        .with_scale(Vec3::new(20.0, 0.2, 20.0));
    scene.add_instance(Instance::new(floor, floor_transform.into()));
    let ring = 8;
    for i in 0..ring {
        let angle = i as f32 / ring as f32 * std::f32::consts::TAU;
        let position = Vec3::new(angle.cos() * 5.0, 0.0, angle.sin() * 5.0);
        let transform =
            Transform::from_position(position).with_orientation(Rotor3::from_rotation_xz(-angle));
        scene.add_instance(Instance::new(cube, transform.into()).with_animated(i % 2 == 0));
    }
    scene.add_instance(Instance::new(
        glass,
        Mat4::from_translation(Vec3::new(0.0, 0.5, 0.0)) * Mat4::from_scale(2.0),
    ));

    scene.point_lights.push(
        PointLight::new(Vec3::new(0.0, 4.0, 0.0), Vec3::new(1.0, 0.9, 0.8), 20.0, 15.0)
            .with_animated(true),
    );
    scene.spot_lights.push(SpotLight::new(
        Vec3::new(0.0, 8.0, 8.0),
        Vec3::new(0.0, -1.0, -1.0),
        Vec3::one(),
        30.0,
        0.3,
        0.5,
    ));
    scene
}

/// A unit cube with flat normals, 4 vertices per face.
fn cube() -> (Vec<Vertex>, Vec<u32>) {
    let faces = [
        (Vec3::unit_x(), Vec3::unit_y()),
        (-Vec3::unit_x(), Vec3::unit_y()),
        (Vec3::unit_y(), Vec3::unit_z()),
        (-Vec3::unit_y(), Vec3::unit_z()),
        (Vec3::unit_z(), Vec3::unit_y()),
        (-Vec3::unit_z(), Vec3::unit_y()),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, up) in faces {
        let right = up.cross(normal);
        let base = vertices.len() as u32;
        for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            let position = (normal + right * (u * 2.0 - 1.0) + up * (v * 2.0 - 1.0)) * 0.5;
            vertices.push(Vertex {
                position: position.into(),
                normal: normal.into(),
                uv: [u, v],
                tangent: [right.x, right.y, right.z, 1.0],
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config_loader = ConfigFileLoader::new("config.json");
    let config = config_loader
        .get_or_load_config()
        .context("Could not load config.json")?
        .clone();

    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title(config.window.title.clone())
        .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
        .build(&event_loop)
        .context("Could not create window")?;

    let demo = RayQueryDemo::new(window, &config)?;
    demo.main_loop(event_loop)
}
