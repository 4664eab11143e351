//! orogen viewer: a minimal host shell for the terrain engine.
//!
//! Owns the window, the GPU device and the HDR -> tonemap -> swapchain
//! chain, and forwards per-frame camera and light state to the
//! [`terrain::TerrainManager`].

mod settings;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use engine_core::{NoisePatch, TerrainConfigPatch, Time};
use glam::{Mat4, Vec2, Vec3};
use renderer::{Camera, CascadeParams, LightParams, Texture, DEPTH_FORMAT, HDR_FORMAT};
use terrain::{RenderParams, TerrainManager};
use winit::{
    application::ApplicationHandler,
    event::{DeviceEvent, DeviceId, ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{CursorGrabMode, Window, WindowId},
};

use settings::ViewerSettings;

struct ViewerState {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    surface_config: wgpu::SurfaceConfiguration,

    scene_view: wgpu::TextureView,
    depth: Texture,
    tonemap_pipeline: wgpu::RenderPipeline,
    tonemap_layout: wgpu::BindGroupLayout,
    tonemap_bind_group: wgpu::BindGroup,
    tonemap_sampler: wgpu::Sampler,

    manager: TerrainManager,
    camera: Camera,
    time: Time,
    settings: ViewerSettings,

    keys: KeyState,
    cursor_grabbed: bool,
    wireframe: bool,
    debug_lod: bool,
}

#[derive(Default)]
struct KeyState {
    forward: bool,
    back: bool,
    left: bool,
    right: bool,
    up: bool,
    down: bool,
    boost: bool,
}

impl ViewerState {
    async fn new(window: Arc<Window>, settings: ViewerSettings) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone())?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow::anyhow!("no suitable GPU adapter found"))?;
        log::info!("using GPU: {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Viewer Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;
        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let scene_view =
            Self::create_scene_texture(&device, surface_config.width, surface_config.height);
        let depth = Texture::create_depth_texture(
            &device,
            surface_config.width,
            surface_config.height,
            DEPTH_FORMAT,
            "Viewer Depth",
        );

        // Tonemap blit: HDR intermediate -> swapchain
        let tonemap_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Tonemap Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/tonemap.wgsl").into()),
        });
        let tonemap_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Tonemap Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let tonemap_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Tonemap Pipeline Layout"),
                bind_group_layouts: &[&tonemap_layout],
                push_constant_ranges: &[],
            });
        let tonemap_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Tonemap Pipeline"),
            layout: Some(&tonemap_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &tonemap_shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &tonemap_shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });
        let tonemap_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Tonemap Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let tonemap_bind_group =
            Self::create_tonemap_bind_group(&device, &tonemap_layout, &scene_view, &tonemap_sampler);

        let mut manager =
            TerrainManager::new(Arc::clone(&device), Arc::clone(&queue), settings.terrain.clone())?;
        manager.generate(&mut |stage, pct| log::info!("generating: {stage} {pct}%"))?;

        let mut camera = Camera::new(Vec3::new(0.0, settings.terrain.height_scale * 0.8, 0.0));
        camera.set_aspect(surface_config.width, surface_config.height);
        camera.set_yaw_pitch(0.6, -0.35);

        Ok(Self {
            window,
            surface,
            device,
            queue,
            surface_config,
            scene_view,
            depth,
            tonemap_pipeline,
            tonemap_layout,
            tonemap_bind_group,
            tonemap_sampler,
            manager,
            camera,
            time: Time::new(),
            settings,
            keys: KeyState::default(),
            cursor_grabbed: false,
            wireframe: false,
            debug_lod: false,
        })
    }

    // The returned view keeps the texture alive; nothing else needs the
    // texture handle itself.
    fn create_scene_texture(
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> wgpu::TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Scene Color"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HDR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    fn create_tonemap_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        scene_view: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Tonemap Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(scene_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
        self.scene_view = Self::create_scene_texture(&self.device, width, height);
        self.depth =
            Texture::create_depth_texture(&self.device, width, height, DEPTH_FORMAT, "Viewer Depth");
        self.tonemap_bind_group = Self::create_tonemap_bind_group(
            &self.device,
            &self.tonemap_layout,
            &self.scene_view,
            &self.tonemap_sampler,
        );
        self.camera.set_aspect(width, height);
    }

    /// Cascade matrices around the camera, tightest first. Practical split
    /// scheme blending linear and logarithmic distances.
    fn build_cascades(&self) -> (CascadeParams, Vec<(Mat4, Vec3)>) {
        let count = self.settings.shadow_cascades.clamp(1, 4);
        let near = 20.0f32;
        let far = self.settings.shadow_distance.max(near * 2.0);
        let sun = self.settings.sun_direction();
        let lambda = 0.7;

        let mut view_proj = [Mat4::IDENTITY; 4];
        let mut splits = [f32::MAX; 4];
        let mut slots = Vec::with_capacity(count as usize);

        for i in 0..count {
            let t = (i + 1) as f32 / count as f32;
            let linear = near + (far - near) * t;
            let logarithmic = near * (far / near).powf(t);
            let split = linear * (1.0 - lambda) + logarithmic * lambda;
            splits[i as usize] = split;

            let center = self.camera.position + self.camera.forward() * split * 0.5;
            let radius = split;
            let eye = center + sun * radius * 2.0;
            let up = if sun.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
            let view = Mat4::look_at_rh(eye, center, up);
            let proj = Mat4::orthographic_rh(
                -radius,
                radius,
                -radius,
                radius,
                0.1,
                radius * 4.0,
            );
            view_proj[i as usize] = proj * view;
            slots.push((view_proj[i as usize], eye));
        }

        (
            CascadeParams {
                view_proj,
                splits,
                count,
            },
            slots,
        )
    }

    fn update(&mut self) {
        self.time.update();
        let dt = self.time.delta_seconds().min(0.1);
        let mut movement = Vec2::ZERO;
        if self.keys.forward {
            movement.y += 1.0;
        }
        if self.keys.back {
            movement.y -= 1.0;
        }
        if self.keys.right {
            movement.x += 1.0;
        }
        if self.keys.left {
            movement.x -= 1.0;
        }
        let vertical =
            (self.keys.up as i32 - self.keys.down as i32) as f32;
        let speed = if self.keys.boost {
            self.settings.fly_speed * 4.0
        } else {
            self.settings.fly_speed
        };
        self.camera.process_fly(movement, vertical, speed, dt);
    }

    fn render(&mut self) -> Result<()> {
        let output = self.surface.get_current_texture()?;
        let output_view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let (cascades, slots) = self.build_cascades();
        self.manager
            .write_shadow_uniforms(&slots, self.camera.position)?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        // Depth-only cascade passes
        for slot in 0..slots.len() as u32 {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Shadow Cascade Pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: self.manager.shadow_layer_view(slot),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.manager.render_shadow(&mut pass, slot);
        }

        // Main pass into the HDR intermediate, reversed-Z
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Main Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.scene_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.25,
                            g: 0.45,
                            b: 0.75,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let params = RenderParams {
                view_proj: self.camera.view_projection_matrix(),
                model: Mat4::IDENTITY,
                camera_pos: self.camera.position,
                light: LightParams {
                    direction: self.settings.sun_direction(),
                    ..Default::default()
                },
                cascades: Some(cascades),
                use_scene_ambient: true,
                wireframe: self.wireframe,
                debug_lod: self.debug_lod,
            };
            self.manager.render(&mut pass, &params);
        }

        // Tonemap blit to the swapchain
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Tonemap Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.tonemap_pipeline);
            pass.set_bind_group(0, &self.tonemap_bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn regenerate_with_random_seed(&mut self) {
        let seed: u32 = rand::random();
        log::info!("regenerating terrain with seed {seed}");
        let patch = TerrainConfigPatch {
            noise: Some(NoisePatch {
                seed: Some(seed),
                ..Default::default()
            }),
            ..Default::default()
        };
        if let Err(e) = self
            .manager
            .regenerate(&patch, &mut |stage, pct| log::info!("{stage}: {pct}%"))
        {
            log::warn!("regenerate failed: {e}");
        }
    }

    fn export_heightmap(&self) {
        let Some((heights, resolution)) = self.manager.height_data() else {
            log::warn!("no heightmap readback available to export");
            return;
        };
        let pixels: Vec<u16> = heights
            .iter()
            .map(|h| ((h + 0.5).clamp(0.0, 1.0) * u16::MAX as f32) as u16)
            .collect();
        let Some(img) =
            image::ImageBuffer::<image::Luma<u16>, _>::from_vec(resolution, resolution, pixels)
        else {
            log::warn!("heightmap dimensions did not match readback size");
            return;
        };
        match img.save("heightmap.png") {
            Ok(()) => log::info!("wrote heightmap.png ({resolution}x{resolution})"),
            Err(e) => log::warn!("failed to write heightmap.png: {e}"),
        }
    }

    fn set_cursor_grab(&mut self, grab: bool) {
        self.cursor_grabbed = grab;
        if grab {
            let _ = self
                .window
                .set_cursor_grab(CursorGrabMode::Locked)
                .or_else(|_| self.window.set_cursor_grab(CursorGrabMode::Confined));
            self.window.set_cursor_visible(false);
        } else {
            let _ = self.window.set_cursor_grab(CursorGrabMode::None);
            self.window.set_cursor_visible(true);
        }
    }

    /// Returns true when the app should exit.
    fn handle_window_event(&mut self, event: WindowEvent) -> bool {
        match event {
            WindowEvent::CloseRequested => return true,
            WindowEvent::Resized(size) => self.resize(size.width, size.height),
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => {
                if !self.cursor_grabbed {
                    self.set_cursor_grab(true);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let pressed = event.state == ElementState::Pressed;
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::KeyW) => self.keys.forward = pressed,
                    PhysicalKey::Code(KeyCode::KeyS) => self.keys.back = pressed,
                    PhysicalKey::Code(KeyCode::KeyA) => self.keys.left = pressed,
                    PhysicalKey::Code(KeyCode::KeyD) => self.keys.right = pressed,
                    PhysicalKey::Code(KeyCode::Space) => self.keys.up = pressed,
                    PhysicalKey::Code(KeyCode::ControlLeft) => self.keys.down = pressed,
                    PhysicalKey::Code(KeyCode::ShiftLeft) => self.keys.boost = pressed,
                    PhysicalKey::Code(KeyCode::Escape) if pressed => self.set_cursor_grab(false),
                    PhysicalKey::Code(KeyCode::KeyF) if pressed => {
                        self.wireframe = !self.wireframe;
                    }
                    PhysicalKey::Code(KeyCode::KeyL) if pressed => {
                        self.debug_lod = !self.debug_lod;
                        let stats = self.manager.stats();
                        log::info!(
                            "selection: {} patches ({} considered, {} culled, {} truncated)",
                            stats.selected,
                            stats.considered,
                            stats.culled,
                            stats.truncated
                        );
                    }
                    PhysicalKey::Code(KeyCode::KeyI) if pressed => {
                        let enabled = !self.manager.config().island.enabled;
                        self.manager.set_island_enabled(enabled);
                        if enabled {
                            if let Err(e) = self.manager.regenerate_island_mask() {
                                log::warn!("island mask generation failed: {e}");
                            }
                        }
                        log::info!("island mode: {enabled}");
                    }
                    PhysicalKey::Code(KeyCode::KeyG) if pressed => {
                        self.regenerate_with_random_seed();
                    }
                    PhysicalKey::Code(KeyCode::KeyP) if pressed => {
                        self.export_heightmap();
                    }
                    _ => {}
                }
            }
            WindowEvent::RedrawRequested => {
                self.update();
                match self.render() {
                    Ok(()) => {}
                    Err(e) => log::warn!("frame failed: {e}"),
                }
                self.window.request_redraw();
            }
            _ => {}
        }
        false
    }

    fn handle_device_event(&mut self, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if self.cursor_grabbed {
                self.camera.process_mouse(delta.0 as f32, delta.1 as f32);
            }
        }
    }
}

struct App {
    state: Option<ViewerState>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_none() {
            let settings = ViewerSettings::load(Path::new("viewer.ron"));
            let window_attrs = Window::default_attributes()
                .with_title("orogen")
                .with_inner_size(winit::dpi::LogicalSize::new(
                    settings.window_width,
                    settings.window_height,
                ));
            let window = match event_loop.create_window(window_attrs) {
                Ok(w) => Arc::new(w),
                Err(e) => {
                    log::error!("failed to create window: {e}");
                    event_loop.exit();
                    return;
                }
            };
            match pollster::block_on(ViewerState::new(window.clone(), settings)) {
                Ok(state) => {
                    self.state = Some(state);
                    window.request_redraw();
                }
                Err(e) => {
                    log::error!("failed to initialize viewer: {e}");
                    event_loop.exit();
                }
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(state) = &mut self.state {
            if state.handle_window_event(event) {
                event_loop.exit();
            }
        }
    }

    fn device_event(&mut self, _: &ActiveEventLoop, _: DeviceId, event: DeviceEvent) {
        if let Some(state) = &mut self.state {
            state.handle_device_event(event);
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("orogen terrain viewer");
    log::info!("controls: WASD+mouse fly, Shift boost, F wireframe, L LOD debug");
    log::info!("          G regenerate, I island toggle, P export heightmap.png");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App { state: None };
    event_loop.run_app(&mut app)?;
    Ok(())
}
