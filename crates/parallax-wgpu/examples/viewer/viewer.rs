//! Viewer state: window surface, heightmap pipeline and renderer

use super::Args;
use parallax_wgpu::camera::{Camera, FirstPersonController, MoveKey};
use parallax_wgpu::input::{InputAction, KeyInput, apply_render_action, map_key};
use parallax_wgpu::pipeline::ActiveTexture;
use parallax_wgpu::renderer::{ParallaxRenderer, RenderFrame};
use parallax_wgpu::settings::{DebugSettings, RenderSettings};
use parallax_wgpu::stages::{GpuStages, QuickConeAlgorithm};
use parallax_wgpu::texture::{self, GpuTexture};
use parallax_wgpu::{HeightmapPipeline, StageExecutor};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    dpi::PhysicalSize,
    event_loop::ActiveEventLoop,
    window::{Window, WindowAttributes},
};

/// Everything that lives as long as the window
pub struct ViewerContext {
    /// Wrapped in `Arc` to avoid lifetime issue with `wgpu::Surface`.
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_configuration: wgpu::SurfaceConfiguration,

    stages: GpuStages,
    pipeline: HeightmapPipeline<GpuTexture>,
    renderer: ParallaxRenderer,

    camera: Camera,
    controller: FirstPersonController,
    settings: RenderSettings,
    debug: DebugSettings,
    last_frame: Instant,
}

impl ViewerContext {
    /// Creates the window, the GPU device and the initial textures
    ///
    /// The heightmap and albedo from `args` are loaded right away. A region
    /// growing quick cone map is scheduled for the first frame.
    pub fn new(event_loop: &ActiveEventLoop, args: &Args) -> Result<Self, Box<dyn std::error::Error>> {
        let window = Arc::new(event_loop.create_window(WindowAttributes::default().with_resizable(true).with_title("Parallax Viewer"))?);
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone())?;
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Parallax viewer"),
            required_features: parallax_wgpu::device_features(adapter.features()),
            required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
            memory_hints: wgpu::MemoryHints::default(),
            trace: Default::default(),
        }))?;
        tracing::info!(adapter = ?adapter.get_info().name, features = ?device.features(), "GPU initialized");

        let surface_capabilities = surface.get_capabilities(&adapter);
        let surface_texture_format = surface_capabilities.formats.iter().find(|f| f.is_srgb()).copied().unwrap_or(surface_capabilities.formats[0]);
        let surface_configuration = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            width: size.width.max(1),
            height: size.height.max(1),
            format: surface_texture_format,
            view_formats: vec![],
            alpha_mode: surface_capabilities.alpha_modes[0],
            // VSync
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_configuration);

        let stages = GpuStages::new(&device, &queue);
        let renderer = ParallaxRenderer::new(&device, &queue, surface_texture_format);
        let mut pipeline = HeightmapPipeline::new();

        match &args.heightmap {
            Some(path) => pipeline.set_heightmap(texture::load_heightmap(&device, &queue, path, false)?),
            None => pipeline.request_procedural_heightmap(),
        }
        if let Some(path) = &args.albedo {
            pipeline.set_albedo(Some(texture::load_albedo(&device, &queue, path, true)?));
        }
        pipeline.request_quick_conemap(QuickConeAlgorithm::RegionGrowing);

        let mut camera = Camera::default();
        camera.set_aspect_ratio(surface_configuration.width, surface_configuration.height);

        let context = Self {
            window,
            surface,
            device,
            queue,
            surface_configuration,
            stages,
            pipeline,
            renderer,
            camera,
            controller: FirstPersonController::new(),
            settings: RenderSettings::default(),
            debug: DebugSettings::default(),
            last_frame: Instant::now(),
        };
        context.update_window_title();
        Ok(context)
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    pub fn on_move_key(&mut self, key: MoveKey, pressed: bool) {
        self.controller.on_key(key, pressed);
    }

    pub fn on_mouse_button(&mut self, pressed: bool) {
        self.controller.on_mouse_button(pressed);
    }

    pub fn on_mouse_motion(&mut self, dx: f32, dy: f32) {
        self.controller.on_mouse_motion(glam::Vec2::new(dx, dy));
    }

    /// Handles a key press; returns `true` when the viewer should quit
    pub fn on_key(&mut self, input: KeyInput) -> bool {
        let Some(action) = map_key(input) else {
            return false;
        };
        if apply_render_action(action, &mut self.settings, &self.camera) {
            self.update_window_title();
            return false;
        }

        match action {
            InputAction::Quit => return true,
            InputAction::ToggleDebugView => self.debug.draw_debug = !self.debug.draw_debug,
            InputAction::CycleDebugTexture => {
                self.debug.texture = self.debug.texture.next();
                tracing::info!("debug texture: {}", self.debug.texture.name());
            }
            InputAction::DebugMipUp => self.debug.mip_level += 1,
            InputAction::DebugMipDown => self.debug.mip_level = self.debug.mip_level.saturating_sub(1),
            InputAction::GenerateProceduralHeightmap => self.pipeline.request_procedural_heightmap(),
            InputAction::GenerateConemap(algorithm) => {
                if !self.pipeline.request_conemap(algorithm) {
                    tracing::warn!("no heightmap to derive a cone map from");
                }
            }
            InputAction::GenerateQuickConemap(algorithm) => self.pipeline.request_quick_conemap(algorithm),
            InputAction::ToggleTexelCenterHeuristic => {
                let settings = &mut self.pipeline.quick_conemap_settings;
                settings.max_at_texel_center = !settings.max_at_texel_center;
                tracing::info!("max at texel center: {}", settings.max_at_texel_center);
            }
            InputAction::SaveHeightmap => self.save(self.pipeline.heightmap().cloned(), Path::new("heightmap.exr")),
            InputAction::SaveConemap => self.save(self.pipeline.conemap().cloned(), Path::new("conemap.exr")),
            InputAction::UseHeightmap => {
                self.pipeline.use_heightmap();
            }
            InputAction::UseConemap => {
                if !self.pipeline.use_conemap() {
                    tracing::warn!("no cone map generated yet");
                }
            }
            // Handled by apply_render_action
            InputAction::SelectParallaxFun(_) | InputAction::SelectRefinementFun(_) | InputAction::SnapLightToView => {}
        }
        self.update_window_title();
        false
    }

    fn save(&self, texture: Option<GpuTexture>, path: &Path) {
        let Some(texture) = texture else {
            tracing::warn!(path = %path.display(), "nothing to save");
            return;
        };
        if let Err(err) = texture::save_texture_exr(&self.device, &self.queue, &texture, path) {
            tracing::error!("failed to save {}: {err}", path.display());
        }
    }

    /// Runs pending derivation stages, then draws the frame
    pub fn handle_redraw(&mut self) {
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.controller.update(&mut self.camera, dt);

        match self.pipeline.run_pending(&mut self.stages) {
            Ok(report) if !report.is_empty() => self.update_window_title(),
            Ok(_) => {}
            Err(err) => tracing::error!("derivation failed: {err}"),
        }

        self.settings.set_albedo_available(self.pipeline.albedo().is_some());

        let surface = match self.surface.get_current_texture() {
            Ok(surface) => surface,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.surface_configuration);
                return;
            }
            Err(err) => {
                tracing::warn!("failed to acquire surface texture: {err}");
                return;
            }
        };
        let surface_view = surface.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let frame = RenderFrame {
            camera: &self.camera,
            settings: &self.settings,
            debug: &self.debug,
            active: self.pipeline.active_texture(),
            albedo: self.pipeline.albedo(),
            debug_texture: self.pipeline.debug_texture(self.debug.texture),
        };

        let mut command_encoder = self.device.create_command_encoder(&Default::default());
        let size = (self.surface_configuration.width, self.surface_configuration.height);
        self.renderer.render(&self.device, &self.queue, &mut command_encoder, &surface_view, size, &frame);
        self.queue.submit(std::iter::once(command_encoder.finish()));
        surface.present();
    }

    pub fn resize(&mut self, size: PhysicalSize<u32>) {
        if size.width > 0 && size.height > 0 {
            self.surface_configuration.width = size.width;
            self.surface_configuration.height = size.height;
            self.surface.configure(&self.device, &self.surface_configuration);
            self.camera.set_aspect_ratio(size.width, size.height);
        }
    }

    fn update_window_title(&self) {
        let active = match self.pipeline.active() {
            ActiveTexture::Heightmap => self.pipeline.heightmap(),
            ActiveTexture::Conemap => self.pipeline.conemap(),
        };
        let active = active.map(|t| self.stages.info(t).summary()).unwrap_or_else(|| "no texture".to_string());
        let window_title = format!(
            "Parallax Viewer [{} | {}] [{}]{}",
            self.settings.parallax_fun().name(),
            self.settings.refinement_fun().name(),
            active,
            if self.debug.draw_debug { " [DEBUG]" } else { "" }
        );
        self.window.set_title(&window_title);
    }
}
