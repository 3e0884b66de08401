//! Parallax and debug rendering of the active texture
//!
//! The surface is a single quad in the XZ plane drawn as a triangle strip. The
//! parallax pipeline is specialized by the override constants of
//! [`RenderSettings::defines`] and rebuilt whenever they change. The debug
//! pipeline shows one mip level of a texture with a channel swizzle.

use crate::camera::Camera;
use crate::settings::{DebugSettings, RenderSettings, ShaderDefines};
use crate::texture::GpuTexture;
use wgpu::util::DeviceExt;

/// Format of the depth attachment
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Vertex of the surface quad
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Vertex {
    position: [f32; 3],
    tex_coords: [f32; 2],
    normal: [f32; 3],
}

impl Vertex {
    const ATTRIBUTES: &[wgpu::VertexAttribute] = &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2, 2 => Float32x3];

    const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: Self::ATTRIBUTES,
        array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
    };
}

/// Unit quad facing +Y, ordered for a triangle strip
pub const QUAD_VERTICES: &[Vertex] = &[
    Vertex {
        position: [-1.0, 0.0, -1.0],
        tex_coords: [0.0, 0.0],
        normal: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [-1.0, 0.0, 1.0],
        tex_coords: [0.0, 1.0],
        normal: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [1.0, 0.0, -1.0],
        tex_coords: [1.0, 0.0],
        normal: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [1.0, 0.0, 1.0],
        tex_coords: [1.0, 1.0],
        normal: [0.0, 1.0, 0.0],
    },
];

/// Transforms shared by both pipelines
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct VertexUniforms {
    view_proj: [[f32; 4]; 4],
    model: [[f32; 4]; 4],
    model_it: [[f32; 4]; 4],
}

impl VertexUniforms {
    pub fn new(camera: &Camera, settings: &RenderSettings) -> Self {
        let model = settings.model_matrix();
        Self {
            view_proj: camera.view_proj().to_cols_array_2d(),
            model: model.to_cols_array_2d(),
            model_it: model.inverse().transpose().to_cols_array_2d(),
        }
    }
}

/// Shading parameters of the parallax fragment shader
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct FragmentUniforms {
    light_dir: [f32; 3],
    height_map_height: f32,
    cam_pos: [f32; 3],
    light_intensity: f32,
    hm_res: [f32; 2],
    hm_res_r: [f32; 2],
    steps: u32,
    refine_steps: u32,
    relax: f32,
    one_over_steps: f32,
    discard_fragments: u32,
    display_non_converged: u32,
    _padding: [u32; 2],
}

impl FragmentUniforms {
    /// # Arguments
    /// * `camera` - Camera the frame is rendered from
    /// * `settings` - Render settings
    /// * `resolution` - Size of mip 0 of the bound height texture
    pub fn new(camera: &Camera, settings: &RenderSettings, resolution: (u32, u32)) -> Self {
        let steps = settings.step_count.max(1);
        let hm_res = [resolution.0.max(1) as f32, resolution.1.max(1) as f32];
        Self {
            light_dir: settings.light_dir.to_array(),
            height_map_height: settings.heightmap_height,
            cam_pos: camera.position.to_array(),
            light_intensity: settings.light_intensity,
            hm_res,
            hm_res_r: [1.0 / hm_res[0], 1.0 / hm_res[1]],
            steps,
            refine_steps: settings.refine_step_count,
            relax: settings.relax,
            one_over_steps: 1.0 / steps as f32,
            discard_fragments: settings.discard_fragments.into(),
            display_non_converged: settings.display_non_converged.into(),
            _padding: [0; 2],
        }
    }
}

/// Mip level and channel swizzle of the debug view
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct DebugUniforms {
    channels: [u32; 3],
    current_level: f32,
}

impl DebugUniforms {
    /// The level is clamped to the mips the texture actually has
    pub fn new(debug: &DebugSettings, mip_count: u32) -> Self {
        Self {
            channels: debug.channels.map(|channel| channel.index()),
            current_level: debug.mip_level.min(mip_count.saturating_sub(1)) as f32,
        }
    }
}

/// Textures and state of one frame
#[derive(Debug, Clone, Copy)]
pub struct RenderFrame<'a> {
    pub camera: &'a Camera,
    pub settings: &'a RenderSettings,
    pub debug: &'a DebugSettings,
    /// Heightmap or cone map traced by the parallax shader
    pub active: Option<&'a GpuTexture>,
    pub albedo: Option<&'a GpuTexture>,
    /// Texture shown while the debug view is enabled
    pub debug_texture: Option<&'a GpuTexture>,
}

/// What ended up on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    Parallax,
    Debug,
    /// Only the clear color, no texture to draw
    Cleared,
}

fn uniform_layout_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
        binding,
        visibility,
    }
}

fn texture_layout_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
    }
}

fn sampler_layout_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
    }
}

fn create_sampler(device: &wgpu::Device, label: &str, filter: wgpu::FilterMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: filter,
        ..Default::default()
    })
}

fn create_uniform_buffer<T>(device: &wgpu::Device, label: &str) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: std::mem::size_of::<T>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn create_parallax_module(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Parallax shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("shaders/parallax.wgsl").into()),
    })
}

/// Render pipeline over the quad vertex layout with a depth test
fn create_quad_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    target_format: wgpu::TextureFormat,
    constants: &[(&str, f64)],
) -> wgpu::RenderPipeline {
    let compilation_options = wgpu::PipelineCompilationOptions {
        constants,
        ..Default::default()
    };
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        cache: None,
        vertex: wgpu::VertexState {
            module,
            buffers: &[Vertex::LAYOUT],
            compilation_options: compilation_options.clone(),
            entry_point: Some("vs_main"),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            targets: &[Some(wgpu::ColorTargetState {
                format: target_format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options,
            entry_point: Some("fs_main"),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            strip_index_format: None,
            // The quad is visible from both sides
            cull_mode: None,
            front_face: wgpu::FrontFace::Ccw,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
            unclipped_depth: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
    })
}

/// Draws the active texture with parallax mapping, or the debug view
pub struct ParallaxRenderer {
    target_format: wgpu::TextureFormat,
    vertex_buffer: wgpu::Buffer,
    vertex_uniforms: wgpu::Buffer,
    fragment_uniforms: wgpu::Buffer,
    debug_uniforms: wgpu::Buffer,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    /// Bound in place of a missing albedo texture
    white_texture: wgpu::Texture,
    parallax_bind_group_layout: wgpu::BindGroupLayout,
    parallax_pipeline_layout: wgpu::PipelineLayout,
    parallax_module: wgpu::ShaderModule,
    parallax_pipeline: Option<(wgpu::RenderPipeline, ShaderDefines)>,
    debug_bind_group_layout: wgpu::BindGroupLayout,
    debug_pipeline: wgpu::RenderPipeline,
    depth_texture: Option<wgpu::Texture>,
}

impl ParallaxRenderer {
    /// Creates the renderer for color targets of `target_format`
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, target_format: wgpu::TextureFormat) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad vertex buffer"),
            contents: bytemuck::cast_slice(QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let white_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("White fallback texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            white_texture.as_image_copy(),
            &[255u8; 4],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        let parallax_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Parallax bind group layout"),
            entries: &[
                uniform_layout_entry(0, wgpu::ShaderStages::VERTEX),
                uniform_layout_entry(1, wgpu::ShaderStages::FRAGMENT),
                // Heightmap or cone map
                texture_layout_entry(2),
                texture_layout_entry(3),
                sampler_layout_entry(4),
            ],
        });
        let parallax_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Parallax pipeline layout"),
            bind_group_layouts: &[&parallax_bind_group_layout],
            push_constant_ranges: &[],
        });
        let parallax_module = create_parallax_module(device);

        let debug_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Debug view bind group layout"),
            entries: &[
                uniform_layout_entry(0, wgpu::ShaderStages::VERTEX),
                uniform_layout_entry(1, wgpu::ShaderStages::FRAGMENT),
                texture_layout_entry(2),
                sampler_layout_entry(3),
            ],
        });
        let debug_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Debug view pipeline layout"),
            bind_group_layouts: &[&debug_bind_group_layout],
            push_constant_ranges: &[],
        });
        let debug_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Debug view shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/debug_view.wgsl").into()),
        });
        let debug_pipeline = create_quad_pipeline(device, "Debug view pipeline", &debug_pipeline_layout, &debug_module, target_format, &[]);

        Self {
            target_format,
            vertex_buffer,
            vertex_uniforms: create_uniform_buffer::<VertexUniforms>(device, "Vertex uniform buffer"),
            fragment_uniforms: create_uniform_buffer::<FragmentUniforms>(device, "Parallax uniform buffer"),
            debug_uniforms: create_uniform_buffer::<DebugUniforms>(device, "Debug view uniform buffer"),
            linear_sampler: create_sampler(device, "Linear sampler", wgpu::FilterMode::Linear),
            nearest_sampler: create_sampler(device, "Nearest sampler", wgpu::FilterMode::Nearest),
            white_texture,
            parallax_bind_group_layout,
            parallax_pipeline_layout,
            parallax_module,
            parallax_pipeline: None,
            debug_bind_group_layout,
            debug_pipeline,
            depth_texture: None,
        }
    }

    pub fn target_format(&self) -> wgpu::TextureFormat {
        self.target_format
    }

    /// Rebuilds the parallax pipeline if the defines differ from the ones it was built with
    ///
    /// Returns `true` when a new pipeline was created.
    pub fn prepare(&mut self, device: &wgpu::Device, defines: &ShaderDefines) -> bool {
        if let Some((_, built_with)) = &self.parallax_pipeline {
            if built_with == defines {
                return false;
            }
        }

        // Fresh module per rebuild; GL caches programs per module without the constants
        if self.parallax_pipeline.is_some() {
            self.parallax_module = create_parallax_module(device);
        }

        tracing::debug!(defines = ?defines.to_constants(), "building parallax pipeline");
        let pipeline = create_quad_pipeline(
            device,
            "Parallax pipeline",
            &self.parallax_pipeline_layout,
            &self.parallax_module,
            self.target_format,
            &defines.to_constants(),
        );
        self.parallax_pipeline = Some((pipeline, defines.clone()));
        true
    }

    fn depth_view(&mut self, device: &wgpu::Device, size: (u32, u32)) -> wgpu::TextureView {
        let (width, height) = (size.0.max(1), size.1.max(1));
        let texture = match &self.depth_texture {
            Some(texture) if texture.width() == width && texture.height() == height => texture.clone(),
            _ => {
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("Depth texture"),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: DEPTH_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                });
                self.depth_texture = Some(texture.clone());
                texture
            }
        };
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    /// Records the frame into `encoder`
    ///
    /// The target is cleared to white. With the debug view enabled the debug
    /// texture is drawn, otherwise the active texture is traced with the
    /// parallax shader. Nothing but the clear happens when the respective
    /// texture is missing.
    ///
    /// # Arguments
    /// * `device` - The wgpu device
    /// * `queue` - The wgpu command queue, used for uniform uploads
    /// * `encoder` - Command encoder to record into
    /// * `target` - Color attachment of `target_format`
    /// * `target_size` - Size of the color attachment
    /// * `frame` - Textures and settings of this frame
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        target_size: (u32, u32),
        frame: &RenderFrame,
    ) -> DrawOutcome {
        let mut camera = frame.camera.clone();
        camera.set_aspect_ratio(target_size.0, target_size.1);
        queue.write_buffer(&self.vertex_uniforms, 0, bytemuck::bytes_of(&VertexUniforms::new(&camera, frame.settings)));

        let bind_group = if frame.debug.draw_debug {
            frame.debug_texture.map(|texture| {
                queue.write_buffer(&self.debug_uniforms, 0, bytemuck::bytes_of(&DebugUniforms::new(frame.debug, texture.mip_count())));
                let view = texture.view();
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Debug view bind group"),
                    layout: &self.debug_bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: self.vertex_uniforms.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: self.debug_uniforms.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::TextureView(&view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: wgpu::BindingResource::Sampler(&self.nearest_sampler),
                        },
                    ],
                })
            })
        } else {
            frame.active.map(|texture| {
                self.prepare(device, frame.settings.defines());
                let uniforms = FragmentUniforms::new(&camera, frame.settings, (texture.width(), texture.height()));
                queue.write_buffer(&self.fragment_uniforms, 0, bytemuck::bytes_of(&uniforms));
                let height_view = texture.view();
                let albedo_view = match frame.albedo {
                    Some(albedo) => albedo.view(),
                    None => self.white_texture.create_view(&wgpu::TextureViewDescriptor::default()),
                };
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Parallax bind group"),
                    layout: &self.parallax_bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: self.vertex_uniforms.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: self.fragment_uniforms.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::TextureView(&height_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: wgpu::BindingResource::TextureView(&albedo_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
                        },
                    ],
                })
            })
        };

        let depth_view = self.depth_view(device, target_size);
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Parallax render pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Discard,
                }),
                stencil_ops: None,
            }),
            ..Default::default()
        });

        let Some(bind_group) = bind_group else {
            return DrawOutcome::Cleared;
        };
        let (pipeline, outcome) = if frame.debug.draw_debug {
            (&self.debug_pipeline, DrawOutcome::Debug)
        } else {
            match &self.parallax_pipeline {
                Some((pipeline, _)) => (pipeline, DrawOutcome::Parallax),
                None => return DrawOutcome::Cleared,
            }
        };

        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        render_pass.draw(0..QUAD_VERTICES.len() as u32, 0..1);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DebugChannel;
    use crate::texture::read_texture_rgba32f;

    #[test]
    fn test_uniform_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<VertexUniforms>(), 192);
        assert_eq!(std::mem::size_of::<FragmentUniforms>(), 80);
        assert_eq!(std::mem::size_of::<DebugUniforms>(), 16);
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
    }

    #[test]
    fn test_fragment_uniforms() {
        let camera = Camera::default();
        let mut settings = RenderSettings::default();
        settings.step_count = 64;
        settings.display_non_converged = true;

        let uniforms = FragmentUniforms::new(&camera, &settings, (512, 256));
        assert_eq!(uniforms.steps, 64);
        assert_eq!(uniforms.one_over_steps, 1.0 / 64.0);
        assert_eq!(uniforms.hm_res, [512.0, 256.0]);
        assert_eq!(uniforms.hm_res_r, [1.0 / 512.0, 1.0 / 256.0]);
        assert_eq!(uniforms.display_non_converged, 1);
        assert_eq!(uniforms.discard_fragments, 1);
        assert_eq!(uniforms.cam_pos, camera.position.to_array());
    }

    #[test]
    fn test_debug_uniforms_clamp_level() {
        let debug = DebugSettings {
            mip_level: 12,
            channels: [DebugChannel::Y, DebugChannel::Zero, DebugChannel::One],
            ..Default::default()
        };
        let uniforms = DebugUniforms::new(&debug, 5);
        assert_eq!(uniforms.current_level, 4.0);
        assert_eq!(uniforms.channels, [1, 4, 6]);
        assert_eq!(DebugUniforms::new(&debug, 0).current_level, 0.0);
    }

    #[test]
    fn test_quad_faces_up() {
        assert_eq!(QUAD_VERTICES.len(), 4);
        for vertex in QUAD_VERTICES {
            assert_eq!(vertex.position[1], 0.0);
            assert_eq!(vertex.normal, [0.0, 1.0, 0.0]);
            // u follows x and v follows z
            assert_eq!(vertex.tex_coords[0], (vertex.position[0] + 1.0) / 2.0);
            assert_eq!(vertex.tex_coords[1], (vertex.position[2] + 1.0) / 2.0);
        }
    }

    fn render_target(device: &wgpu::Device, size: u32) -> wgpu::Texture {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Test target"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }

    #[test]
    fn test_render_on_device() {
        let Some((device, queue)) = crate::test_device() else {
            return;
        };
        const SIZE: u32 = 32;

        let target = render_target(&device, SIZE);
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let mut renderer = ParallaxRenderer::new(&device, &queue, wgpu::TextureFormat::Rgba8Unorm);

        let heightmap = GpuTexture::create(&device, "Flat", (4, 4), wgpu::TextureFormat::R8Unorm, 1).unwrap();
        queue.write_texture(
            heightmap.texture().as_image_copy(),
            &[128u8; 16],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(4),
            },
            wgpu::Extent3d {
                width: 4,
                height: 4,
                depth_or_array_layers: 1,
            },
        );

        let camera = Camera {
            position: glam::Vec3::new(0.0, 2.0, 0.01),
            target: glam::Vec3::ZERO,
            ..Default::default()
        };
        let mut settings = RenderSettings::default();
        settings.select_parallax_fun(2);
        settings.discard_fragments = false;
        let debug = DebugSettings::default();

        let mut frame = RenderFrame {
            camera: &camera,
            settings: &settings,
            debug: &debug,
            active: None,
            albedo: None,
            debug_texture: None,
        };

        // Without a texture only the white clear remains
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        assert_eq!(renderer.render(&device, &queue, &mut encoder, &view, (SIZE, SIZE), &frame), DrawOutcome::Cleared);
        queue.submit(std::iter::once(encoder.finish()));
        let image = read_texture_rgba32f(&device, &queue, &target, 0).unwrap();
        assert!(image.pixels().all(|pixel| pixel.0 == [1.0; 4]));

        frame.active = Some(&heightmap);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        assert_eq!(renderer.render(&device, &queue, &mut encoder, &view, (SIZE, SIZE), &frame), DrawOutcome::Parallax);
        queue.submit(std::iter::once(encoder.finish()));
        let image = read_texture_rgba32f(&device, &queue, &target, 0).unwrap();
        let center = image.get_pixel(SIZE / 2, SIZE / 2).0;
        assert!(center[0] < 1.0, "quad should cover the center, got {center:?}");

        // Same defines, no rebuild
        assert!(!renderer.prepare(&device, settings.defines()));
        settings.select_refinement_fun(2);
        assert!(renderer.prepare(&device, settings.defines()));
    }
}
