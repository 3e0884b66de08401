//! Visibility buffer raster pass
//!
//! Rasterizes a triangle-list scene into a depth buffer and a packed visibility
//! buffer: instance id, primitive index and the two barycentric weights of the
//! visible triangle per pixel. Motion vectors are written when the caller
//! provides a target for them.
//!
//! Barycentrics are produced by vertex pulling, so the pass needs storage
//! buffers in the vertex stage and `Rgba32Uint` render attachments. Both are
//! checked once at construction.

use crate::camera::Camera;
use crate::error::{Error, Result};
use crate::texture::GpuTexture;
use glam::Mat4;
use wgpu::util::DeviceExt;

/// Format of the packed visibility buffer
pub const VBUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Uint;
/// Format of the optional motion vector channel
pub const MOTION_VECTOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg32Float;
/// Format of the depth-stencil target
pub const VBUFFER_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

const ALPHA_TEST_DEFINE: &str = "ALPHA_TEST";

/// What the device offers that the pass depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub downlevel: wgpu::DownlevelFlags,
    /// Allowed usages of [`VBUFFER_FORMAT`]
    pub vbuffer_usages: wgpu::TextureUsages,
}

impl DeviceCapabilities {
    pub fn from_adapter(adapter: &wgpu::Adapter) -> Self {
        Self {
            downlevel: adapter.get_downlevel_capabilities().flags,
            vbuffer_usages: adapter.get_texture_format_features(VBUFFER_FORMAT).allowed_usages,
        }
    }

    /// Fails with the first missing capability
    pub fn check(&self) -> Result<()> {
        if !self.downlevel.contains(wgpu::DownlevelFlags::VERTEX_STORAGE) {
            return Err(Error::MissingDownlevelCapability("VERTEX_STORAGE"));
        }
        if !self.vbuffer_usages.contains(wgpu::TextureUsages::RENDER_ATTACHMENT) {
            return Err(Error::UnsupportedFeature("Rgba32Uint render attachment"));
        }
        Ok(())
    }
}

/// Face culling of the raster pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

impl CullMode {
    fn face(self) -> Option<wgpu::Face> {
        match self {
            CullMode::None => None,
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::Back => Some(wgpu::Face::Back),
        }
    }
}

/// Options of the raster pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VBufferOptions {
    /// Cull mode to force; back faces are culled otherwise
    pub cull_override: Option<CullMode>,
    /// Discard fragments whose alpha mask is below 0.5
    pub alpha_test: bool,
}

impl VBufferOptions {
    /// The cull mode a draw uses
    pub fn cull_mode(&self) -> CullMode {
        self.cull_override.unwrap_or(CullMode::Back)
    }
}

/// Geometry vertex as pulled by the vertex shader
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct SceneVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
}

/// Per-instance transforms of the current and the previous frame
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct SceneInstance {
    transform: [[f32; 4]; 4],
    prev_transform: [[f32; 4]; 4],
}

impl SceneInstance {
    pub fn new(transform: Mat4, prev_transform: Mat4) -> Self {
        Self {
            transform: transform.to_cols_array_2d(),
            prev_transform: prev_transform.to_cols_array_2d(),
        }
    }

    /// An instance that didn't move since the last frame
    pub fn fixed(transform: Mat4) -> Self {
        Self::new(transform, transform)
    }
}

/// Scene data uploaded for the raster pass
#[derive(Debug, Clone)]
pub struct SceneDesc<'a> {
    pub topology: wgpu::PrimitiveTopology,
    pub vertices: &'a [SceneVertex],
    pub indices: &'a [u32],
    pub instances: &'a [SceneInstance],
    /// Alpha mask sampled at the vertex texture coordinates
    pub alpha_mask: Option<GpuTexture>,
}

/// Scene geometry in GPU buffers
#[derive(Debug, Clone)]
pub struct Scene {
    topology: wgpu::PrimitiveTopology,
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    instances: wgpu::Buffer,
    index_count: u32,
    instance_count: u32,
    alpha_mask: Option<GpuTexture>,
}

fn storage_buffer(device: &wgpu::Device, label: &str, contents: &[u8]) -> wgpu::Buffer {
    // Zero-sized bindings are invalid, keep at least one word
    let contents = if contents.is_empty() { &[0u8; 4][..] } else { contents };
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents,
        usage: wgpu::BufferUsages::STORAGE,
    })
}

impl Scene {
    pub fn new(device: &wgpu::Device, desc: SceneDesc) -> Self {
        Self {
            topology: desc.topology,
            vertices: storage_buffer(device, "Scene vertices", bytemuck::cast_slice(desc.vertices)),
            indices: storage_buffer(device, "Scene indices", bytemuck::cast_slice(desc.indices)),
            instances: storage_buffer(device, "Scene instances", bytemuck::cast_slice(desc.instances)),
            // Only whole triangles are drawn
            index_count: desc.indices.len() as u32 / 3 * 3,
            instance_count: desc.instances.len() as u32,
            alpha_mask: desc.alpha_mask,
        }
    }

    pub fn topology(&self) -> wgpu::PrimitiveTopology {
        self.topology
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn alpha_mask(&self) -> Option<&GpuTexture> {
        self.alpha_mask.as_ref()
    }
}

/// Accepts only triangle lists
pub fn check_topology(topology: wgpu::PrimitiveTopology) -> Result<()> {
    match topology {
        wgpu::PrimitiveTopology::TriangleList => Ok(()),
        other => Err(Error::UnsupportedTopology(other)),
    }
}

/// Decoded texel of the visibility buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VBufferHit {
    pub instance_id: u32,
    pub primitive_index: u32,
    /// Weights of the second and third triangle corner
    pub barycentrics: [f32; 2],
}

impl VBufferHit {
    /// Packs the hit the way the raster shader does
    pub fn pack(&self) -> [u32; 4] {
        [self.instance_id + 1, self.primitive_index, self.barycentrics[0].to_bits(), self.barycentrics[1].to_bits()]
    }

    /// Returns `None` for cleared texels
    pub fn unpack(texel: [u32; 4]) -> Option<Self> {
        let instance = texel[0].checked_sub(1)?;
        Some(Self {
            instance_id: instance,
            primitive_index: texel[1],
            barycentrics: [f32::from_bits(texel[2]), f32::from_bits(texel[3])],
        })
    }
}

/// Render targets of one frame
#[derive(Debug, Clone, Copy)]
pub struct VBufferOutputs<'a> {
    /// [`VBUFFER_DEPTH_FORMAT`]
    pub depth: &'a wgpu::TextureView,
    /// [`VBUFFER_FORMAT`]
    pub vbuffer: &'a wgpu::TextureView,
    /// [`MOTION_VECTOR_FORMAT`], optional
    pub motion_vectors: Option<&'a wgpu::TextureView>,
}

#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct FrameUniforms {
    view_proj: [[f32; 4]; 4],
    prev_view_proj: [[f32; 4]; 4],
}

/// Everything the shader permutation depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PermutationKey {
    alpha_test: bool,
    motion_vectors: bool,
    cull_mode: CullMode,
}

/// The visibility buffer raster pass
pub struct VBufferRaster {
    options: VBufferOptions,
    scene: Option<Scene>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    module: wgpu::ShaderModule,
    pipeline: Option<(PermutationKey, wgpu::RenderPipeline)>,
    frame_uniforms: wgpu::Buffer,
    mask_sampler: wgpu::Sampler,
    /// Bound while alpha testing is off or the scene has no mask
    opaque_mask: wgpu::Texture,
    prev_view_proj: Option<Mat4>,
}

fn buffer_layout_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
        binding,
        visibility: wgpu::ShaderStages::VERTEX,
    }
}

impl VBufferRaster {
    /// Creates the pass
    ///
    /// # Arguments
    /// * `device` - The wgpu device
    /// * `queue` - The wgpu command queue
    /// * `capabilities` - Capabilities of the adapter `device` was created from
    /// * `options` - Cull mode and alpha test
    ///
    /// # Returns
    /// `MissingDownlevelCapability` or `UnsupportedFeature` when the device can't run the pass
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, capabilities: &DeviceCapabilities, options: VBufferOptions) -> Result<Self> {
        capabilities.check()?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("VBuffer bind group layout"),
            entries: &[
                buffer_layout_entry(0, wgpu::BufferBindingType::Uniform),
                buffer_layout_entry(1, wgpu::BufferBindingType::Storage { read_only: true }),
                buffer_layout_entry(2, wgpu::BufferBindingType::Storage { read_only: true }),
                buffer_layout_entry(3, wgpu::BufferBindingType::Storage { read_only: true }),
                wgpu::BindGroupLayoutEntry {
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                },
                wgpu::BindGroupLayoutEntry {
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                    binding: 5,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("VBuffer pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("VBuffer shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/vbuffer.wgsl").into()),
        });

        let frame_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("VBuffer frame uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mask_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Alpha mask sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let opaque_mask = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some("Opaque alpha mask"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255u8; 4],
        );

        Ok(Self {
            options,
            scene: None,
            bind_group_layout,
            pipeline_layout,
            module,
            pipeline: None,
            frame_uniforms,
            mask_sampler,
            opaque_mask,
            prev_view_proj: None,
        })
    }

    pub fn options(&self) -> VBufferOptions {
        self.options
    }

    /// Forces a cull mode, or restores back-face culling with `None`
    pub fn set_cull_override(&mut self, cull_mode: Option<CullMode>) {
        self.options.cull_override = cull_mode;
    }

    pub fn set_alpha_test(&mut self, enabled: bool) {
        self.options.alpha_test = enabled;
    }

    /// Binds a scene, or unbinds with `None`
    ///
    /// Fails with `UnsupportedTopology` unless the scene is a triangle list; the
    /// previously bound scene stays bound in that case.
    pub fn set_scene(&mut self, scene: Option<Scene>) -> Result<()> {
        if let Some(scene) = &scene {
            check_topology(scene.topology())?;
        }
        self.scene = scene;
        self.prev_view_proj = None;
        Ok(())
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    fn permutation_key(&self, motion_vectors: bool) -> PermutationKey {
        PermutationKey {
            alpha_test: self.options.alpha_test && self.scene.as_ref().is_some_and(|scene| scene.alpha_mask.is_some()),
            motion_vectors,
            cull_mode: self.options.cull_mode(),
        }
    }

    /// Rebuilds the pipeline when the permutation changed
    fn prepare(&mut self, device: &wgpu::Device, key: PermutationKey) {
        if self.pipeline.as_ref().is_some_and(|(built, _)| *built == key) {
            return;
        }
        tracing::debug!(?key, "building vbuffer pipeline");

        let constants = [(ALPHA_TEST_DEFINE, f64::from(u32::from(key.alpha_test)))];
        let compilation_options = wgpu::PipelineCompilationOptions {
            constants: &constants,
            ..Default::default()
        };
        let vbuffer_target = Some(wgpu::ColorTargetState {
            format: VBUFFER_FORMAT,
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        });
        let motion_target = Some(wgpu::ColorTargetState {
            format: MOTION_VECTOR_FORMAT,
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        });
        let (entry_point, targets) = if key.motion_vectors {
            ("fs_main_motion", vec![vbuffer_target, motion_target])
        } else {
            ("fs_main", vec![vbuffer_target])
        };

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("VBuffer raster pipeline"),
            layout: Some(&self.pipeline_layout),
            cache: None,
            vertex: wgpu::VertexState {
                module: &self.module,
                buffers: &[],
                compilation_options: compilation_options.clone(),
                entry_point: Some("vs_main"),
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.module,
                targets: &targets,
                compilation_options,
                entry_point: Some(entry_point),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                cull_mode: key.cull_mode.face(),
                front_face: wgpu::FrontFace::Ccw,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
                unclipped_depth: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: VBUFFER_DEPTH_FORMAT,
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
        });
        self.pipeline = Some((key, pipeline));
    }

    /// Records the pass into `encoder`
    ///
    /// Clears depth to 1.0, stencil to 0 and every color output to zero. With a
    /// scene bound, one instanced draw follows.
    ///
    /// # Arguments
    /// * `device` - The wgpu device
    /// * `queue` - The wgpu command queue, used for uniform uploads
    /// * `encoder` - Command encoder to record into
    /// * `outputs` - Targets of this frame, all of size `frame_dim`
    /// * `frame_dim` - Width and height of the targets
    /// * `camera` - Camera of this frame
    pub fn execute(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        outputs: &VBufferOutputs,
        frame_dim: (u32, u32),
        camera: &Camera,
    ) -> Result<()> {
        if frame_dim.0 == 0 || frame_dim.1 == 0 {
            return Err(Error::InvalidTextureSize {
                width: frame_dim.0,
                height: frame_dim.1,
            });
        }

        let mut camera = camera.clone();
        camera.set_aspect_ratio(frame_dim.0, frame_dim.1);
        let view_proj = camera.view_proj();
        let prev_view_proj = self.prev_view_proj.replace(view_proj).unwrap_or(view_proj);

        let draw = self.scene.as_ref().is_some_and(|scene| scene.index_count > 0 && scene.instance_count > 0);
        if draw {
            let key = self.permutation_key(outputs.motion_vectors.is_some());
            self.prepare(device, key);
            queue.write_buffer(
                &self.frame_uniforms,
                0,
                bytemuck::bytes_of(&FrameUniforms {
                    view_proj: view_proj.to_cols_array_2d(),
                    prev_view_proj: prev_view_proj.to_cols_array_2d(),
                }),
            );
        }

        let clear = wgpu::Operations {
            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            store: wgpu::StoreOp::Store,
        };
        let mut color_attachments = vec![Some(wgpu::RenderPassColorAttachment {
            view: outputs.vbuffer,
            resolve_target: None,
            ops: clear,
        })];
        if let Some(motion_vectors) = outputs.motion_vectors {
            color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                view: motion_vectors,
                resolve_target: None,
                ops: clear,
            }));
        }

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("VBuffer raster pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: outputs.depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(0),
                    store: wgpu::StoreOp::Store,
                }),
            }),
            ..Default::default()
        });

        if !draw {
            return Ok(());
        }
        let (Some(scene), Some((_, pipeline))) = (&self.scene, &self.pipeline) else {
            return Ok(());
        };

        let mask_view = match (&scene.alpha_mask, self.options.alpha_test) {
            (Some(mask), true) => mask.view(),
            _ => self.opaque_mask.create_view(&wgpu::TextureViewDescriptor::default()),
        };
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("VBuffer bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.frame_uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: scene.vertices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: scene.indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: scene.instances.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(&mask_view),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::Sampler(&self.mask_sampler),
                },
            ],
        });

        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.draw(0..scene.index_count, 0..scene.instance_count);
        tracing::trace!(triangles = scene.index_count / 3, instances = scene.instance_count, "vbuffer draw");
        Ok(())
    }
}
