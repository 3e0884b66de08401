//! Reusable compute dispatch helper
//!
//! A [`ComputeProgram`] owns one WGSL compute kernel, the bind group layout it is
//! dispatched with, its override constants and a set of named storage buffers.
//! Changing a constant invalidates the pipeline; it is rebuilt lazily before the
//! next dispatch.

use crate::error::{Error, Result};
use crate::settings::ShaderDefines;
use std::collections::HashMap;
use wgpu::util::DeviceExt;

/// Description of a compute program
#[derive(Debug, Clone)]
pub struct ComputeProgramDesc<'a> {
    /// Debug label of the shader module and pipeline
    pub label: &'a str,
    /// WGSL source
    pub source: &'a str,
    /// Entry point, usually `"main"`
    pub entry_point: &'a str,
    /// Workgroup size declared by the entry point
    pub workgroup_size: [u32; 3],
    /// Bindings of group 0
    pub layout_entries: &'a [wgpu::BindGroupLayoutEntry],
    /// Initial override constants
    pub defines: &'a [(&'a str, f64)],
}

/// A named storage buffer owned by a program
#[derive(Debug)]
struct StructuredBuffer {
    buffer: wgpu::Buffer,
    element_size: u64,
    element_count: u64,
    mapped: bool,
}

/// Tracks CPU mapping of a buffer: one outstanding mapping at a time
fn begin_map(name: &str, mapped: &mut bool) -> Result<()> {
    if *mapped {
        return Err(Error::BufferAlreadyMapped(name.to_string()));
    }
    *mapped = true;
    Ok(())
}

fn end_map(name: &str, mapped: &mut bool) -> Result<()> {
    if !*mapped {
        return Err(Error::BufferNotMapped(name.to_string()));
    }
    *mapped = false;
    Ok(())
}

/// Workgroup counts covering `dimensions` threads with groups of `workgroup_size`
pub fn dispatch_groups(dimensions: [u32; 3], workgroup_size: [u32; 3]) -> [u32; 3] {
    std::array::from_fn(|i| dimensions[i].div_ceil(workgroup_size[i].max(1)))
}

/// Fails when any workgroup count exceeds the per-dimension device limit
pub fn check_dispatch_limit(groups: [u32; 3], limit: u32) -> Result<()> {
    if groups.iter().any(|&count| count > limit) {
        return Err(Error::DispatchLimitExceeded { groups, limit });
    }
    Ok(())
}

/// A compute kernel together with its layout, constants and buffers
#[derive(Debug)]
pub struct ComputeProgram {
    label: String,
    source: String,
    module: wgpu::ShaderModule,
    entry_point: String,
    workgroup_size: [u32; 3],
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    defines: ShaderDefines,
    /// Pipeline and the define revision it was built for
    pipeline: Option<(wgpu::ComputePipeline, u64)>,
    buffers: HashMap<String, StructuredBuffer>,
}

impl ComputeProgram {
    /// Compiles the shader module and creates the bind group layout
    ///
    /// The pipeline itself is built on the first dispatch, once all defines are known.
    pub fn new(device: &wgpu::Device, desc: ComputeProgramDesc) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.source.into()),
        });

        let mut layout_entries = desc.layout_entries.to_vec();
        layout_entries.sort_by_key(|entry| entry.binding);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(desc.label),
            entries: &layout_entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(desc.label),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let mut defines = ShaderDefines::new();
        for &(name, value) in desc.defines {
            defines.set(name, value);
        }

        Self {
            label: desc.label.to_string(),
            source: desc.source.to_string(),
            module,
            entry_point: desc.entry_point.to_string(),
            workgroup_size: desc.workgroup_size.map(|size| size.max(1)),
            bind_group_layout,
            pipeline_layout,
            defines,
            pipeline: None,
            buffers: HashMap::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    pub fn defines(&self) -> &ShaderDefines {
        &self.defines
    }

    /// Updates an override constant; returns whether the program must be rebuilt
    pub fn set_define(&mut self, name: &str, value: impl Into<f64>) -> bool {
        self.defines.set(name, value)
    }

    /// Workgroup counts needed to cover `dimensions` threads
    pub fn dispatch_groups(&self, dimensions: [u32; 3]) -> [u32; 3] {
        dispatch_groups(dimensions, self.workgroup_size)
    }

    /// Returns the pipeline, rebuilding it if the defines changed since the last build
    fn pipeline(&mut self, device: &wgpu::Device) -> wgpu::ComputePipeline {
        let revision = self.defines.revision();
        if let Some((pipeline, built_for)) = &self.pipeline {
            if *built_for == revision {
                return pipeline.clone();
            }
        }

        // Some backends cache compiled programs per module and ignore constants in the key
        if self.pipeline.is_some() {
            self.module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&self.label),
                source: wgpu::ShaderSource::Wgsl(self.source.as_str().into()),
            });
        }

        tracing::debug!(label = %self.label, revision, "building compute pipeline");
        let constants = self.defines.to_constants();
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&self.label),
            layout: Some(&self.pipeline_layout),
            module: &self.module,
            entry_point: Some(&self.entry_point),
            compilation_options: wgpu::PipelineCompilationOptions {
                constants: &constants,
                ..Default::default()
            },
            cache: None,
        });
        self.pipeline = Some((pipeline.clone(), revision));
        pipeline
    }

    /// Allocates (or replaces) a named storage buffer
    ///
    /// # Arguments
    /// * `device` - The wgpu device
    /// * `name` - Name the buffer is looked up by
    /// * `element_size` - Size of one element in bytes
    /// * `element_count` - Number of elements
    /// * `init` - Optional initial contents; must be exactly `element_size * element_count`
    ///   bytes unless empty
    pub fn allocate_structured_buffer(&mut self, device: &wgpu::Device, name: &str, element_size: u64, element_count: u64, init: Option<&[u8]>) -> Result<wgpu::Buffer> {
        let size = element_size * element_count;
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        let label = format!("{} {name}", self.label);

        let buffer = match init {
            Some(data) if !data.is_empty() => {
                if data.len() as u64 != size {
                    return Err(Error::InitDataSizeMismatch {
                        name: name.to_string(),
                        expected: size,
                        actual: data.len() as u64,
                    });
                }
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&label),
                    contents: data,
                    usage,
                })
            }
            _ => device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&label),
                size,
                usage,
                mapped_at_creation: false,
            }),
        };

        self.buffers.insert(
            name.to_string(),
            StructuredBuffer {
                buffer: buffer.clone(),
                element_size,
                element_count,
                mapped: false,
            },
        );
        Ok(buffer)
    }

    /// Looks up a named buffer
    pub fn buffer(&self, name: &str) -> Result<&wgpu::Buffer> {
        self.buffers.get(name).map(|entry| &entry.buffer).ok_or_else(|| Error::BufferNotFound(name.to_string()))
    }

    /// Element size and count of a named buffer
    pub fn buffer_shape(&self, name: &str) -> Result<(u64, u64)> {
        self.buffers
            .get(name)
            .map(|entry| (entry.element_size, entry.element_count))
            .ok_or_else(|| Error::BufferNotFound(name.to_string()))
    }

    /// Maps a named buffer for reading and returns its contents
    ///
    /// The buffer stays marked as mapped until [`ComputeProgram::unmap_buffer`] is called.
    pub fn map_buffer(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, name: &str) -> Result<Vec<u8>> {
        let entry = self.buffers.get_mut(name).ok_or_else(|| Error::BufferNotFound(name.to_string()))?;
        begin_map(name, &mut entry.mapped)?;

        let size = entry.buffer.size();
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Structured Buffer Readback"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Structured Buffer Readback") });
        encoder.copy_buffer_to_buffer(&entry.buffer, 0, &staging, 0, size);
        queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = sender.send(v);
        });

        let mapped = device
            .poll(wgpu::PollType::Wait)
            .map_err(Error::from)
            .and_then(|_| pollster::block_on(receiver.receive()).ok_or(Error::MapCancelled)?.map_err(Error::from));
        if let Err(err) = mapped {
            entry.mapped = false;
            return Err(err);
        }

        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }

    /// Releases the mapping taken by [`ComputeProgram::map_buffer`]
    pub fn unmap_buffer(&mut self, name: &str) -> Result<()> {
        let entry = self.buffers.get_mut(name).ok_or_else(|| Error::BufferNotFound(name.to_string()))?;
        end_map(name, &mut entry.mapped)
    }

    /// Creates a uniform buffer holding `value`
    pub fn create_uniform<T: bytemuck::Pod>(&self, device: &wgpu::Device, value: &T) -> wgpu::Buffer {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} uniforms", self.label)),
            contents: bytemuck::bytes_of(value),
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }

    /// Records one dispatch covering `dimensions` threads
    ///
    /// The workgroup counts are checked against the device limit before anything
    /// is recorded.
    ///
    /// # Arguments
    /// * `device` - The wgpu device
    /// * `encoder` - Command encoder the compute pass is recorded into
    /// * `entries` - Resources of group 0
    /// * `dimensions` - Number of threads per dimension
    pub fn run(&mut self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder, entries: &[wgpu::BindGroupEntry], dimensions: [u32; 3]) -> Result<()> {
        let groups = self.dispatch_groups(dimensions);
        check_dispatch_limit(groups, device.limits().max_compute_workgroups_per_dimension)?;

        let pipeline = self.pipeline(device);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&self.label),
            layout: &self.bind_group_layout,
            entries,
        });

        tracing::debug!(label = %self.label, ?groups, "dispatch");

        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(&self.label),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&pipeline);
        compute_pass.set_bind_group(0, &bind_group, &[]);
        compute_pass.dispatch_workgroups(groups[0], groups[1], groups[2]);

        Ok(())
    }
}

/// Layout entry of a uniform buffer visible to compute
pub fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Layout entry of a read-write storage buffer visible to compute
pub fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Layout entry of a non-filterable float texture read with `textureLoad`
pub fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_groups_rounds_up() {
        assert_eq!(dispatch_groups([512, 512, 1], [8, 8, 1]), [64, 64, 1]);
        assert_eq!(dispatch_groups([513, 7, 1], [8, 8, 1]), [65, 1, 1]);
        assert_eq!(dispatch_groups([0, 1, 1], [8, 8, 1]), [0, 1, 1]);
        // A zero workgroup size is treated as one
        assert_eq!(dispatch_groups([5, 5, 5], [0, 1, 1]), [5, 5, 5]);
    }

    #[test]
    fn test_dispatch_limit() {
        assert!(check_dispatch_limit([65535, 1, 1], 65535).is_ok());
        let err = check_dispatch_limit([1, 65536, 1], 65535).unwrap_err();
        assert!(matches!(err, Error::DispatchLimitExceeded { groups: [1, 65536, 1], limit: 65535 }));
    }

    #[test]
    fn test_map_state_machine() {
        let mut mapped = false;
        assert!(matches!(end_map("buf", &mut mapped), Err(Error::BufferNotMapped(name)) if name == "buf"));
        assert!(begin_map("buf", &mut mapped).is_ok());
        assert!(matches!(begin_map("buf", &mut mapped), Err(Error::BufferAlreadyMapped(_))));
        assert!(end_map("buf", &mut mapped).is_ok());
        assert!(!mapped);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(Error::BufferNotFound("weights".into()).to_string(), "weights: couldn't find buffer to map");
        assert_eq!(Error::BufferAlreadyMapped("weights".into()).to_string(), "weights: buffer already mapped");
        assert_eq!(Error::BufferNotMapped("weights".into()).to_string(), "weights: buffer not mapped");
    }

    const FILL_SHADER: &str = r#"
override FILL_VALUE: u32 = 1u;
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64, 1, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if id.x < arrayLength(&data) {
        data[id.x] = FILL_VALUE + id.x;
    }
}
"#;

    #[test]
    fn test_program_on_device() {
        let Some((device, queue)) = crate::test_device() else {
            return;
        };

        let layout = [storage_entry(0)];
        let mut program = ComputeProgram::new(
            &device,
            ComputeProgramDesc {
                label: "Fill",
                source: FILL_SHADER,
                entry_point: "main",
                workgroup_size: [64, 1, 1],
                layout_entries: &layout,
                defines: &[("FILL_VALUE", 10.0)],
            },
        );

        assert!(matches!(
            program.allocate_structured_buffer(&device, "data", 4, 100, Some(&[0u8; 12])),
            Err(Error::InitDataSizeMismatch { expected: 400, actual: 12, .. })
        ));
        let buffer = program.allocate_structured_buffer(&device, "data", 4, 100, None).unwrap();
        assert_eq!(program.buffer_shape("data").unwrap(), (4, 100));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        program
            .run(
                &device,
                &mut encoder,
                &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
                [100, 1, 1],
            )
            .unwrap();
        queue.submit(std::iter::once(encoder.finish()));

        let bytes = program.map_buffer(&device, &queue, "data").unwrap();
        let values: &[u32] = bytemuck::cast_slice(&bytes);
        assert_eq!(values[0], 10);
        assert_eq!(values[99], 109);

        assert!(matches!(program.map_buffer(&device, &queue, "data"), Err(Error::BufferAlreadyMapped(_))));
        program.unmap_buffer("data").unwrap();
        assert!(matches!(program.unmap_buffer("data"), Err(Error::BufferNotMapped(_))));
        assert!(matches!(program.unmap_buffer("missing"), Err(Error::BufferNotFound(_))));

        assert!(program.set_define("FILL_VALUE", 20u32));
        assert!(!program.set_define("FILL_VALUE", 20u32));
    }

    #[test]
    fn test_changed_define_applies_to_next_dispatch() {
        let Some((device, queue)) = crate::test_device() else {
            return;
        };

        let layout = [storage_entry(0)];
        let mut program = ComputeProgram::new(
            &device,
            ComputeProgramDesc {
                label: "Fill",
                source: FILL_SHADER,
                entry_point: "main",
                workgroup_size: [64, 1, 1],
                layout_entries: &layout,
                defines: &[("FILL_VALUE", 10.0)],
            },
        );
        let buffer = program.allocate_structured_buffer(&device, "data", 4, 4, None).unwrap();

        for value in [10u32, 20, 30] {
            program.set_define("FILL_VALUE", value);
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
            program
                .run(
                    &device,
                    &mut encoder,
                    &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    }],
                    [4, 1, 1],
                )
                .unwrap();
            queue.submit(std::iter::once(encoder.finish()));

            let bytes = program.map_buffer(&device, &queue, "data").unwrap();
            let values: &[u32] = bytemuck::cast_slice(&bytes);
            assert_eq!(values, [value, value + 1, value + 2, value + 3]);
            program.unmap_buffer("data").unwrap();
        }
    }
}
