//! wgpu implementation of the derivation stages
//!
//! Every kernel shares the packed-word output of `packing.wgsl`: it computes one
//! texel value per coordinate, the words are written to a storage buffer, and the
//! buffer is copied into the destination mip level. Each stage records into its
//! own encoder and submits once all dispatches were recorded, so a failing
//! dispatch leaves nothing half-written.

use super::{ConemapSettings, MINMAX_TEXTURE_NAME, PROCEDURAL_HEIGHTMAP_NAME, ProceduralHeightmapSettings, QuickConemapSettings, StageExecutor};
use crate::compute_program::{ComputeProgram, ComputeProgramDesc, storage_entry, texture_entry, uniform_entry};
use crate::error::{Error, Result};
use crate::texture::{GpuTexture, HeightPrecision, PackedTexelLayout, TextureInfo, mip_level_count};

/// Compute shader workgroup size in X dimension
const COMPUTE_WORKGROUP_SIZE_X: u32 = 8;
/// Compute shader workgroup size in Y dimension
const COMPUTE_WORKGROUP_SIZE_Y: u32 = 8;
const WORKGROUP_SIZE: [u32; 3] = [COMPUTE_WORKGROUP_SIZE_X, COMPUTE_WORKGROUP_SIZE_Y, 1];

const PROCEDURAL_HEIGHTMAP_SHADER: &str = concat!(include_str!("../shaders/packing.wgsl"), include_str!("../shaders/procedural_heightmap.wgsl"));
const CONEMAP_SHADER: &str = concat!(include_str!("../shaders/packing.wgsl"), include_str!("../shaders/conemap.wgsl"));
const MINMAX_SHADER: &str = concat!(include_str!("../shaders/packing.wgsl"), include_str!("../shaders/minmax.wgsl"));
const QUICK_CONEMAP_SHADER: &str = concat!(include_str!("../shaders/packing.wgsl"), include_str!("../shaders/quick_conemap.wgsl"));

/// Name of the packed output buffer of every program
const PACKED_BUFFER: &str = "packed";

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
struct HeightmapParams {
    size: [u32; 2],
    _padding: [u32; 2],
    int_params: [i32; 4],
    float_params: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
struct ConemapParams {
    search_steps: u32,
    one_over_search_steps: f32,
    _padding: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
struct QuickConemapParams {
    max_level: u32,
    _padding: u32,
    delta_half: [f32; 2],
}

/// Highest pyramid level the quick cone map visits
///
/// The level below the 1x1 top still has at least two texels along its longest
/// side; pyramids of a single level use level 0.
pub fn quick_conemap_max_level(mip_count: u32) -> u32 {
    mip_count.saturating_sub(2)
}

/// Runs the derivation kernels on a wgpu device
#[derive(Debug)]
pub struct GpuStages {
    device: wgpu::Device,
    queue: wgpu::Queue,
    procedural: ComputeProgram,
    conemap: ComputeProgram,
    minmax_copy: ComputeProgram,
    minmax_mipmap: ComputeProgram,
    quick_conemap: ComputeProgram,
}

impl GpuStages {
    /// Creates all derivation programs on `device`
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let packed_entries = [uniform_entry(0), storage_entry(1)];
        let with = |extra: &[wgpu::BindGroupLayoutEntry]| packed_entries.iter().chain(extra).copied().collect::<Vec<_>>();

        let program = |label: &str, source: &str, layout: &[wgpu::BindGroupLayoutEntry], defines: &[(&str, f64)]| {
            ComputeProgram::new(
                device,
                ComputeProgramDesc {
                    label,
                    source,
                    entry_point: "main",
                    workgroup_size: WORKGROUP_SIZE,
                    layout_entries: layout,
                    defines,
                },
            )
        };

        Self {
            device: device.clone(),
            queue: queue.clone(),
            procedural: program("Procedural Heightmap", PROCEDURAL_HEIGHTMAP_SHADER, &with(&[uniform_entry(2)]), &[("HEIGHT_FUN", 0.0)]),
            conemap: program("Conemap", CONEMAP_SHADER, &with(&[texture_entry(2), uniform_entry(3)]), &[("CONE_TYPE", 1.0)]),
            minmax_copy: program("Minmax Copy", MINMAX_SHADER, &with(&[texture_entry(2)]), &[("MINMAX_PASS", 0.0)]),
            minmax_mipmap: program("Minmax Mipmap", MINMAX_SHADER, &with(&[texture_entry(2)]), &[("MINMAX_PASS", 1.0)]),
            quick_conemap: program(
                "Quick Conemap",
                QUICK_CONEMAP_SHADER,
                &with(&[texture_entry(2), uniform_entry(3)]),
                &[("QUICK_GEN_ALG", 2.0), ("MAX_AT_TEXEL_CENTER", 0.0)],
            ),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn check_precision(&self, precision: HeightPrecision) -> Result<()> {
        precision.check_supported(self.device.features())
    }

    /// RG16 pyramid when the device has 16-bit normalized textures, RG8 otherwise
    pub fn pyramid_precision(&self) -> HeightPrecision {
        if HeightPrecision::Unorm16.check_supported(self.device.features()).is_ok() {
            HeightPrecision::Unorm16
        } else {
            HeightPrecision::Unorm8
        }
    }

    fn create_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}

/// Records one packed-output dispatch into `target` at `mip_level`, followed by the copy
///
/// # Arguments
/// * `device` - The wgpu device
/// * `encoder` - Encoder receiving the dispatch and the copy
/// * `program` - Program whose kernel includes the packing entry point
/// * `target` - Destination texture, one of the packable normalized formats
/// * `mip_level` - Destination mip level
/// * `inputs` - Bindings from 2 upward
fn run_packed(device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder, program: &mut ComputeProgram, target: &GpuTexture, mip_level: u32, inputs: &[wgpu::BindGroupEntry]) -> Result<()> {
    let size = target.texture().size().mip_level_size(mip_level, wgpu::TextureDimension::D2);
    let layout = PackedTexelLayout::for_format(target.format(), size.width, size.height)?;

    let packed = program.allocate_structured_buffer(device, PACKED_BUFFER, 4, layout.buffer_size() / 4, None)?;
    let uniform = program.create_uniform(device, &layout.uniform());

    let mut entries = vec![
        wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform.as_entire_binding(),
        },
        wgpu::BindGroupEntry {
            binding: 1,
            resource: packed.as_entire_binding(),
        },
    ];
    entries.extend_from_slice(inputs);

    program.run(device, encoder, &entries, [layout.words_per_texel_row(), layout.height, 1])?;
    layout.copy_to_texture(encoder, &packed, target.texture(), mip_level);
    Ok(())
}

impl StageExecutor for GpuStages {
    type Texture = GpuTexture;

    fn info(&self, texture: &GpuTexture) -> TextureInfo {
        texture.info()
    }

    fn procedural_heightmap(&mut self, settings: &ProceduralHeightmapSettings) -> Result<GpuTexture> {
        self.check_precision(settings.precision)?;
        let [width, height] = settings.size;
        if width == 0 || height == 0 {
            return Err(Error::InvalidTextureSize { width, height });
        }

        let texture = GpuTexture::create(&self.device, PROCEDURAL_HEIGHTMAP_NAME, (width, height), settings.precision.single_channel_format(), 1)?;
        self.procedural.set_define("HEIGHT_FUN", settings.height_function.index());
        let params = self.procedural.create_uniform(
            &self.device,
            &HeightmapParams {
                size: settings.size,
                _padding: [0; 2],
                int_params: settings.int_params,
                float_params: settings.float_params,
            },
        );

        let mut encoder = self.create_encoder("Procedural Heightmap");
        run_packed(
            &self.device,
            &mut encoder,
            &mut self.procedural,
            &texture,
            0,
            &[wgpu::BindGroupEntry {
                binding: 2,
                resource: params.as_entire_binding(),
            }],
        )?;
        self.queue.submit(std::iter::once(encoder.finish()));

        tracing::info!(name = texture.name(), width, height, format = ?texture.format(), function = settings.height_function.name(), "generated procedural heightmap");
        Ok(texture)
    }

    fn conemap(&mut self, settings: &ConemapSettings, heightmap: Option<&GpuTexture>) -> Result<Option<GpuTexture>> {
        let Some(heightmap) = heightmap else {
            tracing::warn!("no heightmap, skipping conemap generation");
            return Ok(None);
        };
        self.check_precision(settings.precision)?;

        let name = if settings.name.is_empty() { settings.algorithm.name() } else { settings.name.as_str() };
        let texture = GpuTexture::create(&self.device, name, (heightmap.width(), heightmap.height()), settings.precision.dual_channel_format(), 1)?;

        self.conemap.set_define("CONE_TYPE", settings.algorithm.define_value());
        let steps = settings.search_steps();
        let params = self.conemap.create_uniform(
            &self.device,
            &ConemapParams {
                search_steps: steps,
                one_over_search_steps: 1.0 / steps as f32,
                _padding: [0; 2],
            },
        );
        let source = heightmap.mip_view(0);

        let mut encoder = self.create_encoder("Conemap");
        run_packed(
            &self.device,
            &mut encoder,
            &mut self.conemap,
            &texture,
            0,
            &[
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&source),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.as_entire_binding(),
                },
            ],
        )?;
        self.queue.submit(std::iter::once(encoder.finish()));

        tracing::info!(name = texture.name(), width = texture.width(), height = texture.height(), format = ?texture.format(), "generated conemap");
        Ok(Some(texture))
    }

    fn minmax_pyramid(&mut self, heightmap: Option<&GpuTexture>) -> Result<Option<GpuTexture>> {
        let Some(heightmap) = heightmap else {
            tracing::warn!("no heightmap, skipping min/max pyramid generation");
            return Ok(None);
        };
        let precision = self.pyramid_precision();

        let (width, height) = (heightmap.width(), heightmap.height());
        let mip_count = mip_level_count(width, height);
        let texture = GpuTexture::create(&self.device, MINMAX_TEXTURE_NAME, (width, height), precision.dual_channel_format(), mip_count)?;

        let mut encoder = self.create_encoder("Min/Max Pyramid");

        // Level 0: (min, max) = (h, h)
        let source = heightmap.mip_view(0);
        run_packed(
            &self.device,
            &mut encoder,
            &mut self.minmax_copy,
            &texture,
            0,
            &[wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(&source),
            }],
        )?;

        // Remaining levels, strictly in order
        for level in 0..mip_count - 1 {
            let source = texture.mip_view(level);
            run_packed(
                &self.device,
                &mut encoder,
                &mut self.minmax_mipmap,
                &texture,
                level + 1,
                &[wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&source),
                }],
            )?;
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        tracing::info!(name = texture.name(), width, height, mip_count, "generated min/max pyramid");
        Ok(Some(texture))
    }

    fn quick_conemap(&mut self, settings: &QuickConemapSettings, minmax: Option<&GpuTexture>) -> Result<Option<GpuTexture>> {
        let Some(minmax) = minmax else {
            tracing::warn!("no min/max pyramid, skipping quick conemap generation");
            return Ok(None);
        };
        self.check_precision(settings.precision)?;

        let (width, height) = (minmax.width(), minmax.height());
        let name = if settings.name.is_empty() { settings.display_name() } else { settings.name.clone() };
        let texture = GpuTexture::create(&self.device, &name, (width, height), settings.precision.dual_channel_format(), 1)?;

        self.quick_conemap.set_define("QUICK_GEN_ALG", settings.algorithm.define_value());
        self.quick_conemap.set_define("MAX_AT_TEXEL_CENTER", u32::from(settings.max_at_texel_center));
        let params = self.quick_conemap.create_uniform(
            &self.device,
            &QuickConemapParams {
                max_level: quick_conemap_max_level(minmax.mip_count()),
                _padding: 0,
                delta_half: [0.5 / width as f32, 0.5 / height as f32],
            },
        );
        let pyramid = minmax.view();

        let mut encoder = self.create_encoder("Quick Conemap");
        run_packed(
            &self.device,
            &mut encoder,
            &mut self.quick_conemap,
            &texture,
            0,
            &[
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&pyramid),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.as_entire_binding(),
                },
            ],
        )?;
        self.queue.submit(std::iter::once(encoder.finish()));

        tracing::info!(name = texture.name(), width, height, format = ?texture.format(), "generated quick conemap");
        Ok(Some(texture))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{ConeAlgorithm, HeightFunction, QuickConeAlgorithm};
    use crate::texture::read_texture_rgba32f;

    /// Uploads an R8 heightmap
    fn upload_heightmap(device: &wgpu::Device, queue: &wgpu::Queue, width: u32, height: u32, data: &[u8]) -> GpuTexture {
        let texture = GpuTexture::create(device, "test heightmap", (width, height), wgpu::TextureFormat::R8Unorm, 1).unwrap();
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: texture.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        texture
    }

    /// Pseudo-random bumpy heights
    fn test_heights(width: u32, height: u32) -> Vec<u8> {
        (0..width * height).map(|i| (i.wrapping_mul(2654435761u32) >> 24) as u8 / 2 + ((i % width) * 4) as u8).collect()
    }

    /// Brute-force standard cone ratio of every texel
    fn reference_cone_ratios(width: u32, height: u32, data: &[u8]) -> Vec<f32> {
        let h = |x: u32, y: u32| data[(y * width + x) as usize] as f32 / 255.0;
        let mut ratios = Vec::new();
        for py in 0..height {
            for px in 0..width {
                let mut ratio = 1.0f32;
                for qy in 0..height {
                    for qx in 0..width {
                        let dh = h(qx, qy) - h(px, py);
                        if dh > 0.0 {
                            let dx = (qx as f32 - px as f32) / width as f32;
                            let dy = (qy as f32 - py as f32) / height as f32;
                            ratio = ratio.min((dx * dx + dy * dy).sqrt() / dh);
                        }
                    }
                }
                ratios.push(ratio);
            }
        }
        ratios
    }

    #[test]
    fn test_kernels_validate() {
        for (name, source) in [
            ("procedural heightmap", PROCEDURAL_HEIGHTMAP_SHADER),
            ("conemap", CONEMAP_SHADER),
            ("minmax", MINMAX_SHADER),
            ("quick conemap", QUICK_CONEMAP_SHADER),
        ] {
            if let Err(err) = crate::validate_wgsl(source) {
                panic!("{name} kernel failed validation:\n{err}");
            }
        }
    }

    #[test]
    fn test_quick_conemap_max_level() {
        assert_eq!(quick_conemap_max_level(10), 8);
        assert_eq!(quick_conemap_max_level(2), 0);
        assert_eq!(quick_conemap_max_level(1), 0);
    }

    #[test]
    fn test_procedural_heightmap_on_device() {
        let Some((device, queue)) = crate::test_device() else {
            return;
        };
        let mut stages = GpuStages::new(&device, &queue);

        for function in [HeightFunction::Sinc, HeightFunction::Spheres] {
            let settings = ProceduralHeightmapSettings {
                size: [40, 24],
                precision: HeightPrecision::Unorm8,
                height_function: function,
                ..Default::default()
            };
            let texture = stages.procedural_heightmap(&settings).unwrap();
            assert_eq!(texture.info().format, wgpu::TextureFormat::R8Unorm);
            assert_eq!((texture.width(), texture.height()), (40, 24));

            let image = read_texture_rgba32f(&device, &queue, texture.texture(), 0).unwrap();
            let heights = image.pixels().map(|p| p.0[0]).collect::<Vec<_>>();
            assert!(heights.iter().all(|h| (0.0..=1.0).contains(h)));
            assert!(heights.iter().any(|&h| h > 0.5), "{function:?} should have high points");
        }

        if !device.features().contains(wgpu::Features::TEXTURE_FORMAT_16BIT_NORM) {
            assert!(matches!(
                stages.procedural_heightmap(&ProceduralHeightmapSettings::default()),
                Err(Error::UnsupportedFeature(_))
            ));
        }
    }

    #[test]
    fn test_absent_inputs_on_device() {
        let Some((device, queue)) = crate::test_device() else {
            return;
        };
        let mut stages = GpuStages::new(&device, &queue);
        assert!(stages.conemap(&ConemapSettings::default(), None).unwrap().is_none());
        assert!(stages.minmax_pyramid(None).unwrap().is_none());
        assert!(stages.quick_conemap(&QuickConemapSettings::default(), None).unwrap().is_none());
    }

    #[test]
    fn test_minmax_pyramid_on_device() {
        let Some((device, queue)) = crate::test_device() else {
            return;
        };
        let mut stages = GpuStages::new(&device, &queue);

        let (width, height) = (13, 6);
        let data = test_heights(width, height);
        let heightmap = upload_heightmap(&device, &queue, width, height, &data);
        let pyramid = stages.minmax_pyramid(Some(&heightmap)).unwrap().unwrap();
        assert_eq!(pyramid.mip_count(), 4);
        assert_eq!(pyramid.name(), MINMAX_TEXTURE_NAME);
        assert_eq!(pyramid.format(), stages.pyramid_precision().dual_channel_format());

        // The 1x1 top holds the global extremes, odd edges included
        let top = read_texture_rgba32f(&device, &queue, pyramid.texture(), 3).unwrap();
        let min = *data.iter().min().unwrap() as f32 / 255.0;
        let max = *data.iter().max().unwrap() as f32 / 255.0;
        let texel = top.get_pixel(0, 0).0;
        assert!((texel[0] - min).abs() < 1e-3);
        assert!((texel[1] - max).abs() < 1e-3);
    }

    /// Cone map precision the device supports, with the ratio tolerance it allows
    fn cone_precision(stages: &GpuStages) -> (HeightPrecision, f32) {
        match stages.pyramid_precision() {
            HeightPrecision::Unorm16 => (HeightPrecision::Unorm16, 1e-3),
            HeightPrecision::Unorm8 => {
                eprintln!("no 16-bit normalized textures, checking cone maps at 8-bit precision");
                (HeightPrecision::Unorm8, 1e-2)
            }
        }
    }

    fn cone_ratios(image: &image::Rgba32FImage) -> Vec<f32> {
        image.pixels().map(|p| p.0[1] * p.0[1]).collect()
    }

    #[test]
    fn test_cone_maps_against_reference_on_device() {
        let Some((device, queue)) = crate::test_device() else {
            return;
        };
        let mut stages = GpuStages::new(&device, &queue);
        let (precision, tolerance) = cone_precision(&stages);

        let (width, height) = (11, 9);
        let data = test_heights(width, height);
        let reference = reference_cone_ratios(width, height, &data);
        let heightmap = upload_heightmap(&device, &queue, width, height, &data);

        let mut cone_settings = ConemapSettings {
            precision,
            ..Default::default()
        };
        cone_settings.select(ConeAlgorithm::Standard);
        let standard = stages.conemap(&cone_settings, Some(&heightmap)).unwrap().unwrap();
        assert_eq!(standard.name(), "Standard Conemap");
        assert_eq!(standard.format(), precision.dual_channel_format());
        let standard = read_texture_rgba32f(&device, &queue, standard.texture(), 0).unwrap();
        let standard_ratios = cone_ratios(&standard);
        for (i, s) in standard.pixels().enumerate() {
            assert!((s.0[0] - data[i] as f32 / 255.0).abs() < 1e-3);
            assert!((standard_ratios[i] - reference[i]).abs() < tolerance, "standard cone at {i}");
        }

        let pyramid = stages.minmax_pyramid(Some(&heightmap)).unwrap().unwrap();

        for algorithm in [QuickConeAlgorithm::Naive, QuickConeAlgorithm::RegionGrowing] {
            let mut variants = Vec::new();
            for max_at_texel_center in [false, true] {
                let mut settings = QuickConemapSettings {
                    precision,
                    max_at_texel_center,
                    ..Default::default()
                };
                settings.select(algorithm);
                let quick = stages.quick_conemap(&settings, Some(&pyramid)).unwrap().unwrap();
                assert_eq!((quick.width(), quick.height()), (width, height));
                assert_eq!(quick.format(), precision.dual_channel_format());
                let quick = read_texture_rgba32f(&device, &queue, quick.texture(), 0).unwrap();
                let quick_ratios = cone_ratios(&quick);

                for (i, &quick_ratio) in quick_ratios.iter().enumerate() {
                    // Region bounds only ever make the cone narrower
                    assert!(quick_ratio <= standard_ratios[i] + tolerance, "{algorithm:?} cone at {i} wider than the exact cone");
                }
                variants.push(quick_ratios);
            }

            // Texel-center footprints are smaller, so no cone gets narrower
            let (corners, centers) = (&variants[0], &variants[1]);
            for (i, (corner, center)) in corners.iter().zip(centers).enumerate() {
                assert!(center + 1e-6 >= *corner, "{algorithm:?} texel-center cone at {i} narrower");
            }
            assert!(centers.iter().zip(corners).any(|(center, corner)| center > corner), "{algorithm:?} texel-center flag had no effect");
        }
    }

    #[test]
    fn test_relaxed_cones_are_wider_on_device() {
        let Some((device, queue)) = crate::test_device() else {
            return;
        };
        let mut stages = GpuStages::new(&device, &queue);
        let (precision, _) = cone_precision(&stages);

        let (width, height) = (11, 9);
        let data = test_heights(width, height);
        let heightmap = upload_heightmap(&device, &queue, width, height, &data);

        let mut cone_ratio_sums = Vec::new();
        for algorithm in [ConeAlgorithm::Standard, ConeAlgorithm::Relaxed] {
            let mut settings = ConemapSettings {
                precision,
                ..Default::default()
            };
            settings.select(algorithm);
            let conemap = stages.conemap(&settings, Some(&heightmap)).unwrap().unwrap();
            assert_eq!(conemap.name(), algorithm.name());
            let image = read_texture_rgba32f(&device, &queue, conemap.texture(), 0).unwrap();
            for (i, texel) in image.pixels().enumerate() {
                assert!((texel.0[0] - data[i] as f32 / 255.0).abs() < 1e-3);
                assert!((0.0..=1.0).contains(&texel.0[1]));
            }
            cone_ratio_sums.push(cone_ratios(&image).iter().sum::<f32>());
        }

        let (standard, relaxed) = (cone_ratio_sums[0], cone_ratio_sums[1]);
        assert!(relaxed > standard, "relaxed cones ({relaxed}) should be wider than standard cones ({standard})");
    }
}
