//! Texture handles and helpers
//!
//! Textures produced by the derivation stages are plain wgpu textures paired with a
//! human-readable name. The orchestrator only holds them until they are replaced,
//! so the handle is a cheap clone around the shared wgpu resource.
//!
//! Normalized 8/16-bit formats cannot be bound as storage textures in core WebGPU.
//! Compute kernels therefore write texels into a packed storage buffer laid out by
//! [`PackedTexelLayout`], which is then copied into the destination mip level.

use crate::error::{Error, Result};
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Usage flags of every texture produced by the derivation stages
pub const DERIVED_TEXTURE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
    .union(wgpu::TextureUsages::COPY_DST)
    .union(wgpu::TextureUsages::COPY_SRC);

/// Bit depth of generated height and cone textures
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeightPrecision {
    /// 8-bit normalized channels (R8Unorm / Rg8Unorm)
    Unorm8,
    /// 16-bit normalized channels (R16Unorm / Rg16Unorm)
    #[default]
    Unorm16,
}

impl HeightPrecision {
    /// Format of a single-channel heightmap
    pub fn single_channel_format(self) -> wgpu::TextureFormat {
        match self {
            HeightPrecision::Unorm8 => wgpu::TextureFormat::R8Unorm,
            HeightPrecision::Unorm16 => wgpu::TextureFormat::R16Unorm,
        }
    }

    /// Format of a two-channel cone map
    pub fn dual_channel_format(self) -> wgpu::TextureFormat {
        match self {
            HeightPrecision::Unorm8 => wgpu::TextureFormat::Rg8Unorm,
            HeightPrecision::Unorm16 => wgpu::TextureFormat::Rg16Unorm,
        }
    }

    /// Device features needed to create textures of this precision
    pub fn required_features(self) -> wgpu::Features {
        match self {
            HeightPrecision::Unorm8 => wgpu::Features::empty(),
            HeightPrecision::Unorm16 => wgpu::Features::TEXTURE_FORMAT_16BIT_NORM,
        }
    }

    /// Fails with [`Error::UnsupportedFeature`] when `features` can't hold this precision
    pub fn check_supported(self, features: wgpu::Features) -> Result<()> {
        if features.contains(self.required_features()) {
            Ok(())
        } else {
            Err(Error::UnsupportedFeature("16-bit normalized texture formats (TEXTURE_FORMAT_16BIT_NORM)"))
        }
    }
}

/// Plain description of a texture, independent of any GPU resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureInfo {
    /// Display name (file name, or the stage that produced it)
    pub name: String,
    /// Width of mip 0 in texels
    pub width: u32,
    /// Height of mip 0 in texels
    pub height: u32,
    /// Texel format
    pub format: wgpu::TextureFormat,
    /// Number of mip levels
    pub mip_count: u32,
}

impl TextureInfo {
    /// Number of color channels of the format
    pub fn channels(&self) -> u32 {
        self.format.components() as u32
    }

    /// One-line form of [`describe`], e.g. for a window title
    pub fn summary(&self) -> String {
        format!("{} {}x{} {:?}", self.name, self.width, self.height, self.format)
    }
}

/// Shared handle to a named GPU texture
#[derive(Debug, Clone)]
pub struct GpuTexture {
    texture: wgpu::Texture,
    name: String,
}

impl GpuTexture {
    /// Wraps an existing wgpu texture
    pub fn new(texture: wgpu::Texture, name: impl Into<String>) -> Self {
        Self { texture, name: name.into() }
    }

    /// Creates a 2D texture with [`DERIVED_TEXTURE_USAGE`]
    ///
    /// # Arguments
    /// * `device` - The wgpu device
    /// * `name` - Display name, also used as the debug label
    /// * `size` - Width and height of mip 0
    /// * `format` - Texel format
    /// * `mip_level_count` - Number of mip levels to allocate
    pub fn create(device: &wgpu::Device, name: &str, size: (u32, u32), format: wgpu::TextureFormat, mip_level_count: u32) -> Result<Self> {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return Err(Error::InvalidTextureSize { width, height });
        }
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(name),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: DERIVED_TEXTURE_USAGE,
            view_formats: &[],
        });
        Ok(Self::new(texture, name))
    }

    /// The underlying wgpu texture
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.texture.format()
    }

    pub fn mip_count(&self) -> u32 {
        self.texture.mip_level_count()
    }

    /// View over every mip level
    pub fn view(&self) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    /// View restricted to one mip level
    pub fn mip_view(&self, mip: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{} mip {mip}", self.name)),
            base_mip_level: mip,
            mip_level_count: Some(1),
            ..Default::default()
        })
    }

    /// Snapshot of the texture's description
    pub fn info(&self) -> TextureInfo {
        TextureInfo {
            name: self.name.clone(),
            width: self.width(),
            height: self.height(),
            format: self.format(),
            mip_count: self.mip_count(),
        }
    }
}

/// Number of levels of a full mip pyramid: `floor(log2(max(w, h))) + 1`
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Sizes of every level of a full mip pyramid, from mip 0 down to 1x1
///
/// Each level is the floor-half of the previous one, clamped to 1.
pub fn mip_chain(width: u32, height: u32) -> Vec<(u32, u32)> {
    (0..mip_level_count(width, height)).map(|level| ((width >> level).max(1), (height >> level).max(1))).collect()
}

/// Layout of texels packed into 32-bit words of a storage buffer
///
/// Rows are padded to [`wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`] so the buffer can be
/// copied straight into a texture mip level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedTexelLayout {
    /// Width of the destination mip in texels
    pub width: u32,
    /// Height of the destination mip in texels
    pub height: u32,
    /// Color channels per texel (1 or 2)
    pub channels: u32,
    /// Bits per channel (8 or 16)
    pub bits_per_channel: u32,
}

/// Uniform block describing a [`PackedTexelLayout`] to the kernels
#[derive(Debug, Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
#[repr(C)]
pub struct PackedTexelUniform {
    /// Destination size in texels
    pub size: [u32; 2],
    /// Channels per texel
    pub channels: u32,
    /// Bits per channel
    pub bits_per_channel: u32,
    /// Texels stored in one 32-bit word
    pub texels_per_word: u32,
    /// Words per padded row
    pub words_per_row: u32,
    /// Words written per row (`ceil(width / texels_per_word)`)
    pub words_per_texel_row: u32,
    pub _padding: u32,
}

impl PackedTexelLayout {
    /// Layout for writing a `width` x `height` mip of `format`
    pub fn for_format(format: wgpu::TextureFormat, width: u32, height: u32) -> Result<Self> {
        let (channels, bits_per_channel) = match format {
            wgpu::TextureFormat::R8Unorm => (1, 8),
            wgpu::TextureFormat::R16Unorm => (1, 16),
            wgpu::TextureFormat::Rg8Unorm => (2, 8),
            wgpu::TextureFormat::Rg16Unorm => (2, 16),
            other => return Err(Error::UnsupportedTextureFormat(other)),
        };
        if width == 0 || height == 0 {
            return Err(Error::InvalidTextureSize { width, height });
        }
        Ok(Self {
            width,
            height,
            channels,
            bits_per_channel,
        })
    }

    pub fn bytes_per_texel(&self) -> u32 {
        self.channels * self.bits_per_channel / 8
    }

    pub fn texels_per_word(&self) -> u32 {
        4 / self.bytes_per_texel()
    }

    /// Row pitch in bytes, padded for buffer-to-texture copies
    pub fn bytes_per_row(&self) -> u32 {
        (self.width * self.bytes_per_texel()).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
    }

    pub fn words_per_row(&self) -> u32 {
        self.bytes_per_row() / 4
    }

    /// Number of words a kernel writes per row; also the dispatch width
    pub fn words_per_texel_row(&self) -> u32 {
        self.width.div_ceil(self.texels_per_word())
    }

    /// Total buffer size in bytes
    pub fn buffer_size(&self) -> u64 {
        self.bytes_per_row() as u64 * self.height as u64
    }

    pub fn uniform(&self) -> PackedTexelUniform {
        PackedTexelUniform {
            size: [self.width, self.height],
            channels: self.channels,
            bits_per_channel: self.bits_per_channel,
            texels_per_word: self.texels_per_word(),
            words_per_row: self.words_per_row(),
            words_per_texel_row: self.words_per_texel_row(),
            _padding: 0,
        }
    }

    /// Records a copy of a packed buffer into one mip level of `texture`
    pub fn copy_to_texture(&self, encoder: &mut wgpu::CommandEncoder, buffer: &wgpu::Buffer, texture: &wgpu::Texture, mip_level: u32) {
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.bytes_per_row()),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

/// Text shown next to a texture slot: resolution, format and source
pub fn describe(info: Option<&TextureInfo>) -> String {
    match info {
        None => "  [ no texture ]".to_string(),
        Some(info) => format!(
            " * Resolution: {} x {}\n * Format: {:?}\n * Source: {}",
            info.width, info.height, info.format, info.name
        ),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_else(|| path.display().to_string())
}

/// Box-filtered mip chain of an image, mip 0 included
fn build_mips(image: &DynamicImage, generate_mips: bool) -> Vec<DynamicImage> {
    let (width, height) = image.dimensions();
    if !generate_mips {
        return vec![image.clone()];
    }
    mip_chain(width, height)
        .into_iter()
        .map(|(w, h)| {
            if (w, h) == (width, height) {
                image.clone()
            } else {
                image.resize_exact(w, h, image::imageops::FilterType::Triangle)
            }
        })
        .collect()
}

fn upload_mips(device: &wgpu::Device, queue: &wgpu::Queue, name: &str, format: wgpu::TextureFormat, mips: &[(u32, u32, Vec<u8>)]) -> Result<GpuTexture> {
    let (width, height, _) = &mips[0];
    let texture = GpuTexture::create(device, name, (*width, *height), format, mips.len() as u32)?;
    let bytes_per_texel = format.block_copy_size(None).ok_or(Error::UnsupportedTextureFormat(format))?;

    for (level, (w, h, data)) in mips.iter().enumerate() {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: texture.texture(),
                mip_level: level as u32,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(w * bytes_per_texel),
                rows_per_image: Some(*h),
            },
            wgpu::Extent3d {
                width: *w,
                height: *h,
                depth_or_array_layers: 1,
            },
        );
    }

    Ok(texture)
}

/// Loads an image file as a single-channel heightmap
///
/// 16-bit sources stay 16-bit when the device supports normalized 16-bit formats;
/// everything else is loaded as R8Unorm. The texture is named after the file.
///
/// # Arguments
/// * `device` - The wgpu device
/// * `queue` - The queue used for the upload
/// * `path` - Image file to load
/// * `generate_mips` - Whether to build a full box-filtered mip chain on the CPU
pub fn load_heightmap(device: &wgpu::Device, queue: &wgpu::Queue, path: &Path, generate_mips: bool) -> Result<GpuTexture> {
    let image = image::open(path)?;
    let wide = matches!(image.color().bytes_per_pixel() / image.color().channel_count(), 2 | 4);
    let use_16bit = wide && device.features().contains(wgpu::Features::TEXTURE_FORMAT_16BIT_NORM);

    let levels = build_mips(&image, generate_mips);
    let (format, mips) = if use_16bit {
        let mips = levels
            .iter()
            .map(|level| {
                let luma = level.to_luma16();
                (luma.width(), luma.height(), bytemuck::cast_slice(luma.as_raw()).to_vec())
            })
            .collect::<Vec<_>>();
        (wgpu::TextureFormat::R16Unorm, mips)
    } else {
        let mips = levels
            .iter()
            .map(|level| {
                let luma = level.to_luma8();
                (luma.width(), luma.height(), luma.into_raw())
            })
            .collect::<Vec<_>>();
        (wgpu::TextureFormat::R8Unorm, mips)
    };

    let texture = upload_mips(device, queue, &file_name(path), format, &mips)?;
    tracing::info!(name = texture.name(), width = texture.width(), height = texture.height(), ?format, "loaded heightmap");
    Ok(texture)
}

/// Loads an image file as an sRGB albedo texture
pub fn load_albedo(device: &wgpu::Device, queue: &wgpu::Queue, path: &Path, generate_mips: bool) -> Result<GpuTexture> {
    let image = image::open(path)?;
    let mips = build_mips(&image, generate_mips)
        .iter()
        .map(|level| {
            let rgba = level.to_rgba8();
            (rgba.width(), rgba.height(), rgba.into_raw())
        })
        .collect::<Vec<_>>();

    let texture = upload_mips(device, queue, &file_name(path), wgpu::TextureFormat::Rgba8UnormSrgb, &mips)?;
    tracing::info!(name = texture.name(), width = texture.width(), height = texture.height(), "loaded albedo");
    Ok(texture)
}

/// Converts raw texel bytes of `format` to RGBA floats
///
/// Missing channels are filled with zero, alpha with one.
fn texels_to_rgba32f(format: wgpu::TextureFormat, texel: &[u8]) -> Result<[f32; 4]> {
    let unorm8 = |i: usize| texel[i] as f32 / 255.0;
    let unorm16 = |i: usize| u16::from_le_bytes([texel[2 * i], texel[2 * i + 1]]) as f32 / 65535.0;
    let float32 = |i: usize| f32::from_le_bytes([texel[4 * i], texel[4 * i + 1], texel[4 * i + 2], texel[4 * i + 3]]);

    Ok(match format {
        wgpu::TextureFormat::R8Unorm => [unorm8(0), 0.0, 0.0, 1.0],
        wgpu::TextureFormat::Rg8Unorm => [unorm8(0), unorm8(1), 0.0, 1.0],
        wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => [unorm8(0), unorm8(1), unorm8(2), unorm8(3)],
        wgpu::TextureFormat::R16Unorm => [unorm16(0), 0.0, 0.0, 1.0],
        wgpu::TextureFormat::Rg16Unorm => [unorm16(0), unorm16(1), 0.0, 1.0],
        wgpu::TextureFormat::R32Float => [float32(0), 0.0, 0.0, 1.0],
        wgpu::TextureFormat::Rg32Float => [float32(0), float32(1), 0.0, 1.0],
        wgpu::TextureFormat::Rgba32Float => [float32(0), float32(1), float32(2), float32(3)],
        other => return Err(Error::UnsupportedTextureFormat(other)),
    })
}

/// Reads one mip level of a texture back to an RGBA32F image
///
/// # Arguments
/// * `device` - The wgpu device
/// * `queue` - The wgpu command queue
/// * `texture` - Texture to read; needs `COPY_SRC`
/// * `mip_level` - Mip level to read
///
/// # Returns
/// The texels expanded to RGBA, missing channels zero and alpha one
pub fn read_texture_rgba32f(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture, mip_level: u32) -> Result<image::Rgba32FImage> {
    let format = texture.format();
    let bytes_per_texel = format.block_copy_size(None).ok_or(Error::UnsupportedTextureFormat(format))?;
    let wgpu::Extent3d { width, height, .. } = texture.size().mip_level_size(mip_level, wgpu::TextureDimension::D2);

    // Rows of a texture-to-buffer copy must be 256-byte aligned
    let unpadded_bytes_per_row = width * bytes_per_texel;
    let bytes_per_row = unpadded_bytes_per_row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Buffer"),
        size: bytes_per_row as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback Encoder") });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let buffer_slice = buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |v| {
        let _ = sender.send(v);
    });
    device.poll(wgpu::PollType::Wait)?;
    pollster::block_on(receiver.receive()).ok_or(Error::MapCancelled)??;

    let data = buffer_slice.get_mapped_range();
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for row in data.chunks(bytes_per_row as usize).take(height as usize) {
        for texel in row[..unpadded_bytes_per_row as usize].chunks(bytes_per_texel as usize) {
            rgba.extend_from_slice(&texels_to_rgba32f(format, texel)?);
        }
    }
    drop(data);
    buffer.unmap();

    image::Rgba32FImage::from_raw(width, height, rgba).ok_or(Error::InvalidTextureSize { width, height })
}

/// Captures mip 0 of a texture to an OpenEXR file
pub fn save_texture_exr(device: &wgpu::Device, queue: &wgpu::Queue, texture: &GpuTexture, path: &Path) -> Result<()> {
    let image = read_texture_rgba32f(device, queue, texture.texture(), 0)?;
    DynamicImage::ImageRgba32F(image).save_with_format(path, image::ImageFormat::OpenExr)?;
    tracing::info!(name = texture.name(), path = %path.display(), "saved texture");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(2, 1), 2);
        assert_eq!(mip_level_count(512, 512), 10);
        assert_eq!(mip_level_count(513, 100), 10);
        assert_eq!(mip_level_count(1023, 1024), 11);
        // Degenerate sizes still describe a single level
        assert_eq!(mip_level_count(0, 0), 1);
    }

    #[test]
    fn test_mip_chain_halves_down_to_one() {
        for &(w, h) in &[(512, 512), (640, 360), (7, 3), (1, 9)] {
            let chain = mip_chain(w, h);
            assert_eq!(chain.len() as u32, (w.max(h) as f64).log2().floor() as u32 + 1);
            assert_eq!(chain[0], (w, h));
            assert_eq!(*chain.last().unwrap(), (1, 1));
            for pair in chain.windows(2) {
                let ((w0, h0), (w1, h1)) = (pair[0], pair[1]);
                assert_eq!(w1, (w0 / 2).max(1));
                assert_eq!(h1, (h0 / 2).max(1));
            }
        }
    }

    #[test]
    fn test_packed_layout_r8() {
        let layout = PackedTexelLayout::for_format(wgpu::TextureFormat::R8Unorm, 10, 3).unwrap();
        assert_eq!(layout.bytes_per_texel(), 1);
        assert_eq!(layout.texels_per_word(), 4);
        assert_eq!(layout.bytes_per_row(), 256);
        assert_eq!(layout.words_per_row(), 64);
        assert_eq!(layout.words_per_texel_row(), 3);
        assert_eq!(layout.buffer_size(), 768);
    }

    #[test]
    fn test_packed_layout_rg16() {
        let layout = PackedTexelLayout::for_format(wgpu::TextureFormat::Rg16Unorm, 512, 512).unwrap();
        assert_eq!(layout.bytes_per_texel(), 4);
        assert_eq!(layout.texels_per_word(), 1);
        assert_eq!(layout.bytes_per_row(), 2048);
        assert_eq!(layout.words_per_texel_row(), 512);

        let uniform = layout.uniform();
        assert_eq!(uniform.size, [512, 512]);
        assert_eq!(uniform.channels, 2);
        assert_eq!(uniform.bits_per_channel, 16);
    }

    #[test]
    fn test_packed_layout_rejects_unsupported() {
        assert!(matches!(
            PackedTexelLayout::for_format(wgpu::TextureFormat::Rgba32Float, 4, 4),
            Err(Error::UnsupportedTextureFormat(wgpu::TextureFormat::Rgba32Float))
        ));
        assert!(matches!(
            PackedTexelLayout::for_format(wgpu::TextureFormat::R8Unorm, 0, 4),
            Err(Error::InvalidTextureSize { width: 0, height: 4 })
        ));
    }

    #[test]
    fn test_precision_formats() {
        assert_eq!(HeightPrecision::Unorm8.single_channel_format(), wgpu::TextureFormat::R8Unorm);
        assert_eq!(HeightPrecision::Unorm16.single_channel_format(), wgpu::TextureFormat::R16Unorm);
        assert_eq!(HeightPrecision::Unorm8.dual_channel_format(), wgpu::TextureFormat::Rg8Unorm);
        assert_eq!(HeightPrecision::Unorm16.dual_channel_format(), wgpu::TextureFormat::Rg16Unorm);

        assert!(HeightPrecision::Unorm8.check_supported(wgpu::Features::empty()).is_ok());
        assert!(HeightPrecision::Unorm16.check_supported(wgpu::Features::empty()).is_err());
        assert!(HeightPrecision::Unorm16.check_supported(wgpu::Features::TEXTURE_FORMAT_16BIT_NORM).is_ok());
    }

    #[test]
    fn test_texel_conversion() {
        assert_eq!(texels_to_rgba32f(wgpu::TextureFormat::R8Unorm, &[255]).unwrap(), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(texels_to_rgba32f(wgpu::TextureFormat::Rg16Unorm, &[0, 0, 0xff, 0xff]).unwrap(), [0.0, 1.0, 0.0, 1.0]);
        assert!(texels_to_rgba32f(wgpu::TextureFormat::Depth32Float, &[0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(None), "  [ no texture ]");
        let info = TextureInfo {
            name: "Procedural Heightmap".to_string(),
            width: 512,
            height: 256,
            format: wgpu::TextureFormat::R16Unorm,
            mip_count: 1,
        };
        let text = describe(Some(&info));
        assert!(text.contains("512 x 256"));
        assert!(text.contains("R16Unorm"));
        assert!(text.contains("Procedural Heightmap"));

        let summary = info.summary();
        assert_eq!(summary, "Procedural Heightmap 512x256 R16Unorm");
        assert!(!summary.contains('\n'));
    }
}
