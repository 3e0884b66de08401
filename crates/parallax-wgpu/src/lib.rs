//! GPU heightmap derivation and parallax rendering with wgpu
//!
//! This crate derives cone maps from heightmaps on the GPU and renders them with
//! several parallax techniques. The derivation stages are:
//!
//! - procedural heightmap generation
//! - direct cone map generation (standard or relaxed cones)
//! - min/max mip pyramid generation
//! - quick cone map generation from the min/max pyramid
//!
//! [`HeightmapPipeline`] tracks which stages are pending and runs them in
//! dependency order through a [`StageExecutor`], normally [`GpuStages`].
//! [`ParallaxRenderer`] draws the result and [`VBufferRaster`] provides a
//! visibility buffer raster pass for triangle scenes.

pub mod camera;
pub mod compute_program;
pub mod error;
pub mod input;
pub mod pipeline;
pub mod renderer;
pub mod settings;
pub mod stages;
pub mod texture;
pub mod vbuffer;

pub use camera::{Camera, FirstPersonController};
pub use error::{Error, Result};
pub use pipeline::{ActiveTexture, FrameReport, HeightmapPipeline, RunFlags};
pub use renderer::ParallaxRenderer;
pub use settings::{DebugSettings, RenderSettings};
pub use stages::{GpuStages, StageExecutor, StageKind};
pub use texture::{GpuTexture, HeightPrecision, TextureInfo};
pub use vbuffer::{DeviceCapabilities, VBufferRaster};

/// Device features used when the adapter offers them
///
/// 16-bit normalized textures enable the default [`HeightPrecision::Unorm16`].
pub const OPTIONAL_FEATURES: wgpu::Features = wgpu::Features::TEXTURE_FORMAT_16BIT_NORM;

/// Features to request from an adapter that supports `available`
pub fn device_features(available: wgpu::Features) -> wgpu::Features {
    available & OPTIONAL_FEATURES
}

/// Headless adapter, device and queue for GPU tests; `None` without an adapter
#[cfg(test)]
pub(crate) fn test_context() -> Option<(wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let adapter = match pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    })) {
        Ok(adapter) => adapter,
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            return None;
        }
    };

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("Test device"),
        required_features: device_features(adapter.features()),
        required_limits: adapter.limits(),
        memory_hints: wgpu::MemoryHints::default(),
        trace: Default::default(),
    }))
    .ok()?;
    Some((adapter, device, queue))
}

#[cfg(test)]
pub(crate) fn test_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    test_context().map(|(_, device, queue)| (device, queue))
}

/// Parses and validates a WGSL module with naga
#[cfg(test)]
pub(crate) fn validate_wgsl(source: &str) -> std::result::Result<(), String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| err.emit_to_string(source))?;
    naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
        .validate(&module)
        .map_err(|err| err.emit_to_string(source))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_features_only_requests_optional() {
        let available = wgpu::Features::TEXTURE_FORMAT_16BIT_NORM | wgpu::Features::TIMESTAMP_QUERY;
        assert_eq!(device_features(available), wgpu::Features::TEXTURE_FORMAT_16BIT_NORM);
        assert_eq!(device_features(wgpu::Features::empty()), wgpu::Features::empty());
    }

    #[test]
    fn test_render_shaders_validate() {
        for (name, source) in [
            ("parallax", include_str!("shaders/parallax.wgsl")),
            ("debug_view", include_str!("shaders/debug_view.wgsl")),
            ("vbuffer", include_str!("shaders/vbuffer.wgsl")),
        ] {
            if let Err(err) = validate_wgsl(source) {
                panic!("{name}.wgsl failed validation:\n{err}");
            }
        }
    }
}
