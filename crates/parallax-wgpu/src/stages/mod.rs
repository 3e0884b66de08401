//! Heightmap derivation stages
//!
//! Each stage is a pure function of an input texture and a parameter set that
//! produces a brand-new output texture. Stages never mutate their input, and an
//! absent input always yields an absent output.
//!
//! The [`StageExecutor`] trait is the seam between the orchestrator in
//! [`crate::pipeline`] and the GPU: [`GpuStages`] runs the kernels on wgpu, while
//! tests drive the orchestrator with a recording mock.

mod gpu;

pub use gpu::GpuStages;

use crate::error::Result;
use crate::texture::{HeightPrecision, TextureInfo};
use serde::{Deserialize, Serialize};

/// Height function of the procedural generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeightFunction {
    /// Radial sinc ripples; `int_params[0]` is the number of ripples
    #[default]
    Sinc,
    /// Grid of hemispheres; `int_params[0]` per row, `float_params[0]` relative radius
    Spheres,
}

impl HeightFunction {
    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            HeightFunction::Sinc => "Sinc",
            HeightFunction::Spheres => "Spheres",
        }
    }
}

/// Parameters of procedural heightmap generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProceduralHeightmapSettings {
    /// Output size, each component at least 1
    pub size: [u32; 2],
    pub precision: HeightPrecision,
    pub height_function: HeightFunction,
    pub int_params: [i32; 4],
    pub float_params: [f32; 4],
}

impl Default for ProceduralHeightmapSettings {
    fn default() -> Self {
        Self {
            size: [512, 512],
            precision: HeightPrecision::Unorm16,
            height_function: HeightFunction::Sinc,
            int_params: [5, 0, 0, 0],
            float_params: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Direct cone map algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConeAlgorithm {
    /// Widest cone that stays above the surface
    #[default]
    Standard = 1,
    /// Relaxed cone: rays entering the cone cross the surface at most once
    Relaxed = 2,
}

impl ConeAlgorithm {
    /// Value of the `CONE_TYPE` shader constant
    pub fn define_value(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            ConeAlgorithm::Standard => "Standard Conemap",
            ConeAlgorithm::Relaxed => "Relaxed Conemap",
        }
    }
}

/// Parameters of direct cone map generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConemapSettings {
    pub precision: HeightPrecision,
    /// Ray search steps of the relaxed variant, at least 2
    pub relaxed_search_steps: u32,
    pub algorithm: ConeAlgorithm,
    /// Name given to the produced texture
    pub name: String,
}

impl Default for ConemapSettings {
    fn default() -> Self {
        Self {
            precision: HeightPrecision::Unorm16,
            relaxed_search_steps: 64,
            algorithm: ConeAlgorithm::Standard,
            name: String::new(),
        }
    }
}

impl ConemapSettings {
    /// Selects the algorithm and names the output after it
    pub fn select(&mut self, algorithm: ConeAlgorithm) {
        self.algorithm = algorithm;
        self.name = algorithm.name().to_string();
    }

    /// Search steps, clamped to the minimum of 2
    pub fn search_steps(&self) -> u32 {
        self.relaxed_search_steps.max(2)
    }
}

/// Quick cone map algorithm over the min/max pyramid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuickConeAlgorithm {
    /// Scan the full neighbourhood at every pyramid level
    Naive = 1,
    /// Grow rings outward, stopping once farther regions can't narrow the cone
    #[default]
    RegionGrowing = 2,
}

impl QuickConeAlgorithm {
    /// Value of the `QUICK_GEN_ALG` shader constant
    pub fn define_value(self) -> u32 {
        self as u32
    }
}

/// Parameters of quick cone map generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickConemapSettings {
    pub precision: HeightPrecision,
    /// Assume the maximum of a region lies at a texel center
    pub max_at_texel_center: bool,
    pub algorithm: QuickConeAlgorithm,
    pub name: String,
}

impl Default for QuickConemapSettings {
    fn default() -> Self {
        Self {
            precision: HeightPrecision::Unorm16,
            max_at_texel_center: false,
            algorithm: QuickConeAlgorithm::RegionGrowing,
            name: String::new(),
        }
    }
}

impl QuickConemapSettings {
    /// Display name derived from the algorithm and the texel-center flag
    pub fn display_name(&self) -> String {
        let base = match self.algorithm {
            QuickConeAlgorithm::Naive => "Naive Quick Conemap",
            QuickConeAlgorithm::RegionGrowing => "Quick Conemap",
        };
        if self.max_at_texel_center {
            format!("{base} + Center Heuristic")
        } else {
            base.to_string()
        }
    }

    /// Selects the algorithm and renames the output accordingly
    pub fn select(&mut self, algorithm: QuickConeAlgorithm) {
        self.algorithm = algorithm;
        self.name = self.display_name();
    }
}

/// Name of the min/max pyramid texture
pub const MINMAX_TEXTURE_NAME: &str = "Min/Max Mipmap";
/// Name of a generated heightmap
pub const PROCEDURAL_HEIGHTMAP_NAME: &str = "Procedural Heightmap";

/// Identifies a stage in execution reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    ProceduralHeightmap,
    Conemap,
    MinMaxPyramid,
    QuickConemap,
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            StageKind::ProceduralHeightmap => "procedural heightmap",
            StageKind::Conemap => "conemap",
            StageKind::MinMaxPyramid => "min/max pyramid",
            StageKind::QuickConemap => "quick conemap",
        }
    }
}

/// Runs the derivation stages on some backend
///
/// Inputs and outputs are optional: a stage given no input returns `Ok(None)`
/// without doing any work.
pub trait StageExecutor {
    /// Shared texture handle produced by the backend
    type Texture: Clone;

    /// Describes a texture
    fn info(&self, texture: &Self::Texture) -> TextureInfo;

    /// Generates a single-channel heightmap of `settings.size`
    fn procedural_heightmap(&mut self, settings: &ProceduralHeightmapSettings) -> Result<Self::Texture>;

    /// Derives a two-channel (height, cone ratio) texture from a heightmap
    fn conemap(&mut self, settings: &ConemapSettings, heightmap: Option<&Self::Texture>) -> Result<Option<Self::Texture>>;

    /// Builds the full min/max mip pyramid of a heightmap
    fn minmax_pyramid(&mut self, heightmap: Option<&Self::Texture>) -> Result<Option<Self::Texture>>;

    /// Derives a cone map from a min/max pyramid
    fn quick_conemap(&mut self, settings: &QuickConemapSettings, minmax: Option<&Self::Texture>) -> Result<Option<Self::Texture>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let procedural = ProceduralHeightmapSettings::default();
        assert_eq!(procedural.size, [512, 512]);
        assert_eq!(procedural.int_params, [5, 0, 0, 0]);
        assert_eq!(procedural.float_params, [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(procedural.precision, HeightPrecision::Unorm16);

        let cone = ConemapSettings::default();
        assert_eq!(cone.relaxed_search_steps, 64);
        assert_eq!(cone.algorithm.define_value(), 1);
    }

    #[test]
    fn test_cone_names() {
        let mut cone = ConemapSettings::default();
        cone.select(ConeAlgorithm::Relaxed);
        assert_eq!(cone.name, "Relaxed Conemap");
        assert_eq!(cone.algorithm.define_value(), 2);

        let mut quick = QuickConemapSettings::default();
        quick.select(QuickConeAlgorithm::Naive);
        assert_eq!(quick.name, "Naive Quick Conemap");
        quick.max_at_texel_center = true;
        quick.select(QuickConeAlgorithm::RegionGrowing);
        assert_eq!(quick.name, "Quick Conemap + Center Heuristic");
    }

    #[test]
    fn test_search_steps_minimum() {
        let cone = ConemapSettings {
            relaxed_search_steps: 0,
            ..Default::default()
        };
        assert_eq!(cone.search_steps(), 2);
    }

    #[test]
    fn test_settings_from_yaml() {
        let yaml = "size: [256, 128]\nheight_function: spheres\nprecision: unorm8\n";
        let settings: ProceduralHeightmapSettings = serde_norway::from_str(yaml).unwrap();
        assert_eq!(settings.size, [256, 128]);
        assert_eq!(settings.height_function, HeightFunction::Spheres);
        assert_eq!(settings.precision, HeightPrecision::Unorm8);
        assert_eq!(settings.int_params, [5, 0, 0, 0]);

        let quick: QuickConemapSettings = serde_norway::from_str("algorithm: naive\nmax_at_texel_center: true\n").unwrap();
        assert_eq!(quick.algorithm, QuickConeAlgorithm::Naive);
        assert!(quick.max_at_texel_center);
    }
}
