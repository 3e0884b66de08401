//! Render settings and shader defines for the parallax renderer
//!
//! The parallax fragment shader is specialized through pipeline-overridable
//! constants. [`ShaderDefines`] keeps the current values together with a revision
//! counter, so a renderer only rebuilds its pipeline when a value actually changed.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Override constant selecting the parallax technique
pub const PARALLAX_FUN_DEFINE: &str = "PARALLAX_FUN";
/// Override constant selecting the refinement technique
pub const REFINE_FUN_DEFINE: &str = "REFINE_FUN";
/// Override constant enabling the albedo texture
pub const USE_ALBEDO_TEXTURE_DEFINE: &str = "USE_ALBEDO_TEXTURE";

/// Ordered set of named shader constants with change tracking
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderDefines {
    values: BTreeMap<String, f64>,
    revision: u64,
}

impl ShaderDefines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a define, returning whether the stored value changed
    ///
    /// The revision is bumped only on change, so setting the same value twice
    /// doesn't trigger a pipeline rebuild.
    pub fn set(&mut self, name: &str, value: impl Into<f64>) -> bool {
        let value = value.into();
        if self.values.get(name) == Some(&value) {
            return false;
        }
        self.values.insert(name.to_string(), value);
        self.revision += 1;
        true
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Counter incremented on every effective change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Constants in the shape wgpu expects in `PipelineCompilationOptions`
    pub fn to_constants(&self) -> Vec<(&str, f64)> {
        self.iter().collect()
    }
}

/// Parallax technique used by the fragment shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParallaxFunction {
    /// Normal perturbation only
    BumpMapping,
    /// Single-step offset along the view direction
    ParallaxMapping,
    /// Fixed-step linear search
    LinearSearch,
    /// Cone step mapping over a cone map
    #[default]
    ConeStepMapping,
}

impl ParallaxFunction {
    pub const ALL: [ParallaxFunction; 4] = [
        ParallaxFunction::BumpMapping,
        ParallaxFunction::ParallaxMapping,
        ParallaxFunction::LinearSearch,
        ParallaxFunction::ConeStepMapping,
    ];

    /// Looks up a technique by its list index
    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u32 {
        self as u32
    }

    /// Returns the human-readable name of this technique
    pub fn name(self) -> &'static str {
        match self {
            ParallaxFunction::BumpMapping => "0: Bump mapping",
            ParallaxFunction::ParallaxMapping => "1: Parallax mapping",
            ParallaxFunction::LinearSearch => "2: Linear search",
            ParallaxFunction::ConeStepMapping => "3: Cone step mapping",
        }
    }
}

/// Refinement applied after the parallax search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefinementFunction {
    NoRefinement,
    #[default]
    LinearApprox,
    BinarySearch,
}

impl RefinementFunction {
    pub const ALL: [RefinementFunction; 3] = [RefinementFunction::NoRefinement, RefinementFunction::LinearApprox, RefinementFunction::BinarySearch];

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            RefinementFunction::NoRefinement => "0: No refinement",
            RefinementFunction::LinearApprox => "1: Linear approx",
            RefinementFunction::BinarySearch => "2: Binary search",
        }
    }
}

/// Settings of the parallax draw
///
/// Changing the technique goes through [`RenderSettings::select_parallax_fun`] and
/// [`RenderSettings::select_refinement_fun`] so that the matching define is kept in sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Direction the light travels in, normalized
    pub light_dir: Vec3,
    /// Height of the displaced surface relative to the quad size
    pub heightmap_height: f32,
    /// Discard fragments whose ray leaves the quad
    pub discard_fragments: bool,
    /// Highlight fragments whose search did not converge
    pub display_non_converged: bool,
    pub light_intensity: f32,
    /// Search steps, 2..=200
    pub step_count: u32,
    /// Refinement steps, 0..=20
    pub refine_step_count: u32,
    /// Cone relaxation factor, 1..=8
    pub relax: f32,
    pub scale: Vec3,
    /// Rotation angle in radians around `axis`
    pub angle: f32,
    pub axis: Vec3,
    pub translate: Vec3,
    /// Modulate shading with the albedo texture when one is loaded
    pub use_albedo: bool,
    parallax_fun: ParallaxFunction,
    refinement_fun: RefinementFunction,
    #[serde(skip)]
    defines: ShaderDefines,
}

/// Valid range of [`RenderSettings::step_count`]
pub const STEP_COUNT_RANGE: std::ops::RangeInclusive<u32> = 2..=200;
/// Valid range of [`RenderSettings::refine_step_count`]
pub const REFINE_STEP_COUNT_RANGE: std::ops::RangeInclusive<u32> = 0..=20;
/// Valid range of [`RenderSettings::relax`]
pub const RELAX_RANGE: std::ops::RangeInclusive<f32> = 1.0..=8.0;

impl Default for RenderSettings {
    fn default() -> Self {
        let mut settings = Self {
            light_dir: Vec3::new(0.198, -0.462, -0.865).normalize(),
            heightmap_height: 0.2,
            discard_fragments: true,
            display_non_converged: false,
            light_intensity: 1.0,
            step_count: 32,
            refine_step_count: 5,
            relax: 1.0,
            scale: Vec3::ONE,
            angle: 0.0,
            axis: Vec3::Z,
            translate: Vec3::ZERO,
            use_albedo: true,
            parallax_fun: ParallaxFunction::default(),
            refinement_fun: RefinementFunction::default(),
            defines: ShaderDefines::new(),
        };
        settings.sync_defines();
        settings
    }
}

impl RenderSettings {
    pub fn parallax_fun(&self) -> ParallaxFunction {
        self.parallax_fun
    }

    pub fn refinement_fun(&self) -> RefinementFunction {
        self.refinement_fun
    }

    /// Selects the parallax technique by list index
    ///
    /// Returns `false` and leaves everything untouched when `index` is out of range.
    pub fn select_parallax_fun(&mut self, index: u32) -> bool {
        let Some(function) = ParallaxFunction::from_index(index) else {
            return false;
        };
        self.parallax_fun = function;
        self.defines.set(PARALLAX_FUN_DEFINE, function.index());
        true
    }

    /// Selects the refinement technique by list index
    pub fn select_refinement_fun(&mut self, index: u32) -> bool {
        let Some(function) = RefinementFunction::from_index(index) else {
            return false;
        };
        self.refinement_fun = function;
        self.defines.set(REFINE_FUN_DEFINE, function.index());
        true
    }

    /// Records whether an albedo texture is bound
    pub fn set_albedo_available(&mut self, available: bool) {
        self.defines.set(USE_ALBEDO_TEXTURE_DEFINE, u32::from(available && self.use_albedo));
    }

    /// Current define set of the parallax shader
    pub fn defines(&self) -> &ShaderDefines {
        &self.defines
    }

    /// Rewrites the defines from the selected techniques
    ///
    /// Needed after deserializing, since defines aren't part of the serialized form.
    pub fn sync_defines(&mut self) {
        self.defines.set(PARALLAX_FUN_DEFINE, self.parallax_fun.index());
        self.defines.set(REFINE_FUN_DEFINE, self.refinement_fun.index());
        if self.defines.get(USE_ALBEDO_TEXTURE_DEFINE).is_none() {
            self.defines.set(USE_ALBEDO_TEXTURE_DEFINE, 0u32);
        }
    }

    /// Clamps numeric fields into their valid ranges
    pub fn clamp_ranges(&mut self) {
        self.step_count = self.step_count.clamp(*STEP_COUNT_RANGE.start(), *STEP_COUNT_RANGE.end());
        self.refine_step_count = self.refine_step_count.clamp(*REFINE_STEP_COUNT_RANGE.start(), *REFINE_STEP_COUNT_RANGE.end());
        self.relax = self.relax.clamp(*RELAX_RANGE.start(), *RELAX_RANGE.end());
        self.light_dir = self.light_dir.try_normalize().unwrap_or(Vec3::NEG_Y);
    }

    /// Model matrix: translate, then rotate around `axis`, then scale
    pub fn model_matrix(&self) -> glam::Mat4 {
        let axis = self.axis.try_normalize().unwrap_or(Vec3::Z);
        glam::Mat4::from_translation(self.translate) * glam::Mat4::from_axis_angle(axis, self.angle) * glam::Mat4::from_scale(self.scale)
    }
}

/// Source channel of one debug output channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugChannel {
    X,
    Y,
    Z,
    W,
    Zero,
    Half,
    One,
}

impl DebugChannel {
    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            DebugChannel::X => "X RED",
            DebugChannel::Y => "Y GREEN",
            DebugChannel::Z => "Z BLUE",
            DebugChannel::W => "W ALPHA",
            DebugChannel::Zero => "0 ZERO",
            DebugChannel::Half => "H HALF",
            DebugChannel::One => "1 ONE",
        }
    }
}

/// Texture drawn by the debug view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DebugTexture {
    #[default]
    Heightmap,
    Conemap,
    MinMax,
    Albedo,
}

impl DebugTexture {
    pub const ALL: [DebugTexture; 4] = [DebugTexture::Heightmap, DebugTexture::Conemap, DebugTexture::MinMax, DebugTexture::Albedo];

    pub fn name(self) -> &'static str {
        match self {
            DebugTexture::Heightmap => "Heightmap",
            DebugTexture::Conemap => "Conemap",
            DebugTexture::MinMax => "Min max",
            DebugTexture::Albedo => "Loaded albedo map",
        }
    }

    /// The next texture in list order, wrapping around
    pub fn next(self) -> Self {
        Self::ALL[(self as usize + 1) % Self::ALL.len()]
    }
}

/// Settings of the debug texture view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    pub draw_debug: bool,
    pub mip_level: u32,
    pub channels: [DebugChannel; 3],
    pub texture: DebugTexture,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            draw_debug: false,
            mip_level: 0,
            channels: [DebugChannel::X, DebugChannel::Y, DebugChannel::Z],
            texture: DebugTexture::Heightmap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defines_revision_only_on_change() {
        let mut defines = ShaderDefines::new();
        assert!(defines.set("A", 1u32));
        assert_eq!(defines.revision(), 1);
        assert!(!defines.set("A", 1u32));
        assert_eq!(defines.revision(), 1);
        assert!(defines.set("A", 2u32));
        assert!(defines.set("B", 0.5f32));
        assert_eq!(defines.revision(), 3);
        assert_eq!(defines.to_constants(), vec![("A", 2.0), ("B", 0.5)]);
    }

    #[test]
    fn test_default_render_settings() {
        let settings = RenderSettings::default();
        assert_eq!(settings.parallax_fun(), ParallaxFunction::ConeStepMapping);
        assert_eq!(settings.refinement_fun(), RefinementFunction::LinearApprox);
        assert_eq!(settings.defines().get(PARALLAX_FUN_DEFINE), Some(3.0));
        assert_eq!(settings.defines().get(REFINE_FUN_DEFINE), Some(1.0));
        assert_eq!(settings.defines().get(USE_ALBEDO_TEXTURE_DEFINE), Some(0.0));
        assert!((settings.light_dir.length() - 1.0).abs() < 1e-5);
        assert_eq!(settings.step_count, 32);
        assert_eq!(settings.refine_step_count, 5);
    }

    #[test]
    fn test_select_parallax_fun_touches_one_define() {
        let mut settings = RenderSettings::default();
        let refine_before = settings.defines().get(REFINE_FUN_DEFINE);
        let revision = settings.defines().revision();

        assert!(settings.select_parallax_fun(2));
        assert_eq!(settings.parallax_fun(), ParallaxFunction::LinearSearch);
        assert_eq!(settings.defines().get(PARALLAX_FUN_DEFINE), Some(2.0));
        assert_eq!(settings.defines().get(REFINE_FUN_DEFINE), refine_before);
        assert_eq!(settings.defines().revision(), revision + 1);
    }

    #[test]
    fn test_select_out_of_range_is_rejected() {
        let mut settings = RenderSettings::default();
        let before = settings.defines().clone();
        assert!(!settings.select_parallax_fun(4));
        assert!(!settings.select_refinement_fun(3));
        assert_eq!(settings.defines(), &before);
        assert_eq!(settings.parallax_fun(), ParallaxFunction::ConeStepMapping);
    }

    #[test]
    fn test_settings_from_yaml() {
        let yaml = "step_count: 500\nrelax: 0.5\nparallax_fun: linear-search\n";
        let mut settings: RenderSettings = serde_norway::from_str(yaml).unwrap();
        settings.sync_defines();
        settings.clamp_ranges();
        assert_eq!(settings.step_count, 200);
        assert_eq!(settings.relax, 1.0);
        assert_eq!(settings.heightmap_height, 0.2);
        assert_eq!(settings.defines().get(PARALLAX_FUN_DEFINE), Some(2.0));
    }

    #[test]
    fn test_model_matrix_identity_by_default() {
        let settings = RenderSettings::default();
        assert!(settings.model_matrix().abs_diff_eq(glam::Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn test_debug_texture_cycles() {
        let mut texture = DebugTexture::Heightmap;
        for _ in 0..DebugTexture::ALL.len() {
            texture = texture.next();
        }
        assert_eq!(texture, DebugTexture::Heightmap);
        assert_eq!(DebugSettings::default().channels.map(DebugChannel::index), [0, 1, 2]);
    }
}
