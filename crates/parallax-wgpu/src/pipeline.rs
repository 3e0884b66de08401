//! Heightmap derivation orchestrator
//!
//! [`HeightmapPipeline`] owns the current heightmap and everything derived from it.
//! Requests only set run flags; the stages execute once per frame in
//! [`HeightmapPipeline::run_pending`], always in the order
//! heightmap → cone map → min/max pyramid → quick cone map.
//!
//! Derived textures remember the heightmap generation they were built from, so a
//! cone map or pyramid is never used with a heightmap it wasn't derived from.

use crate::error::Result;
use crate::settings::DebugTexture;
use crate::stages::{ConeAlgorithm, ConemapSettings, ProceduralHeightmapSettings, QuickConeAlgorithm, QuickConemapSettings, StageExecutor, StageKind};
use crate::texture::TextureInfo;

/// Stages scheduled for the next frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    pub procedural_heightmap: bool,
    pub conemap: bool,
    pub minmax: bool,
    pub quick_conemap: bool,
}

impl RunFlags {
    pub fn any(&self) -> bool {
        self.procedural_heightmap || self.conemap || self.minmax || self.quick_conemap
    }

    /// Union of two flag sets
    pub fn merge(self, other: RunFlags) -> RunFlags {
        RunFlags {
            procedural_heightmap: self.procedural_heightmap || other.procedural_heightmap,
            conemap: self.conemap || other.conemap,
            minmax: self.minmax || other.minmax,
            quick_conemap: self.quick_conemap || other.quick_conemap,
        }
    }
}

/// Texture sampled by the parallax renderer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActiveTexture {
    #[default]
    Heightmap,
    Conemap,
}

/// Stages run by one [`HeightmapPipeline::run_pending`] call, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Stages that produced a texture
    pub executed: Vec<StageKind>,
    /// Pending stages that had no input and produced nothing
    pub skipped: Vec<StageKind>,
}

impl FrameReport {
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty()
    }

    fn record<T>(&mut self, kind: StageKind, output: &Option<T>) {
        match output {
            Some(_) => self.executed.push(kind),
            None => self.skipped.push(kind),
        }
    }
}

/// A derived texture and the heightmap generation it was built from
#[derive(Debug, Clone)]
struct Derived<T> {
    texture: T,
    generation: u64,
}

/// Owns the heightmap, its derived textures and the pending work
#[derive(Debug)]
pub struct HeightmapPipeline<T> {
    heightmap: Option<T>,
    /// Bumped every time the heightmap is replaced
    generation: u64,
    conemap: Option<Derived<T>>,
    minmax: Option<Derived<T>>,
    albedo: Option<T>,
    albedo_enabled: bool,
    active: ActiveTexture,
    flags: RunFlags,
    pub procedural_settings: ProceduralHeightmapSettings,
    pub conemap_settings: ConemapSettings,
    pub quick_conemap_settings: QuickConemapSettings,
}

impl<T> Default for HeightmapPipeline<T> {
    fn default() -> Self {
        Self {
            heightmap: None,
            generation: 0,
            conemap: None,
            minmax: None,
            albedo: None,
            albedo_enabled: false,
            active: ActiveTexture::Heightmap,
            flags: RunFlags::default(),
            procedural_settings: ProceduralHeightmapSettings::default(),
            conemap_settings: ConemapSettings::default(),
            quick_conemap_settings: QuickConemapSettings::default(),
        }
    }
}

impl<T: Clone> HeightmapPipeline<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh<'a>(&self, derived: &'a Option<Derived<T>>) -> Option<&'a T> {
        derived.as_ref().filter(|d| d.generation == self.generation).map(|d| &d.texture)
    }

    /// Drops everything derived from the current heightmap
    fn invalidate_derived(&mut self) {
        self.conemap = None;
        self.minmax = None;
        if self.active == ActiveTexture::Conemap {
            self.active = ActiveTexture::Heightmap;
        }
    }

    fn replace_heightmap(&mut self, texture: T) {
        self.heightmap = Some(texture);
        self.generation += 1;
        self.invalidate_derived();
        self.active = ActiveTexture::Heightmap;
    }

    pub fn heightmap(&self) -> Option<&T> {
        self.heightmap.as_ref()
    }

    /// Cone map derived from the current heightmap
    pub fn conemap(&self) -> Option<&T> {
        self.fresh(&self.conemap)
    }

    /// Min/max pyramid derived from the current heightmap
    pub fn minmax(&self) -> Option<&T> {
        self.fresh(&self.minmax)
    }

    /// Albedo texture, unless disabled by a procedural heightmap
    pub fn albedo(&self) -> Option<&T> {
        self.albedo.as_ref().filter(|_| self.albedo_enabled)
    }

    pub fn active(&self) -> ActiveTexture {
        self.active
    }

    /// Texture the parallax renderer samples
    pub fn active_texture(&self) -> Option<&T> {
        match self.active {
            ActiveTexture::Heightmap => self.heightmap(),
            ActiveTexture::Conemap => self.conemap(),
        }
    }

    /// Texture shown by the debug view, if present
    pub fn debug_texture(&self, which: DebugTexture) -> Option<&T> {
        match which {
            DebugTexture::Heightmap => self.heightmap(),
            DebugTexture::Conemap => self.conemap(),
            DebugTexture::MinMax => self.minmax(),
            DebugTexture::Albedo => self.albedo(),
        }
    }

    /// Snapshot of the run flags
    pub fn pending(&self) -> RunFlags {
        self.flags
    }

    /// Adds stages to the pending set
    pub fn schedule(&mut self, flags: RunFlags) {
        self.flags = self.flags.merge(flags);
    }

    /// Replaces the heightmap with a loaded texture
    ///
    /// The cone map and min/max pyramid are dropped and the heightmap becomes active.
    pub fn set_heightmap(&mut self, texture: T) {
        self.replace_heightmap(texture);
    }

    pub fn set_albedo(&mut self, texture: Option<T>) {
        self.albedo_enabled = texture.is_some();
        self.albedo = texture;
    }

    /// Schedules a procedural heightmap
    ///
    /// The cone map and pyramid are dropped right away, and the albedo texture is
    /// disabled since it doesn't match generated heights.
    pub fn request_procedural_heightmap(&mut self) {
        self.flags.procedural_heightmap = true;
        self.invalidate_derived();
        self.albedo_enabled = false;
    }

    /// Schedules a direct cone map; ignored without a heightmap
    pub fn request_conemap(&mut self, algorithm: ConeAlgorithm) -> bool {
        if self.heightmap.is_none() {
            return false;
        }
        self.conemap_settings.select(algorithm);
        self.flags.conemap = true;
        true
    }

    /// Schedules the min/max pyramid and a quick cone map
    pub fn request_quick_conemap(&mut self, algorithm: QuickConeAlgorithm) {
        self.quick_conemap_settings.select(algorithm);
        self.flags.minmax = true;
        self.flags.quick_conemap = true;
    }

    /// Makes the heightmap the active texture
    pub fn use_heightmap(&mut self) -> bool {
        if self.heightmap.is_none() {
            return false;
        }
        self.active = ActiveTexture::Heightmap;
        true
    }

    /// Makes the cone map the active texture, if there is one
    pub fn use_conemap(&mut self) -> bool {
        if self.conemap().is_none() {
            return false;
        }
        self.active = ActiveTexture::Conemap;
        true
    }

    /// Runs every pending stage once, in dependency order
    ///
    /// Each flag is cleared before its stage runs. On error the textures built
    /// so far in this call are kept, the failing stage's previous output stays
    /// in place, and the error is returned.
    pub fn run_pending<E>(&mut self, executor: &mut E) -> Result<FrameReport>
    where
        E: StageExecutor<Texture = T>,
    {
        let mut report = FrameReport::default();

        if self.flags.procedural_heightmap {
            self.flags.procedural_heightmap = false;
            let texture = executor.procedural_heightmap(&self.procedural_settings)?;
            report.executed.push(StageKind::ProceduralHeightmap);
            self.replace_heightmap(texture);
        }

        if self.flags.conemap {
            self.flags.conemap = false;
            let output = executor.conemap(&self.conemap_settings, self.heightmap.as_ref())?;
            report.record(StageKind::Conemap, &output);
            self.store_conemap(output);
        }

        // A quick cone map needs a pyramid of the current heightmap
        let minmax_missing = self.minmax().is_none();
        if self.flags.minmax || (self.flags.quick_conemap && minmax_missing) {
            self.flags.minmax = false;
            let output = executor.minmax_pyramid(self.heightmap.as_ref())?;
            report.record(StageKind::MinMaxPyramid, &output);
            self.minmax = output.map(|texture| Derived {
                texture,
                generation: self.generation,
            });
        }

        if self.flags.quick_conemap {
            self.flags.quick_conemap = false;
            let output = executor.quick_conemap(&self.quick_conemap_settings, self.minmax())?;
            report.record(StageKind::QuickConemap, &output);
            self.store_conemap(output);
        }

        if !report.is_empty() {
            tracing::debug!(stages = ?report.executed, "ran derivation stages");
        }
        if !report.skipped.is_empty() {
            tracing::debug!(stages = ?report.skipped, "skipped derivation stages without input");
        }
        Ok(report)
    }

    fn store_conemap(&mut self, output: Option<T>) {
        match output {
            Some(texture) => {
                self.conemap = Some(Derived {
                    texture,
                    generation: self.generation,
                });
                self.active = ActiveTexture::Conemap;
            }
            None => {
                self.conemap = None;
                if self.active == ActiveTexture::Conemap {
                    self.active = ActiveTexture::Heightmap;
                }
            }
        }
    }

    /// Descriptions of the heightmap, cone map and albedo, for display
    pub fn describe<E>(&self, executor: &E) -> [(&'static str, Option<TextureInfo>); 3]
    where
        E: StageExecutor<Texture = T>,
    {
        [
            ("Heightmap", self.heightmap().map(|t| executor.info(t))),
            ("Conemap", self.conemap().map(|t| executor.info(t))),
            ("Albedo", self.albedo().map(|t| executor.info(t))),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::texture::mip_level_count;

    /// Records stage calls and fabricates texture descriptions
    #[derive(Default)]
    struct MockStages {
        calls: Vec<StageKind>,
        fail_on: Option<StageKind>,
    }

    impl MockStages {
        fn check(&mut self, kind: StageKind) -> Result<()> {
            self.calls.push(kind);
            if self.fail_on == Some(kind) {
                return Err(Error::DispatchLimitExceeded { groups: [70000, 1, 1], limit: 65535 });
            }
            Ok(())
        }
    }

    impl StageExecutor for MockStages {
        type Texture = TextureInfo;

        fn info(&self, texture: &TextureInfo) -> TextureInfo {
            texture.clone()
        }

        fn procedural_heightmap(&mut self, settings: &ProceduralHeightmapSettings) -> Result<TextureInfo> {
            self.check(StageKind::ProceduralHeightmap)?;
            Ok(TextureInfo {
                name: "Procedural Heightmap".into(),
                width: settings.size[0],
                height: settings.size[1],
                format: settings.precision.single_channel_format(),
                mip_count: 1,
            })
        }

        fn conemap(&mut self, settings: &ConemapSettings, heightmap: Option<&TextureInfo>) -> Result<Option<TextureInfo>> {
            let Some(heightmap) = heightmap else {
                return Ok(None);
            };
            self.check(StageKind::Conemap)?;
            Ok(Some(TextureInfo {
                name: settings.name.clone(),
                format: settings.precision.dual_channel_format(),
                mip_count: 1,
                ..heightmap.clone()
            }))
        }

        fn minmax_pyramid(&mut self, heightmap: Option<&TextureInfo>) -> Result<Option<TextureInfo>> {
            let Some(heightmap) = heightmap else {
                return Ok(None);
            };
            self.check(StageKind::MinMaxPyramid)?;
            Ok(Some(TextureInfo {
                name: "Min/Max Mipmap".into(),
                format: wgpu::TextureFormat::Rg16Unorm,
                mip_count: mip_level_count(heightmap.width, heightmap.height),
                ..heightmap.clone()
            }))
        }

        fn quick_conemap(&mut self, settings: &QuickConemapSettings, minmax: Option<&TextureInfo>) -> Result<Option<TextureInfo>> {
            let Some(minmax) = minmax else {
                return Ok(None);
            };
            self.check(StageKind::QuickConemap)?;
            Ok(Some(TextureInfo {
                name: settings.name.clone(),
                format: settings.precision.dual_channel_format(),
                mip_count: 1,
                ..minmax.clone()
            }))
        }
    }

    fn loaded_heightmap(width: u32, height: u32) -> TextureInfo {
        TextureInfo {
            name: "height.png".into(),
            width,
            height,
            format: wgpu::TextureFormat::R8Unorm,
            mip_count: 1,
        }
    }

    #[test]
    fn test_absent_input_yields_absent_output() {
        let mut pipeline = HeightmapPipeline::new();
        let mut stages = MockStages::default();

        assert!(!pipeline.request_conemap(ConeAlgorithm::Standard));
        pipeline.request_quick_conemap(QuickConeAlgorithm::RegionGrowing);
        let report = pipeline.run_pending(&mut stages).unwrap();

        assert!(report.is_empty());
        assert_eq!(report.skipped, vec![StageKind::MinMaxPyramid, StageKind::QuickConemap]);
        assert_eq!(stages.calls, report.executed);
        assert!(pipeline.minmax().is_none());
        assert!(pipeline.conemap().is_none());
        assert!(pipeline.active_texture().is_none());
        assert!(!pipeline.pending().any());
    }

    #[test]
    fn test_region_growing_quick_conemap_runs_pyramid_then_cone() {
        let mut pipeline = HeightmapPipeline::new();
        let mut stages = MockStages::default();
        pipeline.set_heightmap(loaded_heightmap(256, 128));

        pipeline.request_quick_conemap(QuickConeAlgorithm::RegionGrowing);
        let report = pipeline.run_pending(&mut stages).unwrap();

        assert_eq!(report.executed, vec![StageKind::MinMaxPyramid, StageKind::QuickConemap]);
        assert_eq!(stages.calls, report.executed);
        let cone = pipeline.conemap().unwrap();
        assert_eq!((cone.width, cone.height), (256, 128));
        assert_eq!(cone.channels(), 2);
        assert_eq!(cone.name, "Quick Conemap");
        assert_eq!(pipeline.minmax().unwrap().mip_count, 9);
        assert_eq!(pipeline.active(), ActiveTexture::Conemap);
    }

    #[test]
    fn test_default_procedural_heightmap() {
        let mut pipeline = HeightmapPipeline::new();
        let mut stages = MockStages::default();

        pipeline.request_procedural_heightmap();
        let report = pipeline.run_pending(&mut stages).unwrap();

        assert_eq!(report.executed, vec![StageKind::ProceduralHeightmap]);
        let heightmap = pipeline.heightmap().unwrap();
        assert_eq!((heightmap.width, heightmap.height), (512, 512));
        assert_eq!(heightmap.format, wgpu::TextureFormat::R16Unorm);
        assert_eq!(heightmap.channels(), 1);
        assert!(pipeline.conemap().is_none());
        assert!(pipeline.minmax().is_none());
    }

    #[test]
    fn test_regeneration_clears_derived_textures() {
        let mut pipeline = HeightmapPipeline::new();
        let mut stages = MockStages::default();
        pipeline.set_heightmap(loaded_heightmap(64, 64));
        pipeline.set_albedo(Some(loaded_heightmap(64, 64)));
        pipeline.request_quick_conemap(QuickConeAlgorithm::Naive);
        pipeline.run_pending(&mut stages).unwrap();
        assert!(pipeline.conemap().is_some());

        // Cleared at request time, before anything new is computed
        pipeline.request_procedural_heightmap();
        assert!(pipeline.conemap().is_none());
        assert!(pipeline.minmax().is_none());
        assert!(pipeline.albedo().is_none());
        assert_eq!(pipeline.active(), ActiveTexture::Heightmap);

        pipeline.run_pending(&mut stages).unwrap();
        assert_eq!(pipeline.heightmap().unwrap().name, "Procedural Heightmap");
        assert!(pipeline.conemap().is_none());

        // Loading a heightmap clears them too
        pipeline.request_conemap(ConeAlgorithm::Relaxed);
        pipeline.run_pending(&mut stages).unwrap();
        assert_eq!(pipeline.conemap().unwrap().name, "Relaxed Conemap");
        pipeline.set_heightmap(loaded_heightmap(32, 32));
        assert!(pipeline.conemap().is_none());
        assert!(pipeline.active_texture().is_some());
    }

    #[test]
    fn test_same_frame_regeneration_derives_from_new_heightmap() {
        let mut pipeline = HeightmapPipeline::new();
        let mut stages = MockStages::default();
        pipeline.set_heightmap(loaded_heightmap(64, 64));
        pipeline.procedural_settings.size = [128, 32];

        pipeline.request_quick_conemap(QuickConeAlgorithm::RegionGrowing);
        pipeline.request_procedural_heightmap();
        assert!(pipeline.request_conemap(ConeAlgorithm::Standard));
        let report = pipeline.run_pending(&mut stages).unwrap();

        assert_eq!(
            report.executed,
            vec![StageKind::ProceduralHeightmap, StageKind::Conemap, StageKind::MinMaxPyramid, StageKind::QuickConemap]
        );
        let cone = pipeline.conemap().unwrap();
        assert_eq!((cone.width, cone.height), (128, 32));
        assert_eq!(pipeline.minmax().unwrap().width, 128);
    }

    #[test]
    fn test_quick_conemap_schedules_missing_pyramid() {
        let mut pipeline = HeightmapPipeline::new();
        let mut stages = MockStages::default();
        pipeline.set_heightmap(loaded_heightmap(16, 16));

        pipeline.schedule(RunFlags {
            quick_conemap: true,
            ..Default::default()
        });
        let report = pipeline.run_pending(&mut stages).unwrap();
        assert_eq!(report.executed, vec![StageKind::MinMaxPyramid, StageKind::QuickConemap]);

        // With a fresh pyramid only the cone map runs
        pipeline.schedule(RunFlags {
            quick_conemap: true,
            ..Default::default()
        });
        let report = pipeline.run_pending(&mut stages).unwrap();
        assert_eq!(report.executed, vec![StageKind::QuickConemap]);
    }

    #[test]
    fn test_each_stage_runs_once_per_frame() {
        let mut pipeline = HeightmapPipeline::new();
        let mut stages = MockStages::default();
        pipeline.set_heightmap(loaded_heightmap(16, 16));

        pipeline.request_conemap(ConeAlgorithm::Standard);
        pipeline.request_conemap(ConeAlgorithm::Relaxed);
        let report = pipeline.run_pending(&mut stages).unwrap();
        assert_eq!(report.executed, vec![StageKind::Conemap]);
        assert_eq!(pipeline.conemap().unwrap().name, "Relaxed Conemap");

        assert!(pipeline.run_pending(&mut stages).unwrap().is_empty());
    }

    #[test]
    fn test_failed_stage_keeps_previous_output() {
        let mut pipeline = HeightmapPipeline::new();
        let mut stages = MockStages::default();
        pipeline.set_heightmap(loaded_heightmap(16, 16));
        pipeline.request_conemap(ConeAlgorithm::Standard);
        pipeline.run_pending(&mut stages).unwrap();

        stages.fail_on = Some(StageKind::QuickConemap);
        pipeline.request_quick_conemap(QuickConeAlgorithm::RegionGrowing);
        let err = pipeline.run_pending(&mut stages).unwrap_err();
        assert!(matches!(err, Error::DispatchLimitExceeded { .. }));

        assert_eq!(pipeline.conemap().unwrap().name, "Standard Conemap");
        assert!(pipeline.minmax().is_some());
        assert!(!pipeline.pending().any());
    }

    #[test]
    fn test_active_selection() {
        let mut pipeline: HeightmapPipeline<TextureInfo> = HeightmapPipeline::new();
        assert!(!pipeline.use_heightmap());
        assert!(!pipeline.use_conemap());

        pipeline.set_heightmap(loaded_heightmap(8, 8));
        assert!(!pipeline.use_conemap());
        assert_eq!(pipeline.debug_texture(DebugTexture::Heightmap).unwrap().name, "height.png");
        assert!(pipeline.debug_texture(DebugTexture::MinMax).is_none());

        let described = pipeline.describe(&MockStages::default());
        assert!(described[0].1.is_some());
        assert!(described[1].1.is_none());
    }
}
