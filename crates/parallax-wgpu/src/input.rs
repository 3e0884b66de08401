//! Keyboard shortcuts of the parallax viewer
//!
//! Key handling is split into a pure mapping from keys to [`InputAction`]s and a
//! small dispatcher for the actions that only touch render settings. The viewer
//! translates window-system key codes into [`Key`] and applies the remaining
//! actions itself.

use crate::camera::Camera;
use crate::settings::{ParallaxFunction, RefinementFunction, RenderSettings};
use crate::stages::{ConeAlgorithm, QuickConeAlgorithm};

/// Window-system independent key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Digit row key 0..=9
    Digit(u32),
    /// Letter key, lowercase
    Letter(char),
    /// Function key F1..=F12
    Function(u8),
    PageUp,
    PageDown,
    Escape,
}

/// A key press with the modifier state that matters here
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    pub key: Key,
    pub shift: bool,
}

impl KeyInput {
    pub fn new(key: Key) -> Self {
        Self { key, shift: false }
    }

    pub fn with_shift(key: Key) -> Self {
        Self { key, shift: true }
    }
}

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    SelectParallaxFun(u32),
    SelectRefinementFun(u32),
    /// Point the light along the camera's view direction
    SnapLightToView,
    ToggleDebugView,
    CycleDebugTexture,
    DebugMipUp,
    DebugMipDown,
    GenerateProceduralHeightmap,
    GenerateConemap(ConeAlgorithm),
    GenerateQuickConemap(QuickConeAlgorithm),
    ToggleTexelCenterHeuristic,
    SaveHeightmap,
    SaveConemap,
    UseHeightmap,
    UseConemap,
    Quit,
}

/// Maps a key press to an action
///
/// Digits select a parallax function, or a refinement function with shift held.
/// Digits past the end of the respective list map to nothing and stay unconsumed.
pub fn map_key(input: KeyInput) -> Option<InputAction> {
    match input.key {
        Key::Digit(index) if input.shift => (index < RefinementFunction::ALL.len() as u32).then_some(InputAction::SelectRefinementFun(index)),
        Key::Digit(index) => (index < ParallaxFunction::ALL.len() as u32).then_some(InputAction::SelectParallaxFun(index)),
        Key::Letter('l') => Some(InputAction::SnapLightToView),
        Key::Letter('h') => Some(InputAction::UseHeightmap),
        Key::Letter('m') => Some(InputAction::UseConemap),
        Key::Letter('t') => Some(InputAction::CycleDebugTexture),
        Key::Function(1) => Some(InputAction::ToggleDebugView),
        Key::Function(2) => Some(InputAction::GenerateProceduralHeightmap),
        Key::Function(3) => Some(InputAction::GenerateConemap(ConeAlgorithm::Standard)),
        Key::Function(4) => Some(InputAction::GenerateConemap(ConeAlgorithm::Relaxed)),
        Key::Function(5) => Some(InputAction::SaveHeightmap),
        Key::Function(6) => Some(InputAction::SaveConemap),
        Key::Function(7) => Some(InputAction::GenerateQuickConemap(QuickConeAlgorithm::Naive)),
        Key::Function(8) => Some(InputAction::GenerateQuickConemap(QuickConeAlgorithm::RegionGrowing)),
        Key::Function(9) => Some(InputAction::ToggleTexelCenterHeuristic),
        Key::PageUp => Some(InputAction::DebugMipUp),
        Key::PageDown => Some(InputAction::DebugMipDown),
        Key::Escape => Some(InputAction::Quit),
        _ => None,
    }
}

/// Applies the actions that only affect render settings
///
/// Returns `true` when the action was handled here; everything else is left to
/// the caller.
pub fn apply_render_action(action: InputAction, settings: &mut RenderSettings, camera: &Camera) -> bool {
    match action {
        InputAction::SelectParallaxFun(index) => settings.select_parallax_fun(index),
        InputAction::SelectRefinementFun(index) => settings.select_refinement_fun(index),
        InputAction::SnapLightToView => {
            settings.light_dir = camera.view_direction();
            true
        }
        _ => false,
    }
}
