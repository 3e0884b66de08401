//! Window event handling of the parallax viewer

use super::Args;
use super::viewer::ViewerContext;
use parallax_wgpu::camera::MoveKey;
use parallax_wgpu::input::{Key, KeyInput};
use winit::{
    application::ApplicationHandler,
    event::{DeviceEvent, DeviceId, ElementState, KeyEvent, MouseButton, WindowEvent},
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, ModifiersState, PhysicalKey},
    window::WindowId,
};

/// Translates a physical key into the viewer's key type
fn translate_key(code: KeyCode) -> Option<Key> {
    let key = match code {
        KeyCode::Digit0 => Key::Digit(0),
        KeyCode::Digit1 => Key::Digit(1),
        KeyCode::Digit2 => Key::Digit(2),
        KeyCode::Digit3 => Key::Digit(3),
        KeyCode::Digit4 => Key::Digit(4),
        KeyCode::Digit5 => Key::Digit(5),
        KeyCode::Digit6 => Key::Digit(6),
        KeyCode::Digit7 => Key::Digit(7),
        KeyCode::Digit8 => Key::Digit(8),
        KeyCode::Digit9 => Key::Digit(9),
        KeyCode::KeyL => Key::Letter('l'),
        KeyCode::KeyH => Key::Letter('h'),
        KeyCode::KeyM => Key::Letter('m'),
        KeyCode::KeyT => Key::Letter('t'),
        KeyCode::F1 => Key::Function(1),
        KeyCode::F2 => Key::Function(2),
        KeyCode::F3 => Key::Function(3),
        KeyCode::F4 => Key::Function(4),
        KeyCode::F5 => Key::Function(5),
        KeyCode::F6 => Key::Function(6),
        KeyCode::F7 => Key::Function(7),
        KeyCode::F8 => Key::Function(8),
        KeyCode::F9 => Key::Function(9),
        KeyCode::PageUp => Key::PageUp,
        KeyCode::PageDown => Key::PageDown,
        KeyCode::Escape => Key::Escape,
        _ => return None,
    };
    Some(key)
}

fn move_key(code: KeyCode) -> Option<MoveKey> {
    match code {
        KeyCode::KeyW => Some(MoveKey::Forward),
        KeyCode::KeyS => Some(MoveKey::Backward),
        KeyCode::KeyA => Some(MoveKey::Left),
        KeyCode::KeyD => Some(MoveKey::Right),
        KeyCode::KeyQ => Some(MoveKey::Down),
        KeyCode::KeyE => Some(MoveKey::Up),
        _ => None,
    }
}

/// Main viewer application structure
pub struct ViewerApp {
    args: Args,
    /// Keyboard modifiers state
    modifiers: ModifiersState,
    /// Window, GPU state and scene, created on resume
    context: Option<ViewerContext>,
}

impl ViewerApp {
    pub fn new(args: Args) -> Self {
        Self {
            args,
            modifiers: ModifiersState::default(),
            context: None,
        }
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.context.is_some() {
            return;
        }
        match ViewerContext::new(event_loop, &self.args) {
            Ok(context) => self.context = Some(context),
            Err(err) => {
                tracing::error!("failed to start viewer: {err}");
                event_loop.exit();
                return;
            }
        }

        println!();
        println!("Keyboard shortcuts:");
        println!("  - Esc: Quit");
        println!("  - W/A/S/D/Q/E, right mouse drag: Move and look around");
        println!("  - 0-3: Parallax function (bump, parallax, linear search, cone step)");
        println!("  - Shift+0-2: Refinement function (none, linear approx, binary search)");
        println!("  - L: Point the light along the view direction");
        println!("  - H/M: Render the heightmap / the cone map");
        println!("  - F1: Toggle debug view, T: cycle debug texture, PageUp/PageDown: debug mip");
        println!("  - F2: Generate procedural heightmap");
        println!("  - F3/F4: Generate standard / relaxed cone map");
        println!("  - F5/F6: Save heightmap / cone map as EXR");
        println!("  - F7/F8: Generate quick cone map (naive / region growing)");
        println!("  - F9: Toggle max-at-texel-center for quick cone maps");
        println!();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::ModifiersChanged(new_modifiers) => {
                self.modifiers = new_modifiers.state();
            }

            WindowEvent::CloseRequested => {
                event_loop.exit();
            }

            WindowEvent::KeyboardInput {
                event: KeyEvent {
                    state,
                    physical_key: PhysicalKey::Code(keycode),
                    repeat,
                    ..
                },
                ..
            } => {
                let Some(context) = self.context.as_mut() else {
                    return;
                };

                // Movement keys go to the camera controller first
                if let Some(key) = move_key(keycode) {
                    context.on_move_key(key, state == ElementState::Pressed);
                    return;
                }
                if state != ElementState::Pressed || repeat {
                    return;
                }

                if let Some(key) = translate_key(keycode) {
                    let input = KeyInput {
                        key,
                        shift: self.modifiers.shift_key(),
                    };
                    if context.on_key(input) {
                        event_loop.exit();
                    }
                }
            }

            WindowEvent::MouseInput {
                state,
                button: MouseButton::Right,
                ..
            } => {
                if let Some(context) = self.context.as_mut() {
                    context.on_mouse_button(state == ElementState::Pressed);
                }
            }

            WindowEvent::RedrawRequested => {
                if let Some(context) = self.context.as_mut() {
                    context.handle_redraw();
                }
            }

            WindowEvent::Resized(new_size) => {
                if let Some(context) = self.context.as_mut() {
                    context.resize(new_size);
                }
            }

            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if let Some(context) = self.context.as_mut() {
                context.on_mouse_motion(delta.0 as f32, delta.1 as f32);
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(context) = self.context.as_ref() {
            context.request_redraw();
        }
    }
}
