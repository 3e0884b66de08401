//! Perspective camera and first-person controller

use glam::{Mat4, Quat, Vec2, Vec3};

/// Right-handed perspective camera with a look-at target
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.9, 0.1, 0.9),
            target: Vec3::new(0.0, -0.6, 0.0),
            up: Vec3::Y,
            fov_y: 60f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.001,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// Unit vector from the position towards the target
    pub fn view_direction(&self) -> Vec3 {
        (self.target - self.position).try_normalize().unwrap_or(Vec3::NEG_Z)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Projection with wgpu's [0, 1] depth range
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Ignores degenerate sizes, e.g. a minimized window
    pub fn set_aspect_ratio(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }
}

/// Movement keys handled by [`FirstPersonController`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKey {
    Forward,
    Backward,
    Left,
    Right,
    Down,
    Up,
}

impl MoveKey {
    /// W/S/A/D/Q/E, case-insensitive
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'w' => Some(MoveKey::Forward),
            's' => Some(MoveKey::Backward),
            'a' => Some(MoveKey::Left),
            'd' => Some(MoveKey::Right),
            'q' => Some(MoveKey::Down),
            'e' => Some(MoveKey::Up),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// WASD/QE movement with mouse-look while a button is held
#[derive(Debug, Clone)]
pub struct FirstPersonController {
    /// Movement speed in units per second
    pub speed: f32,
    /// Radians per pixel of mouse movement
    pub sensitivity: f32,
    pressed: u8,
    looking: bool,
    mouse_delta: Vec2,
}

impl Default for FirstPersonController {
    fn default() -> Self {
        Self {
            speed: 1.0,
            sensitivity: 0.003,
            pressed: 0,
            looking: false,
            mouse_delta: Vec2::ZERO,
        }
    }
}

impl FirstPersonController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a movement key press or release; returns whether the key was consumed
    pub fn on_key(&mut self, key: MoveKey, pressed: bool) -> bool {
        if pressed {
            self.pressed |= key.bit();
        } else {
            self.pressed &= !key.bit();
        }
        true
    }

    pub fn is_pressed(&self, key: MoveKey) -> bool {
        self.pressed & key.bit() != 0
    }

    /// Starts or stops mouse-look
    pub fn on_mouse_button(&mut self, pressed: bool) {
        self.looking = pressed;
        if !pressed {
            self.mouse_delta = Vec2::ZERO;
        }
    }

    /// Accumulates mouse movement in pixels while looking
    pub fn on_mouse_motion(&mut self, delta: Vec2) {
        if self.looking {
            self.mouse_delta += delta;
        }
    }

    /// Applies pending movement and rotation; returns whether the camera moved
    pub fn update(&mut self, camera: &mut Camera, dt: f32) -> bool {
        let mut changed = false;

        if self.mouse_delta != Vec2::ZERO {
            let distance = (camera.target - camera.position).length().max(1e-3);
            let forward = camera.view_direction();
            let right = forward.cross(camera.up).try_normalize().unwrap_or(Vec3::X);

            let yaw = Quat::from_axis_angle(camera.up, -self.mouse_delta.x * self.sensitivity);
            let pitch = Quat::from_axis_angle(right, -self.mouse_delta.y * self.sensitivity);
            let rotated = (yaw * pitch * forward).normalize();
            // Keep away from the poles so the view basis stays defined
            if rotated.dot(camera.up).abs() < 0.995 {
                camera.target = camera.position + rotated * distance;
            }
            self.mouse_delta = Vec2::ZERO;
            changed = true;
        }

        let forward = camera.view_direction();
        let right = forward.cross(camera.up).try_normalize().unwrap_or(Vec3::X);
        let mut movement = Vec3::ZERO;
        for (key, direction) in [
            (MoveKey::Forward, forward),
            (MoveKey::Backward, -forward),
            (MoveKey::Right, right),
            (MoveKey::Left, -right),
            (MoveKey::Up, camera.up),
            (MoveKey::Down, -camera.up),
        ] {
            if self.is_pressed(key) {
                movement += direction;
            }
        }

        if movement != Vec3::ZERO {
            let offset = movement.normalize() * self.speed * dt;
            camera.position += offset;
            camera.target += offset;
            changed = true;
        }

        changed
    }
}
