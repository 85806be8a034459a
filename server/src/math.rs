//! Vectors, locations and look angles.
//!
//! Angles follow the client convention: yaw 0 faces +Z and grows clockwise
//! seen from above, pitch is positive looking down.

use serde::{Deserialize, Serialize};

/// A 3D vector in block units
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(v: [f64; 3]) -> Self {
        Self { x: v[0], y: v[1], z: v[2] }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn length(&self) -> f64 {
        self.length_squared().sqrt()
    }

    pub fn length_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn normalized(&self) -> Self {
        let len = self.length();
        if len > 1e-9 {
            Self { x: self.x / len, y: self.y / len, z: self.z / len }
        } else {
            Self::ZERO
        }
    }

    pub fn dot(&self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn distance_to(&self, other: Vec3) -> f64 {
        (other - *self).length()
    }

    /// Distance ignoring the vertical axis
    pub fn horizontal_distance_to(&self, other: Vec3) -> f64 {
        let dx = other.x - self.x;
        let dz = other.z - self.z;
        (dx * dx + dz * dz).sqrt()
    }
}

impl std::ops::Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3 { x: self.x + rhs.x, y: self.y + rhs.y, z: self.z + rhs.z }
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3 { x: self.x - rhs.x, y: self.y - rhs.y, z: self.z - rhs.z }
    }
}

impl std::ops::Mul<f64> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f64) -> Vec3 {
        Vec3 { x: self.x * rhs, y: self.y * rhs, z: self.z * rhs }
    }
}

/// A position with look angles inside a named world
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn with_look(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.x = position.x;
        self.y = position.y;
        self.z = position.z;
    }

    pub fn offset(&self, delta: Vec3) -> Location {
        let mut moved = self.clone();
        moved.set_position(self.position() + delta);
        moved
    }

    pub fn same_world(&self, other: &Location) -> bool {
        self.world == other.world
    }

    /// Distance to another location, `None` across worlds
    pub fn distance_to(&self, other: &Location) -> Option<f64> {
        if !self.same_world(other) {
            return None;
        }
        Some(self.position().distance_to(other.position()))
    }

    /// Unit vector the angles point along
    pub fn direction(&self) -> Vec3 {
        direction_from_angles(self.yaw, self.pitch)
    }

    /// Integer block coordinates containing this location
    pub fn block(&self) -> (i32, i32, i32) {
        (self.x.floor() as i32, self.y.floor() as i32, self.z.floor() as i32)
    }
}

/// Unit look vector for yaw/pitch in degrees
pub fn direction_from_angles(yaw: f32, pitch: f32) -> Vec3 {
    let yaw = (yaw as f64).to_radians();
    let pitch = (pitch as f64).to_radians();
    Vec3::new(
        -yaw.sin() * pitch.cos(),
        -pitch.sin(),
        yaw.cos() * pitch.cos(),
    )
}

/// Yaw/pitch in degrees that look from `from` towards `to`
pub fn angles_toward(from: Vec3, to: Vec3) -> (f32, f32) {
    let d = to - from;
    let horizontal = (d.x * d.x + d.z * d.z).sqrt();
    if horizontal < 1e-9 && d.y.abs() < 1e-9 {
        return (0.0, 0.0);
    }
    let yaw = (-d.x).atan2(d.z).to_degrees();
    let pitch = -(d.y.atan2(horizontal)).to_degrees();
    (wrap_degrees(yaw) as f32, pitch as f32)
}

/// Wrap an angle into [-180, 180)
pub fn wrap_degrees(angle: f64) -> f64 {
    let mut a = angle % 360.0;
    if a >= 180.0 {
        a -= 360.0;
    }
    if a < -180.0 {
        a += 360.0;
    }
    a
}
