use std::ops::{Add, AddAssign, Mul, Sub};

use serde::{Deserialize, Serialize};

use crate::app::HeldDirections;
use crate::physics::Side;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

/// Authoritative position plus the cached visual position derived from it.
///
/// The visual position is only ever written by [`Transform::sync_visual`],
/// which the world calls once at the end of every update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Transform {
    pub position: Vec2,
    visual_position: Vec2,
}

impl Transform {
    pub fn at(position: Vec2) -> Self {
        Self {
            position,
            visual_position: position,
        }
    }

    pub fn visual_position(&self) -> Vec2 {
        self.visual_position
    }

    pub(crate) fn sync_visual(&mut self) {
        self.visual_position = self.position;
    }
}

/// Continuous velocity (units per second) plus a one-tick displacement that
/// the motion system consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Motion {
    pub velocity: Vec2,
    pub step: Vec2,
}

/// Held directions and the fixed distance travelled per tick while held.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MovementIntent {
    pub held: HeldDirections,
    pub speed_per_tick: f32,
}

impl MovementIntent {
    pub fn new(speed_per_tick: f32) -> Self {
        Self {
            held: HeldDirections::default(),
            speed_per_tick,
        }
    }
}

/// Most recent collision state. A new contact overwrites whatever was
/// recorded before, and any ending contact clears it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContactState {
    pub is_colliding: bool,
    pub direction: Option<Side>,
}

impl ContactState {
    pub(crate) fn record(&mut self, side: Side) {
        self.is_colliding = true;
        self.direction = Some(side);
    }

    pub(crate) fn clear(&mut self) {
        self.is_colliding = false;
        self.direction = None;
    }

    pub fn blocks(&self, side: Side) -> bool {
        self.is_colliding && self.direction == Some(side)
    }
}
