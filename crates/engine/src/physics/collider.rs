use serde::{Deserialize, Serialize};

use crate::ecs::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionType {
    /// Resolves itself out of overlaps; never pushes others.
    Passive,
    /// Never moves in response to a contact.
    Fixed,
    /// Resolves like `Passive`. Reserved for bodies that are expected to move
    /// on their own every tick.
    Active,
}

impl CollisionType {
    pub fn moves_on_contact(self) -> bool {
        !matches!(self, CollisionType::Fixed)
    }
}

/// Membership and collides-with bitmasks. Two colliders interact only when
/// each one's collides-with mask shares a bit with the other's membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollisionGroup {
    membership: u32,
    collides_with: u32,
}

impl CollisionGroup {
    pub const ALL: CollisionGroup = CollisionGroup {
        membership: u32::MAX,
        collides_with: u32::MAX,
    };

    pub const fn new(membership: u32, collides_with: u32) -> Self {
        Self {
            membership,
            collides_with,
        }
    }

    pub fn membership(&self) -> u32 {
        self.membership
    }

    pub fn collides_with(&self) -> u32 {
        self.collides_with
    }

    pub fn can_collide(&self, other: &CollisionGroup) -> bool {
        self.collides_with & other.membership != 0 && other.collides_with & self.membership != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxShape {
    pub width: f32,
    pub height: f32,
    /// Offset of the box centre from the owning entity's position.
    pub offset: Vec2,
}

impl BoxShape {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            offset: Vec2::ZERO,
        }
    }

    pub fn with_offset(mut self, offset: Vec2) -> Self {
        self.offset = offset;
        self
    }

    pub fn half_extents(&self) -> Vec2 {
        Vec2::new(self.width.abs() * 0.5, self.height.abs() * 0.5)
    }
}

/// Box collider bound to exactly one entity. Shape, type and group are fixed
/// at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collider {
    shape: BoxShape,
    collision_type: CollisionType,
    group: CollisionGroup,
}

impl Collider {
    pub fn new(shape: BoxShape, collision_type: CollisionType, group: CollisionGroup) -> Self {
        Self {
            shape,
            collision_type,
            group,
        }
    }

    pub fn shape(&self) -> &BoxShape {
        &self.shape
    }

    pub fn collision_type(&self) -> CollisionType {
        self.collision_type
    }

    pub fn group(&self) -> CollisionGroup {
        self.group
    }

    pub fn aabb(&self, position: Vec2) -> Aabb {
        Aabb::from_center(position + self.shape.offset, self.shape.half_extents())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    pub fn from_center(center: Vec2, half_extents: Vec2) -> Self {
        Self::from_corners(center - half_extents, center + half_extents)
    }

    /// Normalizes so `min <= max` on both axes.
    pub fn from_corners(a: Vec2, b: Vec2) -> Self {
        Self {
            min: Vec2::new(a.x.min(b.x), a.y.min(b.y)),
            max: Vec2::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.min.x + self.max.x) * 0.5,
            (self.min.y + self.max.y) * 0.5,
        )
    }

    /// Overlap depth per axis. Zero means the boxes touch on that axis,
    /// negative means there is a gap.
    pub fn penetration(&self, other: &Aabb) -> Vec2 {
        Vec2::new(
            self.max.x.min(other.max.x) - self.min.x.max(other.min.x),
            self.max.y.min(other.max.y) - self.min.y.max(other.min.y),
        )
    }

    /// Strict overlap: positive depth on both axes.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        let depth = self.penetration(other);
        depth.x > 0.0 && depth.y > 0.0
    }

    /// Overlapping or sharing an edge.
    pub fn touches(&self, other: &Aabb) -> bool {
        let depth = self.penetration(other);
        depth.x >= 0.0 && depth.y >= 0.0
    }
}
