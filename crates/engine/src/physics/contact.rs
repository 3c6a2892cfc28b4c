use serde::{Deserialize, Serialize};

use super::collider::{Aabb, BoxShape};
use crate::ecs::{EntityId, Vec2};

/// Side of an entity on which a contact happened, in screen space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Top,
    Bottom,
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Top => Side::Bottom,
            Side::Bottom => Side::Top,
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// One detected overlap, as seen from `entity`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionContact {
    pub side: Side,
    pub entity: EntityId,
    pub other: EntityId,
    pub penetration: Vec2,
}

impl CollisionContact {
    /// The same contact seen from the other participant.
    pub fn mirrored(&self) -> CollisionContact {
        CollisionContact {
            side: self.side.opposite(),
            entity: self.other,
            other: self.entity,
            penetration: self.penetration,
        }
    }
}

/// Side of `this` facing `other`. Ties between the axes go vertical.
pub fn contact_side(this: &Aabb, other: &Aabb) -> Side {
    let depth = this.penetration(other);
    let this_center = this.center();
    let other_center = other.center();
    if depth.y <= depth.x {
        if other_center.y > this_center.y {
            Side::Bottom
        } else {
            Side::Top
        }
    } else if other_center.x > this_center.x {
        Side::Right
    } else {
        Side::Left
    }
}

/// Position that puts a box of `shape` exactly adjacent to `other` on `side`.
///
/// The result is placed from the other box's edge instead of subtracting the
/// penetration depth, so the same inputs always give the same bits.
pub fn resolve_position(position: Vec2, shape: &BoxShape, other: &Aabb, side: Side) -> Vec2 {
    let half = shape.half_extents();
    let mut resolved = position;
    match side {
        Side::Bottom => resolved.y = other.min.y - half.y - shape.offset.y,
        Side::Top => resolved.y = other.max.y + half.y - shape.offset.y,
        Side::Right => resolved.x = other.min.x - half.x - shape.offset.x,
        Side::Left => resolved.x = other.max.x + half.x - shape.offset.x,
    }
    resolved
}
