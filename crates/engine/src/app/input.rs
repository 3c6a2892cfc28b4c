use serde::{Deserialize, Serialize};

use crate::ecs::Vec2;
use crate::physics::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

const DIRECTION_COUNT: usize = 4;

impl Direction {
    pub const ALL: [Direction; DIRECTION_COUNT] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    const fn index(self) -> usize {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Left => 2,
            Direction::Right => 3,
        }
    }

    /// Unit step in screen space (y grows downward).
    pub const fn unit(self) -> Vec2 {
        match self {
            Direction::Up => Vec2 { x: 0.0, y: -1.0 },
            Direction::Down => Vec2 { x: 0.0, y: 1.0 },
            Direction::Left => Vec2 { x: -1.0, y: 0.0 },
            Direction::Right => Vec2 { x: 1.0, y: 0.0 },
        }
    }

    /// The contact side that blocks travel in this direction.
    pub const fn blocking_side(self) -> Side {
        match self {
            Direction::Up => Side::Top,
            Direction::Down => Side::Bottom,
            Direction::Left => Side::Left,
            Direction::Right => Side::Right,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeldDirections {
    down: [bool; DIRECTION_COUNT],
}

impl HeldDirections {
    pub fn set(&mut self, direction: Direction, is_down: bool) {
        self.down[direction.index()] = is_down;
    }

    pub fn is_down(&self, direction: Direction) -> bool {
        self.down[direction.index()]
    }

    pub fn clear(&mut self) {
        self.down = [false; DIRECTION_COUNT];
    }

    pub fn any(&self) -> bool {
        self.down.iter().any(|held| *held)
    }

    pub fn iter_held(&self) -> impl Iterator<Item = Direction> + '_ {
        Direction::ALL
            .into_iter()
            .filter(move |direction| self.is_down(*direction))
    }
}
