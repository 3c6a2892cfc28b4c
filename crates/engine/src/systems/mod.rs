mod action;
mod collision;
mod motion;

pub use action::ActionSystem;
pub use collision::CollisionSystem;
pub use motion::MotionSystem;
