use crate::ecs::{EntityStore, Motion, System, SystemContext, SystemType, Vec2};

/// Turns held directions into this tick's displacement. A direction is
/// dropped while the entity's current contact side blocks it.
#[derive(Debug, Default)]
pub struct ActionSystem;

impl System for ActionSystem {
    fn system_type(&self) -> SystemType {
        SystemType::Action
    }

    fn name(&self) -> &'static str {
        "action"
    }

    fn update(&mut self, store: &mut EntityStore, _ctx: &mut SystemContext<'_>) {
        for entity in store.iter_mut() {
            if !entity.is_active() {
                continue;
            }
            let Some(movement) = entity.movement else {
                continue;
            };

            let mut step = Vec2::ZERO;
            for direction in movement.held.iter_held() {
                if entity.contact.blocks(direction.blocking_side()) {
                    continue;
                }
                step += direction.unit() * movement.speed_per_tick;
            }

            entity.motion.get_or_insert_with(Motion::default).step = step;
        }
    }
}
