use crate::ecs::{EntityStore, System, SystemContext, SystemType, Vec2};

#[derive(Debug, Default)]
pub struct MotionSystem;

impl System for MotionSystem {
    fn system_type(&self) -> SystemType {
        SystemType::Motion
    }

    fn name(&self) -> &'static str {
        "motion"
    }

    fn update(&mut self, store: &mut EntityStore, ctx: &mut SystemContext<'_>) {
        let dt_seconds = ctx.elapsed.as_secs_f32();
        for entity in store.iter_mut() {
            if !entity.is_active() {
                continue;
            }
            let Some(motion) = entity.motion.as_mut() else {
                continue;
            };
            entity.transform.position += motion.step + motion.velocity * dt_seconds;
            motion.step = Vec2::ZERO;
        }
    }
}
