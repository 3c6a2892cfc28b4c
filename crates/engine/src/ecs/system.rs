use std::time::Duration;

use super::store::EntityStore;
use super::world::WorldEvent;
use crate::physics::PhysicsConfig;

/// Coarse execution phase. Systems run in ascending phase order and keep
/// their insertion order within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SystemType {
    Action,
    Motion,
    Collision,
}

pub struct SystemContext<'a> {
    pub elapsed: Duration,
    pub tick: u64,
    pub physics: PhysicsConfig,
    pub events: &'a mut Vec<WorldEvent>,
}

pub trait System: Send {
    fn system_type(&self) -> SystemType;
    fn name(&self) -> &'static str;
    fn update(&mut self, store: &mut EntityStore, ctx: &mut SystemContext<'_>);
}

#[derive(Default)]
pub struct SystemSchedule {
    systems: Vec<Box<dyn System>>,
    last_tick_order: Vec<&'static str>,
}

impl SystemSchedule {
    pub fn add(&mut self, system: Box<dyn System>) {
        let phase = system.system_type();
        let index = self
            .systems
            .iter()
            .position(|existing| existing.system_type() > phase)
            .unwrap_or(self.systems.len());
        self.systems.insert(index, system);
    }

    /// Removes every system registered under `name`. Returns how many were
    /// dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.systems.len();
        self.systems.retain(|system| system.name() != name);
        before - self.systems.len()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.systems.iter().map(|system| system.name()).collect()
    }

    pub fn last_tick_order(&self) -> &[&'static str] {
        &self.last_tick_order
    }

    pub(crate) fn run(&mut self, store: &mut EntityStore, ctx: &mut SystemContext<'_>) {
        self.last_tick_order.clear();
        for system in &mut self.systems {
            self.last_tick_order.push(system.name());
            system.update(store, ctx);
        }
    }
}

impl std::fmt::Debug for SystemSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSchedule")
            .field("systems", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, SystemType);

    impl System for Named {
        fn system_type(&self) -> SystemType {
            self.1
        }

        fn name(&self) -> &'static str {
            self.0
        }

        fn update(&mut self, _store: &mut EntityStore, _ctx: &mut SystemContext<'_>) {}
    }

    #[test]
    fn systems_are_ordered_by_phase_then_insertion() {
        let mut schedule = SystemSchedule::default();
        schedule.add(Box::new(Named("collide", SystemType::Collision)));
        schedule.add(Box::new(Named("move", SystemType::Motion)));
        schedule.add(Box::new(Named("act_a", SystemType::Action)));
        schedule.add(Box::new(Named("act_b", SystemType::Action)));

        assert_eq!(schedule.names(), vec!["act_a", "act_b", "move", "collide"]);
    }

    #[test]
    fn run_records_execution_order() {
        let mut schedule = SystemSchedule::default();
        schedule.add(Box::new(Named("move", SystemType::Motion)));
        schedule.add(Box::new(Named("act", SystemType::Action)));

        let mut store = EntityStore::default();
        let mut events = Vec::new();
        let mut ctx = SystemContext {
            elapsed: Duration::from_millis(16),
            tick: 1,
            physics: PhysicsConfig::default(),
            events: &mut events,
        };
        schedule.run(&mut store, &mut ctx);

        assert_eq!(schedule.last_tick_order(), &["act", "move"]);
    }

    #[test]
    fn remove_drops_by_name() {
        let mut schedule = SystemSchedule::default();
        schedule.add(Box::new(Named("move", SystemType::Motion)));
        assert_eq!(schedule.remove("move"), 1);
        assert!(schedule.is_empty());
    }
}
