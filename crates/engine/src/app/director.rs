use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use super::scene::{ActivationContext, EngineInfo, Scene, SceneError, SceneId};
use crate::physics::PhysicsConfig;

/// Destination used when nothing was requested before initialization.
pub const DEFAULT_SCENE: &str = "root";

pub type SceneFactory = Box<dyn FnOnce() -> Scene + Send>;
pub type NavigationListener = Box<dyn FnMut(&NavigationEvent) + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationEvent {
    NavigationStart { from: Option<String>, to: String },
    Navigation { from: Option<String>, to: String },
    NavigationEnd { from: Option<String>, to: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// The director is not initialized yet; the destination is remembered.
    Deferred,
    AlreadyCurrent,
    Completed,
}

#[derive(Debug, Error)]
pub enum DirectorError {
    #[error("no scene registered under '{0}'")]
    UnknownScene(String),
    #[error("a scene named '{0}' is already registered")]
    DuplicateScene(String),
    #[error("scene '{0}' is current and cannot be removed")]
    ActiveSceneRemoval(String),
    #[error("no registered scene has id {0}")]
    UnknownSceneId(SceneId),
    #[error(transparent)]
    Scene(#[from] SceneError),
}

enum SceneSlot {
    Ready(Box<Scene>),
    Pending(SceneFactory),
}

/// Named scene registry plus the single current-scene pointer.
pub struct Director {
    scenes: BTreeMap<String, SceneSlot>,
    current: Option<String>,
    initialized: bool,
    pending_destination: Option<(String, Option<Value>)>,
    listeners: Vec<NavigationListener>,
    events: Vec<NavigationEvent>,
}

impl fmt::Debug for Director {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Director")
            .field("scenes", &self.scenes.keys().collect::<Vec<_>>())
            .field("current", &self.current)
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl Default for Director {
    fn default() -> Self {
        Self::new()
    }
}

impl Director {
    /// A director with a blank `root` scene registered.
    pub fn new() -> Self {
        let mut scenes = BTreeMap::new();
        let mut root = Scene::blank();
        root.set_name(DEFAULT_SCENE);
        scenes.insert(DEFAULT_SCENE.to_string(), SceneSlot::Ready(Box::new(root)));
        Self {
            scenes,
            current: None,
            initialized: false,
            pending_destination: None,
            listeners: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn add_scene(&mut self, name: &str, mut scene: Scene) -> Result<SceneId, DirectorError> {
        if self.scenes.contains_key(name) {
            return Err(DirectorError::DuplicateScene(name.to_string()));
        }
        scene.set_name(name);
        let id = scene.id();
        self.scenes
            .insert(name.to_string(), SceneSlot::Ready(Box::new(scene)));
        Ok(id)
    }

    /// Registers a scene built on first access. The built scene is cached.
    pub fn add_scene_factory<F>(&mut self, name: &str, factory: F) -> Result<(), DirectorError>
    where
        F: FnOnce() -> Scene + Send + 'static,
    {
        if self.scenes.contains_key(name) {
            return Err(DirectorError::DuplicateScene(name.to_string()));
        }
        self.scenes
            .insert(name.to_string(), SceneSlot::Pending(Box::new(factory)));
        Ok(())
    }

    /// Registers `scene` under `name`, replacing any non-current scene with
    /// that name.
    pub fn replace_scene(&mut self, name: &str, scene: Scene) -> Result<SceneId, DirectorError> {
        if self.scenes.contains_key(name) {
            self.remove_scene(name)?;
        }
        self.add_scene(name, scene)
    }

    pub fn remove_scene(&mut self, name: &str) -> Result<(), DirectorError> {
        if self.current.as_deref() == Some(name) {
            error!(scene = name, "remove_active_scene_rejected");
            return Err(DirectorError::ActiveSceneRemoval(name.to_string()));
        }
        if self.scenes.remove(name).is_none() {
            return Err(DirectorError::UnknownScene(name.to_string()));
        }
        info!(scene = name, "scene_removed");
        Ok(())
    }

    pub fn remove_scene_by_id(&mut self, id: SceneId) -> Result<(), DirectorError> {
        let name = self
            .scenes
            .iter()
            .find_map(|(name, slot)| match slot {
                SceneSlot::Ready(scene) if scene.id() == id => Some(name.clone()),
                _ => None,
            })
            .ok_or(DirectorError::UnknownSceneId(id))?;
        self.remove_scene(&name)
    }

    pub fn has_scene(&self, name: &str) -> bool {
        self.scenes.contains_key(name)
    }

    pub fn scene_names(&self) -> Vec<&str> {
        self.scenes.keys().map(String::as_str).collect()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn current_scene_name(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current_scene(&self) -> Option<&Scene> {
        let name = self.current.as_deref()?;
        match self.scenes.get(name)? {
            SceneSlot::Ready(scene) => Some(scene.as_ref()),
            SceneSlot::Pending(_) => None,
        }
    }

    pub fn current_scene_mut(&mut self) -> Option<&mut Scene> {
        let name = self.current.clone()?;
        self.scene_mut(&name)
    }

    /// Looks up a scene, building it first if it was registered lazily.
    pub fn scene_mut(&mut self, name: &str) -> Option<&mut Scene> {
        self.ensure_ready(name);
        match self.scenes.get_mut(name)? {
            SceneSlot::Ready(scene) => Some(scene.as_mut()),
            SceneSlot::Pending(_) => None,
        }
    }

    pub fn subscribe(&mut self, listener: NavigationListener) {
        self.listeners.push(listener);
    }

    /// Navigation events emitted by the most recent navigation call.
    pub fn events(&self) -> &[NavigationEvent] {
        &self.events
    }

    /// Marks the director ready and performs the first navigation, to the
    /// remembered destination or to `root`. When that navigation fails the
    /// destination is kept for the next call.
    pub fn initialize(&mut self, engine: &EngineInfo) -> Result<NavigationOutcome, DirectorError> {
        if self.initialized {
            return Ok(NavigationOutcome::AlreadyCurrent);
        }
        self.initialized = true;
        let pending = self.pending_destination.take();
        let (destination, data) = pending
            .clone()
            .unwrap_or_else(|| (DEFAULT_SCENE.to_string(), None));
        let outcome = self.swap_scene(&destination, data, engine);
        if outcome.is_err() && self.current.is_none() {
            self.initialized = false;
            self.pending_destination = pending;
        }
        outcome
    }

    pub fn go_to_scene(
        &mut self,
        name: &str,
        engine: &EngineInfo,
    ) -> Result<NavigationOutcome, DirectorError> {
        self.swap_scene(name, None, engine)
    }

    /// Deactivates the current scene, initializes the destination if needed,
    /// activates it and only then moves the current pointer. If the
    /// destination fails, the previous scene is activated again.
    pub fn swap_scene(
        &mut self,
        name: &str,
        data: Option<Value>,
        engine: &EngineInfo,
    ) -> Result<NavigationOutcome, DirectorError> {
        if !self.initialized {
            info!(scene = name, "navigation_deferred");
            self.pending_destination = Some((name.to_string(), data));
            return Ok(NavigationOutcome::Deferred);
        }

        if !self.has_scene(name) {
            error!(scene = name, current = ?self.current, "navigation_unknown_scene");
            return Err(DirectorError::UnknownScene(name.to_string()));
        }

        if self.current.as_deref() == Some(name) {
            return Ok(NavigationOutcome::AlreadyCurrent);
        }

        self.events.clear();
        let from = self.current.clone();
        self.emit(NavigationEvent::NavigationStart {
            from: from.clone(),
            to: name.to_string(),
        });

        self.ensure_ready(name);
        let Some(SceneSlot::Ready(mut next)) = self.scenes.remove(name) else {
            return Err(DirectorError::UnknownScene(name.to_string()));
        };

        let activation = ActivationContext {
            previous_scene: from.as_deref(),
            next_scene: Some(name),
            current_scene: from.as_deref(),
            data: data.as_ref(),
        };

        if let Some(previous) = self.current_ready_mut() {
            if previous.is_initialized() {
                if let Err(source) = previous.deactivate(engine, &activation) {
                    self.scenes
                        .insert(name.to_string(), SceneSlot::Ready(next));
                    return Err(source.into());
                }
            }
        }

        let entered = next
            .initialize(engine)
            .and_then(|()| next.activate(engine, &activation));
        self.scenes
            .insert(name.to_string(), SceneSlot::Ready(next));

        if let Err(source) = entered {
            self.rollback(engine, from.as_deref(), name);
            return Err(source.into());
        }

        self.current = Some(name.to_string());
        info!(from = ?from, to = name, "scene_navigated");
        self.emit(NavigationEvent::Navigation {
            from: from.clone(),
            to: name.to_string(),
        });
        self.emit(NavigationEvent::NavigationEnd {
            from,
            to: name.to_string(),
        });
        Ok(NavigationOutcome::Completed)
    }

    /// Updates the current scene, if any.
    pub fn update(
        &mut self,
        engine: &EngineInfo,
        elapsed: Duration,
        default_physics: PhysicsConfig,
    ) -> Result<(), SceneError> {
        match self.current_ready_mut() {
            Some(scene) => scene.update(engine, elapsed, default_physics),
            None => Ok(()),
        }
    }

    fn rollback(&mut self, engine: &EngineInfo, previous: Option<&str>, failed: &str) {
        let Some(previous_name) = previous else {
            return;
        };
        let Some(scene) = self.current_ready_mut() else {
            return;
        };
        if scene.is_active() || !scene.is_initialized() {
            return;
        }
        let activation = ActivationContext {
            previous_scene: Some(failed),
            next_scene: Some(previous_name),
            current_scene: Some(previous_name),
            data: None,
        };
        match scene.activate(engine, &activation) {
            Ok(()) => warn!(scene = previous_name, failed, "navigation_rolled_back"),
            Err(error) => error!(
                scene = previous_name,
                error = %error,
                "navigation_rollback_failed"
            ),
        }
    }

    fn current_ready_mut(&mut self) -> Option<&mut Scene> {
        let name = self.current.as_deref()?;
        match self.scenes.get_mut(name)? {
            SceneSlot::Ready(scene) => Some(scene.as_mut()),
            SceneSlot::Pending(_) => None,
        }
    }

    fn ensure_ready(&mut self, name: &str) {
        if !matches!(self.scenes.get(name), Some(SceneSlot::Pending(_))) {
            return;
        }
        if let Some(SceneSlot::Pending(factory)) = self.scenes.remove(name) {
            let mut scene = factory();
            scene.set_name(name);
            info!(scene = name, "scene_instantiated");
            self.scenes
                .insert(name.to_string(), SceneSlot::Ready(Box::new(scene)));
        }
    }

    fn emit(&mut self, event: NavigationEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }
        self.events.push(event);
    }
}
