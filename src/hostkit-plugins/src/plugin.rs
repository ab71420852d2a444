//! Core plugin types and traits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::api::PluginContext;
use crate::commands::Command;

/// Trait for plugin implementations.
///
/// Lifecycle hooks run synchronously on the registering thread.
pub trait Plugin: Send + Sync {
    /// Plugin name, unique among active plugins (case-insensitive).
    fn name(&self) -> &str;

    /// Commands exposed by this plugin.
    ///
    /// Snapshotted once at registration; later changes are not observed.
    fn commands(&self) -> Vec<Command>;

    /// Called right after the plugin joins the registry. Returning `false`
    /// leaves the plugin registered but stalled: its commands never resolve.
    fn on_start(&self, ctx: &PluginContext) -> bool;

    /// Called once after a successful `on_start`.
    fn on_loaded(&self, _ctx: &PluginContext) {}

    /// Called after the plugin was removed from the registry. The return
    /// value is advisory; removal has already happened.
    fn on_stop(&self) -> bool {
        true
    }
}

/// Anything that names a command: a tag or a command itself.
pub trait CommandKey {
    /// The tag to look up.
    fn command_tag(&self) -> &str;
}

impl CommandKey for str {
    fn command_tag(&self) -> &str {
        self
    }
}

impl CommandKey for String {
    fn command_tag(&self) -> &str {
        self
    }
}

impl CommandKey for Command {
    fn command_tag(&self) -> &str {
        &self.tag
    }
}

/// Command lookup helpers available on every plugin.
pub trait PluginExt: Plugin {
    /// Check if the plugin exposes a command.
    fn has_command<K: CommandKey + ?Sized>(&self, key: &K) -> bool {
        let tag = key.command_tag();
        self.commands().iter().any(|c| c.matches(tag))
    }

    /// Get a command by tag.
    fn get_command<K: CommandKey + ?Sized>(&self, key: &K) -> Option<Command> {
        let tag = key.command_tag();
        self.commands().into_iter().find(|c| c.matches(tag))
    }
}

impl<P: Plugin + ?Sized> PluginExt for P {}

/// Plugin lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Built by its factory, `on_start` not yet returned
    Instantiated,
    /// `on_start` returned true, `on_loaded` pending
    Started,
    /// Fully loaded
    Loaded,
    /// `on_start` returned false
    Stalled,
    /// Removed from the registry
    Stopped,
}

impl PluginState {
    /// Whether commands of a plugin in this state take part in resolution.
    pub fn is_resolvable(self) -> bool {
        matches!(self, Self::Started | Self::Loaded)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instantiated => write!(f, "instantiated"),
            Self::Started => write!(f, "started"),
            Self::Loaded => write!(f, "loaded"),
            Self::Stalled => write!(f, "stalled"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

type PluginFactory = dyn Fn(PluginContext) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync;

/// How to build a plugin: its type name plus a factory.
#[derive(Clone)]
pub struct PluginDescriptor {
    type_name: String,
    factory: Arc<PluginFactory>,
}

impl PluginDescriptor {
    /// Describe a plugin built by `factory`.
    pub fn new<P, F>(factory: F) -> Self
    where
        P: Plugin + 'static,
        F: Fn(PluginContext) -> anyhow::Result<P> + Send + Sync + 'static,
    {
        Self {
            type_name: std::any::type_name::<P>().to_string(),
            factory: Arc::new(move |ctx| {
                let plugin: Arc<dyn Plugin> = Arc::new(factory(ctx)?);
                Ok(plugin)
            }),
        }
    }

    /// Describe a plugin built with `Default`.
    pub fn of<P>() -> Self
    where
        P: Plugin + Default + 'static,
    {
        Self::new(|_ctx| Ok(P::default()))
    }

    /// Describe an already-built instance.
    pub(crate) fn prebuilt(plugin: Arc<dyn Plugin>) -> Self {
        Self {
            type_name: format!("instance:{}", plugin.name()),
            factory: Arc::new(move |_ctx| Ok(plugin.clone())),
        }
    }

    /// Name of the plugin type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub(crate) fn instantiate(&self, ctx: PluginContext) -> anyhow::Result<Arc<dyn Plugin>> {
        (self.factory)(ctx)
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Snapshot of an active plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginStatus {
    /// Plugin name
    pub name: String,

    /// Module the plugin was registered from
    pub module_id: String,

    /// Plugin type name
    pub type_name: String,

    /// Current state
    pub state: PluginState,

    /// Number of commands exposed
    pub command_count: usize,

    /// When the plugin joined the registry
    pub registered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Greeter;

    impl Plugin for Greeter {
        fn name(&self) -> &str {
            "greeter"
        }

        fn commands(&self) -> Vec<Command> {
            vec![Command::new("hello"), Command::new("bye")]
        }

        fn on_start(&self, _ctx: &PluginContext) -> bool {
            true
        }
    }

    #[test]
    fn test_plugin_state_display() {
        assert_eq!(PluginState::Loaded.to_string(), "loaded");
        assert_eq!(PluginState::Stalled.to_string(), "stalled");
    }

    #[test]
    fn test_resolvable_states() {
        assert!(PluginState::Started.is_resolvable());
        assert!(PluginState::Loaded.is_resolvable());
        assert!(!PluginState::Instantiated.is_resolvable());
        assert!(!PluginState::Stalled.is_resolvable());
        assert!(!PluginState::Stopped.is_resolvable());
    }

    #[test]
    fn test_command_lookup_by_tag_and_command() {
        let plugin = Greeter;

        assert!(plugin.has_command("HELLO"));
        assert!(plugin.has_command(&"bye".to_string()));
        assert!(!plugin.has_command("missing"));

        let probe = Command::new("Hello");
        assert!(plugin.has_command(&probe));
        assert_eq!(plugin.get_command(&probe).map(|c| c.tag), Some("hello".to_string()));
        assert!(plugin.get_command("missing").is_none());
    }

    #[test]
    fn test_descriptor_type_name() {
        let descriptor = PluginDescriptor::of::<Greeter>();
        assert!(descriptor.type_name().ends_with("Greeter"));

        let prebuilt = PluginDescriptor::prebuilt(Arc::new(Greeter));
        assert_eq!(prebuilt.type_name(), "instance:greeter");
    }
}
