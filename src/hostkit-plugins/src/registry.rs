//! Plugin registry: lifecycle management and command routing.
//!
//! The registry owns three collections: installed plugin descriptors keyed by
//! module id, the ordered list of active plugin instances, and the host-level
//! system commands. All of them live behind one `RwLock`; registration and
//! removal are further serialized by a re-entrant lifecycle lock so that
//! plugin hooks run inside the registration critical section without holding
//! the state lock (hooks may dispatch commands or register other plugins).
//!
//! Command resolution is lazy and first-match: system commands shadow plugin
//! commands with the same tag, and among plugins the one registered first wins.
//! No collision check happens at registration time.

use chrono::{DateTime, Utc};
use parking_lot::{ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use crate::api::PluginContext;
use crate::commands::{Command, CommandResult, eq_ignore_case};
use crate::config::Config;
use crate::dispatcher::DispatcherHandle;
use crate::plugin::{Plugin, PluginDescriptor, PluginState, PluginStatus};
use crate::{PluginError, Result};

/// An active plugin and its bound commands.
struct PluginEntry {
    module_id: String,
    type_name: String,
    plugin: Arc<dyn Plugin>,
    commands: Vec<Arc<Command>>,
    state: PluginState,
    registered_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryState {
    installed: HashMap<String, PluginDescriptor>,
    active: Vec<PluginEntry>,
    system_commands: Vec<Arc<Command>>,
}

/// Registry for plugins and the merged command namespace.
pub struct PluginRegistry {
    config: Arc<dyn Config>,
    state: RwLock<RegistryState>,
    lifecycle: ReentrantMutex<()>,
    dispatcher: OnceLock<DispatcherHandle>,
    weak_self: Weak<PluginRegistry>,
}

impl PluginRegistry {
    /// Create a registry. The host keeps the returned `Arc` and hands it to
    /// whatever needs it.
    pub fn new(config: Arc<dyn Config>) -> Arc<Self> {
        match config.get_string("log_directory") {
            Ok(dir) => tracing::debug!("Plugin registry created, log directory: {}", dir),
            Err(_) => tracing::debug!("Plugin registry created with config '{}'", config.name()),
        }

        Arc::new_cyclic(|weak_self| Self {
            config,
            state: RwLock::new(RegistryState::default()),
            lifecycle: ReentrantMutex::new(()),
            dispatcher: OnceLock::new(),
            weak_self: weak_self.clone(),
        })
    }

    /// Host configuration.
    pub fn config(&self) -> &dyn Config {
        self.config.as_ref()
    }

    // ========== Registration ==========

    /// Build and start a plugin from `descriptor`.
    ///
    /// Failures are logged, never returned: a module id that is already
    /// installed, a plugin name that is already active, or a factory error
    /// all leave the registry unchanged. Check [`Self::has_plugin`] to confirm.
    pub fn register_plugin(&self, module_id: impl Into<String>, descriptor: PluginDescriptor) {
        let module_id = module_id.into();
        let _guard = self.lifecycle.lock();

        tracing::debug!(
            "Loading plugin {} from module {}",
            descriptor.type_name(),
            module_id
        );

        if self.is_installed(&module_id) {
            self.log_duplicate(&module_id, descriptor.type_name());
            return;
        }

        let ctx = self.context_for(&module_id);
        let plugin = match descriptor.instantiate(ctx.clone()) {
            Ok(plugin) => plugin,
            Err(source) => {
                let err = PluginError::instantiation_failed(&module_id, source);
                tracing::error!(
                    fatal = true,
                    module = %module_id,
                    "The plugin {} could not be loaded: {:#}",
                    descriptor.type_name(),
                    err
                );
                return;
            }
        };

        self.activate(module_id, descriptor, plugin, ctx);
    }

    /// Start an already-built plugin.
    pub fn register_instance(&self, module_id: impl Into<String>, plugin: Arc<dyn Plugin>) {
        let module_id = module_id.into();
        let _guard = self.lifecycle.lock();

        if self.is_installed(&module_id) {
            self.log_duplicate(&module_id, plugin.name());
            return;
        }

        let ctx = self.context_for(&module_id);
        let descriptor = PluginDescriptor::prebuilt(plugin.clone());
        self.activate(module_id, descriptor, plugin, ctx);
    }

    fn activate(
        &self,
        module_id: String,
        descriptor: PluginDescriptor,
        plugin: Arc<dyn Plugin>,
        ctx: PluginContext,
    ) {
        let name = plugin.name().to_string();
        ctx.bind_name(&name);

        let commands = bind_commands(&plugin);

        {
            let mut state = self.state.write();

            // A factory may have registered the same module re-entrantly.
            if state.installed.contains_key(&module_id) {
                drop(state);
                self.log_duplicate(&module_id, &name);
                return;
            }

            if state
                .active
                .iter()
                .any(|e| eq_ignore_case(e.plugin.name(), &name))
            {
                let err = PluginError::duplicate_registration(&module_id);
                tracing::error!(
                    "Plugin {} could not be loaded: an active plugin is already named '{}' ({})",
                    descriptor.type_name(),
                    name,
                    err
                );
                return;
            }

            state.active.push(PluginEntry {
                module_id: module_id.clone(),
                type_name: descriptor.type_name().to_string(),
                plugin: plugin.clone(),
                commands,
                state: PluginState::Instantiated,
                registered_at: Utc::now(),
            });
            state.installed.insert(module_id.clone(), descriptor);
        }

        let mut rollback = StartGuard {
            registry: self,
            module_id: &module_id,
            armed: true,
        };

        let started = plugin.on_start(&ctx);

        if !started {
            rollback.armed = false;
            if self.set_state(&module_id, PluginState::Stalled) {
                tracing::warn!(
                    "Plugin {} did not start; it stays registered but its commands are disabled",
                    name
                );
            }
            return;
        }

        // on_start may have removed the plugin again
        if !self.set_state(&module_id, PluginState::Started) {
            rollback.armed = false;
            tracing::debug!("Plugin {} left the registry while starting", name);
            return;
        }

        plugin.on_loaded(&ctx);
        rollback.armed = false;

        if self.set_state(&module_id, PluginState::Loaded) {
            tracing::info!("Registered plugin: {} (module {})", name, module_id);
        }
    }

    fn is_installed(&self, module_id: &str) -> bool {
        self.state.read().installed.contains_key(module_id)
    }

    fn log_duplicate(&self, module_id: &str, what: &str) {
        let err = PluginError::duplicate_registration(module_id);
        tracing::error!(
            "Plugin {} could not be loaded: {}. Remove it before registering it again.",
            what,
            err
        );
    }

    fn context_for(&self, module_id: &str) -> PluginContext {
        PluginContext::new(module_id, self.config.clone(), self.weak_self.clone())
    }

    /// Move an entry to `new_state`. Returns false if the entry is gone.
    fn set_state(&self, module_id: &str, new_state: PluginState) -> bool {
        let mut state = self.state.write();
        let Some(entry) = state.active.iter_mut().find(|e| e.module_id == module_id) else {
            return false;
        };
        tracing::trace!(
            "Plugin {}: {} -> {}",
            entry.plugin.name(),
            entry.state,
            new_state
        );
        entry.state = new_state;
        true
    }

    // ========== Removal ==========

    /// Remove the plugin registered from `module_id` and stop it.
    ///
    /// Returns false (and changes nothing) if no such plugin is active;
    /// otherwise returns what `on_stop` returned. Removal happens regardless.
    pub fn remove_plugin(&self, module_id: &str) -> bool {
        let _guard = self.lifecycle.lock();

        let entry = {
            let mut state = self.state.write();
            let Some(index) = state.active.iter().position(|e| e.module_id == module_id) else {
                return false;
            };
            state.installed.remove(module_id);
            state.active.remove(index)
        };

        let stopped = entry.plugin.on_stop();
        tracing::info!(
            state = %PluginState::Stopped,
            "Removed plugin: {} (module {}, clean stop: {})",
            entry.plugin.name(),
            entry.module_id,
            stopped
        );
        stopped
    }

    /// Remove a plugin by instance.
    pub fn remove_instance(&self, plugin: &Arc<dyn Plugin>) -> bool {
        let _guard = self.lifecycle.lock();

        let module_id = {
            let state = self.state.read();
            state
                .active
                .iter()
                .find(|e| same_plugin(&e.plugin, plugin))
                .map(|e| e.module_id.clone())
        };

        match module_id {
            Some(module_id) => self.remove_plugin(&module_id),
            None => false,
        }
    }

    /// Stop every plugin, most recently registered first.
    pub fn shutdown(&self) -> Vec<(String, bool)> {
        let _guard = self.lifecycle.lock();

        let modules: Vec<String> = {
            let state = self.state.read();
            state.active.iter().rev().map(|e| e.module_id.clone()).collect()
        };

        modules
            .into_iter()
            .map(|module_id| {
                let stopped = self.remove_plugin(&module_id);
                if !stopped {
                    tracing::warn!("Plugin module {} did not stop cleanly", module_id);
                }
                (module_id, stopped)
            })
            .collect()
    }

    // ========== Lookup ==========

    /// Check that exactly one active plugin has this name (case-insensitive).
    pub fn has_plugin(&self, name: &str) -> bool {
        let state = self.state.read();
        state
            .active
            .iter()
            .filter(|e| eq_ignore_case(e.plugin.name(), name))
            .count()
            == 1
    }

    /// Get an active plugin by name (case-insensitive).
    pub fn get_instance(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        let state = self.state.read();
        state
            .active
            .iter()
            .find(|e| eq_ignore_case(e.plugin.name(), name))
            .map(|e| e.plugin.clone())
    }

    /// Get an active plugin by registration position.
    pub fn get_instance_at(&self, index: usize) -> Option<Arc<dyn Plugin>> {
        self.state.read().active.get(index).map(|e| e.plugin.clone())
    }

    /// Get the active plugin registered from `module_id`.
    pub fn get_instance_by_module(&self, module_id: &str) -> Option<Arc<dyn Plugin>> {
        let state = self.state.read();
        state
            .active
            .iter()
            .find(|e| e.module_id == module_id)
            .map(|e| e.plugin.clone())
    }

    /// Lifecycle state of a plugin by name.
    pub fn plugin_state(&self, name: &str) -> Option<PluginState> {
        let state = self.state.read();
        state
            .active
            .iter()
            .find(|e| eq_ignore_case(e.plugin.name(), name))
            .map(|e| e.state)
    }

    /// Installed module ids, sorted.
    pub fn installed_modules(&self) -> Vec<String> {
        let mut modules: Vec<String> = self.state.read().installed.keys().cloned().collect();
        modules.sort();
        modules
    }

    /// Number of active plugins.
    pub fn plugin_count(&self) -> usize {
        self.state.read().active.len()
    }

    /// Status of every active plugin, in registration order.
    pub fn list_status(&self) -> Vec<PluginStatus> {
        let state = self.state.read();
        state
            .active
            .iter()
            .map(|e| PluginStatus {
                name: e.plugin.name().to_string(),
                module_id: e.module_id.clone(),
                type_name: e.type_name.clone(),
                state: e.state,
                command_count: e.commands.len(),
                registered_at: e.registered_at,
            })
            .collect()
    }

    // ========== System commands ==========

    /// Replace the host-level commands.
    pub fn set_system_commands(&self, commands: Vec<Command>) {
        self.state.write().system_commands = commands.into_iter().map(Arc::new).collect();
    }

    /// Add a host-level command.
    pub fn add_system_command(&self, command: Command) {
        self.state.write().system_commands.push(Arc::new(command));
    }

    /// Host-level commands.
    pub fn system_commands(&self) -> Vec<Arc<Command>> {
        self.state.read().system_commands.clone()
    }

    // ========== Namespace ==========

    /// System commands followed by the commands of every plugin whose
    /// commands resolve. Not deduplicated.
    pub fn get_commands(&self) -> Vec<Arc<Command>> {
        let state = self.state.read();
        state
            .system_commands
            .iter()
            .chain(
                state
                    .active
                    .iter()
                    .filter(|e| e.state.is_resolvable())
                    .flat_map(|e| e.commands.iter()),
            )
            .cloned()
            .collect()
    }

    /// System commands followed by the commands of every active plugin,
    /// stalled ones included.
    pub fn get_all_commands(&self) -> Vec<Arc<Command>> {
        let state = self.state.read();
        state
            .system_commands
            .iter()
            .chain(state.active.iter().flat_map(|e| e.commands.iter()))
            .cloned()
            .collect()
    }

    /// Tags of resolvable commands containing `search` (all tags if empty).
    pub fn find_commands(&self, search: &str) -> Vec<String> {
        self.get_commands()
            .iter()
            .filter(|c| search.is_empty() || c.tag.contains(search))
            .map(|c| c.tag.clone())
            .collect()
    }

    /// Resolvable commands whose tag, a flag or a switch key starts with
    /// `prefix` (case-insensitive). Each match appears once, with its full
    /// vocabulary; an empty prefix matches everything.
    pub fn find_commands_with_args(&self, prefix: &str) -> Vec<Arc<Command>> {
        let prefix = prefix.to_lowercase();
        let starts = |text: &str| text.to_lowercase().starts_with(&prefix);

        self.get_commands()
            .into_iter()
            .filter(|c| {
                starts(&c.tag)
                    || c.arguments.iter().any(|a| starts(a))
                    || c.switches.keys().any(|k| starts(k))
            })
            .collect()
    }

    /// Resolve a tag: system commands first, then plugins in registration order.
    pub fn resolve(&self, tag: &str) -> Result<Arc<Command>> {
        let state = self.state.read();

        let found = state.system_commands.iter().find(|c| c.matches(tag)).or_else(|| {
            state
                .active
                .iter()
                .filter(|e| e.state.is_resolvable())
                .flat_map(|e| e.commands.iter())
                .find(|c| c.matches(tag))
        });

        found
            .cloned()
            .ok_or_else(|| PluginError::command_not_found(tag))
    }

    // ========== Dispatch ==========

    /// Resolve and run a command on the calling thread.
    pub fn execute_command(
        &self,
        caller: Option<&str>,
        tag: &str,
        tokens: &[String],
    ) -> Result<CommandResult> {
        let command = self.resolve(tag).inspect_err(|_| {
            tracing::debug!("{} requested unknown command '{}'", caller.unwrap_or("host"), tag);
        })?;

        tracing::debug!(
            "{} executing command '{}'",
            caller.unwrap_or("host"),
            command.tag
        );
        command.execute(tokens)
    }

    /// Resolve and run a command on a worker.
    pub async fn execute_command_async(
        &self,
        caller: Option<&str>,
        tag: &str,
        tokens: Vec<String>,
    ) -> Result<CommandResult> {
        let command = self.resolve(tag).inspect_err(|_| {
            tracing::debug!("{} requested unknown command '{}'", caller.unwrap_or("host"), tag);
        })?;

        tracing::debug!(
            "{} executing command '{}' asynchronously",
            caller.unwrap_or("host"),
            command.tag
        );
        command.execute_async(tokens).await
    }

    /// Dispatcher attached by [`crate::CommandDispatcher::spawn`], if any.
    pub fn dispatcher(&self) -> Option<DispatcherHandle> {
        self.dispatcher.get().cloned()
    }

    pub(crate) fn attach_dispatcher(&self, handle: DispatcherHandle) -> bool {
        self.dispatcher.set(handle).is_ok()
    }
}

fn bind_commands(plugin: &Arc<dyn Plugin>) -> Vec<Arc<Command>> {
    let owner = Arc::downgrade(plugin);
    plugin
        .commands()
        .into_iter()
        .map(|mut command| {
            command.bind_owner(owner.clone());
            Arc::new(command)
        })
        .collect()
}

/// Drops a half-registered plugin if a start hook unwinds.
struct StartGuard<'a> {
    registry: &'a PluginRegistry,
    module_id: &'a str,
    armed: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut state = self.registry.state.write();
        state.installed.remove(self.module_id);
        state.active.retain(|e| e.module_id != self.module_id);
        tracing::error!(
            "Plugin module {} panicked while starting; registration rolled back",
            self.module_id
        );
    }
}

fn same_plugin(a: &Arc<dyn Plugin>, b: &Arc<dyn Plugin>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
