//! Capabilities handed to plugins.
//!
//! Plugins do not inherit from a base type. Instead each plugin factory and
//! lifecycle hook receives a [`PluginContext`] bundling a logger, the host
//! configuration and a way to run commands owned by anyone else.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use crate::commands::CommandResult;
use crate::config::Config;
use crate::registry::PluginRegistry;
use crate::{PluginError, Result};

/// Who a context belongs to. The name is only known once the factory ran.
#[derive(Debug)]
struct Identity {
    module_id: String,
    name: OnceLock<String>,
}

impl Identity {
    fn label(&self) -> &str {
        self.name.get().map(String::as_str).unwrap_or(&self.module_id)
    }
}

/// Context provided to plugins.
#[derive(Clone)]
pub struct PluginContext {
    identity: Arc<Identity>,
    logger: PluginLogger,
    config: Arc<dyn Config>,
    registry: Weak<PluginRegistry>,
}

impl PluginContext {
    pub(crate) fn new(
        module_id: impl Into<String>,
        config: Arc<dyn Config>,
        registry: Weak<PluginRegistry>,
    ) -> Self {
        let identity = Arc::new(Identity {
            module_id: module_id.into(),
            name: OnceLock::new(),
        });

        Self {
            logger: PluginLogger {
                identity: identity.clone(),
            },
            identity,
            config,
            registry,
        }
    }

    /// Record the plugin name once the plugin has been built.
    pub(crate) fn bind_name(&self, name: &str) {
        let _ = self.identity.name.set(name.to_string());
    }

    /// Module the plugin was registered from.
    pub fn module_id(&self) -> &str {
        &self.identity.module_id
    }

    /// Plugin name, or the module id while the plugin is being built.
    pub fn plugin_name(&self) -> &str {
        self.identity.label()
    }

    /// Logger tagged with this plugin.
    pub fn log(&self) -> &PluginLogger {
        &self.logger
    }

    /// Host configuration.
    pub fn config(&self) -> &dyn Config {
        self.config.as_ref()
    }

    /// The registry, if it is still alive.
    pub fn registry(&self) -> Option<Arc<PluginRegistry>> {
        self.registry.upgrade()
    }

    /// Run any command on the calling thread.
    pub fn execute_command<S: AsRef<str>>(&self, tag: &str, tokens: &[S]) -> Result<CommandResult> {
        let registry = self.registry().ok_or(PluginError::RegistryUnavailable)?;
        let tokens: Vec<String> = tokens.iter().map(|t| t.as_ref().to_string()).collect();
        registry.execute_command(Some(self.plugin_name()), tag, &tokens)
    }

    /// Run any command on a worker.
    ///
    /// Goes through the host's dispatcher when one is attached, otherwise
    /// straight to the registry.
    pub async fn execute_command_async(
        &self,
        tag: &str,
        tokens: Vec<String>,
    ) -> Result<CommandResult> {
        let registry = self.registry().ok_or(PluginError::RegistryUnavailable)?;

        match registry.dispatcher() {
            Some(dispatcher) => {
                dispatcher
                    .execute(Some(self.plugin_name().to_string()), tag, tokens)
                    .await
            }
            None => {
                registry
                    .execute_command_async(Some(self.plugin_name()), tag, tokens)
                    .await
            }
        }
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("module_id", &self.identity.module_id)
            .field("plugin", &self.identity.name.get())
            .field("config", &self.config.name())
            .finish()
    }
}

/// Log level for plugin logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Ok,
}

/// Fire-and-forget logger tagged with the owning plugin.
#[derive(Clone)]
pub struct PluginLogger {
    identity: Arc<Identity>,
}

impl PluginLogger {
    /// Log at `level`.
    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        let plugin = self.identity.label();
        match level {
            LogLevel::Trace => tracing::trace!(plugin, "{}", message),
            LogLevel::Debug => tracing::debug!(plugin, "{}", message),
            LogLevel::Info => tracing::info!(plugin, "{}", message),
            LogLevel::Warn => tracing::warn!(plugin, "{}", message),
            LogLevel::Error => tracing::error!(plugin, "{}", message),
            LogLevel::Fatal => tracing::error!(plugin, fatal = true, "{}", message),
            LogLevel::Ok => tracing::info!(plugin, outcome = "ok", "{}", message),
        }
    }

    pub fn trace(&self, message: impl fmt::Display) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message);
    }

    pub fn fatal(&self, message: impl fmt::Display) {
        self.log(LogLevel::Fatal, message);
    }

    /// Success-level message.
    pub fn ok(&self, message: impl fmt::Display) {
        self.log(LogLevel::Ok, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfig;

    fn detached_context() -> PluginContext {
        PluginContext::new("mod.test", Arc::new(StaticConfig::new("test")), Weak::new())
    }

    #[test]
    fn test_name_falls_back_to_module() {
        let ctx = detached_context();
        assert_eq!(ctx.plugin_name(), "mod.test");

        ctx.bind_name("tester");
        assert_eq!(ctx.plugin_name(), "tester");
        assert_eq!(ctx.module_id(), "mod.test");

        // first name sticks
        ctx.bind_name("other");
        assert_eq!(ctx.clone().plugin_name(), "tester");
    }

    #[test]
    fn test_execute_without_registry() {
        let ctx = detached_context();
        let err = ctx.execute_command("status", &["x"]).unwrap_err();
        assert!(matches!(err, PluginError::RegistryUnavailable));
    }

    #[test]
    fn test_logger_never_fails() {
        let ctx = detached_context();
        for level in [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
            LogLevel::Fatal,
            LogLevel::Ok,
        ] {
            ctx.log().log(level, "message");
        }
        ctx.log().ok(format_args!("{} done", 3));
    }

    #[test]
    fn test_log_level_serde() {
        let level: LogLevel = serde_json::from_str("\"fatal\"").unwrap();
        assert_eq!(level, LogLevel::Fatal);
        assert_eq!(serde_json::to_string(&LogLevel::Ok).unwrap(), "\"ok\"");
    }
}
