//! Plugin host error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Plugin host errors.
#[derive(Error, Debug)]
pub enum PluginError {
    /// No system or plugin command matched the requested tag.
    #[error("Command not found: {tag}")]
    CommandNotFound { tag: String },

    /// Error raised by a command handler, passed through untouched.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),

    /// Plugin factory failed to build the plugin.
    #[error("Failed to instantiate plugin from module '{module}': {source}")]
    InstantiationFailed {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    /// Module id (or plugin name) is already registered.
    #[error("Plugin module already registered: {module}")]
    DuplicateRegistration { module: String },

    /// Configuration lookup failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The dispatcher task has stopped and no longer accepts requests.
    #[error("Command dispatcher is closed")]
    DispatcherClosed,

    /// The registry backing a plugin context has been dropped.
    #[error("Plugin registry is no longer available")]
    RegistryUnavailable,
}

impl PluginError {
    /// Create a command-not-found error.
    pub fn command_not_found(tag: impl Into<String>) -> Self {
        Self::CommandNotFound { tag: tag.into() }
    }

    /// Create an instantiation error.
    pub fn instantiation_failed(module: impl Into<String>, source: anyhow::Error) -> Self {
        Self::InstantiationFailed {
            module: module.into(),
            source,
        }
    }

    /// Create a duplicate registration error.
    pub fn duplicate_registration(module: impl Into<String>) -> Self {
        Self::DuplicateRegistration {
            module: module.into(),
        }
    }

    /// Tag carried by a [`PluginError::CommandNotFound`].
    pub fn missing_tag(&self) -> Option<&str> {
        match self {
            Self::CommandNotFound { tag } => Some(tag),
            _ => None,
        }
    }
}

/// Result type alias for plugin host operations.
pub type Result<T> = std::result::Result<T, PluginError>;
