//! # Hostkit Plugin System
//!
//! An in-process plugin host for Hostkit: plugins are registered with a
//! [`PluginRegistry`], contribute named [`Command`]s, and every command in the
//! merged namespace can be invoked by tag, synchronously or on a worker.
//!
//! ## Features
//!
//! - **Lifecycle**: `on_start` / `on_loaded` / `on_stop` hooks, with stalled
//!   plugins kept registered but excluded from routing
//! - **Routing**: system commands first, then plugins in registration order;
//!   tags match case-insensitively
//! - **Arguments**: tokens classified into positional parameters, declared
//!   flags and `key=value` switches
//! - **Dispatcher**: an async request loop so hosts and plugins can queue
//!   commands without blocking each other
//! - **Configuration**: static in-memory or YAML-backed key/value stores
//!
//! ## Example
//!
//! ```rust,ignore
//! use hostkit_plugins::{PluginDescriptor, PluginRegistry, StaticConfig};
//! use std::sync::Arc;
//!
//! let registry = PluginRegistry::new(Arc::new(StaticConfig::new("host")));
//! registry.register_plugin("builtin.text", PluginDescriptor::of::<TextPlugin>());
//!
//! let result = registry.execute_command(None, "echo", &["hello".to_string()])?;
//! println!("{}", result.message);
//! ```

pub mod api;
pub mod cmdline;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod plugin;
pub mod registry;

// Re-exports for convenience
pub use api::{LogLevel, PluginContext, PluginLogger};
pub use commands::{Command, CommandHandler, CommandResult, ParsedArgs};
pub use config::{Config, ConfigError, ConfigValue, DynamicConfig, StaticConfig};
pub use dispatcher::{CommandDispatcher, DispatcherHandle};
pub use error::{PluginError, Result};
pub use plugin::{CommandKey, Plugin, PluginDescriptor, PluginExt, PluginState, PluginStatus};
pub use registry::PluginRegistry;
