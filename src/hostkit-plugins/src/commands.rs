//! Command model and argument classification.
//!
//! A [`Command`] is one executable operation: a dispatch tag, help text, the
//! vocabulary of flags and `key=value` switches it understands, and an
//! optional handler. Commands owned by a plugin carry a weak back-reference to
//! it; commands without an owner are system commands.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::plugin::Plugin;
use crate::{PluginError, Result};

/// Command handler function type.
///
/// Receives the owning plugin (none for system commands), the command being
/// executed and the raw invocation tokens.
pub type CommandHandler = Arc<
    dyn Fn(Option<&Arc<dyn Plugin>>, &Command, &[String]) -> anyhow::Result<CommandResult>
        + Send
        + Sync,
>;

/// An executable command.
#[derive(Clone)]
pub struct Command {
    /// Dispatch key, matched case-insensitively
    pub tag: String,

    /// Long description
    pub description: String,

    /// One-line summary; derived from `description` when unset
    pub short_description: Option<String>,

    /// Declared flag tokens (exact match)
    pub arguments: Vec<String>,

    /// Declared switch keys (including the trailing `=`) and their accepted values
    pub switches: BTreeMap<String, Vec<String>>,

    handler: Option<CommandHandler>,

    owner: Option<Weak<dyn Plugin>>,
}

impl Command {
    /// Create a command with no handler bound.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            description: String::new(),
            short_description: None,
            arguments: Vec::new(),
            switches: BTreeMap::new(),
            handler: None,
            owner: None,
        }
    }

    /// Set the long description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the short description.
    pub fn with_short_description(mut self, short: impl Into<String>) -> Self {
        self.short_description = Some(short.into());
        self
    }

    /// Declare a flag token.
    pub fn with_argument(mut self, flag: impl Into<String>) -> Self {
        self.arguments.push(flag.into());
        self
    }

    /// Declare several flag tokens.
    pub fn with_arguments<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Declare a switch. `key` is written as it appears on the command line,
    /// including the trailing `=` (for example `--out=`). An empty value list
    /// accepts any value.
    ///
    /// Parsed switches are keyed by bare name, so a key whose bare name is
    /// already taken by another declared key (`/out=` after `--out=`) is
    /// ignored with a warning.
    pub fn with_switch<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = key.into();
        let name = switch_name(key.trim_end_matches('='));

        if let Some(existing) = self
            .switches
            .keys()
            .find(|k| **k != key && switch_name(k.trim_end_matches('=')) == name)
        {
            tracing::warn!(
                "Switch '{}' on command '{}' collides with '{}' and is ignored",
                key,
                self.tag,
                existing
            );
            return self;
        }

        self.switches
            .insert(key, values.into_iter().map(Into::into).collect());
        self
    }

    /// Bind the handler.
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Option<&Arc<dyn Plugin>>, &Command, &[String]) -> anyhow::Result<CommandResult>
            + Send
            + Sync
            + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Whether a handler is bound.
    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// The owning plugin, if this is a plugin command and the plugin is alive.
    pub fn owner(&self) -> Option<Arc<dyn Plugin>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    /// Whether this is a host-level command.
    pub fn is_system(&self) -> bool {
        self.owner.is_none()
    }

    pub(crate) fn bind_owner(&mut self, owner: Weak<dyn Plugin>) {
        self.owner = Some(owner);
    }

    /// Check if this command answers to `tag`.
    pub fn matches(&self, tag: &str) -> bool {
        eq_ignore_case(&self.tag, tag)
    }

    /// The one-line summary.
    pub fn summary(&self) -> &str {
        match &self.short_description {
            Some(short) => short,
            None => self.description.lines().next().unwrap_or("").trim(),
        }
    }

    // ========== Execution ==========

    /// Execute on the calling thread.
    ///
    /// A command without a handler yields an empty result.
    pub fn execute(&self, tokens: &[String]) -> Result<CommandResult> {
        let Some(handler) = &self.handler else {
            tracing::trace!("Command '{}' has no handler bound", self.tag);
            return Ok(CommandResult::default());
        };

        let owner = self.owner();
        handler(owner.as_ref(), self, tokens).map_err(PluginError::Handler)
    }

    /// Execute on the blocking worker pool.
    ///
    /// Must be awaited inside a tokio runtime. A panicking handler panics the
    /// awaiting task.
    pub async fn execute_async(&self, tokens: Vec<String>) -> Result<CommandResult> {
        let command = self.clone();
        join_outcome(tokio::task::spawn_blocking(move || command.execute(&tokens)).await)
    }

    // ========== Vocabulary ==========

    /// Check if `token` is a declared flag.
    pub fn is_argument(&self, token: &str) -> bool {
        self.arguments.iter().any(|a| a == token)
    }

    /// Check if `key` (written with its trailing `=`) is a declared switch.
    pub fn is_switch(&self, key: &str) -> bool {
        self.switches.contains_key(key)
    }

    /// Accepted values for a switch, looked up either by its declared key
    /// (`--out=`) or by its bare name (`out`).
    pub fn switch_domain(&self, name: &str) -> Option<&[String]> {
        if let Some(values) = self.switches.get(name) {
            return Some(values);
        }

        self.switches
            .iter()
            .find(|(key, _)| switch_name(key.trim_end_matches('=')) == name)
            .map(|(_, values)| values.as_slice())
    }

    /// Check a switch value against the declared domain.
    pub fn accepts_switch_value(&self, name: &str, value: &str) -> bool {
        match self.switch_domain(name) {
            Some(values) => values.is_empty() || values.iter().any(|v| v == value),
            None => false,
        }
    }

    /// Split invocation tokens into parameters, flags and switches.
    ///
    /// Blank tokens are dropped. Every remaining token is tested in order:
    /// declared flag, then declared switch, otherwise positional parameter.
    pub fn classify<S: AsRef<str>>(&self, tokens: &[S]) -> ParsedArgs {
        let mut parsed = ParsedArgs::default();

        for token in tokens.iter().map(AsRef::as_ref) {
            if token.trim().is_empty() {
                continue;
            }

            if self.is_argument(token) {
                parsed.arguments.push(token.to_string());
                continue;
            }

            match token.split_once('=') {
                Some((key, value)) if self.is_switch(&format!("{key}=")) => {
                    parsed
                        .switches
                        .insert(switch_name(key).to_string(), value.to_string());
                }
                _ => parsed.parameters.push(token.to_string()),
            }
        }

        parsed
    }

    /// Formatted help for this command.
    pub fn help_text(&self) -> String {
        let mut out = format!("{} - {}", self.tag, self.summary());

        if !self.description.is_empty() && self.description.trim() != self.summary() {
            out.push_str("\n\n");
            out.push_str(self.description.trim_end());
        }

        if !self.arguments.is_empty() {
            out.push_str("\n\nFlags:");
            for flag in &self.arguments {
                out.push_str(&format!("\n  {flag}"));
            }
        }

        if !self.switches.is_empty() {
            out.push_str("\n\nSwitches:");
            for (key, values) in &self.switches {
                if values.is_empty() {
                    out.push_str(&format!("\n  {key}<value>"));
                } else {
                    out.push_str(&format!("\n  {key}<{}>", values.join("|")));
                }
            }
        }

        out
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("tag", &self.tag)
            .field("short_description", &self.summary())
            .field("arguments", &self.arguments)
            .field("switches", &self.switches)
            .field("has_handler", &self.handler.is_some())
            .field("system", &self.is_system())
            .finish()
    }
}

/// Unwrap a joined blocking execution, re-raising handler panics.
pub(crate) fn join_outcome(
    joined: std::result::Result<Result<CommandResult>, tokio::task::JoinError>,
) -> Result<CommandResult> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(PluginError::Handler(anyhow::Error::new(e))),
    }
}

/// Case-insensitive comparison that also folds non-ASCII letters.
pub(crate) fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || (!(a.is_ascii() && b.is_ascii()) && a.to_lowercase() == b.to_lowercase())
}

/// Strip command-line markers from a switch key: `--out` becomes `out`.
fn switch_name(key: &str) -> &str {
    key.trim_start_matches(['-', '/'])
}

/// Classified invocation tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedArgs {
    /// Positional tokens, in order
    pub parameters: Vec<String>,

    /// Declared flags that were present, in order
    pub arguments: Vec<String>,

    /// Switch name (without markers) to value; a repeated switch keeps the last value
    pub switches: BTreeMap<String, String>,
}

impl ParsedArgs {
    /// Check whether a flag was passed.
    pub fn has_argument(&self, flag: &str) -> bool {
        self.arguments.iter().any(|a| a == flag)
    }

    /// Get a switch value by bare name.
    pub fn switch(&self, name: &str) -> Option<&str> {
        self.switches.get(name).map(String::as_str)
    }

    /// Get a positional parameter.
    pub fn parameter(&self, index: usize) -> Option<&str> {
        self.parameters.get(index).map(String::as_str)
    }
}

/// Result of a command execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResult<T = serde_json::Value> {
    /// Human-readable message
    pub message: String,

    /// Payload
    pub result: T,
}

impl<T> CommandResult<T> {
    /// Create a result.
    pub fn new(message: impl Into<String>, result: T) -> Self {
        Self {
            message: message.into(),
            result,
        }
    }
}

impl CommandResult {
    /// A result carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(message, serde_json::Value::Null)
    }

    /// A result with a serialized payload.
    pub fn with_data<T: Serialize>(message: impl Into<String>, data: &T) -> anyhow::Result<Self> {
        Ok(Self::new(message, serde_json::to_value(data)?))
    }

    /// Whether this is the empty result of a handler-less command.
    pub fn is_empty(&self) -> bool {
        self.message.is_empty() && self.result.is_null()
    }

    /// Convert the payload into a concrete type.
    pub fn into_typed<T: DeserializeOwned>(self) -> serde_json::Result<CommandResult<T>> {
        Ok(CommandResult {
            message: self.message,
            result: serde_json::from_value(self.result)?,
        })
    }
}
