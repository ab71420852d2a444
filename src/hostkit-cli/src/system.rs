//! Host-level commands. These shadow any plugin command with the same tag.

use std::fmt::Write as _;
use std::sync::{Arc, Weak};

use hostkit_plugins::{Command, CommandResult, PluginError, PluginRegistry};

fn upgrade(registry: &Weak<PluginRegistry>) -> anyhow::Result<Arc<PluginRegistry>> {
    registry
        .upgrade()
        .ok_or_else(|| PluginError::RegistryUnavailable.into())
}

/// Build the system commands for `registry`.
pub fn commands(registry: &Arc<PluginRegistry>) -> Vec<Command> {
    vec![
        help(Arc::downgrade(registry)),
        list_commands(Arc::downgrade(registry)),
        plugins(Arc::downgrade(registry)),
        status(Arc::downgrade(registry)),
    ]
}

fn help(registry: Weak<PluginRegistry>) -> Command {
    Command::new("help")
        .with_description("Show available commands, or detailed help for one command")
        .with_handler(move |_, command, tokens| {
            let registry = upgrade(&registry)?;
            let parsed = command.classify(tokens);

            if let Some(tag) = parsed.parameter(0) {
                let target = registry.resolve(tag)?;
                return Ok(CommandResult::message(target.help_text()));
            }

            let mut out = String::from("Available commands:");
            for cmd in registry.get_commands() {
                let _ = write!(out, "\n  {:<12} {}", cmd.tag, cmd.summary());
            }
            Ok(CommandResult::message(out))
        })
}

fn list_commands(registry: Weak<PluginRegistry>) -> Command {
    Command::new("commands")
        .with_description(
            "List command tags, optionally filtered by a search string\n\
             With --args, match the search as a prefix of tags, flags and switches \
             and show each command's vocabulary.",
        )
        .with_argument("--args")
        .with_handler(move |_, command, tokens| {
            let registry = upgrade(&registry)?;
            let parsed = command.classify(tokens);
            let search = parsed.parameter(0).unwrap_or("");

            if !parsed.has_argument("--args") {
                let tags = registry.find_commands(search);
                return CommandResult::with_data(tags.join("\n"), &tags);
            }

            let mut lines = Vec::new();
            let mut data = serde_json::Map::new();
            for cmd in registry.find_commands_with_args(search) {
                let mut vocabulary = cmd.arguments.clone();
                vocabulary.extend(cmd.switches.keys().cloned());
                lines.push(format!("{} {}", cmd.tag, vocabulary.join(" ")).trim_end().to_string());
                data.insert(cmd.tag.clone(), serde_json::json!(vocabulary));
            }
            CommandResult::with_data(lines.join("\n"), &data)
        })
}

fn plugins(registry: Weak<PluginRegistry>) -> Command {
    Command::new("plugins")
        .with_description("List active plugins")
        .with_handler(move |_, _, _| {
            let registry = upgrade(&registry)?;
            let statuses = registry.list_status();

            let mut out = String::new();
            for status in &statuses {
                if !out.is_empty() {
                    out.push('\n');
                }
                let _ = write!(
                    out,
                    "{:<12} {:<10} {} command(s), module {}",
                    status.name,
                    status.state.to_string(),
                    status.command_count,
                    status.module_id
                );
            }
            if out.is_empty() {
                out.push_str("No plugins loaded");
            }
            CommandResult::with_data(out, &statuses)
        })
}

fn status(registry: Weak<PluginRegistry>) -> Command {
    Command::new("status")
        .with_description("Show registry status")
        .with_handler(move |_, _, _| {
            let registry = upgrade(&registry)?;
            let plugins = registry.plugin_count();
            let commands = registry.get_commands().len();
            let config = registry.config().name().to_string();

            CommandResult::with_data(
                format!("{plugins} plugin(s), {commands} command(s), config '{config}'"),
                &serde_json::json!({
                    "plugins": plugins,
                    "commands": commands,
                    "config": config,
                    "dispatcher": registry.dispatcher().is_some(),
                }),
            )
        })
}
