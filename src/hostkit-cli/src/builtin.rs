//! Plugins shipped with the host.

use std::sync::{Arc, OnceLock};

use hostkit_plugins::{Command, CommandResult, Plugin, PluginContext};

/// Module id the text plugin is registered under.
pub const TEXT_MODULE: &str = "builtin.text";

const DEFAULT_SEPARATOR: &str = " ";

/// Small text utilities: `echo` and `count`.
#[derive(Default)]
pub struct TextPlugin {
    separator: Arc<OnceLock<String>>,
}

impl TextPlugin {
    fn separator(slot: &OnceLock<String>) -> &str {
        slot.get().map(String::as_str).unwrap_or(DEFAULT_SEPARATOR)
    }
}

impl Plugin for TextPlugin {
    fn name(&self) -> &str {
        "text"
    }

    fn commands(&self) -> Vec<Command> {
        let separator = self.separator.clone();

        let echo = Command::new("echo")
            .with_description(
                "Print the parameters back\n\
                 Joins the positional parameters with the separator from the \
                 `echo_separator` config key (a space by default).",
            )
            .with_argument("--upper")
            .with_switch("--sep=", Vec::<String>::new())
            .with_handler(move |_, command, tokens| {
                let parsed = command.classify(tokens);
                let sep = parsed
                    .switch("sep")
                    .unwrap_or_else(|| Self::separator(&separator));

                let mut text = parsed.parameters.join(sep);
                if parsed.has_argument("--upper") {
                    text = text.to_uppercase();
                }
                Ok(CommandResult::message(text))
            });

        let count = Command::new("count")
            .with_description("Count parameters and their characters")
            .with_handler(|_, command, tokens| {
                let parsed = command.classify(tokens);
                let chars: usize = parsed.parameters.iter().map(|p| p.chars().count()).sum();
                CommandResult::with_data(
                    format!("{} parameters, {} characters", parsed.parameters.len(), chars),
                    &serde_json::json!({
                        "parameters": parsed.parameters.len(),
                        "characters": chars,
                    }),
                )
            });

        vec![echo, count]
    }

    fn on_start(&self, ctx: &PluginContext) -> bool {
        if let Ok(sep) = ctx.config().get_string("echo_separator") {
            let _ = self.separator.set(sep);
        }
        ctx.log().ok("text utilities ready");
        true
    }
}
