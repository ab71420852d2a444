//! Line-oriented command session over stdin.

use std::io::{IsTerminal, Write};

use tokio::io::{AsyncBufReadExt, BufReader};

use hostkit_plugins::cmdline;
use hostkit_plugins::{CommandResult, DispatcherHandle, Result};

/// Read commands from stdin until EOF or `exit`.
pub async fn run(dispatcher: &DispatcherHandle, prompt: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interactive = std::io::stdin().is_terminal();

    loop {
        if interactive {
            print!("{prompt}");
            std::io::stdout().flush()?;
        }

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let Some((tag, tokens)) = cmdline::split_command(&line) else {
            continue;
        };
        if tag.eq_ignore_ascii_case("exit") || tag.eq_ignore_ascii_case("quit") {
            break;
        }

        report(dispatcher.execute(None, tag, tokens).await);
    }

    Ok(())
}

/// Print a command outcome. Returns whether it succeeded.
pub fn report(outcome: Result<CommandResult>) -> bool {
    match outcome {
        Ok(result) => {
            if let Some(text) = render(&result) {
                println!("{text}");
            }
            true
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            false
        }
    }
}

fn render(result: &CommandResult) -> Option<String> {
    if !result.message.is_empty() {
        return Some(result.message.clone());
    }
    if result.result.is_null() {
        return None;
    }
    serde_json::to_string_pretty(&result.result).ok()
}
