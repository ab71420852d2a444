//! Command-line tokenization for interactive input.

/// Split a line into tokens, honoring shell-style quoting.
///
/// Lines with unbalanced quotes still tokenize: they split on whitespace and
/// each token loses one pair of surrounding quotes.
pub fn tokenize(line: &str) -> Vec<String> {
    match shlex::split(line) {
        Some(tokens) => tokens,
        None => line
            .split_whitespace()
            .map(|token| trim_quotes(token).to_string())
            .collect(),
    }
}

/// Split a line into a command tag and its tokens.
pub fn split_command(line: &str) -> Option<(String, Vec<String>)> {
    let mut tokens = tokenize(line);
    if tokens.is_empty() {
        return None;
    }
    let tag = tokens.remove(0);
    Some((tag, tokens))
}

fn trim_quotes(token: &str) -> &str {
    for quote in ['"', '\''] {
        if token.len() >= 2 && token.starts_with(quote) && token.ends_with(quote) {
            return &token[1..token.len() - 1];
        }
    }
    token
}
