use anyhow::{Context, Result};
use regex::Regex;

use crate::protocol::Token;

/// Definition sites of `current_word`.
///
/// Each starter is a pair of regex fragments matched immediately before and
/// after the word, e.g. `("def\\s+", "\\s*\\(")`. Tokens cover the word only
/// and are ordered by position, without duplicates.
pub fn find_definitions(
    text: &str,
    starters: &[(String, String)],
    current_word: &str,
) -> Result<Vec<Token>> {
    if current_word.is_empty() {
        return Ok(Vec::new());
    }

    let mut tokens: Vec<Token> = Vec::new();
    for (before, after) in starters {
        let pattern = format!(
            "(?m){before}(?P<word>{}){after}",
            regex::escape(current_word)
        );
        let regex = Regex::new(&pattern)
            .with_context(|| format!("invalid definition starter ({before:?}, {after:?})"))?;
        for caps in regex.captures_iter(text) {
            if let Some(word) = caps.name("word") {
                tokens.push(Token::new(word.start(), word.end(), "definition", word.as_str()));
            }
        }
    }

    tokens.sort_by_key(|token| token.start);
    tokens.dedup_by_key(|token| token.start);
    Ok(tokens)
}
