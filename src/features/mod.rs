//! Feature functions answering each command.
//!
//! The dispatch loop only knows the [`FeatureProvider`] contract; the
//! [`DefaultFeatureProvider`] bundles the regex-based implementations below.

pub mod completion;
pub mod definition;
pub mod editorconfig;
pub mod highlight;
pub mod links;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;

use crate::protocol::{Command, FeatureResult, TextRange, Token};

pub trait FeatureProvider: Send + Sync + 'static {
    fn autocomplete(&self, text: &str, keywords: &[String], current_word: &str)
        -> Result<Vec<String>>;
    fn replacements(&self, text: &str, keywords: &[String], word: &str) -> Result<Vec<String>>;
    fn highlight(&self, text: &str, language: &str, range: TextRange) -> Result<Vec<Token>>;
    fn editorconfig(&self, path: &Path) -> Result<BTreeMap<String, String>>;
    fn definition(
        &self,
        text: &str,
        starters: &[(String, String)],
        current_word: &str,
    ) -> Result<Vec<Token>>;
    fn links_and_chars(&self, text: &str, range: TextRange) -> Result<Vec<Token>>;
}

#[derive(Debug, Default)]
pub struct DefaultFeatureProvider;

impl DefaultFeatureProvider {
    pub fn new() -> Self {
        Self
    }
}

impl FeatureProvider for DefaultFeatureProvider {
    fn autocomplete(
        &self,
        text: &str,
        keywords: &[String],
        current_word: &str,
    ) -> Result<Vec<String>> {
        Ok(completion::autocomplete(text, keywords, current_word))
    }

    fn replacements(&self, text: &str, keywords: &[String], word: &str) -> Result<Vec<String>> {
        Ok(completion::replacements(text, keywords, word))
    }

    fn highlight(&self, text: &str, language: &str, range: TextRange) -> Result<Vec<Token>> {
        Ok(highlight::highlight(text, language, range))
    }

    fn editorconfig(&self, path: &Path) -> Result<BTreeMap<String, String>> {
        editorconfig::resolve(path)
    }

    fn definition(
        &self,
        text: &str,
        starters: &[(String, String)],
        current_word: &str,
    ) -> Result<Vec<Token>> {
        definition::find_definitions(text, starters, current_word)
    }

    fn links_and_chars(&self, text: &str, range: TextRange) -> Result<Vec<Token>> {
        Ok(links::links_and_chars(text, range))
    }
}

/// Routes `command` to the matching provider method.
///
/// `text` is the document snapshot; commands that need no document get an
/// empty string.
pub fn invoke<P: FeatureProvider + ?Sized>(
    provider: &P,
    text: &str,
    command: &Command,
) -> Result<FeatureResult> {
    let result = match command {
        Command::Autocomplete {
            keywords,
            current_word,
        } => FeatureResult::Strings(provider.autocomplete(text, keywords, current_word)?),
        Command::Replacements { keywords, word } => {
            FeatureResult::Strings(provider.replacements(text, keywords, word)?)
        }
        Command::Highlight { language, range } => {
            FeatureResult::Tokens(provider.highlight(text, language, range.normalize(text))?)
        }
        Command::Editorconfig { path } => FeatureResult::Config(provider.editorconfig(path)?),
        Command::Definition {
            starters,
            current_word,
        } => {
            let mut tokens = provider.definition(text, starters, current_word)?;
            if tokens.len() == 1 {
                FeatureResult::Token(tokens.remove(0))
            } else {
                FeatureResult::Tokens(tokens)
            }
        }
        Command::LinksAndChars { range } => {
            FeatureResult::Tokens(provider.links_and_chars(text, range.normalize(text))?)
        }
    };
    Ok(result)
}

/// Byte-offset word scanner shared by the text features.
pub(crate) fn words(text: &str) -> impl Iterator<Item = (usize, &str)> {
    static WORD: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r"[\p{L}_][\p{L}\p{N}_]*").unwrap());
    WORD.find_iter(text).map(|m| (m.start(), m.as_str()))
}
