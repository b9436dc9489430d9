use once_cell::sync::Lazy;
use regex::Regex;

use super::words;
use crate::protocol::{TextRange, Token};

const PYTHON: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
    "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import",
    "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while",
    "with", "yield",
];

const RUST: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "self", "Self", "static", "struct", "super", "trait", "true",
    "type", "unsafe", "use", "where", "while",
];

const JAVASCRIPT: &[&str] = &[
    "async", "await", "break", "case", "catch", "class", "const", "continue", "default",
    "delete", "do", "else", "export", "extends", "false", "finally", "for", "function", "if",
    "import", "in", "instanceof", "let", "new", "null", "return", "switch", "this", "throw",
    "true", "try", "typeof", "undefined", "var", "void", "while", "yield",
];

const TYPESCRIPT_EXTRA: &[&str] = &[
    "enum", "implements", "interface", "keyof", "namespace", "readonly", "type",
];

const STRING: &str = r#""(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'"#;

static STRINGS_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("(?P<string>{STRING})")).unwrap());
static HASH_COMMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?P<comment>#[^\n]*)|(?P<string>{STRING})")).unwrap()
});
static SLASH_COMMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?P<comment>//[^\n]*|(?s:/\*.*?\*/))|(?P<string>{STRING})")).unwrap()
});
static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:0[xX][0-9a-fA-F_]+|\d[\d_]*(?:\.\d+)?(?:[eE][+-]?\d+)?)\b").unwrap()
});

fn keywords_for(language: &str) -> Vec<&'static str> {
    match language.to_ascii_lowercase().as_str() {
        "python" | "py" => PYTHON.to_vec(),
        "rust" | "rs" => RUST.to_vec(),
        "javascript" | "js" => JAVASCRIPT.to_vec(),
        "typescript" | "ts" => JAVASCRIPT.iter().chain(TYPESCRIPT_EXTRA).copied().collect(),
        _ => Vec::new(),
    }
}

// Comments and strings share one alternation so that whichever starts
// first wins: a quote inside a comment opens no string and vice versa.
fn lexical_rule(language: &str) -> &'static Regex {
    match language.to_ascii_lowercase().as_str() {
        "python" | "py" | "shell" | "sh" | "bash" | "toml" | "yaml" => &*HASH_COMMENTS,
        "rust" | "rs" | "javascript" | "js" | "typescript" | "ts" | "c" | "cpp" | "go" | "java" => {
            &*SLASH_COMMENTS
        }
        _ => &*STRINGS_ONLY,
    }
}

/// Tokens overlapping `range`. Comments and strings are claimed first so
/// keywords and numbers inside them are not reported.
pub fn highlight(text: &str, language: &str, range: TextRange) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut claimed: Vec<(usize, usize)> = Vec::new();

    let mut claim = |start: usize, end: usize, kind: &str, tokens: &mut Vec<Token>| {
        if claimed.iter().any(|&(s, e)| start < e && end > s) {
            return;
        }
        claimed.push((start, end));
        if range.overlaps(start, end) {
            tokens.push(Token::new(start, end, kind, &text[start..end]));
        }
    };

    for caps in lexical_rule(language).captures_iter(text) {
        let (kind, m) = match (caps.name("comment"), caps.name("string")) {
            (Some(m), _) => ("comment", m),
            (None, Some(m)) => ("string", m),
            (None, None) => continue,
        };
        claim(m.start(), m.end(), kind, &mut tokens);
    }

    for m in NUMBER.find_iter(text) {
        claim(m.start(), m.end(), "number", &mut tokens);
    }

    let keywords = keywords_for(language);
    if !keywords.is_empty() {
        for (start, word) in words(text) {
            if keywords.contains(&word) {
                claim(start, start + word.len(), "keyword", &mut tokens);
            }
        }
    }

    tokens.sort_by_key(|token| token.start);
    tokens
}
