use once_cell::sync::Lazy;
use regex::Regex;

use crate::protocol::{TextRange, Token};

static LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:https?://|www\.)[^\s<>"'`()\[\]{}]+[^\s<>"'`()\[\]{}.,;:!?]"#).unwrap()
});

fn is_suspicious(c: char) -> bool {
    match c {
        '\n' | '\t' | '\r' => false,
        '\u{00A0}' | '\u{00AD}' | '\u{2007}' | '\u{202F}' | '\u{FEFF}' => true,
        '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2060}'..='\u{2064}' => true,
        '\u{2066}'..='\u{2069}' => true,
        c => c.is_control(),
    }
}

/// Links and invisible or bidi-control characters inside `range`.
///
/// `range` must already be normalized against `text`.
pub fn links_and_chars(text: &str, range: TextRange) -> Vec<Token> {
    let mut tokens = Vec::new();

    for m in LINK.find_iter(text) {
        if range.overlaps(m.start(), m.end()) {
            tokens.push(Token::new(m.start(), m.end(), "link", m.as_str()));
        }
    }

    let window = &text[range.start..range.end];
    for (offset, c) in window.char_indices() {
        if is_suspicious(c) {
            let start = range.start + offset;
            tokens.push(Token::new(
                start,
                start + c.len_utf8(),
                "char",
                format!("U+{:04X}", c as u32),
            ));
        }
    }

    tokens.sort_by_key(|token| token.start);
    tokens
}
