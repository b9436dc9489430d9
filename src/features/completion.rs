use std::collections::HashSet;

use super::words;

/// Keywords and document words that extend `current_word`.
pub fn autocomplete(text: &str, keywords: &[String], current_word: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    let keywords = keywords.iter().map(String::as_str);
    let document = words(text).map(|(_, word)| word);
    for candidate in keywords.chain(document) {
        if candidate.starts_with(current_word)
            && candidate != current_word
            && seen.insert(candidate)
        {
            candidates.push(candidate.to_owned());
        }
    }
    candidates
}

/// Keywords and document words that look like misspellings of `word`:
/// edit distance one or two, ignoring case. Closest first.
pub fn replacements(text: &str, keywords: &[String], word: &str) -> Vec<String> {
    let target = word.to_lowercase();
    let mut seen = HashSet::new();
    let mut scored = Vec::new();

    let keywords = keywords.iter().map(String::as_str);
    let document = words(text).map(|(_, word)| word);
    for candidate in keywords.chain(document) {
        if candidate == word || !seen.insert(candidate) {
            continue;
        }
        let distance = levenshtein(&target, &candidate.to_lowercase());
        if (1..=2).contains(&distance) {
            scored.push((distance, candidate.to_owned()));
        }
    }
    scored.sort();
    scored.into_iter().map(|(_, candidate)| candidate).collect()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                diagonal
            } else {
                1 + diagonal.min(above).min(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}
