//! `.editorconfig` lookup for a single file path.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

const FILE_NAME: &str = ".editorconfig";

#[derive(Debug, Default, PartialEq)]
struct ConfigFile {
    root: bool,
    sections: Vec<Section>,
}

#[derive(Debug, PartialEq)]
struct Section {
    glob: String,
    properties: Vec<(String, String)>,
}

/// Properties that apply to `path`, merged from every `.editorconfig` between
/// the file and the nearest `root = true` file. Nearer files win, and within
/// a file later sections win.
pub fn resolve(path: &Path) -> Result<BTreeMap<String, String>> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("resolving relative editorconfig path")?
            .join(path)
    };

    let mut found: Vec<(PathBuf, ConfigFile)> = Vec::new();
    for dir in path.ancestors().skip(1) {
        let candidate = dir.join(FILE_NAME);
        let source = match fs::read_to_string(&candidate) {
            Ok(source) => source,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", candidate.display()));
            }
        };
        let config = parse(&source);
        let is_root = config.root;
        found.push((dir.to_path_buf(), config));
        if is_root {
            break;
        }
    }

    let mut properties = BTreeMap::new();
    for (dir, config) in found.iter().rev() {
        let Ok(relative) = path.strip_prefix(dir) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        for section in &config.sections {
            if !section_matches(&section.glob, &relative)? {
                continue;
            }
            for (key, value) in &section.properties {
                properties.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(properties)
}

fn parse(source: &str) -> ConfigFile {
    let mut config = ConfigFile::default();

    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(glob) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            config.sections.push(Section {
                glob: glob.to_owned(),
                properties: Vec::new(),
            });
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim().to_owned();
        match config.sections.last_mut() {
            Some(section) => section.properties.push((key, value)),
            None if key == "root" => config.root = value.eq_ignore_ascii_case("true"),
            None => {}
        }
    }
    config
}

fn section_matches(glob: &str, relative: &str) -> Result<bool> {
    let anchored = if let Some(stripped) = glob.strip_prefix('/') {
        stripped.to_owned()
    } else if glob.contains('/') {
        glob.to_owned()
    } else {
        format!("**/{glob}")
    };
    let pattern = format!("^{}$", glob_to_regex(&anchored));
    let regex = Regex::new(&pattern).with_context(|| format!("invalid section glob `{glob}`"))?;
    Ok(regex.is_match(relative))
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::new();
    let mut chars = glob.chars().peekable();
    let mut brace_depth = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    // `**/` also matches zero directories
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == ']' {
                        closed = true;
                        break;
                    }
                    class.push(next);
                }
                if closed && !class.is_empty() {
                    out.push('[');
                    let class = match class.strip_prefix('!') {
                        Some(negated) => {
                            out.push('^');
                            negated.to_owned()
                        }
                        None => class,
                    };
                    out.push_str(&class.replace('\\', "\\\\").replace('[', "\\["));
                    out.push(']');
                } else {
                    out.push_str(&regex::escape(&format!("[{class}")));
                    if closed {
                        out.push_str("\\]");
                    }
                }
            }
            '{' => {
                brace_depth += 1;
                out.push_str("(?:");
            }
            ',' if brace_depth > 0 => out.push('|'),
            '}' if brace_depth > 0 => {
                brace_depth -= 1;
                out.push(')');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    // Unbalanced `{` is treated as an empty alternative.
    for _ in 0..brace_depth {
        out.push(')');
    }
    out
}
