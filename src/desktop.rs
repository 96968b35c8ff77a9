//! Minimal key file parsing for `.desktop` and `.directory` files.
//!
//! The reader keeps every group of the file so that the loader can pick the
//! `[Desktop Entry]` group or its legacy `[KDE Desktop Entry]` spelling. Localized keys
//! (`Name[de]`) are stored as written and are never consulted by the engine.

// -- std imports
use std::collections::HashMap;

/// A parsed key file: ordered groups, each a key-value map.
#[derive(Debug, Default, Clone)]
pub struct KeyFile {
    groups: Vec<(String, HashMap<String, String>)>,
}

impl KeyFile {
    /// Parse key file content.
    ///
    /// - Ignores blank lines and comments (`#` as first non-whitespace char).
    /// - Ignores keys that appear before the first group header.
    /// - Keeps keys exactly as written (no lowercasing); a later duplicate wins.
    pub fn parse(content: &str) -> Self {
        let mut groups: Vec<(String, HashMap<String, String>)> = Vec::new();

        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let name = &line[1..line.len() - 1];
                groups.push((name.to_string(), HashMap::new()));
                continue;
            }

            let Some((_, current)) = groups.last_mut() else {
                continue;
            };

            if let Some((k, v)) = line.split_once('=') {
                current.insert(k.trim().to_string(), v.trim().to_string());
            }
        }

        Self { groups }
    }

    /// Returns the first group called `name`, if any.
    pub fn group(&self, name: &str) -> Option<Group<'_>> {
        self.groups
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, map)| Group { map })
    }

    /// Whether a group called `name` exists.
    pub fn has_group(&self, name: &str) -> bool {
        self.group(name).is_some()
    }
}

/// Borrowed view on one key file group.
#[derive(Debug, Clone, Copy)]
pub struct Group<'a> {
    map: &'a HashMap<String, String>,
}

impl<'a> Group<'a> {
    /// Raw (still escaped) value of `key`.
    pub fn raw(&self, key: &str) -> Option<&'a String> {
        self.map.get(key)
    }

    /// Unescaped string value of `key`.
    pub fn string(&self, key: &str) -> Option<String> {
        self.raw(key).map(|v| unescape_string(v))
    }

    /// Boolean value of `key`; missing or invalid values read as `false`.
    pub fn boolean(&self, key: &str) -> bool {
        parse_bool(self.raw(key))
    }

    /// String list value of `key`.
    pub fn string_list(&self, key: &str) -> Option<Vec<String>> {
        self.raw(key).map(|v| parse_string_list(v))
    }
}

/// Parse a `.desktop` boolean string.
///
/// Only `true` and `1` are truthy; everything else, including a missing key, is `false`.
pub fn parse_bool(v: Option<&String>) -> bool {
    matches!(v.map(|s| s.trim()), Some("true") | Some("1"))
}

/// Resolve the escape sequences allowed in key file string values.
///
/// `\s`, `\n`, `\t`, `\r` and `\\` are translated; any other escape is kept verbatim.
pub fn unescape_string(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    let mut chars = v.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}

/// Split a `;`-separated string list.
///
/// `\;` yields a literal semicolon inside an element, a trailing empty element is dropped,
/// and every element is unescaped.
pub fn parse_string_list(v: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = v.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&';') => {
                chars.next();
                current.push(';');
            }
            '\\' => {
                current.push('\\');
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ';' => items.push(unescape_string(&std::mem::take(&mut current))),
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        items.push(unescape_string(&current));
    }

    items
}
