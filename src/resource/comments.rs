//! Comment extraction and reattachment for block-style YAML
//!
//! The structured body of a resource is held as a plain `serde_yaml::Value`,
//! which drops comments on parse. This module recovers them: one
//! indentation-tracking line scanner assigns every content line a dotted
//! field path (`spec.containers[0].image`), and the same scanner drives both
//! directions — extracting head/line/foot comments keyed by path on read, and
//! inserting them back into freshly serialized YAML on write. Because both
//! sides compute paths with identical rules, a comment survives any rewrite
//! that keeps its node, regardless of indentation style changes.
//!
//! Flow-style collections and the interior of block scalars are opaque to the
//! scanner; comments there are not tracked.

use std::collections::{HashMap, HashSet};

/// Comments attached to one YAML node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentSet {
    /// Full-line comments immediately preceding the node.
    pub head: Vec<String>,
    /// Trailing comment on the node's own line.
    pub line: Option<String>,
}

/// All comments recovered from one YAML document, keyed by field path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentMap {
    nodes: HashMap<String, CommentSet>,
    /// Comments after the last content line of the document.
    pub foot: Vec<String>,
}

impl CommentMap {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.foot.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&CommentSet> {
        self.nodes.get(path)
    }

    #[cfg(test)]
    pub fn insert(&mut self, path: &str, set: CommentSet) {
        self.nodes.insert(path.to_string(), set);
    }
}

#[derive(Debug)]
enum LineKind {
    Blank,
    Comment { text: String },
    /// Content with a resolved field path (`None` for scalar continuations).
    Content {
        path: Option<String>,
        indent: usize,
        trailing: Option<String>,
    },
}

#[derive(Debug)]
enum Frame {
    Map {
        indent: usize,
        path: String,
        next_index: usize,
    },
    Item {
        indent: usize,
        path: String,
        next_index: usize,
    },
}

impl Frame {
    fn path(&self) -> &str {
        match self {
            Frame::Map { path, .. } | Frame::Item { path, .. } => path,
        }
    }
}

fn is_block_scalar_introducer(val: &str) -> bool {
    let mut chars = val.chars();
    matches!(chars.next(), Some('|') | Some('>'))
        && chars.all(|c| matches!(c, '+' | '-' | '0'..='9'))
}

/// Split `key: rest` respecting quoting; `None` when the line is not a
/// mapping entry.
fn split_key(content: &str) -> Option<(String, String)> {
    let bytes = content.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    for (i, c) in content.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ':' if !in_single && !in_double => {
                let next = bytes.get(i + 1);
                if next.is_none() || next == Some(&b' ') || next == Some(&b'\t') {
                    let raw = content[..i].trim();
                    if raw.is_empty() {
                        return None;
                    }
                    let key = raw.trim_matches(|q| q == '"' || q == '\'').to_string();
                    return Some((key, content[i + 1..].trim().to_string()));
                }
            }
            _ => {}
        }
    }
    None
}

/// Byte offset of a trailing comment in a content line, if any. A `#` starts
/// a comment only when preceded by whitespace and outside quotes.
fn trailing_comment_start(content: &str) -> Option<usize> {
    let mut in_single = false;
    let mut in_double = false;
    let mut prev_is_space = true;
    for (i, c) in content.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double && prev_is_space => return Some(i),
            _ => {}
        }
        prev_is_space = c == ' ' || c == '\t';
    }
    None
}

fn scan(text: &str) -> Vec<LineKind> {
    let mut out = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut root_index = 0usize;
    // While inside a block scalar, lines indented past this column are raw.
    let mut scalar_floor: Option<usize> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            out.push(LineKind::Blank);
            continue;
        }
        let indent = line.len() - trimmed.len();

        if let Some(floor) = scalar_floor {
            if indent > floor {
                out.push(LineKind::Content {
                    path: None,
                    indent,
                    trailing: None,
                });
                continue;
            }
            scalar_floor = None;
        }

        if trimmed.starts_with('#') {
            out.push(LineKind::Comment {
                text: trimmed.trim_end().to_string(),
            });
            continue;
        }

        if trimmed == "---" || trimmed == "..." {
            out.push(LineKind::Content {
                path: None,
                indent,
                trailing: None,
            });
            continue;
        }

        let (code, trailing) = match trailing_comment_start(trimmed) {
            Some(pos) => (
                trimmed[..pos].trim_end(),
                Some(trimmed[pos..].trim_end().to_string()),
            ),
            None => (trimmed.trim_end(), None),
        };

        let is_dash = code == "-" || code.starts_with("- ");
        while let Some(top) = stack.last() {
            let pop = match top {
                Frame::Map {
                    indent: frame_indent,
                    ..
                } => indent < *frame_indent || (indent == *frame_indent && !is_dash),
                Frame::Item {
                    indent: frame_indent,
                    ..
                } => indent <= *frame_indent,
            };
            if pop {
                stack.pop();
            } else {
                break;
            }
        }

        let path = if is_dash {
            let (parent_path, item_index) = match stack.last_mut() {
                Some(Frame::Map {
                    path, next_index, ..
                })
                | Some(Frame::Item {
                    path, next_index, ..
                }) => {
                    let n = *next_index;
                    *next_index += 1;
                    (path.clone(), n)
                }
                None => {
                    let n = root_index;
                    root_index += 1;
                    (String::new(), n)
                }
            };
            let item_path = format!("{parent_path}[{item_index}]");
            stack.push(Frame::Item {
                indent,
                path: item_path.clone(),
                next_index: 0,
            });

            let rest = code[1..].trim_start();
            if rest.is_empty() {
                Some(item_path)
            } else {
                let inline_indent = indent + (code.len() - rest.len());
                match split_key(rest) {
                    Some((key, val)) => {
                        let key_path = format!("{item_path}.{key}");
                        if val.is_empty() {
                            stack.push(Frame::Map {
                                indent: inline_indent,
                                path: key_path.clone(),
                                next_index: 0,
                            });
                        } else if is_block_scalar_introducer(&val) {
                            scalar_floor = Some(inline_indent);
                        }
                        Some(key_path)
                    }
                    None => {
                        if is_block_scalar_introducer(rest) {
                            scalar_floor = Some(indent);
                        }
                        Some(item_path)
                    }
                }
            }
        } else {
            match split_key(code) {
                Some((key, val)) => {
                    let parent = stack.last().map(|f| f.path().to_string());
                    let key_path = match parent {
                        Some(p) if !p.is_empty() => format!("{p}.{key}"),
                        _ => key,
                    };
                    if val.is_empty() {
                        stack.push(Frame::Map {
                            indent,
                            path: key_path.clone(),
                            next_index: 0,
                        });
                    } else if is_block_scalar_introducer(&val) {
                        scalar_floor = Some(indent);
                    }
                    Some(key_path)
                }
                // Plain scalar continuation or flow syntax we do not track.
                None => None,
            }
        };

        out.push(LineKind::Content {
            path,
            indent,
            trailing,
        });
    }

    out
}

/// Recover the comments of one YAML document.
pub fn extract(text: &str) -> CommentMap {
    let mut map = CommentMap::default();
    let mut pending: Vec<String> = Vec::new();

    for kind in scan(text) {
        match kind {
            LineKind::Comment { text } => pending.push(text),
            LineKind::Content {
                path: Some(path),
                trailing,
                ..
            } => {
                if pending.is_empty() && trailing.is_none() {
                    continue;
                }
                let set = map.nodes.entry(path).or_default();
                set.head.append(&mut pending);
                if trailing.is_some() {
                    set.line = trailing;
                }
            }
            LineKind::Blank | LineKind::Content { path: None, .. } => {}
        }
    }

    map.foot = pending;
    map
}

/// Reinsert comments into freshly serialized (comment-free) YAML.
pub fn attach(text: &str, comments: &CommentMap) -> String {
    if comments.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len() + 64);
    let mut used: HashSet<String> = HashSet::new();
    let lines: Vec<&str> = text.lines().collect();

    for (line, kind) in lines.iter().zip(scan(text)) {
        if let LineKind::Content {
            path: Some(path),
            indent,
            ..
        } = &kind
        {
            if let Some(set) = comments.nodes.get(path.as_str()) {
                if used.insert(path.clone()) {
                    for head in &set.head {
                        out.push_str(&" ".repeat(*indent));
                        out.push_str(head);
                        out.push('\n');
                    }
                    out.push_str(line);
                    if let Some(trailing) = &set.line {
                        out.push(' ');
                        out.push_str(trailing);
                    }
                    out.push('\n');
                    continue;
                }
            }
        }
        out.push_str(line);
        out.push('\n');
    }

    for foot in &comments.foot {
        out.push_str(foot);
        out.push('\n');
    }

    out
}
