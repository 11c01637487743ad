use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeyAlias {
    pub alias: &'static str,
    pub canonical: &'static str,
}

// Alias keys are lowercase and never collide with a real payload key.
pub const KEY_ALIASES: &[KeyAlias] = &[
    KeyAlias { alias: "acc", canonical: "accounts" },
    KeyAlias { alias: "aid", canonical: "accountID" },
    KeyAlias { alias: "cand", canonical: "candidates" },
    KeyAlias { alias: "cfg", canonical: "config" },
    KeyAlias { alias: "cid", canonical: "chatID" },
    KeyAlias { alias: "dn", canonical: "displayName" },
    KeyAlias { alias: "it", canonical: "items" },
    KeyAlias { alias: "lm", canonical: "lastMessage" },
    KeyAlias { alias: "mid", canonical: "messageID" },
    KeyAlias { alias: "nw", canonical: "network" },
    KeyAlias { alias: "pmid", canonical: "pendingMessageID" },
    KeyAlias { alias: "rd", canonical: "relativeDate" },
    KeyAlias { alias: "sn", canonical: "senderName" },
    KeyAlias { alias: "snd", canonical: "sender" },
    KeyAlias { alias: "ti", canonical: "title" },
    KeyAlias { alias: "ts", canonical: "timestamp" },
    KeyAlias { alias: "tx", canonical: "text" },
    KeyAlias { alias: "u", canonical: "user" },
];

static ALIAS_MAP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    KEY_ALIASES
        .iter()
        .map(|entry| (entry.alias, entry.canonical))
        .collect()
});

#[derive(Clone, Debug, Default)]
pub struct JsonQueryOptions {
    pub query_paths: Vec<String>,
    pub fields: Vec<String>,
}

impl JsonQueryOptions {
    pub fn has_transforms(&self) -> bool {
        !self.query_paths.is_empty() || !self.fields.is_empty()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum PathSegment {
    Key(String),
    Index(usize),
    Wildcard,
}

/// Projection first narrows array items to `fields`, then `query_paths` select from the result.
pub fn apply_json_transforms(mut value: Value, options: &JsonQueryOptions) -> Result<Value, String> {
    if !options.fields.is_empty() {
        value = project_fields(value, &options.fields)?;
    }
    if !options.query_paths.is_empty() {
        value = apply_query_paths(&value, &options.query_paths)?;
    }
    Ok(value)
}

fn apply_query_paths(value: &Value, paths: &[String]) -> Result<Value, String> {
    if paths.len() == 1 {
        return select_path_value(value, &paths[0]);
    }

    let mut out = Map::new();
    for path in paths {
        out.insert(path.clone(), select_path_value(value, path)?);
    }
    Ok(Value::Object(out))
}

fn select_path_value(value: &Value, path: &str) -> Result<Value, String> {
    let segments = parse_path(path)?;
    let mut matches = select_segments(value, &segments);
    Ok(match matches.len() {
        0 => Value::Null,
        1 => matches.pop().unwrap_or(Value::Null),
        _ => Value::Array(matches),
    })
}

fn select_segments(value: &Value, segments: &[PathSegment]) -> Vec<Value> {
    let mut current = vec![value.clone()];
    for segment in segments {
        let mut next = Vec::new();
        for item in current {
            match (segment, &item) {
                (PathSegment::Key(key), Value::Object(object)) => {
                    if let Some(found) = object.get(key) {
                        next.push(found.clone());
                    }
                }
                (PathSegment::Index(idx), Value::Array(array)) => {
                    if let Some(found) = array.get(*idx) {
                        next.push(found.clone());
                    }
                }
                (PathSegment::Wildcard, Value::Array(array)) => next.extend(array.iter().cloned()),
                (PathSegment::Wildcard, Value::Object(object)) => {
                    next.extend(object.values().cloned())
                }
                _ => {}
            }
        }
        current = next;
        if current.is_empty() {
            break;
        }
    }
    current
}

fn project_fields(value: Value, fields: &[String]) -> Result<Value, String> {
    let parsed = fields
        .iter()
        .map(|field| parse_path(field).map(|segments| (projection_label(field, &segments), segments)))
        .collect::<Result<Vec<_>, _>>()?;

    let project = |item: &Value| {
        let mut out = Map::new();
        for (label, segments) in &parsed {
            let mut found = select_segments(item, segments);
            let value = match found.len() {
                0 => Value::Null,
                1 => found.pop().unwrap_or(Value::Null),
                _ => Value::Array(found),
            };
            out.insert(label.clone(), value);
        }
        Value::Object(out)
    };

    Ok(match value {
        Value::Array(items) => Value::Array(items.iter().map(project).collect()),
        Value::Object(mut object) => match object.remove("items") {
            Some(Value::Array(items)) => {
                object.insert(
                    "items".to_string(),
                    Value::Array(items.iter().map(project).collect()),
                );
                Value::Object(object)
            }
            Some(other) => {
                object.insert("items".to_string(), other);
                project(&Value::Object(object))
            }
            None => project(&Value::Object(object)),
        },
        other => other,
    })
}

fn projection_label(raw: &str, segments: &[PathSegment]) -> String {
    match segments.last() {
        Some(PathSegment::Key(key)) if segments.len() == 1 => key.clone(),
        _ => raw.trim().to_string(),
    }
}

/// Dot/bracket path with aliases expanded on bare identifiers only; quoted keys are literal.
fn parse_path(path: &str) -> Result<Vec<PathSegment>, String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err("path cannot be empty".to_string());
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let mut idx = 0;
    let mut segments = Vec::new();

    if chars.first() == Some(&'$') {
        idx += 1;
    }

    while idx < chars.len() {
        match chars[idx] {
            '.' => idx += 1,
            '[' => {
                let (segment, next) = parse_bracket_segment(&chars, idx)?;
                segments.push(segment);
                idx = next;
            }
            ch if is_ident_start(ch) => {
                let start = idx;
                while idx < chars.len() && is_ident_char(chars[idx]) {
                    idx += 1;
                }
                let token: String = chars[start..idx].iter().collect();
                segments.push(PathSegment::Key(rewrite_token(&token).to_string()));
            }
            ch => return Err(format!("unsupported token '{ch}' in path '{trimmed}'")),
        }
    }

    Ok(segments)
}

fn parse_bracket_segment(chars: &[char], start: usize) -> Result<(PathSegment, usize), String> {
    let close = chars[start..]
        .iter()
        .position(|ch| *ch == ']')
        .map(|offset| start + offset)
        .ok_or_else(|| "unterminated bracket segment".to_string())?;
    let inner: String = chars[start + 1..close].iter().collect();
    let token = inner.trim();

    let segment = if let Some(quoted) = strip_quotes(token) {
        PathSegment::Key(quoted.to_string())
    } else if token.is_empty() || token == "*" {
        PathSegment::Wildcard
    } else if token.chars().all(|ch| ch.is_ascii_digit()) {
        PathSegment::Index(
            token
                .parse::<usize>()
                .map_err(|_| format!("invalid index '{token}'"))?,
        )
    } else if token.chars().next().is_some_and(is_ident_start) && token.chars().all(is_ident_char) {
        PathSegment::Key(rewrite_token(token).to_string())
    } else {
        return Err(format!(
            "unsupported bracket expression '{token}' (use dot paths, indexes, *, or quoted keys)"
        ));
    };

    Ok((segment, close + 1))
}

fn strip_quotes(token: &str) -> Option<&str> {
    ['"', '\''].into_iter().find_map(|quote| {
        token
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
    })
}

fn rewrite_token(token: &str) -> &str {
    ALIAS_MAP.get(token).copied().unwrap_or(token)
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}
