// ABOUTME: Resolves {{task_id.field}} references against recorded task results
// ABOUTME: Rewrites strings inside nested task configuration in a single pass

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::warn;

use super::result::TaskResult;

/// Substituted for references that cannot be resolved
pub const UNRESOLVED: &str = "[UNRESOLVED]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub task_id: String,
    pub field: String,
    start: usize,
    end: usize,
}

fn is_reference_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

/// Split at the last dot that leaves both sides non-empty
fn split_reference(body: &str) -> Option<(&str, &str)> {
    body.rmatch_indices('.')
        .map(|(pos, _)| pos)
        .find(|&pos| pos > 0 && pos + 1 < body.len())
        .map(|pos| (&body[..pos], &body[pos + 1..]))
}

/// Non-overlapping references in `text`, left to right
pub fn find_placeholders(text: &str) -> Vec<Placeholder> {
    let mut found = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find("{{") {
        let start = cursor + offset;
        let body_start = start + 2;
        let body_len: usize = text[body_start..]
            .chars()
            .take_while(|c| is_reference_char(*c))
            .map(char::len_utf8)
            .sum();
        let body_end = body_start + body_len;

        if text[body_end..].starts_with("}}") {
            if let Some((task_id, field)) = split_reference(&text[body_start..body_end]) {
                found.push(Placeholder {
                    task_id: task_id.to_string(),
                    field: field.to_string(),
                    start,
                    end: body_end + 2,
                });
                cursor = body_end + 2;
                continue;
            }
        }
        cursor = start + 1;
    }

    found
}

pub struct PlaceholderResolver<'a> {
    results: &'a IndexMap<String, TaskResult>,
}

impl<'a> PlaceholderResolver<'a> {
    pub fn new(results: &'a IndexMap<String, TaskResult>) -> Self {
        Self { results }
    }

    pub fn resolve_config(&self, config: &Map<String, Value>) -> Map<String, Value> {
        config
            .iter()
            .map(|(key, value)| (key.clone(), self.resolve_value(value)))
            .collect()
    }

    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.resolve_str(text)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.resolve_value(item)).collect())
            }
            Value::Object(map) => Value::Object(self.resolve_config(map)),
            other => other.clone(),
        }
    }

    pub fn resolve_str(&self, text: &str) -> String {
        let placeholders = find_placeholders(text);
        if placeholders.is_empty() {
            return text.to_string();
        }

        let mut resolved = String::with_capacity(text.len());
        let mut last = 0;
        for placeholder in placeholders {
            resolved.push_str(&text[last..placeholder.start]);
            resolved.push_str(&self.lookup(&placeholder));
            last = placeholder.end;
        }
        resolved.push_str(&text[last..]);
        resolved
    }

    fn lookup(&self, placeholder: &Placeholder) -> String {
        let value = self
            .results
            .get(&placeholder.task_id)
            .and_then(|result| result.field(&placeholder.field));

        match value {
            Some(Value::String(text)) => text,
            Some(other) => other.to_string(),
            None => {
                warn!(
                    "Unresolved placeholder {{{{{}.{}}}}}",
                    placeholder.task_id, placeholder.field
                );
                UNRESOLVED.to_string()
            }
        }
    }
}
