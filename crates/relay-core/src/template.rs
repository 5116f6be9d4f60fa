//! Placeholder substitution for action configs.
//!
//! Every string leaf of an action config is scanned for `{{identifier}}`
//! tokens, which are replaced with the stringified event field of that name.
//! Identifiers may be dotted paths into nested fields (`{{author.name}}`).
//! Whitespace inside the braces is ignored.
//!
//! [`render`] is lenient: a token naming a missing field is left in place
//! verbatim. [`render_strict`] fails instead.

use relay_types::error::TemplateError;
use relay_types::value::{ConfigMap, ConfigValue, lookup_path};

/// Render every string leaf of `config` against `fields`. Never fails.
pub fn render(config: &ConfigMap, fields: &ConfigMap) -> ConfigMap {
    config
        .iter()
        .map(|(key, value)| (key.clone(), render_value_lenient(value, fields)))
        .collect()
}

/// Render like [`render`] but fail on the first token naming a missing field.
pub fn render_strict(config: &ConfigMap, fields: &ConfigMap) -> Result<ConfigMap, TemplateError> {
    config
        .iter()
        .map(|(key, value)| Ok((key.clone(), render_value_strict(value, fields)?)))
        .collect()
}

/// Render a single template string leniently.
pub fn render_str(template: &str, fields: &ConfigMap) -> String {
    // Lenient substitution cannot fail.
    substitute(template, fields, false).unwrap_or_else(|_| template.to_string())
}

/// Identifiers referenced by `{{...}}` tokens anywhere in `config`, in
/// first-seen order without duplicates.
pub fn placeholders(config: &ConfigMap) -> Vec<String> {
    let mut found = Vec::new();
    for value in config.values() {
        collect_placeholders(value, &mut found);
    }
    found
}

fn render_value_lenient(value: &ConfigValue, fields: &ConfigMap) -> ConfigValue {
    match value {
        ConfigValue::String(s) => ConfigValue::String(render_str(s, fields)),
        ConfigValue::List(items) => ConfigValue::List(
            items
                .iter()
                .map(|item| render_value_lenient(item, fields))
                .collect(),
        ),
        ConfigValue::Map(map) => ConfigValue::Map(render(map, fields)),
        other => other.clone(),
    }
}

fn render_value_strict(value: &ConfigValue, fields: &ConfigMap) -> Result<ConfigValue, TemplateError> {
    Ok(match value {
        ConfigValue::String(s) => ConfigValue::String(substitute(s, fields, true)?),
        ConfigValue::List(items) => ConfigValue::List(
            items
                .iter()
                .map(|item| render_value_strict(item, fields))
                .collect::<Result<_, _>>()?,
        ),
        ConfigValue::Map(map) => ConfigValue::Map(render_strict(map, fields)?),
        other => other.clone(),
    })
}

fn collect_placeholders(value: &ConfigValue, found: &mut Vec<String>) {
    match value {
        ConfigValue::String(s) => {
            for token in Tokens::new(s) {
                if let Segment::Token { ident, .. } = token {
                    if !found.iter().any(|f| f == ident) {
                        found.push(ident.to_string());
                    }
                }
            }
        }
        ConfigValue::List(items) => items.iter().for_each(|v| collect_placeholders(v, found)),
        ConfigValue::Map(map) => map.values().for_each(|v| collect_placeholders(v, found)),
        _ => {}
    }
}

fn substitute(template: &str, fields: &ConfigMap, strict: bool) -> Result<String, TemplateError> {
    if !template.contains("{{") {
        return Ok(template.to_string());
    }

    let mut out = String::with_capacity(template.len());
    for segment in Tokens::new(template) {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Token { raw, ident } => match lookup_path(fields, ident) {
                Some(value) => out.push_str(&value.to_template_string()),
                None if strict => return Err(TemplateError::MissingField(ident.to_string())),
                None => out.push_str(raw),
            },
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    /// `raw` is the full `{{ ... }}` text, `ident` the trimmed identifier.
    Token { raw: &'a str, ident: &'a str },
}

/// Splits a string into literal runs and well-formed placeholder tokens.
///
/// Unterminated `{{`, empty identifiers, and identifiers with characters
/// outside `[A-Za-z0-9_.-]` are emitted as literals.
struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s }
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        let Some(open) = self.rest.find("{{") else {
            let literal = self.rest;
            self.rest = "";
            return Some(Segment::Literal(literal));
        };

        if open > 0 {
            let literal = &self.rest[..open];
            self.rest = &self.rest[open..];
            return Some(Segment::Literal(literal));
        }

        // `rest` starts with "{{".
        let body = &self.rest[2..];
        if let Some(close) = body.find("}}") {
            let ident = body[..close].trim();
            if is_identifier(ident) {
                let raw = &self.rest[..close + 4];
                self.rest = &self.rest[close + 4..];
                return Some(Segment::Token { raw, ident });
            }
        }

        // Not a token: emit one brace and rescan so "{{{{x}}" still finds "{{x}}".
        let literal = &self.rest[..1];
        self.rest = &self.rest[1..];
        Some(Segment::Literal(literal))
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
