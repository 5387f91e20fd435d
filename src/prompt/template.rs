//! Brace-style placeholder rendering
//!
//! Templates use `{name}` placeholders, with `{{` and `}}` as literal braces.
//! A format spec or conversion (`{name:>10}`, `{name!r}`) is accepted but
//! ignored; only the name is looked up.

use thiserror::Error;

/// Template rendering errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Single '{{' encountered in format string at byte {0}")]
    UnmatchedOpen(usize),

    #[error("Single '}}' encountered in format string at byte {0}")]
    UnmatchedClose(usize),

    #[error("Positional field at byte {0} is not supported; use a named placeholder")]
    PositionalField(usize),

    #[error("Missing value for placeholder '{0}'")]
    MissingKey(String),
}

/// What to do when a placeholder has no value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingKey {
    Empty,
    Fail,
}

/// Render a template, substituting an empty string for unknown placeholders
pub fn safe_format<'a, F>(template: &str, lookup: F) -> Result<String, TemplateError>
where
    F: Fn(&str) -> Option<&'a str>,
{
    render(template, lookup, MissingKey::Empty)
}

/// Render a template, failing on the first placeholder without a value
pub fn format_strict<'a, F>(template: &str, lookup: F) -> Result<String, TemplateError>
where
    F: Fn(&str) -> Option<&'a str>,
{
    render(template, lookup, MissingKey::Fail)
}

/// Whether `{key}` appears literally in the template
pub fn contains_placeholder(template: &str, key: &str) -> bool {
    template.contains(&format!("{{{}}}", key))
}

fn render<'a, F>(template: &str, lookup: F, missing: MissingKey) -> Result<String, TemplateError>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let at = offset + pos;
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            offset = at + 2;
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            offset = at + 2;
            continue;
        }
        if tail.starts_with('}') {
            return Err(TemplateError::UnmatchedClose(at));
        }

        let close = tail.find('}').ok_or(TemplateError::UnmatchedOpen(at))?;
        let field = &tail[1..close];
        if field.contains('{') {
            return Err(TemplateError::UnmatchedOpen(at));
        }

        let name = field
            .split(|c: char| c == ':' || c == '!')
            .next()
            .unwrap_or_default()
            .trim();
        if name.is_empty() {
            return Err(TemplateError::PositionalField(at));
        }

        match lookup(name) {
            Some(value) => out.push_str(value),
            None if missing == MissingKey::Empty => {}
            None => return Err(TemplateError::MissingKey(name.to_string())),
        }

        rest = &tail[close + 1..];
        offset = at + close + 1;
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn values() -> HashMap<String, String> {
        HashMap::from([
            ("lang".to_string(), "python".to_string()),
            ("code".to_string(), "eval(x)".to_string()),
        ])
    }

    #[test]
    fn test_substitutes_known_keys() {
        let map = values();
        let out = safe_format("Fix this {lang} code:\n{code}", |k| map.get(k).map(String::as_str)).unwrap();
        assert_eq!(out, "Fix this python code:\neval(x)");
    }

    #[test]
    fn test_missing_key_renders_empty() {
        let map = values();
        let out = safe_format("[{question}]", |k| map.get(k).map(String::as_str)).unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_escaped_braces() {
        let map = values();
        let out = safe_format("{{\"lang\": \"{lang}\"}}", |k| map.get(k).map(String::as_str)).unwrap();
        assert_eq!(out, "{\"lang\": \"python\"}");
    }

    #[test]
    fn test_format_spec_is_ignored() {
        let map = values();
        let out = safe_format("{lang:>10}|{code!r}", |k| map.get(k).map(String::as_str)).unwrap();
        assert_eq!(out, "python|eval(x)");
    }

    #[test]
    fn test_malformed_templates_fail() {
        let map = values();
        let lookup = |k: &str| map.get(k).map(String::as_str);
        assert_eq!(safe_format("a { b", lookup), Err(TemplateError::UnmatchedOpen(2)));
        assert_eq!(safe_format("a } b", lookup), Err(TemplateError::UnmatchedClose(2)));
        assert_eq!(safe_format("x {} y", lookup), Err(TemplateError::PositionalField(2)));
    }

    #[test]
    fn test_strict_format_reports_missing_key() {
        let result = format_strict("{code} and {lang}", |k| (k == "code").then_some(""));
        assert_eq!(result, Err(TemplateError::MissingKey("lang".to_string())));
        assert_eq!(format_strict("<{code}>", |_| Some("")).unwrap(), "<>");
    }

    #[test]
    fn test_contains_placeholder() {
        assert!(contains_placeholder("Code:\n{vulnerable_code}", "vulnerable_code"));
        assert!(!contains_placeholder("Code:\n{vulnerable_code}", "code"));
    }

    #[test]
    fn test_unicode_passthrough() {
        let map = values();
        let out = safe_format("→ {lang} ✓", |k| map.get(k).map(String::as_str)).unwrap();
        assert_eq!(out, "→ python ✓");
    }
}
