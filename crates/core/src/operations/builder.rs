//! Command template rendering.
//!
//! Substitutes `{name}` placeholders in an operation's command template with
//! values from a submission's parameter map. Two renderings are produced:
//!
//! - the flat command string, persisted as `executed_command` and fed to the
//!   [`validator`](super::validator);
//! - an argument vector, built by splitting the *template* into shell words
//!   first and substituting inside each word afterwards, so a parameter value
//!   can never introduce extra arguments or shell syntax.
//!
//! Values are inserted verbatim (no escaping). Placeholders without a matching
//! parameter are left intact.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Regex pattern matching `{placeholder}` tokens in command templates.
pub const PLACEHOLDER_PATTERN: &str = r"\{([^{}\s]+)\}";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PLACEHOLDER_PATTERN).expect("valid regex"));

/// Parameter map consumed by the builder (field name to scalar value).
pub type Parameters = Map<String, Value>;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A fully rendered command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommand {
    /// The flat command string with every resolvable placeholder substituted.
    pub command: String,
    /// Program followed by its arguments, ready to spawn without a shell.
    pub argv: Vec<String>,
}

/// Errors raised when a template cannot be turned into an argument vector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("command template has unbalanced quotes: {0}")]
    UnbalancedQuotes(String),

    #[error("command template is empty")]
    Empty,
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render `template` into a flat command string.
///
/// Single pass: substituted values are never re-scanned for placeholders, so
/// the output depends only on `template` and `params`.
pub fn render(template: &str, params: &Parameters) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| match params.get(&caps[1]) {
            Some(value) => stringify(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Render `template` into both a command string and an argument vector.
pub fn build(template: &str, params: &Parameters) -> Result<RenderedCommand, TemplateError> {
    let words = shell_words::split(template)
        .map_err(|_| TemplateError::UnbalancedQuotes(template.to_string()))?;
    if words.is_empty() {
        return Err(TemplateError::Empty);
    }

    let argv = words.iter().map(|word| render(word, params)).collect();

    Ok(RenderedCommand {
        command: render(template, params),
        argv,
    })
}

/// Extract all placeholder names from a template, de-duplicated and sorted.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = PLACEHOLDER_RE
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Placeholders in `template` that `params` does not supply.
pub fn unresolved(template: &str, params: &Parameters) -> Vec<String> {
    placeholders(template)
        .into_iter()
        .filter(|name| !params.contains_key(name))
        .collect()
}

/// Stringify a parameter value for insertion into a command.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn params(value: Value) -> Parameters {
        match value {
            Value::Object(map) => map,
            _ => panic!("test params must be an object"),
        }
    }

    #[test]
    fn substitutes_every_occurrence() {
        let p = params(json!({"ns": "prod"}));
        assert_eq!(
            render("kubectl get pods -n {ns} --context {ns}", &p),
            "kubectl get pods -n prod --context prod"
        );
    }

    #[test]
    fn unresolved_placeholders_left_intact() {
        let p = params(json!({"ns": "prod"}));
        assert_eq!(
            render("kubectl scale {deployment} -n {ns}", &p),
            "kubectl scale {deployment} -n prod"
        );
        assert_eq!(unresolved("kubectl scale {deployment} -n {ns}", &p), vec!["deployment"]);
    }

    #[test]
    fn scalars_are_stringified() {
        let p = params(json!({"replicas": 3, "ratio": 0.5, "dry": true, "note": null}));
        assert_eq!(
            render("echo {replicas} {ratio} {dry} [{note}]", &p),
            "echo 3 0.5 true []"
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let p = params(json!({"a": "x", "b": "y"}));
        let template = "git checkout {a} {b} {a}";
        assert_eq!(render(template, &p), render(template, &p));
        assert_eq!(build(template, &p), build(template, &p));
    }

    #[test]
    fn values_are_not_rescanned() {
        let p = params(json!({"a": "{b}", "b": "boom"}));
        assert_eq!(render("echo {a}", &p), "echo {b}");
    }

    #[test]
    fn argv_keeps_values_in_one_argument() {
        let p = params(json!({"msg": "hello world; rm -rf /"}));
        let rendered = build("echo {msg}", &p).unwrap();
        assert_eq!(rendered.argv, ["echo", "hello world; rm -rf /"]);
        assert_eq!(rendered.command, "echo hello world; rm -rf /");
    }

    #[test]
    fn quoted_template_words_are_unquoted() {
        let p = params(json!({"branch": "main"}));
        let rendered = build(r#"git log "{branch}" --format='%h %s'"#, &p).unwrap();
        assert_eq!(rendered.argv, vec!["git", "log", "main", "--format=%h %s"]);
    }

    #[test]
    fn unbalanced_quotes_rejected() {
        let result = build("echo 'oops", &Parameters::new());
        assert_matches!(result, Err(TemplateError::UnbalancedQuotes(_)));
    }

    #[test]
    fn empty_template_rejected() {
        assert_eq!(build("   ", &Parameters::new()), Err(TemplateError::Empty));
    }

    #[test]
    fn placeholders_sorted_and_deduped() {
        assert_eq!(
            placeholders("{b} {a} {b} {not closed"),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
