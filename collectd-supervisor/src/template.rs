//! Strict text templates for collectd configuration.
//!
//! Two constructs are supported:
//!
//! - `{{ path.to.key }}` substitutes a scalar from the render context.
//! - `{{#if path}} ... {{else}} ... {{/if}}` renders one branch depending on
//!   the truthiness of `path`. Conditionals nest.
//!
//! Rendering is strict: a substitution whose key is absent or `null`, or
//! resolves to an object or array, is an error rather than an empty string.
//! Conditionals treat absent keys as false.
//!
//! ```rust
//! use collectd_supervisor::template::Template;
//! use serde_json::json;
//!
//! let tmpl = Template::parse("demo", "Interval {{ interval }}{{#if debug}}\nLogLevel debug{{/if}}").unwrap();
//! let out = tmpl.render(&json!({"interval": 10, "debug": false})).unwrap();
//! assert_eq!(out, "Interval 10");
//! ```

use serde_json::Value;

use crate::error::RenderError;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var(String),
    If {
        key: String,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

struct OpenIf {
    key: String,
    line: usize,
    then: Vec<Node>,
    otherwise: Vec<Node>,
    in_else: bool,
}

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Parse template text. `name` is only used in error messages.
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self, RenderError> {
        let name = name.into();
        let mut root = Vec::new();
        let mut stack: Vec<OpenIf> = Vec::new();
        let mut rest = text;

        let parse_err = |line: usize, message: String| RenderError::Parse {
            template: name.clone(),
            line,
            message,
        };

        while let Some(start) = rest.find("{{") {
            let offset = text.len() - rest.len() + start;
            let line = text[..offset].matches('\n').count() + 1;

            push_text(current(&mut root, &mut stack), &rest[..start]);

            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| parse_err(line, "unterminated tag".to_string()))?;
            let tag = after[..end].trim();
            rest = &after[end + 2..];

            if let Some(key) = tag.strip_prefix("#if") {
                let key = key.trim();
                if !is_valid_path(key) {
                    return Err(parse_err(line, format!("invalid condition {:?}", key)));
                }
                stack.push(OpenIf {
                    key: key.to_string(),
                    line,
                    then: Vec::new(),
                    otherwise: Vec::new(),
                    in_else: false,
                });
            } else if tag == "else" {
                match stack.last_mut() {
                    Some(open) if !open.in_else => open.in_else = true,
                    Some(_) => return Err(parse_err(line, "duplicate {{else}}".to_string())),
                    None => return Err(parse_err(line, "{{else}} outside {{#if}}".to_string())),
                }
            } else if tag == "/if" {
                let open = stack
                    .pop()
                    .ok_or_else(|| parse_err(line, "{{/if}} without {{#if}}".to_string()))?;
                current(&mut root, &mut stack).push(Node::If {
                    key: open.key,
                    then: open.then,
                    otherwise: open.otherwise,
                });
            } else if is_valid_path(tag) {
                current(&mut root, &mut stack).push(Node::Var(tag.to_string()));
            } else {
                return Err(parse_err(line, format!("invalid tag {:?}", tag)));
            }
        }
        push_text(current(&mut root, &mut stack), rest);

        if let Some(open) = stack.last() {
            return Err(parse_err(
                open.line,
                format!("{{{{#if {}}}}} is never closed", open.key),
            ));
        }

        Ok(Self { name, nodes: root })
    }

    /// The template's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render the template against a JSON context.
    pub fn render(&self, context: &Value) -> Result<String, RenderError> {
        let mut out = String::new();
        self.render_nodes(&self.nodes, context, &mut out)?;
        Ok(out)
    }

    fn render_nodes(&self, nodes: &[Node], ctx: &Value, out: &mut String) -> Result<(), RenderError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Var(key) => match lookup(ctx, key) {
                    None | Some(Value::Null) => {
                        return Err(RenderError::MissingKey {
                            template: self.name.clone(),
                            key: key.clone(),
                        })
                    }
                    Some(Value::String(s)) => out.push_str(s),
                    Some(Value::Number(n)) => out.push_str(&n.to_string()),
                    Some(Value::Bool(b)) => out.push_str(if *b { "true" } else { "false" }),
                    Some(Value::Array(_)) | Some(Value::Object(_)) => {
                        return Err(RenderError::NotScalar {
                            template: self.name.clone(),
                            key: key.clone(),
                        })
                    }
                },
                Node::If {
                    key,
                    then,
                    otherwise,
                } => {
                    let branch = if is_truthy(lookup(ctx, key)) {
                        then
                    } else {
                        otherwise
                    };
                    self.render_nodes(branch, ctx, out)?;
                }
            }
        }
        Ok(())
    }
}

fn current<'a>(root: &'a mut Vec<Node>, stack: &'a mut [OpenIf]) -> &'a mut Vec<Node> {
    match stack.last_mut() {
        Some(open) if open.in_else => &mut open.otherwise,
        Some(open) => &mut open.then,
        None => root,
    }
}

fn push_text(nodes: &mut Vec<Node>, text: &str) {
    if !text.is_empty() {
        nodes.push(Node::Text(text.to_string()));
    }
}

fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
}

fn lookup<'a>(ctx: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(ctx, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(text: &str, ctx: Value) -> Result<String, RenderError> {
        Template::parse("test", text)?.render(&ctx)
    }

    #[test]
    fn test_substitution() {
        let out = render(
            "Host \"{{ host }}\" port {{port}} on={{ on }}",
            json!({"host": "db", "port": 6379, "on": true}),
        )
        .unwrap();
        assert_eq!(out, "Host \"db\" port 6379 on=true");
    }

    #[test]
    fn test_nested_path() {
        let out = render("{{ a.b.c }} {{ list.1 }}", json!({"a": {"b": {"c": "deep"}}, "list": [1, 2]}))
            .unwrap();
        assert_eq!(out, "deep 2");
    }

    #[test]
    fn test_missing_key_is_error() {
        let err = render("x {{ nope }}", json!({})).unwrap_err();
        assert!(matches!(err, RenderError::MissingKey { ref key, .. } if key == "nope"));

        let err = render("{{ nil }}", json!({"nil": null})).unwrap_err();
        assert!(matches!(err, RenderError::MissingKey { .. }));
    }

    #[test]
    fn test_non_scalar_is_error() {
        let err = render("{{ obj }}", json!({"obj": {"a": 1}})).unwrap_err();
        assert!(matches!(err, RenderError::NotScalar { .. }));
    }

    #[test]
    fn test_conditionals() {
        let text = "{{#if java}}LoadPlugin java{{else}}# no java{{/if}}";
        assert_eq!(render(text, json!({"java": true})).unwrap(), "LoadPlugin java");
        assert_eq!(render(text, json!({"java": false})).unwrap(), "# no java");
        assert_eq!(render(text, json!({})).unwrap(), "# no java");
        assert_eq!(render(text, json!({"java": ""})).unwrap(), "# no java");
    }

    #[test]
    fn test_nested_conditionals() {
        let text = "{{#if a}}A{{#if b}}B{{else}}b{{/if}}{{/if}}.";
        assert_eq!(render(text, json!({"a": 1, "b": 1})).unwrap(), "AB.");
        assert_eq!(render(text, json!({"a": 1, "b": 0})).unwrap(), "Ab.");
        assert_eq!(render(text, json!({"a": 0, "b": 1})).unwrap(), ".");
    }

    #[test]
    fn test_skipped_branch_may_reference_missing_keys() {
        let out = render("{{#if set}}{{ missing }}{{/if}}ok", json!({})).unwrap();
        assert_eq!(out, "ok");
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "{{ open",
            "{{#if a}}never closed",
            "{{/if}}",
            "{{else}}",
            "{{#if a}}{{else}}{{else}}{{/if}}",
            "{{ has space }}",
            "{{}}",
        ] {
            assert!(
                matches!(Template::parse("t", bad), Err(RenderError::Parse { .. })),
                "expected parse error for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = Template::parse("t", "a\nb\n{{#if x}}").unwrap_err();
        assert!(matches!(err, RenderError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_text_without_tags_is_unchanged() {
        let text = "LoadPlugin cpu\n<Plugin cpu>\n</Plugin>\n";
        assert_eq!(render(text, json!({})).unwrap(), text);
    }
}
