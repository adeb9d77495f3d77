//! Template Probe (C1) and Template Renderer (C2).
//!
//! The core never parses the template grammar itself; it only asks minijinja
//! two questions: "what root names does this template reference" (the
//! probe) and "render this template against a ready context" (the
//! renderer).

use std::collections::{HashMap, HashSet};

use minijinja::Environment as JinjaEnv;
use serde_json::Value;

use crate::error::RunError;

/// True if `s` contains a template delimiter and thus needs probing/rendering.
pub fn is_template(s: &str) -> bool {
    s.contains("{{") || s.contains("{%")
}

/// A bare expression is a template whose entire body is a single `{{ ... }}`
/// span with nothing else around it, e.g. `"{{ results }}"`. Rendering these
/// through `compile_expression` preserves the expression's native type
/// (lists, maps) instead of flattening everything to a string the way
/// `render_str` does.
fn bare_expression(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") {
        return None;
    }
    Some(inner.trim())
}

/// Scan a template string for the root identifiers it references, returning
/// the lexicographically-first one absent from `ready`.
///
/// minijinja returns undeclared names as an unordered set; picking the
/// smallest name gives the waiter a deterministic dependency to chase when
/// more than one is missing, rather than depending on hash iteration order.
fn first_missing_in_str(template: &str, ready: &HashMap<String, Value>) -> Option<String> {
    let mut env = JinjaEnv::new();
    let names: HashSet<String> = env
        .add_template("__probe", template)
        .ok()
        .and_then(|_| env.get_template("__probe").ok())
        .map(|tmpl| tmpl.undeclared_variables(false))
        .unwrap_or_default();
    names.into_iter().filter(|name| !ready.contains_key(name)).min()
}

/// Structurally walk a literal/template/nested-mapping tree and return the
/// first unresolved root variable name encountered in document order, or
/// `None` if every template in the tree can be rendered right now.
///
/// A missing *attribute* on a known value (`{{ x.y }}` where `x` is ready
/// but has no `y`) is invisible here -- the probe only sees root identifiers,
/// so `x.y` registers as resolved and any attribute error surfaces later, at
/// render time, as a template error rather than an unresolved dependency.
pub fn first_missing(value: &Value, ready: &HashMap<String, Value>) -> Option<String> {
    match value {
        Value::String(s) if is_template(s) => first_missing_in_str(s, ready),
        Value::Array(items) => items.iter().find_map(|v| first_missing(v, ready)),
        Value::Object(map) => map.values().find_map(|v| first_missing(v, ready)),
        _ => None,
    }
}

/// Render a single template string against a fully-ready context.
pub fn render_str(template: &str, ctx: &HashMap<String, Value>) -> Result<Value, RunError> {
    let env = JinjaEnv::new();
    if let Some(expr) = bare_expression(template) {
        let compiled = env
            .compile_expression(expr)
            .map_err(|e| RunError::render_failure(template, e))?;
        let rendered = compiled
            .eval(ctx)
            .map_err(|e| RunError::render_failure(template, e))?;
        serde_json::to_value(rendered).map_err(|e| RunError::render_failure(template, e))
    } else {
        let rendered = env
            .render_str(template, ctx)
            .map_err(|e| RunError::render_failure(template, e))?;
        Ok(Value::String(rendered))
    }
}

/// Structurally render a literal/template/nested-mapping tree, preserving
/// container shape; leaves that are not templates pass through unchanged.
pub fn render_value(value: &Value, ctx: &HashMap<String, Value>) -> Result<Value, RunError> {
    match value {
        Value::String(s) if is_template(s) => render_str(s, ctx),
        Value::Array(items) => {
            let rendered: Result<Vec<Value>, RunError> =
                items.iter().map(|v| render_value(v, ctx)).collect();
            Ok(Value::Array(rendered?))
        }
        Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                rendered.insert(k.clone(), render_value(v, ctx)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

/// Wrap a bare identifier in template markers if it isn't templated already.
/// Used for `when`, `assert.that`, and `debug.var`, which accept a plain
/// identifier as shorthand for `{{ identifier }}`.
pub fn auto_wrap(s: &str) -> String {
    if is_template(s) {
        s.to_string()
    } else {
        format!("{{{{ {s} }}}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn probe_finds_missing_root_name() {
        let ready = HashMap::new();
        let missing = first_missing(&json!("{{ x.y }}"), &ready);
        assert_eq!(missing.as_deref(), Some("x"));
    }

    #[test]
    fn probe_ignores_known_attribute_access() {
        let mut ready = HashMap::new();
        ready.insert("x".to_string(), json!({"y": 1}));
        let missing = first_missing(&json!("{{ x.y }}"), &ready);
        assert_eq!(missing, None);
    }

    #[test]
    fn probe_is_structural_and_follows_document_order() {
        let ready = HashMap::new();
        let tree = json!({"a": "literal", "b": ["{{ zeta }}", "{{ alpha }}"]});
        let missing = first_missing(&tree, &ready);
        assert_eq!(missing.as_deref(), Some("zeta"));
    }

    #[test]
    fn probe_picks_smallest_name_within_one_template() {
        let ready = HashMap::new();
        let missing = first_missing(&json!("{{ zeta }}{{ alpha }}"), &ready);
        assert_eq!(missing.as_deref(), Some("alpha"));
    }

    #[test]
    fn bare_expression_preserves_type() {
        let mut ctx = HashMap::new();
        ctx.insert("items".to_string(), json!([1, 2, 3]));
        let rendered = render_str("{{ items }}", &ctx).unwrap();
        assert_eq!(rendered, json!([1, 2, 3]));
    }

    #[test]
    fn mixed_template_renders_to_string() {
        let mut ctx = HashMap::new();
        ctx.insert("name".to_string(), json!("world"));
        let rendered = render_str("hello {{ name }}", &ctx).unwrap();
        assert_eq!(rendered, json!("hello world"));
    }

    #[test]
    fn auto_wrap_leaves_existing_templates_alone() {
        assert_eq!(auto_wrap("{{ x }}"), "{{ x }}");
        assert_eq!(auto_wrap("x"), "{{ x }}");
    }
}
