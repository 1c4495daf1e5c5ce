//! The `{{ … }}` expression mini-language.
//!
//! A single interpolation resolves against the live execution context:
//! `$json` (first item of the current input), `$input.first()` /
//! `$input.all()`, `$('Name')` (a prior node's first output item),
//! `$tokens`, or a bare identifier looked up in the initial request body
//! and then the current item. Paths accept mixed dot and bracket
//! notation (`a.b["c"].d`).
//!
//! A string that is exactly one interpolation (optionally prefixed with
//! `=`) evaluates to the value with its original type; otherwise each
//! interpolation is spliced into the surrounding text as a string.

use serde_json::Value;

use crate::engine::ExecutionContext;
use crate::workflow::Item;

/// One segment of a resolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Seg {
    Key(String),
    Index(usize),
}

/// Render a parameter string against the context and the current input.
///
/// Returns a typed value for whole-string interpolations, a string with
/// spliced results otherwise, and the input unchanged when it contains no
/// interpolation.
pub fn render_string(raw: &str, ctx: &ExecutionContext, current: &[Item]) -> Value {
    let stripped = raw.strip_prefix('=').unwrap_or(raw);

    if let Some(expr) = whole_interpolation(stripped) {
        return evaluate(expr, ctx, current).unwrap_or(Value::Null);
    }

    if !raw.contains("{{") {
        return Value::String(raw.to_string());
    }

    Value::String(splice(stripped, ctx, current))
}

/// Recursively render every string in a parameter tree.
pub fn render_parameters(params: &Value, ctx: &ExecutionContext, current: &[Item]) -> Value {
    match params {
        Value::String(s) => render_string(s, ctx, current),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_parameters(v, ctx, current)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_parameters(v, ctx, current))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Evaluate a single expression (the inside of one `{{ … }}`).
/// `None` means undefined.
pub fn evaluate(expr: &str, ctx: &ExecutionContext, current: &[Item]) -> Option<Value> {
    let expr = expr.trim();

    if let Some(rest) = expr.strip_prefix("$json") {
        let root = current.first().map(|item| item.json.clone())?;
        return traverse(&root, rest);
    }

    if let Some(rest) = expr.strip_prefix("$input.first()") {
        let root = current.first().map(|item| item.json.clone())?;
        return traverse(&root, rest);
    }

    if expr == "$input.all()" {
        return serde_json::to_value(current).ok();
    }

    if expr.starts_with("$('") || expr.starts_with("$(\"") {
        return evaluate_node_ref(expr, ctx);
    }

    if let Some(rest) = expr.strip_prefix("$tokens") {
        if rest.is_empty() {
            let map: serde_json::Map<String, Value> = ctx
                .tokens
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            return Some(Value::Object(map));
        }
        let segs = parse_path(rest)?;
        let mut root = Value::Null;
        if let Some(Seg::Key(name)) = segs.first() {
            root = ctx
                .token(name)
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null);
        }
        if root.is_null() {
            return None;
        }
        return follow(&root, &segs[1..]);
    }

    evaluate_bare(expr, ctx, current)
}

/// `$('Name')[.item[.json[.path]]]` — a named prior node's first output
/// item. Without a `.item` / `.json` selector the item's `json` is used.
fn evaluate_node_ref(expr: &str, ctx: &ExecutionContext) -> Option<Value> {
    let (quote, open_len) = if expr.starts_with("$('") {
        ('\'', 3)
    } else {
        ('"', 3)
    };
    let rest = &expr[open_len..];
    let close = rest.find(quote)?;
    let name = &rest[..close];
    let after = rest[close + 1..].strip_prefix(')')?;

    let items = ctx.output(name)?;
    let item = items.first()?;

    let mut path = after;
    let mut root = item.json.clone();

    if let Some(tail) = path.strip_prefix(".item") {
        path = tail;
        root = serde_json::to_value(item).ok()?;
        if let Some(tail) = path.strip_prefix(".json") {
            path = tail;
            root = item.json.clone();
        }
    } else if let Some(tail) = path.strip_prefix(".json") {
        path = tail;
    }

    traverse(&root, path)
}

/// Bare identifiers look in the initial request body first, then the
/// current item.
fn evaluate_bare(expr: &str, ctx: &ExecutionContext, current: &[Item]) -> Option<Value> {
    let segs = parse_path_loose(expr)?;
    let Seg::Key(first) = segs.first()? else {
        return None;
    };

    if let Some(body) = ctx.initial_data.get("body") {
        if let Some(found) = body.get(first) {
            return follow(found, &segs[1..]);
        }
    }

    if let Some(item) = current.first() {
        if let Some(found) = item.json.get(first) {
            return follow(found, &segs[1..]);
        }
    }

    None
}

/// Traverse a path suffix like `.a.b["c"]` (empty suffix returns the root).
fn traverse(root: &Value, path: &str) -> Option<Value> {
    if path.trim().is_empty() {
        return Some(root.clone());
    }
    let segs = parse_path(path)?;
    follow(root, &segs)
}

fn follow(root: &Value, segs: &[Seg]) -> Option<Value> {
    let mut current = root;
    for seg in segs {
        current = match (seg, current) {
            (Seg::Key(k), Value::Object(map)) => map.get(k)?,
            (Seg::Index(i), Value::Array(items)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Parse a path that must start with `.` or `[`.
fn parse_path(path: &str) -> Option<Vec<Seg>> {
    let path = path.trim();
    if path.is_empty() {
        return Some(Vec::new());
    }
    if !path.starts_with('.') && !path.starts_with('[') {
        return None;
    }
    parse_segments(path)
}

/// Parse a path that may begin with a bare identifier (`a.b["c"]`).
fn parse_path_loose(path: &str) -> Option<Vec<Seg>> {
    let path = path.trim();
    if path.is_empty() || path.starts_with('.') || path.starts_with('[') {
        return None;
    }
    let head_end = path
        .find(|c: char| c == '.' || c == '[')
        .unwrap_or(path.len());
    let head = &path[..head_end];
    if !is_identifier(head) {
        return None;
    }
    let mut segs = vec![Seg::Key(head.to_string())];
    segs.extend(parse_segments(&path[head_end..])?);
    Some(segs)
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn parse_segments(mut rest: &str) -> Option<Vec<Seg>> {
    let mut segs = Vec::new();
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('.') {
            let end = tail
                .find(|c: char| c == '.' || c == '[')
                .unwrap_or(tail.len());
            let key = &tail[..end];
            if !is_identifier(key) {
                return None;
            }
            segs.push(Seg::Key(key.to_string()));
            rest = &tail[end..];
        } else if let Some(tail) = rest.strip_prefix('[') {
            let close = tail.find(']')?;
            let inner = tail[..close].trim();
            if let Some(stripped) = inner
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .or_else(|| inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
            {
                segs.push(Seg::Key(stripped.to_string()));
            } else {
                segs.push(Seg::Index(inner.parse().ok()?));
            }
            rest = &tail[close + 1..];
        } else {
            return None;
        }
    }
    Some(segs)
}

/// The whole-string form: exactly one interpolation with nothing around it.
fn whole_interpolation(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner)
}

/// Splice every interpolation into the surrounding text as a string.
/// Undefined evaluates to the empty string.
fn splice(s: &str, ctx: &ExecutionContext, current: &[Item]) -> String {
    let re = regex_lite::Regex::new(r"\{\{([^{}]*)\}\}").expect("static regex");
    re.replace_all(s, |caps: &regex_lite::Captures| {
        match evaluate(&caps[1], ctx, current) {
            Some(Value::String(text)) => text,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Workflow;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn ctx() -> ExecutionContext {
        let workflow: Workflow = serde_json::from_value(json!({
            "name": "wf",
            "nodes": [{"id": "n1", "name": "Fetch", "type": "httpRequest"}],
            "connections": {}
        }))
        .unwrap();
        let node = workflow.nodes[0].clone();
        let mut tokens = HashMap::new();
        tokens.insert("openAiApiKey".to_string(), "sk-test".to_string());
        let mut ctx = ExecutionContext::new(Arc::new(workflow))
            .with_tokens(tokens)
            .with_initial_data(json!({"body": {"userId": "u-7"}}));
        ctx.commit_output(
            &node,
            vec![Item::new(json!({"status": 200, "data": {"title": "x"}}))],
        );
        ctx
    }

    fn input() -> Vec<Item> {
        vec![Item::new(json!({
            "snippet": {"title": "x"},
            "count": 3,
            "name": "alpha"
        }))]
    }

    #[test]
    fn test_json_path() {
        let ctx = ctx();
        assert_eq!(
            evaluate("$json.snippet.title", &ctx, &input()),
            Some(json!("x"))
        );
        assert_eq!(evaluate("$json.count", &ctx, &input()), Some(json!(3)));
        assert_eq!(evaluate("$json.missing", &ctx, &input()), None);
    }

    #[test]
    fn test_json_bracket_path() {
        let ctx = ctx();
        assert_eq!(
            evaluate(r#"$json["snippet"]["title"]"#, &ctx, &input()),
            Some(json!("x"))
        );
        assert_eq!(
            evaluate(r#"$json.snippet["title"]"#, &ctx, &input()),
            Some(json!("x"))
        );
    }

    #[test]
    fn test_input_first_and_all() {
        let ctx = ctx();
        assert_eq!(
            evaluate("$input.first().count", &ctx, &input()),
            Some(json!(3))
        );
        let all = evaluate("$input.all()", &ctx, &input()).unwrap();
        assert_eq!(all.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_node_reference() {
        let ctx = ctx();
        assert_eq!(
            evaluate("$('Fetch').status", &ctx, &input()),
            Some(json!(200))
        );
        assert_eq!(
            evaluate("$('Fetch').item.json.data.title", &ctx, &input()),
            Some(json!("x"))
        );
        assert_eq!(
            evaluate("$('Fetch').json.status", &ctx, &input()),
            Some(json!(200))
        );
        // Resolves by id alias as well.
        assert_eq!(
            evaluate("$('n1').status", &ctx, &input()),
            Some(json!(200))
        );
        assert_eq!(evaluate("$('Nope').status", &ctx, &input()), None);
    }

    #[test]
    fn test_tokens() {
        let ctx = ctx();
        assert_eq!(
            evaluate("$tokens.openAiApiKey", &ctx, &input()),
            Some(json!("sk-test"))
        );
        assert_eq!(evaluate("$tokens.unknown", &ctx, &input()), None);
        let bag = evaluate("$tokens", &ctx, &input()).unwrap();
        assert_eq!(bag["openAiApiKey"], json!("sk-test"));
    }

    #[test]
    fn test_bare_identifier_body_then_input() {
        let ctx = ctx();
        assert_eq!(evaluate("userId", &ctx, &input()), Some(json!("u-7")));
        assert_eq!(evaluate("name", &ctx, &input()), Some(json!("alpha")));
        assert_eq!(evaluate("ghost", &ctx, &input()), None);
    }

    #[test]
    fn test_whole_string_preserves_type() {
        let ctx = ctx();
        let value = render_string("={{$json.snippet}}", &ctx, &input());
        assert_eq!(value, json!({"title": "x"}));

        let value = render_string("{{ $json.count }}", &ctx, &input());
        assert_eq!(value, json!(3));
    }

    #[test]
    fn test_splicing() {
        let ctx = ctx();
        let value = render_string("count={{ $json.count }}!", &ctx, &input());
        assert_eq!(value, json!("count=3!"));

        let value = render_string("hello {{ $json.name }} {{ $json.none }}.", &ctx, &input());
        assert_eq!(value, json!("hello alpha ."));
    }

    #[test]
    fn test_plain_string_untouched() {
        let ctx = ctx();
        let value = render_string("no interpolation here", &ctx, &input());
        assert_eq!(value, json!("no interpolation here"));
    }

    #[test]
    fn test_render_parameters_recursive() {
        let ctx = ctx();
        let params = json!({
            "url": "https://api/{{ $json.name }}",
            "nested": {"typed": "={{ $json.count }}"},
            "list": ["{{ $json.name }}"]
        });
        let rendered = render_parameters(&params, &ctx, &input());
        assert_eq!(rendered["url"], json!("https://api/alpha"));
        assert_eq!(rendered["nested"]["typed"], json!(3));
        assert_eq!(rendered["list"][0], json!("alpha"));
    }
}
