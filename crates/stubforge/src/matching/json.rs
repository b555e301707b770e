//! JSON matchers: path-based node selection and partial (leaf-fraction)
//! scoring.
//!
//! The path syntax is the practical subset mock configs actually use:
//! `$.field.nested`, `$.array[0]`, `$.array[*].field`.

use serde_json::Value;

/// Collect every node selected by `path`. An empty result means the path
/// selects nothing.
pub fn select_nodes<'a>(root: &'a Value, path: &str) -> Vec<&'a Value> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    let path = path.strip_prefix('$').unwrap_or(path);
    let mut out = Vec::new();
    collect(root, path, &mut out);
    out
}

fn collect<'a>(value: &'a Value, path: &str, out: &mut Vec<&'a Value>) {
    if path.is_empty() {
        out.push(value);
        return;
    }

    // Bracket segment: [n] or [*]
    if let Some(rest) = path.strip_prefix('[') {
        let Some(end) = rest.find(']') else { return };
        let index_str = &rest[..end];
        let rest = rest[end + 1..].strip_prefix('.').unwrap_or(&rest[end + 1..]);

        match value {
            Value::Array(arr) if index_str == "*" => {
                for item in arr {
                    collect(item, rest, out);
                }
            }
            Value::Array(arr) => {
                if let Ok(index) = index_str.parse::<usize>() {
                    if let Some(item) = arr.get(index) {
                        collect(item, rest, out);
                    }
                }
            }
            _ => {}
        }
        return;
    }

    // Object field segment up to the next . or [
    let seg_end = path
        .find(['.', '['])
        .unwrap_or(path.len());
    let (segment, mut rest) = path.split_at(seg_end);
    rest = rest.strip_prefix('.').unwrap_or(rest);

    if let Value::Object(obj) = value {
        if let Some(next) = obj.get(segment) {
            collect(next, rest, out);
        }
    }
}

/// Render a JSON node the way string predicates see it: strings unquoted,
/// everything else in its JSON form.
pub fn node_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fraction of expected leaves found equal in `actual`, in [0,1].
///
/// A leaf is any non-object, non-array expected value; missing or unequal
/// leaves count as misses. The expected string `"*"` accepts any present
/// value at that position. An expected document with no leaves scores 1.
pub fn partial_score(expected: &Value, actual: &Value) -> f64 {
    let mut total = 0usize;
    let mut hits = 0usize;
    walk(expected, Some(actual), &mut total, &mut hits);
    if total == 0 {
        1.0
    } else {
        hits as f64 / total as f64
    }
}

fn walk(expected: &Value, actual: Option<&Value>, total: &mut usize, hits: &mut usize) {
    match expected {
        Value::Object(map) => {
            for (key, sub) in map {
                let next = actual.and_then(|a| a.as_object()).and_then(|o| o.get(key));
                walk(sub, next, total, hits);
            }
        }
        Value::Array(items) => {
            for (idx, sub) in items.iter().enumerate() {
                let next = actual.and_then(|a| a.as_array()).and_then(|a| a.get(idx));
                walk(sub, next, total, hits);
            }
        }
        leaf => {
            *total += 1;
            let wildcard = matches!(leaf, Value::String(s) if s == "*");
            match actual {
                Some(found) if wildcard || found == leaf => *hits += 1,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn select_nested_fields() {
        let doc = json!({"a": {"b": {"c": 42}}});
        let nodes = select_nodes(&doc, "$.a.b.c");
        assert_eq!(nodes, vec![&json!(42)]);
        assert!(select_nodes(&doc, "$.a.x").is_empty());
    }

    #[test]
    fn select_array_indices_and_wildcards() {
        let doc = json!({"items": [{"id": 1}, {"id": 2}, {"id": 3}]});
        assert_eq!(select_nodes(&doc, "$.items[1].id"), vec![&json!(2)]);

        let all = select_nodes(&doc, "$.items[*].id");
        assert_eq!(all, vec![&json!(1), &json!(2), &json!(3)]);
    }

    #[test]
    fn root_path_selects_document() {
        let doc = json!({"a": 1});
        assert_eq!(select_nodes(&doc, "$"), vec![&doc]);
    }

    #[test]
    fn node_string_rendering() {
        assert_eq!(node_as_string(&json!("x")), "x");
        assert_eq!(node_as_string(&json!(12)), "12");
        assert_eq!(node_as_string(&json!(true)), "true");
        assert_eq!(node_as_string(&json!(null)), "null");
        assert_eq!(node_as_string(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn partial_score_counts_leaf_fraction() {
        let expected = json!({"name": "ada", "role": "admin"});

        let full = json!({"name": "ada", "role": "admin", "extra": true});
        assert_eq!(partial_score(&expected, &full), 1.0);

        let half = json!({"name": "ada", "role": "user"});
        assert_eq!(partial_score(&expected, &half), 0.5);

        let none = json!({"other": 1});
        assert_eq!(partial_score(&expected, &none), 0.0);
    }

    #[test]
    fn partial_score_nested_and_arrays() {
        let expected = json!({"user": {"id": 7, "tags": ["a", "b"]}});
        let actual = json!({"user": {"id": 7, "tags": ["a", "x"]}});
        // Leaves are id, tags[0], tags[1]; two of three hit.
        let score = partial_score(&expected, &actual);
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn partial_score_wildcard_leaf_accepts_any_value() {
        let expected = json!({"id": "*", "kind": "order"});
        let actual = json!({"id": 991, "kind": "order"});
        assert_eq!(partial_score(&expected, &actual), 1.0);

        // Wildcard still requires the leaf to exist.
        let missing = json!({"kind": "order"});
        assert_eq!(partial_score(&expected, &missing), 0.5);
    }

    #[test]
    fn partial_score_empty_expected_is_perfect() {
        assert_eq!(partial_score(&json!({}), &json!({"a": 1})), 1.0);
    }
}
