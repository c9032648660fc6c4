//! Built-in functions exposed to workflow expressions.
//!
//! Mirrors the transform set `boternity-core`'s `WorkflowEvaluator` registers
//! on top of `jexl_eval` (string/boolean helpers), extended with the
//! JSON-matching and randomness builtins a workflow's `test`/`with`
//! expressions need.

use rand::Rng;
use regex::Regex;
use serde_json::Value;

/// `match_json(actual, expected)` — recursive structural match.
///
/// `expected` may use `/pattern/` string leaves to mean "match this regex"
/// instead of requiring an exact string. Objects match as a subset: every
/// key present in `expected` must be present and matching in `actual`;
/// extra keys in `actual` are ignored. Arrays compare element-by-element at
/// matching indices; `expected` may be shorter than `actual`.
pub fn match_json(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::String(pattern) => {
            if let Some(inner) = as_regex_literal(pattern) {
                let Some(actual_str) = actual.as_str() else {
                    return false;
                };
                Regex::new(inner)
                    .map(|re| re.is_match(actual_str))
                    .unwrap_or(false)
            } else {
                actual == expected
            }
        }
        Value::Object(expected_map) => {
            let Some(actual_map) = actual.as_object() else {
                return false;
            };
            expected_map.iter().all(|(k, v)| {
                actual_map
                    .get(k)
                    .map(|actual_v| match_json(actual_v, v))
                    .unwrap_or(false)
            })
        }
        Value::Array(expected_items) => {
            let Some(actual_items) = actual.as_array() else {
                return false;
            };
            if actual_items.len() < expected_items.len() {
                return false;
            }
            expected_items
                .iter()
                .zip(actual_items.iter())
                .all(|(e, a)| match_json(a, e))
        }
        _ => actual == expected,
    }
}

/// Returns `Some(inner)` if `s` is a `/regex/`-delimited literal.
fn as_regex_literal(s: &str) -> Option<&str> {
    let s = s.strip_prefix('/')?;
    let s = s.strip_suffix('/')?;
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// `diff_json(a, b)` — list of dotted paths where `a` and `b` disagree.
pub fn diff_json(a: &Value, b: &Value) -> Vec<String> {
    let mut diffs = Vec::new();
    diff_json_at("$", a, b, &mut diffs);
    diffs
}

fn diff_json_at(path: &str, a: &Value, b: &Value, diffs: &mut Vec<String>) {
    match (a, b) {
        (Value::Object(am), Value::Object(bm)) => {
            let mut keys: Vec<&String> = am.keys().chain(bm.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let sub_path = format!("{path}.{key}");
                match (am.get(key), bm.get(key)) {
                    (Some(av), Some(bv)) => diff_json_at(&sub_path, av, bv, diffs),
                    (None, Some(_)) => diffs.push(format!("{sub_path}: missing in left")),
                    (Some(_), None) => diffs.push(format!("{sub_path}: missing in right")),
                    (None, None) => unreachable!(),
                }
            }
        }
        (Value::Array(aa), Value::Array(ba)) => {
            let len = aa.len().max(ba.len());
            for i in 0..len {
                let sub_path = format!("{path}[{i}]");
                match (aa.get(i), ba.get(i)) {
                    (Some(av), Some(bv)) => diff_json_at(&sub_path, av, bv, diffs),
                    (None, Some(_)) => diffs.push(format!("{sub_path}: missing in left")),
                    (Some(_), None) => diffs.push(format!("{sub_path}: missing in right")),
                    (None, None) => unreachable!(),
                }
            }
        }
        _ => {
            if a != b {
                diffs.push(format!("{path}: {a} != {b}"));
            }
        }
    }
}

/// `random_int(max)` — a pseudo-random integer in `0..max` (exclusive).
pub fn random_int(max: i64) -> i64 {
    if max <= 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..max)
}

const RANDOM_STR_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// `random_str(len)` — a random alphanumeric string of the given length.
pub fn random_str(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..RANDOM_STR_ALPHABET.len());
            RANDOM_STR_ALPHABET[idx] as char
        })
        .collect()
}

/// `unixtime()` — seconds since the Unix epoch.
pub fn unixtime() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// `contains(s, substr)` — plain substring containment.
pub fn contains(s: &str, substr: &str) -> bool {
    s.contains(substr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn match_json_exact_scalars() {
        assert!(match_json(&json!(5), &json!(5)));
        assert!(!match_json(&json!(5), &json!(6)));
    }

    #[test]
    fn match_json_regex_leaf() {
        assert!(match_json(&json!("hello-123"), &json!("/hello-\\d+/")));
        assert!(!match_json(&json!("hello-abc"), &json!("/hello-\\d+/")));
    }

    #[test]
    fn match_json_object_subset() {
        let actual = json!({"a": 1, "b": 2, "c": 3});
        let expected = json!({"a": 1, "b": 2});
        assert!(match_json(&actual, &expected));

        let mismatched = json!({"a": 1, "b": 99});
        assert!(!match_json(&actual, &mismatched));
    }

    #[test]
    fn match_json_array_positional() {
        assert!(match_json(&json!([1, 2, 3]), &json!([1, 2])));
        assert!(!match_json(&json!([1, 2, 3]), &json!([1, 9])));
        assert!(!match_json(&json!([1]), &json!([1, 2])));
    }

    #[test]
    fn diff_json_finds_nested_mismatch() {
        let a = json!({"x": {"y": 1}});
        let b = json!({"x": {"y": 2}});
        let diffs = diff_json(&a, &b);
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].contains("$.x.y"));
    }

    #[test]
    fn diff_json_no_diff_for_equal() {
        let a = json!({"x": 1, "y": [1, 2]});
        assert!(diff_json(&a, &a).is_empty());
    }

    #[test]
    fn diff_json_missing_key() {
        let a = json!({"x": 1});
        let b = json!({"x": 1, "y": 2});
        let diffs = diff_json(&a, &b);
        assert_eq!(diffs, vec!["$.y: missing in left"]);
    }

    #[test]
    fn random_int_within_bounds() {
        for _ in 0..50 {
            let v = random_int(10);
            assert!((0..10).contains(&v));
        }
    }

    #[test]
    fn random_int_zero_max_is_zero() {
        assert_eq!(random_int(0), 0);
    }

    #[test]
    fn random_str_has_requested_length() {
        assert_eq!(random_str(12).len(), 12);
        assert_eq!(random_str(0).len(), 0);
    }

    #[test]
    fn unixtime_is_plausible() {
        let t = unixtime();
        assert!(t > 1_700_000_000);
    }

    #[test]
    fn contains_basic() {
        assert!(contains("hello world", "world"));
        assert!(!contains("hello world", "xyz"));
    }
}
