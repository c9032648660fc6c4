//! Rewrites call-style builtin invocations (`contains(a, b)`) into the
//! pipe-transform syntax `jexl_eval` actually understands (`a|contains(b)`).
//!
//! `jexl-eval` only supports user-defined functions as pipe transforms, but
//! workflow authors expect to write builtins as ordinary function calls
//! (`match_json(actual, expected)`, `unixtime()`, ...). This module lets
//! authors use either form by rewriting the call form before the
//! expression reaches the evaluator.

/// Names of builtins callable in call-syntax.
pub const BUILTIN_NAMES: &[&str] = &[
    "match_json",
    "diff_json",
    "random_int",
    "random_str",
    "unixtime",
    "contains",
];

/// Rewrite every top-level call to a known builtin into pipe-transform form.
///
/// `unixtime()` (zero args) becomes `0|unixtime` — the transform ignores its
/// subject. `name(a, b, ...)` becomes `a|name(b, ...)`.
pub fn rewrite_calls(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if let Some((name, consumed, args)) = try_match_call(&chars, i) {
            let rewritten = match args.len() {
                0 => format!("0|{name}"),
                1 => format!("{}|{name}", args[0]),
                _ => format!("{}|{name}({})", args[0], args[1..].join(", ")),
            };
            out.push_str(&rewritten);
            i += consumed;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }

    out
}

/// Try to match a builtin call starting at byte index `i` in `chars`.
///
/// Returns `(name, total_chars_consumed, args)` on success.
fn try_match_call(chars: &[char], i: usize) -> Option<(&'static str, usize, Vec<String>)> {
    for &name in BUILTIN_NAMES {
        if !matches_ident_at(chars, i, name) {
            continue;
        }
        let after_name = i + name.chars().count();
        if after_name >= chars.len() || chars[after_name] != '(' {
            continue;
        }
        // Reject if preceded by an identifier char or `|` (already a transform).
        if i > 0 {
            let prev = chars[i - 1];
            if prev.is_alphanumeric() || prev == '_' || prev == '|' || prev == '.' {
                continue;
            }
        }

        let (close_idx, args) = scan_balanced_args(chars, after_name + 1)?;
        let consumed = close_idx + 1 - i;
        return Some((name, consumed, args));
    }
    None
}

fn matches_ident_at(chars: &[char], i: usize, name: &str) -> bool {
    let name_chars: Vec<char> = name.chars().collect();
    if i + name_chars.len() > chars.len() {
        return false;
    }
    chars[i..i + name_chars.len()] == name_chars[..]
}

/// Scan from just after the opening `(` at `start`, returning the index of
/// the matching `)` and the list of top-level (comma-split) argument strings,
/// each recursively rewritten.
fn scan_balanced_args(chars: &[char], start: usize) -> Option<(usize, Vec<String>)> {
    let mut depth = 0i32;
    let mut in_string: Option<char> = None;
    let mut current = String::new();
    let mut args = Vec::new();
    let mut i = start;

    while i < chars.len() {
        let c = chars[i];

        if let Some(quote) = in_string {
            current.push(c);
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' | '"' => {
                in_string = Some(c);
                current.push(c);
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                if depth == 0 {
                    if !current.trim().is_empty() {
                        args.push(rewrite_calls(current.trim()));
                    }
                    return Some((i, args));
                }
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                args.push(rewrite_calls(current.trim()));
                current.clear();
            }
            _ => current.push(c),
        }
        i += 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_two_arg_call() {
        assert_eq!(rewrite_calls("contains(res.body, 'ok')"), "res.body|contains('ok')");
    }

    #[test]
    fn rewrites_zero_arg_call() {
        assert_eq!(rewrite_calls("unixtime()"), "0|unixtime");
    }

    #[test]
    fn rewrites_nested_call_arguments() {
        let input = "match_json(res.body, {\"a\": contains(res.body.x, 'y')})";
        let rewritten = rewrite_calls(input);
        assert!(rewritten.starts_with("res.body|match_json("));
        assert!(rewritten.contains("res.body.x|contains('y')"));
    }

    #[test]
    fn leaves_non_builtin_calls_alone() {
        assert_eq!(rewrite_calls("some_other_fn(1, 2)"), "some_other_fn(1, 2)");
    }

    #[test]
    fn leaves_plain_expressions_alone() {
        assert_eq!(rewrite_calls("vars.x == 1 && vars.y"), "vars.x == 1 && vars.y");
    }

    #[test]
    fn does_not_match_substring_identifier() {
        // `my_contains(...)` should not be mistaken for `contains`.
        assert_eq!(rewrite_calls("my_contains(1, 2)"), "my_contains(1, 2)");
    }

    #[test]
    fn rewrites_expression_embedded_in_comparison() {
        assert_eq!(
            rewrite_calls("contains(res.body, 'ok') == true"),
            "res.body|contains('ok') == true"
        );
    }
}
