//! Markup stripping for string values.
//!
//! No HTML survives: tags are removed rather than escaped, and the contents
//! of `<script>`/`<style>` elements are removed with them. Structured values
//! keep their shape; only string leaves (and object keys) change.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static RAW_TEXT_ELEMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?(?:</(?:script|style)\s*>|\z)")
        .expect("raw text element pattern compiles")
});

static COMMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--.*?(?:-->|\z)").expect("comment pattern compiles")
});

// A tag opens only when a letter, `/`, `!` or `?` follows `<` directly.
static TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?[A-Za-z!?][^>]*(?:>|\z)").expect("tag pattern compiles")
});

fn strip_once(input: &str) -> String {
    let pass = RAW_TEXT_ELEMENTS.replace_all(input, "");
    let pass = COMMENTS.replace_all(&pass, "");
    TAGS.replace_all(&pass, "").into_owned()
}

/// Remove every tag from `input`.
///
/// Stripping repeats until nothing changes, so fragments that only form a tag
/// after an inner one is removed are caught too, and the function is
/// idempotent. Each pass that changes the string makes it shorter, so the loop
/// terminates.
pub fn sanitize_str(input: &str) -> String {
    if !input.contains('<') {
        return input.to_string();
    }

    let mut current = strip_once(input);
    loop {
        let next = strip_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Sanitize every string in `value` in place. Returns whether anything
/// changed.
///
/// Walks the value with an explicit stack, so nesting depth never grows the
/// call stack. Object keys are sanitized as well; if two keys collide after
/// stripping, the later one wins.
pub fn sanitize_value(value: &mut Value) -> bool {
    let mut changed = false;
    let mut stack: Vec<&mut Value> = vec![value];
    while let Some(current) = stack.pop() {
        match current {
            Value::String(s) => {
                if s.contains('<') {
                    let clean = sanitize_str(s);
                    if clean != *s {
                        *s = clean;
                        changed = true;
                    }
                }
            }
            Value::Array(items) => stack.extend(items.iter_mut()),
            Value::Object(map) => {
                if map.keys().any(|k| k.contains('<')) {
                    let entries = std::mem::take(map);
                    *map = entries
                        .into_iter()
                        .map(|(k, v)| {
                            let clean = sanitize_str(&k);
                            changed |= clean != k;
                            (clean, v)
                        })
                        .collect();
                }
                stack.extend(map.values_mut());
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn strips_script_with_body() {
        let out = sanitize_str("<script>alert(1)</script>hello");
        assert_eq!(out, "hello");
        assert!(!out.contains("alert"));
    }

    #[test]
    fn strips_style_and_plain_tags() {
        assert_eq!(
            sanitize_str("<style>body{display:none}</style><b>bold</b> <i>text</i>"),
            "bold text"
        );
        assert_eq!(sanitize_str("<a href=\"x\">link</a><br/>"), "link");
        assert_eq!(sanitize_str("a<!-- hidden -->b"), "ab");
    }

    #[test]
    fn strips_unclosed_fragments() {
        assert_eq!(sanitize_str("ok<script>steal()"), "ok");
        assert_eq!(sanitize_str("ok<img src=x"), "ok");
    }

    #[test]
    fn nested_reassembly_is_caught() {
        let out = sanitize_str("<scr<b></b>ipt>alert(1)</script>");
        assert!(!out.contains('<'), "got {out}");
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(sanitize_str("paracetamol 750mg"), "paracetamol 750mg");
        assert_eq!(sanitize_str("2 < 3 and 5 > 4"), "2 < 3 and 5 > 4");
    }

    #[test]
    fn comparison_words_survive() {
        assert_eq!(sanitize_str("stock < minimum"), "stock < minimum");
        assert_eq!(
            sanitize_str("stock < minimum, reorder now"),
            "stock < minimum, reorder now"
        );
        assert_eq!(sanitize_str("a < /b and c <= d"), "a < /b and c <= d");
        assert_eq!(sanitize_str("qty < limit <b>now</b>"), "qty < limit now");
    }

    #[test]
    fn keeps_numbers_and_key_order_exact() {
        let raw = r#"{"zeta":"<b>x</b>","id":123456789012345678901234567890,"alpha":0.10000000000000000001}"#;
        let mut value: Value = serde_json::from_str(raw).unwrap();
        assert!(sanitize_value(&mut value));
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"zeta":"x","id":123456789012345678901234567890,"alpha":0.10000000000000000001}"#
        );
    }

    #[test]
    fn preserves_shape_and_non_strings() {
        let mut value = json!({
            "name": "<b>Widget</b>",
            "price": 9.5,
            "active": true,
            "tags": ["<i>new</i>", null, 3],
            "nested": { "note": "<script>x</script>fine", "empty": {}, "list": [] }
        });
        assert!(sanitize_value(&mut value));
        assert_eq!(
            value,
            json!({
                "name": "Widget",
                "price": 9.5,
                "active": true,
                "tags": ["new", null, 3],
                "nested": { "note": "fine", "empty": {}, "list": [] }
            })
        );
    }

    #[test]
    fn reports_untouched_values() {
        let mut value = json!({ "q": "2 < 3", "n": [1, 2] });
        assert!(!sanitize_value(&mut value));
    }

    #[test]
    fn sanitizes_keys() {
        let mut value = json!({ "<b>k</b>": 1 });
        sanitize_value(&mut value);
        assert_eq!(value, json!({ "k": 1 }));
    }

    #[test]
    fn handles_null_and_deep_nesting() {
        let mut null = Value::Null;
        assert!(!sanitize_value(&mut null));
        assert_eq!(null, Value::Null);

        let mut deep = json!("<b>leaf</b>");
        for _ in 0..10_000 {
            deep = Value::Array(vec![deep]);
        }
        sanitize_value(&mut deep);
        let mut cursor = &deep;
        while let Value::Array(items) = cursor {
            cursor = &items[0];
        }
        assert_eq!(cursor, &json!("leaf"));
        // Unwind iteratively; dropping 10k nested arrays recursively can overflow.
        let mut stack = vec![deep];
        while let Some(v) = stack.pop() {
            if let Value::Array(items) = v {
                stack.extend(items);
            }
        }
    }

    proptest! {
        #[test]
        fn sanitizing_is_idempotent(input in ".{0,64}") {
            let once = sanitize_str(&input);
            prop_assert_eq!(sanitize_str(&once), once.clone());
        }

        #[test]
        fn markup_heavy_input_is_idempotent(input in "[<>a-z/ !-]{0,48}") {
            let once = sanitize_str(&input);
            prop_assert_eq!(sanitize_str(&once), once.clone());
        }
    }
}
