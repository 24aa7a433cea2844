//! Neutralizes markup and script payloads in untrusted form input.
//!
//! Sanitizing never rejects a request. Dangerous content is encoded or
//! stripped and the structural checks are left to validation. Suspicious
//! patterns are detected on the raw input so warnings reflect what the
//! client actually sent.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

struct Patterns {
    script_block: Regex,
    quoted_event_handler: Regex,
    unquoted_event_handler: Regex,
    dangerous_protocol: Regex,
    html_tag: Regex,
    suspicious: Vec<Regex>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("Invalid regex");
        Patterns {
            script_block: compile(r"(?is)<script\b[^>]*>.*?</script\s*>"),
            quoted_event_handler: compile(r#"(?i)on\w+\s*=\s*["'][^"']*["']"#),
            unquoted_event_handler: compile(r"(?i)on\w+\s*=\s*[^\s>]*"),
            dangerous_protocol: compile(r"(?i)javascript:|data:text/html"),
            html_tag: compile(r"<[^>]*>"),
            suspicious: [
                r"(?i)<script",
                r"(?i)javascript:",
                r"(?i)on\w+\s*=",
                r"(?i)<iframe",
                r"(?i)<object",
                r"(?i)<embed",
            ]
            .into_iter()
            .map(compile)
            .collect(),
        }
    })
}

/// Sanitized copy of a payload plus one warning per suspicious match.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedPayload {
    pub sanitized: Value,
    pub warnings: Vec<String>,
}

/// Encode and strip one string value.
pub fn sanitize_string(input: &str) -> String {
    let patterns = patterns();

    let mut output = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\0' => {}
            '&' => output.push_str("&amp;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '"' => output.push_str("&quot;"),
            '\'' => output.push_str("&#x27;"),
            other => output.push(other),
        }
    }

    let output = patterns.script_block.replace_all(&output, "");
    let output = patterns.quoted_event_handler.replace_all(&output, "");
    let output = patterns.unquoted_event_handler.replace_all(&output, "");
    let output = strip_until_stable(&patterns.dangerous_protocol, output.into_owned());
    output.trim().to_string()
}

/// Nested prefixes such as `javajavascript:script:` reassemble after one pass.
fn strip_until_stable(pattern: &Regex, mut value: String) -> String {
    while pattern.is_match(&value) {
        value = pattern.replace_all(&value, "").into_owned();
    }
    value
}

/// [`sanitize_string`] for an arbitrary JSON value; non-strings become `""`.
pub fn sanitize_string_value(input: &Value) -> String {
    input.as_str().map(sanitize_string).unwrap_or_default()
}

/// Sanitize every string leaf of `value`, leaving other leaves untouched.
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(text) => Value::String(sanitize_string(text)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, field)| (key.clone(), sanitize_value(field)))
                .collect::<Map<_, _>>(),
        ),
        other => other.clone(),
    }
}

pub fn sanitize_form_data(data: &Value) -> SanitizedPayload {
    let mut warnings = Vec::new();
    collect_warnings(data, "", &mut warnings);
    SanitizedPayload {
        sanitized: sanitize_value(data),
        warnings,
    }
}

fn collect_warnings(value: &Value, path: &str, warnings: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            let field = if path.is_empty() { "unknown" } else { path };
            for pattern in &patterns().suspicious {
                if pattern.is_match(text) {
                    warnings.push(format!("Suspicious content detected in field: {field}"));
                }
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_warnings(item, &join_path(path, &index.to_string()), warnings);
            }
        }
        Value::Object(fields) => {
            for (key, field) in fields {
                collect_warnings(field, &join_path(path, key), warnings);
            }
        }
        _ => {}
    }
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Make an uploaded file name safe to store.
pub fn sanitize_filename(filename: &str) -> String {
    let without_traversal = filename.replace("..", "");
    let cleaned: String = without_traversal
        .chars()
        .filter(|ch| !matches!(ch, '/' | '\\' | '\0'))
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .take(255)
        .collect();
    cleaned.trim().to_string()
}

/// Remove every HTML tag.
pub fn strip_html(input: &str) -> String {
    patterns().html_tag.replace_all(input, "").trim().to_string()
}

/// Keep the first four digits; `None` unless exactly four are present.
pub fn sanitize_machine_number(input: &str) -> Option<String> {
    let digits: String = input
        .chars()
        .filter(char::is_ascii_digit)
        .take(4)
        .collect();
    (digits.len() == 4).then_some(digits)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    const XSS_CORPUS: &[&str] = &[
        "<img src=x onerror=alert(1)>",
        "<svg onload=alert('xss')>",
        r#"<iframe src="javascript:alert(1)"></iframe>"#,
        "<body onload=alert(document.cookie)>",
        "<input autofocus onfocus=alert(1)>",
        "<script>alert(\"xss\")</script>",
        "<a href=\"JaVaScRiPt:alert(1)\">x</a>",
        "javajavascript:script:alert(1)",
        "<IMG SRC=\"x\" ONERROR=\"alert(1)\">",
    ];

    #[test]
    fn every_pattern_compiles_and_matches_its_trigger() {
        let patterns = patterns();
        assert!(patterns.script_block.is_match("<SCRIPT type=x>\nalert(1)\n</script >"));
        assert!(patterns.quoted_event_handler.is_match(r#"onload = "go()""#));
        assert!(patterns.unquoted_event_handler.is_match("onerror=alert(1)"));
        assert!(patterns.dangerous_protocol.is_match("JavaScript:void(0)"));
        assert!(patterns.html_tag.is_match("<b>"));

        let triggers = [
            "<script",
            "javascript:",
            "onclick=",
            "<iframe",
            "<object",
            "<embed",
        ];
        assert_eq!(patterns.suspicious.len(), triggers.len());
        for (pattern, trigger) in patterns.suspicious.iter().zip(triggers) {
            assert!(pattern.is_match(trigger), "{pattern} should match {trigger}");
            assert!(!pattern.is_match("Branch 12 normal"));
        }
    }

    #[test]
    fn corpus_leaves_no_executable_markup() {
        for payload in XSS_CORPUS {
            let cleaned = sanitize_string(payload).to_lowercase();
            for needle in ["<script", "onerror=", "onload=", "onfocus=", "javascript:"] {
                assert!(
                    !cleaned.contains(needle),
                    "{payload:?} sanitized to {cleaned:?} still contains {needle:?}"
                );
            }
        }
    }

    #[test]
    fn clean_text_is_only_trimmed() {
        for text in ["  Branch 12 Bangkok ", "220V", "ทำงานปกติ", "a-b_c.d (ok)"] {
            assert_eq!(sanitize_string(text), text.trim());
        }
    }

    #[test]
    fn reserved_characters_are_encoded() {
        assert_eq!(
            sanitize_string(r#"Tom & "Jerry's" <b>"#),
            "Tom &amp; &quot;Jerry&#x27;s&quot; &lt;b&gt;"
        );
        assert!(sanitize_string(r#"<SCRIPT>alert("xss")</SCRIPT>"#).contains("&lt;SCRIPT&gt;"));
    }

    #[test]
    fn null_bytes_and_data_urls_are_removed() {
        assert_eq!(sanitize_string("ab\0c"), "abc");
        assert_eq!(sanitize_string("data:text/html,hi"), ",hi");
    }

    #[test]
    fn non_string_input_yields_empty() {
        assert_eq!(sanitize_string_value(&json!(42)), "");
        assert_eq!(sanitize_string_value(&Value::Null), "");
        assert_eq!(sanitize_string_value(&json!("<b>")), "&lt;b&gt;");
    }

    #[test]
    fn nested_structures_keep_non_string_leaves() {
        let input = json!({
            "location": "<b>Branch</b>",
            "work_procedures": {"step1": true, "step2": false},
            "readings": [220, "<i>x</i>", null],
        });

        let output = sanitize_value(&input);

        assert_eq!(
            output,
            json!({
                "location": "&lt;b&gt;Branch&lt;/b&gt;",
                "work_procedures": {"step1": true, "step2": false},
                "readings": [220, "&lt;i&gt;x&lt;/i&gt;", null],
            })
        );
    }

    #[test]
    fn warnings_name_the_field_path() {
        let report = sanitize_form_data(&json!({"message": "<script>x</script>"}));
        assert!(!report.warnings.is_empty());
        assert!(report.warnings.iter().any(|warning| warning.ends_with("message")));

        let nested = sanitize_form_data(&json!({"repair": {"detail": "<iframe src=x>"}}));
        assert_eq!(
            nested.warnings,
            vec!["Suspicious content detected in field: repair.detail".to_string()]
        );
    }

    #[test]
    fn clean_form_has_no_warnings() {
        let report = sanitize_form_data(&json!({
            "location": "Branch 7",
            "machine_number": "1234",
            "work_procedures": {"step1": true},
        }));
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn one_warning_per_matched_pattern() {
        let report = sanitize_form_data(&json!({"x": "<script>javascript:void(0)</script>"}));
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn filename_is_flattened_to_safe_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_filename("site photo #1.jpg"), "site_photo__1.jpg");
        assert_eq!(sanitize_filename(&"a".repeat(300)).len(), 255);
    }

    #[test]
    fn strip_html_removes_tags() {
        assert_eq!(strip_html(" <p>Hello <b>world</b></p> "), "Hello world");
    }

    #[test]
    fn machine_number_requires_four_digits() {
        assert_eq!(sanitize_machine_number("AT-12345"), Some("1234".to_string()));
        assert_eq!(sanitize_machine_number("12a"), None);
    }
}
