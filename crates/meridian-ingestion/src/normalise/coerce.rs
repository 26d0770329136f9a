//! Raw value coercion.
//!
//! Every function returns `None` when the value is absent or cannot be
//! coerced; the caller decides whether a default applies.

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

/// Trimmed, non-empty text. Numbers and booleans are rendered.
pub fn text(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

pub fn integer(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let cleaned = s.trim().replace(',', "");
            cleaned
                .parse::<i64>()
                .ok()
                .or_else(|| cleaned.parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        }
        _ => None,
    }
}

pub fn float(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
}

pub fn boolean(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Normalise to `YYYY-MM-DD`.
pub fn date(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.as_i64()?.to_string(),
        _ => return None,
    };

    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(&s, fmt) {
            return Some(d.format("%Y-%m-%d").to_string());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt.date_naive().format("%Y-%m-%d").to_string());
    }
    if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("{s}-01-01"));
    }
    None
}

/// Array of strings, or a `;`/`|`-separated string.
pub fn text_list(v: &Value) -> Option<Vec<String>> {
    let items: Vec<String> = match v {
        Value::Array(items) => items.iter().filter_map(text).collect(),
        Value::String(s) => s
            .split(|c: char| c == ';' || c == '|')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => return None,
    };
    Some(items)
}

/// Lowercase with collapsed whitespace.
pub fn normalized_name(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_accepts_separators() {
        assert_eq!(integer(&json!("1,234,567")), Some(1_234_567));
        assert_eq!(integer(&json!(42)), Some(42));
        assert_eq!(integer(&json!("42.0")), Some(42));
        assert_eq!(integer(&json!("4.5")), None);
        assert_eq!(integer(&json!("abc")), None);
    }

    #[test]
    fn test_boolean_spellings() {
        for t in [json!("yes"), json!("Y"), json!("1"), json!(true), json!(1), json!("TRUE")] {
            assert_eq!(boolean(&t), Some(true), "{t}");
        }
        for f in [json!("no"), json!("n"), json!("0"), json!(false), json!("False")] {
            assert_eq!(boolean(&f), Some(false), "{f}");
        }
        assert_eq!(boolean(&json!("maybe")), None);
    }

    #[test]
    fn test_date_formats() {
        assert_eq!(date(&json!("2021-03-04")).as_deref(), Some("2021-03-04"));
        assert_eq!(date(&json!("2021/03/04")).as_deref(), Some("2021-03-04"));
        assert_eq!(date(&json!("04.03.2021")).as_deref(), Some("2021-03-04"));
        assert_eq!(date(&json!("1999")).as_deref(), Some("1999-01-01"));
        assert_eq!(date(&json!(1999)).as_deref(), Some("1999-01-01"));
        assert_eq!(date(&json!("2021-03-04T10:00:00Z")).as_deref(), Some("2021-03-04"));
        assert_eq!(date(&json!("March 4")), None);
    }

    #[test]
    fn test_text_list_variants() {
        let expected = Some(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(text_list(&json!(["a", " b "])), expected);
        assert_eq!(text_list(&json!("a; b")), expected);
        assert_eq!(text_list(&json!("a|b")), expected);
    }

    #[test]
    fn test_empty_text_is_absent() {
        assert_eq!(text(&json!("   ")), None);
        assert_eq!(text(&json!(null)), None);
        assert_eq!(normalized_name("  Marfan   Syndrome "), "marfan syndrome");
    }
}
