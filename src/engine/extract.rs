//! JSONPath selection over response bodies.
//!
//! Paths are evaluated by `jsonpath_lib`. A path that can match several
//! nodes (`*`, `..`, filters) selects an ordered array of every match; any
//! other path selects a single value.

use jsonpath_lib::JsonPathError;
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    expr: String,
}

impl JsonPath {
    /// Accepts `$`-rooted paths and bare ones (`data.id`, `[0].id`).
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let expr = if trimmed.starts_with('$') {
            trimmed.to_string()
        } else if trimmed.starts_with('[') {
            format!("${trimmed}")
        } else {
            format!("$.{trimmed}")
        };

        if let Err(JsonPathError::Path(reason)) = jsonpath_lib::select(&Value::Null, &expr) {
            return Err(Error::config(format!("invalid path `{raw}`: {reason}")));
        }

        Ok(Self {
            raw: trimmed.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn has_wildcard(&self) -> bool {
        self.expr.contains('*') || self.expr.contains("..") || self.expr.contains("[?")
    }

    /// Select from `root`. `None` when nothing matches.
    pub fn select(&self, root: &Value) -> Option<Value> {
        let matches = match jsonpath_lib::select(root, &self.expr) {
            Ok(matches) => matches,
            Err(err) => {
                tracing::debug!(path = %self.raw, "path evaluation failed: {err:?}");
                return None;
            }
        };
        if matches.is_empty() {
            return None;
        }
        if self.has_wildcard() {
            Some(Value::Array(matches.into_iter().cloned().collect()))
        } else {
            matches.first().map(|value| (*value).clone())
        }
    }
}

/// Values bound by one extraction pass, plus a message per path that missed.
#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub bound: Vec<(String, Value)>,
    pub warnings: Vec<String>,
}

pub fn extract_values(rules: &[(String, JsonPath)], body: &str) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();
    if rules.is_empty() {
        return outcome;
    }

    let Ok(document) = serde_json::from_str::<Value>(body) else {
        for (name, path) in rules {
            outcome.warnings.push(format!(
                "cannot extract `{name}` from `{}`: response body is not JSON",
                path.as_str()
            ));
        }
        return outcome;
    };

    for (name, path) in rules {
        match path.select(&document) {
            Some(value) => outcome.bound.push((name.clone(), value)),
            None => outcome
                .warnings
                .push(format!("path `{}` matched nothing; `{name}` not set", path.as_str())),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn select(path: &str, doc: &Value) -> Option<Value> {
        JsonPath::parse(path).unwrap().select(doc)
    }

    #[test]
    fn dotted_access_is_deterministic() {
        let doc = json!({"data": {"id": 7}});
        for _ in 0..10 {
            assert_eq!(select("$.data.id", &doc), Some(json!(7)));
        }
    }

    #[test]
    fn bracket_index_and_quoted_keys() {
        let doc = json!({"items": [{"name": "a"}, {"name": "b"}], "odd key": 1});
        assert_eq!(select("$.items[0].name", &doc), Some(json!("a")));
        assert_eq!(select("$.items[1]['name']", &doc), Some(json!("b")));
        assert_eq!(select("$['odd key']", &doc), Some(json!(1)));
    }

    #[test]
    fn wildcard_yields_ordered_sequence() {
        let doc = json!({"data": {"b": {"id": 2}, "a": {"id": 1}, "c": {"name": "x"}}});
        assert_eq!(select("$.data.*.id", &doc), Some(json!([2, 1])));

        let list = json!({"items": [{"id": 5}, {"id": 6}]});
        assert_eq!(select("$.items[*].id", &list), Some(json!([5, 6])));
    }

    #[test]
    fn missing_paths_select_nothing() {
        let doc = json!({"data": {"id": 7}});
        assert_eq!(select("$.data.name", &doc), None);
        assert_eq!(select("$.data[3]", &doc), None);
        assert_eq!(select("$.nothing.*", &doc), None);
    }

    #[test]
    fn root_and_unprefixed_paths() {
        let doc = json!({"data": {"id": 7}});
        assert_eq!(select("$", &doc), Some(doc.clone()));
        assert_eq!(select("data.id", &doc), Some(json!(7)));
    }

    #[test]
    fn deep_scan_yields_a_sequence_even_for_one_match() {
        let doc = json!({"data": {"owner": {"id": 3}}});
        assert_eq!(select("$..id", &doc), Some(json!([3])));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        assert!(JsonPath::parse("$.items[0").is_err());
        assert!(JsonPath::parse("$.items[").is_err());
    }

    #[test]
    fn extraction_warns_instead_of_failing() {
        let rules = vec![
            ("id".to_string(), JsonPath::parse("$.data.id").unwrap()),
            ("name".to_string(), JsonPath::parse("$.data.name").unwrap()),
        ];
        let outcome = extract_values(&rules, r#"{"data":{"id":7}}"#);
        assert_eq!(outcome.bound, vec![("id".to_string(), json!(7))]);
        assert_eq!(outcome.warnings.len(), 1);

        let outcome = extract_values(&rules, "<html>");
        assert!(outcome.bound.is_empty());
        assert_eq!(outcome.warnings.len(), 2);
    }
}
