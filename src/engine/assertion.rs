//! Assertion evaluation against HTTP responses.
//!
//! Every assertion of a case is evaluated; a failing one never hides the
//! outcome of the ones after it.

use serde_json::Value;

use crate::domain::{Assertion, AssertionResult, Operator, ResponsePayload};
use crate::engine::env::value_to_text;
use crate::engine::extract::JsonPath;
use crate::error::Result;

/// Evaluate all assertions. Kind/operator pairings are checked up front so a
/// configuration problem is reported as such and not as a failed assertion.
pub fn evaluate_all(
    assertions: &[Assertion],
    response: &ResponsePayload,
) -> Result<Vec<AssertionResult>> {
    for assertion in assertions {
        assertion.check_operator()?;
    }

    let document = response.json_body();
    assertions
        .iter()
        .map(|assertion| evaluate(assertion, response, document.as_ref()))
        .collect()
}

pub fn evaluate(
    assertion: &Assertion,
    response: &ResponsePayload,
    document: Option<&Value>,
) -> Result<AssertionResult> {
    assertion.check_operator()?;
    let operator = assertion.operator();
    let expected = assertion.expected();

    let (description, actual) = match assertion {
        Assertion::StatusCode { .. } => (
            format!("status code {} {}", operator.as_str(), value_to_text(expected)),
            Some(Value::from(response.status)),
        ),
        Assertion::BodyContains { .. } => (
            format!("body {} {:?}", operator.as_str(), value_to_text(expected)),
            Some(Value::String(response.body.clone())),
        ),
        Assertion::PathValue { path, .. } => {
            let parsed = JsonPath::parse(path)?;
            (
                format!("{path} {} {}", operator.as_str(), value_to_text(expected)),
                document.and_then(|doc| parsed.select(doc)),
            )
        }
        Assertion::ResponseTime { .. } => (
            format!("response time {} {} ms", operator.as_str(), value_to_text(expected)),
            Some(Value::from(response.elapsed_ms)),
        ),
    };

    let Some(actual) = actual else {
        let reason = if document.is_none() {
            "response body is not JSON"
        } else {
            "path matched nothing"
        };
        return Ok(AssertionResult {
            description: description.clone(),
            passed: false,
            actual: String::new(),
            message: format!("{description}: {reason}"),
        });
    };

    let (passed, detail) = compare(operator, &actual, expected);
    let shown = display_actual(assertion, &actual);
    let message = if passed {
        format!("{description}: passed (actual {shown})")
    } else {
        format!("{description}: failed (actual {shown}{detail})")
    };

    Ok(AssertionResult {
        description,
        passed,
        actual: shown,
        message,
    })
}

fn display_actual(assertion: &Assertion, actual: &Value) -> String {
    const MAX_BODY_CHARS: usize = 200;
    let text = value_to_text(actual);
    if matches!(assertion, Assertion::BodyContains { .. })
        && text.chars().count() > MAX_BODY_CHARS
    {
        let head: String = text.chars().take(MAX_BODY_CHARS).collect();
        return format!("{head}...");
    }
    text
}

fn compare(operator: Operator, actual: &Value, expected: &Value) -> (bool, String) {
    match operator {
        Operator::Equals => (loosely_equal(actual, expected), String::new()),
        Operator::NotEquals => (!loosely_equal(actual, expected), String::new()),
        Operator::Contains => (contains(actual, expected), String::new()),
        Operator::NotContains => (!contains(actual, expected), String::new()),
        Operator::GreaterThan | Operator::LessThan => {
            match (as_number(actual), as_number(expected)) {
                (Some(a), Some(e)) => {
                    let passed = if operator == Operator::GreaterThan { a > e } else { a < e };
                    (passed, String::new())
                }
                _ => (false, ", values are not numeric".to_string()),
            }
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numbers compare numerically (so `"200"` equals `200`), everything else by
/// JSON equality or text form.
fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    if let (Some(a), Some(e)) = (as_number(actual), as_number(expected)) {
        if actual.is_number() || expected.is_number() {
            return a == e;
        }
    }
    value_to_text(actual) == value_to_text(expected)
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, expected)),
        Value::Object(map) => map.contains_key(&value_to_text(expected)),
        other => value_to_text(other).contains(&value_to_text(expected)),
    }
}
