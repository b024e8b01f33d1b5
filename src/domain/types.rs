use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::engine::extract::JsonPath;
use crate::error::{Error, Result};

// ─── Test Case Types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Grouping label only; every case is executed as an HTTP call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestType {
    #[default]
    Api,
    Ui,
    Business,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub test_type: TestType,
    #[serde(default)]
    pub priority: Priority,
    /// Raw request/assertion configuration, validated into a [`TestCaseConfig`].
    pub config: Value,
    #[serde(default)]
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuite {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteCase {
    pub id: String,
    pub suite_id: String,
    pub test_case_id: String,
    #[serde(default)]
    pub execution_order: i32,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub created_at: u64,
}

fn default_enabled() -> bool {
    true
}

// ─── Assertion Types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    #[serde(alias = "eq", alias = "equal")]
    Equals,
    #[serde(alias = "ne", alias = "notEqual")]
    NotEquals,
    Contains,
    NotContains,
    #[serde(alias = "gt")]
    GreaterThan,
    #[serde(alias = "lt")]
    LessThan,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "notEquals",
            Operator::Contains => "contains",
            Operator::NotContains => "notContains",
            Operator::GreaterThan => "greaterThan",
            Operator::LessThan => "lessThan",
        }
    }
}

/// One declared expectation. The variant decides where the actual value comes
/// from; unknown `type` values fail deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Assertion {
    #[serde(alias = "status_code", alias = "status-code")]
    StatusCode {
        #[serde(default)]
        operator: Option<Operator>,
        expected: Value,
    },
    #[serde(alias = "body_contains", alias = "body-contains")]
    BodyContains {
        #[serde(default)]
        operator: Option<Operator>,
        expected: Value,
    },
    #[serde(alias = "path_value", alias = "path-value", alias = "jsonPath")]
    PathValue {
        path: String,
        #[serde(default)]
        operator: Option<Operator>,
        expected: Value,
    },
    #[serde(alias = "response_time", alias = "response-time")]
    ResponseTime {
        #[serde(default)]
        operator: Option<Operator>,
        expected: Value,
    },
}

impl Assertion {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Assertion::StatusCode { .. } => "statusCode",
            Assertion::BodyContains { .. } => "bodyContains",
            Assertion::PathValue { .. } => "pathValue",
            Assertion::ResponseTime { .. } => "responseTime",
        }
    }

    pub fn expected(&self) -> &Value {
        match self {
            Assertion::StatusCode { expected, .. }
            | Assertion::BodyContains { expected, .. }
            | Assertion::PathValue { expected, .. }
            | Assertion::ResponseTime { expected, .. } => expected,
        }
    }

    /// Declared operator, or the natural one for the kind.
    pub fn operator(&self) -> Operator {
        match self {
            Assertion::StatusCode { operator, .. } | Assertion::PathValue { operator, .. } => {
                operator.unwrap_or(Operator::Equals)
            }
            Assertion::BodyContains { operator, .. } => operator.unwrap_or(Operator::Contains),
            Assertion::ResponseTime { operator, .. } => operator.unwrap_or(Operator::LessThan),
        }
    }

    /// Reject kind/operator pairings that have no meaning.
    pub fn check_operator(&self) -> Result<()> {
        let op = self.operator();
        let allowed = match self {
            Assertion::StatusCode { .. } | Assertion::ResponseTime { .. } => !matches!(
                op,
                Operator::Contains | Operator::NotContains
            ),
            Assertion::BodyContains { .. } => !matches!(
                op,
                Operator::GreaterThan | Operator::LessThan
            ),
            Assertion::PathValue { .. } => true,
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::config(format!(
                "operator `{}` is not supported for `{}` assertions",
                op.as_str(),
                self.kind_name()
            )))
        }
    }
}

// ─── Case Configuration ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCaseConfig {
    #[serde(default)]
    method: String,
    #[serde(default, alias = "url")]
    endpoint: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default, alias = "query")]
    params: BTreeMap<String, Value>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    assertions: Vec<Assertion>,
    #[serde(default, alias = "extractors")]
    extract: BTreeMap<String, String>,
    #[serde(default, alias = "timeoutMs")]
    timeout: Option<u64>,
    #[serde(default, alias = "retryCount")]
    retries: Option<u32>,
}

/// Validated request/assertion configuration of one case. Immutable during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCaseConfig {
    pub method: String,
    pub endpoint: String,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, Value>,
    pub body: Option<Value>,
    pub assertions: Vec<Assertion>,
    pub extract: Vec<(String, JsonPath)>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
}

impl TestCaseConfig {
    /// Parse and validate a raw config. Every problem is a configuration error.
    pub fn from_value(value: &Value) -> Result<Self> {
        let raw: RawCaseConfig = serde_json::from_value(value.clone())
            .map_err(|err| Error::config(format!("invalid test case config: {err}")))?;

        for assertion in &raw.assertions {
            assertion.check_operator()?;
            if let Assertion::PathValue { path, .. } = assertion {
                JsonPath::parse(path)?;
            }
        }

        let extract = raw
            .extract
            .into_iter()
            .map(|(name, path)| {
                if name.trim().is_empty() {
                    return Err(Error::config("extraction variable name is empty"));
                }
                Ok((name, JsonPath::parse(&path)?))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            method: raw.method,
            endpoint: raw.endpoint,
            headers: raw.headers,
            params: raw.params,
            body: raw.body,
            assertions: raw.assertions,
            extract,
            timeout_ms: raw.timeout,
            retries: raw.retries,
        })
    }
}

// ─── Environment Types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVariable {
    pub key: String,
    pub value: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub variables: Vec<EnvVariable>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthKind {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "jwt")]
    Jwt,
    #[serde(rename = "basic")]
    Basic,
    #[serde(rename = "apiKey")]
    ApiKey,
    #[serde(rename = "oauth2")]
    OAuth2,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default, rename = "type")]
    pub kind: AuthKind,
    #[serde(default)]
    pub login_url: Option<String>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default = "default_token_field")]
    pub token_field: String,
    #[serde(default = "default_refresh_token_field")]
    pub refresh_token_field: String,
    #[serde(default)]
    pub token_version_field: Option<String>,
    #[serde(default = "default_header_name")]
    pub header_name: String,
    #[serde(default = "default_header_format")]
    pub header_format: String,
    #[serde(default)]
    pub refresh_url: Option<String>,
    #[serde(default)]
    pub refresh_params: BTreeMap<String, String>,
    /// Token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub auto_refresh: bool,
    #[serde(default)]
    pub api_key_header: Option<String>,
    #[serde(default)]
    pub api_key_value: Option<String>,
}

fn default_token_field() -> String {
    "token".to_string()
}
fn default_refresh_token_field() -> String {
    "refreshToken".to_string()
}
fn default_header_name() -> String {
    "Authorization".to_string()
}
fn default_header_format() -> String {
    "Bearer {token}".to_string()
}

impl AuthConfig {
    pub fn of_kind(kind: AuthKind) -> Self {
        Self {
            kind,
            login_url: None,
            credentials: None,
            token_field: default_token_field(),
            refresh_token_field: default_refresh_token_field(),
            token_version_field: None,
            header_name: default_header_name(),
            header_format: default_header_format(),
            refresh_url: None,
            refresh_params: BTreeMap::new(),
            expires_in: None,
            auto_refresh: false,
            api_key_header: None,
            api_key_value: None,
        }
    }
}

// ─── HTTP Types ───────────────────────────────────────────────────────────────

/// A fully resolved request, ready for the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub elapsed_ms: u64,
    pub size: u64,
    pub content_type: String,
}

impl ResponsePayload {
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_case_config() {
        let config = TestCaseConfig::from_value(&json!({
            "method": "POST",
            "endpoint": "/users",
            "headers": {"Authorization": "Bearer ${token}"},
            "params": {"page": 1},
            "body": {"name": "${name}"},
            "assertions": [
                {"type": "statusCode", "expected": 201},
                {"type": "pathValue", "path": "$.data.id", "operator": "greaterThan", "expected": 0},
                {"type": "responseTime", "expected": 500}
            ],
            "extract": {"userId": "$.data.id"},
            "timeout": 3000,
            "retries": 2
        }))
        .unwrap();

        assert_eq!(config.method, "POST");
        assert_eq!(config.assertions.len(), 3);
        assert_eq!(config.assertions[2].operator(), Operator::LessThan);
        assert_eq!(config.extract[0].0, "userId");
        assert_eq!(config.timeout_ms, Some(3000));
        assert_eq!(config.retries, Some(2));
    }

    #[test]
    fn unknown_assertion_kind_is_configuration_error() {
        let err = TestCaseConfig::from_value(&json!({
            "method": "GET",
            "endpoint": "/",
            "assertions": [{"type": "headerMatches", "expected": "x"}]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn meaningless_operator_pairing_is_rejected() {
        let err = TestCaseConfig::from_value(&json!({
            "method": "GET",
            "endpoint": "/",
            "assertions": [{"type": "statusCode", "operator": "contains", "expected": 200}]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn bad_extraction_path_is_rejected_at_load() {
        let err = TestCaseConfig::from_value(&json!({
            "method": "GET",
            "endpoint": "/",
            "extract": {"id": "$.items[abc"}
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn priorities_order_from_low_to_critical() {
        let mut priorities =
            vec![Priority::Medium, Priority::Critical, Priority::Low, Priority::High];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::Low, Priority::Medium, Priority::High, Priority::Critical]
        );
    }

    #[test]
    fn auth_config_defaults() {
        let auth: AuthConfig =
            serde_json::from_value(json!({"type": "jwt", "loginUrl": "/login"})).unwrap();
        assert_eq!(auth.kind, AuthKind::Jwt);
        assert_eq!(auth.token_field, "token");
        assert_eq!(auth.header_format, "Bearer {token}");
    }
}
