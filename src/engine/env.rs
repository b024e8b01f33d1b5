use crate::domain::{AuthConfig, EnvVariable, Environment};
use chrono::Local;
use rand::Rng;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)*)\}").expect("token pattern is valid")
});

/// Build a merged variable map from global variables and environment variables.
/// Priority: environment variables override global variables.
pub fn build_variable_map(
    global_variables: &[EnvVariable],
    environment: Option<&Environment>,
) -> HashMap<String, String> {
    let mut variables = HashMap::new();

    // 1. Global variables (lowest priority)
    for v in global_variables {
        if v.enabled && !v.key.is_empty() {
            variables.insert(v.key.clone(), v.value.clone());
        }
    }

    // 2. Environment variables (override globals)
    if let Some(env) = environment {
        for v in &env.variables {
            if v.enabled && !v.key.is_empty() {
                variables.insert(v.key.clone(), v.value.clone());
            }
        }
    }

    variables
}

/// Credentials obtained by the login call, with expiry bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthTokens {
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_version: Option<String>,
    pub obtained_at: u64,
    pub expires_at: Option<u64>,
}

impl AuthTokens {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Mutable scope of one suite run. Owned by the orchestrator of that run and
/// lent to one case at a time.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub environment_id: String,
    pub base_url: String,
    pub default_headers: BTreeMap<String, String>,
    pub auth: Option<AuthConfig>,
    pub tokens: AuthTokens,
    variables: HashMap<String, String>,
    extracted: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(environment: &Environment, global_variables: &[EnvVariable]) -> Self {
        Self {
            environment_id: environment.id.clone(),
            base_url: environment.base_url.clone(),
            default_headers: environment
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            auth: environment.auth.clone(),
            tokens: AuthTokens::default(),
            variables: build_variable_map(global_variables, Some(environment)),
            extracted: HashMap::new(),
        }
    }

    /// Bind an extracted value both plainly and under the producing case.
    pub fn bind_extracted(&mut self, case_id: &str, name: &str, value: Value) {
        self.extracted.insert(format!("{case_id}.{name}"), value.clone());
        self.extracted.insert(name.to_string(), value);
    }

    pub fn extracted(&self, name: &str) -> Option<&Value> {
        self.extracted.get(name)
    }

    /// Look a token up: extracted values, then environment variables, then
    /// reserved auth fields, then system variables.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.extracted.get(name) {
            return Some(value.clone());
        }
        if let Some(value) = self.variables.get(name) {
            return Some(Value::String(value.clone()));
        }
        let reserved = match name {
            "token" => self.tokens.token.as_ref(),
            "refreshToken" => self.tokens.refresh_token.as_ref(),
            "tokenVersion" => self.tokens.token_version.as_ref(),
            _ => None,
        };
        if let Some(value) = reserved {
            return Some(Value::String(value.clone()));
        }
        system_variable(name)
    }
}

fn system_variable(name: &str) -> Option<Value> {
    let now = Local::now();
    let value = match name.strip_prefix("__").unwrap_or(name).to_ascii_lowercase().as_str() {
        "timestamp" | "datetime" => Value::String(now.format("%Y-%m-%d %H:%M:%S").to_string()),
        "date" => Value::String(now.format("%Y-%m-%d").to_string()),
        "time" => Value::String(now.format("%H:%M:%S").to_string()),
        "unix_timestamp" => Value::from(now.timestamp()),
        "random_int" => Value::from(rand::thread_rng().gen_range(0..10_000)),
        "random_string" => Value::String(format!("random_{}", now.timestamp_millis())),
        "uuid" => Value::String(uuid::Uuid::new_v4().to_string()),
        _ => return None,
    };
    Some(value)
}

/// Text form used when a value lands inside a string.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitutes `${name}` tokens in one pass. Unresolved tokens stay verbatim
/// and are collected for the caller to report.
pub struct Resolver<'a> {
    context: &'a ExecutionContext,
    unresolved: Vec<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(context: &'a ExecutionContext) -> Self {
        Self {
            context,
            unresolved: Vec::new(),
        }
    }

    pub fn resolve_str(&mut self, template: &str) -> String {
        let context = self.context;
        let unresolved = &mut self.unresolved;
        TOKEN_PATTERN
            .replace_all(template, |caps: &Captures<'_>| {
                let name = &caps[1];
                match context.lookup(name) {
                    Some(value) => value_to_text(&value),
                    None => {
                        unresolved.push(name.to_string());
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    /// Resolve every string inside a JSON tree. A string that is exactly one
    /// token takes the bound value's JSON type.
    pub fn resolve_value(&mut self, value: &Value) -> Value {
        match value {
            Value::String(s) => {
                if let Some(caps) = TOKEN_PATTERN.captures(s) {
                    let whole = caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == s.len());
                    if whole {
                        if let Some(bound) = self.context.lookup(&caps[1]) {
                            if !bound.is_string() {
                                return bound;
                            }
                        }
                    }
                }
                Value::String(self.resolve_str(s))
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.resolve_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn resolve_map(&mut self, input: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        input
            .iter()
            .map(|(k, v)| (self.resolve_str(k), self.resolve_str(v)))
            .collect()
    }

    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    pub fn into_unresolved(self) -> Vec<String> {
        self.unresolved
    }
}
