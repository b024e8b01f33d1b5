//! Environment authentication: static credential headers and token login.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::{now_ms, AuthConfig, AuthKind, RequestDescriptor, ResponsePayload};
use crate::engine::env::{value_to_text, AuthTokens, ExecutionContext, Resolver};
use crate::engine::extract::JsonPath;
use crate::engine::http::{join_url, Transport};
use crate::error::{Error, Result};

/// What the login step did, for the run log.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    Skipped,
    StaticHeader(String),
    LoggedIn { url: String, expires_at: Option<u64> },
}

/// Prepare the context's credentials before the first case runs.
pub async fn authenticate(
    context: &mut ExecutionContext,
    transport: &dyn Transport,
    timeout: Duration,
) -> Result<AuthOutcome> {
    let Some(auth) = context.auth.clone() else {
        return Ok(AuthOutcome::Skipped);
    };

    match auth.kind {
        AuthKind::None => Ok(AuthOutcome::Skipped),
        AuthKind::Basic => {
            let credentials = auth
                .credentials
                .as_ref()
                .ok_or_else(|| Error::config("basic auth requires credentials"))?;
            let mut resolver = Resolver::new(context);
            let user = resolver.resolve_str(&credentials.username);
            let password = resolver.resolve_str(&credentials.password);
            let encoded = STANDARD.encode(format!("{user}:{password}"));
            context
                .default_headers
                .insert("Authorization".to_string(), format!("Basic {encoded}"));
            Ok(AuthOutcome::StaticHeader("Authorization".to_string()))
        }
        AuthKind::ApiKey => {
            let (Some(header), Some(value)) = (&auth.api_key_header, &auth.api_key_value) else {
                return Err(Error::config("apiKey auth requires apiKeyHeader and apiKeyValue"));
            };
            let value = Resolver::new(context).resolve_str(value);
            context.default_headers.insert(header.clone(), value);
            Ok(AuthOutcome::StaticHeader(header.clone()))
        }
        AuthKind::OAuth2 => Err(Error::config("oauth2 authentication is not supported")),
        AuthKind::Jwt => login(context, &auth, transport, timeout).await,
    }
}

async fn login(
    context: &mut ExecutionContext,
    auth: &AuthConfig,
    transport: &dyn Transport,
    timeout: Duration,
) -> Result<AuthOutcome> {
    let login_url = auth
        .login_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| Error::config("jwt auth requires loginUrl"))?;
    let credentials = auth
        .credentials
        .as_ref()
        .ok_or_else(|| Error::config("jwt auth requires credentials"))?;

    let (url, body) = {
        let mut resolver = Resolver::new(context);
        let url = join_url(&context.base_url, &resolver.resolve_str(login_url));
        let body = json!({
            "username": resolver.resolve_str(&credentials.username),
            "password": resolver.resolve_str(&credentials.password),
        });
        (url, body)
    };

    let response = post_json(transport, &url, body, timeout).await?;
    let tokens = read_tokens(auth, &response, None)?;
    let expires_at = tokens.expires_at;
    context.tokens = tokens;
    Ok(AuthOutcome::LoggedIn { url, expires_at })
}

/// Exchange the held refresh token for a new access token.
pub async fn refresh(
    context: &mut ExecutionContext,
    transport: &dyn Transport,
    timeout: Duration,
) -> Result<AuthOutcome> {
    let auth = context
        .auth
        .clone()
        .ok_or_else(|| Error::config("no authentication configured"))?;
    let refresh_url = auth
        .refresh_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| Error::config("token refresh requires refreshUrl"))?;

    let (url, body) = {
        let mut resolver = Resolver::new(context);
        let url = join_url(&context.base_url, &resolver.resolve_str(refresh_url));
        let body = refresh_body(&auth.refresh_params, &context.tokens, &mut resolver);
        (url, body)
    };

    let response = post_json(transport, &url, body, timeout).await?;
    let tokens = read_tokens(&auth, &response, Some(&context.tokens))?;
    let expires_at = tokens.expires_at;
    context.tokens = tokens;
    Ok(AuthOutcome::LoggedIn { url, expires_at })
}

/// Refresh parameters with `{refreshToken}` and `{tokenVersion}` filled from
/// the held tokens. Without parameters the refresh token is sent as-is.
fn refresh_body(
    params: &BTreeMap<String, String>,
    tokens: &AuthTokens,
    resolver: &mut Resolver<'_>,
) -> Value {
    let refresh_token = tokens.refresh_token.clone().unwrap_or_default();
    if params.is_empty() {
        return json!({ "refreshToken": refresh_token });
    }
    let version = tokens.token_version.clone().unwrap_or_default();
    let body: Map<String, Value> = params
        .iter()
        .map(|(key, template)| {
            let filled = template
                .replace("{refreshToken}", &refresh_token)
                .replace("{tokenVersion}", &version);
            (key.clone(), Value::String(resolver.resolve_str(&filled)))
        })
        .collect();
    Value::Object(body)
}

async fn post_json(
    transport: &dyn Transport,
    url: &str,
    body: Value,
    timeout: Duration,
) -> Result<ResponsePayload> {
    let request = RequestDescriptor {
        method: "POST".to_string(),
        url: url.to_string(),
        headers: BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]),
        query: Vec::new(),
        body: Some(body),
    };
    let response = transport.send(&request, timeout).await?;
    if !(200..300).contains(&response.status) {
        return Err(Error::Authentication(format!(
            "{url} answered with status {}",
            response.status
        )));
    }
    Ok(response)
}

fn read_tokens(
    auth: &AuthConfig,
    response: &ResponsePayload,
    previous: Option<&AuthTokens>,
) -> Result<AuthTokens> {
    let document = response
        .json_body()
        .ok_or_else(|| Error::Authentication("token response is not JSON".to_string()))?;

    let field = |path: &str| -> Result<Option<String>> {
        let parsed = JsonPath::parse(path)?;
        Ok(parsed
            .select(&document)
            .filter(|value| !value.is_null())
            .map(|value| value_to_text(&value)))
    };

    let token = field(&auth.token_field)?.ok_or_else(|| {
        Error::Authentication(format!("token field `{}` missing from response", auth.token_field))
    })?;
    let refresh_token = field(&auth.refresh_token_field)?
        .or_else(|| previous.and_then(|tokens| tokens.refresh_token.clone()));
    let token_version = match &auth.token_version_field {
        Some(path) => field(path)?,
        None => None,
    }
    .or_else(|| previous.and_then(|tokens| tokens.token_version.clone()));

    let obtained_at = now_ms();
    Ok(AuthTokens {
        token: Some(token),
        refresh_token,
        token_version,
        obtained_at,
        expires_at: auth
            .expires_in
            .map(|secs| obtained_at.saturating_add(secs.saturating_mul(1000))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Credentials, Environment};
    use crate::test_support::{environment, MockTransport, Reply};

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn context_with(auth: AuthConfig) -> ExecutionContext {
        let env = Environment {
            auth: Some(auth),
            ..environment("https://api.test")
        };
        ExecutionContext::new(&env, &[])
    }

    fn jwt() -> AuthConfig {
        AuthConfig {
            login_url: Some("/auth/login".into()),
            credentials: Some(Credentials {
                username: "ada".into(),
                password: "secret".into(),
            }),
            token_field: "$.data.accessToken".into(),
            refresh_token_field: "$.data.refreshToken".into(),
            token_version_field: Some("$.data.version".into()),
            refresh_url: Some("/auth/refresh".into()),
            expires_in: Some(60),
            ..AuthConfig::of_kind(AuthKind::Jwt)
        }
    }

    #[tokio::test]
    async fn jwt_login_stores_tokens() {
        let transport = MockTransport::new().on(
            "/auth/login",
            Reply::ok(json!({"data": {"accessToken": "t-1", "refreshToken": "r-1", "version": 3}})),
        );
        let mut ctx = context_with(jwt());

        let outcome = authenticate(&mut ctx, &transport, TIMEOUT).await.unwrap();
        assert!(matches!(outcome, AuthOutcome::LoggedIn { .. }));
        assert_eq!(ctx.tokens.token.as_deref(), Some("t-1"));
        assert_eq!(ctx.tokens.refresh_token.as_deref(), Some("r-1"));
        assert_eq!(ctx.tokens.token_version.as_deref(), Some("3"));
        let expires_at = ctx.tokens.expires_at.unwrap();
        assert_eq!(expires_at - ctx.tokens.obtained_at, 60_000);

        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "https://api.test/auth/login");
        assert_eq!(sent.body, Some(json!({"username": "ada", "password": "secret"})));
    }

    #[tokio::test]
    async fn jwt_login_rejected_is_authentication_error() {
        let transport =
            MockTransport::new().on("/auth/login", Reply::Json(401, json!({"error": "bad"})));
        let mut ctx = context_with(jwt());
        let err = authenticate(&mut ctx, &transport, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(ctx.tokens.token.is_none());
    }

    #[tokio::test]
    async fn jwt_without_token_field_fails() {
        let transport = MockTransport::new().on("/auth/login", Reply::ok(json!({"data": {}})));
        let mut ctx = context_with(jwt());
        let err = authenticate(&mut ctx, &transport, TIMEOUT).await.unwrap_err();
        assert!(err.to_string().contains("accessToken"));
    }

    #[tokio::test]
    async fn refresh_fills_placeholders_and_keeps_refresh_token() {
        let mut auth = jwt();
        auth.refresh_params = BTreeMap::from([
            ("token".to_string(), "{refreshToken}".to_string()),
            ("v".to_string(), "{tokenVersion}".to_string()),
        ]);
        let transport = MockTransport::new()
            .on("/auth/refresh", Reply::ok(json!({"data": {"accessToken": "t-2"}})));
        let mut ctx = context_with(auth);
        ctx.tokens = AuthTokens {
            token: Some("t-1".into()),
            refresh_token: Some("r-1".into()),
            token_version: Some("3".into()),
            ..Default::default()
        };

        refresh(&mut ctx, &transport, TIMEOUT).await.unwrap();
        assert_eq!(ctx.tokens.token.as_deref(), Some("t-2"));
        assert_eq!(ctx.tokens.refresh_token.as_deref(), Some("r-1"));
        assert_eq!(transport.requests()[0].body, Some(json!({"token": "r-1", "v": "3"})));
    }

    #[tokio::test]
    async fn basic_and_api_key_set_default_headers() {
        let transport = MockTransport::new();
        let mut ctx = context_with(AuthConfig {
            credentials: Some(Credentials {
                username: "user".into(),
                password: "pass".into(),
            }),
            ..AuthConfig::of_kind(AuthKind::Basic)
        });
        authenticate(&mut ctx, &transport, TIMEOUT).await.unwrap();
        assert_eq!(
            ctx.default_headers.get("Authorization").map(String::as_str),
            Some("Basic dXNlcjpwYXNz")
        );

        let mut ctx = context_with(AuthConfig {
            api_key_header: Some("X-Api-Key".into()),
            api_key_value: Some("k-1".into()),
            ..AuthConfig::of_kind(AuthKind::ApiKey)
        });
        authenticate(&mut ctx, &transport, TIMEOUT).await.unwrap();
        assert_eq!(ctx.default_headers.get("X-Api-Key").map(String::as_str), Some("k-1"));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn oauth2_and_incomplete_configs_are_rejected() {
        let transport = MockTransport::new();
        let mut ctx = context_with(AuthConfig::of_kind(AuthKind::OAuth2));
        assert!(matches!(
            authenticate(&mut ctx, &transport, TIMEOUT).await,
            Err(Error::Configuration(_))
        ));
        let mut ctx = context_with(AuthConfig::of_kind(AuthKind::Jwt));
        assert!(matches!(
            authenticate(&mut ctx, &transport, TIMEOUT).await,
            Err(Error::Configuration(_))
        ));
    }
}
