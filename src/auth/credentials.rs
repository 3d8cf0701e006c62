//! Usage: Credential exchange calls (login, register, refresh, Google PKCE code exchange).
//!
//! These requests bypass the bearer/401 pipeline entirely.

use crate::auth::coordinator::{RefreshFuture, TokenRefresher};
use crate::auth::endpoints;
use crate::auth::types::{LoginCredentials, MessageResponse, RegisterData, TokenPair, UserProfile};
use crate::shared::error::{AppError, AppResult, ErrorKind};
use crate::shared::security::mask_token;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde_json::{json, Value};

const LOGIN_FAILED_MESSAGE: &str = "Login failed. Please try again later.";
const REGISTER_FAILED_MESSAGE: &str = "Register failed. Please try again later.";
const RESET_PASSWORD_FAILED_MESSAGE: &str = "Password reset failed. The link may have expired.";
const ERROR_SNIPPET_MAX_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct CredentialClient {
    http: reqwest::Client,
    api_base_url: String,
}

struct RawResponse {
    status: StatusCode,
    body: String,
}

impl CredentialClient {
    pub fn new(http: reqwest::Client, api_base_url: impl Into<String>) -> Self {
        Self {
            http,
            api_base_url: api_base_url.into(),
        }
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> AppResult<TokenPair> {
        let body = serde_json::to_value(credentials)?;
        let response = self.post(endpoints::LOGIN, &body, None).await?;
        if !response.status.is_success() {
            tracing::warn!(
                status = response.status.as_u16(),
                body = %sanitize_error_body_snippet(&response.body),
                "login rejected"
            );
            return Err(rejection(
                ErrorKind::Auth,
                &response,
                LOGIN_FAILED_MESSAGE,
            ));
        }
        let tokens = parse_token_pair(&response.body, ErrorKind::Auth)?;
        tracing::info!(access_token = %mask_token(&tokens.access_token), "login succeeded");
        Ok(tokens)
    }

    pub async fn register(&self, data: &RegisterData) -> AppResult<UserProfile> {
        let body = serde_json::to_value(data)?;
        let response = self.post(endpoints::REGISTER, &body, None).await?;
        if !response.status.is_success() {
            tracing::warn!(
                status = response.status.as_u16(),
                body = %sanitize_error_body_snippet(&response.body),
                "register rejected"
            );
            return Err(rejection(
                ErrorKind::Auth,
                &response,
                REGISTER_FAILED_MESSAGE,
            ));
        }
        serde_json::from_str(&response.body)
            .map_err(|e| AppError::auth(format!("register response json invalid: {e}")))
    }

    /// Any failure here ends the session; transport failures included.
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<TokenPair> {
        let body = json!({ "refreshToken": refresh_token.trim() });
        let response = self
            .post(endpoints::REFRESH, &body, None)
            .await
            .map_err(|e| AppError::refresh(format!("refresh request failed: {}", e.message())))?;
        if !response.status.is_success() {
            tracing::warn!(
                status = response.status.as_u16(),
                body = %sanitize_error_body_snippet(&response.body),
                "refresh rejected"
            );
            return Err(rejection(
                ErrorKind::Refresh,
                &response,
                "session expired",
            ));
        }
        parse_token_pair(&response.body, ErrorKind::Refresh)
    }

    /// Authorization codes are single-use, so this is never retried.
    pub async fn exchange_google_code(
        &self,
        code: &str,
        verifier: &str,
        state: Option<&str>,
    ) -> AppResult<TokenPair> {
        let body = json!({
            "code": code.trim(),
            "code_verifier": verifier,
            "state": state,
        });
        let response = self
            .post(endpoints::GOOGLE_EXCHANGE_CODE, &body, None)
            .await
            .map_err(|e| {
                AppError::exchange(format!("code exchange request failed: {}", e.message()))
            })?;
        if !response.status.is_success() {
            tracing::warn!(
                status = response.status.as_u16(),
                body = %sanitize_error_body_snippet(&response.body),
                "google code exchange rejected"
            );
            return Err(rejection(
                ErrorKind::Exchange,
                &response,
                "google sign-in failed",
            ));
        }
        parse_token_pair(&response.body, ErrorKind::Exchange)
    }

    /// Tells the backend to drop the session; callers treat failures as best-effort.
    pub async fn logout(&self, access_token: Option<&str>) -> AppResult<()> {
        let response = self.post(endpoints::LOGOUT, &Value::Null, access_token).await?;
        if !response.status.is_success() {
            return Err(rejection(ErrorKind::Http, &response, "logout failed"));
        }
        Ok(())
    }

    pub async fn request_password_reset(&self, email: &str) -> AppResult<MessageResponse> {
        let body = json!({ "email": email.trim() });
        let response = self
            .post(endpoints::REQUEST_PASSWORD_RESET, &body, None)
            .await?;
        if !response.status.is_success() {
            return Err(rejection(
                ErrorKind::Http,
                &response,
                "password reset request failed",
            ));
        }
        parse_message(&response.body, "password reset request")
    }

    /// Sets a new password with the token from the reset e-mail. Does not sign in.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> AppResult<MessageResponse> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::auth("password reset token is missing"));
        }
        let body = json!({ "token": token, "newPassword": new_password });
        let response = self.post(endpoints::RESET_PASSWORD, &body, None).await?;
        if !response.status.is_success() {
            tracing::warn!(
                status = response.status.as_u16(),
                "password reset rejected: {}",
                sanitize_error_body_snippet(&response.body)
            );
            return Err(rejection(
                ErrorKind::Auth,
                &response,
                RESET_PASSWORD_FAILED_MESSAGE,
            ));
        }
        parse_message(&response.body, "password reset")
    }

    async fn post(&self, path: &str, body: &Value, bearer: Option<&str>) -> AppResult<RawResponse> {
        let url = endpoints::join(&self.api_base_url, path)?;
        let mut request = self.http.post(url);
        if !body.is_null() {
            request = request.json(body);
        }
        if let Some(token) = bearer.map(str::trim).filter(|v| !v.is_empty()) {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(RawResponse { status, body })
    }
}

impl TokenRefresher for CredentialClient {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> RefreshFuture<'a> {
        Box::pin(CredentialClient::refresh(self, refresh_token))
    }
}

fn rejection(kind: ErrorKind, response: &RawResponse, fallback: &str) -> AppError {
    let message = server_message(&response.body).unwrap_or_else(|| fallback.to_string());
    AppError::new(kind, message).with_status(response.status.as_u16())
}

/// An empty 2xx body is an empty acknowledgement; anything else must decode.
fn parse_message(body: &str, what: &str) -> AppResult<MessageResponse> {
    if body.trim().is_empty() {
        return Ok(MessageResponse {
            message: String::new(),
        });
    }
    serde_json::from_str(body).map_err(|e| {
        tracing::warn!("{what} response json invalid: {}", sanitize_error_body_snippet(body));
        AppError::new(ErrorKind::Internal, format!("{what} response json invalid: {e}"))
            .with_source(e)
    })
}

fn parse_token_pair(body: &str, kind: ErrorKind) -> AppResult<TokenPair> {
    let mut tokens: TokenPair = serde_json::from_str(body)
        .map_err(|e| AppError::new(kind, format!("token response json invalid: {e}")))?;
    tokens.access_token = tokens.access_token.trim().to_string();
    tokens.refresh_token = tokens.refresh_token.trim().to_string();
    if tokens.access_token.is_empty() {
        return Err(AppError::new(kind, "token response missing access token"));
    }
    Ok(tokens)
}

/// Human-readable message from an error body: `message` (string or list), then OAuth-style fields.
pub(crate) fn server_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;

    match value.get("message") {
        Some(Value::String(msg)) if !msg.trim().is_empty() => {
            return Some(msg.trim().to_string());
        }
        Some(Value::Array(items)) => {
            let joined = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                return Some(joined);
            }
        }
        _ => {}
    }

    value
        .get("error_description")
        .or_else(|| value.get("error"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lc = key.trim().to_ascii_lowercase();
    key_lc.contains("token")
        || key_lc.contains("secret")
        || key_lc.contains("password")
        || key_lc.contains("verifier")
        || key_lc == "authorization"
}

fn redact_sensitive_json_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if is_sensitive_key(key) {
                    if let Some(raw) = nested.as_str() {
                        *nested = Value::String(mask_token(raw));
                        continue;
                    }
                }
                redact_sensitive_json_fields(nested);
            }
        }
        Value::Array(items) => {
            for nested in items {
                redact_sensitive_json_fields(nested);
            }
        }
        _ => {}
    }
}

fn sanitize_error_body_snippet(body: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(body) {
        redact_sensitive_json_fields(&mut value);
        if let Ok(encoded) = serde_json::to_string(&value) {
            return encoded.chars().take(ERROR_SNIPPET_MAX_CHARS).collect();
        }
    }
    body.chars().take(ERROR_SNIPPET_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_prefers_message_field() {
        assert_eq!(
            server_message(r#"{"message":"Invalid credentials","statusCode":401}"#).as_deref(),
            Some("Invalid credentials")
        );
    }

    #[test]
    fn server_message_joins_validation_lists() {
        assert_eq!(
            server_message(r#"{"message":["email must be an email","password too short"]}"#)
                .as_deref(),
            Some("email must be an email; password too short")
        );
    }

    #[test]
    fn server_message_falls_back_to_oauth_fields() {
        assert_eq!(
            server_message(r#"{"error":"invalid_grant","error_description":"code reused"}"#)
                .as_deref(),
            Some("code reused")
        );
        assert_eq!(server_message("<html>502</html>"), None);
        assert_eq!(server_message(r#"{"message":"  "}"#), None);
    }

    #[test]
    fn parse_message_rejects_malformed_bodies() {
        assert_eq!(parse_message("  ", "reset").unwrap().message, "");
        assert_eq!(
            parse_message(r#"{"message":"done"}"#, "reset").unwrap().message,
            "done"
        );

        let err = parse_message("<html>ok</html>", "password reset").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.message().starts_with("password reset response json invalid"));
    }

    #[test]
    fn parse_token_pair_requires_access_token() {
        let err = parse_token_pair(r#"{"accessToken":"  ","refreshToken":"r"}"#, ErrorKind::Refresh)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Refresh);

        let err = parse_token_pair("not json", ErrorKind::Exchange).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exchange);
    }

    #[test]
    fn parse_token_pair_trims_values() {
        let tokens =
            parse_token_pair(r#"{"access_token":" a1 ","refresh_token":"r1"}"#, ErrorKind::Auth)
                .unwrap();
        assert_eq!(tokens, TokenPair::new("a1", "r1"));
    }

    #[test]
    fn rejection_carries_status_and_fallback() {
        let response = RawResponse {
            status: StatusCode::UNAUTHORIZED,
            body: String::new(),
        };
        let err = rejection(ErrorKind::Auth, &response, LOGIN_FAILED_MESSAGE);
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.message(), LOGIN_FAILED_MESSAGE);
    }

    #[test]
    fn sanitize_error_body_snippet_masks_secrets() {
        let raw = r#"{
          "message": "bad refresh",
          "refreshToken": "abcd1234xyz9876",
          "nested": {"code_verifier": "verifiervalue123456"}
        }"#;
        let snippet = sanitize_error_body_snippet(raw);
        assert!(snippet.contains(mask_token("abcd1234xyz9876").as_str()));
        assert!(!snippet.contains("abcd1234xyz9876"));
        assert!(!snippet.contains("verifiervalue123456"));
        assert!(snippet.contains("bad refresh"));
    }
}
