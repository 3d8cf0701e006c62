//! Usage: Deep-link parsing for the `taskcraft://` scheme (Google callback payload + route mapping).

use crate::shared::error::{AppError, AppResult};
use reqwest::Url;

pub const APP_SCHEME: &str = "taskcraft";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCallbackPayload {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl OAuthCallbackPayload {
    /// The authorization code, or an exchange error if the provider refused or omitted it.
    pub fn require_code(&self) -> AppResult<&str> {
        if let Some(error) = self.error.as_deref() {
            let detail = self.error_description.as_deref().unwrap_or("no description");
            return Err(AppError::exchange(format!(
                "google sign-in was rejected: {error} ({detail})"
            )));
        }
        self.code
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::exchange("oauth callback missing code"))
    }
}

/// Screens a deep link can land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackRoute {
    Home,
    Login,
    Register,
    CheckEmail,
    GoogleCallback,
}

impl CallbackRoute {
    /// Unknown or unparsable links land on `Home`.
    pub fn from_url(raw: &str) -> Self {
        let Some(path) = app_link_path(raw) else {
            return CallbackRoute::Home;
        };
        match path.as_str() {
            "login" => CallbackRoute::Login,
            "register" => CallbackRoute::Register,
            "check-email" => CallbackRoute::CheckEmail,
            "auth/google/callback" => CallbackRoute::GoogleCallback,
            _ => CallbackRoute::Home,
        }
    }
}

/// `host/path` of a `taskcraft://` link with surrounding slashes removed.
fn app_link_path(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !url.scheme().eq_ignore_ascii_case(APP_SCHEME) {
        return None;
    }
    let host = url.host_str().unwrap_or_default();
    let joined = format!("{host}{}", url.path());
    Some(joined.trim_matches('/').to_ascii_lowercase())
}

/// The optional `callbackUrl` query parameter carried by app links.
pub fn callback_url_param(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "callbackUrl")
        .map(|(_, value)| value.into_owned())
        .filter(|v| !v.is_empty())
}

/// Parses a callback link, accepting only the configured redirect location.
pub fn parse_callback_url(raw: &str, expected_redirect: &str) -> AppResult<OAuthCallbackPayload> {
    let url = Url::parse(raw.trim())
        .map_err(|e| AppError::exchange(format!("invalid oauth callback url: {e}")))?;
    let expected = Url::parse(expected_redirect.trim())
        .map_err(|e| AppError::config(format!("invalid redirect uri {expected_redirect:?}: {e}")))?;

    let same_target = url.scheme().eq_ignore_ascii_case(expected.scheme())
        && url.host_str() == expected.host_str()
        && url.port() == expected.port()
        && url.path().trim_end_matches('/') == expected.path().trim_end_matches('/');
    if !same_target {
        return Err(AppError::exchange("url is not the oauth callback location"));
    }

    let mut code: Option<String> = None;
    let mut state: Option<String> = None;
    let mut error: Option<String> = None;
    let mut error_description: Option<String> = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            "error" => error = Some(value.to_string()),
            "error_description" => error_description = Some(value.to_string()),
            _ => {}
        }
    }

    Ok(OAuthCallbackPayload {
        code,
        state,
        error,
        error_description,
    })
}

pub fn is_callback_url(raw: &str, expected_redirect: &str) -> bool {
    parse_callback_url(raw, expected_redirect).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::error::ErrorKind;

    const REDIRECT: &str = "taskcraft://auth/google/callback";

    #[test]
    fn parse_callback_url_extracts_code_and_state() {
        let payload =
            parse_callback_url("taskcraft://auth/google/callback?code=4%2F0Ab&state=xyz", REDIRECT)
                .expect("payload");
        assert_eq!(payload.code.as_deref(), Some("4/0Ab"));
        assert_eq!(payload.state.as_deref(), Some("xyz"));
        assert_eq!(payload.require_code().unwrap(), "4/0Ab");
    }

    #[test]
    fn provider_error_becomes_exchange_error() {
        let payload = parse_callback_url(
            "taskcraft://auth/google/callback?error=access_denied&error_description=nope",
            REDIRECT,
        )
        .expect("payload");
        let err = payload.require_code().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exchange);
        assert!(err.message().contains("access_denied"));
    }

    #[test]
    fn missing_code_is_exchange_error() {
        let payload =
            parse_callback_url("taskcraft://auth/google/callback?state=s", REDIRECT).unwrap();
        assert_eq!(payload.require_code().unwrap_err().kind(), ErrorKind::Exchange);
    }

    #[test]
    fn other_locations_are_rejected() {
        assert!(parse_callback_url("taskcraft://home?code=abc", REDIRECT).is_err());
        assert!(parse_callback_url("https://auth/google/callback?code=abc", REDIRECT).is_err());
        assert!(parse_callback_url("not a url", REDIRECT).is_err());
        assert!(is_callback_url("taskcraft://auth/google/callback/?code=a", REDIRECT));
    }

    #[test]
    fn routes_map_from_app_links() {
        assert_eq!(CallbackRoute::from_url("taskcraft://home"), CallbackRoute::Home);
        assert_eq!(CallbackRoute::from_url("taskcraft://login"), CallbackRoute::Login);
        assert_eq!(
            CallbackRoute::from_url("taskcraft://register/"),
            CallbackRoute::Register
        );
        assert_eq!(
            CallbackRoute::from_url("taskcraft://check-email?email=a%40b.c"),
            CallbackRoute::CheckEmail
        );
        assert_eq!(
            CallbackRoute::from_url("taskcraft://auth/google/callback?code=1"),
            CallbackRoute::GoogleCallback
        );
    }

    #[test]
    fn unknown_links_fall_back_to_home() {
        assert_eq!(CallbackRoute::from_url(""), CallbackRoute::Home);
        assert_eq!(CallbackRoute::from_url("taskcraft://boards/7"), CallbackRoute::Home);
        assert_eq!(CallbackRoute::from_url("https://login"), CallbackRoute::Home);
    }

    #[test]
    fn callback_url_param_is_decoded() {
        assert_eq!(
            callback_url_param("taskcraft://auth/google/callback?callbackUrl=Board%2F7").as_deref(),
            Some("Board/7")
        );
        assert_eq!(callback_url_param("taskcraft://home"), None);
    }
}
