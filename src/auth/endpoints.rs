//! Usage: Backend route table and base-URL joining.

use crate::shared::error::{AppError, AppResult};

pub const LOGIN: &str = "auth/login";
pub const REGISTER: &str = "auth/register";
pub const REFRESH: &str = "auth/refresh";
pub const LOGOUT: &str = "auth/logout";
pub const REQUEST_PASSWORD_RESET: &str = "auth/request-password-reset";
pub const RESET_PASSWORD: &str = "auth/reset-password";
pub const GOOGLE_AUTHORIZE: &str = "auth/google/mobile";
pub const GOOGLE_EXCHANGE_CODE: &str = "auth/google/mobile/exchange-code";
pub const CURRENT_USER: &str = "users/me";
pub const SEND_MAGIC_LINK: &str = "users/send-magic-link";

/// Routes that must never enter the 401 refresh path.
const CREDENTIAL_ROUTES: [&str; 5] = [LOGIN, REGISTER, REFRESH, LOGOUT, GOOGLE_EXCHANGE_CODE];

pub(crate) fn normalize_path(path: &str) -> &str {
    let path = path.trim();
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.trim_matches('/')
}

pub(crate) fn is_credential_route(path: &str) -> bool {
    let normalized = normalize_path(path);
    CREDENTIAL_ROUTES
        .iter()
        .any(|route| normalized.eq_ignore_ascii_case(route))
}

/// Joins a relative route onto the API base, keeping any base path prefix.
pub(crate) fn join(api_base_url: &str, path: &str) -> AppResult<reqwest::Url> {
    let base = format!("{}/", api_base_url.trim().trim_end_matches('/'));
    reqwest::Url::parse(&base)
        .and_then(|base| base.join(path.trim().trim_start_matches('/')))
        .map_err(|e| AppError::config(format!("invalid api url {api_base_url:?} + {path:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_routes_are_recognized_in_any_spelling() {
        assert!(is_credential_route("auth/login"));
        assert!(is_credential_route("/auth/refresh"));
        assert!(is_credential_route("auth/refresh/"));
        assert!(is_credential_route("/auth/google/mobile/exchange-code?x=1"));
        assert!(is_credential_route("AUTH/LOGIN"));
    }

    #[test]
    fn regular_routes_are_not_credential_routes() {
        assert!(!is_credential_route("users/me"));
        assert!(!is_credential_route("boards"));
        assert!(!is_credential_route("auth/login-history"));
        assert!(!is_credential_route("auth/request-password-reset"));
    }

    #[test]
    fn join_keeps_base_prefix() {
        let url = join("http://localhost:3000/api/", "/users/me").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/users/me");

        let url = join("https://api.taskcraft.app", "auth/login").unwrap();
        assert_eq!(url.as_str(), "https://api.taskcraft.app/auth/login");
    }

    #[test]
    fn join_rejects_garbage_base() {
        assert!(join("::not a url::", "users/me").is_err());
    }
}
