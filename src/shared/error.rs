//! Usage: Unified session error model (typed kinds rendered as `CODE: message` strings).

use std::sync::Arc;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credentials rejected by the backend during login/register.
    Auth,
    /// Refresh token invalid/expired; the session is over.
    Refresh,
    /// PKCE code exchange or callback failure.
    Exchange,
    Storage,
    /// No stored verifier on callback, or an invalid verifier request.
    Challenge,
    /// Request cancelled by an explicit logout.
    LoggedOut,
    /// Non-2xx answer to a regular API call.
    Http,
    Transport,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Auth => "AUTH_ERROR",
            ErrorKind::Refresh => "REFRESH_ERROR",
            ErrorKind::Exchange => "EXCHANGE_ERROR",
            ErrorKind::Storage => "STORAGE_ERROR",
            ErrorKind::Challenge => "CHALLENGE_ERROR",
            ErrorKind::LoggedOut => "LOGGED_OUT",
            ErrorKind::Http => "HTTP_ERROR",
            ErrorKind::Transport => "TRANSPORT_ERROR",
            ErrorKind::Config => "CONFIG_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        let kind = match code {
            "AUTH_ERROR" => ErrorKind::Auth,
            "REFRESH_ERROR" => ErrorKind::Refresh,
            "EXCHANGE_ERROR" => ErrorKind::Exchange,
            "STORAGE_ERROR" => ErrorKind::Storage,
            "CHALLENGE_ERROR" => ErrorKind::Challenge,
            "LOGGED_OUT" => ErrorKind::LoggedOut,
            "HTTP_ERROR" => ErrorKind::Http,
            "TRANSPORT_ERROR" => ErrorKind::Transport,
            "CONFIG_ERROR" => ErrorKind::Config,
            "INTERNAL_ERROR" => ErrorKind::Internal,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {message}", .kind.code())]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            source: None,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn refresh(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Refresh, message)
    }

    pub fn exchange(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Exchange, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn challenge(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Challenge, message)
    }

    pub fn logged_out() -> Self {
        Self::new(ErrorKind::LoggedOut, "session was logged out")
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status of the response that produced this error, when there was one.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(401)
    }
}

fn split_code_message(raw: &str) -> Option<(&str, &str)> {
    let msg = raw.trim();
    let msg = msg.strip_prefix("Error:").unwrap_or(msg).trim();
    if msg.is_empty() {
        return None;
    }

    let (maybe_code, rest) = msg.split_once(':')?;
    let code = maybe_code.trim();
    if code.is_empty() {
        return None;
    }
    let mut chars = code.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    if !chars.all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_') {
        return None;
    }
    Some((code, rest.trim()))
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        if let Some((code, rest)) = split_code_message(&value) {
            if let Some(kind) = ErrorKind::from_code(code) {
                let message = if rest.is_empty() { value.trim() } else { rest };
                return AppError::new(kind, message.to_string());
            }
        }
        AppError::new(ErrorKind::Internal, value)
    }
}

impl From<&'static str> for AppError {
    fn from(value: &'static str) -> Self {
        AppError::from(value.to_string())
    }
}

impl From<AppError> for String {
    fn from(value: AppError) -> Self {
        value.to_string()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        let kind = if value.is_decode() {
            ErrorKind::Internal
        } else {
            ErrorKind::Transport
        };
        let message = if value.is_timeout() {
            "request timed out".to_string()
        } else {
            format!("request failed: {value}")
        };
        AppError::new(kind, message).with_source(value)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        AppError::storage(format!("sqlite error: {value}")).with_source(value)
    }
}

impl From<r2d2::Error> for AppError {
    fn from(value: r2d2::Error) -> Self {
        AppError::storage(format!("failed to get connection from pool: {value}")).with_source(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::new(ErrorKind::Internal, format!("invalid json: {value}")).with_source(value)
    }
}
