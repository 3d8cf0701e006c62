//! Usage: Session settings (schema, env/file loading and sanitizing).

use crate::shared::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_GOOGLE_REDIRECT_URI: &str = "taskcraft://auth/google/callback";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_REFRESH_TIMEOUT_SECONDS: u32 = 0;
pub const DEFAULT_PKCE_VERIFIER_LENGTH: usize = 64;
const DEFAULT_STORE_FILE_NAME: &str = "taskcraft-session.db";
const DEFAULT_LOG_FILTER: &str = "info";
const MAX_REQUEST_TIMEOUT_MS: u64 = 120_000;
const MAX_REFRESH_TIMEOUT_SECONDS: u32 = 600;
pub const MIN_PKCE_VERIFIER_LENGTH: usize = 43;
pub const MAX_PKCE_VERIFIER_LENGTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    // 0 = disabled: a stalled refresh keeps followers waiting until the transport gives up.
    pub refresh_timeout_seconds: u32,
    pub google_redirect_uri: String,
    pub pkce_verifier_length: usize,
    pub store_path: PathBuf,
    pub log_filter: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            refresh_timeout_seconds: DEFAULT_REFRESH_TIMEOUT_SECONDS,
            google_redirect_uri: DEFAULT_GOOGLE_REDIRECT_URI.to_string(),
            pkce_verifier_length: DEFAULT_PKCE_VERIFIER_LENGTH,
            store_path: PathBuf::from(DEFAULT_STORE_FILE_NAME),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
        }
    }
}

impl SessionSettings {
    /// Defaults overlaid with `TASKCRAFT_*` environment variables.
    pub fn from_env() -> AppResult<Self> {
        Self::default().with_env_get(|key| env::var(key).ok())
    }

    /// Reads a JSON settings file (missing fields take defaults), then applies env overrides.
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        let settings = parse_settings_json(&content)?;
        settings.with_env_get(|key| env::var(key).ok())
    }

    pub(crate) fn with_env_get(
        mut self,
        mut get: impl FnMut(&str) -> Option<String>,
    ) -> AppResult<Self> {
        if let Some(url) = get("TASKCRAFT_API_BASE_URL").and_then(non_empty_trimmed) {
            self.api_base_url = url;
        }
        if let Some(ms) = get("TASKCRAFT_REQUEST_TIMEOUT_MS")
            .as_deref()
            .and_then(parse_u64_trimmed)
        {
            self.request_timeout_ms = ms;
        }
        if let Some(secs) = get("TASKCRAFT_REFRESH_TIMEOUT_SECONDS")
            .as_deref()
            .and_then(parse_u32_trimmed)
        {
            self.refresh_timeout_seconds = secs;
        }
        if let Some(uri) = get("TASKCRAFT_GOOGLE_REDIRECT_URI").and_then(non_empty_trimmed) {
            self.google_redirect_uri = uri;
        }
        if let Some(len) = get("TASKCRAFT_PKCE_VERIFIER_LENGTH")
            .as_deref()
            .and_then(parse_u64_trimmed)
        {
            self.pkce_verifier_length = len as usize;
        }
        if let Some(path) = get("TASKCRAFT_STORE_PATH").and_then(non_empty_trimmed) {
            self.store_path = PathBuf::from(path);
        }
        if let Some(filter) = get("TASKCRAFT_LOG").and_then(non_empty_trimmed) {
            self.log_filter = filter;
        }
        if let Some(dir) = get("TASKCRAFT_LOG_DIR").and_then(non_empty_trimmed) {
            self.log_dir = Some(PathBuf::from(dir));
        }

        self.sanitize();
        self.validate()?;
        Ok(self)
    }

    /// Clamps numeric fields into range. Returns `true` if anything changed.
    pub fn sanitize(&mut self) -> bool {
        let mut changed = false;
        changed |= sanitize_request_timeout(self);
        changed |= sanitize_refresh_timeout(self);
        changed |= sanitize_verifier_length(self);
        if self.api_base_url.ends_with('/') {
            self.api_base_url = self.api_base_url.trim_end_matches('/').to_string();
            changed = true;
        }
        changed
    }

    pub fn validate(&self) -> AppResult<()> {
        let url = reqwest::Url::parse(&self.api_base_url).map_err(|e| {
            AppError::config(format!("invalid api_base_url {:?}: {e}", self.api_base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::config(format!(
                "api_base_url must be http(s), got scheme {:?}",
                url.scheme()
            )));
        }
        reqwest::Url::parse(&self.google_redirect_uri).map_err(|e| {
            AppError::config(format!(
                "invalid google_redirect_uri {:?}: {e}",
                self.google_redirect_uri
            ))
        })?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_timeout(&self) -> Option<Duration> {
        match self.refresh_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(u64::from(secs))),
        }
    }
}

fn sanitize_request_timeout(settings: &mut SessionSettings) -> bool {
    if settings.request_timeout_ms == 0 {
        settings.request_timeout_ms = DEFAULT_REQUEST_TIMEOUT_MS;
        return true;
    }
    if settings.request_timeout_ms > MAX_REQUEST_TIMEOUT_MS {
        settings.request_timeout_ms = MAX_REQUEST_TIMEOUT_MS;
        return true;
    }
    false
}

fn sanitize_refresh_timeout(settings: &mut SessionSettings) -> bool {
    if settings.refresh_timeout_seconds > MAX_REFRESH_TIMEOUT_SECONDS {
        settings.refresh_timeout_seconds = MAX_REFRESH_TIMEOUT_SECONDS;
        return true;
    }
    false
}

fn sanitize_verifier_length(settings: &mut SessionSettings) -> bool {
    let clamped = settings
        .pkce_verifier_length
        .clamp(MIN_PKCE_VERIFIER_LENGTH, MAX_PKCE_VERIFIER_LENGTH);
    if clamped != settings.pkce_verifier_length {
        settings.pkce_verifier_length = clamped;
        return true;
    }
    false
}

fn parse_settings_json(content: &str) -> AppResult<SessionSettings> {
    serde_json::from_str(content)
        .map_err(|e| AppError::config(format!("failed to parse settings json: {e}")))
}

fn non_empty_trimmed(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

fn parse_u32_trimmed(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<u32>().ok()
}

fn parse_u64_trimmed(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<u64>().ok()
}
