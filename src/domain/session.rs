//! Usage: Session use-cases for UI callers (login/logout, Google PKCE sign-in, deep links, status).

use crate::auth::callback::{callback_url_param, is_callback_url, parse_callback_url, CallbackRoute};
use crate::auth::coordinator::RefreshCoordinator;
use crate::auth::credentials::CredentialClient;
use crate::auth::endpoints;
use crate::auth::pipeline::ApiClient;
use crate::auth::pkce::{google_authorize_url, PkceChallenge};
use crate::auth::types::{LoginCredentials, MessageResponse, RegisterData, TokenPair, UserProfile};
use crate::infra::settings::SessionSettings;
use crate::infra::token_store::{
    get_or_none, load_token_pair, save_token_pair, SqliteTokenStore, TokenStore,
    ACCESS_TOKEN_KEY, GOOGLE_CODE_VERIFIER_KEY, REFRESH_TOKEN_KEY, USER_ID_KEY,
    USER_LANGUAGE_KEY,
};
use crate::shared::error::{AppError, AppResult};
use crate::shared::security::mask_token;
use serde_json::json;
use std::sync::Arc;

/// Keys dropped by `logout`; the UI language survives.
const SESSION_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    USER_ID_KEY,
    GOOGLE_CODE_VERIFIER_KEY,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Authenticated,
    Unauthenticated,
}

/// Where to send the browser, plus the challenge that was registered for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleAuthorization {
    pub url: String,
    pub challenge: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeepLinkOutcome {
    /// The link was the Google callback and the code exchange succeeded.
    SignedIn {
        tokens: TokenPair,
        callback_url: Option<String>,
    },
    Route {
        route: CallbackRoute,
        callback_url: Option<String>,
    },
}

pub struct Session {
    settings: SessionSettings,
    store: Arc<dyn TokenStore>,
    credentials: Arc<CredentialClient>,
    api: ApiClient,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("settings", &self.settings)
            .field("api", &self.api)
            .finish()
    }
}

impl Session {
    /// Opens the durable SQLite store at `settings.store_path`.
    pub async fn open(settings: SessionSettings) -> AppResult<Self> {
        let store = SqliteTokenStore::open_async(settings.store_path.clone()).await?;
        Self::with_store(settings, Arc::new(store))
    }

    pub fn with_store(mut settings: SessionSettings, store: Arc<dyn TokenStore>) -> AppResult<Self> {
        settings.sanitize();
        settings.validate()?;

        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| AppError::config(format!("failed to build http client: {e}")))?;

        let credentials = Arc::new(CredentialClient::new(
            http.clone(),
            settings.api_base_url.clone(),
        ));
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            credentials.clone(),
            settings.refresh_timeout(),
        ));
        let api = ApiClient::new(http, settings.api_base_url.clone(), store.clone(), coordinator);

        tracing::debug!(api_base_url = %settings.api_base_url, "session initialized");
        Ok(Self {
            settings,
            store,
            credentials,
            api,
        })
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Authenticated client for arbitrary backend calls.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        self.api.coordinator()
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> AppResult<TokenPair> {
        let tokens = self.credentials.login(credentials).await?;
        save_token_pair(self.store.as_ref(), &tokens).await?;
        self.remember_user_id().await;
        Ok(tokens)
    }

    pub async fn register(&self, data: &RegisterData) -> AppResult<UserProfile> {
        let user = self.credentials.register(data).await?;
        tracing::info!(user_id = %user.id, "account registered");
        Ok(user)
    }

    /// Ends the local session first, then tells the backend (best-effort).
    pub async fn logout(&self) -> AppResult<()> {
        let access_token = get_or_none(self.store.as_ref(), ACCESS_TOKEN_KEY).await;

        self.coordinator().handle_logout_cleanup();
        self.store.remove(&SESSION_KEYS).await?;
        tracing::info!("logged out");

        if let Some(token) = access_token.as_deref() {
            if let Err(err) = self.credentials.logout(Some(token)).await {
                tracing::warn!("server logout failed (ignored): {}", err);
            }
        }
        Ok(())
    }

    /// Authenticated when either token is stored. Storage failures read as unauthenticated.
    pub async fn status(&self) -> SessionStatus {
        let store = self.store.as_ref();
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if get_or_none(store, key).await.is_some_and(|v| !v.is_empty()) {
                return SessionStatus::Authenticated;
            }
        }
        SessionStatus::Unauthenticated
    }

    pub async fn current_tokens(&self) -> Option<TokenPair> {
        match load_token_pair(self.store.as_ref()).await {
            Ok(tokens) => tokens,
            Err(err) => {
                tracing::warn!("failed to read stored tokens: {}", err);
                None
            }
        }
    }

    /// Generates a PKCE pair, persists the verifier, and returns the authorize URL.
    pub async fn begin_google_login(&self) -> AppResult<GoogleAuthorization> {
        let pkce = PkceChallenge::generate(self.settings.pkce_verifier_length)?;
        let url = google_authorize_url(
            &self.settings.api_base_url,
            &self.settings.google_redirect_uri,
            &pkce.challenge,
        )?;
        self.store
            .set(GOOGLE_CODE_VERIFIER_KEY, &pkce.verifier)
            .await?;

        tracing::info!(challenge = %mask_token(&pkce.challenge), "google sign-in started");
        Ok(GoogleAuthorization {
            url,
            challenge: pkce.challenge,
        })
    }

    /// Exchanges the code from a callback link. The stored verifier is consumed either way.
    pub async fn complete_google_login(&self, callback_url: &str) -> AppResult<TokenPair> {
        let payload = parse_callback_url(callback_url, &self.settings.google_redirect_uri)?;

        let verifier = self.store.get(GOOGLE_CODE_VERIFIER_KEY).await;
        if let Err(err) = self.store.remove(&[GOOGLE_CODE_VERIFIER_KEY]).await {
            tracing::warn!("failed to delete code verifier: {}", err);
        }
        let verifier = verifier?
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::challenge("no pending google sign-in (code verifier missing)"))?;

        let code = payload.require_code()?;
        let tokens = self
            .credentials
            .exchange_google_code(code, &verifier, payload.state.as_deref())
            .await?;
        save_token_pair(self.store.as_ref(), &tokens).await?;
        tracing::info!(access_token = %mask_token(&tokens.access_token), "google sign-in completed");

        self.remember_user_id().await;
        Ok(tokens)
    }

    /// Finishes Google sign-in for callback links; classifies every other app link.
    pub async fn handle_deep_link(&self, url: &str) -> AppResult<DeepLinkOutcome> {
        let callback_url = callback_url_param(url);
        if is_callback_url(url, &self.settings.google_redirect_uri) {
            let tokens = self.complete_google_login(url).await?;
            return Ok(DeepLinkOutcome::SignedIn {
                tokens,
                callback_url,
            });
        }
        Ok(DeepLinkOutcome::Route {
            route: CallbackRoute::from_url(url),
            callback_url,
        })
    }

    pub async fn current_user(&self) -> AppResult<UserProfile> {
        self.api.get_json(endpoints::CURRENT_USER).await
    }

    pub async fn send_magic_link(&self, email: &str) -> AppResult<MessageResponse> {
        self.api
            .post_json(endpoints::SEND_MAGIC_LINK, &json!({ "email": email.trim() }))
            .await
    }

    pub async fn request_password_reset(&self, email: &str) -> AppResult<MessageResponse> {
        self.credentials.request_password_reset(email).await
    }

    /// Completes a reset started by e-mail. The user still has to log in afterwards.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> AppResult<MessageResponse> {
        self.credentials.reset_password(token, new_password).await
    }

    pub async fn language(&self) -> Option<String> {
        get_or_none(self.store.as_ref(), USER_LANGUAGE_KEY)
            .await
            .filter(|v| !v.is_empty())
    }

    /// An empty tag clears the stored preference.
    pub async fn set_language(&self, tag: &str) -> AppResult<()> {
        let tag = tag.trim();
        if tag.is_empty() {
            return self.store.remove(&[USER_LANGUAGE_KEY]).await;
        }
        self.store.set(USER_LANGUAGE_KEY, tag).await
    }

    async fn remember_user_id(&self) {
        match self.current_user().await {
            Ok(user) => {
                if let Err(err) = self.store.set(USER_ID_KEY, &user.id).await {
                    tracing::warn!("failed to store user id: {}", err);
                }
            }
            Err(err) => tracing::warn!("current user lookup after sign-in failed: {}", err),
        }
    }
}
