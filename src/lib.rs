//! TaskCraft session core: persisted bearer tokens, single-flight refresh on 401, and Google
//! PKCE sign-in for the mobile client.
//!
//! [`Session`] is the entry point for UI callers. Lower layers are public for callers that need
//! to compose their own stack (custom [`TokenStore`], a different [`TokenRefresher`]).

pub mod auth;
pub mod domain;
pub mod infra;
mod shared;

pub use auth::callback::{CallbackRoute, OAuthCallbackPayload};
pub use auth::coordinator::{RefreshCoordinator, RefreshFuture, TokenRefresher};
pub use auth::credentials::CredentialClient;
pub use auth::pipeline::{ApiClient, ApiRequest, ApiResponse};
pub use auth::pkce::PkceChallenge;
pub use auth::types::{LoginCredentials, MessageResponse, RegisterData, TokenPair, UserProfile};
pub use domain::session::{DeepLinkOutcome, GoogleAuthorization, Session, SessionStatus};
pub use infra::logging::{init_logging, LoggingGuard};
pub use infra::settings::SessionSettings;
pub use infra::token_store::{MemoryTokenStore, SqliteTokenStore, StoreFuture, TokenStore};
pub use shared::error::{AppError, AppResult, ErrorKind};
