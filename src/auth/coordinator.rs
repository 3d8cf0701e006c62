//! Usage: Single-flight token refresh shared by every request that hits a 401.
//!
//! The first caller becomes the leader and runs the refresh; callers arriving while it is in
//! flight queue as followers and receive the leader's outcome. Explicit logout cancels the
//! episode and rejects queued followers immediately.

use crate::auth::types::TokenPair;
use crate::infra::token_store::{
    clear_token_pair, get_or_none, save_token_pair, TokenStore, ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
};
use crate::shared::error::{AppError, AppResult};
use crate::shared::mutex_ext::MutexExt;
use crate::shared::security::{mask_optional_token, mask_token};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = AppResult<TokenPair>> + Send + 'a>>;

/// Exchanges a refresh token for a new pair.
pub trait TokenRefresher: Send + Sync {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> RefreshFuture<'a>;
}

type Follower = oneshot::Sender<AppResult<String>>;

enum Phase {
    Idle,
    Refreshing {
        episode: u64,
        cancel: CancellationToken,
    },
}

struct CoordinatorState {
    phase: Phase,
    followers: Vec<Follower>,
    next_episode: u64,
    /// Outcome of the most recently closed episode, keyed by episode.
    last_outcome: Option<(u64, AppResult<String>)>,
}

enum Role {
    Leader {
        episode: u64,
        cancel: CancellationToken,
    },
    Follower(oneshot::Receiver<AppResult<String>>),
    /// An episode started and closed while the caller was checking the store.
    Settled(AppResult<String>),
}

enum Admission {
    Joined(Role),
    Idle { next_episode: u64 },
}

pub struct RefreshCoordinator {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_timeout: Option<Duration>,
    state: Mutex<CoordinatorState>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &self.is_refreshing())
            .field("pending", &self.pending_count())
            .field("refresh_timeout", &self.refresh_timeout)
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        refresher: Arc<dyn TokenRefresher>,
        refresh_timeout: Option<Duration>,
    ) -> Self {
        Self {
            store,
            refresher,
            refresh_timeout,
            state: Mutex::new(CoordinatorState {
                phase: Phase::Idle,
                followers: Vec::new(),
                next_episode: 1,
                last_outcome: None,
            }),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.state.lock_or_recover().phase, Phase::Refreshing { .. })
    }

    /// Followers currently queued behind the leader.
    pub fn pending_count(&self) -> usize {
        self.state.lock_or_recover().followers.len()
    }

    /// Resolves a 401 to the access token the request should be replayed with.
    ///
    /// `sent_with` is the bearer the failed request carried. When the store already holds a
    /// different token the 401 is stale and the current token is returned without refreshing.
    pub async fn handle_unauthorized(&self, sent_with: Option<&str>) -> AppResult<String> {
        let seen_episode = match self.admit() {
            Admission::Joined(role) => return self.resolve(role).await,
            Admission::Idle { next_episode } => next_episode,
        };

        let current = get_or_none(self.store.as_ref(), ACCESS_TOKEN_KEY).await;
        if let Some(current) = current.filter(|v| !v.is_empty()) {
            if sent_with != Some(current.as_str()) {
                tracing::debug!(
                    sent_with = %mask_optional_token(sent_with),
                    current = %mask_token(&current),
                    "401 carried an outdated token; replaying with the stored one"
                );
                return Ok(current);
            }
        }

        let role = self.join_or_lead(seen_episode);
        self.resolve(role).await
    }

    /// Cancels an in-flight refresh and rejects every queued follower with `LOGGED_OUT`.
    ///
    /// Token removal is left to the caller.
    pub fn handle_logout_cleanup(&self) {
        let followers = {
            let mut state = self.state.lock_or_recover();
            let cancelled = match &state.phase {
                Phase::Refreshing { episode, cancel } => {
                    cancel.cancel();
                    Some(*episode)
                }
                Phase::Idle => None,
            };
            if let Some(episode) = cancelled {
                tracing::info!(episode, "logout cancelled in-flight token refresh");
                state.last_outcome = Some((episode, Err(AppError::logged_out())));
            }
            state.phase = Phase::Idle;
            std::mem::take(&mut state.followers)
        };

        if !followers.is_empty() {
            tracing::info!(count = followers.len(), "rejecting queued requests after logout");
        }
        for follower in followers {
            let _ = follower.send(Err(AppError::logged_out()));
        }
    }

    /// Queues behind an in-flight episode, or reports the episode counter seen while idle.
    fn admit(&self) -> Admission {
        let mut state = self.state.lock_or_recover();
        if let Phase::Refreshing { .. } = state.phase {
            return Admission::Joined(follow(&mut state));
        }
        Admission::Idle {
            next_episode: state.next_episode,
        }
    }

    /// `seen_episode` is the counter from `admit`; any episode at or past it that has
    /// already closed answers this 401 without another refresh.
    fn join_or_lead(&self, seen_episode: u64) -> Role {
        let mut state = self.state.lock_or_recover();
        if let Phase::Refreshing { .. } = state.phase {
            return follow(&mut state);
        }
        if let Some((episode, outcome)) = &state.last_outcome {
            if *episode >= seen_episode {
                tracing::debug!(episode, "401 overlapped a finished refresh; reusing its outcome");
                return Role::Settled(outcome.clone());
            }
        }

        let episode = state.next_episode;
        state.next_episode = state.next_episode.wrapping_add(1);
        let cancel = CancellationToken::new();
        state.phase = Phase::Refreshing {
            episode,
            cancel: cancel.clone(),
        };
        Role::Leader { episode, cancel }
    }

    async fn resolve(&self, role: Role) -> AppResult<String> {
        match role {
            Role::Follower(rx) => rx
                .await
                .unwrap_or_else(|_| Err(AppError::refresh("token refresh ended without a result"))),
            Role::Leader { episode, cancel } => self.lead(episode, cancel).await,
            Role::Settled(outcome) => outcome,
        }
    }

    async fn lead(&self, episode: u64, cancel: CancellationToken) -> AppResult<String> {
        tracing::info!(episode, "token refresh started");
        let mut guard = AbandonGuard {
            coordinator: self,
            episode,
            armed: true,
        };

        let refreshed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::logged_out()),
            result = self.obtain_tokens() => result,
        };

        let outcome = match refreshed {
            Ok(tokens) => self.commit(episode, &cancel, tokens).await,
            Err(err) if cancel.is_cancelled() => {
                tracing::debug!(episode, "token refresh stopped by logout");
                Err(err)
            }
            Err(err) => {
                tracing::warn!(episode, "token refresh failed; ending session: {}", err);
                if let Err(clear_err) = clear_token_pair(self.store.as_ref()).await {
                    tracing::error!("failed to clear tokens after refresh failure: {}", clear_err);
                }
                self.settle(episode, Err(err.clone()));
                Err(err)
            }
        };

        guard.armed = false;
        outcome
    }

    async fn obtain_tokens(&self) -> AppResult<TokenPair> {
        let refresh_token = get_or_none(self.store.as_ref(), REFRESH_TOKEN_KEY)
            .await
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::refresh("no refresh token stored"))?;

        let call = self.refresher.refresh(&refresh_token);
        let mut tokens = match self.refresh_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                AppError::refresh(format!("token refresh timed out after {limit:?}"))
            })??,
            None => call.await?,
        };

        if tokens.refresh_token.is_empty() {
            tokens.refresh_token = refresh_token;
        }
        Ok(tokens)
    }

    async fn commit(
        &self,
        episode: u64,
        cancel: &CancellationToken,
        tokens: TokenPair,
    ) -> AppResult<String> {
        if cancel.is_cancelled() {
            return Err(AppError::logged_out());
        }
        if let Err(err) = save_token_pair(self.store.as_ref(), &tokens).await {
            tracing::error!(episode, "failed to persist refreshed tokens: {}", err);
            if let Err(clear_err) = clear_token_pair(self.store.as_ref()).await {
                tracing::error!("failed to clear tokens after write failure: {}", clear_err);
            }
            self.settle(episode, Err(err.clone()));
            return Err(err);
        }

        let access_token = tokens.access_token;
        if cancel.is_cancelled() || !self.settle(episode, Ok(access_token.clone())) {
            // Logout won the race after the write; undo it unless a new sign-in replaced it.
            self.discard_if_current(episode, &access_token).await;
            return Err(AppError::logged_out());
        }

        tracing::info!(
            episode,
            access_token = %mask_token(&access_token),
            "token refresh succeeded"
        );
        Ok(access_token)
    }

    async fn discard_if_current(&self, episode: u64, written: &str) {
        let stored = get_or_none(self.store.as_ref(), ACCESS_TOKEN_KEY).await;
        if stored.as_deref() != Some(written) {
            tracing::debug!(episode, "tokens were replaced after logout; leaving them in place");
            return;
        }
        if let Err(err) = clear_token_pair(self.store.as_ref()).await {
            tracing::error!("failed to drop tokens written after logout: {}", err);
        }
    }

    /// Ends `episode` and hands `outcome` to its followers. Returns false when the episode
    /// was already closed (logout).
    fn settle(&self, episode: u64, outcome: AppResult<String>) -> bool {
        let followers = {
            let mut state = self.state.lock_or_recover();
            match &state.phase {
                Phase::Refreshing {
                    episode: current,
                    cancel,
                } if *current == episode && !cancel.is_cancelled() => {}
                _ => return false,
            }
            state.phase = Phase::Idle;
            state.last_outcome = Some((episode, outcome.clone()));
            std::mem::take(&mut state.followers)
        };

        for follower in followers {
            let _ = follower.send(outcome.clone());
        }
        true
    }
}

fn follow(state: &mut CoordinatorState) -> Role {
    let (tx, rx) = oneshot::channel();
    state.followers.push(tx);
    Role::Follower(rx)
}

/// Closes the episode if the leader future is dropped before finishing.
struct AbandonGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    episode: u64,
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(episode = self.episode, "token refresh abandoned by its caller");
            self.coordinator.settle(
                self.episode,
                Err(AppError::refresh("token refresh was abandoned")),
            );
        }
    }
}
