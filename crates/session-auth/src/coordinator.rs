//! Single-flight credential refresh
//!
//! `RefreshCoordinator` owns the live credential pair and serializes refresh
//! exchanges: at most one is in flight at any moment, and every request that
//! hits 401 while it runs awaits that same exchange instead of starting its
//! own. The exchange runs on a spawned task; waiters hold a `Shared` handle
//! to its result, so all of them observe the same outcome and cancelling a
//! waiter never stalls the exchange.
//!
//! Outcomes are published on a `watch` channel (`RefreshState`) so the
//! embedding application can react to session expiry without polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use common::Secret;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info, warn};
use transport::{ApiRequest, Transport};

use crate::error::{Error, Result};
use crate::store::{CredentialPair, SessionStore};
use crate::token;

/// Refresh lifecycle, published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// No exchange in flight
    Idle,
    /// An exchange is in flight; 401'd requests are waiting on it
    Refreshing,
    /// The last exchange failed and both tokens were cleared.
    /// The user must log in again.
    Failed,
}

type RefreshOutcome = Result<Secret<String>>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct Inner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn SessionStore>,
    credentials: RwLock<CredentialPair>,
    pending: Mutex<Option<PendingRefresh>>,
    state: watch::Sender<RefreshState>,
    exchanges: AtomicU64,
}

/// Shared handle to the session's credentials. Cheap to clone.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// Create a coordinator seeded from the store's current pair.
    pub async fn load(transport: Arc<dyn Transport>, store: Arc<dyn SessionStore>) -> Result<Self> {
        let credentials = store.get().await?;
        debug!(
            transport = transport.id(),
            authenticated = credentials.access.is_some(),
            "session loaded"
        );
        let (state, _) = watch::channel(RefreshState::Idle);

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                store,
                credentials: RwLock::new(credentials),
                pending: Mutex::new(None),
                state,
                exchanges: AtomicU64::new(0),
            }),
        })
    }

    pub fn state(&self) -> RefreshState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.inner.state.subscribe()
    }

    /// Number of refresh exchanges sent to the server since creation.
    pub fn exchange_count(&self) -> u64 {
        self.inner.exchanges.load(Ordering::Relaxed)
    }

    pub async fn access_token(&self) -> Option<Secret<String>> {
        self.inner.credentials.read().await.access.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.credentials.read().await.access.is_some()
    }

    /// Attach the current access token to `request` as a bearer header.
    ///
    /// Returns the token attached so a later 401 can be matched against it.
    /// With no token the request goes out unauthenticated (any stale header
    /// from a previous attempt is removed).
    pub async fn attach_access_token(
        &self,
        request: &mut ApiRequest,
    ) -> transport::Result<Option<Secret<String>>> {
        match self.access_token().await {
            Some(token) => {
                request.set_bearer(token.expose())?;
                Ok(Some(token))
            }
            None => {
                request.clear_bearer();
                Ok(None)
            }
        }
    }

    /// Obtain a fresh access token after a request was rejected with 401.
    ///
    /// `token_used` is the token the rejected request carried. If the current
    /// token already differs, another caller refreshed in the meantime and
    /// that token is returned without a new exchange. Otherwise the caller
    /// joins the in-flight exchange, starting one if none is running.
    ///
    /// On failure both tokens are cleared and the state becomes `Failed`.
    pub async fn handle_unauthorized(
        &self,
        token_used: Option<&Secret<String>>,
    ) -> Result<Secret<String>> {
        {
            let credentials = self.inner.credentials.read().await;
            if let Some(current) = &credentials.access {
                if token_used.is_none_or(|used| used != current) {
                    debug!("access token already replaced, skipping refresh");
                    return Ok(current.clone());
                }
            }
        }

        let pending = {
            let mut slot = self.inner.pending.lock().await;
            match slot.as_ref() {
                Some(existing) => {
                    debug!("joining in-flight refresh");
                    existing.clone()
                }
                None => {
                    // The exchange runs on its own task so it completes even
                    // if every waiter is cancelled.
                    let task = tokio::spawn(run_exchange(Arc::clone(&self.inner)));
                    let exchange = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(Error::TokenExchange(format!("refresh task failed: {e}")))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(exchange.clone());
                    exchange
                }
            }
        };

        pending.await
    }

    /// Log in with email and password, replacing any current session.
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let response = token::login(self.inner.transport.as_ref(), email, password).await?;
        let pair = CredentialPair {
            access: Some(Secret::new(response.access_token)),
            refresh: response.refresh_token.map(Secret::new),
        };
        self.inner.store.set(pair.clone()).await?;
        *self.inner.credentials.write().await = pair;
        self.inner.state.send_replace(RefreshState::Idle);
        info!("logged in");
        Ok(())
    }

    /// Revoke the refresh token server-side (best effort) and clear the session.
    pub async fn logout(&self) -> Result<()> {
        let current = self.inner.credentials.read().await.clone();
        if let Some(refresh) = &current.refresh {
            let access = current.access.as_ref().map(|s| s.expose().as_str());
            if let Err(e) =
                token::revoke(self.inner.transport.as_ref(), refresh.expose(), access).await
            {
                warn!(error = %e, "server-side logout failed, clearing local session anyway");
            }
        }
        self.clear().await?;
        self.inner.state.send_replace(RefreshState::Idle);
        info!("logged out");
        Ok(())
    }

    /// Replace the credential pair (e.g. tokens obtained out of band).
    pub async fn set_credentials(&self, pair: CredentialPair) -> Result<()> {
        self.inner.store.set(pair.clone()).await?;
        *self.inner.credentials.write().await = pair;
        Ok(())
    }

    /// Drop both tokens from memory and the store.
    pub async fn clear(&self) -> Result<()> {
        *self.inner.credentials.write().await = CredentialPair::default();
        self.inner.store.clear().await
    }
}

/// One refresh exchange, spawned at most once per pending slot.
async fn run_exchange(inner: Arc<Inner>) -> RefreshOutcome {
    inner.state.send_replace(RefreshState::Refreshing);

    let refresh = inner.credentials.read().await.refresh.clone();
    let result = match refresh {
        Some(refresh) => {
            inner.exchanges.fetch_add(1, Ordering::Relaxed);
            info!("access token rejected, refreshing");
            token::refresh_access_token(inner.transport.as_ref(), refresh.expose()).await
        }
        None => Err(Error::NoRefreshToken),
    };

    let outcome = match result {
        Ok(response) => {
            let access = Secret::new(response.access_token);
            let pair = {
                let mut credentials = inner.credentials.write().await;
                credentials.access = Some(access.clone());
                if let Some(rotated) = response.refresh_token {
                    credentials.refresh = Some(Secret::new(rotated));
                }
                credentials.clone()
            };
            if let Err(e) = inner.store.set(pair).await {
                warn!(error = %e, "failed to persist refreshed credentials");
            }
            info!("access token refreshed");
            inner.state.send_replace(RefreshState::Idle);
            Ok(access)
        }
        Err(e) => {
            warn!(error = %e, "credential refresh failed, session expired");
            *inner.credentials.write().await = CredentialPair::default();
            if let Err(clear_err) = inner.store.clear().await {
                warn!(error = %clear_err, "failed to clear stored credentials");
            }
            inner.state.send_replace(RefreshState::Failed);
            Err(e)
        }
    };

    inner.pending.lock().await.take();
    outcome
}
